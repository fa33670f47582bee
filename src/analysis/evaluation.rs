//! Held-out accuracy metrics.
//!
//! `evaluate` is the pure metric computation. `evaluate_target` applies the
//! pair filtering policy first: pairs with a non-finite actual are always
//! excluded, and zero-probability actuals are excluded for precipitation
//! when `EvaluationPolicy::exclude_zero_precipitation` is set.

use crate::model::{EvaluationError, EvaluationMetric, Target};

/// Pair filtering applied before metrics are computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EvaluationPolicy {
    /// Drop precipitation pairs whose actual value is exactly zero, so the
    /// metric is not dominated by dry hours.
    pub exclude_zero_precipitation: bool,
}

/// MAE, MSE, RMSE and R² over `actual` vs `predicted`.
///
/// Both slices must be the same non-zero length. R² is NaN when the actuals
/// have zero variance.
pub fn evaluate(target: Target, actual: &[f64], predicted: &[f64]) -> Result<EvaluationMetric, EvaluationError> {
    if actual.len() != predicted.len() {
        return Err(EvaluationError::LengthMismatch {
            actual: actual.len(),
            predicted: predicted.len(),
        });
    }
    if actual.is_empty() {
        return Err(EvaluationError::Empty);
    }

    let n = actual.len() as f64;
    let mut abs_sum = 0.0;
    let mut sq_sum = 0.0;
    for (a, p) in actual.iter().zip(predicted) {
        let residual = a - p;
        abs_sum += residual.abs();
        sq_sum += residual * residual;
    }

    let mean_actual = actual.iter().sum::<f64>() / n;
    let ss_tot: f64 = actual.iter().map(|a| (a - mean_actual).powi(2)).sum();

    let mse = sq_sum / n;
    let r2 = if ss_tot == 0.0 { f64::NAN } else { 1.0 - sq_sum / ss_tot };

    Ok(EvaluationMetric {
        target,
        mae: abs_sum / n,
        mse,
        rmse: mse.sqrt(),
        r2,
        samples: actual.len(),
    })
}

/// Filters pairs per `policy`, then evaluates.
pub fn evaluate_target(
    target: Target,
    actual: &[f64],
    predicted: &[f64],
    policy: EvaluationPolicy,
) -> Result<EvaluationMetric, EvaluationError> {
    if actual.len() != predicted.len() {
        return Err(EvaluationError::LengthMismatch {
            actual: actual.len(),
            predicted: predicted.len(),
        });
    }

    let drop_zero = policy.exclude_zero_precipitation && target == Target::Precipitation;
    let (kept_actual, kept_predicted): (Vec<f64>, Vec<f64>) = actual
        .iter()
        .zip(predicted)
        .filter(|(a, _)| a.is_finite())
        .filter(|(a, _)| !(drop_zero && **a == 0.0))
        .map(|(a, p)| (*a, *p))
        .unzip();

    evaluate(target, &kept_actual, &kept_predicted)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_perfect_prediction() {
        let values = [1.0, 2.5, 4.0];
        let metric = evaluate(Target::Temperature, &values, &values).unwrap();
        assert_eq!(metric.mae, 0.0);
        assert_eq!(metric.mse, 0.0);
        assert_eq!(metric.rmse, 0.0);
        assert_eq!(metric.r2, 1.0);
        assert_eq!(metric.samples, 3);
    }

    #[test]
    fn test_constant_actuals_give_nan_r2() {
        let metric = evaluate(Target::Temperature, &[1.0, 1.0, 1.0], &[2.0, 2.0, 2.0]).unwrap();
        assert!(metric.r2.is_nan());
        assert_eq!(metric.mae, 1.0);
        assert_eq!(metric.mse, 1.0);
        assert_eq!(metric.rmse, 1.0);
    }

    #[test]
    fn test_known_values() {
        // residuals: -1, 0, 2 → MAE 1, MSE 5/3; mean(a)=2, SStot=2
        let metric = evaluate(Target::Feeling, &[1.0, 2.0, 3.0], &[2.0, 2.0, 1.0]).unwrap();
        assert!(close(metric.mae, 1.0));
        assert!(close(metric.mse, 5.0 / 3.0));
        assert!(close(metric.rmse, (5.0f64 / 3.0).sqrt()));
        assert!(close(metric.r2, 1.0 - 5.0 / 2.0));
    }

    #[test]
    fn test_empty_input_is_an_error() {
        assert_eq!(evaluate(Target::Temperature, &[], &[]), Err(EvaluationError::Empty));
    }

    #[test]
    fn test_mismatched_lengths_are_an_error() {
        assert_eq!(
            evaluate(Target::Temperature, &[1.0], &[1.0, 2.0]),
            Err(EvaluationError::LengthMismatch { actual: 1, predicted: 2 })
        );
    }

    #[test]
    fn test_non_finite_actuals_are_skipped() {
        let metric = evaluate_target(
            Target::Temperature,
            &[1.0, f64::NAN, 3.0],
            &[1.0, 100.0, 3.0],
            EvaluationPolicy::default(),
        )
        .unwrap();
        assert_eq!(metric.samples, 2);
        assert_eq!(metric.mae, 0.0);
    }

    #[test]
    fn test_zero_precipitation_filter_applies_only_when_enabled() {
        let actual = [0.0, 40.0, 60.0];
        let predicted = [10.0, 40.0, 60.0];

        let unfiltered =
            evaluate_target(Target::Precipitation, &actual, &predicted, EvaluationPolicy::default()).unwrap();
        assert_eq!(unfiltered.samples, 3);

        let policy = EvaluationPolicy { exclude_zero_precipitation: true };
        let filtered = evaluate_target(Target::Precipitation, &actual, &predicted, policy).unwrap();
        assert_eq!(filtered.samples, 2);
        assert_eq!(filtered.mae, 0.0);
    }

    #[test]
    fn test_zero_filter_ignores_other_targets() {
        let policy = EvaluationPolicy { exclude_zero_precipitation: true };
        let metric = evaluate_target(Target::Temperature, &[0.0, 1.0], &[0.0, 1.0], policy).unwrap();
        assert_eq!(metric.samples, 2);
    }

    #[test]
    fn test_zero_filter_leaving_nothing_is_empty_error() {
        let policy = EvaluationPolicy { exclude_zero_precipitation: true };
        let result = evaluate_target(Target::Precipitation, &[0.0, 0.0], &[1.0, 2.0], policy);
        assert_eq!(result, Err(EvaluationError::Empty));
    }
}
