/// Training, prediction and scoring per target.
///
/// For each of TEMPERATURE, FEELING and PRECIPITATION the orchestrator:
///
/// 1. selects the two provider columns as features and the blend column as
///    the target from the re-read feature table,
/// 2. trains the configured regressor on every row *outside* the evaluation
///    day that has finite features and a finite target,
/// 3. predicts every row *on* the evaluation day that has finite features,
/// 4. upserts those predictions into the shared `PredictionSet`, and
/// 5. scores them against the evaluation day's blend values.
///
/// A failure in one target is recorded in its `TargetOutcome` and never
/// stops the others.

pub mod regressor;

pub use regressor::{regressor_for, FittedModel, Regressor, RegressorKind, RegressorParameters};

use crate::analysis::{evaluate_target, EvaluationPolicy};
use crate::export::FeatureRow;
use crate::logging::{self, Component};
use crate::model::{EvaluationError, EvaluationMetric, PredictedFields, Target, TrainingError};
use crate::time_key::TimeKey;
use chrono::{Duration, NaiveDate};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Evaluation day
// ---------------------------------------------------------------------------

/// Which calendar day is held out and predicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvaluationDay {
    #[default]
    Today,
    Tomorrow,
}

impl EvaluationDay {
    pub fn resolve(&self, today: NaiveDate) -> NaiveDate {
        match self {
            EvaluationDay::Today => today,
            EvaluationDay::Tomorrow => today + Duration::days(1),
        }
    }
}

// ---------------------------------------------------------------------------
// Prediction set
// ---------------------------------------------------------------------------

/// Predicted values keyed by hour, one optional field per target.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PredictionSet {
    rows: BTreeMap<TimeKey, PredictedFields>,
}

impl PredictionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `target` for `time`, creating the row if this is the first
    /// prediction for that hour. Other targets on the row are untouched.
    pub fn upsert(&mut self, time: TimeKey, target: Target, value: f64) {
        self.rows.entry(time).or_default().set(target, value);
    }

    pub fn get(&self, time: &TimeKey) -> Option<&PredictedFields> {
        self.rows.get(time)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows in ascending time order.
    pub fn iter(&self) -> impl Iterator<Item = (&TimeKey, &PredictedFields)> {
        self.rows.iter()
    }
}

impl<'a> IntoIterator for &'a PredictionSet {
    type Item = (&'a TimeKey, &'a PredictedFields);
    type IntoIter = std::collections::btree_map::Iter<'a, TimeKey, PredictedFields>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Why a target produced no metric.
#[derive(Debug, Clone, PartialEq)]
pub enum TargetFailure {
    Training(TrainingError),
    Evaluation(EvaluationError),
}

impl fmt::Display for TargetFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetFailure::Training(err) => write!(f, "training: {}", err),
            TargetFailure::Evaluation(err) => write!(f, "evaluation: {}", err),
        }
    }
}

impl std::error::Error for TargetFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TargetFailure::Training(err) => Some(err),
            TargetFailure::Evaluation(err) => Some(err),
        }
    }
}

impl From<TrainingError> for TargetFailure {
    fn from(err: TrainingError) -> Self {
        TargetFailure::Training(err)
    }
}

impl From<EvaluationError> for TargetFailure {
    fn from(err: EvaluationError) -> Self {
        TargetFailure::Evaluation(err)
    }
}

/// What happened to one target during a run.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetOutcome {
    pub target: Target,
    pub training_rows: usize,
    /// Hours predicted on the evaluation day.
    pub predictions: usize,
    pub result: Result<EvaluationMetric, TargetFailure>,
}

/// Everything the training stage produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingReport {
    pub predictions: PredictionSet,
    pub outcomes: Vec<TargetOutcome>,
}

impl TrainingReport {
    /// Metrics of the targets that were scored, in target order.
    pub fn metrics(&self) -> Vec<EvaluationMetric> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok().cloned())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Dataset selection
// ---------------------------------------------------------------------------

/// Training and evaluation slices for one target.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TargetDataset {
    pub train_features: Vec<Vec<f64>>,
    pub train_target: Vec<f64>,
    pub eval_times: Vec<TimeKey>,
    pub eval_features: Vec<Vec<f64>>,
    /// Blend values on the evaluation day; NaN where a provider was missing.
    pub eval_actuals: Vec<f64>,
}

/// Splits `rows` into a training set and the held-out evaluation day.
pub fn select_dataset(rows: &[FeatureRow], target: Target, eval_day: NaiveDate) -> TargetDataset {
    let mut dataset = TargetDataset::default();

    for row in rows {
        let features = row.features(target);
        if !features.iter().all(|v| v.is_finite()) {
            continue;
        }
        let actual = row.target_value(target);

        if row.time.is_on(eval_day) {
            dataset.eval_times.push(row.time);
            dataset.eval_features.push(features.to_vec());
            dataset.eval_actuals.push(actual);
        } else if actual.is_finite() {
            dataset.train_features.push(features.to_vec());
            dataset.train_target.push(actual);
        }
    }

    dataset
}

// ---------------------------------------------------------------------------
// Orchestration
// ---------------------------------------------------------------------------

/// Trains, predicts and scores a single target.
pub fn train_target(
    rows: &[FeatureRow],
    target: Target,
    eval_day: NaiveDate,
    regressor: &dyn Regressor,
    policy: EvaluationPolicy,
    predictions: &mut PredictionSet,
) -> TargetOutcome {
    let dataset = select_dataset(rows, target, eval_day);
    let context = target.column();
    logging::debug(
        Component::Training,
        Some(context),
        &format!(
            "{} training rows, {} evaluation rows ({})",
            dataset.train_target.len(),
            dataset.eval_times.len(),
            regressor.kind()
        ),
    );

    let mut outcome = TargetOutcome {
        target,
        training_rows: dataset.train_target.len(),
        predictions: 0,
        result: Err(TargetFailure::Training(TrainingError::EmptyTrainingSet)),
    };

    let predicted = match fit_and_predict(&dataset, regressor) {
        Ok(values) => values,
        Err(err) => {
            logging::warn(Component::Training, Some(context), &format!("Skipped: {}", err));
            outcome.result = Err(err.into());
            return outcome;
        }
    };

    for (time, value) in dataset.eval_times.iter().zip(&predicted) {
        predictions.upsert(*time, target, *value);
    }
    outcome.predictions = predicted.len();

    outcome.result = evaluate_target(target, &dataset.eval_actuals, &predicted, policy).map_err(TargetFailure::from);
    match &outcome.result {
        Ok(metric) => logging::info(
            Component::Evaluation,
            Some(context),
            &format!(
                "MAE {:.2} RMSE {:.2} R2 {:.2} over {} hours",
                metric.mae, metric.rmse, metric.r2, metric.samples
            ),
        ),
        Err(err) => logging::warn(Component::Evaluation, Some(context), &format!("No metric: {}", err)),
    }

    outcome
}

fn fit_and_predict(dataset: &TargetDataset, regressor: &dyn Regressor) -> Result<Vec<f64>, TrainingError> {
    let model = regressor.fit(&dataset.train_features, &dataset.train_target)?;
    model.predict(&dataset.eval_features)
}

/// Runs every target against the same feature rows.
pub fn train_and_evaluate(
    rows: &[FeatureRow],
    eval_day: NaiveDate,
    regressor: &dyn Regressor,
    policy: EvaluationPolicy,
) -> TrainingReport {
    let mut report = TrainingReport::default();

    for target in Target::ALL {
        let outcome = train_target(rows, target, eval_day, regressor, policy, &mut report.predictions);
        report.outcomes.push(outcome);
    }

    let successful = report.outcomes.iter().filter(|o| o.result.is_ok()).count();
    logging::log_training_summary(
        report.outcomes.len(),
        successful,
        report.outcomes.len() - successful,
    );

    report
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// Predicts the mean of the two features, or fails for a chosen target.
    struct MeanOfFeatures {
        fail_when_first_training_value: Option<f64>,
    }

    struct MeanModel;

    impl FittedModel for MeanModel {
        fn predict(&self, features: &[Vec<f64>]) -> Result<Vec<f64>, TrainingError> {
            Ok(features.iter().map(|r| r.iter().sum::<f64>() / r.len() as f64).collect())
        }
    }

    impl Regressor for MeanOfFeatures {
        fn kind(&self) -> RegressorKind {
            RegressorKind::Linear
        }

        fn fit(&self, features: &[Vec<f64>], target: &[f64]) -> Result<Box<dyn FittedModel>, TrainingError> {
            if features.is_empty() {
                return Err(TrainingError::EmptyTrainingSet);
            }
            if self.fail_when_first_training_value == target.first().copied() {
                return Err(TrainingError::DidNotConverge);
            }
            Ok(Box::new(MeanModel))
        }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, d).unwrap()
    }

    /// values: omTemp, omFeelLike, omPrecipProb, wTemp, wFeelLike, wPrecipProb
    fn row(d: u32, hour: u32, v: [f64; 6]) -> FeatureRow {
        let blend = |a: f64, b: f64| (a + b) / 2.0;
        FeatureRow {
            time: TimeKey::new(2025, 3, d, hour).unwrap(),
            latitude: 46.75,
            longitude: 23.57,
            values: [
                v[0],
                v[1],
                v[2],
                v[3],
                v[4],
                v[5],
                blend(v[0], v[3]),
                blend(v[1], v[4]),
                blend(v[2], v[5]),
            ],
        }
    }

    fn sample_rows() -> Vec<FeatureRow> {
        vec![
            row(18, 0, [10.0, 9.0, 20.0, 11.0, 10.0, 30.0]),
            row(18, 1, [12.0, 11.0, 0.0, 13.0, 12.0, 0.0]),
            row(19, 0, [8.0, 7.0, 40.0, 9.0, 8.0, 60.0]),
            row(19, 1, [6.0, 5.0, 0.0, 7.0, 6.0, 0.0]),
            row(19, 2, [5.0, 4.0, 10.0, f64::NAN, f64::NAN, f64::NAN]),
        ]
    }

    #[test]
    fn test_upsert_creates_then_updates() {
        let mut set = PredictionSet::new();
        let t = TimeKey::new(2025, 3, 19, 0).unwrap();
        set.upsert(t, Target::Temperature, 1.0);
        set.upsert(t, Target::Feeling, 2.0);
        set.upsert(t, Target::Temperature, 3.0);

        assert_eq!(set.len(), 1);
        let fields = set.get(&t).unwrap();
        assert_eq!(fields.temperature, Some(3.0));
        assert_eq!(fields.feels_like, Some(2.0));
        assert_eq!(fields.precipitation, None);
    }

    #[test]
    fn test_evaluation_day_resolution() {
        assert_eq!(EvaluationDay::Today.resolve(day(19)), day(19));
        assert_eq!(EvaluationDay::Tomorrow.resolve(day(19)), day(20));
    }

    #[test]
    fn test_split_holds_out_the_evaluation_day() {
        let dataset = select_dataset(&sample_rows(), Target::Temperature, day(19));

        assert_eq!(dataset.train_target, vec![10.5, 12.5]);
        assert_eq!(dataset.eval_times.len(), 2, "row with a missing provider has no features");
        assert_eq!(dataset.eval_features[0], vec![8.0, 9.0]);
        assert_eq!(dataset.eval_actuals, vec![8.5, 6.5]);
    }

    #[test]
    fn test_all_targets_trained_and_scored() {
        let regressor = MeanOfFeatures { fail_when_first_training_value: None };
        let report = train_and_evaluate(&sample_rows(), day(19), &regressor, EvaluationPolicy::default());

        assert_eq!(report.outcomes.len(), 3);
        let metrics = report.metrics();
        assert_eq!(metrics.len(), 3);
        // The mean-of-features model reproduces the blend exactly.
        assert!(metrics.iter().all(|m| m.mae == 0.0));

        assert_eq!(report.predictions.len(), 2);
        let first = report.predictions.get(&TimeKey::new(2025, 3, 19, 0).unwrap()).unwrap();
        assert_eq!(first.temperature, Some(8.5));
        assert_eq!(first.feels_like, Some(7.5));
        assert_eq!(first.precipitation, Some(50.0));
    }

    #[test]
    fn test_one_failing_target_does_not_block_others() {
        // FEELING's first training value is (9 + 10) / 2.
        let regressor = MeanOfFeatures { fail_when_first_training_value: Some(9.5) };
        let report = train_and_evaluate(&sample_rows(), day(19), &regressor, EvaluationPolicy::default());

        let feeling = &report.outcomes[1];
        assert_eq!(feeling.target, Target::Feeling);
        assert_eq!(
            feeling.result,
            Err(TargetFailure::Training(TrainingError::DidNotConverge))
        );
        assert_eq!(feeling.predictions, 0);

        assert!(report.outcomes[0].result.is_ok());
        assert!(report.outcomes[2].result.is_ok());
        let first = report.predictions.get(&TimeKey::new(2025, 3, 19, 0).unwrap()).unwrap();
        assert_eq!(first.feels_like, None);
        assert_eq!(first.temperature, Some(8.5));
    }

    #[test]
    fn test_no_training_rows_is_reported_per_target() {
        let rows: Vec<_> = sample_rows().into_iter().filter(|r| r.time.is_on(day(19))).collect();
        let regressor = MeanOfFeatures { fail_when_first_training_value: None };
        let report = train_and_evaluate(&rows, day(19), &regressor, EvaluationPolicy::default());

        assert!(report.outcomes.iter().all(|o| o.training_rows == 0));
        assert!(report
            .outcomes
            .iter()
            .all(|o| o.result == Err(TargetFailure::Training(TrainingError::EmptyTrainingSet))));
        assert!(report.predictions.is_empty());
    }

    #[test]
    fn test_empty_evaluation_day_is_an_evaluation_failure() {
        let regressor = MeanOfFeatures { fail_when_first_training_value: None };
        let report = train_and_evaluate(&sample_rows(), day(25), &regressor, EvaluationPolicy::default());
        assert!(report
            .outcomes
            .iter()
            .all(|o| o.result == Err(TargetFailure::Evaluation(EvaluationError::Empty))));
    }

    #[test]
    fn test_zero_precipitation_policy_reaches_the_metric() {
        let regressor = MeanOfFeatures { fail_when_first_training_value: None };
        let policy = EvaluationPolicy { exclude_zero_precipitation: true };
        let report = train_and_evaluate(&sample_rows(), day(19), &regressor, policy);

        let precipitation = report.outcomes[2].result.as_ref().unwrap();
        assert_eq!(precipitation.samples, 1);
        let temperature = report.outcomes[0].result.as_ref().unwrap();
        assert_eq!(temperature.samples, 2);
    }
}
