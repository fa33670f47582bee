//! Pluggable regressors.
//!
//! `Regressor` turns a feature matrix and a target vector into a
//! `FittedModel`. Four kinds are available, all backed by smartcore:
//!
//! | kind            | backend                                              |
//! |-----------------|------------------------------------------------------|
//! | `linear`        | OLS, or elastic net when a penalty is set            |
//! | `decision_tree` | single regression tree                               |
//! | `random_forest` | bootstrap forest of regression trees                 |
//! | `boosted_tree`  | squared-loss gradient boosting over regression trees |
//!
//! Every model output is checked for finiteness; NaN or infinite
//! predictions surface as `TrainingError::DidNotConverge`.

use crate::model::TrainingError;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Deserialize;
use smartcore::ensemble::random_forest_regressor::{RandomForestRegressor, RandomForestRegressorParameters};
use smartcore::linalg::basic::matrix::DenseMatrix;
use smartcore::linear::elastic_net::{ElasticNet, ElasticNetParameters};
use smartcore::linear::linear_regression::{LinearRegression, LinearRegressionParameters};
use smartcore::tree::decision_tree_regressor::{DecisionTreeRegressor, DecisionTreeRegressorParameters};
use std::fmt;

type Matrix = DenseMatrix<f64>;
type TreeModel = DecisionTreeRegressor<f64, f64, Matrix, Vec<f64>>;

// ---------------------------------------------------------------------------
// Configuration types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegressorKind {
    Linear,
    DecisionTree,
    RandomForest,
    #[default]
    BoostedTree,
}

impl fmt::Display for RegressorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RegressorKind::Linear => "linear",
            RegressorKind::DecisionTree => "decision_tree",
            RegressorKind::RandomForest => "random_forest",
            RegressorKind::BoostedTree => "boosted_tree",
        };
        write!(f, "{}", name)
    }
}

/// Hyperparameters shared by every regressor kind.
///
/// Not every kind reads every field: `min_loss_reduction` and `step_size`
/// only affect boosting, the penalties only affect the linear kind.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RegressorParameters {
    pub max_iterations: usize,
    pub max_depth: u16,
    pub min_loss_reduction: f64,
    pub min_child_weight: f64,
    pub row_subsample_ratio: f64,
    pub column_subsample_ratio: f64,
    pub step_size: f64,
    pub l1_penalty: f64,
    pub l2_penalty: f64,
    pub convergence_threshold: f64,
    pub seed: u64,
}

impl Default for RegressorParameters {
    fn default() -> Self {
        RegressorParameters {
            max_iterations: 10,
            max_depth: 6,
            min_loss_reduction: 0.0,
            min_child_weight: 0.1,
            row_subsample_ratio: 1.0,
            column_subsample_ratio: 1.0,
            step_size: 0.3,
            l1_penalty: 0.0,
            l2_penalty: 0.01,
            convergence_threshold: 0.01,
            seed: 42,
        }
    }
}

impl RegressorParameters {
    /// Checks every field against its allowed range.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_iterations < 1 {
            return Err("max_iterations must be at least 1".into());
        }
        if self.max_depth < 1 {
            return Err("max_depth must be at least 1".into());
        }
        check_closed("min_loss_reduction", self.min_loss_reduction, 0.0, 1.0)?;
        check_closed("min_child_weight", self.min_child_weight, 0.1, 1.0)?;
        check_ratio("row_subsample_ratio", self.row_subsample_ratio)?;
        check_ratio("column_subsample_ratio", self.column_subsample_ratio)?;
        if !(self.step_size.is_finite() && self.step_size > 0.0) {
            return Err(format!("step_size must be positive, got {}", self.step_size));
        }
        check_closed("l1_penalty", self.l1_penalty, 0.0, 1.0)?;
        check_closed("l2_penalty", self.l2_penalty, 0.0, 1.0)?;
        if !(self.convergence_threshold > 0.0 && self.convergence_threshold < 1.0) {
            return Err(format!(
                "convergence_threshold must be in (0, 1), got {}",
                self.convergence_threshold
            ));
        }
        Ok(())
    }

    /// Samples per leaf derived from the minimum child weight.
    fn min_samples_leaf(&self) -> usize {
        (self.min_child_weight.ceil() as usize).max(1)
    }

    fn tree_parameters(&self) -> DecisionTreeRegressorParameters {
        DecisionTreeRegressorParameters::default()
            .with_max_depth(self.max_depth)
            .with_min_samples_leaf(self.min_samples_leaf())
    }
}

fn check_closed(name: &str, value: f64, low: f64, high: f64) -> Result<(), String> {
    if value >= low && value <= high {
        Ok(())
    } else {
        Err(format!("{} must be in [{}, {}], got {}", name, low, high, value))
    }
}

fn check_ratio(name: &str, value: f64) -> Result<(), String> {
    if value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(format!("{} must be in (0, 1], got {}", name, value))
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// A trained model ready for inference.
pub trait FittedModel {
    /// One prediction per feature row.
    fn predict(&self, features: &[Vec<f64>]) -> Result<Vec<f64>, TrainingError>;
}

/// A regression algorithm with its hyperparameters bound.
pub trait Regressor: Send + Sync {
    fn kind(&self) -> RegressorKind;

    /// Fits a model. Rows must be non-empty, equally wide, and finite.
    fn fit(&self, features: &[Vec<f64>], target: &[f64]) -> Result<Box<dyn FittedModel>, TrainingError>;
}

/// Builds the regressor for `kind`.
pub fn regressor_for(kind: RegressorKind, params: RegressorParameters) -> Box<dyn Regressor> {
    match kind {
        RegressorKind::Linear => Box::new(LinearRegressor { params }),
        RegressorKind::DecisionTree => Box::new(TreeRegressor { params }),
        RegressorKind::RandomForest => Box::new(ForestRegressor { params }),
        RegressorKind::BoostedTree => Box::new(BoostedTreeRegressor { params }),
    }
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

fn check_training_set(features: &[Vec<f64>], target: &[f64]) -> Result<usize, TrainingError> {
    if features.is_empty() || target.is_empty() {
        return Err(TrainingError::EmptyTrainingSet);
    }
    if features.len() != target.len() {
        return Err(TrainingError::FitFailed(format!(
            "{} feature rows but {} target values",
            features.len(),
            target.len()
        )));
    }
    let width = features[0].len();
    if width == 0 || features.iter().any(|row| row.len() != width) {
        return Err(TrainingError::FitFailed("feature rows have inconsistent width".into()));
    }
    Ok(width)
}

fn to_matrix(features: &[Vec<f64>]) -> Matrix {
    DenseMatrix::from_2d_vec(&features.to_vec())
}

fn fit_failed(err: impl fmt::Display) -> TrainingError {
    TrainingError::FitFailed(err.to_string())
}

fn predict_failed(err: impl fmt::Display) -> TrainingError {
    TrainingError::PredictFailed(err.to_string())
}

/// Rejects any non-finite model output.
fn finite(values: Vec<f64>) -> Result<Vec<f64>, TrainingError> {
    if values.iter().all(|v| v.is_finite()) {
        Ok(values)
    } else {
        Err(TrainingError::DidNotConverge)
    }
}

/// Inference entry shared by every backend: empty input short-circuits.
fn predict_rows<F>(features: &[Vec<f64>], run: F) -> Result<Vec<f64>, TrainingError>
where
    F: FnOnce(&Matrix) -> Result<Vec<f64>, TrainingError>,
{
    if features.is_empty() {
        return Ok(Vec::new());
    }
    finite(run(&to_matrix(features))?)
}

// ---------------------------------------------------------------------------
// Linear
// ---------------------------------------------------------------------------

pub struct LinearRegressor {
    params: RegressorParameters,
}

enum LinearModel {
    Ols(LinearRegression<f64, f64, Matrix, Vec<f64>>),
    ElasticNet(ElasticNet<f64, f64, Matrix, Vec<f64>>),
}

impl FittedModel for LinearModel {
    fn predict(&self, features: &[Vec<f64>]) -> Result<Vec<f64>, TrainingError> {
        predict_rows(features, |x| match self {
            LinearModel::Ols(model) => model.predict(x).map_err(predict_failed),
            LinearModel::ElasticNet(model) => model.predict(x).map_err(predict_failed),
        })
    }
}

impl Regressor for LinearRegressor {
    fn kind(&self) -> RegressorKind {
        RegressorKind::Linear
    }

    fn fit(&self, features: &[Vec<f64>], target: &[f64]) -> Result<Box<dyn FittedModel>, TrainingError> {
        check_training_set(features, target)?;
        let x = to_matrix(features);
        let y = target.to_vec();
        let p = &self.params;

        let penalty = p.l1_penalty + p.l2_penalty;
        let model = if penalty == 0.0 {
            LinearModel::Ols(LinearRegression::fit(&x, &y, LinearRegressionParameters::default()).map_err(fit_failed)?)
        } else {
            let params = ElasticNetParameters::default()
                .with_alpha(penalty)
                .with_l1_ratio(p.l1_penalty / penalty)
                .with_tol(p.convergence_threshold)
                .with_max_iter(p.max_iterations);
            LinearModel::ElasticNet(ElasticNet::fit(&x, &y, params).map_err(fit_failed)?)
        };
        Ok(Box::new(model))
    }
}

// ---------------------------------------------------------------------------
// Decision tree
// ---------------------------------------------------------------------------

pub struct TreeRegressor {
    params: RegressorParameters,
}

struct TreeFit(TreeModel);

impl FittedModel for TreeFit {
    fn predict(&self, features: &[Vec<f64>]) -> Result<Vec<f64>, TrainingError> {
        predict_rows(features, |x| self.0.predict(x).map_err(predict_failed))
    }
}

impl Regressor for TreeRegressor {
    fn kind(&self) -> RegressorKind {
        RegressorKind::DecisionTree
    }

    fn fit(&self, features: &[Vec<f64>], target: &[f64]) -> Result<Box<dyn FittedModel>, TrainingError> {
        check_training_set(features, target)?;
        let tree = DecisionTreeRegressor::fit(&to_matrix(features), &target.to_vec(), self.params.tree_parameters())
            .map_err(fit_failed)?;
        Ok(Box::new(TreeFit(tree)))
    }
}

// ---------------------------------------------------------------------------
// Random forest
// ---------------------------------------------------------------------------

pub struct ForestRegressor {
    params: RegressorParameters,
}

struct ForestFit(RandomForestRegressor<f64, f64, Matrix, Vec<f64>>);

impl FittedModel for ForestFit {
    fn predict(&self, features: &[Vec<f64>]) -> Result<Vec<f64>, TrainingError> {
        predict_rows(features, |x| self.0.predict(x).map_err(predict_failed))
    }
}

impl Regressor for ForestRegressor {
    fn kind(&self) -> RegressorKind {
        RegressorKind::RandomForest
    }

    fn fit(&self, features: &[Vec<f64>], target: &[f64]) -> Result<Box<dyn FittedModel>, TrainingError> {
        let width = check_training_set(features, target)?;
        let p = &self.params;
        let params = RandomForestRegressorParameters::default()
            .with_n_trees(p.max_iterations)
            .with_max_depth(p.max_depth)
            .with_min_samples_leaf(p.min_samples_leaf())
            .with_m(subsample_count(width, p.column_subsample_ratio))
            .with_seed(p.seed);
        let forest = RandomForestRegressor::fit(&to_matrix(features), &target.to_vec(), params).map_err(fit_failed)?;
        Ok(Box::new(ForestFit(forest)))
    }
}

// ---------------------------------------------------------------------------
// Gradient-boosted trees
// ---------------------------------------------------------------------------

/// Squared-loss gradient boosting.
///
/// The model starts from the target mean. Each round fits a regression tree
/// to the current residuals using a row subsample and a column subsample,
/// then adds `step_size` times that tree's output to the running
/// prediction. Boosting stops after `max_iterations` rounds, or earlier
/// once a round improves training MSE by less than `min_loss_reduction`.
pub struct BoostedTreeRegressor {
    params: RegressorParameters,
}

struct BoostStage {
    columns: Vec<usize>,
    tree: TreeModel,
}

struct BoostedFit {
    base: f64,
    step_size: f64,
    stages: Vec<BoostStage>,
}

/// How many of `total` items a subsample `ratio` keeps (at least one).
fn subsample_count(total: usize, ratio: f64) -> usize {
    ((total as f64 * ratio).ceil() as usize).clamp(1, total.max(1))
}

/// Sorted indices of a random subsample; the full range when nothing is cut.
fn subsample(total: usize, ratio: f64, rng: &mut StdRng) -> Vec<usize> {
    let keep = subsample_count(total, ratio);
    let mut indices: Vec<usize> = (0..total).collect();
    if keep < total {
        indices.shuffle(rng);
        indices.truncate(keep);
        indices.sort_unstable();
    }
    indices
}

fn project(row: &[f64], columns: &[usize]) -> Vec<f64> {
    columns.iter().map(|&c| row[c]).collect()
}

fn mean_squared(residuals: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = residuals.fold((0.0, 0usize), |(s, n), r| (s + r * r, n + 1));
    if count == 0 { 0.0 } else { sum / count as f64 }
}

impl BoostStage {
    fn predict(&self, features: &[Vec<f64>]) -> Result<Vec<f64>, TrainingError> {
        let projected: Vec<Vec<f64>> = features.iter().map(|row| project(row, &self.columns)).collect();
        self.tree.predict(&to_matrix(&projected)).map_err(predict_failed)
    }
}

impl FittedModel for BoostedFit {
    fn predict(&self, features: &[Vec<f64>]) -> Result<Vec<f64>, TrainingError> {
        if features.is_empty() {
            return Ok(Vec::new());
        }
        let mut output = vec![self.base; features.len()];
        for stage in &self.stages {
            let update = stage.predict(features)?;
            for (out, u) in output.iter_mut().zip(update) {
                *out += self.step_size * u;
            }
        }
        finite(output)
    }
}

impl Regressor for BoostedTreeRegressor {
    fn kind(&self) -> RegressorKind {
        RegressorKind::BoostedTree
    }

    fn fit(&self, features: &[Vec<f64>], target: &[f64]) -> Result<Box<dyn FittedModel>, TrainingError> {
        let width = check_training_set(features, target)?;
        let p = &self.params;
        let mut rng = StdRng::seed_from_u64(p.seed);

        let base = target.iter().sum::<f64>() / target.len() as f64;
        let mut current = vec![base; target.len()];
        let mut loss = mean_squared(target.iter().zip(&current).map(|(t, c)| t - c));
        let mut stages = Vec::new();

        for _ in 0..p.max_iterations {
            let rows = subsample(features.len(), p.row_subsample_ratio, &mut rng);
            let columns = subsample(width, p.column_subsample_ratio, &mut rng);

            let x: Vec<Vec<f64>> = rows.iter().map(|&i| project(&features[i], &columns)).collect();
            let residuals: Vec<f64> = rows.iter().map(|&i| target[i] - current[i]).collect();
            let tree = DecisionTreeRegressor::fit(&to_matrix(&x), &residuals, p.tree_parameters())
                .map_err(fit_failed)?;

            let stage = BoostStage { columns, tree };
            let update = stage.predict(features)?;
            for (c, u) in current.iter_mut().zip(update) {
                *c += p.step_size * u;
            }
            stages.push(stage);

            let next = mean_squared(target.iter().zip(&current).map(|(t, c)| t - c));
            if !next.is_finite() {
                return Err(TrainingError::DidNotConverge);
            }
            let improvement = loss - next;
            loss = next;
            if improvement < p.min_loss_reduction {
                break;
            }
        }

        Ok(Box::new(BoostedFit {
            base,
            step_size: p.step_size,
            stages,
        }))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
