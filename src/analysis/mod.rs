/// Reconciliation and scoring for the weather blend service.
///
/// This module turns the two flat provider series into the merged per-hour
/// table and scores model output against held-out actuals. Model fitting
/// itself lives in `training`.
///
/// Submodules:
/// - `merge` : organizes provider series into one row per hour.
/// - `evaluation` : MAE/MSE/RMSE/R² over actual-vs-predicted pairs.

pub mod evaluation;
pub mod merge;

pub use evaluation::{evaluate, evaluate_target, EvaluationPolicy};
pub use merge::{merge, merge_with_policy, MergeStats, MergedTable, UnmatchedPolicy};
