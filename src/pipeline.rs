/// End-to-end run: fetch → merge → export → train → evaluate → export.
///
/// A `Pipeline` owns the two provider adapters and the run settings. Each
/// call to `run_at` builds its own merged table and returns it inside the
/// `PipelineRun`, so nothing is shared between runs.
///
/// Stage failures map onto `PipelineError`: a provider failure or an export
/// failure aborts the run, while per-target training and evaluation failures
/// are reported inside `PipelineRun::outcomes` and never abort it.

use crate::analysis::{merge_with_policy, EvaluationPolicy, MergeStats, MergedTable, UnmatchedPolicy};
use crate::config::Config;
use crate::export::{
    export_feature_table, export_predictions, persist_atomically, read_feature_table, FEATURE_FILE_NAME,
    PREDICTIONS_FILE_NAME,
};
use crate::ingest::open_meteo::OpenMeteoProvider;
use crate::ingest::transport::Transport;
use crate::ingest::weather_api::WeatherApiProvider;
use crate::ingest::{DateWindow, WeatherProvider};
use crate::logging::{self, Component};
use crate::model::{Coordinate, EvaluationMetric, ExportError, FetchError, Provider, ProviderSeries};
use crate::training::{
    regressor_for, train_and_evaluate, EvaluationDay, PredictionSet, RegressorKind, RegressorParameters,
    TargetOutcome,
};
use chrono::{NaiveDate, Utc};
use std::any::Any;
use std::fmt;
use std::fs::File;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Shared cancellation flag. Clones observe the same flag.
///
/// The pipeline checks it between stages and provider B checks it between
/// history batches; an in-flight HTTP request is allowed to finish.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    parents: Vec<Arc<AtomicBool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// A token cancelled along with `self`, which can also be cancelled
    /// on its own without touching `self`.
    pub fn child(&self) -> CancelToken {
        let mut parents = self.parents.clone();
        parents.push(Arc::clone(&self.flag));
        CancelToken {
            flag: Arc::new(AtomicBool::new(false)),
            parents,
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst) || self.parents.iter().any(|p| p.load(Ordering::SeqCst))
    }

    /// `Err(FetchError::Cancelled)` once cancelled.
    pub fn check_fetch(&self) -> Result<(), FetchError> {
        if self.is_cancelled() { Err(FetchError::Cancelled) } else { Ok(()) }
    }

    fn check(&self) -> Result<(), PipelineError> {
        if self.is_cancelled() { Err(PipelineError::Cancelled) } else { Ok(()) }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Which stage stopped the run, and why.
#[derive(Debug)]
pub enum PipelineError {
    Fetch { provider: Provider, error: FetchError },
    Export(ExportError),
    Cancelled,
    /// A fetch worker thread panicked.
    WorkerPanicked(String),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Fetch { provider, error } => write!(f, "{} fetch failed: {}", provider, error),
            PipelineError::Export(err) => write!(f, "Export failed: {}", err),
            PipelineError::Cancelled => write!(f, "Run cancelled"),
            PipelineError::WorkerPanicked(msg) => write!(f, "Worker panicked: {}", msg),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PipelineError::Fetch { error, .. } => Some(error),
            PipelineError::Export(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ExportError> for PipelineError {
    fn from(err: ExportError) -> Self {
        PipelineError::Export(err)
    }
}

// ---------------------------------------------------------------------------
// Settings and results
// ---------------------------------------------------------------------------

/// Everything a run needs besides the providers.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub coordinate: Coordinate,
    pub past_days: u32,
    pub forecast_days: u32,
    pub unmatched_secondary: UnmatchedPolicy,
    pub evaluation_day: EvaluationDay,
    pub regressor: RegressorKind,
    pub parameters: RegressorParameters,
    pub evaluation: EvaluationPolicy,
    pub output_dir: PathBuf,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        PipelineSettings {
            coordinate: config.coordinate(),
            past_days: config.location.past_days,
            forecast_days: config.location.forecast_days,
            unmatched_secondary: config.merge.unmatched_secondary,
            evaluation_day: config.training.evaluation_day,
            regressor: config.training.regressor,
            parameters: config.training.parameters.clone(),
            evaluation: config.evaluation_policy(),
            output_dir: config.output.resolved_directory(),
        }
    }
}

/// The populated result of a successful run.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    /// Merged table with predicted fields filled in for the evaluation day.
    pub table: MergedTable,
    pub merge_stats: MergeStats,
    pub evaluation_day: NaiveDate,
    /// Metrics of the targets that could be scored.
    pub metrics: Vec<EvaluationMetric>,
    pub predictions: PredictionSet,
    /// One entry per target, including the ones that failed.
    pub outcomes: Vec<TargetOutcome>,
    pub feature_path: PathBuf,
    pub predictions_path: PathBuf,
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub struct Pipeline {
    settings: PipelineSettings,
    primary: Box<dyn WeatherProvider>,
    secondary: Box<dyn WeatherProvider>,
}

impl Pipeline {
    /// `primary` defines the hours of the merged table; `secondary` enriches them.
    pub fn new(
        settings: PipelineSettings,
        primary: Box<dyn WeatherProvider>,
        secondary: Box<dyn WeatherProvider>,
    ) -> Self {
        Pipeline { settings, primary, secondary }
    }

    /// Open-Meteo as primary and WeatherAPI as secondary, both on `transport`.
    pub fn from_config(config: &Config, transport: Arc<dyn Transport>) -> Self {
        let (primary, secondary) = build_providers(config, transport);
        Pipeline::new(PipelineSettings::from_config(config), primary, secondary)
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Runs against the current UTC date.
    pub fn run(&self, cancel: &CancelToken) -> Result<PipelineRun, PipelineError> {
        self.run_at(Utc::now().date_naive(), cancel)
    }

    /// Runs as if the current UTC date were `today`.
    pub fn run_at(&self, today: NaiveDate, cancel: &CancelToken) -> Result<PipelineRun, PipelineError> {
        cancel.check()?;
        let s = &self.settings;
        let window = DateWindow::new(today, s.past_days, s.forecast_days);
        let context = today.format("%Y-%m-%d").to_string();
        logging::info(
            Component::System,
            Some(&context),
            &format!(
                "Run started at {}, {} ({} past / {} forecast days)",
                s.coordinate.latitude, s.coordinate.longitude, s.past_days, s.forecast_days
            ),
        );

        // Fetch
        let (series_a, series_b) = self.fetch_all(&window, cancel)?;
        cancel.check()?;

        // Merge
        let (mut table, merge_stats) =
            merge_with_policy(s.coordinate, &series_a, &series_b, s.unmatched_secondary);
        logging::info(
            Component::Merge,
            None,
            &format!(
                "{} rows: {} matched, {} unmatched secondary, {} created",
                table.len(),
                merge_stats.matched,
                merge_stats.unmatched_secondary,
                merge_stats.created
            ),
        );
        cancel.check()?;

        // Export and read back
        let feature_bytes = export_feature_table(table.records())?;
        cancel.check()?;
        let feature_path = persist_atomically(&s.output_dir, FEATURE_FILE_NAME, &feature_bytes)?;
        logging::info(
            Component::Export,
            None,
            &format!("Wrote {} rows to {}", table.len(), feature_path.display()),
        );
        let file = File::open(&feature_path).map_err(ExportError::from)?;
        let rows = read_feature_table(file)?;
        cancel.check()?;

        // Train, predict, evaluate
        let evaluation_day = s.evaluation_day.resolve(today);
        let regressor = regressor_for(s.regressor, s.parameters.clone());
        let report = train_and_evaluate(&rows, evaluation_day, regressor.as_ref(), s.evaluation);
        table.clear_predictions();
        table.apply_predictions(&report.predictions);
        cancel.check()?;

        // Predictions export
        let metrics = report.metrics();
        let prediction_bytes = export_predictions(&metrics, &report.predictions)?;
        let predictions_path = persist_atomically(&s.output_dir, PREDICTIONS_FILE_NAME, &prediction_bytes)?;
        logging::info(
            Component::Export,
            None,
            &format!(
                "Wrote {} predictions to {}",
                report.predictions.len(),
                predictions_path.display()
            ),
        );

        Ok(PipelineRun {
            table,
            merge_stats,
            evaluation_day,
            metrics,
            predictions: report.predictions,
            outcomes: report.outcomes,
            feature_path,
            predictions_path,
        })
    }

    /// Fetches both providers concurrently.
    ///
    /// The first provider to fail (or panic) cancels its sibling, so a fast
    /// failure is not held up by a long history walk. The reported error is
    /// the real failure, never the sibling's resulting `Cancelled`; when both
    /// fail on their own, the primary's error is the one reported.
    fn fetch_all(
        &self,
        window: &DateWindow,
        cancel: &CancelToken,
    ) -> Result<(ProviderSeries, ProviderSeries), PipelineError> {
        let coordinate = self.settings.coordinate;
        let fetch_cancel = cancel.child();

        let fetch = |provider: &dyn WeatherProvider| {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| provider.fetch(coordinate, window, &fetch_cancel)));
            if !matches!(outcome, Ok(Ok(_))) {
                fetch_cancel.cancel();
            }
            outcome
        };

        let (primary, secondary) = thread::scope(|scope| {
            let primary = scope.spawn(|| fetch(self.primary.as_ref()));
            let secondary = scope.spawn(|| fetch(self.secondary.as_ref()));
            (
                primary.join().and_then(|outcome| outcome),
                secondary.join().and_then(|outcome| outcome),
            )
        });

        let series_a = self.settle(self.primary.provider(), primary);
        let series_b = self.settle(self.secondary.provider(), secondary);
        match (series_a, series_b) {
            (Ok(a), Ok(b)) => Ok((a, b)),
            (Err(PipelineError::Cancelled), Err(err)) if !cancel.is_cancelled() => Err(err),
            (Err(err), _) | (_, Err(err)) => Err(err),
        }
    }

    fn settle(
        &self,
        provider: Provider,
        joined: thread::Result<Result<ProviderSeries, FetchError>>,
    ) -> Result<ProviderSeries, PipelineError> {
        let result = joined.map_err(|payload| {
            let message = format!("{} worker: {}", provider, panic_message(payload.as_ref()));
            logging::error(provider.into(), None, &message);
            PipelineError::WorkerPanicked(message)
        })?;

        match result {
            Ok(series) => Ok(series),
            Err(FetchError::Cancelled) => Err(PipelineError::Cancelled),
            Err(error) => {
                logging::log_fetch_failure(provider, None, "Fetch", &error);
                Err(PipelineError::Fetch { provider, error })
            }
        }
    }
}

/// The configured provider adapters: Open-Meteo first, WeatherAPI second.
pub fn build_providers(
    config: &Config,
    transport: Arc<dyn Transport>,
) -> (Box<dyn WeatherProvider>, Box<dyn WeatherProvider>) {
    let open_meteo = OpenMeteoProvider::new(
        Arc::clone(&transport),
        config.open_meteo.base_url.clone(),
        config.open_meteo_zone(),
    )
    .with_retry(config.open_meteo_retry());

    let weather_api = WeatherApiProvider::new(
        transport,
        config.weather_api.base_url.clone(),
        config.weather_api.api_key.clone(),
        config.weather_api_zone(),
    )
    .with_max_concurrent_requests(config.weather_api.max_concurrent_requests)
    .with_retry(config.weather_api_retry());

    (Box::new(open_meteo), Box::new(weather_api))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
