/// Core data types for the weather blend service.
///
/// This module defines the shared domain model imported by all other modules:
/// provider points, merged hourly records, training targets, evaluation
/// metrics, and the typed error taxonomy for each pipeline stage.
/// It contains no logic beyond small accessors, and no I/O.

use crate::time_key::TimeKey;
use std::fmt;

// ---------------------------------------------------------------------------
// Location and providers
// ---------------------------------------------------------------------------

/// WGS84 coordinate the whole run is anchored to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

/// The two independent upstream sources.
///
/// `OpenMeteo` is the primary ("provider A") series: it defines which hours
/// exist in the merged table. `WeatherApi` ("provider B") enriches them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    OpenMeteo,
    WeatherApi,
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::OpenMeteo => write!(f, "Open-Meteo"),
            Provider::WeatherApi => write!(f, "WeatherAPI"),
        }
    }
}

// ---------------------------------------------------------------------------
// Reading types
// ---------------------------------------------------------------------------

/// One hour as reported by a single provider.
///
/// Any field may be `None` when the provider returned `null` or omitted it;
/// `None` is never conflated with a reading of zero.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderPoint {
    pub time: TimeKey,
    pub temperature: Option<f64>,
    pub feels_like: Option<f64>,
    pub precip_probability: Option<u8>,
}

/// All points returned by one provider fetch, in upstream order.
pub type ProviderSeries = Vec<ProviderPoint>;

/// The three readings a provider contributes to a merged row.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ProviderFields {
    pub temperature: Option<f64>,
    pub feels_like: Option<f64>,
    pub precip_probability: Option<u8>,
}

impl ProviderFields {
    pub fn from_point(point: &ProviderPoint) -> Self {
        ProviderFields {
            temperature: point.temperature,
            feels_like: point.feels_like,
            precip_probability: point.precip_probability,
        }
    }

    pub fn is_unset(&self) -> bool {
        self.temperature.is_none() && self.feels_like.is_none() && self.precip_probability.is_none()
    }

    /// Value of the field that feeds `target`, widened to `f64`.
    pub fn value_for(&self, target: Target) -> Option<f64> {
        match target {
            Target::Temperature => self.temperature,
            Target::Feeling => self.feels_like,
            Target::Precipitation => self.precip_probability.map(f64::from),
        }
    }
}

/// Model output for one hour. Populated only after training.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PredictedFields {
    pub temperature: Option<f64>,
    pub feels_like: Option<f64>,
    pub precipitation: Option<f64>,
}

impl PredictedFields {
    pub fn get(&self, target: Target) -> Option<f64> {
        match target {
            Target::Temperature => self.temperature,
            Target::Feeling => self.feels_like,
            Target::Precipitation => self.precipitation,
        }
    }

    pub fn set(&mut self, target: Target, value: f64) {
        match target {
            Target::Temperature => self.temperature = Some(value),
            Target::Feeling => self.feels_like = Some(value),
            Target::Precipitation => self.precipitation = Some(value),
        }
    }

    pub fn is_unset(&self) -> bool {
        self.temperature.is_none() && self.feels_like.is_none() && self.precipitation.is_none()
    }
}

/// One row of the merged table: a single UTC hour at the run's coordinate.
#[derive(Debug, Clone, PartialEq)]
pub struct HourlyRecord {
    pub latitude: f64,
    pub longitude: f64,
    pub time: TimeKey,
    pub open_meteo: ProviderFields,
    pub weather_api: ProviderFields,
    pub predicted: PredictedFields,
}

impl HourlyRecord {
    /// A record with every provider and predicted field unset.
    pub fn empty(coordinate: Coordinate, time: TimeKey) -> Self {
        HourlyRecord {
            latitude: coordinate.latitude,
            longitude: coordinate.longitude,
            time,
            open_meteo: ProviderFields::default(),
            weather_api: ProviderFields::default(),
            predicted: PredictedFields::default(),
        }
    }

    pub fn fields(&self, provider: Provider) -> &ProviderFields {
        match provider {
            Provider::OpenMeteo => &self.open_meteo,
            Provider::WeatherApi => &self.weather_api,
        }
    }

    /// Arithmetic mean of both providers' readings for `target`.
    ///
    /// `None` unless both sides are set.
    pub fn blend(&self, target: Target) -> Option<f64> {
        let a = self.open_meteo.value_for(target)?;
        let b = self.weather_api.value_for(target)?;
        Some((a + b) / 2.0)
    }
}

// ---------------------------------------------------------------------------
// Targets and metrics
// ---------------------------------------------------------------------------

/// The three regression targets trained per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Target {
    Temperature,
    Feeling,
    Precipitation,
}

impl Target {
    pub const ALL: [Target; 3] = [Target::Temperature, Target::Feeling, Target::Precipitation];

    /// Name of the blend column this target is trained against.
    pub fn column(&self) -> &'static str {
        match self {
            Target::Temperature => "TEMPERATURE",
            Target::Feeling => "FEELING",
            Target::Precipitation => "PRECIPITATION",
        }
    }

    /// Feature columns, Open-Meteo first.
    pub fn feature_columns(&self) -> [&'static str; 2] {
        match self {
            Target::Temperature => ["omTemp", "wTemp"],
            Target::Feeling => ["omFeelLike", "wFeelLike"],
            Target::Precipitation => ["omPrecipProb", "wPrecipProb"],
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.column())
    }
}

/// Held-out accuracy for one trained target.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationMetric {
    pub target: Target,
    pub mae: f64,
    pub mse: f64,
    pub rmse: f64,
    /// Not-a-number when the actuals have zero variance.
    pub r2: f64,
    /// Number of actual/predicted pairs the metric was computed over.
    pub samples: usize,
}

impl fmt::Display for EvaluationMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{:.2},{:.2},{:.2},{:.2}",
            self.target, self.mae, self.mse, self.rmse, self.r2
        )
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can arise when fetching or decoding a provider response.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchError {
    /// Non-2xx HTTP response from the provider.
    HttpError(u16),
    /// The request never produced a response (DNS, TLS, timeout, ...).
    RequestFailed(String),
    /// The response body could not be deserialized.
    DecodeError(String),
    /// WeatherAPI requires a key and none was configured.
    MissingApiKey,
    /// The fetch was abandoned because the run was cancelled.
    Cancelled,
}

impl FetchError {
    /// Transient failures worth another attempt: transport errors,
    /// rate limiting and server-side errors.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::RequestFailed(_) => true,
            FetchError::HttpError(code) => *code == 429 || *code >= 500,
            _ => false,
        }
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::HttpError(code) => write!(f, "HTTP error: {}", code),
            FetchError::RequestFailed(msg) => write!(f, "Request failed: {}", msg),
            FetchError::DecodeError(msg) => write!(f, "Decode error: {}", msg),
            FetchError::MissingApiKey => write!(f, "No API key configured"),
            FetchError::Cancelled => write!(f, "Fetch cancelled"),
        }
    }
}

impl std::error::Error for FetchError {}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => FetchError::HttpError(status.as_u16()),
            None => FetchError::RequestFailed(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        FetchError::DecodeError(err.to_string())
    }
}

/// Errors writing or re-reading the tabular exports.
#[derive(Debug)]
pub enum ExportError {
    Io(std::io::Error),
    Csv(String),
    /// A row in a re-read export did not match the schema.
    MalformedRow { line: u64, reason: String },
}

impl fmt::Display for ExportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportError::Io(err) => write!(f, "Export I/O error: {}", err),
            ExportError::Csv(msg) => write!(f, "CSV error: {}", msg),
            ExportError::MalformedRow { line, reason } => {
                write!(f, "Malformed export row at line {}: {}", line, reason)
            }
        }
    }
}

impl std::error::Error for ExportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExportError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ExportError {
    fn from(err: std::io::Error) -> Self {
        ExportError::Io(err)
    }
}

impl From<csv::Error> for ExportError {
    fn from(err: csv::Error) -> Self {
        ExportError::Csv(err.to_string())
    }
}

impl From<tempfile::PersistError> for ExportError {
    fn from(err: tempfile::PersistError) -> Self {
        ExportError::Io(err.error)
    }
}

/// Errors fitting a regressor or running inference with it.
#[derive(Debug, Clone, PartialEq)]
pub enum TrainingError {
    /// No row had finite features and a finite target.
    EmptyTrainingSet,
    /// The regression backend rejected the data or parameters.
    FitFailed(String),
    /// Inference failed on the evaluation rows.
    PredictFailed(String),
    /// The model produced non-finite output.
    DidNotConverge,
}

impl fmt::Display for TrainingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrainingError::EmptyTrainingSet => write!(f, "Training set is empty"),
            TrainingError::FitFailed(msg) => write!(f, "Fit failed: {}", msg),
            TrainingError::PredictFailed(msg) => write!(f, "Prediction failed: {}", msg),
            TrainingError::DidNotConverge => write!(f, "Regressor did not converge"),
        }
    }
}

impl std::error::Error for TrainingError {}

/// Errors computing metrics from actual/predicted pairs.
#[derive(Debug, Clone, PartialEq)]
pub enum EvaluationError {
    /// No pairs to evaluate (possibly after filtering).
    Empty,
    LengthMismatch { actual: usize, predicted: usize },
}

impl fmt::Display for EvaluationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvaluationError::Empty => write!(f, "No actual/predicted pairs to evaluate"),
            EvaluationError::LengthMismatch { actual, predicted } => write!(
                f,
                "Length mismatch: {} actual values, {} predicted values",
                actual, predicted
            ),
        }
    }
}

impl std::error::Error for EvaluationError {}
