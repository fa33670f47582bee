/// Service configuration.
///
/// Settings come from a TOML file; every field has a default, so an empty
/// file (or no file) yields a runnable configuration for the default
/// coordinate. The WeatherAPI key is a secret and never lives in the file:
/// it is read from `WEATHERAPI_KEY`, with a `.env` file loaded first.
///
/// ```toml
/// [location]
/// latitude = 46.75
/// longitude = 23.57
/// past_days = 14
/// forecast_days = 2
///
/// [weather_api]
/// max_concurrent_requests = 4
///
/// [merge]
/// unmatched_secondary = "drop"
///
/// [training]
/// regressor = "boosted_tree"
/// evaluation_day = "today"
///
/// [training.parameters]
/// max_depth = 4
/// ```

use crate::analysis::{EvaluationPolicy, UnmatchedPolicy};
use crate::ingest::open_meteo::OPEN_METEO_URL;
use crate::ingest::retry::RetryConfig;
use crate::ingest::weather_api::WEATHER_API_BASE_URL;
use crate::logging::LogLevel;
use crate::model::Coordinate;
use crate::time_key::ParseZone;
use crate::training::{EvaluationDay, RegressorKind, RegressorParameters};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// Environment variable holding the WeatherAPI key.
pub const API_KEY_ENV: &str = "WEATHERAPI_KEY";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    /// The configuration file could not be read.
    Io { path: PathBuf, source: std::io::Error },
    /// The file is not valid TOML or has fields of the wrong type.
    Parse(String),
    /// A value is outside its allowed range.
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(f, "Cannot read config {}: {}", path.display(), source)
            }
            ConfigError::Parse(msg) => write!(f, "Invalid config syntax: {}", msg),
            ConfigError::Invalid(msg) => write!(f, "Invalid config value: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::Parse(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    pub latitude: f64,
    pub longitude: f64,
    /// Whole days of history before today requested from both providers.
    pub past_days: u32,
    /// Days starting today requested from both providers.
    pub forecast_days: u32,
}

impl Default for LocationConfig {
    fn default() -> Self {
        LocationConfig {
            latitude: 46.75,
            longitude: 23.57,
            past_days: 14,
            forecast_days: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct OpenMeteoConfig {
    pub base_url: String,
    /// Offset of the response timestamps from UTC, in hours.
    pub utc_offset_hours: i32,
    pub retry_attempts: u32,
    pub retry_base_delay_ms: u64,
}

impl Default for OpenMeteoConfig {
    fn default() -> Self {
        OpenMeteoConfig {
            base_url: OPEN_METEO_URL.to_string(),
            utc_offset_hours: 0,
            retry_attempts: 3,
            retry_base_delay_ms: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct WeatherApiConfig {
    pub base_url: String,
    /// Offset of the response timestamps from UTC, in hours.
    pub utc_offset_hours: i32,
    /// History days requested in parallel. 1 means sequential.
    pub max_concurrent_requests: usize,
    pub retry_attempts: u32,
    pub retry_base_delay_ms: u64,
    /// Filled from the environment, never from the file.
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for WeatherApiConfig {
    fn default() -> Self {
        WeatherApiConfig {
            base_url: WEATHER_API_BASE_URL.to_string(),
            utc_offset_hours: 0,
            max_concurrent_requests: 1,
            retry_attempts: 3,
            retry_base_delay_ms: 500,
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    pub unmatched_secondary: UnmatchedPolicy,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub regressor: RegressorKind,
    pub evaluation_day: EvaluationDay,
    pub exclude_zero_precipitation: bool,
    pub parameters: RegressorParameters,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Export directory; the system temp directory when unset.
    pub directory: Option<PathBuf>,
}

impl OutputConfig {
    pub fn resolved_directory(&self) -> PathBuf {
        self.directory.clone().unwrap_or_else(std::env::temp_dir)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
    pub console_timestamps: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            file: None,
            console_timestamps: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub location: LocationConfig,
    pub open_meteo: OpenMeteoConfig,
    pub weather_api: WeatherApiConfig,
    pub merge: MergeConfig,
    pub training: TrainingConfig,
    pub output: OutputConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Parses and validates TOML text. Does not touch the environment.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads the file at `path` (or the defaults when `None`), then reads
    /// the API key from the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::from_toml_str(&text)?
            }
            None => Config::default(),
        };
        config.load_secrets();
        Ok(config)
    }

    /// Reads `WEATHERAPI_KEY`, loading `.env` first if present.
    pub fn load_secrets(&mut self) {
        dotenv::dotenv().ok();
        self.weather_api.api_key = std::env::var(API_KEY_ENV)
            .ok()
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        let loc = &self.location;
        if !(-90.0..=90.0).contains(&loc.latitude) {
            return invalid(format!("latitude must be in [-90, 90], got {}", loc.latitude));
        }
        if !(-180.0..=180.0).contains(&loc.longitude) {
            return invalid(format!("longitude must be in [-180, 180], got {}", loc.longitude));
        }
        if self.weather_api.max_concurrent_requests < 1 {
            return invalid("weather_api.max_concurrent_requests must be at least 1".to_string());
        }
        for (name, offset) in [
            ("open_meteo", self.open_meteo.utc_offset_hours),
            ("weather_api", self.weather_api.utc_offset_hours),
        ] {
            if !(-23..=23).contains(&offset) {
                return invalid(format!("{}.utc_offset_hours must be in [-23, 23], got {}", name, offset));
            }
        }
        if self.open_meteo.retry_attempts < 1 || self.weather_api.retry_attempts < 1 {
            return invalid("retry_attempts must be at least 1".to_string());
        }
        if LogLevel::parse(&self.logging.level).is_none() {
            return invalid(format!("unknown logging.level '{}'", self.logging.level));
        }
        self.training
            .parameters
            .validate()
            .map_err(|msg| ConfigError::Invalid(format!("training.parameters: {}", msg)))
    }

    pub fn coordinate(&self) -> Coordinate {
        Coordinate {
            latitude: self.location.latitude,
            longitude: self.location.longitude,
        }
    }

    pub fn evaluation_policy(&self) -> EvaluationPolicy {
        EvaluationPolicy {
            exclude_zero_precipitation: self.training.exclude_zero_precipitation,
        }
    }

    pub fn log_level(&self) -> LogLevel {
        LogLevel::parse(&self.logging.level).unwrap_or(LogLevel::Info)
    }

    pub fn open_meteo_zone(&self) -> ParseZone {
        ParseZone::from_hours(self.open_meteo.utc_offset_hours)
    }

    pub fn weather_api_zone(&self) -> ParseZone {
        ParseZone::from_hours(self.weather_api.utc_offset_hours)
    }

    pub fn open_meteo_retry(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.open_meteo.retry_attempts,
            base_delay_ms: self.open_meteo.retry_base_delay_ms,
            ..RetryConfig::default()
        }
    }

    pub fn weather_api_retry(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.weather_api.retry_attempts,
            base_delay_ms: self.weather_api.retry_base_delay_ms,
            ..RetryConfig::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
