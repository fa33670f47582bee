/// Development mode: replay saved provider responses.
///
/// When the live APIs are unavailable (or a run must be reproducible), point
/// `--replay-dir` (`WXBLEND_REPLAY_DIR`) at a directory of saved JSON bodies
/// and pin the run's "today" with `--replay-today` (`WXBLEND_REPLAY_TODAY`).
/// The directory layout is:
///
/// - `open_meteo.json` : the Open-Meteo response
/// - `weather_api_history_YYYY-MM-DD.json` : one WeatherAPI history day
/// - `weather_api_forecast.json` : the WeatherAPI forecast
///
/// A request with no matching file fails as an HTTP 404, exactly as a
/// missing upstream resource would.

use crate::config::Config;
use crate::ingest::transport::Transport;
use crate::ingest::weather_api::{FORECAST_PATH, HISTORY_PATH};
use crate::model::FetchError;
use chrono::NaiveDate;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const REPLAY_DIR_ENV: &str = "WXBLEND_REPLAY_DIR";
pub const REPLAY_TODAY_ENV: &str = "WXBLEND_REPLAY_TODAY";

pub const OPEN_METEO_FIXTURE: &str = "open_meteo.json";
pub const WEATHER_API_FORECAST_FIXTURE: &str = "weather_api_forecast.json";

/// Placeholder key so the WeatherAPI adapter runs against fixtures.
const REPLAY_API_KEY: &str = "replay";

/// File name a request is replayed from.
pub fn fixture_name(url: &str, query: &[(&str, String)]) -> String {
    if url.ends_with(HISTORY_PATH) {
        let date = query
            .iter()
            .find(|(k, _)| *k == "dt")
            .map(|(_, v)| v.as_str())
            .unwrap_or("unknown");
        format!("weather_api_history_{}.json", date)
    } else if url.ends_with(FORECAST_PATH) {
        WEATHER_API_FORECAST_FIXTURE.to_string()
    } else {
        OPEN_METEO_FIXTURE.to_string()
    }
}

// ---------------------------------------------------------------------------
// Replay transport
// ---------------------------------------------------------------------------

/// `Transport` that reads response bodies from a fixtures directory.
pub struct ReplayTransport {
    dir: PathBuf,
}

impl ReplayTransport {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        ReplayTransport { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl Transport for ReplayTransport {
    fn get(&self, url: &str, query: &[(&str, String)]) -> Result<String, FetchError> {
        let path = self.dir.join(fixture_name(url, query));
        std::fs::read_to_string(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => FetchError::HttpError(404),
            _ => FetchError::RequestFailed(format!("{}: {}", path.display(), e)),
        })
    }
}

// ---------------------------------------------------------------------------
// Dev mode
// ---------------------------------------------------------------------------

/// Configuration for an offline replay run
#[derive(Debug, Clone, PartialEq)]
pub struct DevMode {
    pub fixtures_dir: PathBuf,
    /// The date the run treats as today.
    pub today: NaiveDate,
}

impl DevMode {
    pub fn new(fixtures_dir: impl Into<PathBuf>, today: NaiveDate) -> Self {
        DevMode {
            fixtures_dir: fixtures_dir.into(),
            today,
        }
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::new(ReplayTransport::new(self.fixtures_dir.clone()))
    }

    /// Adjusts `config` for replay: a placeholder API key when none is set,
    /// and no retries, since a missing fixture will not appear on retry.
    pub fn prepare(&self, config: &mut Config) {
        if config.weather_api.api_key.is_none() {
            config.weather_api.api_key = Some(REPLAY_API_KEY.to_string());
        }
        config.open_meteo.retry_attempts = 1;
        config.weather_api.retry_attempts = 1;
    }
}
