/// Open-Meteo Forecast API Client (provider A)
///
/// Retrieves hourly temperature, apparent temperature and precipitation
/// probability covering a past window plus a forecast window in a single
/// request. The response carries parallel arrays under `hourly`; index `i`
/// of every array describes the hour at `hourly.time[i]`.
///
/// API Documentation: https://open-meteo.com/en/docs

use crate::ingest::retry::{with_retry, RetryConfig};
use crate::ingest::transport::{describe_request, Transport};
use crate::ingest::{format_coordinate, percent, DateWindow, WeatherProvider};
use crate::logging::{self, Component};
use crate::model::{Coordinate, FetchError, Provider, ProviderPoint, ProviderSeries};
use crate::pipeline::CancelToken;
use crate::time_key::{ParseZone, TimeKey, OPEN_METEO_FORMAT};
use serde::Deserialize;
use std::sync::Arc;

pub const OPEN_METEO_URL: &str = "https://api.open-meteo.com/v1/forecast";

/// Hourly variables requested, in the order Open-Meteo documents them.
pub const HOURLY_FIELDS: &str = "temperature_2m,apparent_temperature,precipitation_probability";

// ============================================================================
// Open-Meteo API Response Structures
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct OpenMeteoResponse {
    pub hourly: OpenMeteoHourly,
}

/// Parallel hourly arrays. Value arrays may contain `null`.
#[derive(Debug, Deserialize, Default)]
pub struct OpenMeteoHourly {
    #[serde(default)]
    pub time: Vec<String>,
    #[serde(rename = "temperature_2m", default)]
    pub temperature: Vec<Option<f64>>,
    #[serde(rename = "apparent_temperature", default)]
    pub feels_like: Vec<Option<f64>>,
    #[serde(rename = "precipitation_probability", default)]
    pub precip_probability: Vec<Option<f64>>,
}

impl OpenMeteoResponse {
    /// Lazily walks the parallel arrays, one point per parseable timestamp.
    ///
    /// An index whose timestamp fails to parse is skipped in every array at
    /// once, so the remaining values stay aligned with their hours. Value
    /// arrays shorter than `time` leave the missing fields unset.
    pub fn points(&self, zone: ParseZone) -> impl Iterator<Item = ProviderPoint> + '_ {
        let hourly = &self.hourly;
        hourly.time.iter().enumerate().filter_map(move |(i, raw)| {
            let time = TimeKey::parse(raw, OPEN_METEO_FORMAT, zone)?;
            Some(ProviderPoint {
                time,
                temperature: value_at(&hourly.temperature, i),
                feels_like: value_at(&hourly.feels_like, i),
                precip_probability: percent(value_at(&hourly.precip_probability, i)),
            })
        })
    }
}

fn value_at(values: &[Option<f64>], index: usize) -> Option<f64> {
    values.get(index).copied().flatten().filter(|v| v.is_finite())
}

// ============================================================================
// Request construction and decoding
// ============================================================================

/// Query parameters for one history+forecast request.
pub fn build_query(coordinate: Coordinate, window: &DateWindow) -> Vec<(&'static str, String)> {
    vec![
        ("latitude", format_coordinate(coordinate.latitude)),
        ("longitude", format_coordinate(coordinate.longitude)),
        ("hourly", HOURLY_FIELDS.to_string()),
        ("past_days", window.past_days.to_string()),
        ("forecast_days", window.forecast_days.to_string()),
    ]
}

/// Decode an Open-Meteo JSON body.
pub fn parse_response(body: &str) -> Result<OpenMeteoResponse, FetchError> {
    Ok(serde_json::from_str(body)?)
}

// ============================================================================
// Provider
// ============================================================================

pub struct OpenMeteoProvider {
    transport: Arc<dyn Transport>,
    base_url: String,
    zone: ParseZone,
    retry: RetryConfig,
}

impl OpenMeteoProvider {
    pub fn new(transport: Arc<dyn Transport>, base_url: impl Into<String>, zone: ParseZone) -> Self {
        OpenMeteoProvider {
            transport,
            base_url: base_url.into(),
            zone,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

impl WeatherProvider for OpenMeteoProvider {
    fn provider(&self) -> Provider {
        Provider::OpenMeteo
    }

    fn fetch(
        &self,
        coordinate: Coordinate,
        window: &DateWindow,
        cancel: &CancelToken,
    ) -> Result<ProviderSeries, FetchError> {
        cancel.check_fetch()?;

        let query = build_query(coordinate, window);
        logging::debug(
            Component::OpenMeteo,
            None,
            &format!("GET {}", describe_request(&self.base_url, &query)),
        );

        let body = with_retry(
            &self.retry,
            || self.transport.get(&self.base_url, &query),
            |attempt, err| {
                logging::warn(
                    Component::OpenMeteo,
                    None,
                    &format!("Retry attempt {} after: {}", attempt, err),
                )
            },
        )?;

        let response = parse_response(&body)?;
        let series: ProviderSeries = response.points(self.zone).collect();

        let dropped = response.hourly.time.len() - series.len();
        if dropped > 0 {
            logging::debug(
                Component::OpenMeteo,
                None,
                &format!("Dropped {} hours with unparseable timestamps", dropped),
            );
        }
        logging::info(
            Component::OpenMeteo,
            None,
            &format!("Fetched {} hourly points", series.len()),
        );

        Ok(series)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const SAMPLE: &str = r#"{
        "latitude": 46.75,
        "longitude": 23.5625,
        "hourly_units": {"time": "iso8601", "temperature_2m": "°C"},
        "hourly": {
            "time": ["2025-03-18T00:00", "2025-03-18T01:00", "garbage", "2025-03-18T03:00"],
            "temperature_2m": [1.5, 1.2, 9.9, 0.8],
            "apparent_temperature": [-1.0, -1.4, 9.9, null],
            "precipitation_probability": [0, 15, 99, null]
        }
    }"#;

    #[test]
    fn test_parse_response_and_points() {
        let response = parse_response(SAMPLE).unwrap();
        let points: Vec<_> = response.points(ParseZone::Utc).collect();

        assert_eq!(points.len(), 3, "unparseable timestamp must drop its index");
        assert_eq!(points[0].time, TimeKey::new(2025, 3, 18, 0).unwrap());
        assert_eq!(points[0].temperature, Some(1.5));
        assert_eq!(points[0].precip_probability, Some(0));
    }

    #[test]
    fn test_dropped_index_keeps_arrays_aligned() {
        let response = parse_response(SAMPLE).unwrap();
        let points: Vec<_> = response.points(ParseZone::Utc).collect();

        // The value 9.9 belonged to the garbage timestamp and must not leak
        // into the 03:00 point.
        let third = &points[2];
        assert_eq!(third.time, TimeKey::new(2025, 3, 18, 3).unwrap());
        assert_eq!(third.temperature, Some(0.8));
        assert_eq!(third.feels_like, None);
        assert_eq!(third.precip_probability, None);
    }

    #[test]
    fn test_short_value_arrays_leave_fields_unset() {
        let body = r#"{"hourly": {
            "time": ["2025-03-18T00:00", "2025-03-18T01:00"],
            "temperature_2m": [3.0]
        }}"#;
        let response = parse_response(body).unwrap();
        let points: Vec<_> = response.points(ParseZone::Utc).collect();
        assert_eq!(points.len(), 2);
        assert_eq!(points[1].temperature, None);
        assert_eq!(points[1].feels_like, None);
    }

    #[test]
    fn test_missing_hourly_object_is_decode_error() {
        let result = parse_response(r#"{"latitude": 46.75}"#);
        assert!(matches!(result, Err(FetchError::DecodeError(_))));
    }

    #[test]
    fn test_build_query() {
        let window = DateWindow::new(NaiveDate::from_ymd_opt(2025, 3, 18).unwrap(), 14, 2);
        let query = build_query(Coordinate { latitude: 46.75, longitude: 23.57 }, &window);
        assert!(query.contains(&("latitude", "46.75".to_string())));
        assert!(query.contains(&("longitude", "23.57".to_string())));
        assert!(query.contains(&("hourly", HOURLY_FIELDS.to_string())));
        assert!(query.contains(&("past_days", "14".to_string())));
        assert!(query.contains(&("forecast_days", "2".to_string())));
    }
}
