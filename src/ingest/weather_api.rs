/// WeatherAPI.com Client (provider B)
///
/// History is only served one calendar day per request, so a window of N
/// past days costs N history calls plus one forecast call. History calls run
/// through a small bounded worker pool; results are always reassembled in
/// ascending day order so the series is identical whatever order the calls
/// complete in. Any failed day fails the whole fetch.
///
/// API Documentation: https://www.weatherapi.com/docs/

use crate::ingest::retry::{with_retry, RetryConfig};
use crate::ingest::transport::{describe_request, Transport};
use crate::ingest::{format_coordinate, percent, DateWindow, WeatherProvider};
use crate::logging::{self, Component};
use crate::model::{Coordinate, FetchError, Provider, ProviderPoint, ProviderSeries};
use crate::pipeline::CancelToken;
use crate::time_key::{ParseZone, TimeKey, WEATHER_API_FORMAT};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::Deserialize;
use std::sync::Arc;

pub const WEATHER_API_BASE_URL: &str = "https://api.weatherapi.com/v1";
pub const HISTORY_PATH: &str = "/history.json";
pub const FORECAST_PATH: &str = "/forecast.json";

// ============================================================================
// WeatherAPI Response Structures
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct WeatherApiResponse {
    pub location: Option<WeatherApiLocation>,
    pub forecast: WeatherApiForecast,
}

#[derive(Debug, Deserialize)]
pub struct WeatherApiLocation {
    /// IANA zone of the location; hour timestamps are local to it.
    pub tz_id: Option<String>,
    pub localtime_epoch: Option<i64>,
    /// Wall-clock time at the location when the response was built.
    pub localtime: Option<String>,
}

impl WeatherApiLocation {
    /// UTC offset of the location, from `localtime` against
    /// `localtime_epoch`, rounded to the nearest quarter hour.
    pub fn utc_offset_seconds(&self) -> Option<i32> {
        let local = NaiveDateTime::parse_from_str(self.localtime.as_deref()?, WEATHER_API_FORMAT).ok()?;
        let utc = DateTime::from_timestamp(self.localtime_epoch?, 0)?.naive_utc();
        let diff = (local - utc).num_seconds();
        let rounded = (diff as f64 / 900.0).round() as i64 * 900;
        i32::try_from(rounded).ok()
    }
}

/// The location's offset when it disagrees with the zone hours are parsed in.
///
/// `None` when they agree or the response carries no usable location time.
pub fn zone_mismatch(location: &WeatherApiLocation, zone: ParseZone) -> Option<i32> {
    let actual = location.utc_offset_seconds()?;
    (actual != zone.offset_seconds()).then_some(actual)
}

fn format_offset(secs: i32) -> String {
    let sign = if secs < 0 { '-' } else { '+' };
    let secs = secs.abs();
    format!("UTC{}{:02}:{:02}", sign, secs / 3600, (secs % 3600) / 60)
}

#[derive(Debug, Deserialize)]
pub struct WeatherApiForecast {
    #[serde(default)]
    pub forecastday: Vec<WeatherApiDay>,
}

#[derive(Debug, Deserialize)]
pub struct WeatherApiDay {
    #[serde(default)]
    pub hour: Vec<WeatherApiHour>,
}

#[derive(Debug, Deserialize)]
pub struct WeatherApiHour {
    #[serde(default)]
    pub time: String,
    pub temp_c: Option<f64>,
    pub feelslike_c: Option<f64>,
    pub chance_of_rain: Option<f64>,
}

impl WeatherApiResponse {
    /// Lazily flattens the day→hour nesting, one point per parseable hour.
    pub fn points(&self, zone: ParseZone) -> impl Iterator<Item = ProviderPoint> + '_ {
        self.forecast
            .forecastday
            .iter()
            .flat_map(|day| day.hour.iter())
            .filter_map(move |hour| {
                let time = TimeKey::parse(&hour.time, WEATHER_API_FORMAT, zone)?;
                Some(ProviderPoint {
                    time,
                    temperature: hour.temp_c.filter(|v| v.is_finite()),
                    feels_like: hour.feelslike_c.filter(|v| v.is_finite()),
                    precip_probability: percent(hour.chance_of_rain),
                })
            })
    }

    pub fn hour_count(&self) -> usize {
        self.forecast.forecastday.iter().map(|d| d.hour.len()).sum()
    }
}

// ============================================================================
// Request construction and decoding
// ============================================================================

fn location_query(coordinate: Coordinate) -> String {
    format!(
        "{} {}",
        format_coordinate(coordinate.latitude),
        format_coordinate(coordinate.longitude)
    )
}

/// Query parameters for the history endpoint, one calendar day.
pub fn build_history_query(api_key: &str, coordinate: Coordinate, date: NaiveDate) -> Vec<(&'static str, String)> {
    vec![
        ("key", api_key.to_string()),
        ("q", location_query(coordinate)),
        ("dt", date.format("%Y-%m-%d").to_string()),
    ]
}

/// Query parameters for the forecast endpoint.
pub fn build_forecast_query(api_key: &str, coordinate: Coordinate, days: u32) -> Vec<(&'static str, String)> {
    vec![
        ("key", api_key.to_string()),
        ("q", location_query(coordinate)),
        ("days", days.to_string()),
        ("aqi", "no".to_string()),
        ("alerts", "no".to_string()),
    ]
}

/// Decode a WeatherAPI history or forecast JSON body.
pub fn parse_response(body: &str) -> Result<WeatherApiResponse, FetchError> {
    Ok(serde_json::from_str(body)?)
}

// ============================================================================
// Provider
// ============================================================================

pub struct WeatherApiProvider {
    transport: Arc<dyn Transport>,
    base_url: String,
    api_key: Option<String>,
    zone: ParseZone,
    max_concurrent_requests: usize,
    retry: RetryConfig,
}

impl WeatherApiProvider {
    pub fn new(
        transport: Arc<dyn Transport>,
        base_url: impl Into<String>,
        api_key: Option<String>,
        zone: ParseZone,
    ) -> Self {
        WeatherApiProvider {
            transport,
            base_url: base_url.into(),
            api_key,
            zone,
            max_concurrent_requests: 1,
            retry: RetryConfig::default(),
        }
    }

    /// Upper bound on history requests in flight at once (minimum 1).
    pub fn with_max_concurrent_requests(mut self, limit: usize) -> Self {
        self.max_concurrent_requests = limit.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn history_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), HISTORY_PATH)
    }

    fn forecast_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), FORECAST_PATH)
    }

    fn request(&self, url: &str, query: &[(&str, String)], context: &str) -> Result<WeatherApiResponse, FetchError> {
        logging::debug(
            Component::WeatherApi,
            Some(context),
            &format!("GET {}", describe_request(url, query)),
        );

        let body = with_retry(
            &self.retry,
            || self.transport.get(url, query),
            |attempt, err| {
                logging::warn(
                    Component::WeatherApi,
                    Some(context),
                    &format!("Retry attempt {} after: {}", attempt, err),
                )
            },
        )
        .inspect_err(|err| logging::log_fetch_failure(Provider::WeatherApi, Some(context), "Request", err))?;

        parse_response(&body)
    }

    fn fetch_history_day(&self, api_key: &str, coordinate: Coordinate, date: NaiveDate) -> Result<WeatherApiResponse, FetchError> {
        let query = build_history_query(api_key, coordinate, date);
        let context = date.format("%Y-%m-%d").to_string();
        self.request(&self.history_url(), &query, &context)
    }

    /// Fetches every history day, at most `max_concurrent_requests` at a time.
    ///
    /// Responses come back indexed by their position in `dates`, so the
    /// caller sees them in ascending day order.
    fn fetch_history(
        &self,
        api_key: &str,
        coordinate: Coordinate,
        dates: &[NaiveDate],
        cancel: &CancelToken,
    ) -> Result<Vec<WeatherApiResponse>, FetchError> {
        let mut responses = Vec::with_capacity(dates.len());

        for batch in dates.chunks(self.max_concurrent_requests) {
            cancel.check_fetch()?;

            if batch.len() == 1 {
                responses.push(self.fetch_history_day(api_key, coordinate, batch[0])?);
                continue;
            }

            let results: Vec<Result<WeatherApiResponse, FetchError>> = std::thread::scope(|scope| {
                let handles: Vec<_> = batch
                    .iter()
                    .map(|&date| scope.spawn(move || self.fetch_history_day(api_key, coordinate, date)))
                    .collect();

                handles
                    .into_iter()
                    .map(|handle| {
                        handle
                            .join()
                            .unwrap_or_else(|_| Err(FetchError::RequestFailed("history worker panicked".to_string())))
                    })
                    .collect()
            });

            for result in results {
                responses.push(result?);
            }
        }

        Ok(responses)
    }
}

impl WeatherProvider for WeatherApiProvider {
    fn provider(&self) -> Provider {
        Provider::WeatherApi
    }

    fn fetch(
        &self,
        coordinate: Coordinate,
        window: &DateWindow,
        cancel: &CancelToken,
    ) -> Result<ProviderSeries, FetchError> {
        let api_key = self.api_key.as_deref().ok_or(FetchError::MissingApiKey)?;
        cancel.check_fetch()?;

        let dates = window.history_dates();
        let mut responses = self.fetch_history(api_key, coordinate, &dates, cancel)?;

        if window.forecast_days > 0 {
            cancel.check_fetch()?;
            let query = build_forecast_query(api_key, coordinate, window.forecast_days);
            responses.push(self.request(&self.forecast_url(), &query, "forecast")?);
        }

        if let Some(location) = responses.iter().find_map(|r| r.location.as_ref()) {
            if let Some(actual) = zone_mismatch(location, self.zone) {
                logging::warn(
                    Component::WeatherApi,
                    location.tz_id.as_deref(),
                    &format!(
                        "Location is {} but hours are parsed as {}; check weather_api.utc_offset_hours",
                        format_offset(actual),
                        format_offset(self.zone.offset_seconds())
                    ),
                );
            }
        }

        let total_hours: usize = responses.iter().map(WeatherApiResponse::hour_count).sum();
        let series: ProviderSeries = responses
            .iter()
            .flat_map(|response| response.points(self.zone))
            .collect();

        if total_hours > series.len() {
            logging::debug(
                Component::WeatherApi,
                None,
                &format!("Dropped {} hours with unparseable timestamps", total_hours - series.len()),
            );
        }
        logging::info(
            Component::WeatherApi,
            None,
            &format!(
                "Fetched {} hourly points ({} history days, {} forecast days)",
                series.len(),
                dates.len(),
                window.forecast_days
            ),
        );

        Ok(series)
    }
}

// ============================================================================
// Tests
// ============================================================================
