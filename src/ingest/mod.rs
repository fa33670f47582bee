/// Provider ingestion for the weather blend service.
///
/// Each upstream source gets one adapter that builds its requests, decodes
/// its wire format and flattens it into a `ProviderSeries`. Adapters are
/// selected by configuration and used through the `WeatherProvider` trait.
///
/// Submodules:
/// - `transport` : HTTP seam (`Transport`) and the blocking reqwest client.
/// - `retry` : backoff/retry wrapper for transient failures.
/// - `open_meteo` : provider A, gridded hourly arrays.
/// - `weather_api` : provider B, per-day history plus forecast buckets.

pub mod open_meteo;
pub mod retry;
pub mod transport;
pub mod weather_api;

use crate::model::{Coordinate, FetchError, Provider, ProviderSeries};
use crate::pipeline::CancelToken;
use chrono::{Duration, NaiveDate};

// ---------------------------------------------------------------------------
// Date window
// ---------------------------------------------------------------------------

/// Calendar window a provider is asked to cover, relative to `today` (UTC).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub today: NaiveDate,
    /// Whole days before `today` to include.
    pub past_days: u32,
    /// Days starting at `today` to include.
    pub forecast_days: u32,
}

impl DateWindow {
    pub fn new(today: NaiveDate, past_days: u32, forecast_days: u32) -> Self {
        DateWindow { today, past_days, forecast_days }
    }

    /// Past days in ascending order, oldest first, ending yesterday.
    pub fn history_dates(&self) -> Vec<NaiveDate> {
        (1..=self.past_days as i64)
            .rev()
            .map(|offset| self.today - Duration::days(offset))
            .collect()
    }

    pub fn tomorrow(&self) -> NaiveDate {
        self.today + Duration::days(1)
    }
}

// ---------------------------------------------------------------------------
// Provider trait
// ---------------------------------------------------------------------------

/// A source of hourly weather points for one coordinate.
pub trait WeatherProvider: Send + Sync {
    fn provider(&self) -> Provider;

    /// Fetches every hour the provider has for `window`, in upstream order.
    ///
    /// Points whose timestamp cannot be parsed are dropped; any transport or
    /// decode failure fails the whole fetch.
    fn fetch(
        &self,
        coordinate: Coordinate,
        window: &DateWindow,
        cancel: &CancelToken,
    ) -> Result<ProviderSeries, FetchError>;
}

/// Converts a raw precipitation probability into a percentage, rejecting
/// values outside 0..=100.
pub(crate) fn percent(value: Option<f64>) -> Option<u8> {
    let v = value?;
    if v.is_finite() && (0.0..=100.0).contains(&v) {
        Some(v.round() as u8)
    } else {
        None
    }
}

/// Coordinate rendered the way provider query strings expect it.
pub(crate) fn format_coordinate(value: f64) -> String {
    format!("{}", value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_history_dates_are_ascending_and_exclude_today() {
        let window = DateWindow::new(date(2025, 3, 2), 3, 2);
        assert_eq!(
            window.history_dates(),
            vec![date(2025, 2, 27), date(2025, 2, 28), date(2025, 3, 1)]
        );
    }

    #[test]
    fn test_history_dates_empty_when_no_past_days() {
        let window = DateWindow::new(date(2025, 3, 2), 0, 2);
        assert!(window.history_dates().is_empty());
    }

    #[test]
    fn test_tomorrow() {
        let window = DateWindow::new(date(2024, 12, 31), 0, 2);
        assert_eq!(window.tomorrow(), date(2025, 1, 1));
    }

    #[test]
    fn test_percent_bounds() {
        assert_eq!(percent(Some(0.0)), Some(0));
        assert_eq!(percent(Some(100.0)), Some(100));
        assert_eq!(percent(Some(42.4)), Some(42));
        assert_eq!(percent(Some(-1.0)), None);
        assert_eq!(percent(Some(101.0)), None);
        assert_eq!(percent(Some(f64::NAN)), None);
        assert_eq!(percent(None), None);
    }
}
