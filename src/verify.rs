//! Provider Verification Module
//!
//! Checks each configured provider against its live API (or a replay
//! directory) to see whether it is reachable and returning usable hours for
//! the configured coordinate.
//!
//! Run this after changing provider settings or API keys, before trusting a
//! full pipeline run.

use crate::config::Config;
use crate::ingest::transport::Transport;
use crate::ingest::{DateWindow, WeatherProvider};
use crate::model::{Coordinate, ProviderSeries};
use crate::pipeline::{build_providers, CancelToken};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Window used for verification: yesterday plus today.
pub const VERIFY_PAST_DAYS: u32 = 1;
pub const VERIFY_FORECAST_DAYS: u32 = 1;

// ============================================================================
// Verification Results
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    pub timestamp: String,
    pub latitude: f64,
    pub longitude: f64,
    pub results: Vec<ProviderVerification>,
    pub summary: VerificationSummary,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VerificationSummary {
    pub total: usize,
    pub working: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderVerification {
    pub provider: String,
    pub status: VerificationStatus,
    pub point_count: usize,
    /// Fields set on at least one returned hour.
    pub fields_available: Vec<String>,
    /// Fields never set on any returned hour.
    pub fields_missing: Vec<String>,
    pub first_hour: Option<String>,
    pub last_hour: Option<String>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum VerificationStatus {
    Success,
    PartialSuccess,
    Failed,
}

// ============================================================================
// Single Provider
// ============================================================================

const FIELD_NAMES: [&str; 3] = ["temperature", "feels_like", "precip_probability"];

fn field_presence(series: &ProviderSeries) -> [bool; 3] {
    let mut present = [false; 3];
    for point in series {
        present[0] |= point.temperature.is_some();
        present[1] |= point.feels_like.is_some();
        present[2] |= point.precip_probability.is_some();
    }
    present
}

/// Fetches `window` from one provider and grades the response.
///
/// `Success` means every field appeared at least once, `PartialSuccess`
/// means points arrived but some field never did, and `Failed` covers
/// errors and empty responses.
pub fn verify_provider(
    provider: &dyn WeatherProvider,
    coordinate: Coordinate,
    window: &DateWindow,
) -> ProviderVerification {
    let mut result = ProviderVerification {
        provider: provider.provider().to_string(),
        status: VerificationStatus::Failed,
        point_count: 0,
        fields_available: Vec::new(),
        fields_missing: Vec::new(),
        first_hour: None,
        last_hour: None,
        error_message: None,
    };

    let series = match provider.fetch(coordinate, window, &CancelToken::new()) {
        Ok(series) => series,
        Err(e) => {
            result.error_message = Some(e.to_string());
            return result;
        }
    };

    result.point_count = series.len();
    if series.is_empty() {
        result.error_message = Some("No hourly points returned".to_string());
        return result;
    }

    result.first_hour = series.iter().map(|p| p.time).min().map(|t| t.to_string());
    result.last_hour = series.iter().map(|p| p.time).max().map(|t| t.to_string());

    for (name, present) in FIELD_NAMES.iter().zip(field_presence(&series)) {
        if present {
            result.fields_available.push(name.to_string());
        } else {
            result.fields_missing.push(name.to_string());
        }
    }

    result.status = if result.fields_missing.is_empty() {
        VerificationStatus::Success
    } else {
        VerificationStatus::PartialSuccess
    };
    result
}

// ============================================================================
// Full Verification Runner
// ============================================================================

/// Verifies both configured providers with a short window ending `today`.
pub fn run_full_verification(config: &Config, transport: Arc<dyn Transport>, today: NaiveDate) -> VerificationReport {
    let coordinate = config.coordinate();
    let window = DateWindow::new(today, VERIFY_PAST_DAYS, VERIFY_FORECAST_DAYS);
    let (primary, secondary) = build_providers(config, transport);

    let mut report = VerificationReport {
        timestamp: Utc::now().to_rfc3339(),
        latitude: coordinate.latitude,
        longitude: coordinate.longitude,
        results: Vec::new(),
        summary: VerificationSummary::default(),
    };

    println!("🔍 Verifying providers at {}, {}...", coordinate.latitude, coordinate.longitude);
    for provider in [primary.as_ref(), secondary.as_ref()] {
        print!("  {} ... ", provider.provider());
        let result = verify_provider(provider, coordinate, &window);

        match result.status {
            VerificationStatus::Success => {
                println!("✓ OK ({} hours)", result.point_count);
                report.summary.working += 1;
            }
            VerificationStatus::PartialSuccess => {
                println!("⚠ Partial (never set: {:?})", result.fields_missing);
                report.summary.working += 1;
            }
            VerificationStatus::Failed => {
                println!("✗ FAILED: {}", result.error_message.as_deref().unwrap_or("Unknown"));
                report.summary.failed += 1;
            }
        }

        report.summary.total += 1;
        report.results.push(result);
    }

    report
}

pub fn print_summary(report: &VerificationReport) {
    println!("\n═══════════════════════════════════════════════════════════");
    println!("📊 VERIFICATION SUMMARY");
    println!("═══════════════════════════════════════════════════════════");
    println!();
    for result in &report.results {
        let range = match (&result.first_hour, &result.last_hour) {
            (Some(first), Some(last)) => format!("{} → {}", first, last),
            _ => "no data".to_string(),
        };
        println!("{:<12} {:?}  {} hours  ({})", result.provider, result.status, result.point_count, range);
    }
    println!();
    println!(
        "Providers: {}/{} working  ({} failed)",
        report.summary.working, report.summary.total, report.summary.failed
    );
    println!("═══════════════════════════════════════════════════════════");
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FetchError, Provider, ProviderPoint};
    use crate::time_key::TimeKey;

    struct StubProvider(Result<ProviderSeries, FetchError>);

    impl WeatherProvider for StubProvider {
        fn provider(&self) -> Provider {
            Provider::OpenMeteo
        }

        fn fetch(&self, _: Coordinate, _: &DateWindow, _: &CancelToken) -> Result<ProviderSeries, FetchError> {
            self.0.clone()
        }
    }

    fn point(hour: u32, feels_like: Option<f64>) -> ProviderPoint {
        ProviderPoint {
            time: TimeKey::new(2025, 3, 18, hour).unwrap(),
            temperature: Some(4.0),
            feels_like,
            precip_probability: Some(10),
        }
    }

    fn window() -> DateWindow {
        DateWindow::new(NaiveDate::from_ymd_opt(2025, 3, 19).unwrap(), 1, 1)
    }

    fn coordinate() -> Coordinate {
        Coordinate { latitude: 46.75, longitude: 23.57 }
    }

    #[test]
    fn test_all_fields_present_is_success() {
        let stub = StubProvider(Ok(vec![point(5, Some(2.0)), point(1, None)]));
        let result = verify_provider(&stub, coordinate(), &window());

        assert_eq!(result.status, VerificationStatus::Success);
        assert_eq!(result.point_count, 2);
        assert_eq!(result.first_hour.as_deref(), Some("2025-3-18 1:00"));
        assert_eq!(result.last_hour.as_deref(), Some("2025-3-18 5:00"));
        assert!(result.fields_missing.is_empty());
    }

    #[test]
    fn test_field_never_set_is_partial() {
        let stub = StubProvider(Ok(vec![point(0, None), point(1, None)]));
        let result = verify_provider(&stub, coordinate(), &window());

        assert_eq!(result.status, VerificationStatus::PartialSuccess);
        assert_eq!(result.fields_missing, vec!["feels_like".to_string()]);
        assert_eq!(result.fields_available.len(), 2);
    }

    #[test]
    fn test_error_and_empty_are_failures() {
        let failing = StubProvider(Err(FetchError::HttpError(403)));
        let result = verify_provider(&failing, coordinate(), &window());
        assert_eq!(result.status, VerificationStatus::Failed);
        assert_eq!(result.error_message.as_deref(), Some("HTTP error: 403"));

        let empty = StubProvider(Ok(Vec::new()));
        let result = verify_provider(&empty, coordinate(), &window());
        assert_eq!(result.status, VerificationStatus::Failed);
        assert_eq!(result.point_count, 0);
    }

    #[test]
    fn test_report_serializes_to_json() {
        let stub = StubProvider(Ok(vec![point(0, Some(1.0))]));
        let report = VerificationReport {
            timestamp: "2025-03-19T00:00:00Z".to_string(),
            latitude: 46.75,
            longitude: 23.57,
            results: vec![verify_provider(&stub, coordinate(), &window())],
            summary: VerificationSummary { total: 1, working: 1, failed: 0 },
        };

        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"status\":\"Success\""));
        let back: VerificationReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back.summary, report.summary);
    }
}
