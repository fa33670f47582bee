//! Provider Verification Integration Tests
//!
//! These tests hit the live Open-Meteo and WeatherAPI endpoints to confirm
//! both providers answer for the default coordinate. They need network
//! access (and `WEATHERAPI_KEY` for WeatherAPI), so they are ignored by
//! default.
//!
//! Run with: cargo test --test provider_verification -- --ignored --nocapture

use chrono::Utc;
use std::sync::Arc;
use wxblend_service::config::Config;
use wxblend_service::ingest::transport::{build_http_client, Transport};
use wxblend_service::ingest::DateWindow;
use wxblend_service::model::Provider;
use wxblend_service::pipeline::build_providers;
use wxblend_service::verify::*;

fn live_config() -> Config {
    let mut config = Config::default();
    config.load_secrets();
    config
}

fn live_transport() -> Arc<dyn Transport> {
    Arc::new(build_http_client().unwrap())
}

#[test]
#[ignore]
fn test_open_meteo_verification() {
    let config = live_config();
    let (open_meteo, _) = build_providers(&config, live_transport());
    let window = DateWindow::new(Utc::now().date_naive(), 1, 1);

    let result = verify_provider(open_meteo.as_ref(), config.coordinate(), &window);

    println!("\n{}: {:?} ({} hours)", result.provider, result.status, result.point_count);
    if let Some(error) = &result.error_message {
        println!("  Error: {}", error);
    }

    assert_eq!(result.provider, Provider::OpenMeteo.to_string());
    assert_ne!(result.status, VerificationStatus::Failed, "Open-Meteo is not answering");
    // Yesterday plus today, hourly
    assert!(result.point_count >= 48, "expected two days of hours, got {}", result.point_count);
}

#[test]
#[ignore]
fn test_weather_api_verification() {
    let config = live_config();
    if config.weather_api.api_key.is_none() {
        println!("WEATHERAPI_KEY not set, skipping");
        return;
    }
    let (_, weather_api) = build_providers(&config, live_transport());
    let window = DateWindow::new(Utc::now().date_naive(), 1, 1);

    let result = verify_provider(weather_api.as_ref(), config.coordinate(), &window);

    println!("\n{}: {:?} ({} hours)", result.provider, result.status, result.point_count);
    if let Some(error) = &result.error_message {
        println!("  Error: {}", error);
    }

    assert_ne!(result.status, VerificationStatus::Failed, "WeatherAPI is not answering");
}

#[test]
#[ignore]
fn test_full_verification_report() {
    let config = live_config();
    let report = run_full_verification(&config, live_transport(), Utc::now().date_naive());
    print_summary(&report);

    assert_eq!(report.summary.total, 2);
    assert_eq!(report.summary.working + report.summary.failed, 2);
    // Open-Meteo needs no key, so at least one provider should work
    assert!(report.summary.working > 0, "No providers are working!");
}
