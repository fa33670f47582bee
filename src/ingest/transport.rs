//! HTTP transport seam.
//!
//! Provider adapters never talk to `reqwest` directly; they go through
//! `Transport`, which turns a URL plus query pairs into a response body or a
//! typed `FetchError`. The blocking `reqwest` client is the production
//! implementation; replay and test transports implement the same trait.

use crate::model::FetchError;
use std::time::Duration;

/// Default per-request timeout for provider calls.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

const USER_AGENT: &str = concat!("wxblend_service/", env!("CARGO_PKG_VERSION"));

/// Issues a GET and returns the body of a 2xx response.
pub trait Transport: Send + Sync {
    fn get(&self, url: &str, query: &[(&str, String)]) -> Result<String, FetchError>;
}

impl Transport for reqwest::blocking::Client {
    fn get(&self, url: &str, query: &[(&str, String)]) -> Result<String, FetchError> {
        let response = reqwest::blocking::Client::get(self, url)
            .query(query)
            .header("Accept", "application/json")
            .send()?;

        if !response.status().is_success() {
            return Err(FetchError::HttpError(response.status().as_u16()));
        }

        Ok(response.text()?)
    }
}

/// Builds the blocking client used for live provider calls.
pub fn build_http_client() -> Result<reqwest::blocking::Client, FetchError> {
    reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .user_agent(USER_AGENT)
        .build()
        .map_err(FetchError::from)
}

/// Renders a URL with its query string, for log lines.
pub fn describe_request(url: &str, query: &[(&str, String)]) -> String {
    if query.is_empty() {
        return url.to_string();
    }
    let params: Vec<String> = query
        .iter()
        // The WeatherAPI key never goes into logs
        .map(|(k, v)| if *k == "key" { format!("{}=***", k) } else { format!("{}={}", k, v) })
        .collect();
    format!("{}?{}", url, params.join("&"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_request_masks_api_key() {
        let query = vec![("key", "secret".to_string()), ("dt", "2025-03-18".to_string())];
        let described = describe_request("https://api.weatherapi.com/v1/history.json", &query);
        assert_eq!(
            described,
            "https://api.weatherapi.com/v1/history.json?key=***&dt=2025-03-18"
        );
        assert!(!described.contains("secret"));
    }

    #[test]
    fn test_describe_request_without_query() {
        assert_eq!(describe_request("https://example.test", &[]), "https://example.test");
    }

    #[test]
    fn test_build_http_client() {
        assert!(build_http_client().is_ok());
    }
}
