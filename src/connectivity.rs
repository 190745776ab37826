//! Reachability probe for the sync server.

use std::time::Duration;

use reqwest::Client;

/// Check whether the sync server is reachable.
///
/// Sends `GET {endpoint}/health` and returns true only for a success status
/// received within `timeout`. Errors are logged at debug level, never returned.
pub async fn probe(client: &Client, endpoint: &str, timeout: Duration) -> bool {
    let url = format!("{}/health", endpoint.trim_end_matches('/'));

    match client.get(&url).timeout(timeout).send().await {
        Ok(response) if response.status().is_success() => true,
        Ok(response) => {
            tracing::debug!("Probe of {} returned HTTP {}", url, response.status());
            false
        }
        Err(e) => {
            tracing::debug!("Probe of {} failed: {}", url, e);
            false
        }
    }
}
