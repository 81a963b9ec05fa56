//! Shared HTTP client construction.

use std::time::Duration;

use crate::domain::error::Result;

/// Default timeout of CI and registry calls.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const USER_AGENT: &str = concat!("imgpub/", env!("CARGO_PKG_VERSION"));

/// Build the client used for every outbound request of a run.
///
/// Requests are not retried; callers needing resilience wrap the run.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()?;
    Ok(client)
}
