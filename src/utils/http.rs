use std::time::Duration;

use anyhow::Result;
use reqwest::Client;

/// Builds the client shared by every provider bridge.
pub fn build_http_client(timeout_seconds: u64) -> Result<Client> {
    let client = Client::builder()
        .timeout(Duration::from_secs(timeout_seconds))
        .connect_timeout(Duration::from_secs(10))
        .user_agent(concat!("photofly_bot/", env!("CARGO_PKG_VERSION")))
        .build()?;
    Ok(client)
}
