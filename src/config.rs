//! Bus configuration.

use serde::Deserialize;

use crate::model::queue::DEFAULT_VISIBILITY_TIMEOUT_SECS;

/// Configuration for a [`Bus`](crate::bus::Bus).
///
/// This is a plain, directly-constructible value — the core never reads a
/// file or environment variable to populate it. `#[derive(Deserialize)]` is
/// here so an embedding process *can* load one from its own config file if
/// it wants to; that plumbing, like the wire-protocol adapter, lives
/// outside this crate.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub account_id: String,
    pub region: String,
    /// Overrides the `https://sqs.{region}.amazonaws.com` / sns host used
    /// when building queue and topic urls. `None` uses the default host.
    pub endpoint_url: Option<String>,
    pub default_visibility_timeout_secs: u64,
    pub default_page_size: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        BusConfig {
            account_id: "000000000000".to_string(),
            region: "us-east-1".to_string(),
            endpoint_url: None,
            default_visibility_timeout_secs: DEFAULT_VISIBILITY_TIMEOUT_SECS,
            default_page_size: 100,
        }
    }
}
