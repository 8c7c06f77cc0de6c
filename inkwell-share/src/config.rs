//! Sharing configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the sharing layer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ShareConfig {
    /// Base URL for the control plane API (e.g., "https://api.inkwell.app").
    pub api_base_url: String,

    /// Upper bound for a single backend call, in seconds.
    pub request_timeout_secs: u64,

    /// How many recipients a share fans out to at once.
    pub max_concurrent_recipients: usize,

    /// Where tag sync metadata is persisted. `None` keeps it in memory.
    pub sync_metadata_path: Option<PathBuf>,
}

impl Default for ShareConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.inkwell.app".to_string(),
            request_timeout_secs: 10,
            max_concurrent_recipients: 8,
            sync_metadata_path: None,
        }
    }
}

impl ShareConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Fan-out width, never zero.
    pub fn concurrency(&self) -> usize {
        self.max_concurrent_recipients.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_concurrency_is_clamped() {
        let config = ShareConfig {
            max_concurrent_recipients: 0,
            ..ShareConfig::default()
        };
        assert_eq!(config.concurrency(), 1);
    }

    #[test]
    fn deserializes_with_missing_path() {
        let config: ShareConfig = serde_json::from_value(serde_json::json!({
            "api_base_url": "http://localhost:3002",
            "request_timeout_secs": 2,
            "max_concurrent_recipients": 4,
        }))
        .unwrap();
        assert_eq!(config.request_timeout(), Duration::from_secs(2));
        assert!(config.sync_metadata_path.is_none());
    }
}
