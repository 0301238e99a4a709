//! Client configuration.

use crate::error::{ClientError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use trellis_graph::DEFAULT_CACHE_CAPACITY;

/// Default server endpoint.
pub const DEFAULT_URL: &str = "wss://127.0.0.1:8831";

/// Application sub-protocol negotiated on every connection.
pub const DEFAULT_PROTOCOL: &str = "cruzbit.1";

/// Configuration for a [`crate::GraphClient`].
///
/// Every field has a default, so a config file only needs the fields it
/// changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// WebSocket endpoint of the graph-serving node.
    pub url: String,
    /// Sub-protocols offered during the handshake.
    pub protocols: Vec<String>,
    /// Fixed delay between a disconnect and the next connection attempt.
    pub reconnect_delay_ms: u64,
    /// Maximum number of snapshots kept in the graph cache.
    pub cache_capacity: usize,
    /// Maximum number of distinct requests queued while disconnected.
    pub max_pending_requests: usize,
    /// Tell the server when the last local subscriber for a key leaves.
    pub send_cancellations: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            protocols: vec![DEFAULT_PROTOCOL.to_string()],
            reconnect_delay_ms: 2000,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            max_pending_requests: 1024,
            send_cancellations: false,
        }
    }
}

impl ClientConfig {
    /// Default configuration pointed at another endpoint.
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Loads a JSON config file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|source| ClientError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ClientError::ConfigFormat {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Delay before reconnecting.
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Checks that the endpoint is a WebSocket URL.
    pub fn validate(&self) -> Result<()> {
        let url = self.url.trim();
        if url.starts_with("ws://") || url.starts_with("wss://") {
            Ok(())
        } else {
            Err(ClientError::InvalidUrl(self.url.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.protocols, vec!["cruzbit.1".to_string()]);
        assert_eq!(config.reconnect_delay(), Duration::from_secs(2));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ClientConfig =
            serde_json::from_str(r#"{"url": "ws://localhost:9000", "cache_capacity": 4}"#).unwrap();
        assert_eq!(config.url, "ws://localhost:9000");
        assert_eq!(config.cache_capacity, 4);
        assert_eq!(config.reconnect_delay_ms, 2000);
    }

    #[test]
    fn test_validate_rejects_http() {
        let config = ClientConfig::with_url("http://localhost");
        assert!(matches!(config.validate(), Err(ClientError::InvalidUrl(_))));
    }

    #[test]
    fn test_load_missing_file() {
        let result = ClientConfig::load(Path::new("/nonexistent/trellis.json"));
        assert!(matches!(result, Err(ClientError::ConfigIo { .. })));
    }
}
