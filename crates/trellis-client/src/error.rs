use std::path::PathBuf;
use thiserror::Error;

/// Result alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors surfaced by the client.
///
/// Transport faults never appear here: the connection recovers from them on
/// its own. Only caller mistakes and configuration problems are reported.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("missing public key")]
    MissingPublicKey,

    #[error("ranking filter {0} is out of range (expected 0-100)")]
    InvalidRankingFilter(u8),

    #[error("unsupported server url {0:?} (expected ws:// or wss://)")]
    InvalidUrl(String),

    #[error("no tokio runtime available to drive the connection")]
    NoRuntime,

    #[error("malformed server message: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("failed to read config {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    ConfigFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
