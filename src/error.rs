//! Error types for the feed runtime

use thiserror::Error;

/// Feed runtime errors
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Failed to parse frame: {0}")]
    Parse(String),

    #[error("Snapshot fetch error: {0}")]
    SnapshotFetch(String),

    #[error("Sequence gap: expected {expected}, got {got}")]
    SequenceGap { expected: u64, got: u64 },

    #[error("Checksum mismatch: exchange {expected}, local {computed}")]
    ChecksumMismatch { expected: String, computed: String },

    #[error("Invalid decimal value: {0}")]
    InvalidDecimal(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Runtime is shutting down")]
    Shutdown,
}

impl From<tokio_tungstenite::tungstenite::Error> for FeedError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        FeedError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for FeedError {
    fn from(err: serde_json::Error) -> Self {
        FeedError::Parse(err.to_string())
    }
}

impl From<reqwest::Error> for FeedError {
    fn from(err: reqwest::Error) -> Self {
        FeedError::SnapshotFetch(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FeedError>;
