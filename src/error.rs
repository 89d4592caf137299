//! Indexer error taxonomy
//!
//! Every recoverable failure in the crawler, synchronizer and trackers maps to
//! one of these variants. Callers log them and move on; only configuration
//! errors at startup are allowed to stop the process.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexerError {
    /// Probe/download failure, timeout, unreachable gateway
    #[error("network error: {0}")]
    Network(String),

    /// A peer delivered something other than what it advertised
    #[error("block {height} from {peer} does not match advertisement: {reason}")]
    Mismatch {
        peer: String,
        height: u64,
        reason: String,
    },

    /// Protocol client flagged the block as undecodable or hash-invalid
    #[error("invalid block {height}/{hash} from {peer}")]
    InvalidBlock {
        peer: String,
        height: u64,
        hash: String,
    },

    #[error("storage error: {0}")]
    Storage(String),

    /// Misaligned feed data, missing ancestors and similar inconsistencies
    #[error("data corruption: {0}")]
    Corrupt(String),

    /// No bootstrap source produced a usable peer
    #[error("bootstrap failed: {0}")]
    Bootstrap(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<sled::Error> for IndexerError {
    fn from(e: sled::Error) -> Self {
        IndexerError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for IndexerError {
    fn from(e: serde_json::Error) -> Self {
        IndexerError::Storage(format!("document encoding: {}", e))
    }
}

impl From<reqwest::Error> for IndexerError {
    fn from(e: reqwest::Error) -> Self {
        IndexerError::Network(e.to_string())
    }
}

impl IndexerError {
    /// Transient failures are retried on the next cycle without further noise
    pub fn is_transient(&self) -> bool {
        matches!(self, IndexerError::Network(_))
    }
}

pub type Result<T> = std::result::Result<T, IndexerError>;
