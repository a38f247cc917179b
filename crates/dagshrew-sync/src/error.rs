//! Error types for dagshrew-sync

use thiserror::Error;

use crate::domain::ValidationError;

#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or HTTP level failure. The only retryable kind.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The node answered with a JSON-RPC `error` object.
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("{method}: max attempts ({attempts}) exceeded: {source}")]
    RetriesExhausted {
        method: String,
        attempts: u32,
        source: Box<SyncError>,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Block processing error at height {height}: {source}")]
    BlockProcessing { height: u64, source: Box<SyncError> },

    #[error("Indexed {total} blocks with {failed} errors: {sample}")]
    Backfill {
        total: u64,
        failed: usize,
        sample: String,
        failures: Vec<(u64, String)>,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Generic error: {0}")]
    Generic(#[from] anyhow::Error),
}

impl SyncError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Transport(_))
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            SyncError::Cancelled => true,
            SyncError::BlockProcessing { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    pub fn at_height(self, height: u64) -> Self {
        match self {
            SyncError::Cancelled => SyncError::Cancelled,
            other => SyncError::BlockProcessing {
                height,
                source: Box::new(other),
            },
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
