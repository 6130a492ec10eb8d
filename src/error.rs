//! Error type for the persistent index.
//!
//! Corruption is a recoverable condition: callers that see
//! [`StoreError::is_corruption`] reset the store and rebuild it from disk
//! rather than failing.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("index corrupted: {0}")]
    Corrupt(String),

    #[error("unsupported index version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("invalid index metadata: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::Corrupt(msg.into())
    }

    /// Whether the on-disk state is unusable and must be rebuilt
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::Corrupt(_) | Self::UnsupportedVersion { .. } | Self::Serialization(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
