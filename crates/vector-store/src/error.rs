use std::path::{Path, PathBuf};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, VectorStoreError>;

#[derive(Error, Debug)]
pub enum VectorStoreError {
    #[error("Invalid vector dimension: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid vector: {0}")]
    InvalidVector(String),

    #[error("Corrupt index at {}: {reason}", path.display())]
    CorruptIndex { path: PathBuf, reason: String },

    #[error("Index at {} is locked by another writer", .0.display())]
    Locked(PathBuf),

    #[error("Index at {} is open read-only", .0.display())]
    ReadOnly(PathBuf),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl VectorStoreError {
    pub(crate) fn corrupt(path: &Path, reason: impl Into<String>) -> Self {
        Self::CorruptIndex {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    /// Transient storage failures are the only errors a save is retried on.
    pub(crate) const fn is_retryable(&self) -> bool {
        matches!(self, Self::IoError(_))
    }
}
