use thiserror::Error;

pub type Result<T> = std::result::Result<T, FusionError>;

#[derive(Error, Debug)]
pub enum FusionError {
    #[error("Invalid video: {0}")]
    InvalidVideo(String),

    #[error("Invalid frame sample rate: {0}")]
    InvalidSampleRate(f64),

    #[error("Invalid sampler configuration: {0}")]
    InvalidConfig(String),

    #[error("No valid input provided for embedding generation")]
    NoInputProvided,

    #[error("Fused embedding has zero or non-finite norm")]
    DegenerateEmbedding,

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
