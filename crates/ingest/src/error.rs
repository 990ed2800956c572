use thiserror::Error;

pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Vector store error: {0}")]
    VectorStoreError(#[from] postsearch_vector_store::VectorStoreError),

    #[error("Fusion error: {0}")]
    FusionError(#[from] postsearch_fusion::FusionError),

    #[error("{modality} encoder failed: {message}")]
    EncoderError {
        modality: &'static str,
        message: String,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Worker task failed: {0}")]
    WorkerError(String),
}

impl IngestError {
    pub fn encoder(modality: &'static str, message: impl Into<String>) -> Self {
        Self::EncoderError {
            modality,
            message: message.into(),
        }
    }
}
