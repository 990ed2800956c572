//! # Post Ingest
//!
//! Turns uploaded posts into indexed embeddings and answers similarity queries.
//!
//! ## Pipeline
//!
//! ```text
//! PostUpload
//!     │
//!     ├──> videos ──> SpooledVideo ──> FrameSampler ──> frame encoder
//!     │                     └────────> transcriber ──> audio_text
//!     ├──> images ──> image encoder
//!     ├──> text (or audio_text) ──> text encoder
//!     │
//!     ├──> EmbeddingFuser ──> unit vector
//!     │
//!     └──> PostIndex::add ──> PostId
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use postsearch_ingest::{IngestService, PostUpload, Settings};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let service = IngestService::open(&Settings::from_env()?).await?;
//!
//!     let post = service
//!         .ingest(PostUpload {
//!             text: Some("sunset over the harbour".to_string()),
//!             ..PostUpload::default()
//!         })
//!         .await?;
//!     println!("stored post {}", post.id);
//!
//!     for hit in service.search_text("harbour", 5).await? {
//!         println!("{}: {:.3}", hit.id, hit.score);
//!     }
//!     Ok(())
//! }
//! ```

mod demo;
mod encoders;
mod error;
mod service;
mod settings;

pub use demo::{process_demo_dir, DemoOutcome, DemoReport};
pub use encoders::{Encoders, FrameEncoder, ImageEncoder, StubEncoder, TextEncoder, Transcriber};
pub use error::{IngestError, Result};
pub use service::{IngestService, IngestedPost, PostUpload};
pub use settings::{
    EmbeddingMode, Settings, DEFAULT_INDEX_PATH, DEFAULT_SEARCH_LIMIT, DEFAULT_VECTOR_DIMENSION,
    ENV_EMBEDDING_MODE, ENV_FRAME_SAMPLE_RATE, ENV_INDEX_PATH, ENV_MAX_VIDEO_DURATION,
    ENV_MIN_FRAME_STD_DEV, ENV_VECTOR_DIMENSION,
};

pub use postsearch_fusion::{FrameSampler, SamplerConfig};
pub use postsearch_vector_store::{PostId, PostIndex, PostMetadata, SearchResult};
