//! # Post Vector Store
//!
//! Persistent nearest-neighbour index for fused post embeddings.
//!
//! ## Features
//!
//! - **Exact search** by squared Euclidean distance over a flat buffer
//! - **Dense identifiers**: a post's id is its insertion position
//! - **Journaled persistence**: vectors and metadata are committed together on every insert
//! - **Single writer**: appends are serialized in-process and across processes
//!
//! ## Architecture
//!
//! ```text
//! add(vector, metadata)
//!     │
//!     ├──> IndexState (write guard)
//!     │      ├─> FlatIndex      (position = PostId)
//!     │      └─> PostMetadata[] (position = PostId)
//!     │
//!     └──> persist::save
//!            ├─> <base>.bin  (binary vectors)
//!            └─> <base>.json (metadata + checksum, commit point)
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use postsearch_vector_store::{PostIndex, PostMetadata};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let index = PostIndex::open("data/post_index", 3).await?;
//!
//!     let id = index.add(vec![1.0, 0.0, 0.0], PostMetadata::default()).await?;
//!     println!("stored post {id}");
//!
//!     for hit in index.search(&[1.0, 0.0, 0.0], 10).await? {
//!         println!("{}: {:.3}", hit.id, hit.score);
//!     }
//!
//!     Ok(())
//! }
//! ```

mod error;
mod flat_index;
pub mod persist;
mod state;
mod store;
mod types;
mod writer_lock;

pub use error::{Result, VectorStoreError};
pub use flat_index::{score_from_distance, FlatIndex, Neighbor};
pub use persist::{IndexFiles, INDEX_SCHEMA_VERSION};
pub use state::IndexState;
pub use store::PostIndex;
pub use types::{IndexStats, PostId, PostMetadata, SearchResult};
