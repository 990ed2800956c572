use crate::error::{Result, VectorStoreError};
use crate::persist::{self, IndexFiles};
use crate::state::IndexState;
use crate::types::{IndexStats, PostId, PostMetadata, SearchResult};
use crate::writer_lock::{acquire_writer_lock, WriterLock};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::RwLock;

const SAVE_ATTEMPTS: u32 = 3;
const SAVE_RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// Persistent post index: the vector index and the metadata store behind one lock.
///
/// Every [`add`](Self::add) is validated, assigned the next identifier, appended and persisted
/// while the write guard is held, so identifiers can never be handed out twice. Searches share
/// the read guard and never observe a half-applied append.
///
/// An index opened with [`open_read_only`](Self::open_read_only) holds no writer lock and
/// refuses appends, so any number of readers can run beside the single writer.
pub struct PostIndex {
    state: RwLock<IndexState>,
    base: PathBuf,
    files: IndexFiles,
    dimension: usize,
    writer: Option<WriterLock>,
}

impl PostIndex {
    /// Open (or create) the index at `base`. Fails with
    /// [`VectorStoreError::CorruptIndex`] rather than starting empty over unreadable state.
    pub async fn open(base: impl AsRef<Path>, dimension: usize) -> Result<Self> {
        let base = base.as_ref().to_path_buf();
        log::info!("Opening post index at {:?} (dimension {dimension})", base);
        check_dimension(dimension)?;

        let files = IndexFiles::for_base(&base);
        let writer = acquire_writer_lock(&files.lock).await?;
        let state = persist::load(&base, dimension).await?;

        Ok(Self {
            state: RwLock::new(state),
            base,
            files,
            dimension,
            writer: Some(writer),
        })
    }

    /// Open the index for search and stats without taking the writer lock.
    ///
    /// Nothing on disk is modified: a commit interrupted by a live writer is read through rather
    /// than rolled forward. A missing index reads as empty.
    pub async fn open_read_only(base: impl AsRef<Path>, dimension: usize) -> Result<Self> {
        let base = base.as_ref().to_path_buf();
        log::info!("Opening post index at {:?} read-only (dimension {dimension})", base);
        check_dimension(dimension)?;

        let files = IndexFiles::for_base(&base);
        let state = persist::load_read_only(&base, dimension).await?;

        Ok(Self {
            state: RwLock::new(state),
            base,
            files,
            dimension,
            writer: None,
        })
    }

    #[must_use]
    pub const fn is_read_only(&self) -> bool {
        self.writer.is_none()
    }

    /// Append a post and persist the index before returning its identifier.
    ///
    /// If the index cannot be saved the append is undone, so memory never runs ahead of disk.
    pub async fn add(&self, vector: Vec<f32>, metadata: PostMetadata) -> Result<PostId> {
        if self.is_read_only() {
            return Err(VectorStoreError::ReadOnly(self.base.clone()));
        }

        let mut state = self.state.write().await;
        let position = state.len();
        let id = state.push(&vector, metadata)?;

        if let Err(err) = self.save_with_retry(&state).await {
            log::error!("Failed to persist post {id}, rolling back: {err}");
            state.truncate(position);
            self.restore_on_disk(&state).await;
            return Err(err);
        }

        log::info!("Added post {id}. Total: {}", state.len());
        Ok(id)
    }

    /// Up to `k` nearest posts, best first.
    pub async fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchResult>> {
        let state = self.state.read().await;
        log::debug!("Searching {} posts (k: {k})", state.len());
        let results = state.search(query, k)?;
        log::debug!("Found {} results", results.len());
        Ok(results)
    }

    pub async fn get(&self, id: PostId) -> Option<PostMetadata> {
        self.state.read().await.metadata(id).cloned()
    }

    pub async fn vector(&self, id: PostId) -> Option<Vec<f32>> {
        self.state.read().await.vector(id).map(<[f32]>::to_vec)
    }

    /// A copy of the current state, consistent with what is on disk.
    pub async fn snapshot(&self) -> IndexState {
        self.state.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.is_empty()
    }

    #[must_use]
    pub const fn dimension(&self) -> usize {
        self.dimension
    }

    #[must_use]
    pub fn base_path(&self) -> &Path {
        &self.base
    }

    pub async fn stats(&self) -> IndexStats {
        IndexStats {
            posts: self.len().await,
            dimension: self.dimension,
            vectors_path: self.files.vectors.clone(),
            metadata_path: self.files.metadata.clone(),
        }
    }

    async fn save_with_retry(&self, state: &IndexState) -> Result<()> {
        let mut attempt = 1;
        loop {
            match persist::save(state, &self.base).await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_retryable() && attempt < SAVE_ATTEMPTS => {
                    log::warn!(
                        "Saving index {:?} failed (attempt {attempt}/{SAVE_ATTEMPTS}): {err}",
                        self.base
                    );
                    tokio::time::sleep(SAVE_RETRY_BACKOFF * attempt).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Bring the files back in line with `state` after a failed append.
    ///
    /// The failed save may have left its sidecar staged next to vectors that already hold the
    /// dropped post; that pair would be rolled forward on the next open, so it goes first. If the
    /// re-save fails too, the files disagree and the next open reports a corrupt index instead of
    /// reviving the post.
    async fn restore_on_disk(&self, state: &IndexState) {
        if let Err(err) = persist::discard_staged(&self.base).await {
            log::error!("Failed to discard staged index files for {:?}: {err}", self.base);
        }
        match persist::save(state, &self.base).await {
            Ok(()) => log::info!("Restored index {:?} to {} posts", self.base, state.len()),
            Err(err) => log::error!(
                "Failed to restore index {:?} to {} posts: {err}",
                self.base,
                state.len()
            ),
        }
    }
}

fn check_dimension(dimension: usize) -> Result<()> {
    if dimension == 0 {
        return Err(VectorStoreError::InvalidConfig(
            "vector dimension must be positive".to_string(),
        ));
    }
    Ok(())
}
