//! On-disk layout of an index: a binary vector file plus a JSON metadata sidecar.
//!
//! ```text
//! <base>.bin   "PV01" | u32 dimension | u64 count | count * dimension f32 (LE)
//! <base>.json  { schema_version, dimension, next_id, vectors_sha256, posts: { "<id>": metadata } }
//! ```
//!
//! Both files are staged as `*.tmp`, then renamed vectors-first. The sidecar rename commits the
//! pair; the sidecar carries the SHA-256 of the vector file so a reader can tell whether the two
//! belong together.

use crate::error::{Result, VectorStoreError};
use crate::flat_index::FlatIndex;
use crate::state::IndexState;
use crate::types::{PostId, PostMetadata};
use serde::{Deserialize, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

pub const INDEX_SCHEMA_VERSION: u32 = 1;

const VECTORS_MAGIC: &[u8; 4] = b"PV01";
const HEADER_LEN: usize = 16;
const READ_ATTEMPTS: u32 = 3;
const READ_RETRY_BACKOFF: Duration = Duration::from_millis(20);

/// The files that make up an index rooted at a base path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexFiles {
    pub vectors: PathBuf,
    pub metadata: PathBuf,
    pub lock: PathBuf,
}

impl IndexFiles {
    #[must_use]
    pub fn for_base(base: &Path) -> Self {
        Self {
            vectors: with_suffix(base, ".bin"),
            metadata: with_suffix(base, ".json"),
            lock: with_suffix(base, ".lock"),
        }
    }

    fn vectors_tmp(&self) -> PathBuf {
        with_suffix(&self.vectors, ".tmp")
    }

    fn metadata_tmp(&self) -> PathBuf {
        with_suffix(&self.metadata, ".tmp")
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut raw: OsString = path.as_os_str().to_owned();
    raw.push(suffix);
    PathBuf::from(raw)
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PersistedSidecar {
    schema_version: u32,
    dimension: usize,
    next_id: u64,
    vectors_sha256: String,
    posts: BTreeMap<PostId, PostMetadata>,
}

#[derive(Serialize)]
struct SidecarRef<'a> {
    schema_version: u32,
    dimension: usize,
    next_id: u64,
    vectors_sha256: &'a str,
    posts: PostsRef<'a>,
}

struct PostsRef<'a>(&'a [PostMetadata]);

impl Serialize for PostsRef<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_map(
            self.0
                .iter()
                .enumerate()
                .map(|(position, metadata)| (PostId::from_position(position), metadata)),
        )
    }
}

/// Load the index at `base`, finishing or discarding an interrupted commit first.
///
/// A missing pair yields an empty index. Anything else that does not verify is
/// [`VectorStoreError::CorruptIndex`]; the caller must not fall back to an empty index.
pub async fn load(base: &Path, dimension: usize) -> Result<IndexState> {
    let files = IndexFiles::for_base(base);
    recover_interrupted_commit(&files).await?;
    read_pair(&files, base, dimension, &files.metadata).await
}

/// Load the index at `base` without modifying any file.
///
/// For readers that do not hold the writer lock: a commit in flight is read through its staged
/// sidecar, and a read torn by a concurrent rename is retried.
pub async fn load_read_only(base: &Path, dimension: usize) -> Result<IndexState> {
    let files = IndexFiles::for_base(base);
    let mut attempt = 1;
    loop {
        let metadata_tmp = files.metadata_tmp();
        let sidecar = if staged_sidecar_matches(&metadata_tmp, &files.vectors).await {
            metadata_tmp
        } else {
            files.metadata.clone()
        };
        match read_pair(&files, base, dimension, &sidecar).await {
            Err(err) if is_torn_read(&err) && attempt < READ_ATTEMPTS => {
                log::debug!("Retrying read of {} after {err}", base.display());
                tokio::time::sleep(READ_RETRY_BACKOFF).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}

fn is_torn_read(err: &VectorStoreError) -> bool {
    match err {
        VectorStoreError::CorruptIndex { .. } => true,
        VectorStoreError::IoError(io) => io.kind() == std::io::ErrorKind::NotFound,
        _ => false,
    }
}

async fn read_pair(
    files: &IndexFiles,
    base: &Path,
    dimension: usize,
    sidecar: &Path,
) -> Result<IndexState> {
    let has_vectors = tokio::fs::try_exists(&files.vectors).await?;
    let has_metadata = tokio::fs::try_exists(sidecar).await?;
    match (has_vectors, has_metadata) {
        (false, false) => {
            log::info!("No index at {}, starting empty", base.display());
            return IndexState::empty(dimension);
        }
        (true, false) => {
            return Err(VectorStoreError::corrupt(
                &files.metadata,
                "metadata sidecar is missing",
            ))
        }
        (false, true) => {
            return Err(VectorStoreError::corrupt(
                &files.vectors,
                "vector file is missing",
            ))
        }
        (true, true) => {}
    }

    let vector_bytes = tokio::fs::read(&files.vectors).await?;
    let sidecar_bytes = tokio::fs::read(sidecar).await?;
    let state = decode_state(files, &vector_bytes, &sidecar_bytes)?;
    if state.dimension() != dimension {
        return Err(VectorStoreError::corrupt(
            &files.vectors,
            format!(
                "index holds {}-dimensional vectors but {dimension} are configured",
                state.dimension()
            ),
        ));
    }

    log::info!("Loaded {} posts from {}", state.len(), base.display());
    Ok(state)
}

/// Persist `state` at `base`. Rewriting an already persisted state is a no-op in effect, so
/// callers may retry freely.
pub async fn save(state: &IndexState, base: &Path) -> Result<()> {
    let files = IndexFiles::for_base(base);
    let dir = parent_dir(&files.vectors);
    tokio::fs::create_dir_all(&dir).await?;

    let vector_bytes = encode_vectors(state.vectors())?;
    let vectors_sha256 = sha256_hex(&vector_bytes);
    let sidecar = serde_json::to_vec_pretty(&SidecarRef {
        schema_version: INDEX_SCHEMA_VERSION,
        dimension: state.dimension(),
        next_id: state.next_id(),
        vectors_sha256: &vectors_sha256,
        posts: PostsRef(state.posts()),
    })?;

    let vectors_tmp = files.vectors_tmp();
    let metadata_tmp = files.metadata_tmp();
    write_synced(&vectors_tmp, &vector_bytes).await?;
    write_synced(&metadata_tmp, &sidecar).await?;

    tokio::fs::rename(&vectors_tmp, &files.vectors).await?;
    tokio::fs::rename(&metadata_tmp, &files.metadata).await?;
    sync_dir(&dir).await;

    log::debug!(
        "Saved {} posts to {} ({} bytes of vectors)",
        state.len(),
        base.display(),
        vector_bytes.len()
    );
    Ok(())
}

/// Remove staged files left by a failed save so a later load cannot roll them forward.
pub(crate) async fn discard_staged(base: &Path) -> Result<()> {
    let files = IndexFiles::for_base(base);
    for staged in [files.metadata_tmp(), files.vectors_tmp()] {
        match tokio::fs::remove_file(&staged).await {
            Ok(()) => log::debug!("Removed staged {}", staged.display()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

/// Finish or discard a save that was interrupted between staging and commit.
async fn recover_interrupted_commit(files: &IndexFiles) -> Result<()> {
    let metadata_tmp = files.metadata_tmp();
    if tokio::fs::try_exists(&metadata_tmp).await? {
        if staged_sidecar_matches(&metadata_tmp, &files.vectors).await {
            log::warn!(
                "Completing interrupted index commit at {}",
                files.metadata.display()
            );
            tokio::fs::rename(&metadata_tmp, &files.metadata).await?;
        } else {
            log::warn!("Discarding uncommitted sidecar {}", metadata_tmp.display());
            tokio::fs::remove_file(&metadata_tmp).await?;
        }
    }

    let vectors_tmp = files.vectors_tmp();
    if tokio::fs::try_exists(&vectors_tmp).await? {
        log::warn!("Discarding uncommitted vectors {}", vectors_tmp.display());
        tokio::fs::remove_file(&vectors_tmp).await?;
    }
    Ok(())
}

async fn staged_sidecar_matches(metadata_tmp: &Path, vectors: &Path) -> bool {
    let Ok(sidecar_bytes) = tokio::fs::read(metadata_tmp).await else {
        return false;
    };
    let Ok(sidecar) = serde_json::from_slice::<PersistedSidecar>(&sidecar_bytes) else {
        return false;
    };
    let Ok(vector_bytes) = tokio::fs::read(vectors).await else {
        return false;
    };
    sidecar.vectors_sha256 == sha256_hex(&vector_bytes)
}

fn decode_state(files: &IndexFiles, vector_bytes: &[u8], sidecar_bytes: &[u8]) -> Result<IndexState> {
    let sidecar: PersistedSidecar = serde_json::from_slice(sidecar_bytes).map_err(|err| {
        VectorStoreError::corrupt(&files.metadata, format!("unreadable sidecar: {err}"))
    })?;
    if sidecar.schema_version != INDEX_SCHEMA_VERSION {
        return Err(VectorStoreError::corrupt(
            &files.metadata,
            format!(
                "unsupported schema_version {} (expected {INDEX_SCHEMA_VERSION})",
                sidecar.schema_version
            ),
        ));
    }

    if sha256_hex(vector_bytes) != sidecar.vectors_sha256 {
        return Err(VectorStoreError::corrupt(
            &files.vectors,
            "vector file does not match the sidecar checksum",
        ));
    }

    let (dimension, data) =
        decode_vectors(vector_bytes).map_err(|reason| VectorStoreError::corrupt(&files.vectors, reason))?;
    if dimension != sidecar.dimension {
        return Err(VectorStoreError::corrupt(
            &files.metadata,
            format!(
                "sidecar dimension {} disagrees with vector file dimension {dimension}",
                sidecar.dimension
            ),
        ));
    }
    let vectors = FlatIndex::from_raw(dimension, data)
        .map_err(|err| VectorStoreError::corrupt(&files.vectors, err.to_string()))?;

    if sidecar.next_id != vectors.len() as u64 {
        return Err(VectorStoreError::corrupt(
            &files.metadata,
            format!(
                "next_id {} does not match {} stored vectors",
                sidecar.next_id,
                vectors.len()
            ),
        ));
    }

    let mut posts = Vec::with_capacity(sidecar.posts.len());
    for (position, (id, metadata)) in sidecar.posts.into_iter().enumerate() {
        if id.position() != Some(position) {
            return Err(VectorStoreError::corrupt(
                &files.metadata,
                format!("unexpected post id {id} at position {position}"),
            ));
        }
        posts.push(metadata);
    }
    if posts.len() != vectors.len() {
        return Err(VectorStoreError::corrupt(
            &files.metadata,
            format!(
                "{} metadata records for {} vectors",
                posts.len(),
                vectors.len()
            ),
        ));
    }

    IndexState::from_parts(vectors, posts)
}

fn encode_vectors(index: &FlatIndex) -> Result<Vec<u8>> {
    let dimension = u32::try_from(index.dimension()).map_err(|_| {
        VectorStoreError::InvalidConfig(format!("dimension {} too large", index.dimension()))
    })?;
    let floats = index.as_slice();
    let mut out = Vec::with_capacity(HEADER_LEN + floats.len() * 4);
    out.extend_from_slice(VECTORS_MAGIC);
    out.extend_from_slice(&dimension.to_le_bytes());
    out.extend_from_slice(&(index.len() as u64).to_le_bytes());
    for v in floats {
        out.extend_from_slice(&v.to_le_bytes());
    }
    Ok(out)
}

fn decode_vectors(bytes: &[u8]) -> std::result::Result<(usize, Vec<f32>), String> {
    if bytes.len() < HEADER_LEN || &bytes[0..4] != VECTORS_MAGIC {
        return Err("missing or invalid vector file header".to_string());
    }
    let dimension = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
    let mut count_bytes = [0u8; 8];
    count_bytes.copy_from_slice(&bytes[8..HEADER_LEN]);
    let count = u64::from_le_bytes(count_bytes);
    if dimension == 0 {
        return Err("vector file declares dimension 0".to_string());
    }

    let expected_len = usize::try_from(count)
        .ok()
        .and_then(|count| count.checked_mul(dimension))
        .and_then(|floats| floats.checked_mul(4))
        .and_then(|len| len.checked_add(HEADER_LEN))
        .ok_or_else(|| format!("vector count {count} overflows"))?;
    if bytes.len() != expected_len {
        return Err(format!(
            "expected {expected_len} bytes for {count} vectors, found {}",
            bytes.len()
        ));
    }

    let data = bytes[HEADER_LEN..]
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Ok((dimension, data))
}

fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

async fn write_synced(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    Ok(())
}

#[cfg(unix)]
async fn sync_dir(dir: &Path) {
    if let Ok(handle) = tokio::fs::File::open(dir).await {
        let _ = handle.sync_all().await;
    }
}

#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn sample_state(posts: usize) -> IndexState {
        let mut state = IndexState::empty(3).unwrap();
        for i in 0..posts {
            let metadata = PostMetadata {
                text: Some(format!("post {i}")),
                audio_text: (i % 2 == 0).then(|| format!("spoken {i}")),
                has_image: i % 2 == 1,
                has_video: i % 3 == 0,
                created_at: Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, i as u32).unwrap()),
                tags: [format!("tag{i}"), "shared".to_string()].into_iter().collect(),
            };
            let angle = i as f32 * 0.37;
            state
                .push(&[angle.cos(), angle.sin(), 0.0], metadata)
                .unwrap();
        }
        state
    }

    #[tokio::test]
    async fn missing_index_loads_empty() {
        let tmp = TempDir::new().unwrap();
        let state = load(&tmp.path().join("index"), 3).await.unwrap();
        assert!(state.is_empty());
        assert_eq!(state.dimension(), 3);
    }

    #[tokio::test]
    async fn save_then_load_reproduces_state() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path().join("nested").join("index");
        let state = sample_state(12);

        save(&state, &base).await.unwrap();
        let loaded = load(&base, 3).await.unwrap();

        assert_eq!(loaded, state);
        assert!(!IndexFiles::for_base(&base).vectors_tmp().exists());
        assert!(!IndexFiles::for_base(&base).metadata_tmp().exists());
    }

    #[tokio::test]
    async fn sidecar_keys_are_string_ids() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path().join("index");
        save(&sample_state(2), &base).await.unwrap();

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(IndexFiles::for_base(&base).metadata).unwrap())
                .unwrap();
        assert_eq!(raw["next_id"], 2);
        assert_eq!(raw["posts"]["1"]["text"], "post 1");
        assert_eq!(raw["posts"]["0"]["has_video"], true);
    }

    #[tokio::test]
    async fn missing_partner_file_is_corrupt() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path().join("index");
        save(&sample_state(2), &base).await.unwrap();
        std::fs::remove_file(IndexFiles::for_base(&base).metadata).unwrap();

        let err = load(&base, 3).await.unwrap_err();
        assert!(matches!(err, VectorStoreError::CorruptIndex { .. }), "{err}");
    }

    #[tokio::test]
    async fn truncated_vector_file_is_corrupt() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path().join("index");
        save(&sample_state(3), &base).await.unwrap();

        let files = IndexFiles::for_base(&base);
        let bytes = std::fs::read(&files.vectors).unwrap();
        std::fs::write(&files.vectors, &bytes[..bytes.len() - 5]).unwrap();

        let err = load(&base, 3).await.unwrap_err();
        assert!(matches!(err, VectorStoreError::CorruptIndex { .. }), "{err}");
    }

    #[tokio::test]
    async fn sidecar_from_another_generation_is_corrupt() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path().join("index");
        let other = tmp.path().join("other");
        save(&sample_state(2), &base).await.unwrap();
        save(&sample_state(3), &other).await.unwrap();

        std::fs::copy(
            IndexFiles::for_base(&other).vectors,
            IndexFiles::for_base(&base).vectors,
        )
        .unwrap();

        let err = load(&base, 3).await.unwrap_err();
        assert!(matches!(err, VectorStoreError::CorruptIndex { .. }), "{err}");
    }

    #[tokio::test]
    async fn gap_in_ids_is_corrupt() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path().join("index");
        save(&sample_state(2), &base).await.unwrap();

        let path = IndexFiles::for_base(&base).metadata;
        let json = std::fs::read_to_string(&path).unwrap();
        assert!(json.contains("\"1\": {"));
        std::fs::write(&path, json.replace("\"1\": {", "\"2\": {")).unwrap();

        let err = load(&base, 3).await.unwrap_err();
        assert!(matches!(err, VectorStoreError::CorruptIndex { .. }), "{err}");
    }

    #[tokio::test]
    async fn unknown_metadata_fields_are_corrupt() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path().join("index");
        save(&sample_state(1), &base).await.unwrap();

        let path = IndexFiles::for_base(&base).metadata;
        let json = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, json.replace("\"has_image\"", "\"likes\": 3,\n      \"has_image\""))
            .unwrap();

        let err = load(&base, 3).await.unwrap_err();
        assert!(matches!(err, VectorStoreError::CorruptIndex { .. }), "{err}");
    }

    #[tokio::test]
    async fn configured_dimension_must_match() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path().join("index");
        save(&sample_state(1), &base).await.unwrap();

        let err = load(&base, 4).await.unwrap_err();
        assert!(matches!(err, VectorStoreError::CorruptIndex { .. }), "{err}");
        assert!(err.to_string().contains("3-dimensional"), "{err}");
    }

    #[tokio::test]
    async fn crash_between_renames_rolls_forward() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path().join("index");
        let next = tmp.path().join("next");
        save(&sample_state(2), &base).await.unwrap();
        save(&sample_state(3), &next).await.unwrap();

        // Vectors renamed, sidecar still staged.
        let files = IndexFiles::for_base(&base);
        let next_files = IndexFiles::for_base(&next);
        std::fs::copy(&next_files.vectors, &files.vectors).unwrap();
        std::fs::copy(&next_files.metadata, files.metadata_tmp()).unwrap();

        let loaded = load(&base, 3).await.unwrap();
        assert_eq!(loaded, sample_state(3));
        assert!(!files.metadata_tmp().exists());
    }

    #[tokio::test]
    async fn crash_before_commit_keeps_previous_state() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path().join("index");
        let next = tmp.path().join("next");
        save(&sample_state(2), &base).await.unwrap();
        save(&sample_state(3), &next).await.unwrap();

        // Both files staged, neither renamed.
        let files = IndexFiles::for_base(&base);
        let next_files = IndexFiles::for_base(&next);
        std::fs::copy(&next_files.vectors, files.vectors_tmp()).unwrap();
        std::fs::copy(&next_files.metadata, files.metadata_tmp()).unwrap();

        let loaded = load(&base, 3).await.unwrap();
        assert_eq!(loaded, sample_state(2));
        assert!(!files.vectors_tmp().exists());
        assert!(!files.metadata_tmp().exists());
    }

    #[tokio::test]
    async fn read_only_load_sees_commit_in_flight_without_touching_files() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path().join("index");
        let next = tmp.path().join("next");
        save(&sample_state(2), &base).await.unwrap();
        save(&sample_state(3), &next).await.unwrap();

        let files = IndexFiles::for_base(&base);
        let next_files = IndexFiles::for_base(&next);
        std::fs::copy(&next_files.vectors, &files.vectors).unwrap();
        std::fs::copy(&next_files.metadata, files.metadata_tmp()).unwrap();

        let loaded = load_read_only(&base, 3).await.unwrap();
        assert_eq!(loaded, sample_state(3));
        assert!(files.metadata_tmp().exists());
    }

    #[tokio::test]
    async fn read_only_load_ignores_stale_staging() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path().join("index");
        let next = tmp.path().join("next");
        save(&sample_state(2), &base).await.unwrap();
        save(&sample_state(3), &next).await.unwrap();

        let files = IndexFiles::for_base(&base);
        let next_files = IndexFiles::for_base(&next);
        std::fs::copy(&next_files.vectors, files.vectors_tmp()).unwrap();
        std::fs::copy(&next_files.metadata, files.metadata_tmp()).unwrap();

        assert_eq!(load_read_only(&base, 3).await.unwrap(), sample_state(2));
        assert!(files.vectors_tmp().exists());
        assert!(files.metadata_tmp().exists());
    }

    #[tokio::test]
    async fn discarded_staging_is_never_rolled_forward() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path().join("index");
        let next = tmp.path().join("next");
        save(&sample_state(2), &base).await.unwrap();
        save(&sample_state(3), &next).await.unwrap();

        // A save that renamed its vectors and then gave up.
        let files = IndexFiles::for_base(&base);
        let next_files = IndexFiles::for_base(&next);
        std::fs::copy(&next_files.vectors, &files.vectors).unwrap();
        std::fs::copy(&next_files.metadata, files.metadata_tmp()).unwrap();

        discard_staged(&base).await.unwrap();
        discard_staged(&base).await.unwrap();
        assert!(!files.metadata_tmp().exists());

        let err = load(&base, 3).await.unwrap_err();
        assert!(matches!(err, VectorStoreError::CorruptIndex { .. }), "{err}");
    }

    #[tokio::test]
    async fn resaving_same_state_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path().join("index");
        let state = sample_state(4);
        save(&state, &base).await.unwrap();
        let first = std::fs::read(IndexFiles::for_base(&base).metadata).unwrap();
        save(&state, &base).await.unwrap();
        let second = std::fs::read(IndexFiles::for_base(&base).metadata).unwrap();
        assert_eq!(first, second);
        assert_eq!(load(&base, 3).await.unwrap(), state);
    }
}
