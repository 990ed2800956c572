use crate::encoders::Encoders;
use crate::error::{IngestError, Result};
use crate::settings::Settings;
use chrono::{DateTime, Utc};
use postsearch_fusion::{EmbeddingFuser, FrameSampler, FusionError, SpooledVideo};
use postsearch_vector_store::{PostId, PostIndex, PostMetadata, SearchResult};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Raw material of one post as received from a client.
#[derive(Debug, Clone, Default)]
pub struct PostUpload {
    /// Encoded image files.
    pub images: Vec<Vec<u8>>,
    /// Y4M video files.
    pub videos: Vec<Vec<u8>>,
    pub text: Option<String>,
    pub tags: BTreeSet<String>,
    /// Defaults to the ingestion time.
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestedPost {
    pub id: PostId,
    pub embedding: Vec<f32>,
    pub metadata: PostMetadata,
}

struct EmbeddedPost {
    embedding: Vec<f32>,
    audio_text: Option<String>,
}

/// Encodes, fuses and indexes posts.
///
/// Model inference and video decoding run on blocking workers; only the final append touches
/// the index lock.
#[derive(Clone)]
pub struct IngestService {
    index: Arc<PostIndex>,
    sampler: FrameSampler,
    fuser: EmbeddingFuser,
    encoders: Encoders,
}

impl IngestService {
    #[must_use]
    pub fn new(index: Arc<PostIndex>, sampler: FrameSampler, encoders: Encoders) -> Self {
        Self {
            index,
            sampler,
            fuser: EmbeddingFuser::new(),
            encoders,
        }
    }

    /// Build every component from `settings` and open the index for writing.
    pub async fn open(settings: &Settings) -> Result<Self> {
        let index = PostIndex::open(&settings.index_path, settings.vector_dimension);
        Self::build(settings, index).await
    }

    /// Like [`open`](Self::open), but the index is opened read-only: searches work while another
    /// process holds the writer lock, and ingestion fails.
    pub async fn open_read_only(settings: &Settings) -> Result<Self> {
        let index = PostIndex::open_read_only(&settings.index_path, settings.vector_dimension);
        Self::build(settings, index).await
    }

    async fn build(
        settings: &Settings,
        index: impl std::future::Future<Output = postsearch_vector_store::Result<PostIndex>>,
    ) -> Result<Self> {
        settings.validate()?;
        let sampler = FrameSampler::new(settings.sampler)?;
        let index = index.await?;
        let encoders = Encoders::for_mode(settings.embedding_mode, settings.vector_dimension);
        log::info!(
            "Ingest service ready ({} posts, embedding mode {})",
            index.len().await,
            settings.embedding_mode.as_str()
        );
        Ok(Self::new(Arc::new(index), sampler, encoders))
    }

    #[must_use]
    pub const fn index(&self) -> &Arc<PostIndex> {
        &self.index
    }

    pub async fn ingest(&self, upload: PostUpload) -> Result<IngestedPost> {
        let PostUpload {
            images,
            videos,
            text,
            tags,
            created_at,
        } = upload;
        let text = text.filter(|t| !t.trim().is_empty());
        log::info!(
            "Ingest request - images: {}, videos: {}, text: {}",
            images.len(),
            videos.len(),
            text.is_some()
        );
        if images.is_empty() && videos.is_empty() && text.is_none() {
            return Err(FusionError::NoInputProvided.into());
        }
        let has_image = !images.is_empty();
        let has_video = !videos.is_empty();

        let sampler = self.sampler.clone();
        let fuser = self.fuser;
        let encoders = self.encoders.clone();
        let text_for_worker = text.clone();
        let embedded = tokio::task::spawn_blocking(move || {
            embed_post(
                &sampler,
                &fuser,
                &encoders,
                &images,
                &videos,
                text_for_worker.as_deref(),
            )
        })
        .await
        .map_err(|err| IngestError::WorkerError(format!("join embedding task: {err}")))??;

        let metadata = PostMetadata {
            text,
            audio_text: embedded.audio_text,
            has_image,
            has_video,
            created_at: Some(created_at.unwrap_or_else(Utc::now)),
            tags,
        };
        let id = self
            .index
            .add(embedded.embedding.clone(), metadata.clone())
            .await?;

        Ok(IngestedPost {
            id,
            embedding: embedded.embedding,
            metadata,
        })
    }

    /// Embed `query` as text and return the `limit` most similar posts.
    pub async fn search_text(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        log::info!("Search request - query: '{query}', limit: {limit}");
        let encoders = self.encoders.clone();
        let fuser = self.fuser;
        let owned = query.to_string();
        let embedding = tokio::task::spawn_blocking(move || -> Result<Vec<f32>> {
            let raw = encoders.text.encode_text(&owned)?;
            Ok(fuser.normalize(&raw)?)
        })
        .await
        .map_err(|err| IngestError::WorkerError(format!("join query embedding task: {err}")))??;

        self.search_embedding(&embedding, limit).await
    }

    pub async fn search_embedding(&self, query: &[f32], limit: usize) -> Result<Vec<SearchResult>> {
        Ok(self.index.search(query, limit).await?)
    }
}

fn embed_post(
    sampler: &FrameSampler,
    fuser: &EmbeddingFuser,
    encoders: &Encoders,
    images: &[Vec<u8>],
    videos: &[Vec<u8>],
    text: Option<&str>,
) -> Result<EmbeddedPost> {
    let image_vectors = images
        .iter()
        .map(|image| encoders.image.encode_image(image))
        .collect::<Result<Vec<_>>>()?;

    let mut frame_vectors = Vec::new();
    let mut audio_text: Option<String> = None;
    for video in videos {
        let spool = SpooledVideo::from_bytes(video)?;
        let frames = sampler.sample_path(spool.path())?;
        for frame in &frames {
            frame_vectors.push(encoders.frame.encode_frame(frame)?);
        }
        if audio_text.is_none() {
            audio_text = encoders
                .transcriber
                .transcribe(spool.path())?
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty());
            if let Some(transcript) = &audio_text {
                let preview: String = transcript.chars().take(100).collect();
                log::info!("Transcription result (preview): {preview}");
            }
        }
    }

    // A transcript stands in for missing text.
    let text_vector = match text.or(audio_text.as_deref()) {
        Some(text) => Some(encoders.text.encode_text(text)?),
        None => None,
    };

    let embedding = fuser.fuse(&image_vectors, &frame_vectors, text_vector.as_deref())?;
    Ok(EmbeddedPost {
        embedding,
        audio_text,
    })
}
