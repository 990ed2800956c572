use crate::error::{IngestError, Result};
use crate::service::{IngestService, PostUpload};
use chrono::{DateTime, Utc};
use postsearch_vector_store::PostId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const METADATA_FILE_NAME: &str = "metadata.json";
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];
const VIDEO_EXTENSIONS: &[&str] = &["y4m"];

/// Optional `metadata.json` of a demo post. Extra keys are ignored.
#[derive(Debug, Default, Deserialize)]
struct DemoMetadata {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    tags: BTreeSet<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DemoOutcome {
    Ingested { dir: PathBuf, id: PostId },
    Failed { dir: PathBuf, error: String },
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DemoReport {
    pub outcomes: Vec<DemoOutcome>,
}

impl DemoReport {
    #[must_use]
    pub fn ingested(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, DemoOutcome::Ingested { .. }))
            .count()
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.ingested()
    }
}

/// Ingest every post directory under `data_dir`, in name order.
///
/// Each sub-directory may hold a `metadata.json`, one image and one `.y4m` video. A post that
/// fails is recorded and the batch moves on.
pub async fn process_demo_dir(
    service: &IngestService,
    data_dir: &Path,
    mut on_post: impl FnMut(&DemoOutcome),
) -> Result<DemoReport> {
    if !data_dir.is_dir() {
        return Err(IngestError::InvalidConfig(format!(
            "Data directory {} does not exist",
            data_dir.display()
        )));
    }

    let mut report = DemoReport::default();
    for entry in WalkDir::new(data_dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_dir() {
            continue;
        }
        let dir = entry.into_path();
        log::info!("Processing post in {}", dir.display());

        let result = match load_post(&dir).await {
            Ok(upload) => service.ingest(upload).await,
            Err(err) => Err(err),
        };
        let outcome = match result {
            Ok(post) => DemoOutcome::Ingested { dir, id: post.id },
            Err(err) => {
                log::warn!("Error processing post in {}: {err}", dir.display());
                DemoOutcome::Failed {
                    dir,
                    error: err.to_string(),
                }
            }
        };
        on_post(&outcome);
        report.outcomes.push(outcome);
    }

    log::info!(
        "Demo ingestion finished: {} ingested, {} failed",
        report.ingested(),
        report.failed()
    );
    Ok(report)
}

async fn load_post(dir: &Path) -> Result<PostUpload> {
    let metadata_path = dir.join(METADATA_FILE_NAME);
    let metadata: DemoMetadata = if metadata_path.is_file() {
        serde_json::from_slice(&tokio::fs::read(&metadata_path).await?)?
    } else {
        DemoMetadata::default()
    };

    let mut upload = PostUpload {
        text: metadata.text,
        tags: metadata.tags,
        created_at: metadata.created_at,
        ..PostUpload::default()
    };
    if let Some(image) = first_file_with_extension(dir, IMAGE_EXTENSIONS) {
        upload.images.push(tokio::fs::read(image).await?);
    }
    if let Some(video) = first_file_with_extension(dir, VIDEO_EXTENSIONS) {
        upload.videos.push(tokio::fs::read(video).await?);
    }
    Ok(upload)
}

fn first_file_with_extension(dir: &Path, extensions: &[&str]) -> Option<PathBuf> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(walkdir::DirEntry::into_path)
        .find(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| {
                    extensions
                        .iter()
                        .any(|candidate| candidate.eq_ignore_ascii_case(ext))
                })
        })
}
