use crate::error::{IngestError, Result};
use postsearch_fusion::SamplerConfig;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_INDEX_PATH: &str = "data/post_index";
/// CLIP ViT-B/32 embedding width.
pub const DEFAULT_VECTOR_DIMENSION: usize = 512;
pub const DEFAULT_SEARCH_LIMIT: usize = 10;

pub const ENV_INDEX_PATH: &str = "POSTSEARCH_INDEX_PATH";
pub const ENV_VECTOR_DIMENSION: &str = "POSTSEARCH_VECTOR_DIMENSION";
pub const ENV_MAX_VIDEO_DURATION: &str = "POSTSEARCH_MAX_VIDEO_DURATION";
pub const ENV_FRAME_SAMPLE_RATE: &str = "POSTSEARCH_FRAME_SAMPLE_RATE";
pub const ENV_MIN_FRAME_STD_DEV: &str = "POSTSEARCH_MIN_FRAME_STD_DEV";
pub const ENV_EMBEDDING_MODE: &str = "POSTSEARCH_EMBEDDING_MODE";

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum EmbeddingMode {
    /// Deterministic hash-based vectors; no model weights required.
    #[default]
    Stub,
}

impl EmbeddingMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stub => "stub",
        }
    }
}

impl FromStr for EmbeddingMode {
    type Err = IngestError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "stub" => Ok(Self::Stub),
            other => Err(IngestError::InvalidConfig(format!(
                "Unsupported {ENV_EMBEDDING_MODE} '{other}' (expected 'stub')"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Base path of the index; `.bin`, `.json` and `.lock` are appended.
    pub index_path: PathBuf,
    pub vector_dimension: usize,
    pub sampler: SamplerConfig,
    pub embedding_mode: EmbeddingMode,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            index_path: PathBuf::from(DEFAULT_INDEX_PATH),
            vector_dimension: DEFAULT_VECTOR_DIMENSION,
            sampler: SamplerConfig::default(),
            embedding_mode: EmbeddingMode::default(),
        }
    }
}

impl Settings {
    /// Defaults overridden by `POSTSEARCH_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut settings = Self::default();
        if let Some(path) = lookup(ENV_INDEX_PATH).filter(|p| !p.trim().is_empty()) {
            settings.index_path = PathBuf::from(path);
        }
        if let Some(raw) = lookup(ENV_VECTOR_DIMENSION) {
            settings.vector_dimension = parse_var(ENV_VECTOR_DIMENSION, &raw)?;
        }
        if let Some(raw) = lookup(ENV_MAX_VIDEO_DURATION) {
            settings.sampler.max_duration_secs = parse_var(ENV_MAX_VIDEO_DURATION, &raw)?;
        }
        if let Some(raw) = lookup(ENV_FRAME_SAMPLE_RATE) {
            settings.sampler.frame_rate_hz = parse_var(ENV_FRAME_SAMPLE_RATE, &raw)?;
        }
        if let Some(raw) = lookup(ENV_MIN_FRAME_STD_DEV) {
            settings.sampler.min_std_dev = parse_var(ENV_MIN_FRAME_STD_DEV, &raw)?;
        }
        if let Some(raw) = lookup(ENV_EMBEDDING_MODE) {
            settings.embedding_mode = raw.trim().parse()?;
        }
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.vector_dimension == 0 {
            return Err(IngestError::InvalidConfig(
                "vector dimension must be positive".to_string(),
            ));
        }
        self.sampler
            .validate()
            .map_err(|err| IngestError::InvalidConfig(err.to_string()))
    }
}

fn parse_var<T: FromStr>(key: &str, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|err| IngestError::InvalidConfig(format!("{key}='{raw}': {err}")))
}
