use crate::error::{FusionError, Result};
use crate::y4m::Y4mVideo;
use std::io::{Read, Write};
use std::path::Path;
use tempfile::NamedTempFile;

pub const DEFAULT_FRAME_RATE_HZ: f64 = 1.0;
pub const DEFAULT_MAX_DURATION_SECS: f64 = 300.0;
/// Frames whose pixel-intensity standard deviation is below this (8-bit scale) are skipped.
pub const DEFAULT_MIN_STD_DEV: f64 = 5.0;

/// A decoded 8-bit RGB raster, row-major, three bytes per pixel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbFrame {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl RgbFrame {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        let expected = (width as usize) * (height as usize) * 3;
        if pixels.len() != expected {
            return Err(FusionError::InvalidVideo(format!(
                "{width}x{height} frame needs {expected} bytes, got {}",
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    #[must_use]
    pub fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let pixels = rgb
            .iter()
            .copied()
            .cycle()
            .take((width as usize) * (height as usize) * 3)
            .collect();
        Self {
            width,
            height,
            pixels,
        }
    }

    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    #[must_use]
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    #[must_use]
    pub fn into_pixels(self) -> Vec<u8> {
        self.pixels
    }

    /// Population standard deviation over every channel value of the frame.
    #[must_use]
    pub fn intensity_std_dev(&self) -> f64 {
        if self.pixels.is_empty() {
            return 0.0;
        }
        let (sum, sum_sq) = self
            .pixels
            .iter()
            .fold((0u64, 0u64), |(sum, sum_sq), &p| {
                let p = u64::from(p);
                (sum + p, sum_sq + p * p)
            });
        let n = self.pixels.len() as f64;
        let mean = sum as f64 / n;
        let variance = (sum_sq as f64 / n - mean * mean).max(0.0);
        variance.sqrt()
    }
}

/// A decoded, seekable video.
pub trait VideoStream {
    /// Frames per second; zero means the stream is unusable.
    fn frame_rate(&self) -> f64;

    fn frame_count(&self) -> u64;

    /// Seek to `index` and decode it. `Ok(None)` past the end of the stream.
    fn read_frame(&mut self, index: u64) -> Result<Option<RgbFrame>>;
}

/// Already-decoded frames held in memory.
#[derive(Debug, Clone)]
pub struct FrameSequence {
    frame_rate: f64,
    frames: Vec<RgbFrame>,
}

impl FrameSequence {
    #[must_use]
    pub const fn new(frame_rate: f64, frames: Vec<RgbFrame>) -> Self {
        Self { frame_rate, frames }
    }
}

impl VideoStream for FrameSequence {
    fn frame_rate(&self) -> f64 {
        self.frame_rate
    }

    fn frame_count(&self) -> u64 {
        self.frames.len() as u64
    }

    fn read_frame(&mut self, index: u64) -> Result<Option<RgbFrame>> {
        Ok(usize::try_from(index)
            .ok()
            .and_then(|i| self.frames.get(i))
            .cloned())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerConfig {
    /// Frames sampled per second of video.
    pub frame_rate_hz: f64,
    /// Only the first `max_duration_secs` of a video are sampled.
    pub max_duration_secs: f64,
    pub min_std_dev: f64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            frame_rate_hz: DEFAULT_FRAME_RATE_HZ,
            max_duration_secs: DEFAULT_MAX_DURATION_SECS,
            min_std_dev: DEFAULT_MIN_STD_DEV,
        }
    }
}

impl SamplerConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.frame_rate_hz.is_finite() || self.frame_rate_hz <= 0.0 {
            return Err(FusionError::InvalidSampleRate(self.frame_rate_hz));
        }
        if !self.max_duration_secs.is_finite() || self.max_duration_secs < 0.0 {
            return Err(FusionError::InvalidConfig(format!(
                "max duration must be a non-negative number of seconds, got {}",
                self.max_duration_secs
            )));
        }
        if !self.min_std_dev.is_finite() || self.min_std_dev < 0.0 {
            return Err(FusionError::InvalidConfig(format!(
                "minimum frame std-dev must be non-negative, got {}",
                self.min_std_dev
            )));
        }
        Ok(())
    }
}

/// Picks a bounded, evenly strided set of informative frames from a video.
#[derive(Debug, Clone, Default)]
pub struct FrameSampler {
    config: SamplerConfig,
}

impl FrameSampler {
    pub fn new(config: SamplerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    #[must_use]
    pub const fn config(&self) -> &SamplerConfig {
        &self.config
    }

    /// Sample frames in stream order. An empty result is valid: the video had no usable frames.
    pub fn sample<S: VideoStream + ?Sized>(&self, stream: &mut S) -> Result<Vec<RgbFrame>> {
        let fps = stream.frame_rate();
        if !fps.is_finite() || fps <= 0.0 {
            return Err(FusionError::InvalidVideo(format!("frame rate is {fps}")));
        }

        let duration_cap = (self.config.max_duration_secs * fps).floor() as u64;
        let budget = stream.frame_count().min(duration_cap);
        let stride = ((fps / self.config.frame_rate_hz).floor() as u64).max(1);

        let mut frames = Vec::new();
        let mut skipped = 0usize;
        let mut index = 0u64;
        while index < budget {
            let Some(frame) = stream.read_frame(index)? else {
                break;
            };
            if frame.intensity_std_dev() < self.config.min_std_dev {
                skipped += 1;
            } else {
                frames.push(frame);
            }
            index += stride;
        }

        log::info!(
            "Extracted {} frames, skipped {skipped} low-variation frames",
            frames.len()
        );
        Ok(frames)
    }

    pub fn sample_path(&self, path: &Path) -> Result<Vec<RgbFrame>> {
        let mut video = Y4mVideo::open(path)?;
        log::debug!(
            "Sampling {} ({}x{}, {:.2} fps, {} frames)",
            path.display(),
            video.width(),
            video.height(),
            video.frame_rate(),
            video.frame_count()
        );
        self.sample(&mut video)
    }
}

/// Uploaded video bytes spooled to a temporary file for decoders that need a path.
///
/// The file is deleted when the spool is dropped, whichever way the owner exits.
#[derive(Debug)]
pub struct SpooledVideo {
    file: NamedTempFile,
}

impl SpooledVideo {
    pub fn from_reader(mut reader: impl Read) -> Result<Self> {
        let mut file = tempfile::Builder::new()
            .prefix("postsearch-video-")
            .suffix(".y4m")
            .tempfile()?;
        std::io::copy(&mut reader, &mut file)?;
        file.flush()?;
        Ok(Self { file })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::from_reader(bytes)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}
