//! Model seams. Real CLIP/Whisper backends implement these traits; the stub backend gives
//! deterministic vectors so the pipeline runs without model weights.
//!
//! Every method is blocking; [`crate::IngestService`] calls them from a blocking worker.

use crate::error::Result;
use crate::settings::EmbeddingMode;
use postsearch_fusion::RgbFrame;
use std::path::Path;
use std::sync::Arc;

pub trait ImageEncoder: Send + Sync {
    /// Embed an encoded image file (JPEG, PNG, ...).
    fn encode_image(&self, image: &[u8]) -> Result<Vec<f32>>;
}

pub trait FrameEncoder: Send + Sync {
    fn encode_frame(&self, frame: &RgbFrame) -> Result<Vec<f32>>;
}

pub trait TextEncoder: Send + Sync {
    fn encode_text(&self, text: &str) -> Result<Vec<f32>>;
}

pub trait Transcriber: Send + Sync {
    /// Speech in the video's audio track, `None` if there is nothing to transcribe.
    fn transcribe(&self, video: &Path) -> Result<Option<String>>;
}

/// The full set of model backends used by ingestion.
#[derive(Clone)]
pub struct Encoders {
    pub image: Arc<dyn ImageEncoder>,
    pub frame: Arc<dyn FrameEncoder>,
    pub text: Arc<dyn TextEncoder>,
    pub transcriber: Arc<dyn Transcriber>,
}

impl Encoders {
    #[must_use]
    pub fn for_mode(mode: EmbeddingMode, dimension: usize) -> Self {
        match mode {
            EmbeddingMode::Stub => Self::stub(dimension),
        }
    }

    #[must_use]
    pub fn stub(dimension: usize) -> Self {
        let stub = Arc::new(StubEncoder::new(dimension));
        Self {
            image: stub.clone(),
            frame: stub.clone(),
            text: stub.clone(),
            transcriber: stub,
        }
    }
}

/// Hash-seeded pseudo-random unit vectors: equal inputs give equal vectors.
#[derive(Clone, Debug)]
pub struct StubEncoder {
    dimension: usize,
}

impl StubEncoder {
    #[must_use]
    pub const fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    #[must_use]
    pub const fn dimension(&self) -> usize {
        self.dimension
    }
}

impl ImageEncoder for StubEncoder {
    fn encode_image(&self, image: &[u8]) -> Result<Vec<f32>> {
        Ok(stub_embed(b"image", image, self.dimension))
    }
}

impl FrameEncoder for StubEncoder {
    fn encode_frame(&self, frame: &RgbFrame) -> Result<Vec<f32>> {
        // Frames and still images share one embedding space.
        Ok(stub_embed(b"image", frame.pixels(), self.dimension))
    }
}

impl TextEncoder for StubEncoder {
    fn encode_text(&self, text: &str) -> Result<Vec<f32>> {
        Ok(stub_embed(b"text", text.as_bytes(), self.dimension))
    }
}

impl Transcriber for StubEncoder {
    fn transcribe(&self, _video: &Path) -> Result<Option<String>> {
        Ok(None)
    }
}

fn stub_embed(domain: &[u8], bytes: &[u8], dimension: usize) -> Vec<f32> {
    let mut state = fnv1a_64(domain, bytes) ^ (dimension as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    let mut vec = Vec::with_capacity(dimension);
    for _ in 0..dimension {
        let bits = splitmix64(&mut state);
        let high = (bits >> 32) as u32;
        let mantissa = high >> 9;
        let unit = f32::from_bits(0x3f80_0000 | mantissa) - 1.0;
        vec.push(unit.mul_add(2.0, -1.0));
    }
    normalize(&mut vec);
    vec
}

fn normalize(vec: &mut [f32]) {
    let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vec {
            *v /= norm;
        }
    }
}

fn fnv1a_64(domain: &[u8], bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in domain.iter().chain([0u8].iter()).chain(bytes) {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_vectors_are_deterministic_unit_vectors() {
        let encoder = StubEncoder::new(32);
        let a = encoder.encode_text("hello").unwrap();
        let b = encoder.encode_text("hello").unwrap();
        let c = encoder.encode_text("goodbye").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 32);
        let norm = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn modalities_are_domain_separated() {
        let encoder = StubEncoder::new(16);
        assert_ne!(
            encoder.encode_text("abc").unwrap(),
            encoder.encode_image(b"abc").unwrap()
        );
    }

    #[test]
    fn frames_match_images_with_same_pixels() {
        let encoder = StubEncoder::new(16);
        let frame = RgbFrame::solid(2, 1, [1, 2, 3]);
        assert_eq!(
            encoder.encode_frame(&frame).unwrap(),
            encoder.encode_image(frame.pixels()).unwrap()
        );
    }
}
