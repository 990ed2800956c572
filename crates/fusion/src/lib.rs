//! # Post Fusion
//!
//! Turns the raw material of a post into one embedding.
//!
//! ```text
//! video ──> FrameSampler ──> frames ──> frame encoder ─┐
//! images ─────────────────────────────> image encoder ─┼─> EmbeddingFuser ──> unit vector
//! text / transcript ──────────────────> text encoder ──┘
//! ```
//!
//! Encoders live outside this crate; the sampler and fuser are pure and safe to run in parallel
//! across posts.

mod error;
mod frames;
mod fuser;
mod y4m;

pub use error::{FusionError, Result};
pub use frames::{
    FrameSampler, FrameSequence, RgbFrame, SamplerConfig, SpooledVideo, VideoStream,
    DEFAULT_FRAME_RATE_HZ, DEFAULT_MAX_DURATION_SECS, DEFAULT_MIN_STD_DEV,
};
pub use fuser::EmbeddingFuser;
pub use y4m::Y4mVideo;
