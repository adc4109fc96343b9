//! Frame ingestion and the frame transformer.
//!
//! This module provides:
//! - Pixel normalization of camera buffers to RGBA (`normalize`)
//! - The frame transformer that bakes rotation and mirroring into the
//!   pixels (`orient`)
//! - Frame sources: a directory replay source and a synthetic stub source
//!
//! Sources produce `RawFrame` instances that are offered to the capture
//! thread's `LatestFrame` slot. Camera acquisition itself lives outside
//! this crate; any producer of `RawFrame` can drive the pipeline.

pub mod directory;
pub mod normalize;
pub mod orient;
pub mod stub;

use anyhow::Result;
use std::time::Duration;

use crate::frame::RawFrame;

pub use directory::{DirectoryConfig, DirectorySource};
pub use stub::StubSource;

/// A producer of raw frames.
pub trait FrameSource: Send {
    /// Source identifier for logging.
    fn describe(&self) -> String;

    /// Next frame, or `Ok(None)` once the source is exhausted.
    fn next_frame(&mut self) -> Result<Option<RawFrame>>;

    /// Frames produced so far.
    fn frames_captured(&self) -> u64;
}

/// Minimum spacing between frames for a target rate. Zero disables pacing.
pub(crate) fn frame_interval(target_fps: u32) -> Duration {
    if target_fps == 0 {
        Duration::from_millis(0)
    } else {
        Duration::from_millis((1000 / target_fps).max(1) as u64)
    }
}
