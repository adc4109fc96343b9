//! Raw camera frames and the capture thread's input slot.
//!
//! - `RawFrame`: one camera callback's pixel buffer plus orientation hints.
//! - `LatestFrame`: single-slot handoff between a frame source and the capture
//!   thread. A frame offered while the previous one is still waiting replaces
//!   it, so at most one frame is ever pending (latest-frame-wins).

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

// ----------------------------------------------------------------------------
// Pixel formats and rotation hints
// ----------------------------------------------------------------------------

/// Pixel layout of a `RawFrame` buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    /// 4 bytes per pixel, the camera analyzer's native output.
    #[default]
    Rgba8888,
    Rgb24,
    Nv12,
}

impl PixelFormat {
    /// Expected buffer length for a `width` x `height` frame.
    pub fn expected_len(self, width: u32, height: u32) -> Result<usize> {
        let pixels = (width as usize)
            .checked_mul(height as usize)
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        let len = match self {
            PixelFormat::Rgba8888 => pixels.checked_mul(4),
            PixelFormat::Rgb24 => pixels.checked_mul(3),
            PixelFormat::Nv12 => nv12_chroma_len(width, height)
                .and_then(|chroma| pixels.checked_add(chroma)),
        };
        len.ok_or_else(|| anyhow!("frame dimensions overflow"))
    }
}

/// Bytes per row of the interleaved NV12 chroma plane. Odd widths round up.
pub(crate) fn nv12_chroma_stride(width: u32) -> usize {
    2 * (width as usize).div_ceil(2)
}

fn nv12_chroma_len(width: u32, height: u32) -> Option<usize> {
    nv12_chroma_stride(width).checked_mul((height as usize).div_ceil(2))
}

/// Clockwise rotation that brings a sensor frame upright.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub const ALL: [Rotation; 4] = [
        Rotation::Deg0,
        Rotation::Deg90,
        Rotation::Deg180,
        Rotation::Deg270,
    ];

    pub fn from_degrees(degrees: u32) -> Result<Self> {
        match degrees {
            0 => Ok(Rotation::Deg0),
            90 => Ok(Rotation::Deg90),
            180 => Ok(Rotation::Deg180),
            270 => Ok(Rotation::Deg270),
            other => Err(anyhow!(
                "rotation must be one of 0, 90, 180, 270 (got {})",
                other
            )),
        }
    }

    pub fn degrees(self) -> u32 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }

    /// The rotation that undoes this one.
    pub fn inverse(self) -> Self {
        match self {
            Rotation::Deg0 => Rotation::Deg0,
            Rotation::Deg90 => Rotation::Deg270,
            Rotation::Deg180 => Rotation::Deg180,
            Rotation::Deg270 => Rotation::Deg90,
        }
    }

    pub fn swaps_dimensions(self) -> bool {
        matches!(self, Rotation::Deg90 | Rotation::Deg270)
    }
}

// ----------------------------------------------------------------------------
// RawFrame
// ----------------------------------------------------------------------------

/// A frame as delivered by a camera callback.
///
/// The buffer length is validated against `format` at construction, so the
/// frame transformer downstream can assume a well-formed buffer. The frame
/// is exclusively owned by whoever processes it and is dropped once the
/// detection and capture decisions for it are made.
pub struct RawFrame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub rotation: Rotation,
    /// Front camera frames are mirrored horizontally after rotation.
    pub mirrored: bool,
    received_at: Instant,
}

impl RawFrame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, format: PixelFormat) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(anyhow!("frame dimensions must be non-zero"));
        }
        let expected = format.expected_len(width, height)?;
        if data.len() != expected {
            return Err(anyhow!(
                "{:?} frame length mismatch: expected {}, got {}",
                format,
                expected,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            format,
            rotation: Rotation::Deg0,
            mirrored: false,
            received_at: Instant::now(),
        })
    }

    pub fn with_orientation(mut self, rotation: Rotation, mirrored: bool) -> Self {
        self.rotation = rotation;
        self.mirrored = mirrored;
        self
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn age(&self) -> Duration {
        self.received_at.elapsed()
    }
}

// ----------------------------------------------------------------------------
// LatestFrame: single-slot, latest-frame-wins handoff
// ----------------------------------------------------------------------------

#[derive(Default)]
struct Slot {
    frame: Option<RawFrame>,
    closed: bool,
    replaced: u64,
}

/// Single pending-frame slot shared by a frame source and the capture thread.
#[derive(Default)]
pub struct LatestFrame {
    slot: Mutex<Slot>,
    ready: Condvar,
}

impl LatestFrame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a frame. Returns `true` when it displaced a frame that was never
    /// picked up. Frames offered after `close` are discarded.
    pub fn offer(&self, frame: RawFrame) -> Result<bool> {
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| anyhow!("frame slot lock poisoned"))?;
        if slot.closed {
            return Ok(false);
        }
        let displaced = slot.frame.replace(frame).is_some();
        if displaced {
            slot.replaced += 1;
        }
        drop(slot);
        self.ready.notify_one();
        Ok(displaced)
    }

    /// Wait up to `timeout` for a frame. Returns `Ok(None)` on timeout or once
    /// the slot is closed and empty.
    pub fn take_timeout(&self, timeout: Duration) -> Result<Option<RawFrame>> {
        let slot = self
            .slot
            .lock()
            .map_err(|_| anyhow!("frame slot lock poisoned"))?;
        let (mut slot, _) = self
            .ready
            .wait_timeout_while(slot, timeout, |s| s.frame.is_none() && !s.closed)
            .map_err(|_| anyhow!("frame slot lock poisoned"))?;
        Ok(slot.frame.take())
    }

    /// Stop accepting frames and wake the consumer.
    pub fn close(&self) {
        if let Ok(mut slot) = self.slot.lock() {
            slot.closed = true;
        }
        self.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.slot.lock().map(|s| s.closed).unwrap_or(true)
    }

    /// Number of frames dropped because a newer frame replaced them.
    pub fn dropped(&self) -> u64 {
        self.slot.lock().map(|s| s.replaced).unwrap_or(0)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
