//! Synthetic frame source.
//!
//! Produces a road-gray gradient; every `patch_every`-th frame carries a dark
//! elliptical patch so the CPU backend has something to find.

use anyhow::Result;
use std::time::Instant;

use super::{frame_interval, FrameSource};
use crate::frame::{PixelFormat, RawFrame, Rotation};

pub struct StubSource {
    width: u32,
    height: u32,
    target_fps: u32,
    patch_every: u64,
    rotation: Rotation,
    limit: Option<u64>,
    last_frame_at: Option<Instant>,
    frame_count: u64,
}

impl StubSource {
    pub fn new(width: u32, height: u32, target_fps: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            target_fps,
            patch_every: 25,
            rotation: Rotation::Deg0,
            limit: None,
            last_frame_at: None,
            frame_count: 0,
        }
    }

    /// Emit a patch every `n` frames; 0 never emits one.
    pub fn with_patch_every(mut self, n: u64) -> Self {
        self.patch_every = n;
        self
    }

    pub fn with_rotation(mut self, rotation: Rotation) -> Self {
        self.rotation = rotation;
        self
    }

    /// Stop after `n` frames.
    pub fn with_limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    fn render(&self, with_patch: bool) -> Vec<u8> {
        let (w, h) = (self.width as f32, self.height as f32);
        let (cx, cy) = (w * 0.5, h * 0.7);
        let (rx, ry) = ((w * 0.12).max(1.0), (h * 0.06).max(1.0));
        let mut data = Vec::with_capacity((self.width * self.height * 4) as usize);
        for y in 0..self.height {
            let base = 110.0 + 40.0 * (y as f32 / h);
            for x in 0..self.width {
                let dx = (x as f32 - cx) / rx;
                let dy = (y as f32 - cy) / ry;
                let value = if with_patch && dx * dx + dy * dy <= 1.0 {
                    25.0
                } else {
                    base
                } as u8;
                data.extend_from_slice(&[value, value, value, 255]);
            }
        }
        data
    }
}

impl FrameSource for StubSource {
    fn describe(&self) -> String {
        format!("stub://{}x{}", self.width, self.height)
    }

    fn next_frame(&mut self) -> Result<Option<RawFrame>> {
        if self.limit.is_some_and(|limit| self.frame_count >= limit) {
            return Ok(None);
        }
        let min_interval = frame_interval(self.target_fps);
        if let Some(last) = self.last_frame_at {
            let elapsed = last.elapsed();
            if elapsed < min_interval {
                std::thread::sleep(min_interval - elapsed);
            }
        }
        self.last_frame_at = Some(Instant::now());
        self.frame_count += 1;

        let with_patch = self.patch_every > 0 && self.frame_count % self.patch_every == 0;
        let frame = RawFrame::new(
            self.render(with_patch),
            self.width,
            self.height,
            PixelFormat::Rgba8888,
        )?
        .with_orientation(self.rotation, false);
        Ok(Some(frame))
    }

    fn frames_captured(&self) -> u64 {
        self.frame_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stops_at_limit() -> Result<()> {
        let mut source = StubSource::new(8, 6, 0).with_limit(3);
        let mut count = 0;
        while source.next_frame()?.is_some() {
            count += 1;
        }
        assert_eq!(count, 3);
        Ok(())
    }

    #[test]
    fn patch_frames_are_darker() -> Result<()> {
        let mut source = StubSource::new(40, 30, 0).with_patch_every(2);
        let plain = source.next_frame()?.expect("frame");
        let patched = source.next_frame()?.expect("frame");
        let sum = |f: &RawFrame| f.pixels().iter().map(|&p| p as u64).sum::<u64>();
        assert!(sum(&patched) < sum(&plain));
        Ok(())
    }
}
