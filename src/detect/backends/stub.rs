use anyhow::{anyhow, Result};
use image::RgbaImage;
use std::collections::VecDeque;
use std::time::Duration;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, Detection};

/// Scripted backend for tests and replays.
///
/// Returns queued results in order; once the script runs out every frame
/// yields the fallback boxes (empty by default).
pub struct StubBackend {
    script: VecDeque<Vec<BoundingBox>>,
    fallback: Vec<BoundingBox>,
    inference_time: Duration,
    ready: bool,
    calls: u64,
}

impl StubBackend {
    pub fn new() -> Self {
        Self {
            script: VecDeque::new(),
            fallback: Vec::new(),
            inference_time: Duration::from_millis(1),
            ready: false,
            calls: 0,
        }
    }

    /// Results returned for the next frames, in order.
    pub fn scripted(results: Vec<Vec<BoundingBox>>) -> Self {
        Self {
            script: results.into(),
            ..Self::new()
        }
    }

    /// Every frame yields `boxes`.
    pub fn always(boxes: Vec<BoundingBox>) -> Self {
        Self {
            fallback: boxes,
            ..Self::new()
        }
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn supports_acceleration(&self) -> bool {
        true
    }

    fn setup(&mut self, _accelerated: bool) -> Result<()> {
        self.ready = true;
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready
    }

    fn detect(&mut self, _image: &RgbaImage) -> Result<Detection> {
        if !self.ready {
            return Err(anyhow!("stub backend not set up"));
        }
        self.calls += 1;
        let boxes = self
            .script
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        Ok(Detection::new(boxes, self.inference_time))
    }

    fn close(&mut self) {
        self.ready = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_requires_setup_and_follows_script() {
        let image = RgbaImage::new(2, 2);
        let mut backend = StubBackend::scripted(vec![vec![BoundingBox::new(
            0.1, 0.1, 0.2, 0.2, 0.9, "pothole",
        )]]);
        assert!(backend.detect(&image).is_err());

        backend.setup(false).unwrap();
        assert_eq!(backend.detect(&image).unwrap().boxes.len(), 1);
        assert!(backend.detect(&image).unwrap().is_empty());

        backend.close();
        assert!(!backend.is_ready());
        assert!(backend.detect(&image).is_err());
        assert_eq!(backend.calls(), 2);
    }
}
