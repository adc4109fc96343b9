use image::RgbaImage;

use super::registry::SharedBackend;
use super::result::Detection;

/// Classification of one detector invocation.
#[derive(Clone, Debug, PartialEq)]
pub enum TriggerOutcome {
    /// Detector ran and found nothing.
    Empty(Detection),
    /// Detector ran and found at least one box.
    Detected(Detection),
    /// Detector missing, not set up, or failed for this frame.
    Unavailable,
}

impl TriggerOutcome {
    pub fn detection(&self) -> Option<&Detection> {
        match self {
            TriggerOutcome::Empty(d) | TriggerOutcome::Detected(d) => Some(d),
            TriggerOutcome::Unavailable => None,
        }
    }
}

/// Runs the injected detector on each upright frame.
///
/// Inference is opportunistic: a missing or failing detector yields
/// `TriggerOutcome::Unavailable` for that frame and never an error.
#[derive(Clone, Default)]
pub struct DetectionTrigger {
    backend: Option<SharedBackend>,
}

impl DetectionTrigger {
    pub fn new(backend: SharedBackend) -> Self {
        Self {
            backend: Some(backend),
        }
    }

    /// A trigger with no detector attached; every frame is `Unavailable`.
    pub fn unavailable() -> Self {
        Self { backend: None }
    }

    pub fn detect(&self, image: &RgbaImage) -> TriggerOutcome {
        let Some(backend) = &self.backend else {
            return TriggerOutcome::Unavailable;
        };
        let mut guard = match backend.lock() {
            Ok(guard) => guard,
            Err(_) => {
                log::error!("detector backend lock poisoned");
                return TriggerOutcome::Unavailable;
            }
        };
        if !guard.is_ready() {
            log::debug!("detector '{}' not ready; skipping frame", guard.name());
            return TriggerOutcome::Unavailable;
        }
        match guard.detect(image) {
            Ok(detection) => {
                log::debug!(
                    "inference {}ms boxes={}",
                    detection.inference_time.as_millis(),
                    detection.boxes.len()
                );
                if detection.is_empty() {
                    TriggerOutcome::Empty(detection)
                } else {
                    TriggerOutcome::Detected(detection)
                }
            }
            Err(err) => {
                log::warn!("detector '{}' unavailable: {}", guard.name(), err);
                TriggerOutcome::Unavailable
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::backend::DetectorBackend;
    use crate::detect::backends::StubBackend;
    use crate::detect::result::BoundingBox;
    use std::sync::{Arc, Mutex};

    #[test]
    fn classifies_empty_and_detected() {
        let mut stub = StubBackend::scripted(vec![
            vec![],
            vec![BoundingBox::new(0.1, 0.1, 0.3, 0.3, 0.8, "pothole")],
        ]);
        stub.setup(false).unwrap();
        let trigger = DetectionTrigger::new(Arc::new(Mutex::new(stub)));
        let image = RgbaImage::new(4, 4);

        assert!(matches!(trigger.detect(&image), TriggerOutcome::Empty(_)));
        assert!(matches!(trigger.detect(&image), TriggerOutcome::Detected(_)));
    }

    #[test]
    fn detector_without_setup_is_unavailable() {
        let trigger = DetectionTrigger::new(Arc::new(Mutex::new(StubBackend::new())));
        let image = RgbaImage::new(4, 4);
        assert_eq!(trigger.detect(&image), TriggerOutcome::Unavailable);
        assert_eq!(
            DetectionTrigger::unavailable().detect(&image),
            TriggerOutcome::Unavailable
        );
    }
}
