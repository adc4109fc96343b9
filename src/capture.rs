//! Capture orchestration.
//!
//! Per frame: `Idle -> Detecting -> {Empty | Detected}`. A detection moves
//! to `Capturing` (snapshot the display surface, sample the cached fix) and
//! then `Persisting` (hand the capture to the sink) before returning to
//! `Idle`. Persistence is fire-and-forget; the orchestrator never waits for
//! an upload.

use anyhow::{anyhow, Result};
use image::{Rgba, RgbaImage};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::detect::{BoundingBox, Detection, DetectionTrigger, TriggerOutcome};
use crate::geo::{GeoFix, GeolocationResolver};
use crate::now_ms;

/// One snapshot selected for persistence.
#[derive(Clone, Debug)]
pub struct Capture {
    /// `<epochMillis>.png`, unique per process.
    pub filename: String,
    pub image: RgbaImage,
    pub fix: Arc<GeoFix>,
    pub detection: Detection,
    pub captured_at_ms: u64,
}

/// Receives captures for persistence. Must not block on the upload itself.
pub trait CaptureSink: Send + Sync {
    fn submit(&self, capture: Capture) -> Result<()>;
}

/// Yields strictly increasing millisecond stamps so two captures in the same
/// millisecond still get distinct filenames.
#[derive(Debug, Default)]
pub struct FilenameClock {
    last_ms: u64,
}

impl FilenameClock {
    pub fn next_ms(&mut self, now_ms: u64) -> u64 {
        let ms = now_ms.max(self.last_ms + 1);
        self.last_ms = ms;
        ms
    }
}

pub fn capture_filename(ms: u64) -> String {
    format!("{}.png", ms)
}

// ----------------------------------------------------------------------------
// Display surfaces
// ----------------------------------------------------------------------------

/// What the user sees: the upright frame plus detection overlay.
pub trait DisplaySurface: Send + Sync {
    fn present(&self, image: &RgbaImage, detection: &Detection);

    /// Current visual content, or `None` when the surface has been released.
    fn snapshot(&self) -> Option<RgbaImage>;
}

#[derive(Default)]
struct OverlayState {
    frame: Option<RgbaImage>,
    boxes: Vec<BoundingBox>,
}

/// Keeps the latest frame and draws box outlines over it on snapshot.
pub struct OverlaySurface {
    state: Mutex<OverlayState>,
    color: Rgba<u8>,
    thickness: u32,
}

impl Default for OverlaySurface {
    fn default() -> Self {
        Self {
            state: Mutex::new(OverlayState::default()),
            color: Rgba([255, 0, 0, 255]),
            thickness: 2,
        }
    }
}

impl OverlaySurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_color(mut self, color: Rgba<u8>) -> Self {
        self.color = color;
        self
    }

    /// Release the current content. Snapshots fail until the next frame.
    pub fn invalidate(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.frame = None;
            state.boxes.clear();
        }
    }
}

impl DisplaySurface for OverlaySurface {
    fn present(&self, image: &RgbaImage, detection: &Detection) {
        match self.state.lock() {
            Ok(mut state) => {
                state.frame = Some(image.clone());
                state.boxes = detection.boxes.clone();
            }
            Err(_) => log::error!("overlay lock poisoned"),
        }
    }

    fn snapshot(&self) -> Option<RgbaImage> {
        let state = self.state.lock().ok()?;
        let mut image = state.frame.clone()?;
        for bbox in &state.boxes {
            draw_outline(&mut image, bbox, self.color, self.thickness);
        }
        Some(image)
    }
}

fn draw_outline(image: &mut RgbaImage, bbox: &BoundingBox, color: Rgba<u8>, thickness: u32) {
    let (width, height) = image.dimensions();
    let (x, y, w, h) = bbox.to_pixels(width, height);
    if w == 0 || h == 0 {
        return;
    }
    let x_end = (x + w).min(width);
    let y_end = (y + h).min(height);
    for py in y..y_end {
        for px in x..x_end {
            let edge = px < x + thickness
                || px + thickness >= x_end
                || py < y + thickness
                || py + thickness >= y_end;
            if edge {
                image.put_pixel(px, py, color);
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Orchestrator
// ----------------------------------------------------------------------------

/// When a detection is allowed to become a capture.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CapturePolicy {
    /// Every non-empty detection triggers a capture attempt.
    #[default]
    EveryDetection,
    /// Ignore detections within this window of the previous capture.
    Cooldown(Duration),
}

impl CapturePolicy {
    pub fn from_cooldown_ms(ms: u64) -> Self {
        if ms == 0 {
            CapturePolicy::EveryDetection
        } else {
            CapturePolicy::Cooldown(Duration::from_millis(ms))
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Detecting,
    Capturing,
    Persisting,
}

/// What happened to one frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    NoDetection,
    DetectorUnavailable,
    /// Detection inside the cooldown window.
    Suppressed,
    /// The surface was released before it could be snapshotted.
    SnapshotUnavailable,
    Submitted { filename: String },
    /// The sink refused the capture (e.g. upload queue full).
    Rejected { filename: String },
}

pub struct CaptureOrchestrator {
    trigger: DetectionTrigger,
    surface: Arc<dyn DisplaySurface>,
    resolver: Arc<GeolocationResolver>,
    sink: Arc<dyn CaptureSink>,
    policy: CapturePolicy,
    clock: FilenameClock,
    last_capture: Option<Instant>,
    state: CaptureState,
}

impl CaptureOrchestrator {
    pub fn new(
        trigger: DetectionTrigger,
        surface: Arc<dyn DisplaySurface>,
        resolver: Arc<GeolocationResolver>,
        sink: Arc<dyn CaptureSink>,
    ) -> Self {
        Self {
            trigger,
            surface,
            resolver,
            sink,
            policy: CapturePolicy::default(),
            clock: FilenameClock::default(),
            last_capture: None,
            state: CaptureState::Idle,
        }
    }

    pub fn with_policy(mut self, policy: CapturePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    /// Run one upright frame through detection and, on a hit, capture.
    pub fn process(&mut self, image: &RgbaImage) -> FrameOutcome {
        self.state = CaptureState::Detecting;
        let outcome = match self.trigger.detect(image) {
            TriggerOutcome::Unavailable => {
                self.surface.present(image, &Detection::default());
                FrameOutcome::DetectorUnavailable
            }
            TriggerOutcome::Empty(detection) => {
                self.surface.present(image, &detection);
                FrameOutcome::NoDetection
            }
            TriggerOutcome::Detected(detection) => {
                self.surface.present(image, &detection);
                self.capture(detection)
            }
        };
        self.state = CaptureState::Idle;
        outcome
    }

    fn suppressed(&self, now: Instant) -> bool {
        match (self.policy, self.last_capture) {
            (CapturePolicy::Cooldown(window), Some(last)) => now.duration_since(last) < window,
            _ => false,
        }
    }

    fn capture(&mut self, detection: Detection) -> FrameOutcome {
        let now = Instant::now();
        if self.suppressed(now) {
            log::debug!("detection inside capture cooldown; skipped");
            return FrameOutcome::Suppressed;
        }

        self.state = CaptureState::Capturing;
        let Some(image) = self.surface.snapshot() else {
            log::warn!("display surface released before snapshot; capture abandoned");
            return FrameOutcome::SnapshotUnavailable;
        };
        let fix = self.resolver.sample();
        let captured_at_ms = self.clock.next_ms(now_ms().unwrap_or_default());
        let filename = capture_filename(captured_at_ms);
        self.last_capture = Some(now);

        self.state = CaptureState::Persisting;
        let capture = Capture {
            filename: filename.clone(),
            image,
            fix,
            detection,
            captured_at_ms,
        };
        let boxes = capture.detection.boxes.len();
        match self.sink.submit(capture) {
            Ok(()) => {
                log::info!("capture {} submitted ({} boxes)", filename, boxes);
                FrameOutcome::Submitted { filename }
            }
            Err(err) => {
                log::warn!("capture {} not submitted: {:#}", filename, err);
                FrameOutcome::Rejected { filename }
            }
        }
    }
}

/// Sink that keeps captures in memory; used by replays and tests.
#[derive(Default)]
pub struct CollectingSink {
    captures: Mutex<Vec<Capture>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Result<Vec<Capture>> {
        let mut captures = self
            .captures
            .lock()
            .map_err(|_| anyhow!("capture list lock poisoned"))?;
        Ok(std::mem::take(&mut *captures))
    }
}

impl CaptureSink for CollectingSink {
    fn submit(&self, capture: Capture) -> Result<()> {
        self.captures
            .lock()
            .map_err(|_| anyhow!("capture list lock poisoned"))?
            .push(capture);
        Ok(())
    }
}
