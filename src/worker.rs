//! The capture thread.
//!
//! One dedicated thread drains the `LatestFrame` slot strictly sequentially:
//! orient, detect, capture. Frames that arrive while one is in flight
//! replace each other in the slot and are never queued.

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::capture::{CaptureOrchestrator, FrameOutcome};
use crate::frame::{LatestFrame, RawFrame};
use crate::ingest::orient::upright;

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const PROGRESS_EVERY: u64 = 100;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub processed: u64,
    pub captures: u64,
    pub rejected: u64,
    pub unavailable: u64,
    pub abandoned: u64,
    /// Frames replaced in the slot before the worker picked them up.
    pub dropped: u64,
}

#[derive(Default)]
struct WorkerCounters {
    processed: AtomicU64,
    captures: AtomicU64,
    rejected: AtomicU64,
    unavailable: AtomicU64,
    abandoned: AtomicU64,
}

impl WorkerCounters {
    fn record(&self, outcome: &FrameOutcome) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        let counter = match outcome {
            FrameOutcome::Submitted { .. } => &self.captures,
            FrameOutcome::Rejected { .. } => &self.rejected,
            FrameOutcome::DetectorUnavailable => &self.unavailable,
            FrameOutcome::SnapshotUnavailable => &self.abandoned,
            FrameOutcome::NoDetection | FrameOutcome::Suppressed => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Orient one raw frame and run it through the orchestrator.
pub fn process_frame(orchestrator: &mut CaptureOrchestrator, frame: &RawFrame) -> FrameOutcome {
    let image = upright(frame);
    orchestrator.process(&image)
}

pub struct CaptureWorker;

impl CaptureWorker {
    pub fn spawn(slot: Arc<LatestFrame>, mut orchestrator: CaptureOrchestrator) -> Result<WorkerHandle> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(WorkerCounters::default());
        let thread_shutdown = shutdown.clone();
        let thread_slot = slot.clone();
        let thread_counters = counters.clone();

        let join = std::thread::Builder::new()
            .name("capture".to_string())
            .spawn(move || {
                while !thread_shutdown.load(Ordering::SeqCst) {
                    let frame = match thread_slot.take_timeout(POLL_INTERVAL) {
                        Ok(Some(frame)) => frame,
                        Ok(None) if thread_slot.is_closed() => break,
                        Ok(None) => continue,
                        Err(err) => {
                            log::error!("capture worker stopping: {}", err);
                            break;
                        }
                    };
                    let outcome = process_frame(&mut orchestrator, &frame);
                    thread_counters.record(&outcome);
                    let processed = thread_counters.processed.load(Ordering::Relaxed);
                    if processed % PROGRESS_EVERY == 0 {
                        log::debug!(
                            "capture worker: {} frames processed, {} dropped",
                            processed,
                            thread_slot.dropped()
                        );
                    }
                }
                log::info!("capture worker stopped");
            })
            .context("spawn capture worker")?;

        Ok(WorkerHandle {
            shutdown,
            slot,
            counters,
            join: Some(join),
        })
    }
}

pub struct WorkerHandle {
    shutdown: Arc<AtomicBool>,
    slot: Arc<LatestFrame>,
    counters: Arc<WorkerCounters>,
    join: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn stats(&self) -> WorkerStats {
        let c = &self.counters;
        WorkerStats {
            processed: c.processed.load(Ordering::Relaxed),
            captures: c.captures.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
            unavailable: c.unavailable.load(Ordering::Relaxed),
            abandoned: c.abandoned.load(Ordering::Relaxed),
            dropped: self.slot.dropped(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map_or(true, |j| j.is_finished())
    }

    /// Finish the frame in flight, then stop. A pending frame in the slot is
    /// discarded.
    pub fn stop(mut self) -> Result<WorkerStats> {
        self.shutdown.store(true, Ordering::SeqCst);
        self.slot.close();
        if let Some(join) = self.join.take() {
            join.join().map_err(|_| anyhow!("capture worker panicked"))?;
        }
        Ok(self.stats())
    }

    /// Wait for the worker to drain a closed slot.
    pub fn join(mut self) -> Result<WorkerStats> {
        if let Some(join) = self.join.take() {
            join.join().map_err(|_| anyhow!("capture worker panicked"))?;
        }
        Ok(self.stats())
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CollectingSink, OverlaySurface};
    use crate::detect::{BoundingBox, DetectionTrigger, DetectorBackend, SharedBackend, StubBackend};
    use crate::frame::PixelFormat;
    use crate::geo::{GeolocationResolver, NoGeocoder, StaticPositionProvider};
    use std::sync::Mutex;

    fn orchestrator(sink: Arc<CollectingSink>) -> CaptureOrchestrator {
        let mut backend =
            StubBackend::always(vec![BoundingBox::new(0.2, 0.2, 0.6, 0.6, 0.8, "pothole")]);
        backend.setup(false).unwrap();
        let shared: SharedBackend = Arc::new(Mutex::new(backend));
        let resolver = GeolocationResolver::new(
            Arc::new(StaticPositionProvider::default()),
            Arc::new(NoGeocoder),
        );
        CaptureOrchestrator::new(
            DetectionTrigger::new(shared),
            Arc::new(OverlaySurface::new()),
            Arc::new(resolver),
            sink,
        )
    }

    fn frame() -> RawFrame {
        RawFrame::new(vec![128; 8 * 4 * 4], 8, 4, PixelFormat::Rgba8888).unwrap()
    }

    #[test]
    fn worker_drains_slot_and_counts() -> Result<()> {
        let slot = Arc::new(LatestFrame::new());
        let sink = Arc::new(CollectingSink::new());
        let handle = CaptureWorker::spawn(slot.clone(), orchestrator(sink.clone()))?;

        slot.offer(frame())?;
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while handle.stats().processed == 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        let stats = handle.stop()?;
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.captures, 1);
        assert_eq!(sink.take()?.len(), 1);
        Ok(())
    }

    #[test]
    fn closed_slot_ends_worker() -> Result<()> {
        let slot = Arc::new(LatestFrame::new());
        let sink = Arc::new(CollectingSink::new());
        let handle = CaptureWorker::spawn(slot.clone(), orchestrator(sink))?;
        slot.close();
        let stats = handle.join()?;
        assert_eq!(stats.processed, 0);
        Ok(())
    }

    #[test]
    fn process_frame_orients_before_detecting() {
        let sink = Arc::new(CollectingSink::new());
        let mut orchestrator = orchestrator(sink.clone());
        let frame = frame().with_orientation(crate::frame::Rotation::Deg90, false);
        assert!(matches!(
            process_frame(&mut orchestrator, &frame),
            FrameOutcome::Submitted { .. }
        ));
        let captures = sink.take().unwrap();
        assert_eq!(captures[0].image.dimensions(), (4, 8));
    }
}
