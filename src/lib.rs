//! Roadscan: detection-triggered road hazard capture.
//!
//! A continuous camera stream is oriented upright, run through an object
//! detector, and every positive detection snapshots the current view,
//! samples the device position, persists the image to blob storage and
//! finally records a structured `DetectionRecord` that references it.
//!
//! # Pipeline
//!
//! ```text
//! source -> LatestFrame -> CaptureWorker (orient -> detect -> capture)
//!                                   |
//!                                   v
//!                        UploadQueue (bounded workers)
//!              local write -> blob put -> url fetch -> record push
//! ```
//!
//! The position slot is written only by the `GeolocationResolver` update
//! callback and read by the capture thread as an immutable snapshot.
//!
//! # Module Structure
//!
//! - `frame`: raw frames, orientation hints, latest-frame-wins slot
//! - `ingest`: pixel normalization, the frame transformer, frame sources
//! - `detect`: detector capability trait, backends, registry, trigger
//! - `geo`: fixes, positioning providers, reverse geocoding, resolver
//! - `capture`: capture orchestration and display surfaces
//! - `store`: detection records, record stores and blob stores
//! - `upload`: ordered upload pipeline and its bounded worker queue
//! - `worker`: the capture thread
//! - `proximity`: nearby hazard alerts for drivers
//! - `config`: daemon configuration
//! - `runtime`: wiring of the above from a configuration

use anyhow::Result;
use std::time::{SystemTime, UNIX_EPOCH};

pub mod capture;
pub mod config;
pub mod detect;
pub mod frame;
pub mod geo;
pub mod ingest;
pub mod proximity;
pub mod runtime;
pub mod store;
pub mod upload;
pub mod worker;

pub use capture::{
    Capture, CaptureOrchestrator, CapturePolicy, CaptureSink, CaptureState, DisplaySurface,
    FrameOutcome, OverlaySurface,
};
pub use config::RoadscanConfig;
pub use detect::{
    BackendRegistry, BoundingBox, Detection, DetectionTrigger, DetectorBackend, TriggerOutcome,
};
pub use frame::{LatestFrame, PixelFormat, RawFrame, Rotation};
pub use geo::{
    GeoFix, GeolocationResolver, Position, PositionProvider, ReverseGeocoder, UNKNOWN,
    UNKNOWN_LOCATION,
};
pub use ingest::orient::upright;
pub use proximity::{HazardAlert, HazardWatch};
pub use runtime::Roadscan;
pub use store::{
    BlobStore, Coordinate, DetectionRecord, FilesystemBlobStore, RecordId, RecordStore,
    SqliteRecordStore, DEFAULT_STATUS,
};
pub use upload::{UploadFailure, UploadPipeline, UploadQueue, UploadStage, UploadStats};
pub use worker::{CaptureWorker, WorkerHandle};

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> Result<u64> {
    let now = SystemTime::now().duration_since(UNIX_EPOCH)?;
    Ok(now.as_millis() as u64)
}
