//! Persistence of captures.
//!
//! `UploadPipeline` runs the four strictly ordered steps for one capture;
//! `UploadQueue` fans captures out to a bounded pool of worker threads so
//! the capture thread never waits on the network.

mod pipeline;
mod queue;
mod stats;

pub use pipeline::{StoredCapture, UploadFailure, UploadPipeline, UploadStage};
pub use queue::{BlockingUploads, UploadQueue};
pub use stats::{UploadCounters, UploadStats};
