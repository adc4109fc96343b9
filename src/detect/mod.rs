mod backend;
mod backends;
mod registry;
mod result;
mod trigger;

pub use backend::DetectorBackend;
pub use backends::{CpuBackend, StubBackend};
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use registry::{BackendRegistry, SharedBackend};
pub use result::{non_max_suppression, BoundingBox, Detection};
pub use trigger::{DetectionTrigger, TriggerOutcome};
