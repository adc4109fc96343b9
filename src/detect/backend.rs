use anyhow::Result;
use image::RgbaImage;

use crate::detect::result::Detection;

/// Detector capability: configure a backend, detect, release.
///
/// Backends are injected, never subclassed. Each implementation declares
/// whether it can run on an accelerated execution target; the registry picks
/// CPU or accelerated at configuration time.
///
/// `detect` is only valid between `setup` and `close`. Calling it outside
/// that window must return an error, which the trigger reports as
/// "detector unavailable" rather than failing the capture thread.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Whether `setup(true)` can succeed on this backend.
    fn supports_acceleration(&self) -> bool {
        false
    }

    /// Prepare the backend. Must complete before the first `detect`.
    fn setup(&mut self, accelerated: bool) -> Result<()>;

    /// True between a successful `setup` and `close`.
    fn is_ready(&self) -> bool;

    /// Run detection on an upright image.
    ///
    /// Implementations must treat the image as read-only.
    fn detect(&mut self, image: &RgbaImage) -> Result<Detection>;

    /// Release model resources. Further `detect` calls fail until `setup`.
    fn close(&mut self) {}
}
