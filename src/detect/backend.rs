use anyhow::Result;

use crate::detect::result::Detection;
use crate::frame::Frame;

/// Detector adapter.
///
/// Implementations wrap a pretrained model. A call may fail; the scheduler
/// abandons that cycle and the next tick is the retry. Backends are moved to
/// a worker thread when the session runs adapters off-thread, hence `Send`.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on one frame snapshot. Boxes are in frame pixels.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;

    /// Optional warm-up hook, run once when a session starts.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
