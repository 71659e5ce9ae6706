use anyhow::Result;

use crate::detect::result::Detection;
use crate::frame::Frame;

/// Object detector backend.
///
/// Backends wrap an external model. They return every candidate they find;
/// filtering by label and confidence belongs to the breach evaluator, so the
/// operator's threshold can change without reloading the model.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    ///
    /// Boxes are in the frame's pixel coordinates. An `Err` is a whole-frame
    /// failure; the monitor treats it as zero detections for that frame.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
