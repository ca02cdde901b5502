use anyhow::Result;

use crate::detect::result::RawDetection;
use crate::frame::Frame;

/// Model backend trait.
///
/// A backend owns the network weights and inference context. It receives a
/// read-only frame and returns candidate boxes in frame pixel coordinates.
/// The threshold is a pruning hint; the [`Detector`](crate::detect::Detector)
/// wrapper enforces the confidence contract regardless of what a backend returns.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run one forward pass on a frame.
    fn infer(&mut self, frame: &Frame, threshold: f32) -> Result<Vec<RawDetection>>;

    /// Optional warm-up hook, run once before the first frame.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
