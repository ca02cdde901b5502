use anyhow::Result;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::RawDetection;
use crate::frame::Frame;

/// Scripted backend for tests and dry runs. Performs no inference.
///
/// Frame `n` (counting calls from zero) receives `script[n % script.len()]`.
pub struct StubBackend {
    script: Vec<Vec<RawDetection>>,
    calls: usize,
}

impl StubBackend {
    pub fn scripted(script: Vec<Vec<RawDetection>>) -> Self {
        Self { script, calls: 0 }
    }

    /// Same detections for every frame.
    pub fn fixed(detections: Vec<RawDetection>) -> Self {
        Self::scripted(vec![detections])
    }

    /// Never detects anything.
    pub fn empty() -> Self {
        Self::scripted(Vec::new())
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::empty()
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn infer(&mut self, _frame: &Frame, _threshold: f32) -> Result<Vec<RawDetection>> {
        let out = if self.script.is_empty() {
            Vec::new()
        } else {
            self.script[self.calls % self.script.len()].clone()
        };
        self.calls += 1;
        Ok(out)
    }
}
