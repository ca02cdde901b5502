use anyhow::{anyhow, Context, Result};

use crate::detect::backend::DetectorBackend;
use crate::detect::classes::ClassTable;
use crate::detect::result::Detection;
use crate::frame::Frame;

/// Detector facade: `detect(frame, threshold) -> detections`.
///
/// Every returned detection has a finite confidence `>= threshold`, a box
/// clamped to the frame, and a label resolved through the class table.
pub struct Detector {
    backend: Box<dyn DetectorBackend>,
    classes: ClassTable,
}

impl Detector {
    pub fn new<B: DetectorBackend + 'static>(backend: B, classes: ClassTable) -> Self {
        Self::from_boxed(Box::new(backend), classes)
    }

    pub fn from_boxed(backend: Box<dyn DetectorBackend>, classes: ClassTable) -> Self {
        Self { backend, classes }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn classes(&self) -> &ClassTable {
        &self.classes
    }

    pub fn warm_up(&mut self) -> Result<()> {
        let name = self.backend.name();
        self.backend
            .warm_up()
            .with_context(|| format!("{} backend warm-up failed", name))
    }

    pub fn detect(&mut self, frame: &Frame, threshold: f32) -> Result<Vec<Detection>> {
        validate_threshold(threshold)?;
        let name = self.backend.name();
        let raw = self
            .backend
            .infer(frame, threshold)
            .with_context(|| format!("{} backend inference failed", name))?;

        let candidates = raw.len();
        let mut detections = Vec::with_capacity(candidates);
        for det in raw {
            if !det.score.is_finite() || det.score < threshold {
                continue;
            }
            let Some(bbox) = det.bbox.clamp_to(frame.width(), frame.height()) else {
                continue;
            };
            detections.push(Detection {
                bbox,
                confidence: det.score.min(1.0),
                class_index: det.class_index,
                label: self.classes.label(det.class_index).to_string(),
            });
        }

        log::debug!(
            "frame {}: {} candidates, {} kept at threshold {:.2}",
            frame.sequence(),
            candidates,
            detections.len(),
            threshold
        );
        Ok(detections)
    }
}

pub(crate) fn validate_threshold(threshold: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&threshold) {
        return Err(anyhow!(
            "confidence threshold must be within [0, 1], got {}",
            threshold
        ));
    }
    Ok(())
}
