#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::preprocess::{letterbox, to_chw};
use crate::detect::result::RawDetection;
use crate::detect::yolo::{self, YoloParams};
use crate::frame::Frame;

/// Tract-based backend for YOLOv8 ONNX models.
///
/// Loads a local model file once and runs it on letterboxed RGB frames. It
/// performs no network I/O; fetching the weights is the provisioner's job.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    input_size: u32,
    params: YoloParams,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for `input_size × input_size` inference.
    pub fn load<P: AsRef<Path>>(model_path: P, input_size: u32, params: YoloParams) -> Result<Self> {
        let model_path = model_path.as_ref();
        if input_size == 0 || input_size % 32 != 0 {
            return Err(anyhow!(
                "model input size must be a positive multiple of 32, got {}",
                input_size
            ));
        }
        let size = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(0, f32::fact([1, 3, size, size]).into())
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        log::info!(
            "loaded {} ({}x{} input)",
            model_path.display(),
            input_size,
            input_size
        );

        Ok(Self {
            model,
            input_size,
            params,
        })
    }

    fn build_input(&self, chw: Vec<f32>) -> Result<Tensor> {
        let size = self.input_size as usize;
        let input = tract_ndarray::Array4::from_shape_vec((1, 3, size, size), chw)
            .context("letterboxed frame does not match model input shape")?;
        Ok(input.into_tensor())
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn infer(&mut self, frame: &Frame, threshold: f32) -> Result<Vec<RawDetection>> {
        let (canvas, geometry) = letterbox(frame.image(), self.input_size);
        let input = self.build_input(to_chw(&canvas))?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let data = output
            .as_slice::<f32>()
            .context("model output tensor was not f32")?;
        yolo::decode(output.shape(), data, &geometry, threshold, &self.params)
    }

    fn warm_up(&mut self) -> Result<()> {
        let size = self.input_size as usize;
        let input = self.build_input(vec![0.0; 3 * size * size])?;
        self.model
            .run(tvec!(input.into()))
            .context("ONNX warm-up run failed")?;
        Ok(())
    }
}
