#![cfg(feature = "backend-tract")]

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::{
    EngineLoader, InferenceEngine, LoadedEngine, ModelArtifacts, ModelDescriptor,
};
use crate::detect::decode::{decode_rows, row_width};
use crate::detect::result::DetectionCandidate;
use crate::frame::ModelInput;

/// Tract-based engine for ONNX YOLO-style detectors.
///
/// Loads a local model file and runs inference on NCHW f32 input. Every output
/// tensor is decoded; no network I/O and nothing is written to disk.
pub struct TractEngine {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    descriptor: ModelDescriptor,
}

impl TractEngine {
    pub fn load(artifacts: &ModelArtifacts) -> Result<Self> {
        let descriptor = artifacts.descriptor()?;
        let weights = &artifacts.weights;
        let model = tract_onnx::onnx()
            .model_for_path(weights)
            .with_context(|| format!("failed to load ONNX model from {}", weights.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(
                        1,
                        3,
                        descriptor.input_height as usize,
                        descriptor.input_width as usize
                    ),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self { model, descriptor })
    }

    fn build_input(&self, input: &ModelInput) -> Result<Tensor> {
        if input.width != self.descriptor.input_width
            || input.height != self.descriptor.input_height
        {
            return Err(anyhow!(
                "input size {}x{} does not match model input {}x{}",
                input.width,
                input.height,
                self.descriptor.input_width,
                self.descriptor.input_height
            ));
        }
        let shape = [1, 3, input.height as usize, input.width as usize];
        let array = tract_ndarray::Array4::from_shape_vec(shape, input.data.clone())
            .context("model input has the wrong number of values")?;
        Ok(array.into_tensor())
    }
}

impl InferenceEngine for TractEngine {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn infer(&mut self, input: &ModelInput) -> Result<Vec<DetectionCandidate>> {
        let tensor = self.build_input(input)?;
        let outputs = self
            .model
            .run(tvec!(tensor.into()))
            .context("ONNX inference failed")?;

        let mut candidates = Vec::new();
        for output in outputs.iter() {
            let view = output
                .to_array_view::<f32>()
                .context("model output tensor was not f32")?;
            let cols = row_width(view.shape())?;
            let data: Vec<f32> = view.iter().copied().collect();
            candidates.extend(decode_rows(&data, cols, self.descriptor.score_offset)?);
        }
        Ok(candidates)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TractLoader;

impl EngineLoader for TractLoader {
    fn name(&self) -> &str {
        "tract"
    }

    fn load(&self, artifacts: &ModelArtifacts) -> Result<LoadedEngine> {
        let engine = TractEngine::load(artifacts)?;
        let descriptor = engine.descriptor;
        Ok(LoadedEngine {
            engine: Box::new(engine),
            descriptor,
        })
    }
}
