use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use crate::detect::result::DetectionCandidate;
use crate::frame::ModelInput;

/// Model input side length used when the topology descriptor does not say.
pub const DEFAULT_MODEL_INPUT: u32 = 416;

/// Column where class scores start in darknet-style output rows.
pub const DEFAULT_SCORE_OFFSET: usize = 5;

/// The three files a session needs before it may run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelArtifacts {
    /// Network topology descriptor (JSON).
    pub topology: PathBuf,
    /// Network weights (ONNX graph for the tract backend).
    pub weights: PathBuf,
    /// Newline-delimited class names.
    pub class_names: PathBuf,
}

impl ModelArtifacts {
    pub fn in_dir<P: AsRef<Path>>(
        data_dir: P,
        topology: &str,
        weights: &str,
        class_names: &str,
    ) -> Self {
        let data_dir = data_dir.as_ref();
        Self {
            topology: data_dir.join(topology),
            weights: data_dir.join(weights),
            class_names: data_dir.join(class_names),
        }
    }

    /// Fails if any artifact is missing or is not a regular file.
    pub fn verify(&self) -> Result<()> {
        for (what, path) in [
            ("topology", &self.topology),
            ("weights", &self.weights),
            ("class names", &self.class_names),
        ] {
            let meta = std::fs::metadata(path)
                .with_context(|| format!("model {} not found at {}", what, path.display()))?;
            if !meta.is_file() {
                return Err(anyhow!("model {} at {} is not a file", what, path.display()));
            }
        }
        Ok(())
    }

    pub fn descriptor(&self) -> Result<ModelDescriptor> {
        ModelDescriptor::load(&self.topology)
    }
}

#[derive(Debug, Deserialize, Default)]
struct ModelDescriptorFile {
    input_width: Option<u32>,
    input_height: Option<u32>,
    swap_rb: Option<bool>,
    score_offset: Option<usize>,
}

/// Parsed topology descriptor: what the network expects and how its output
/// rows are laid out.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ModelDescriptor {
    pub input_width: u32,
    pub input_height: u32,
    /// Feed channels as BGR instead of RGB.
    pub swap_rb: bool,
    pub score_offset: usize,
}

impl Default for ModelDescriptor {
    fn default() -> Self {
        Self {
            input_width: DEFAULT_MODEL_INPUT,
            input_height: DEFAULT_MODEL_INPUT,
            swap_rb: false,
            score_offset: DEFAULT_SCORE_OFFSET,
        }
    }
}

impl ModelDescriptor {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read topology {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("invalid topology {}", path.display()))
    }

    /// Blank descriptors are accepted and mean "all defaults".
    pub fn parse(raw: &str) -> Result<Self> {
        let file: ModelDescriptorFile = if raw.trim().is_empty() {
            ModelDescriptorFile::default()
        } else {
            serde_json::from_str(raw)?
        };
        let defaults = Self::default();
        let descriptor = Self {
            input_width: file.input_width.unwrap_or(defaults.input_width),
            input_height: file.input_height.unwrap_or(defaults.input_height),
            swap_rb: file.swap_rb.unwrap_or(defaults.swap_rb),
            score_offset: file.score_offset.unwrap_or(defaults.score_offset),
        };
        if descriptor.input_width == 0 || descriptor.input_height == 0 {
            return Err(anyhow!("model input size must be non-zero"));
        }
        if descriptor.score_offset < 4 {
            return Err(anyhow!("score_offset must leave room for the 4 box columns"));
        }
        Ok(descriptor)
    }
}

/// Opaque detector. One instance belongs to one session and is only ever
/// called from that session's worker, one frame at a time.
///
/// Implementations are stateless across frames: the candidates for a frame
/// depend only on that frame's input.
pub trait InferenceEngine: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run the network once. Candidates from every output tensor are returned
    /// together.
    fn infer(&mut self, input: &ModelInput) -> Result<Vec<DetectionCandidate>>;
}

/// Builds a fresh engine for each session from the model artifacts.
pub trait EngineLoader: Send + Sync {
    /// Backend name used in logs and error messages.
    fn name(&self) -> &str;

    fn load(&self, artifacts: &ModelArtifacts) -> Result<LoadedEngine>;
}

/// An engine together with the input geometry it was loaded for.
pub struct LoadedEngine {
    pub engine: Box<dyn InferenceEngine>,
    pub descriptor: ModelDescriptor,
}
