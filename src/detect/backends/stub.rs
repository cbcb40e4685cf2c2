use anyhow::Result;

use crate::detect::backend::{EngineLoader, InferenceEngine, LoadedEngine, ModelArtifacts};
use crate::detect::result::DetectionCandidate;
use crate::frame::ModelInput;

/// Stub engine for testing and dry runs. Ignores pixels and returns the same
/// candidates for every frame.
pub struct StubEngine {
    candidates: Vec<DetectionCandidate>,
}

impl StubEngine {
    pub fn new(candidates: Vec<DetectionCandidate>) -> Self {
        Self { candidates }
    }
}

impl Default for StubEngine {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl InferenceEngine for StubEngine {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn infer(&mut self, _input: &ModelInput) -> Result<Vec<DetectionCandidate>> {
        Ok(self.candidates.clone())
    }
}

/// Loader for [`StubEngine`]. Still reads the topology descriptor so input
/// geometry matches what a real backend would use.
#[derive(Clone, Debug, Default)]
pub struct StubLoader {
    candidates: Vec<DetectionCandidate>,
}

impl StubLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_candidates(mut self, candidates: Vec<DetectionCandidate>) -> Self {
        self.candidates = candidates;
        self
    }
}

impl EngineLoader for StubLoader {
    fn name(&self) -> &str {
        "stub"
    }

    fn load(&self, artifacts: &ModelArtifacts) -> Result<LoadedEngine> {
        let descriptor = artifacts.descriptor()?;
        Ok(LoadedEngine {
            engine: Box::new(StubEngine::new(self.candidates.clone())),
            descriptor,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::result::NormalizedBox;

    #[test]
    fn stub_engine_repeats_its_candidates() {
        let candidate = DetectionCandidate {
            class_index: 0,
            confidence: 0.9,
            bbox: NormalizedBox::new(0.5, 0.5, 0.2, 0.2),
        };
        let mut engine = StubEngine::new(vec![candidate]);
        let input = ModelInput::blank(4, 4);

        assert_eq!(engine.infer(&input).unwrap(), vec![candidate]);
        assert_eq!(engine.infer(&input).unwrap(), vec![candidate]);
        assert_eq!(engine.name(), "stub");
    }
}
