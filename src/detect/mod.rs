mod backend;
mod backends;
mod classes;
mod decode;
mod filter;
mod registry;
mod result;

pub use backend::{
    EngineLoader, InferenceEngine, LoadedEngine, ModelArtifacts, ModelDescriptor,
    DEFAULT_MODEL_INPUT, DEFAULT_SCORE_OFFSET,
};
pub use backends::{StubEngine, StubLoader};
#[cfg(feature = "backend-tract")]
pub use backends::{TractEngine, TractLoader};
pub use classes::ClassNames;
pub use decode::decode_rows;
pub use filter::{
    parse_policy, ClassPolicy, DetectionFilter, PolicyHandle, PolicySource,
    CONFIDENCE_THRESHOLD, DEFAULT_ALLOW_LIST, PERSON_LABEL,
};
pub use registry::EngineRegistry;
pub use result::{AcceptedDetection, DetectionCandidate, NormalizedBox, PixelBox};
