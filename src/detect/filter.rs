use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};

use super::classes::ClassNames;
use super::result::{AcceptedDetection, DetectionCandidate};

/// Candidates must score strictly above this to be rendered.
pub const CONFIDENCE_THRESHOLD: f32 = 0.2;

/// Label that the human-oriented policies key on.
pub const PERSON_LABEL: &str = "person";

/// Labels accepted by the fixed allow-list variant unless configured otherwise.
pub const DEFAULT_ALLOW_LIST: &[&str] = &["person", "cat", "dog", "horse", "bird"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClassPolicy {
    HumansOnly,
    AllExceptHumans,
    FixedAllowList,
}

impl ClassPolicy {
    pub fn accepts(&self, label: &str, allow_list: &[String]) -> bool {
        match self {
            ClassPolicy::HumansOnly => label == PERSON_LABEL,
            ClassPolicy::AllExceptHumans => label != PERSON_LABEL,
            ClassPolicy::FixedAllowList => allow_list.iter().any(|allowed| allowed == label),
        }
    }

    fn to_bits(selection: Option<ClassPolicy>) -> u8 {
        match selection {
            None => 0,
            Some(ClassPolicy::HumansOnly) => 1,
            Some(ClassPolicy::AllExceptHumans) => 2,
            Some(ClassPolicy::FixedAllowList) => 3,
        }
    }

    fn from_bits(bits: u8) -> Option<ClassPolicy> {
        match bits {
            1 => Some(ClassPolicy::HumansOnly),
            2 => Some(ClassPolicy::AllExceptHumans),
            3 => Some(ClassPolicy::FixedAllowList),
            _ => None,
        }
    }
}

impl fmt::Display for ClassPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClassPolicy::HumansOnly => "humans-only",
            ClassPolicy::AllExceptHumans => "all-except-humans",
            ClassPolicy::FixedAllowList => "fixed",
        };
        f.write_str(name)
    }
}

/// Parses a policy selection. `none` yields `Ok(None)`.
pub fn parse_policy(value: &str) -> Result<Option<ClassPolicy>> {
    match value.trim().to_ascii_lowercase().as_str() {
        "none" | "off" => Ok(None),
        other => ClassPolicy::from_str(other).map(Some),
    }
}

impl FromStr for ClassPolicy {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "humans-only" | "humans" | "person" => Ok(ClassPolicy::HumansOnly),
            "all-except-humans" | "objects" | "all" => Ok(ClassPolicy::AllExceptHumans),
            "fixed" | "allow-list" => Ok(ClassPolicy::FixedAllowList),
            other => Err(anyhow!(
                "unknown class policy '{}' (expected none, humans-only, all-except-humans or fixed)",
                other
            )),
        }
    }
}

/// Live, user-controlled policy selection shared between the UI side and
/// running workers. Reads are lock-free so the filter can consult it once per
/// detection and pick up changes mid-stream.
#[derive(Clone, Debug, Default)]
pub struct PolicyHandle {
    bits: Arc<AtomicU8>,
}

impl PolicyHandle {
    pub fn new(selection: Option<ClassPolicy>) -> Self {
        Self {
            bits: Arc::new(AtomicU8::new(ClassPolicy::to_bits(selection))),
        }
    }

    pub fn set(&self, selection: Option<ClassPolicy>) {
        self.bits
            .store(ClassPolicy::to_bits(selection), Ordering::Release);
    }

    pub fn current(&self) -> Option<ClassPolicy> {
        ClassPolicy::from_bits(self.bits.load(Ordering::Acquire))
    }
}

/// Where the filter takes its policy from.
#[derive(Clone, Debug)]
pub enum PolicySource {
    /// Follow the user toggles; changes apply to the next detection.
    Toggles(PolicyHandle),
    /// Always the fixed allow-list, whatever the toggles say.
    Fixed,
}

impl PolicySource {
    fn current(&self) -> Option<ClassPolicy> {
        match self {
            PolicySource::Toggles(handle) => handle.current(),
            PolicySource::Fixed => Some(ClassPolicy::FixedAllowList),
        }
    }
}

/// Resolves labels, applies the confidence threshold and the active class
/// policy, and scales accepted boxes to the rendered frame.
#[derive(Clone, Debug)]
pub struct DetectionFilter {
    classes: ClassNames,
    source: PolicySource,
    allow_list: Vec<String>,
}

impl DetectionFilter {
    pub fn new(classes: ClassNames, source: PolicySource, allow_list: Vec<String>) -> Self {
        Self {
            classes,
            source,
            allow_list,
        }
    }

    /// Returns the accepted subset, in candidate order.
    pub fn apply(
        &self,
        candidates: &[DetectionCandidate],
        frame_width: u32,
        frame_height: u32,
    ) -> Vec<AcceptedDetection> {
        candidates
            .iter()
            .filter_map(|candidate| self.accept(candidate, frame_width, frame_height))
            .collect()
    }

    fn accept(
        &self,
        candidate: &DetectionCandidate,
        frame_width: u32,
        frame_height: u32,
    ) -> Option<AcceptedDetection> {
        let Some(label) = self.classes.get(candidate.class_index) else {
            log::debug!(
                "dropping candidate with out-of-range class index {} ({} classes loaded)",
                candidate.class_index,
                self.classes.len()
            );
            return None;
        };
        if candidate.confidence.is_nan() || candidate.confidence <= CONFIDENCE_THRESHOLD {
            return None;
        }
        let policy = self.source.current()?;
        if !policy.accepts(label, &self.allow_list) {
            return None;
        }
        Some(AcceptedDetection {
            label: label.to_string(),
            confidence: candidate.confidence,
            bbox: candidate.bbox.to_pixels(frame_width, frame_height),
        })
    }
}
