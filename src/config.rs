use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::detect::{parse_policy, ClassPolicy, ModelArtifacts, DEFAULT_ALLOW_LIST};

const DEFAULT_DATA_DIR: &str = "Data";
const DEFAULT_TOPOLOGY: &str = "yolov3-tiny.json";
const DEFAULT_WEIGHTS: &str = "yolov3-tiny.onnx";
const DEFAULT_CLASS_NAMES: &str = "coco.names";
const DEFAULT_FRAME_SKIP: u32 = 3;
const DEFAULT_PRESENTATION_WIDTH: u32 = 900;
const DEFAULT_PRESENTATION_HEIGHT: u32 = 620;
const DEFAULT_FRAME_DELAY_MS: u64 = 15;
const DEFAULT_STOP_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_POLICY: &str = "humans-only";

#[cfg(feature = "backend-tract")]
const DEFAULT_BACKEND: &str = "tract";
#[cfg(not(feature = "backend-tract"))]
const DEFAULT_BACKEND: &str = "stub";

#[derive(Debug, Deserialize, Default)]
struct PipelineConfigFile {
    data_dir: Option<PathBuf>,
    backend: Option<String>,
    model: Option<ModelConfigFile>,
    frame_skip: Option<u32>,
    presentation: Option<PresentationConfigFile>,
    frame_delay_ms: Option<u64>,
    stop_timeout_ms: Option<u64>,
    frame_queue: Option<usize>,
    policy: Option<String>,
    allow_list: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    topology: Option<String>,
    weights: Option<String>,
    class_names: Option<String>,
    label_font: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct PresentationConfigFile {
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Directory the model artifacts are resolved against.
    pub data_dir: PathBuf,
    pub backend: String,
    pub topology: String,
    pub weights: String,
    pub class_names: String,
    pub label_font: Option<String>,
    /// Process every Nth decoded frame.
    pub frame_skip: u32,
    pub presentation_width: u32,
    pub presentation_height: u32,
    /// Pause after each hand-off.
    pub frame_delay: Duration,
    /// How long `stop` waits for the worker before forcing release.
    pub stop_timeout: Duration,
    /// Capacity of the frame hand-off channel; 0 is a rendezvous.
    pub frame_queue: usize,
    /// Initial toggle selection.
    pub policy: Option<ClassPolicy>,
    /// Run the fixed allow-list variant, ignoring the toggles.
    pub fixed_allow_list: bool,
    pub allow_list: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let mut cfg = Self::from_file(PipelineConfigFile::default())
            .unwrap_or_else(|_| Self::empty());
        cfg.fixed_allow_list = cfg.policy == Some(ClassPolicy::FixedAllowList);
        cfg
    }
}

impl PipelineConfig {
    /// Defaults, then the file named by `VIDSIGHT_CONFIG`, then env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("VIDSIGHT_CONFIG").ok().map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Like [`PipelineConfig::load`] with an explicit config file.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Resolved paths of the three model artifacts.
    pub fn artifacts(&self) -> ModelArtifacts {
        ModelArtifacts::in_dir(
            &self.data_dir,
            &self.topology,
            &self.weights,
            &self.class_names,
        )
    }

    fn empty() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            backend: DEFAULT_BACKEND.to_string(),
            topology: DEFAULT_TOPOLOGY.to_string(),
            weights: DEFAULT_WEIGHTS.to_string(),
            class_names: DEFAULT_CLASS_NAMES.to_string(),
            label_font: None,
            frame_skip: DEFAULT_FRAME_SKIP,
            presentation_width: DEFAULT_PRESENTATION_WIDTH,
            presentation_height: DEFAULT_PRESENTATION_HEIGHT,
            frame_delay: Duration::from_millis(DEFAULT_FRAME_DELAY_MS),
            stop_timeout: Duration::from_millis(DEFAULT_STOP_TIMEOUT_MS),
            frame_queue: 0,
            policy: Some(ClassPolicy::HumansOnly),
            fixed_allow_list: false,
            allow_list: default_allow_list(),
        }
    }

    fn from_file(file: PipelineConfigFile) -> Result<Self> {
        let defaults = Self::empty();
        let model = file.model.unwrap_or_default();
        let presentation = file.presentation.unwrap_or_default();
        let policy = parse_policy(file.policy.as_deref().unwrap_or(DEFAULT_POLICY))?;
        Ok(Self {
            data_dir: file.data_dir.unwrap_or(defaults.data_dir),
            backend: file.backend.unwrap_or(defaults.backend),
            topology: model.topology.unwrap_or(defaults.topology),
            weights: model.weights.unwrap_or(defaults.weights),
            class_names: model.class_names.unwrap_or(defaults.class_names),
            label_font: model.label_font,
            frame_skip: file.frame_skip.unwrap_or(defaults.frame_skip),
            presentation_width: presentation.width.unwrap_or(defaults.presentation_width),
            presentation_height: presentation.height.unwrap_or(defaults.presentation_height),
            frame_delay: file
                .frame_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.frame_delay),
            stop_timeout: file
                .stop_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.stop_timeout),
            frame_queue: file.frame_queue.unwrap_or(defaults.frame_queue),
            policy,
            fixed_allow_list: false,
            allow_list: file.allow_list.unwrap_or(defaults.allow_list),
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(dir) = std::env::var("VIDSIGHT_DATA_DIR") {
            if !dir.trim().is_empty() {
                self.data_dir = PathBuf::from(dir);
            }
        }
        if let Ok(backend) = std::env::var("VIDSIGHT_BACKEND") {
            if !backend.trim().is_empty() {
                self.backend = backend.trim().to_string();
            }
        }
        if let Ok(skip) = std::env::var("VIDSIGHT_FRAME_SKIP") {
            self.frame_skip = skip
                .trim()
                .parse()
                .map_err(|_| anyhow!("VIDSIGHT_FRAME_SKIP must be a positive integer"))?;
        }
        if let Ok(policy) = std::env::var("VIDSIGHT_POLICY") {
            if !policy.trim().is_empty() {
                self.policy = parse_policy(&policy)?;
            }
        }
        if let Ok(timeout) = std::env::var("VIDSIGHT_STOP_TIMEOUT_MS") {
            let millis: u64 = timeout.trim().parse().map_err(|_| {
                anyhow!("VIDSIGHT_STOP_TIMEOUT_MS must be an integer number of milliseconds")
            })?;
            self.stop_timeout = Duration::from_millis(millis);
        }
        if let Ok(list) = std::env::var("VIDSIGHT_ALLOW_LIST") {
            let parsed = split_csv(&list);
            if !parsed.is_empty() {
                self.allow_list = parsed;
            }
        }
        Ok(())
    }

    /// Check invariants and derive the policy variant.
    pub fn validate(&mut self) -> Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(anyhow!("data_dir must not be empty"));
        }
        if self.frame_skip == 0 {
            return Err(anyhow!("frame_skip must be greater than zero"));
        }
        if self.presentation_width == 0 || self.presentation_height == 0 {
            return Err(anyhow!("presentation size must be non-zero"));
        }
        if self.stop_timeout.is_zero() {
            return Err(anyhow!("stop timeout must be greater than zero"));
        }
        if self.allow_list.is_empty() {
            return Err(anyhow!("allow_list must name at least one label"));
        }
        for name in [&self.topology, &self.weights, &self.class_names] {
            if name.trim().is_empty() {
                return Err(anyhow!("model artifact names must not be empty"));
            }
        }
        self.fixed_allow_list = self.policy == Some(ClassPolicy::FixedAllowList);
        Ok(())
    }
}

fn default_allow_list() -> Vec<String> {
    DEFAULT_ALLOW_LIST.iter().map(|label| label.to_string()).collect()
}

/// `.toml` files are parsed as TOML, anything else as JSON.
fn read_config_file(path: &Path) -> Result<PipelineConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let mut cfg = PipelineConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.frame_skip, 3);
        assert_eq!((cfg.presentation_width, cfg.presentation_height), (900, 620));
        assert_eq!(cfg.stop_timeout, Duration::from_secs(2));
        assert_eq!(cfg.frame_delay, Duration::from_millis(15));
        assert_eq!(cfg.policy, Some(ClassPolicy::HumansOnly));
        assert!(!cfg.fixed_allow_list);
        assert_eq!(
            cfg.artifacts().class_names,
            PathBuf::from("Data").join("coco.names")
        );
    }

    #[test]
    fn zero_frame_skip_is_rejected() {
        let mut cfg = PipelineConfig {
            frame_skip: 0,
            ..PipelineConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn fixed_policy_selects_allow_list_variant() {
        let mut cfg = PipelineConfig {
            policy: Some(ClassPolicy::FixedAllowList),
            ..PipelineConfig::default()
        };
        cfg.validate().unwrap();
        assert!(cfg.fixed_allow_list);
    }

    #[test]
    fn toml_and_json_files_parse_the_same() {
        let json: PipelineConfigFile =
            serde_json::from_str(r#"{"frame_skip": 2, "model": {"weights": "net.onnx"}}"#).unwrap();
        let toml: PipelineConfigFile =
            toml::from_str("frame_skip = 2\n[model]\nweights = \"net.onnx\"\n").unwrap();
        let json = PipelineConfig::from_file(json).unwrap();
        let toml = PipelineConfig::from_file(toml).unwrap();
        assert_eq!(json.frame_skip, toml.frame_skip);
        assert_eq!(json.weights, "net.onnx");
        assert_eq!(toml.weights, "net.onnx");
    }

    #[test]
    fn split_csv_trims_and_skips_blanks() {
        assert_eq!(split_csv(" cat, ,dog ,"), vec!["cat", "dog"]);
    }
}
