use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};

use super::backend::{EngineLoader, LoadedEngine, ModelArtifacts};

/// Registry of engine loaders, keyed by backend name.
///
/// The first registered loader becomes the default.
#[derive(Clone)]
pub struct EngineRegistry {
    loaders: HashMap<String, Arc<dyn EngineLoader>>,
    default_name: Option<String>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self {
            loaders: HashMap::new(),
            default_name: None,
        }
    }

    /// Registry with every backend compiled into this build. `tract` is the
    /// default when available.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        #[cfg(feature = "backend-tract")]
        registry.register(super::backends::TractLoader);
        registry.register(super::backends::StubLoader::new());
        registry
    }

    pub fn register<L: EngineLoader + 'static>(&mut self, loader: L) {
        let name = loader.name().to_string();
        if self.default_name.is_none() {
            self.default_name = Some(name.clone());
        }
        self.loaders.insert(name, Arc::new(loader));
    }

    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.loaders.contains_key(name) {
            return Err(anyhow!("backend '{}' not registered", name));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn EngineLoader>> {
        self.loaders.get(name).cloned()
    }

    pub fn default_loader(&self) -> Option<Arc<dyn EngineLoader>> {
        self.default_name.as_ref().and_then(|name| self.get(name))
    }

    pub fn default_name(&self) -> Option<&str> {
        self.default_name.as_deref()
    }

    /// Sorted backend names.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.loaders.keys().cloned().collect();
        names.sort();
        names
    }

    /// Load an engine with the default backend.
    pub fn load_default(&self, artifacts: &ModelArtifacts) -> Result<LoadedEngine> {
        let loader = self
            .default_loader()
            .ok_or_else(|| anyhow!("no inference backend registered"))?;
        loader.load(artifacts)
    }
}

impl Default for EngineRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineLoader for EngineRegistry {
    /// Name of the backend `load` delegates to.
    fn name(&self) -> &str {
        self.default_name().unwrap_or("registry")
    }

    fn load(&self, artifacts: &ModelArtifacts) -> Result<LoadedEngine> {
        self.load_default(artifacts)
    }
}
