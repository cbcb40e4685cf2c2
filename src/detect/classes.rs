use std::path::Path;

use anyhow::{anyhow, Context, Result};

/// Class-name list: one label per line, index = line number.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClassNames {
    labels: Vec<String>,
}

impl ClassNames {
    pub fn new(labels: Vec<String>) -> Self {
        Self { labels }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read class names from {}", path.display()))?;
        let names = Self::parse(&raw);
        if names.is_empty() {
            return Err(anyhow!("class name list {} is empty", path.display()));
        }
        Ok(names)
    }

    /// Trailing whitespace (including `\r`) is trimmed per line; a trailing
    /// newline does not produce an empty class.
    pub fn parse(raw: &str) -> Self {
        let labels = raw
            .lines()
            .map(|line| line.trim_end().to_string())
            .collect::<Vec<_>>();
        Self { labels }
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}
