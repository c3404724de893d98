use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::PipelineError;

/// Class names indexed by class id. Immutable once loaded; clones share the
/// same storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelTable {
    names: Arc<[String]>,
}

impl LabelTable {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { names: names.into_iter().map(Into::into).collect() }
    }

    /// One name per line; reading stops at the first empty line.
    pub fn parse(text: &str) -> Self {
        Self::new(text.lines().take_while(|l| !l.is_empty()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| PipelineError::Labels {
            path: path.display().to_string(),
            source,
        })?;
        let table = Self::parse(&text);
        info!("labels: loaded {} names from {}", table.len(), path.display());
        Ok(table)
    }

    pub fn get(&self, class_id: usize) -> Option<&str> {
        self.names.get(class_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}
