use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A configuration file as served by the file API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct File {
    /// Absolute path, always starting with `/`
    pub path: String,

    #[serde(default)]
    pub contents: String,

    #[serde(default)]
    pub metadata: BTreeMap<String, String>,

    /// Store revision at which this file was read or written.
    /// Not part of the stored document.
    #[serde(default)]
    pub revision: i64,
}

impl File {
    pub fn new(path: impl Into<String>, contents: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            contents: contents.into(),
            metadata: BTreeMap::new(),
            revision: 0,
        }
    }

    pub fn with_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }
}

impl fmt::Display for File {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.path, self.revision)
    }
}
