//! Retrieval of previously produced output files for merging.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use log::debug;

/// Source of prior output files, addressed by object name and a partition
/// (`mode`) hint.
pub trait PriorOutputRetriever: Send + Sync {
    /// Copies the prior output named `object` to `destination`.
    ///
    /// Returns `Ok(false)` when the store holds no such object; that is not
    /// an error, the job simply has nothing to merge.
    fn retrieve(&self, object: &str, mode: &str, destination: &Path) -> Result<bool>;
}

/// Object store laid out on a filesystem as `<root>/<mode>/<object>`, or
/// `<root>/<object>` when no mode is given.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn object_path(&self, object: &str, mode: &str) -> PathBuf {
        let mode = mode.trim_matches('/');
        if mode.is_empty() {
            self.root.join(object)
        } else {
            self.root.join(mode).join(object)
        }
    }
}

impl PriorOutputRetriever for LocalObjectStore {
    fn retrieve(&self, object: &str, mode: &str, destination: &Path) -> Result<bool> {
        let source = self.object_path(object, mode);
        if !source.is_file() {
            debug!("No prior output at {source:?}");
            return Ok(false);
        }
        fs::copy(&source, destination).with_context(|| {
            format!("Copying prior output {source:?} to {destination:?}")
        })?;
        Ok(true)
    }
}
