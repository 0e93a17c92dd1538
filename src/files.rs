//! Attachment storage access.

use crate::types::{FileRef, Result};
use std::path::PathBuf;

/// Source of attachment bytes. History building and tools read through this
/// seam so storage stays swappable (disk here, object storage elsewhere).
pub trait FileStore: Send + Sync {
    fn get_file_contents(&self, file: &FileRef) -> Result<Vec<u8>>;
}

/// Local-directory store; `FileRef::path` is relative to the root.
pub struct DiskFileStore {
    root: PathBuf,
}

impl DiskFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl FileStore for DiskFileStore {
    fn get_file_contents(&self, file: &FileRef) -> Result<Vec<u8>> {
        Ok(std::fs::read(self.root.join(&file.path))?)
    }
}
