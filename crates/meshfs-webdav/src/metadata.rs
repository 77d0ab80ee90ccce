//! Immutable file metadata returned to the WebDAV layer.
//!
//! [`StaticFileInfo`] is a plain value: it carries everything a directory
//! listing needs without holding a live handle, which lets the composite
//! filesystem synthesize entries for its root and rewrite names coming back
//! from child filesystems.

use dav_server::fs::{DavDirEntry, DavMetaData, FsError, FsFuture};
use std::time::SystemTime;

/// Metadata for a single filesystem entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticFileInfo {
    /// Entry name. For synthetic directories this is the virtual name under
    /// which the entry is presented, not necessarily what the backing
    /// filesystem calls it.
    pub name: String,
    /// Size in bytes; 0 for directories.
    pub size: u64,
    /// Whether the entry is a directory.
    pub is_dir: bool,
    /// Modification time.
    pub modified: SystemTime,
}

impl StaticFileInfo {
    /// Info for a directory.
    pub fn dir(name: impl Into<String>, modified: SystemTime) -> Self {
        Self {
            name: name.into(),
            size: 0,
            is_dir: true,
            modified,
        }
    }

    /// Info for a regular file.
    pub fn file(name: impl Into<String>, size: u64, modified: SystemTime) -> Self {
        Self {
            name: name.into(),
            size,
            is_dir: false,
            modified,
        }
    }

    /// The same entry presented under a different name.
    ///
    /// Used by the composite filesystem, which answers stats with the full
    /// virtual path while the child only knows its own name.
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }
}

impl DavMetaData for StaticFileInfo {
    fn len(&self) -> u64 {
        self.size
    }

    fn modified(&self) -> Result<SystemTime, FsError> {
        Ok(self.modified)
    }

    fn is_dir(&self) -> bool {
        self.is_dir
    }

    fn is_file(&self) -> bool {
        !self.is_dir
    }

    fn is_symlink(&self) -> bool {
        false
    }

    fn created(&self) -> Result<SystemTime, FsError> {
        self.modified()
    }

    fn accessed(&self) -> Result<SystemTime, FsError> {
        self.modified()
    }

    fn status_changed(&self) -> Result<SystemTime, FsError> {
        self.modified()
    }

    fn executable(&self) -> Result<bool, FsError> {
        Ok(false)
    }
}

/// A directory entry backed by a [`StaticFileInfo`] value.
#[derive(Debug, Clone)]
pub struct StaticDirEntry(pub StaticFileInfo);

impl DavDirEntry for StaticDirEntry {
    fn name(&self) -> Vec<u8> {
        self.0.name.as_bytes().to_vec()
    }

    fn metadata(&self) -> FsFuture<'_, Box<dyn DavMetaData>> {
        let meta = self.0.clone();
        Box::pin(async move { Ok(Box::new(meta) as Box<dyn DavMetaData>) })
    }

    fn is_dir(&self) -> FsFuture<'_, bool> {
        let is_dir = self.0.is_dir;
        Box::pin(async move { Ok(is_dir) })
    }

    fn is_file(&self) -> FsFuture<'_, bool> {
        let is_file = !self.0.is_dir;
        Box::pin(async move { Ok(is_file) })
    }

    fn is_symlink(&self) -> FsFuture<'_, bool> {
        Box::pin(async { Ok(false) })
    }
}
