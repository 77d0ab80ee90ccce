//! Synthetic read-only directory handle.

use crate::metadata::StaticFileInfo;
use bytes::{Buf, Bytes};
use dav_server::fs::{DavFile, DavMetaData, FsError, FsFuture};
use std::io::SeekFrom;

/// An open handle for a directory that exists only virtually, such as the
/// composite root or a per-peer folder.
///
/// The protocol engine obtains directory *listings* through the filesystem's
/// `read_dir`, so this handle only has to answer `metadata` and reject byte
/// I/O: reads and writes fail because the entry is a directory, and seeking
/// is not supported.
#[derive(Debug, Clone)]
pub struct DirFile {
    info: StaticFileInfo,
}

impl DirFile {
    /// Creates a handle presenting the given directory info.
    pub fn new(info: StaticFileInfo) -> Self {
        Self { info }
    }
}

impl DavFile for DirFile {
    fn metadata(&mut self) -> FsFuture<'_, Box<dyn DavMetaData>> {
        let info = self.info.clone();
        Box::pin(async move { Ok(Box::new(info) as Box<dyn DavMetaData>) })
    }

    fn read_bytes(&mut self, _count: usize) -> FsFuture<'_, Bytes> {
        Box::pin(async { Err(FsError::Forbidden) })
    }

    fn write_bytes(&mut self, _buf: Bytes) -> FsFuture<'_, ()> {
        Box::pin(async { Err(FsError::Forbidden) })
    }

    fn write_buf(&mut self, _buf: Box<dyn Buf + Send>) -> FsFuture<'_, ()> {
        Box::pin(async { Err(FsError::Forbidden) })
    }

    fn seek(&mut self, _pos: SeekFrom) -> FsFuture<'_, u64> {
        Box::pin(async { Err(FsError::NotImplemented) })
    }

    fn flush(&mut self) -> FsFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}
