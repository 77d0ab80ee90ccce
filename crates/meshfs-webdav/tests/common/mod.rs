//! Shared test doubles for filesystem tests.

use dav_server::davpath::DavPath;
use dav_server::fs::{
    DavDirEntry, DavFile, DavFileSystem, DavMetaData, FsError, FsFuture, FsStream, OpenOptions,
    ReadDirMeta,
};
use meshfs_webdav::{CloseableFs, StaticFileInfo};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

/// A filesystem double with a fixed root mtime.
///
/// Counts closes and accesses so tests can assert that routing failures
/// never touch a child and that displaced children are closed exactly once.
#[derive(Clone)]
pub struct StubFs {
    pub modified: SystemTime,
    pub closes: Arc<AtomicUsize>,
    pub accesses: Arc<AtomicUsize>,
}

impl StubFs {
    pub fn new(modified: SystemTime) -> Self {
        Self {
            modified,
            closes: Arc::new(AtomicUsize::new(0)),
            accesses: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn access_count(&self) -> usize {
        self.accesses.load(Ordering::SeqCst)
    }
}

impl DavFileSystem for StubFs {
    fn open<'a>(
        &'a self,
        _path: &'a DavPath,
        _options: OpenOptions,
    ) -> FsFuture<'a, Box<dyn DavFile>> {
        self.accesses.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Err(FsError::NotImplemented) })
    }

    fn read_dir<'a>(
        &'a self,
        _path: &'a DavPath,
        _meta: ReadDirMeta,
    ) -> FsFuture<'a, FsStream<Box<dyn DavDirEntry>>> {
        self.accesses.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Err(FsError::NotImplemented) })
    }

    fn metadata<'a>(&'a self, _path: &'a DavPath) -> FsFuture<'a, Box<dyn DavMetaData>> {
        self.accesses.fetch_add(1, Ordering::SeqCst);
        let info = StaticFileInfo::dir("/", self.modified);
        Box::pin(async move { Ok(Box::new(info) as Box<dyn DavMetaData>) })
    }

    fn create_dir<'a>(&'a self, _path: &'a DavPath) -> FsFuture<'a, ()> {
        self.accesses.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Err(FsError::NotImplemented) })
    }

    fn remove_dir<'a>(&'a self, _path: &'a DavPath) -> FsFuture<'a, ()> {
        self.accesses.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Err(FsError::NotImplemented) })
    }

    fn remove_file<'a>(&'a self, _path: &'a DavPath) -> FsFuture<'a, ()> {
        self.accesses.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Err(FsError::NotImplemented) })
    }

    fn rename<'a>(&'a self, _from: &'a DavPath, _to: &'a DavPath) -> FsFuture<'a, ()> {
        self.accesses.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Err(FsError::NotImplemented) })
    }

    fn copy<'a>(&'a self, _from: &'a DavPath, _to: &'a DavPath) -> FsFuture<'a, ()> {
        self.accesses.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Err(FsError::NotImplemented) })
    }
}

impl CloseableFs for StubFs {
    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Creates `path` with `content` on a filesystem.
pub async fn put_file(fs: &dyn DavFileSystem, path: &str, content: &[u8]) {
    let dav_path = DavPath::new(path).expect("valid path");
    let options = OpenOptions {
        write: true,
        create: true,
        ..OpenOptions::default()
    };
    let mut file = fs.open(&dav_path, options).await.expect("open for write");
    file.write_bytes(bytes::Bytes::copy_from_slice(content))
        .await
        .expect("write");
    file.flush().await.expect("flush");
}

/// Reads the full contents of `path` from a filesystem.
pub async fn read_file(fs: &dyn DavFileSystem, path: &str) -> Result<Vec<u8>, FsError> {
    let dav_path = DavPath::new(path).map_err(|_| FsError::GeneralFailure)?;
    let mut file = fs.open(&dav_path, OpenOptions::default()).await?;
    let mut out = Vec::new();
    loop {
        let chunk = file.read_bytes(4096).await?;
        if chunk.is_empty() {
            break;
        }
        out.extend_from_slice(&chunk);
    }
    Ok(out)
}

/// Collects a directory listing as `(name, is_dir)` pairs in stream order.
pub async fn list_dir(fs: &dyn DavFileSystem, path: &str) -> Result<Vec<(String, bool)>, FsError> {
    use futures::StreamExt;

    let dav_path = DavPath::new(path).map_err(|_| FsError::GeneralFailure)?;
    let mut stream = fs.read_dir(&dav_path, ReadDirMeta::Data).await?;
    let mut entries = Vec::new();
    while let Some(entry) = stream.next().await {
        let entry = entry?;
        let name = String::from_utf8_lossy(&entry.name()).to_string();
        let is_dir = entry.is_dir().await?;
        entries.push((name, is_dir));
    }
    Ok(entries)
}
