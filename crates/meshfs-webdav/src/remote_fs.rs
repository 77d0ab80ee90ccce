//! `DavFileSystem` backed by a remote WebDAV server.

use crate::cache::StatCache;
use crate::client::{DavClient, Dialer, HttpDavClient};
use crate::composite::CloseableFs;
use crate::dir_file::DirFile;
use crate::error::DavClientResult;
use crate::metadata::{StaticDirEntry, StaticFileInfo};
use crate::path;
use crate::remote_file::{with_timeout, RemoteFile};
use dav_server::davpath::DavPath;
use dav_server::fs::{
    DavDirEntry, DavFile, DavFileSystem, DavMetaData, FsError, FsFuture, FsStream, OpenOptions,
    ReadDirMeta,
};
use futures::stream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, instrument, trace};

/// Configuration for a [`RemoteFs`].
#[derive(Debug, Clone)]
pub struct RemoteFsOptions {
    /// Base URL of the remote server, e.g. `http://peer:8080/share`.
    pub url: String,
    /// How long a successful stat may be served from cache. Must be
    /// positive.
    pub stat_cache_ttl: Duration,
    /// Answer `stat("/")` locally with a synthetic directory instead of
    /// issuing a network request. Set for per-share filesystems so an
    /// enclosing composite can list shares without round-trips.
    pub stat_root: bool,
    /// Upper bound for each outbound operation.
    pub op_timeout: Duration,
}

impl Default for RemoteFsOptions {
    fn default() -> Self {
        Self {
            url: String::new(),
            stat_cache_ttl: Duration::from_secs(1),
            stat_root: false,
            op_timeout: Duration::from_secs(30),
        }
    }
}

struct RemoteFsInner {
    client: Arc<dyn DavClient>,
    cache: StatCache,
    stat_root: bool,
    op_timeout: Duration,
    closed: AtomicBool,
}

/// A WebDAV server exposed through the `DavFileSystem` contract, with a
/// short-TTL stat cache in front of it.
///
/// Cloning shares the cache and the underlying client.
#[derive(Clone)]
pub struct RemoteFs {
    inner: Arc<RemoteFsInner>,
}

impl RemoteFs {
    /// Wraps an existing client.
    ///
    /// # Panics
    ///
    /// Panics when `options.stat_cache_ttl` is zero.
    pub fn new(client: Arc<dyn DavClient>, options: &RemoteFsOptions) -> Self {
        assert!(
            options.stat_cache_ttl > Duration::ZERO,
            "stat_cache_ttl must be positive"
        );
        Self {
            inner: Arc::new(RemoteFsInner {
                client,
                cache: StatCache::new(options.stat_cache_ttl),
                stat_root: options.stat_root,
                op_timeout: options.op_timeout,
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Builds an HTTP client for `options.url` whose connections come from
    /// `dialer`, and wraps it.
    pub fn connect(options: &RemoteFsOptions, dialer: Arc<dyn Dialer>) -> DavClientResult<Self> {
        let client = HttpDavClient::new(&options.url, dialer)?;
        Ok(Self::new(Arc::new(client), options))
    }

    /// Marks the filesystem closed and drops cached state.
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            self.inner.cache.clear();
            debug!("remote filesystem closed");
        }
    }

    /// Stat via the cache; a miss performs a client stat and stores the
    /// result.
    async fn stat_cached(&self, fs_path: &str) -> Result<StaticFileInfo, FsError> {
        if let Some(info) = self.inner.cache.get(fs_path) {
            trace!(path = %fs_path, "stat cache hit");
            return Ok(info);
        }
        let info = with_timeout(self.inner.op_timeout, self.inner.client.stat(fs_path)).await?;
        self.inner.cache.insert(fs_path, info.clone());
        Ok(info)
    }

    fn child_path(dir: &str, name: &str) -> String {
        if path::is_root(dir) {
            format!("/{name}")
        } else {
            format!("{dir}/{name}")
        }
    }
}

impl DavFileSystem for RemoteFs {
    #[instrument(level = "debug", skip(self, options), fields(path = %path.as_url_string()))]
    fn open<'a>(&'a self, path: &'a DavPath, options: OpenOptions) -> FsFuture<'a, Box<dyn DavFile>> {
        Box::pin(async move {
            let fs_path = path::normalize(path);
            let inner = &self.inner;

            let write = options.write || options.append || options.truncate || options.create
                || options.create_new;
            if !write {
                let fi = self.stat_cached(&fs_path).await?;
                if fi.is_dir {
                    return Ok(Box::new(DirFile::new(fi)) as Box<dyn DavFile>);
                }
                let file = RemoteFile::read_only(
                    Arc::clone(&inner.client),
                    fs_path,
                    fi,
                    inner.cache.clone(),
                    inner.op_timeout,
                );
                return Ok(Box::new(file) as Box<dyn DavFile>);
            }

            inner.cache.invalidate_with_parent(&fs_path);

            if options.create_new && self.stat_cached(&fs_path).await.is_ok() {
                return Err(FsError::Exists);
            }
            if options.create || options.create_new || options.truncate {
                // Create or truncate eagerly so the entry exists even when
                // nothing is ever written through the handle.
                with_timeout(
                    inner.op_timeout,
                    inner.client.put(&fs_path, bytes::Bytes::new()),
                )
                .await?;
                inner.cache.invalidate_with_parent(&fs_path);
            }

            let fi = StaticFileInfo::file(path::file_name(&fs_path), 0, SystemTime::now());
            let file = RemoteFile::read_write(
                Arc::clone(&inner.client),
                fs_path,
                fi,
                inner.cache.clone(),
                inner.op_timeout,
            );
            Ok(Box::new(file) as Box<dyn DavFile>)
        })
    }

    #[instrument(level = "debug", skip(self), fields(path = %path.as_url_string()))]
    fn read_dir<'a>(
        &'a self,
        path: &'a DavPath,
        _meta: ReadDirMeta,
    ) -> FsFuture<'a, FsStream<Box<dyn DavDirEntry>>> {
        Box::pin(async move {
            let fs_path = path::normalize(path);
            let entries = with_timeout(
                self.inner.op_timeout,
                self.inner.client.read_dir(&fs_path),
            )
            .await?;
            trace!(path = %fs_path, count = entries.len(), "directory listed");

            // A listing is as good as a stat for each child; prime the
            // cache so the PROPFIND that typically follows is free.
            for entry in &entries {
                self.inner
                    .cache
                    .insert(&Self::child_path(&fs_path, &entry.name), entry.clone());
            }

            let boxed = entries
                .into_iter()
                .map(|info| Ok(Box::new(StaticDirEntry(info)) as Box<dyn DavDirEntry>));
            Ok(Box::pin(stream::iter(boxed)) as FsStream<_>)
        })
    }

    #[instrument(level = "debug", skip(self), fields(path = %path.as_url_string()))]
    fn metadata<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Box<dyn DavMetaData>> {
        Box::pin(async move {
            let fs_path = path::normalize(path);
            if self.inner.stat_root && path::is_root(&fs_path) {
                let info = StaticFileInfo::dir("/", SystemTime::now());
                return Ok(Box::new(info) as Box<dyn DavMetaData>);
            }
            let info = self.stat_cached(&fs_path).await?;
            Ok(Box::new(info) as Box<dyn DavMetaData>)
        })
    }

    #[instrument(level = "debug", skip(self), fields(path = %path.as_url_string()))]
    fn create_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        Box::pin(async move {
            let fs_path = path::normalize(path);
            self.inner.cache.invalidate_with_parent(&fs_path);
            with_timeout(self.inner.op_timeout, self.inner.client.mkdir(&fs_path)).await?;
            Ok(())
        })
    }

    #[instrument(level = "debug", skip(self), fields(path = %path.as_url_string()))]
    fn remove_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        Box::pin(async move {
            let fs_path = path::normalize(path);
            self.inner.cache.invalidate_tree(&fs_path);
            with_timeout(self.inner.op_timeout, self.inner.client.delete(&fs_path)).await?;
            Ok(())
        })
    }

    #[instrument(level = "debug", skip(self), fields(path = %path.as_url_string()))]
    fn remove_file<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        Box::pin(async move {
            let fs_path = path::normalize(path);
            self.inner.cache.invalidate_with_parent(&fs_path);
            with_timeout(self.inner.op_timeout, self.inner.client.delete(&fs_path)).await?;
            Ok(())
        })
    }

    #[instrument(level = "debug", skip(self), fields(from = %from.as_url_string(), to = %to.as_url_string()))]
    fn rename<'a>(&'a self, from: &'a DavPath, to: &'a DavPath) -> FsFuture<'a, ()> {
        Box::pin(async move {
            let from_path = path::normalize(from);
            let to_path = path::normalize(to);
            self.inner.cache.invalidate_tree(&from_path);
            self.inner.cache.invalidate_tree(&to_path);
            with_timeout(
                self.inner.op_timeout,
                self.inner.client.move_to(&from_path, &to_path),
            )
            .await?;
            Ok(())
        })
    }

    #[instrument(level = "debug", skip(self), fields(from = %from.as_url_string(), to = %to.as_url_string()))]
    fn copy<'a>(&'a self, from: &'a DavPath, to: &'a DavPath) -> FsFuture<'a, ()> {
        Box::pin(async move {
            let from_path = path::normalize(from);
            let to_path = path::normalize(to);
            self.inner.cache.invalidate_tree(&to_path);
            with_timeout(
                self.inner.op_timeout,
                self.inner.client.copy_to(&from_path, &to_path),
            )
            .await?;
            Ok(())
        })
    }

    fn have_props<'a>(
        &'a self,
        _path: &'a DavPath,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = bool> + Send + 'a>> {
        Box::pin(async { false })
    }
}

impl CloseableFs for RemoteFs {
    fn close(&self) {
        RemoteFs::close(self);
    }
}
