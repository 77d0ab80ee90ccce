//! Composite filesystem: named children under a synthetic read-only root.

use crate::dir_file::DirFile;
use crate::metadata::{StaticDirEntry, StaticFileInfo};
use crate::path;
use dav_server::davpath::DavPath;
use dav_server::fs::{
    DavDirEntry, DavFile, DavFileSystem, DavMetaData, FsError, FsFuture, FsStream, OpenOptions,
    ReadDirMeta,
};
use futures::stream;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;
use tracing::{debug, instrument, warn};

/// Close capability for filesystems that hold releasable resources.
///
/// `DavFileSystem` has no close of its own, so a child that needs one
/// carries it alongside the filesystem in a [`ChildFs`] handle.
pub trait CloseableFs: Send + Sync {
    /// Releases the filesystem's resources. Must be idempotent.
    fn close(&self);
}

/// Injectable time source for synthetic directory mtimes.
pub type Clock = Arc<dyn Fn() -> SystemTime + Send + Sync>;

/// A child filesystem plus its optional close capability.
///
/// Cloning a `ChildFs` denotes the *same* child: [`CompositeFs::set_children`]
/// uses handle identity to decide what was displaced, so callers reinstalling
/// an unchanged child should pass a clone of the original handle, not a
/// freshly wrapped one.
pub struct ChildFs {
    fs: Box<dyn DavFileSystem>,
    closer: Option<Arc<dyn CloseableFs>>,
}

impl Clone for ChildFs {
    fn clone(&self) -> Self {
        Self {
            fs: self.fs.clone(),
            closer: self.closer.clone(),
        }
    }
}

impl std::fmt::Debug for ChildFs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChildFs")
            .field("closeable", &self.closer.is_some())
            .finish()
    }
}

impl ChildFs {
    /// Wraps a filesystem with nothing to release.
    pub fn plain(fs: impl DavFileSystem + 'static) -> Self {
        Self {
            fs: Box::new(fs),
            closer: None,
        }
    }

    /// Wraps a filesystem that must be closed when displaced.
    pub fn closeable<F>(fs: F) -> Self
    where
        F: DavFileSystem + CloseableFs + Clone + 'static,
    {
        Self {
            fs: Box::new(fs.clone()),
            closer: Some(Arc::new(fs)),
        }
    }

    fn fs(&self) -> &dyn DavFileSystem {
        self.fs.as_ref()
    }

    fn close(&self) {
        if let Some(closer) = &self.closer {
            closer.close();
        }
    }

    /// Whether both handles denote the same child.
    fn same_child(&self, other: &ChildFs) -> bool {
        match (&self.closer, &other.closer) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Configuration for a [`CompositeFs`].
#[derive(Default)]
pub struct CompositeOptions {
    /// Stat each child's root when listing the composite root. More
    /// accurate listings at the cost of one stat per child per listing.
    pub stat_children: bool,
    /// Time source for synthetic mtimes; defaults to the system clock.
    pub clock: Option<Clock>,
}

#[derive(Default)]
struct Children {
    by_name: HashMap<String, ChildFs>,
    /// Rebuilt alongside `by_name` under the same lock; kept sorted so
    /// listings are deterministic.
    sorted: Vec<(String, ChildFs)>,
}

impl Children {
    fn rebuild(&mut self) {
        self.sorted = self
            .by_name
            .iter()
            .map(|(name, child)| (name.clone(), child.clone()))
            .collect();
        self.sorted.sort_by(|a, b| a.0.cmp(&b.0));
    }
}

struct CompositeInner {
    stat_children: bool,
    clock: Clock,
    children: Mutex<Children>,
}

/// A `DavFileSystem` composed of named child filesystems.
///
/// Each child appears as a folder in the composite's root, sorted
/// alphabetically. The root itself is read-only; children can only change
/// through [`add_child`](CompositeFs::add_child) and friends. Renames are
/// routed to a single child; renaming across children is refused, since it
/// could not be done atomically.
#[derive(Clone)]
pub struct CompositeFs {
    inner: Arc<CompositeInner>,
}

enum Route {
    Root,
    Child {
        /// Remainder to forward; `/` when the operation targets the
        /// child's own root.
        rest: String,
        at_child_root: bool,
        child: ChildFs,
    },
}

impl CompositeFs {
    /// Creates an empty composite.
    pub fn new(options: CompositeOptions) -> Self {
        Self {
            inner: Arc::new(CompositeInner {
                stat_children: options.stat_children,
                clock: options.clock.unwrap_or_else(|| Arc::new(SystemTime::now)),
                children: Mutex::new(Children::default()),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Children> {
        self.inner
            .children
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Adds or replaces the child `name`. A displaced child is closed.
    pub fn add_child(&self, name: impl Into<String>, child: ChildFs) {
        let name = name.into();
        let displaced = {
            let mut children = self.lock();
            let old = children.by_name.insert(name, child.clone());
            children.rebuild();
            old
        };
        if let Some(old) = displaced {
            if !old.same_child(&child) {
                old.close();
            }
        }
    }

    /// Removes the child `name` if present and closes it.
    pub fn remove_child(&self, name: &str) {
        let displaced = {
            let mut children = self.lock();
            let old = children.by_name.remove(name);
            children.rebuild();
            old
        };
        if let Some(old) = displaced {
            old.close();
        }
    }

    /// Replaces the entire child set.
    ///
    /// Children present before the call but absent from `new_children`
    /// (by handle identity) are closed, after the lock is released.
    pub fn set_children(&self, new_children: HashMap<String, ChildFs>) {
        let (displaced, current) = {
            let mut children = self.lock();
            let old = std::mem::take(&mut children.by_name);
            children.by_name = new_children;
            children.rebuild();
            (old, children.sorted.clone())
        };
        for (_, old) in displaced {
            if !current.iter().any(|(_, new)| new.same_child(&old)) {
                old.close();
            }
        }
    }

    /// Returns a handle to the child `name`.
    pub fn get_child(&self, name: &str) -> Option<ChildFs> {
        self.lock().by_name.get(name).cloned()
    }

    /// Closes every current child.
    pub fn close(&self) {
        let children = {
            let mut guard = self.lock();
            guard.by_name.clear();
            std::mem::take(&mut guard.sorted)
        };
        debug!(count = children.len(), "closing composite children");
        for (_, child) in children {
            child.close();
        }
    }

    fn route(&self, fs_path: &str) -> Result<Route, FsError> {
        if path::is_root(fs_path) {
            return Ok(Route::Root);
        }
        let (first, rest) = path::first_segment(fs_path).ok_or(FsError::NotFound)?;
        let child = self
            .lock()
            .by_name
            .get(first)
            .cloned()
            .ok_or(FsError::NotFound)?;
        let at_child_root = rest == "/";
        Ok(Route::Child {
            rest,
            at_child_root,
            child,
        })
    }

    fn now(&self) -> SystemTime {
        (self.inner.clock)()
    }

    /// Snapshot of the sorted children. Never held across child calls.
    fn snapshot(&self) -> Vec<(String, ChildFs)> {
        self.lock().sorted.clone()
    }

    /// Metadata for the composite root.
    ///
    /// Without `stat_children` the mtime is the current clock, which
    /// intentionally busts downstream caches. With it, the mtime is the
    /// newest child mtime, statted outside the composite lock.
    async fn root_info(&self) -> Result<StaticFileInfo, FsError> {
        let mut info = StaticFileInfo::dir("/", self.now());
        if self.inner.stat_children {
            let root = child_root_path()?;
            for (i, (_, child)) in self.snapshot().into_iter().enumerate() {
                let meta = child.fs().metadata(&root).await?;
                let modified = meta.modified()?;
                if i == 0 || modified > info.modified {
                    info.modified = modified;
                }
            }
        }
        Ok(info)
    }

    /// Listing entries for the composite root, in name order.
    async fn root_entries(&self) -> Result<Vec<StaticFileInfo>, FsError> {
        let children = self.snapshot();
        let mut entries = Vec::with_capacity(children.len());
        if self.inner.stat_children {
            let root = child_root_path()?;
            for (name, child) in children {
                let meta = child.fs().metadata(&root).await?;
                entries.push(StaticFileInfo {
                    name,
                    size: meta.len(),
                    is_dir: meta.is_dir(),
                    modified: meta.modified()?,
                });
            }
        } else {
            let now = self.now();
            for (name, _) in children {
                entries.push(StaticFileInfo::dir(name, now));
            }
        }
        Ok(entries)
    }
}

fn child_root_path() -> Result<DavPath, FsError> {
    DavPath::new("/").map_err(|_| FsError::GeneralFailure)
}

fn forward_path(rest: &str) -> Result<DavPath, FsError> {
    DavPath::new(rest).map_err(|_| FsError::GeneralFailure)
}

impl DavFileSystem for CompositeFs {
    #[instrument(level = "debug", skip(self, options), fields(path = %path.as_url_string()))]
    fn open<'a>(&'a self, path: &'a DavPath, options: OpenOptions) -> FsFuture<'a, Box<dyn DavFile>> {
        Box::pin(async move {
            let fs_path = path::normalize(path);
            match self.route(&fs_path)? {
                Route::Root => {
                    if options.write || options.append || options.truncate || options.create
                        || options.create_new
                    {
                        return Err(FsError::Forbidden);
                    }
                    let info = self.root_info().await?;
                    Ok(Box::new(DirFile::new(info)) as Box<dyn DavFile>)
                }
                Route::Child { rest, child, .. } => {
                    let child_path = forward_path(&rest)?;
                    child.fs().open(&child_path, options).await
                }
            }
        })
    }

    #[instrument(level = "debug", skip(self), fields(path = %path.as_url_string()))]
    fn read_dir<'a>(
        &'a self,
        path: &'a DavPath,
        meta: ReadDirMeta,
    ) -> FsFuture<'a, FsStream<Box<dyn DavDirEntry>>> {
        Box::pin(async move {
            let fs_path = path::normalize(path);
            match self.route(&fs_path)? {
                Route::Root => {
                    let entries = self.root_entries().await?;
                    let boxed = entries
                        .into_iter()
                        .map(|info| Ok(Box::new(StaticDirEntry(info)) as Box<dyn DavDirEntry>));
                    Ok(Box::pin(stream::iter(boxed)) as FsStream<_>)
                }
                Route::Child { rest, child, .. } => {
                    let child_path = forward_path(&rest)?;
                    child.fs().read_dir(&child_path, meta).await
                }
            }
        })
    }

    #[instrument(level = "debug", skip(self), fields(path = %path.as_url_string()))]
    fn metadata<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Box<dyn DavMetaData>> {
        Box::pin(async move {
            let fs_path = path::normalize(path);
            match self.route(&fs_path)? {
                Route::Root => {
                    let info = self.root_info().await?;
                    Ok(Box::new(info) as Box<dyn DavMetaData>)
                }
                Route::Child {
                    rest,
                    at_child_root,
                    child,
                } => {
                    if at_child_root && !self.inner.stat_children {
                        // Current time as mtime busts downstream caches.
                        let info = StaticFileInfo::dir(path::file_name(&fs_path), self.now());
                        return Ok(Box::new(info) as Box<dyn DavMetaData>);
                    }
                    let child_path = forward_path(&rest)?;
                    let meta = child.fs().metadata(&child_path).await?;
                    // Present the stat under the full virtual name; the
                    // child only knows its own slice of the tree.
                    let info = StaticFileInfo {
                        name: fs_path,
                        size: meta.len(),
                        is_dir: meta.is_dir(),
                        modified: meta.modified()?,
                    };
                    Ok(Box::new(info) as Box<dyn DavMetaData>)
                }
            }
        })
    }

    #[instrument(level = "debug", skip(self), fields(path = %path.as_url_string()))]
    fn create_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        Box::pin(async move {
            let fs_path = path::normalize(path);
            match self.route(&fs_path)? {
                Route::Root => Err(FsError::Forbidden),
                Route::Child { rest, child, .. } => {
                    let child_path = forward_path(&rest)?;
                    child.fs().create_dir(&child_path).await
                }
            }
        })
    }

    #[instrument(level = "debug", skip(self), fields(path = %path.as_url_string()))]
    fn remove_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        Box::pin(async move {
            let fs_path = path::normalize(path);
            match self.route(&fs_path)? {
                Route::Root => Err(FsError::Forbidden),
                Route::Child { rest, child, .. } => {
                    let child_path = forward_path(&rest)?;
                    child.fs().remove_dir(&child_path).await
                }
            }
        })
    }

    #[instrument(level = "debug", skip(self), fields(path = %path.as_url_string()))]
    fn remove_file<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        Box::pin(async move {
            let fs_path = path::normalize(path);
            match self.route(&fs_path)? {
                Route::Root => Err(FsError::Forbidden),
                Route::Child { rest, child, .. } => {
                    let child_path = forward_path(&rest)?;
                    child.fs().remove_file(&child_path).await
                }
            }
        })
    }

    #[instrument(level = "debug", skip(self), fields(from = %from.as_url_string(), to = %to.as_url_string()))]
    fn rename<'a>(&'a self, from: &'a DavPath, to: &'a DavPath) -> FsFuture<'a, ()> {
        Box::pin(async move {
            let from_path = path::normalize(from);
            let to_path = path::normalize(to);
            if path::is_root(&from_path) || path::is_root(&to_path) {
                return Err(FsError::Forbidden);
            }
            let (from_first, from_rest) =
                path::first_segment(&from_path).ok_or(FsError::NotFound)?;
            let (to_first, to_rest) = path::first_segment(&to_path).ok_or(FsError::NotFound)?;
            if from_first != to_first {
                // No atomic rename across children.
                warn!(from = %from_path, to = %to_path, "rename across children refused");
                return Err(FsError::NotImplemented);
            }
            let child = self.get_child(from_first).ok_or(FsError::NotFound)?;
            let child_from = forward_path(&from_rest)?;
            let child_to = forward_path(&to_rest)?;
            child.fs().rename(&child_from, &child_to).await
        })
    }

    #[instrument(level = "debug", skip(self), fields(from = %from.as_url_string(), to = %to.as_url_string()))]
    fn copy<'a>(&'a self, from: &'a DavPath, to: &'a DavPath) -> FsFuture<'a, ()> {
        Box::pin(async move {
            let from_path = path::normalize(from);
            let to_path = path::normalize(to);
            if path::is_root(&from_path) || path::is_root(&to_path) {
                return Err(FsError::Forbidden);
            }
            let (from_first, from_rest) =
                path::first_segment(&from_path).ok_or(FsError::NotFound)?;
            let (to_first, to_rest) = path::first_segment(&to_path).ok_or(FsError::NotFound)?;
            if from_first != to_first {
                warn!(from = %from_path, to = %to_path, "copy across children refused");
                return Err(FsError::NotImplemented);
            }
            let child = self.get_child(from_first).ok_or(FsError::NotFound)?;
            let child_from = forward_path(&from_rest)?;
            let child_to = forward_path(&to_rest)?;
            child.fs().copy(&child_from, &child_to).await
        })
    }

    fn have_props<'a>(
        &'a self,
        _path: &'a DavPath,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = bool> + Send + 'a>> {
        Box::pin(async { false })
    }
}

impl CloseableFs for CompositeFs {
    fn close(&self) {
        CompositeFs::close(self);
    }
}
