//! Slash-path helpers shared by the composite and remote filesystems.
//!
//! Paths are forward-slash strings in the normalized form produced by
//! [`normalize`]: a leading slash, no trailing slash, `/` for the root.

use dav_server::davpath::DavPath;

/// Normalizes a `DavPath` to a plain slash-path string.
///
/// The root becomes `/`; every other path gets a leading slash and no
/// trailing slash.
pub fn normalize(path: &DavPath) -> String {
    let raw = path.as_url_string();
    let trimmed = raw.trim_start_matches('/').trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{trimmed}")
    }
}

/// Reports whether `path` is the root.
pub fn is_root(path: &str) -> bool {
    path.trim_matches('/').is_empty()
}

/// Splits a path into its non-empty components.
pub fn split(path: &str) -> Vec<&str> {
    path.split('/').filter(|c| !c.is_empty()).collect()
}

/// Splits off the first path component.
///
/// Returns the first component and the remainder as a rooted path. An empty
/// remainder maps to `/`, so forwarding the remainder to a child filesystem
/// targets that child's own root. Returns `None` for the root.
pub fn first_segment(path: &str) -> Option<(&str, String)> {
    let mut components = path.split('/').filter(|c| !c.is_empty());
    let first = components.next()?;
    let rest = components.collect::<Vec<_>>().join("/");
    if rest.is_empty() {
        Some((first, "/".to_string()))
    } else {
        Some((first, format!("/{rest}")))
    }
}

/// Returns the last component of a path, or `/` for the root.
pub fn file_name(path: &str) -> &str {
    split(path).last().copied().unwrap_or("/")
}

/// Returns the parent of a path, or `/` when the path has at most one
/// component.
pub fn parent(path: &str) -> String {
    let components = split(path);
    if components.len() <= 1 {
        "/".to_string()
    } else {
        format!("/{}", components[..components.len() - 1].join("/"))
    }
}
