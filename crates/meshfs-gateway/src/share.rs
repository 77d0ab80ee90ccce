//! The share control model.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A local directory exposed to peers.
///
/// Shares are immutable once installed into the remote gateway; callers
/// replace the full set with [`crate::RemoteGateway::set_shares`]. The serde
/// form is the share control file consumed by the gateway and by
/// `meshfs serve-shares`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Share {
    /// How the share appears to peers; unique within this node and used as
    /// the first path segment.
    pub name: String,
    /// Absolute host directory being shared.
    pub path: PathBuf,
    /// Local account whose permissions apply to file I/O for this share.
    #[serde(rename = "who")]
    pub owner: String,
    /// Principals allowed to read this share.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub readers: Vec<String>,
    /// Principals allowed to write to this share.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub writers: Vec<String>,
}

/// Whether this platform can drop privileges to a share's owning user
/// before performing file I/O.
///
/// Evaluated once by callers at gateway construction; sandboxed or
/// non-Unix builds fall back to the process-wide file server instead.
pub fn platform_allows_share_as() -> bool {
    cfg!(unix)
}
