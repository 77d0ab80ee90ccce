//! Virtual WebDAV filesystem layer for MeshFS.
//!
//! This crate provides the building blocks that both gateway halves are
//! assembled from:
//!
//! - [`CompositeFs`] - aggregates named child filesystems under a synthetic
//!   read-only root and routes every operation by the first path segment
//! - [`RemoteFs`] - exposes a WebDAV server as a `DavFileSystem`, with a
//!   TTL-bounded stat cache and lazily-opened remote files
//! - [`DavClient`] - the capability seam to the remote WebDAV server, with
//!   an HTTP implementation ([`HttpDavClient`]) whose connections are
//!   produced by a pluggable [`Dialer`]
//!
//! All filesystems implement `dav_server::fs::DavFileSystem`, so they plug
//! directly into a `DavHandler`.

mod cache;
mod client;
mod composite;
mod dir_file;
mod error;
mod metadata;
pub mod path;
mod remote_file;
mod remote_fs;

pub use cache::StatCache;
pub use client::{
    http_connector, DavClient, DialedStream, Dialer, DialerConnector, FileStream, HttpDavClient,
    TcpDialer,
};
pub use composite::{ChildFs, CloseableFs, Clock, CompositeFs, CompositeOptions};
pub use dir_file::DirFile;
pub use error::{DavClientError, DavClientResult};
pub use metadata::{StaticDirEntry, StaticFileInfo};
pub use remote_fs::{RemoteFs, RemoteFsOptions};
