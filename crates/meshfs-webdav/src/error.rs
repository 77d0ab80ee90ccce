//! Error taxonomy for remote WebDAV operations.
//!
//! Underlying transport and protocol errors are translated to this taxonomy
//! at the client boundary; `RemoteFs` and `RemoteFile` convert it to
//! `dav_server::fs::FsError` when answering the protocol engine.

use dav_server::fs::FsError;
use std::io;
use thiserror::Error;

/// Errors produced by a [`crate::DavClient`].
#[derive(Debug, Error)]
pub enum DavClientError {
    /// Path does not exist, or is hidden from the caller.
    #[error("not found")]
    NotFound,

    /// Authenticated but not allowed.
    #[error("permission denied")]
    PermissionDenied,

    /// The operation is outside the supported surface (unsupported seek,
    /// write on a read-only file, rename across children).
    #[error("not supported")]
    NotSupported,

    /// A file operation was directed at a directory.
    #[error("is a directory")]
    IsDirectory,

    /// A directory operation was directed at a file.
    #[error("is a file")]
    IsFile,

    /// The target already exists (MKCOL on an existing resource).
    #[error("already exists")]
    AlreadyExists,

    /// Network or dial failure.
    #[error("transport failure: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The operation exceeded the op timeout or the request deadline.
    #[error("operation timed out")]
    Timeout,

    /// The per-user file server for the target share is not reachable yet.
    #[error("gateway unavailable: {0}")]
    Unavailable(String),

    /// The server answered with an HTTP status outside the taxonomy.
    #[error("unexpected status {0}")]
    Status(u16),

    /// The server's multistatus response could not be parsed.
    #[error("malformed server response: {0}")]
    Protocol(String),
}

impl DavClientError {
    /// Classifies an HTTP status code returned by the remote server.
    pub fn from_status(status: u16) -> Self {
        match status {
            404 | 410 => DavClientError::NotFound,
            401 | 403 | 423 => DavClientError::PermissionDenied,
            405 | 501 => DavClientError::NotSupported,
            other => DavClientError::Status(other),
        }
    }

    /// Wraps a transport-level error.
    pub fn transport(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        DavClientError::Transport(Box::new(err))
    }
}

impl From<io::Error> for DavClientError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => DavClientError::NotFound,
            io::ErrorKind::PermissionDenied => DavClientError::PermissionDenied,
            io::ErrorKind::TimedOut => DavClientError::Timeout,
            _ => DavClientError::transport(err),
        }
    }
}

impl From<DavClientError> for FsError {
    fn from(err: DavClientError) -> Self {
        match err {
            DavClientError::NotFound => FsError::NotFound,
            DavClientError::PermissionDenied => FsError::Forbidden,
            DavClientError::NotSupported => FsError::NotImplemented,
            DavClientError::AlreadyExists => FsError::Exists,
            DavClientError::IsDirectory | DavClientError::IsFile => FsError::Forbidden,
            DavClientError::Transport(_)
            | DavClientError::Timeout
            | DavClientError::Unavailable(_)
            | DavClientError::Status(_)
            | DavClientError::Protocol(_) => FsError::GeneralFailure,
        }
    }
}

/// Result alias for client operations.
pub type DavClientResult<T> = Result<T, DavClientError>;
