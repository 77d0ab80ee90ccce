//! Open file handles backed by a remote WebDAV server.

use crate::cache::StatCache;
use crate::client::{DavClient, FileStream};
use crate::error::{DavClientError, DavClientResult};
use crate::metadata::StaticFileInfo;
use bytes::{Buf, Bytes, BytesMut};
use dav_server::fs::{DavFile, DavMetaData, FsError, FsFuture};
use futures::StreamExt;
use std::io::SeekFrom;
use std::sync::Arc;
use std::time::Duration;

/// Bounds a client operation by the filesystem's op timeout.
pub(crate) async fn with_timeout<T>(
    limit: Duration,
    op: impl std::future::Future<Output = DavClientResult<T>>,
) -> DavClientResult<T> {
    tokio::time::timeout(limit, op)
        .await
        .map_err(|_| DavClientError::Timeout)?
}

enum Mode {
    /// GET-backed streaming reads.
    ReadOnly,
    /// PUT-backed writes, buffered for the duration of the request.
    ReadWrite { buf: BytesMut, pos: usize, dirty: bool },
}

/// A file on a remote WebDAV server.
///
/// The server's byte stream is opened lazily on the first read: the protocol
/// engine opens files for many operations that never read from them, and
/// skipping the round-trip for those is a significant win. Exclusive access
/// is guaranteed by the `&mut self` receivers of `DavFile`, which stand in
/// for the lock an aliased handle would need.
pub(crate) struct RemoteFile {
    client: Arc<dyn DavClient>,
    path: String,
    /// Most recently obtained metadata; starts as the info known at open.
    fi: StaticFileInfo,
    /// Whether `fi` came from a cache-bypassing stat on this handle.
    fresh: bool,
    stream: Option<FileStream>,
    stream_done: bool,
    pending: BytesMut,
    mode: Mode,
    cache: StatCache,
    op_timeout: Duration,
}

impl std::fmt::Debug for RemoteFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteFile")
            .field("path", &self.path)
            .field("size", &self.fi.size)
            .field("streaming", &self.stream.is_some())
            .field(
                "writable",
                &matches!(self.mode, Mode::ReadWrite { .. }),
            )
            .finish()
    }
}

impl RemoteFile {
    pub(crate) fn read_only(
        client: Arc<dyn DavClient>,
        path: String,
        fi: StaticFileInfo,
        cache: StatCache,
        op_timeout: Duration,
    ) -> Self {
        Self {
            client,
            path,
            fi,
            fresh: false,
            stream: None,
            stream_done: false,
            pending: BytesMut::new(),
            mode: Mode::ReadOnly,
            cache,
            op_timeout,
        }
    }

    pub(crate) fn read_write(
        client: Arc<dyn DavClient>,
        path: String,
        fi: StaticFileInfo,
        cache: StatCache,
        op_timeout: Duration,
    ) -> Self {
        Self {
            client,
            path,
            fi,
            fresh: false,
            stream: None,
            stream_done: false,
            pending: BytesMut::new(),
            mode: Mode::ReadWrite {
                buf: BytesMut::new(),
                pos: 0,
                dirty: false,
            },
            cache,
            op_timeout,
        }
    }

    /// Refreshes `fi`, bypassing the stat cache.
    ///
    /// Used before answering a size probe so the client sees the server's
    /// current view rather than a cached one.
    async fn stat_fresh(&mut self) -> DavClientResult<()> {
        if self.fresh {
            return Ok(());
        }
        let info = with_timeout(self.op_timeout, self.client.stat(&self.path)).await?;
        self.fi = info.renamed(&self.fi.name);
        self.fresh = true;
        Ok(())
    }

    /// Opens the server stream once and buffers at least `count` bytes,
    /// or as many as the stream has left.
    async fn fill(&mut self, count: usize) -> DavClientResult<()> {
        if self.stream.is_none() && !self.stream_done {
            let stream =
                with_timeout(self.op_timeout, self.client.open_read(&self.path)).await?;
            self.stream = Some(stream);
        }
        let Some(stream) = self.stream.as_mut() else {
            return Ok(());
        };
        while self.pending.len() < count && !self.stream_done {
            match stream.next().await {
                Some(Ok(chunk)) => self.pending.extend_from_slice(&chunk),
                Some(Err(err)) => return Err(err),
                None => self.stream_done = true,
            }
        }
        Ok(())
    }
}

impl DavFile for RemoteFile {
    fn metadata(&mut self) -> FsFuture<'_, Box<dyn DavMetaData>> {
        Box::pin(async move {
            let mut info = self.fi.clone();
            if let Mode::ReadWrite { buf, .. } = &self.mode {
                info.size = buf.len() as u64;
            }
            Ok(Box::new(info) as Box<dyn DavMetaData>)
        })
    }

    fn read_bytes(&mut self, count: usize) -> FsFuture<'_, Bytes> {
        Box::pin(async move {
            if let Mode::ReadWrite { buf, pos, .. } = &mut self.mode {
                let start = (*pos).min(buf.len());
                let end = (start + count).min(buf.len());
                *pos = end;
                return Ok(Bytes::copy_from_slice(&buf[start..end]));
            }
            self.fill(count).await.map_err(FsError::from)?;
            let n = count.min(self.pending.len());
            Ok(self.pending.split_to(n).freeze())
        })
    }

    fn write_bytes(&mut self, data: Bytes) -> FsFuture<'_, ()> {
        Box::pin(async move {
            match &mut self.mode {
                Mode::ReadOnly => Err(FsError::Forbidden),
                Mode::ReadWrite { buf, pos, dirty } => {
                    let start = *pos;
                    if buf.len() < start {
                        buf.resize(start, 0);
                    }
                    let overlap = (buf.len() - start).min(data.len());
                    buf[start..start + overlap].copy_from_slice(&data[..overlap]);
                    buf.extend_from_slice(&data[overlap..]);
                    *pos = start + data.len();
                    *dirty = true;
                    Ok(())
                }
            }
        })
    }

    fn write_buf(&mut self, mut buf: Box<dyn Buf + Send>) -> FsFuture<'_, ()> {
        Box::pin(async move {
            let bytes = buf.copy_to_bytes(buf.remaining());
            self.write_bytes(bytes).await
        })
    }

    fn seek(&mut self, pos: SeekFrom) -> FsFuture<'_, u64> {
        Box::pin(async move {
            // Only the probe-then-read pattern is honored: clients seek to
            // the end with offset 0 to learn the size, then back to the
            // start to read. Anything else would need random access on a
            // streaming transport.
            match pos {
                SeekFrom::End(0) => {
                    if let Mode::ReadWrite { buf, .. } = &self.mode {
                        return Ok(buf.len() as u64);
                    }
                    self.stat_fresh().await.map_err(FsError::from)?;
                    Ok(self.fi.size)
                }
                SeekFrom::Start(0) => {
                    if let Mode::ReadWrite { pos, .. } = &mut self.mode {
                        *pos = 0;
                    }
                    Ok(0)
                }
                _ => Err(FsError::NotImplemented),
            }
        })
    }

    fn flush(&mut self) -> FsFuture<'_, ()> {
        Box::pin(async move {
            let Mode::ReadWrite { buf, dirty, .. } = &mut self.mode else {
                return Ok(());
            };
            if !*dirty {
                return Ok(());
            }
            let content = Bytes::copy_from_slice(buf);
            let size = content.len() as u64;
            with_timeout(self.op_timeout, self.client.put(&self.path, content))
                .await
                .map_err(FsError::from)?;
            *dirty = false;
            self.fi.size = size;
            self.cache.invalidate_with_parent(&self.path);
            Ok(())
        })
    }
}
