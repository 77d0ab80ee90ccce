//! WebDAV client used by [`crate::RemoteFs`].
//!
//! [`DavClient`] is the capability seam between the filesystem layer and the
//! wire: the filesystem only needs stat/list/read/write/namespace
//! operations, and tests substitute in-memory doubles. [`HttpDavClient`] is
//! the production implementation, an HTTP/1 WebDAV client whose connections
//! come from a pluggable [`Dialer`] so the gateways can route dials per
//! share or through an overlay transport.

use crate::error::{DavClientError, DavClientResult};
use crate::metadata::StaticFileInfo;
use crate::path;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use http::{Method, Request, Uri};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::Response;
use hyper_util::client::legacy::connect::{Connected, Connection};
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioIo};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::SystemTime;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;
use tracing::trace;

/// Byte stream produced by [`DavClient::open_read`].
pub type FileStream = Pin<Box<dyn Stream<Item = DavClientResult<Bytes>> + Send + Sync>>;

/// Capability contract against a remote WebDAV server.
///
/// Paths are normalized slash-paths relative to the client's base URL.
#[async_trait]
pub trait DavClient: Send + Sync {
    /// Fetches metadata for a single path.
    async fn stat(&self, path: &str) -> DavClientResult<StaticFileInfo>;

    /// Lists the entries of a directory.
    async fn read_dir(&self, path: &str) -> DavClientResult<Vec<StaticFileInfo>>;

    /// Opens the server's byte stream for a file.
    async fn open_read(&self, path: &str) -> DavClientResult<FileStream>;

    /// Writes the full contents of a file.
    async fn put(&self, path: &str, body: Bytes) -> DavClientResult<()>;

    /// Creates a directory.
    async fn mkdir(&self, path: &str) -> DavClientResult<()>;

    /// Removes a file or directory tree.
    async fn delete(&self, path: &str) -> DavClientResult<()>;

    /// Moves `from` to `to`, overwriting the destination.
    async fn move_to(&self, from: &str, to: &str) -> DavClientResult<()>;

    /// Copies `from` to `to`, overwriting the destination.
    async fn copy_to(&self, from: &str, to: &str) -> DavClientResult<()>;
}

/// Produces connections for [`HttpDavClient`].
///
/// `addr` is the `host:port` from the request URL. Implementations decide
/// what that means: a plain TCP dial, an overlay-network dial, or a lookup
/// that maps the host to a per-user file server.
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    /// Opens a connection to `addr`.
    async fn dial(&self, addr: &str) -> io::Result<DialedStream>;
}

/// Dials the address literally over TCP.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpDialer;

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self, addr: &str) -> io::Result<DialedStream> {
        Ok(DialedStream::Tcp(TcpStream::connect(addr).await?))
    }
}

/// A dialed connection: TCP, or a local socket on platforms that have them.
#[derive(Debug)]
pub enum DialedStream {
    /// A TCP connection.
    Tcp(TcpStream),
    /// A Unix-domain socket connection.
    #[cfg(unix)]
    Unix(UnixStream),
}

impl DialedStream {
    /// Connects to a bootstrap address: `host:port` dials TCP, anything
    /// else is treated as a local socket path.
    pub async fn connect(addr: &str) -> io::Result<Self> {
        if addr.parse::<SocketAddr>().is_ok() {
            return Ok(DialedStream::Tcp(TcpStream::connect(addr).await?));
        }
        #[cfg(unix)]
        {
            Ok(DialedStream::Unix(UnixStream::connect(addr).await?))
        }
        #[cfg(not(unix))]
        {
            Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("cannot dial local socket address {addr} on this platform"),
            ))
        }
    }
}

impl AsyncRead for DialedStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            DialedStream::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            #[cfg(unix)]
            DialedStream::Unix(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for DialedStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            DialedStream::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            #[cfg(unix)]
            DialedStream::Unix(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            DialedStream::Tcp(s) => Pin::new(s).poll_flush(cx),
            #[cfg(unix)]
            DialedStream::Unix(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            DialedStream::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            #[cfg(unix)]
            DialedStream::Unix(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

impl Connection for DialedStream {
    fn connected(&self) -> Connected {
        Connected::new()
    }
}

/// `tower_service::Service<Uri>` adapter that turns a [`Dialer`] into a
/// hyper client connector.
#[derive(Clone)]
pub struct DialerConnector {
    dialer: Arc<dyn Dialer>,
}

impl tower_service::Service<Uri> for DialerConnector {
    type Response = TokioIo<DialedStream>;
    type Error = io::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, dst: Uri) -> Self::Future {
        let dialer = Arc::clone(&self.dialer);
        Box::pin(async move {
            let host = dst
                .host()
                .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "URL has no host"))?;
            let port = dst.port_u16().unwrap_or(80);
            let addr = format!("{host}:{port}");
            dialer.dial(&addr).await.map(TokioIo::new)
        })
    }
}

/// Builds the hyper connector for a dialer.
pub fn http_connector(dialer: Arc<dyn Dialer>) -> DialerConnector {
    DialerConnector { dialer }
}

/// Characters percent-encoded when a path is placed in a request URL.
const PATH_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

const PROPFIND_BODY: &str =
    r#"<?xml version="1.0" encoding="utf-8"?><D:propfind xmlns:D="DAV:"><D:allprop/></D:propfind>"#;

/// WebDAV over HTTP/1.
pub struct HttpDavClient {
    client: Client<DialerConnector, Full<Bytes>>,
    authority: String,
    base_path: String,
}

impl HttpDavClient {
    /// Creates a client for `base_url` whose connections come from `dialer`.
    pub fn new(base_url: &str, dialer: Arc<dyn Dialer>) -> DavClientResult<Self> {
        let uri: Uri = base_url
            .parse()
            .map_err(|_| DavClientError::Protocol(format!("invalid base URL {base_url}")))?;
        let authority = uri
            .authority()
            .ok_or_else(|| DavClientError::Protocol(format!("base URL {base_url} has no host")))?
            .to_string();
        let base_path = uri.path().trim_end_matches('/').to_string();
        let client = Client::builder(TokioExecutor::new()).build(http_connector(dialer));
        Ok(Self {
            client,
            authority,
            base_path,
        })
    }

    /// Joins a filesystem path onto the base path.
    fn full_path(&self, fs_path: &str) -> String {
        if path::is_root(fs_path) {
            if self.base_path.is_empty() {
                "/".to_string()
            } else {
                self.base_path.clone()
            }
        } else {
            format!("{}{}", self.base_path, fs_path)
        }
    }

    /// Absolute request URL for a filesystem path.
    fn url(&self, fs_path: &str) -> String {
        let full_path = self.full_path(fs_path);
        let encoded = utf8_percent_encode(&full_path, PATH_ENCODE_SET);
        format!("http://{}{}", self.authority, encoded)
    }

    async fn send(
        &self,
        method: Method,
        fs_path: &str,
        headers: &[(&str, String)],
        body: Bytes,
    ) -> DavClientResult<Response<Incoming>> {
        let url = self.url(fs_path);
        trace!(%method, %url, "webdav request");
        let mut builder = Request::builder().method(method).uri(&url);
        for (name, value) in headers {
            builder = builder.header(*name, value.as_str());
        }
        let request = builder
            .body(Full::new(body))
            .map_err(DavClientError::transport)?;
        self.client
            .request(request)
            .await
            .map_err(DavClientError::transport)
    }

    /// Issues a request whose response body is irrelevant beyond the status.
    async fn send_simple(
        &self,
        method: Method,
        fs_path: &str,
        headers: &[(&str, String)],
        body: Bytes,
    ) -> DavClientResult<()> {
        let response = self.send(method, fs_path, headers, body).await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(DavClientError::from_status(status.as_u16()))
        }
    }

    async fn propfind(&self, fs_path: &str, depth: &str) -> DavClientResult<Vec<PropfindEntry>> {
        let method = Method::from_bytes(b"PROPFIND").map_err(DavClientError::transport)?;
        let headers = [
            ("Depth", depth.to_string()),
            ("Content-Type", "application/xml".to_string()),
        ];
        let response = self
            .send(method, fs_path, &headers, Bytes::from_static(PROPFIND_BODY.as_bytes()))
            .await?;
        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            return Err(DavClientError::from_status(status));
        }
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(DavClientError::transport)?
            .to_bytes();
        parse_multistatus(&body)
    }

    fn destination_header(&self, fs_path: &str) -> (&'static str, String) {
        ("Destination", self.url(fs_path))
    }
}

#[async_trait]
impl DavClient for HttpDavClient {
    async fn stat(&self, path: &str) -> DavClientResult<StaticFileInfo> {
        // Compare in decoded, normalized form; hrefs come back encoded.
        let target = normalize_href(&self.full_path(path));
        let mut entries = self.propfind(path, "0").await?;
        let entry = match entries.iter().position(|e| e.path == target) {
            Some(i) => entries.swap_remove(i),
            // Lenient fallback: a depth-0 response has exactly one entry,
            // even if the server rewrote the href.
            None if !entries.is_empty() => entries.swap_remove(0),
            None => {
                return Err(DavClientError::Protocol(
                    "empty multistatus response".into(),
                ))
            }
        };
        Ok(entry.into_info(path::file_name(path)))
    }

    async fn read_dir(&self, path: &str) -> DavClientResult<Vec<StaticFileInfo>> {
        let target = normalize_href(&self.full_path(path));
        let entries = self.propfind(path, "1").await?;
        Ok(entries
            .into_iter()
            .filter(|e| e.path != target)
            .map(|e| {
                let name = path::file_name(&e.path).to_string();
                e.into_info(&name)
            })
            .collect())
    }

    async fn open_read(&self, path: &str) -> DavClientResult<FileStream> {
        let response = self.send(Method::GET, path, &[], Bytes::new()).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DavClientError::from_status(status.as_u16()));
        }
        let stream = response
            .into_body()
            .into_data_stream()
            .map(|chunk| chunk.map_err(DavClientError::transport));
        Ok(Box::pin(stream))
    }

    async fn put(&self, path: &str, body: Bytes) -> DavClientResult<()> {
        self.send_simple(Method::PUT, path, &[], body).await
    }

    async fn mkdir(&self, path: &str) -> DavClientResult<()> {
        let method = Method::from_bytes(b"MKCOL").map_err(DavClientError::transport)?;
        match self.send_simple(method, path, &[], Bytes::new()).await {
            // RFC 4918: MKCOL on an existing resource answers 405.
            Err(DavClientError::NotSupported) => Err(DavClientError::AlreadyExists),
            other => other,
        }
    }

    async fn delete(&self, path: &str) -> DavClientResult<()> {
        self.send_simple(Method::DELETE, path, &[], Bytes::new())
            .await
    }

    async fn move_to(&self, from: &str, to: &str) -> DavClientResult<()> {
        let method = Method::from_bytes(b"MOVE").map_err(DavClientError::transport)?;
        let headers = [
            self.destination_header(to),
            ("Overwrite", "T".to_string()),
        ];
        self.send_simple(method, from, &headers, Bytes::new()).await
    }

    async fn copy_to(&self, from: &str, to: &str) -> DavClientResult<()> {
        let method = Method::from_bytes(b"COPY").map_err(DavClientError::transport)?;
        let headers = [
            self.destination_header(to),
            ("Overwrite", "T".to_string()),
        ];
        self.send_simple(method, from, &headers, Bytes::new()).await
    }
}

/// One `<D:response>` block from a multistatus body.
#[derive(Debug, Default)]
struct PropfindEntry {
    path: String,
    is_dir: bool,
    size: u64,
    modified: Option<SystemTime>,
}

impl PropfindEntry {
    fn into_info(self, name: &str) -> StaticFileInfo {
        let modified = self.modified.unwrap_or(SystemTime::UNIX_EPOCH);
        if self.is_dir {
            StaticFileInfo::dir(name, modified)
        } else {
            StaticFileInfo::file(name, self.size, modified)
        }
    }
}

/// Normalizes an href to a decoded, rooted, no-trailing-slash path.
fn normalize_href(href: &str) -> String {
    let mut rest = href;
    if let Some(idx) = rest.find("://") {
        rest = &rest[idx + 3..];
        rest = rest.find('/').map(|i| &rest[i..]).unwrap_or("/");
    }
    let decoded = percent_decode_str(rest).decode_utf8_lossy();
    let trimmed = decoded.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

/// Parses a PROPFIND multistatus body.
///
/// Only the properties the filesystem layer needs are extracted: href,
/// resource type, content length, and last-modified. Unknown elements are
/// skipped, so responses from servers with richer property sets still parse.
fn parse_multistatus(body: &[u8]) -> DavClientResult<Vec<PropfindEntry>> {
    let mut reader = Reader::from_reader(body);
    let mut entries = Vec::new();
    let mut current: Option<PropfindEntry> = None;
    let mut field: Option<Field> = None;

    #[derive(PartialEq)]
    enum Field {
        Href,
        Length,
        Modified,
    }

    loop {
        let event = reader
            .read_event()
            .map_err(|e| DavClientError::Protocol(e.to_string()))?;
        match event {
            Event::Start(ref e) => match e.local_name().as_ref() {
                b"response" => current = Some(PropfindEntry::default()),
                b"href" => field = Some(Field::Href),
                b"getcontentlength" => field = Some(Field::Length),
                b"getlastmodified" => field = Some(Field::Modified),
                b"collection" => {
                    if let Some(entry) = current.as_mut() {
                        entry.is_dir = true;
                    }
                }
                _ => {}
            },
            Event::Empty(ref e) => {
                if e.local_name().as_ref() == b"collection" {
                    if let Some(entry) = current.as_mut() {
                        entry.is_dir = true;
                    }
                }
            }
            Event::Text(ref t) => {
                let text = t
                    .unescape()
                    .map_err(|e| DavClientError::Protocol(e.to_string()))?;
                let text = text.trim();
                if text.is_empty() {
                    continue;
                }
                if let (Some(entry), Some(field)) = (current.as_mut(), field.as_ref()) {
                    match field {
                        Field::Href => entry.path = normalize_href(text),
                        Field::Length => entry.size = text.parse().unwrap_or(0),
                        Field::Modified => {
                            entry.modified = httpdate::parse_http_date(text).ok();
                        }
                    }
                }
            }
            Event::End(ref e) => match e.local_name().as_ref() {
                b"response" => {
                    if let Some(entry) = current.take() {
                        entries.push(entry);
                    }
                }
                b"href" | b"getcontentlength" | b"getlastmodified" => field = None,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(entries)
}
