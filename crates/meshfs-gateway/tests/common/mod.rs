//! Shared test harness: an in-process share file server.

use dav_server::fakels::FakeLs;
use dav_server::localfs::LocalFs;
use dav_server::DavHandler;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use meshfs_webdav::{ChildFs, CompositeFs, CompositeOptions};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::Path;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// A WebDAV server over local directories, one child per share, the same
/// shape `meshfs serve-shares` produces for the supervisor.
pub struct FileServer {
    pub addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

impl FileServer {
    /// Serves the given `(share name, directory)` pairs on an ephemeral
    /// localhost port.
    pub async fn start(shares: &[(&str, &Path)]) -> Self {
        let cfs = CompositeFs::new(CompositeOptions::default());
        for (name, dir) in shares {
            cfs.add_child(*name, ChildFs::plain(*LocalFs::new(dir, false, false, false)));
        }
        let handler = DavHandler::builder()
            .filesystem(Box::new(cfs))
            .locksystem(FakeLs::new())
            .build_handler();

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind file server");
        let addr = listener.local_addr().expect("local addr");

        let accept_task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let handler = handler.clone();
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);
                    let service = service_fn(move |req: http::Request<Incoming>| {
                        let handler = handler.clone();
                        async move { Ok::<_, Infallible>(handler.handle(req).await) }
                    });
                    let _ = http1::Builder::new().serve_connection(io, service).await;
                });
            }
        });

        Self { addr, accept_task }
    }
}

impl Drop for FileServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

/// Collects a `dav_server` response body into a string.
pub async fn body_string(body: dav_server::body::Body) -> String {
    use http_body_util::BodyExt;
    let bytes = body.collect().await.expect("collect body").to_bytes();
    String::from_utf8_lossy(&bytes).to_string()
}
