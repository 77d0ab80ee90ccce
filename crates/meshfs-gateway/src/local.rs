//! The gateway serving peers' shares to local WebDAV clients.

use dav_server::memls::MemLs;
use dav_server::DavHandler;
use http::Request;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use meshfs_webdav::{ChildFs, CompositeFs, CompositeOptions, Dialer, RemoteFs, RemoteFsOptions};
use std::collections::HashMap;
use std::convert::Infallible;
use std::fmt::Display;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Configuration for a [`LocalGateway`].
#[derive(Debug, Clone)]
pub struct LocalGatewayOptions {
    /// Stat-cache TTL for the per-peer remote filesystems.
    pub stat_cache_ttl: Duration,
}

impl Default for LocalGatewayOptions {
    fn default() -> Self {
        Self {
            stat_cache_ttl: Duration::from_secs(1),
        }
    }
}

struct LocalGatewayInner {
    root: CompositeFs,
    /// Second-level composites keyed by overlay domain.
    domains: Mutex<HashMap<String, CompositeFs>>,
    handler: DavHandler,
    stat_cache_ttl: Duration,
}

/// Serves the aggregate of remote peers' shares to local clients.
///
/// The virtual tree is `/<domain>/<peer>/<share>/...`: one composite per
/// domain under a single root composite, with one remote filesystem per
/// peer. The WebDAV handler is built once; composites share state with it,
/// so control-plane updates are visible to in-flight serving immediately.
pub struct LocalGateway {
    inner: Arc<LocalGatewayInner>,
}

impl LocalGateway {
    /// Creates an empty gateway.
    pub fn new(options: LocalGatewayOptions) -> Self {
        let root = CompositeFs::new(CompositeOptions::default());
        let handler = DavHandler::builder()
            .filesystem(Box::new(root.clone()))
            .locksystem(MemLs::new())
            .build_handler();
        Self {
            inner: Arc::new(LocalGatewayInner {
                root,
                domains: Mutex::new(HashMap::new()),
                handler,
                stat_cache_ttl: options.stat_cache_ttl,
            }),
        }
    }

    fn lock_domains(&self) -> MutexGuard<'_, HashMap<String, CompositeFs>> {
        self.inner.domains.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Installs the complete set of peers for `domain`.
    ///
    /// `names_to_urls` maps peer names to their WebDAV base URLs; `dialer`
    /// supplies the transport (typically the overlay network's dialer) and
    /// is shared by all peers of the domain. Peers installed earlier but
    /// absent from the new map are closed.
    pub fn set_remotes(
        &self,
        domain: &str,
        names_to_urls: &HashMap<String, String>,
        dialer: Arc<dyn Dialer>,
    ) {
        let mut children = HashMap::new();
        for (name, url) in names_to_urls {
            let options = RemoteFsOptions {
                url: url.clone(),
                stat_cache_ttl: self.inner.stat_cache_ttl,
                ..RemoteFsOptions::default()
            };
            match RemoteFs::connect(&options, Arc::clone(&dialer)) {
                Ok(fs) => {
                    children.insert(name.clone(), ChildFs::closeable(fs));
                }
                Err(err) => {
                    warn!(peer = %name, %url, error = %err, "skipping peer with unusable URL");
                }
            }
        }

        let (domain_cfs, created) = {
            let mut domains = self.lock_domains();
            match domains.get(domain) {
                Some(existing) => (existing.clone(), false),
                None => {
                    let cfs = CompositeFs::new(CompositeOptions::default());
                    domains.insert(domain.to_string(), cfs.clone());
                    (cfs, true)
                }
            }
        };
        if created {
            self.inner
                .root
                .add_child(domain, ChildFs::closeable(domain_cfs.clone()));
        }
        debug!(%domain, peers = children.len(), "installing remotes");
        domain_cfs.set_children(children);
    }

    /// Serves one accepted client connection.
    ///
    /// The connection is driven on a spawned task; errors end that
    /// connection only.
    pub fn handle_conn<S, A>(&self, stream: S, remote_addr: A) -> JoinHandle<()>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
        A: Display + Send + 'static,
    {
        let handler = self.inner.handler.clone();
        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let service = service_fn(move |req: Request<Incoming>| {
                let handler = handler.clone();
                async move { Ok::<_, Infallible>(handler.handle(req).await) }
            });
            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                if !err.is_incomplete_message() {
                    warn!(peer = %remote_addr, error = %err, "webdav connection error");
                }
            }
        })
    }

    /// Stops serving and closes every domain and peer filesystem.
    pub fn close(&self) {
        self.lock_domains().clear();
        self.inner.root.close();
    }
}
