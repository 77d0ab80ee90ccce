//! The gateway serving this node's shares to peers.

use crate::permissions::{is_write_method, Permission, Permissions};
use crate::share::Share;
use crate::user_server::{Launcher, UserServer};
use async_trait::async_trait;
use dav_server::body::Body;
use dav_server::memls::MemLs;
use dav_server::DavHandler;
use http::{Request, Response, StatusCode};
use meshfs_webdav::{
    ChildFs, CompositeFs, CompositeOptions, DialedStream, Dialer, RemoteFs, RemoteFsOptions,
};
use std::collections::HashMap;
use std::io;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::Duration;
use tracing::{debug, warn};

/// Stat-cache TTL for per-share filesystems. Short: peers see near-live
/// metadata while repeated PROPFINDs within one request burst stay free.
const SHARE_STAT_CACHE_TTL: Duration = Duration::from_secs(1);

#[derive(Default)]
struct RemoteState {
    file_server_addr: Option<String>,
    shares: HashMap<String, Share>,
    filesystems: HashMap<String, RemoteFs>,
    user_servers: HashMap<String, UserServer>,
}

struct RemoteGatewayInner {
    allow_share_as: bool,
    launcher: Option<Launcher>,
    lock_system: Box<MemLs>,
    state: RwLock<RemoteState>,
}

impl RemoteGatewayInner {
    fn read(&self) -> RwLockReadGuard<'_, RemoteState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, RemoteState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// WebDAV gateway exposed to remote peers.
///
/// Holds the current share set and one remote filesystem per share. Each
/// filesystem's base URL uses the share name as its host; the dialer
/// resolves that name back to either the process-wide file server or the
/// owner's per-user file server at connection time, so control-plane swaps
/// never invalidate open filesystems.
pub struct RemoteGateway {
    inner: Arc<RemoteGatewayInner>,
}

impl RemoteGateway {
    /// Creates a gateway.
    ///
    /// `allow_share_as` decides how file I/O reaches the disk: one
    /// subprocess per owning user when true (see
    /// [`platform_allows_share_as`](crate::platform_allows_share_as)), the
    /// address set by [`set_file_server_addr`](Self::set_file_server_addr)
    /// when false.
    pub fn new(allow_share_as: bool) -> Self {
        Self {
            inner: Arc::new(RemoteGatewayInner {
                allow_share_as,
                launcher: None,
                lock_system: MemLs::new(),
                state: RwLock::new(RemoteState::default()),
            }),
        }
    }

    /// Creates a gateway whose user servers spawn via `launcher` instead of
    /// the sudo elevation wrapper.
    pub fn with_launcher(allow_share_as: bool, launcher: Launcher) -> Self {
        Self {
            inner: Arc::new(RemoteGatewayInner {
                allow_share_as,
                launcher: Some(launcher),
                lock_system: MemLs::new(),
                state: RwLock::new(RemoteState::default()),
            }),
        }
    }

    /// Sets the address of the process-wide file server used when share-as
    /// is unavailable.
    pub fn set_file_server_addr(&self, addr: impl Into<String>) {
        self.inner.write().file_server_addr = Some(addr.into());
    }

    /// Installs the complete set of shares exposed by this node.
    ///
    /// Last writer wins. Displaced user servers and filesystems are shut
    /// down after the new set is visible.
    pub fn set_shares(&self, shares: Vec<Share>) {
        let mut user_servers = HashMap::new();
        if self.inner.allow_share_as {
            let mut by_owner: HashMap<String, Vec<Share>> = HashMap::new();
            for share in &shares {
                by_owner
                    .entry(share.owner.clone())
                    .or_default()
                    .push(share.clone());
            }
            for (owner, owner_shares) in by_owner {
                let server = match &self.inner.launcher {
                    Some(launcher) => {
                        UserServer::start_with(&owner, owner_shares, Arc::clone(launcher))
                    }
                    None => UserServer::start(&owner, owner_shares),
                };
                user_servers.insert(owner, server);
            }
        }

        let dialer: Arc<dyn Dialer> = Arc::new(ShareDialer {
            gateway: Arc::downgrade(&self.inner),
        });
        let mut filesystems = HashMap::new();
        for share in &shares {
            let options = RemoteFsOptions {
                // The share name doubles as the host; the dialer turns it
                // back into a concrete file server address.
                url: format!("http://{0}/{0}", share.name),
                stat_cache_ttl: SHARE_STAT_CACHE_TTL,
                stat_root: true,
                ..RemoteFsOptions::default()
            };
            match RemoteFs::connect(&options, Arc::clone(&dialer)) {
                Ok(fs) => {
                    filesystems.insert(share.name.clone(), fs);
                }
                Err(err) => {
                    warn!(share = %share.name, error = %err, "skipping share with unusable name");
                }
            }
        }

        let shares_by_name = shares
            .into_iter()
            .map(|share| (share.name.clone(), share))
            .collect();

        let (old_servers, old_filesystems) = {
            let mut state = self.inner.write();
            state.shares = shares_by_name;
            let old_filesystems = std::mem::replace(&mut state.filesystems, filesystems);
            let old_servers = std::mem::replace(&mut state.user_servers, user_servers);
            (old_servers, old_filesystems)
        };
        stop_user_servers(old_servers);
        close_filesystems(old_filesystems);
    }

    /// Serves one WebDAV request on behalf of a principal.
    ///
    /// Write methods are gated before dispatch: a share the principal
    /// cannot see answers 404 rather than 403, so its existence is not
    /// disclosed. The request then runs against a composite containing
    /// exactly the shares with non-`None` permission.
    pub async fn handle<B>(
        &self,
        permissions: &dyn Permissions,
        request: Request<B>,
    ) -> Response<Body>
    where
        B: http_body::Body + Send + 'static,
        B::Data: bytes::Buf + Send + 'static,
        B::Error: std::error::Error + Send + Sync + 'static,
    {
        if is_write_method(request.method()) {
            let path = request.uri().path();
            let share = meshfs_webdav::path::split(path).first().copied().unwrap_or("");
            match permissions.for_share(share) {
                Permission::None => {
                    debug!(%share, "write to invisible share");
                    return status_response(StatusCode::NOT_FOUND);
                }
                Permission::ReadOnly => {
                    debug!(%share, "write to read-only share");
                    return status_response(StatusCode::FORBIDDEN);
                }
                Permission::ReadWrite => {}
            }
        }

        let filesystems = self.inner.read().filesystems.clone();
        let mut children = HashMap::new();
        for (name, fs) in filesystems {
            if permissions.for_share(&name) != Permission::None {
                children.insert(name, ChildFs::plain(fs));
            }
        }

        // Ephemeral per-request composite: cheap to build, and it can never
        // serve stale authorization state. StatChildren gives peers real
        // per-share mtimes.
        let cfs = CompositeFs::new(CompositeOptions {
            stat_children: true,
            clock: None,
        });
        cfs.set_children(children);
        let handler = DavHandler::builder()
            .filesystem(Box::new(cfs))
            .locksystem(self.inner.lock_system.clone())
            .build_handler();
        handler.handle(request).await
    }

    /// Stops serving: shuts down user servers and closes filesystems.
    pub fn close(&self) {
        let (servers, filesystems) = {
            let mut state = self.inner.write();
            (
                std::mem::take(&mut state.user_servers),
                std::mem::take(&mut state.filesystems),
            )
        };
        stop_user_servers(servers);
        close_filesystems(filesystems);
    }
}

fn stop_user_servers(servers: HashMap<String, UserServer>) {
    for (_, server) in servers {
        server.shutdown();
    }
}

fn close_filesystems(filesystems: HashMap<String, RemoteFs>) {
    for (_, fs) in filesystems {
        fs.close();
    }
}

fn status_response(status: StatusCode) -> Response<Body> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;
    response
}

/// Resolves dialed share names to file server addresses.
///
/// Holds only a weak reference to the gateway: filesystems own their dialer,
/// and a back-edge would keep the gateway alive through its own children.
struct ShareDialer {
    gateway: Weak<RemoteGatewayInner>,
}

#[async_trait]
impl Dialer for ShareDialer {
    async fn dial(&self, addr: &str) -> io::Result<DialedStream> {
        let share_name = addr.rsplit_once(':').map(|(host, _)| host).unwrap_or(addr);
        let inner = self
            .gateway
            .upgrade()
            .ok_or_else(|| io::Error::other("gateway closed"))?;

        let resolved = {
            let state = inner.read();
            let share = state.shares.get(share_name).ok_or_else(|| {
                io::Error::other(format!("unknown share {share_name}"))
            })?;
            if inner.allow_share_as {
                state
                    .user_servers
                    .get(&share.owner)
                    .and_then(|server| server.bound_addr())
            } else {
                state.file_server_addr.clone()
            }
        };

        let target = resolved.ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotConnected,
                format!("no file server address for share {share_name}"),
            )
        })?;
        DialedStream::connect(&target).await
    }
}
