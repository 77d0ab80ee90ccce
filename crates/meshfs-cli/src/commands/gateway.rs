//! Standalone remote gateway for manual testing.
//!
//! Loads a share control file, exposes the shares over WebDAV, and serves
//! plain TCP clients. Without an overlay network in front of it there is no
//! authenticated principal, so access defaults to full; `--principal`
//! evaluates a principal against the shares' reader/writer lists instead.

use anyhow::{Context, Result};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use meshfs_gateway::{
    permissions_for_principal, platform_allows_share_as, FullAccess, Permissions, RemoteGateway,
    Share,
};
use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[derive(clap::Args)]
pub struct Args {
    /// Share control file: a JSON array of shares
    #[arg(long)]
    shares: PathBuf,

    /// TCP address to listen on
    #[arg(long, default_value = "127.0.0.1:8080")]
    listen: String,

    /// Evaluate this principal against the shares' readers/writers lists
    #[arg(long)]
    principal: Option<String>,
}

pub async fn run(args: Args) -> Result<()> {
    let raw = std::fs::read(&args.shares)
        .with_context(|| format!("read {}", args.shares.display()))?;
    let shares: Vec<Share> = serde_json::from_slice(&raw)
        .with_context(|| format!("parse {}", args.shares.display()))?;

    let permissions: Arc<dyn Permissions> = match &args.principal {
        Some(principal) => Arc::new(permissions_for_principal(&shares, principal)),
        None => Arc::new(FullAccess),
    };

    let gateway = Arc::new(RemoteGateway::new(platform_allows_share_as()));
    gateway.set_shares(shares);

    let listener = TcpListener::bind(&args.listen)
        .await
        .with_context(|| format!("bind {}", args.listen))?;
    info!(addr = %listener.local_addr().context("local addr")?, "gateway listening");

    loop {
        let (stream, peer) = listener.accept().await.context("accept")?;
        let gateway = Arc::clone(&gateway);
        let permissions = Arc::clone(&permissions);
        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let service = service_fn(move |req: http::Request<Incoming>| {
                let gateway = Arc::clone(&gateway);
                let permissions = Arc::clone(&permissions);
                async move { Ok::<_, Infallible>(gateway.handle(&*permissions, req).await) }
            });
            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                if !err.is_incomplete_message() {
                    warn!(%peer, error = %err, "webdav connection error");
                }
            }
        });
    }
}
