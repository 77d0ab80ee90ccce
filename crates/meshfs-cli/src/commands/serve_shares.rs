//! The per-user file server.
//!
//! Serves a composite of local directories over WebDAV. The first line on
//! stdout is the bound address: `host:port` for TCP, the socket path for a
//! Unix socket. The supervising parent reads that line, then treats the
//! rest of our output as diagnostics.

use anyhow::{bail, Context, Result};
use dav_server::fakels::FakeLs;
use dav_server::localfs::LocalFs;
use dav_server::DavHandler;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use meshfs_webdav::{ChildFs, CompositeFs, CompositeOptions};
use std::convert::Infallible;
use std::io::Write;
use std::path::PathBuf;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
#[cfg(unix)]
use tokio::net::UnixListener;
use tracing::{debug, warn};

#[derive(clap::Args)]
pub struct Args {
    /// Shares to serve, as NAME PATH pairs
    #[arg(value_name = "NAME PATH", required = true, num_args = 2..)]
    shares: Vec<String>,

    /// TCP address to listen on
    #[arg(long, default_value = "127.0.0.1:0")]
    listen: String,

    /// Listen on a Unix socket path instead of TCP
    #[cfg(unix)]
    #[arg(long)]
    socket: Option<PathBuf>,
}

pub async fn run(args: Args) -> Result<()> {
    if args.shares.len() % 2 != 0 {
        bail!("shares must be given as NAME PATH pairs");
    }

    let cfs = CompositeFs::new(CompositeOptions::default());
    for pair in args.shares.chunks_exact(2) {
        let (name, path) = (&pair[0], PathBuf::from(&pair[1]));
        if !path.is_dir() {
            bail!("share {name}: {} is not a directory", path.display());
        }
        debug!(share = %name, path = %path.display(), "serving share");
        cfs.add_child(name, ChildFs::plain(*LocalFs::new(&path, false, false, false)));
    }

    let handler = DavHandler::builder()
        .filesystem(Box::new(cfs))
        .locksystem(FakeLs::new())
        .build_handler();

    #[cfg(unix)]
    if let Some(socket) = args.socket {
        let listener = UnixListener::bind(&socket)
            .with_context(|| format!("bind {}", socket.display()))?;
        announce(&socket.display().to_string())?;
        loop {
            let (stream, _) = listener.accept().await.context("accept")?;
            serve_connection(stream, handler.clone());
        }
    }

    let listener = TcpListener::bind(&args.listen)
        .await
        .with_context(|| format!("bind {}", args.listen))?;
    announce(&listener.local_addr().context("local addr")?.to_string())?;
    loop {
        let (stream, _) = listener.accept().await.context("accept")?;
        serve_connection(stream, handler.clone());
    }
}

/// Prints the bound address as our first line of stdout.
fn announce(addr: &str) -> Result<()> {
    let mut stdout = std::io::stdout();
    writeln!(stdout, "{addr}").context("write address")?;
    stdout.flush().context("flush address")?;
    Ok(())
}

fn serve_connection<S>(stream: S, handler: DavHandler)
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let io = TokioIo::new(stream);
        let service = service_fn(move |req: http::Request<Incoming>| {
            let handler = handler.clone();
            async move { Ok::<_, Infallible>(handler.handle(req).await) }
        });
        if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
            if !err.is_incomplete_message() {
                warn!(error = %err, "webdav connection error");
            }
        }
    });
}
