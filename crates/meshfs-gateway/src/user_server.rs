//! Per-user file server supervision.
//!
//! When share-as is available, file I/O for a share runs in a subprocess
//! started as the share's owning user, so OS-level permissions apply. One
//! [`UserServer`] supervises the subprocess for one owner: it spawns the
//! child, reads the bootstrap address from the first line of the child's
//! stdout, publishes it for dialers, and restarts the child when it dies.

use crate::share::Share;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Delay between restart attempts.
const RESTART_DELAY: Duration = Duration::from_secs(1);

/// Upper bound on the bootstrap address line. A hostile child must not be
/// able to grow the line buffer without bound.
const MAX_ADDR_LINE: u64 = 4096;

/// Builds the subprocess command for an owner and their shares.
///
/// Injectable so tests can substitute a stub child.
pub type Launcher = Arc<dyn Fn(&str, &[Share]) -> Command + Send + Sync>;

/// The production launcher: re-run this executable under sudo as the owner.
fn elevation_launcher() -> Launcher {
    Arc::new(|owner, shares| {
        let executable =
            std::env::current_exe().unwrap_or_else(|_| PathBuf::from("meshfs"));
        let mut cmd = Command::new("sudo");
        cmd.arg("-u").arg(owner).arg(executable).arg("serve-shares");
        for share in shares {
            cmd.arg(&share.name).arg(&share.path);
        }
        cmd
    })
}

struct UserServerInner {
    owner: String,
    shares: Vec<Share>,
    addr: RwLock<Option<String>>,
}

impl UserServerInner {
    fn set_addr(&self, addr: Option<String>) {
        let mut guard = self.addr.write().unwrap_or_else(|e| e.into_inner());
        *guard = addr;
    }
}

/// Supervisor for one owner's file server subprocess.
///
/// Exactly one live subprocess per owner: the supervision task restarts the
/// child on exit and [`shutdown`](UserServer::shutdown) kills it and stops
/// the loop.
pub struct UserServer {
    inner: Arc<UserServerInner>,
    shutdown_tx: watch::Sender<bool>,
}

impl UserServer {
    /// Starts supervising a file server for `owner`, serving `shares`.
    pub fn start(owner: impl Into<String>, shares: Vec<Share>) -> Self {
        Self::start_with(owner, shares, elevation_launcher())
    }

    /// Starts supervision with a custom subprocess launcher.
    pub fn start_with(
        owner: impl Into<String>,
        shares: Vec<Share>,
        launcher: Launcher,
    ) -> Self {
        let inner = Arc::new(UserServerInner {
            owner: owner.into(),
            shares,
            addr: RwLock::new(None),
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(supervise(Arc::clone(&inner), launcher, shutdown_rx));
        Self { inner, shutdown_tx }
    }

    /// The child's bootstrap address, or `None` until the first successful
    /// bootstrap (and between a crash and the next one).
    ///
    /// Dialers must treat `None` as "unavailable" and fail the connection.
    pub fn bound_addr(&self) -> Option<String> {
        self.inner
            .addr
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// The owner this server runs as.
    pub fn owner(&self) -> &str {
        &self.inner.owner
    }

    /// Stops the supervision loop and kills the live child. Idempotent.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

async fn supervise(
    inner: Arc<UserServerInner>,
    launcher: Launcher,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        match run_once(&inner, &launcher, &mut shutdown).await {
            Ok(Some(status)) => {
                warn!(owner = %inner.owner, %status, "user file server exited, restarting");
            }
            Ok(None) => {
                debug!(owner = %inner.owner, "user file server shut down");
                return;
            }
            Err(err) => {
                warn!(owner = %inner.owner, error = %err, "user file server failed, restarting");
            }
        }
        inner.set_addr(None);
        tokio::select! {
            _ = tokio::time::sleep(RESTART_DELAY) => {}
            _ = shutdown.changed() => return,
        }
    }
}

/// One subprocess lifetime: spawn, bootstrap, drain, wait.
///
/// Returns `Ok(None)` when shutdown interrupted the run.
async fn run_once(
    inner: &Arc<UserServerInner>,
    launcher: &Launcher,
    shutdown: &mut watch::Receiver<bool>,
) -> io::Result<Option<std::process::ExitStatus>> {
    let mut cmd = launcher(&inner.owner, &inner.shares);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    let mut child = cmd.spawn()?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| io::Error::other("child has no stdout"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| io::Error::other("child has no stderr"))?;

    // The child's first stdout line is its bound address.
    let mut bounded = BufReader::new(stdout).take(MAX_ADDR_LINE);
    let mut line = String::new();
    tokio::select! {
        read = bounded.read_line(&mut line) => {
            if read? == 0 {
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Err(io::Error::other(
                    "file server exited before printing its address",
                ));
            }
        }
        _ = shutdown.changed() => {
            let _ = child.start_kill();
            let _ = child.wait().await;
            return Ok(None);
        }
    }
    let addr = line.trim().to_string();
    if addr.is_empty() {
        let _ = child.start_kill();
        let _ = child.wait().await;
        return Err(io::Error::other("file server printed an empty address"));
    }
    info!(owner = %inner.owner, %addr, "user file server bound");
    inner.set_addr(Some(addr));

    // Drain the remaining output so the child never blocks on a full pipe.
    let owner = inner.owner.clone();
    let mut stdout_lines = bounded.into_inner().lines();
    tokio::spawn(async move {
        while let Ok(Some(line)) = stdout_lines.next_line().await {
            debug!(owner = %owner, "serve-shares stdout: {line}");
        }
    });
    let owner = inner.owner.clone();
    let mut stderr_lines = BufReader::new(stderr).lines();
    tokio::spawn(async move {
        while let Ok(Some(line)) = stderr_lines.next_line().await {
            debug!(owner = %owner, "serve-shares stderr: {line}");
        }
    });

    tokio::select! {
        status = child.wait() => status.map(Some),
        _ = shutdown.changed() => {
            let _ = child.start_kill();
            let _ = child.wait().await;
            Ok(None)
        }
    }
}
