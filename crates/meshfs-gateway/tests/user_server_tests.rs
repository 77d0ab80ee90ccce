//! User-server supervision: bootstrap handshake, restart, shutdown.

#![cfg(unix)]

use meshfs_gateway::{Launcher, UserServer};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::{sleep, timeout};

/// Launcher whose child prints a per-spawn address and then lives for
/// `lifetime`. The port counts up so restarts are observable.
fn stub_launcher(base_port: u16, lifetime: &'static str) -> (Launcher, Arc<AtomicUsize>) {
    let spawns = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&spawns);
    let launcher: Launcher = Arc::new(move |_owner, _shares| {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c").arg(format!(
            "echo 127.0.0.1:{}; sleep {lifetime}",
            base_port + n as u16
        ));
        cmd
    });
    (launcher, spawns)
}

/// Polls until `bound_addr` matches `expected`.
async fn wait_for_addr(server: &UserServer, expected: &str) {
    timeout(Duration::from_secs(2), async {
        loop {
            if server.bound_addr().as_deref() == Some(expected) {
                return;
            }
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap_or_else(|_| {
        panic!(
            "address never became {expected}, last seen {:?}",
            server.bound_addr()
        )
    });
}

#[tokio::test]
async fn test_bootstrap_address_is_published() {
    let (launcher, _) = stub_launcher(50_500, "30");
    let server = UserServer::start_with("nobody", vec![], launcher);

    assert_eq!(server.bound_addr(), None, "no address before bootstrap");
    wait_for_addr(&server, "127.0.0.1:50500").await;
    assert_eq!(server.owner(), "nobody");

    server.shutdown();
}

#[tokio::test]
async fn test_restart_after_exit_publishes_new_address() {
    // Child dies quickly; the supervisor restarts it after its backoff and
    // reads a fresh address.
    let (launcher, spawns) = stub_launcher(50_600, "0.1");
    let server = UserServer::start_with("nobody", vec![], launcher);

    // The first child dies ~100ms in; a restart must be observable within
    // 2 seconds of its death.
    timeout(Duration::from_secs(3), async {
        loop {
            if server.bound_addr().as_deref() == Some("127.0.0.1:50601") {
                return;
            }
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("restart did not happen in time");

    assert!(spawns.load(Ordering::SeqCst) >= 2);
    server.shutdown();
}

#[tokio::test]
async fn test_shutdown_stops_restarting() {
    let (launcher, spawns) = stub_launcher(50_700, "2");
    let server = UserServer::start_with("nobody", vec![], launcher);

    wait_for_addr(&server, "127.0.0.1:50700").await;
    server.shutdown();
    // Idempotent.
    server.shutdown();

    sleep(Duration::from_millis(300)).await;
    let spawned = spawns.load(Ordering::SeqCst);
    sleep(Duration::from_secs(1)).await;
    assert_eq!(
        spawns.load(Ordering::SeqCst),
        spawned,
        "supervisor kept spawning after shutdown"
    );
}

#[tokio::test]
async fn test_child_dying_before_address_keeps_addr_unset() {
    let launcher: Launcher = Arc::new(|_owner, _shares| {
        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c").arg("exit 1");
        cmd
    });
    let server = UserServer::start_with("nobody", vec![], launcher);

    sleep(Duration::from_millis(200)).await;
    assert_eq!(server.bound_addr(), None);
    server.shutdown();
}
