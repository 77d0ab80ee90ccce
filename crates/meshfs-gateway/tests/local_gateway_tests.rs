//! Local gateway: aggregating peers under domains and serving raw client
//! connections.

mod common;

use bytes::Bytes;
use common::FileServer;
use http::{Method, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use meshfs_gateway::{LocalGateway, LocalGatewayOptions};
use meshfs_webdav::TcpDialer;
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::TempDir;

/// Hyper client speaking HTTP/1 over an in-memory duplex pipe into
/// `handle_conn`.
struct PipeClient {
    send: hyper::client::conn::http1::SendRequest<Full<Bytes>>,
}

impl PipeClient {
    async fn connect(gateway: &LocalGateway) -> Self {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        gateway.handle_conn(server_io, "pipe-client");
        let (send, conn) = hyper::client::conn::http1::handshake(TokioIo::new(client_io))
            .await
            .expect("handshake");
        tokio::spawn(async move {
            let _ = conn.await;
        });
        Self { send }
    }

    async fn request(&mut self, method: &str, path: &str, depth: Option<&str>) -> (StatusCode, String) {
        let mut builder = Request::builder()
            .method(Method::from_bytes(method.as_bytes()).expect("method"))
            .uri(path)
            .header("Host", "meshfs");
        if let Some(depth) = depth {
            builder = builder.header("Depth", depth);
        }
        let request = builder.body(Full::new(Bytes::new())).expect("request");
        let response = self.send.send_request(request).await.expect("send");
        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .expect("collect")
            .to_bytes();
        (status, String::from_utf8_lossy(&body).to_string())
    }
}

async fn fixture() -> (LocalGateway, FileServer, TempDir) {
    let tmp = TempDir::new().expect("tempdir");
    let docs = tmp.path().join("docs");
    std::fs::create_dir(&docs).expect("mkdir");
    std::fs::write(docs.join("hello.txt"), b"hello over the mesh").expect("seed");

    let server = FileServer::start(&[("docs", &docs)]).await;

    let gateway = LocalGateway::new(LocalGatewayOptions::default());
    let peers: HashMap<String, String> =
        [("peer1".to_string(), format!("http://{}", server.addr))].into();
    gateway.set_remotes("example.mesh", &peers, Arc::new(TcpDialer));

    (gateway, server, tmp)
}

#[tokio::test]
async fn test_root_lists_domains() {
    let (gateway, _server, _tmp) = fixture().await;
    let mut client = PipeClient::connect(&gateway).await;

    let (status, body) = client.request("PROPFIND", "/", Some("1")).await;
    assert_eq!(status, StatusCode::MULTI_STATUS);
    assert!(body.contains("example.mesh"), "domain missing from: {body}");
}

#[tokio::test]
async fn test_domain_lists_peers() {
    let (gateway, _server, _tmp) = fixture().await;
    let mut client = PipeClient::connect(&gateway).await;

    let (status, body) = client.request("PROPFIND", "/example.mesh", Some("1")).await;
    assert_eq!(status, StatusCode::MULTI_STATUS);
    assert!(body.contains("peer1"), "peer missing from: {body}");
}

#[tokio::test]
async fn test_read_through_both_gateways() {
    let (gateway, _server, _tmp) = fixture().await;
    let mut client = PipeClient::connect(&gateway).await;

    let (status, body) = client
        .request("GET", "/example.mesh/peer1/docs/hello.txt", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "hello over the mesh");
}

#[tokio::test]
async fn test_unknown_peer_is_not_found() {
    let (gateway, _server, _tmp) = fixture().await;
    let mut client = PipeClient::connect(&gateway).await;

    let (status, _) = client
        .request("GET", "/example.mesh/ghost/docs/x", None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_set_remotes_replaces_peer_set() {
    let (gateway, server, _tmp) = fixture().await;

    // Same domain, renamed peer: full replacement semantics.
    let peers: HashMap<String, String> =
        [("peer2".to_string(), format!("http://{}", server.addr))].into();
    gateway.set_remotes("example.mesh", &peers, Arc::new(TcpDialer));

    let mut client = PipeClient::connect(&gateway).await;
    let (status, body) = client.request("PROPFIND", "/example.mesh", Some("1")).await;
    assert_eq!(status, StatusCode::MULTI_STATUS);
    assert!(body.contains("peer2"));
    assert!(!body.contains("peer1"), "old peer leaked into: {body}");
}
