/*
 * server_integration.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Gemella, a Gemini protocol server and client.
 *
 * End-to-end server tests over real TLS sockets on loopback: request
 * framing limits, static file serving, traversal containment, middleware
 * rejections, and the Titan upload/delete cycle.
 */

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use gemella_core::client::{ClientOptions, GeminiClient};
use gemella_core::net::TlsStreamWrapper;
use gemella_core::security::tls;
use gemella_core::security::TofuStore;
use gemella_core::server::{Config, GeminiServer, PathRule, RequestHandler, Router};
use gemella_core::{GeminiRequest, GeminiResponse, StatusCode};

struct Capsule {
    addr: std::net::SocketAddr,
    shutdown: gemella_core::server::ShutdownHandle,
    // Held for the lifetime of the test so the directories survive.
    _root: tempfile::TempDir,
    _uploads: tempfile::TempDir,
}

impl Capsule {
    fn url(&self, path_and_params: &str) -> String {
        format!(
            "gemini://{}:{}{}",
            self.addr.ip(),
            self.addr.port(),
            path_and_params
        )
    }
}

impl Drop for Capsule {
    fn drop(&mut self) {
        self.shutdown.shutdown();
    }
}

/// Start a server on an ephemeral port with a populated capsule.
async fn start_server(mutate: impl FnOnce(&mut Config)) -> Capsule {
    start_server_with_router(mutate, None).await
}

async fn start_server_with_router(
    mutate: impl FnOnce(&mut Config),
    router: Option<Router>,
) -> Capsule {
    let root = tempfile::tempdir().unwrap();
    std::fs::write(root.path().join("index.gmi"), "# Hi\n").unwrap();
    std::fs::write(root.path().join("notes.txt"), "plain text\n").unwrap();
    let uploads = tempfile::tempdir().unwrap();

    let mut config = Config::default();
    config.server.host = "127.0.0.1".to_string();
    config.server.port = 0;
    config.server.document_root = root.path().to_path_buf();
    config.server.request_timeout = Duration::from_secs(5);
    config.titan.upload_dir = uploads.path().to_path_buf();
    mutate(&mut config);

    let server = match router {
        Some(router) => GeminiServer::bind_with_router(config, router).await.unwrap(),
        None => GeminiServer::bind(config).await.unwrap(),
    };
    let addr = server.local_addr().unwrap();
    let shutdown = server.shutdown_handle();
    tokio::spawn(server.run());
    Capsule {
        addr,
        shutdown,
        _root: root,
        _uploads: uploads,
    }
}

fn client() -> GeminiClient {
    GeminiClient::new(ClientOptions {
        tofu_store: Some(Arc::new(TofuStore::open_in_memory().unwrap())),
        timeout: Duration::from_secs(5),
        ..ClientOptions::default()
    })
    .unwrap()
}

/// Raw TLS connection for wire-level assertions.
async fn raw_dial(capsule: &Capsule) -> TlsStreamWrapper {
    let config = tls::client_config(None).unwrap();
    TlsStreamWrapper::connect(&capsule.addr.ip().to_string(), capsule.addr.port(), config)
        .await
        .unwrap()
}

async fn raw_roundtrip(capsule: &Capsule, request: &[u8]) -> Vec<u8> {
    let mut stream = raw_dial(capsule).await;
    stream.write_all(request).await.unwrap();
    stream.flush().await.unwrap();
    let mut response = Vec::new();
    let _ = stream.read_to_end(&mut response).await;
    response
}

#[tokio::test]
async fn happy_path_static_file() {
    let capsule = start_server(|_| {}).await;
    let response = client().get(&capsule.url("/")).await.unwrap();
    assert_eq!(response.status, 20);
    assert_eq!(response.meta, "text/gemini; charset=utf-8");
    assert_eq!(response.body, b"# Hi\n");
}

#[tokio::test]
async fn mime_detection_for_plain_text() {
    let capsule = start_server(|_| {}).await;
    let response = client().get(&capsule.url("/notes.txt")).await.unwrap();
    assert_eq!(response.status, 20);
    assert_eq!(response.meta, "text/plain; charset=utf-8");
}

#[tokio::test]
async fn oversize_request_line_gets_59() {
    let capsule = start_server(|_| {}).await;
    let request = vec![b'a'; 1025];
    let response = raw_roundtrip(&capsule, &request).await;
    assert_eq!(response, b"59 Request too large\r\n");
}

#[tokio::test]
async fn invalid_utf8_request_gets_59() {
    let capsule = start_server(|_| {}).await;
    let response = raw_roundtrip(&capsule, b"gemini://\xff\xfe/\r\n").await;
    assert!(response.starts_with(b"59 "));
}

#[tokio::test]
async fn traversal_is_contained_and_undisclosed() {
    let capsule = start_server(|_| {}).await;
    let request = format!(
        "gemini://{}:{}/../etc/passwd\r\n",
        capsule.addr.ip(),
        capsule.addr.port()
    );
    let response = raw_roundtrip(&capsule, request.as_bytes()).await;
    let text = String::from_utf8_lossy(&response);
    assert!(text.starts_with("51 "));
    assert!(!text.contains("/etc/passwd"));
}

#[tokio::test]
async fn missing_file_is_51() {
    let capsule = start_server(|_| {}).await;
    let response = client().get(&capsule.url("/nothing.gmi")).await.unwrap();
    assert_eq!(response.status, 51);
    assert!(response.body.is_empty());
}

#[tokio::test]
async fn rate_limit_hits_44_with_retry_after() {
    let capsule = start_server(|config| {
        config.rate_limit.enabled = true;
        config.rate_limit.capacity = 2;
        config.rate_limit.refill_rate = 1.0;
        config.rate_limit.retry_after = 30;
    })
    .await;
    let client = client();
    assert_eq!(client.get(&capsule.url("/")).await.unwrap().status, 20);
    assert_eq!(client.get(&capsule.url("/")).await.unwrap().status, 20);
    let limited = client.get(&capsule.url("/")).await.unwrap();
    assert_eq!(limited.status, 44);
    assert_eq!(limited.meta, "30");
}

#[tokio::test]
async fn access_control_denies_loopback_when_listed() {
    let capsule = start_server(|config| {
        config.access_control.enabled = true;
        config.access_control.deny_list = vec!["127.0.0.0/8".to_string()];
    })
    .await;
    let response = client().get(&capsule.url("/")).await.unwrap();
    assert_eq!(response.status, 53);
    assert_eq!(response.meta, "Access denied");
}

#[tokio::test]
async fn titan_upload_then_delete() {
    let uploads = tempfile::tempdir().unwrap();
    let upload_root = uploads.path().to_path_buf();
    let capsule = start_server(|config| {
        config.titan.enabled = true;
        config.titan.upload_dir = upload_root.clone();
        config.titan.max_upload_size = 1024 * 1024;
        config.titan.auth_tokens = Some(["T".to_string()].into_iter().collect());
        config.titan.enable_delete = true;
    })
    .await;
    let client = client();

    let response = client
        .upload(
            &capsule.url("/notes/a.gmi"),
            b"hello",
            "text/gemini",
            Some("T"),
        )
        .await
        .unwrap();
    assert_eq!(response.status, 20);
    assert_eq!(response.meta, "Uploaded");
    assert_eq!(
        std::fs::read(uploads.path().join("notes/a.gmi")).unwrap(),
        b"hello"
    );

    let response = client
        .delete(&capsule.url("/notes/a.gmi"), Some("T"))
        .await
        .unwrap();
    assert_eq!(response.status, 20);
    assert_eq!(response.meta, "Deleted");
    assert!(!uploads.path().join("notes/a.gmi").exists());
}

#[tokio::test]
async fn titan_without_token_is_refused() {
    let uploads = tempfile::tempdir().unwrap();
    let upload_root = uploads.path().to_path_buf();
    let capsule = start_server(|config| {
        config.titan.enabled = true;
        config.titan.upload_dir = upload_root.clone();
        config.titan.auth_tokens = Some(["T".to_string()].into_iter().collect());
    })
    .await;
    let response = client()
        .upload(&capsule.url("/a.gmi"), b"hello", "text/gemini", None)
        .await
        .unwrap();
    assert_eq!(response.status, 60);
    assert!(!uploads.path().join("a.gmi").exists());
}

#[tokio::test]
async fn titan_disabled_scheme_is_refused() {
    let capsule = start_server(|_| {}).await;
    let response = client()
        .upload(&capsule.url("/a.gmi"), b"hello", "text/gemini", None)
        .await
        .unwrap();
    assert_eq!(response.status, 53);
}

#[tokio::test]
async fn titan_short_body_is_40() {
    let uploads = tempfile::tempdir().unwrap();
    let upload_root = uploads.path().to_path_buf();
    let capsule = start_server(|config| {
        config.titan.enabled = true;
        config.titan.upload_dir = upload_root.clone();
    })
    .await;
    let mut stream = raw_dial(&capsule).await;
    let line = format!(
        "titan://{}:{}/a.gmi;size=10\r\n",
        capsule.addr.ip(),
        capsule.addr.port()
    );
    stream.write_all(line.as_bytes()).await.unwrap();
    stream.write_all(b"abc").await.unwrap();
    stream.flush().await.unwrap();
    stream.shutdown().await.unwrap();
    let mut response = Vec::new();
    let _ = stream.read_to_end(&mut response).await;
    assert!(String::from_utf8_lossy(&response).starts_with("40 "));
    assert!(!uploads.path().join("a.gmi").exists());
}

#[tokio::test]
async fn client_certificate_rules_gate_paths() {
    let capsule = start_server(|config| {
        config.server.require_client_cert = true;
        config.certificate_auth.paths = vec![PathRule {
            prefix: "/private/".to_string(),
            require_cert: true,
            allowed_fingerprints: Default::default(),
        }];
    })
    .await;

    // Anonymous client: public path fine, protected path refused.
    let anon = client();
    assert_eq!(anon.get(&capsule.url("/")).await.unwrap().status, 20);
    let refused = anon.get(&capsule.url("/private/x")).await.unwrap();
    assert_eq!(refused.status, 60);
    assert_eq!(refused.meta, "Certificate required");

    // Identified client passes the gate (and lands on 51: no such file).
    let dir = tempfile::tempdir().unwrap();
    let (cert_pem, key_pem) =
        gemella_core::security::generate_self_signed("visitor", 30).unwrap();
    let cert_path = dir.path().join("client.pem");
    let key_path = dir.path().join("client.key");
    std::fs::write(&cert_path, cert_pem).unwrap();
    std::fs::write(&key_path, key_pem).unwrap();
    let identified = GeminiClient::new(ClientOptions {
        tofu_store: Some(Arc::new(TofuStore::open_in_memory().unwrap())),
        client_cert: Some((cert_path, key_path)),
        timeout: Duration::from_secs(5),
        ..ClientOptions::default()
    })
    .unwrap();
    let response = identified.get(&capsule.url("/private/x")).await.unwrap();
    assert_eq!(response.status, 51);
}

struct Redirecting {
    target: &'static str,
}

impl RequestHandler for Redirecting {
    fn handle(&self, _request: &GeminiRequest) -> GeminiResponse {
        GeminiResponse::new(StatusCode::RedirectTemporary, self.target)
    }
}

struct Greeting;

impl RequestHandler for Greeting {
    fn handle(&self, _request: &GeminiRequest) -> GeminiResponse {
        GeminiResponse::success("text/gemini; charset=utf-8", b"# New home\n".to_vec())
    }
}

#[tokio::test]
async fn client_follows_redirects_and_refuses_loops() {
    let mut router = Router::new();
    router.add_exact("/old", Arc::new(Redirecting { target: "/new" }));
    router.add_exact("/new", Arc::new(Greeting));
    router.add_exact("/loop", Arc::new(Redirecting { target: "/loop" }));
    let capsule = start_server_with_router(|_| {}, Some(router)).await;

    let client = client();
    let response = client.get(&capsule.url("/old")).await.unwrap();
    assert_eq!(response.status, 20);
    assert_eq!(response.body, b"# New home\n");

    let err = client.get(&capsule.url("/loop")).await.unwrap_err();
    assert!(matches!(
        err,
        gemella_core::ClientError::RedirectLoop(_)
    ));
}

#[tokio::test]
async fn exactly_one_response_then_close() {
    let capsule = start_server(|_| {}).await;
    let mut stream = raw_dial(&capsule).await;
    let line = format!(
        "gemini://{}:{}/\r\ngemini://ignored/\r\n",
        capsule.addr.ip(),
        capsule.addr.port()
    );
    stream.write_all(line.as_bytes()).await.unwrap();
    stream.flush().await.unwrap();
    let mut response = Vec::new();
    let _ = stream.read_to_end(&mut response).await;
    // One header, one body, then EOF: the pipelined second request is
    // never answered.
    let text = String::from_utf8_lossy(&response);
    assert!(text.starts_with("20 "));
    assert_eq!(text.matches("\r\n").count(), 1);
}
