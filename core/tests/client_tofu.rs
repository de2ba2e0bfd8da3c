/*
 * client_tofu.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Gemella, a Gemini protocol server and client.
 *
 * Client-side certificate continuity tests: first-use trust, stored
 * fingerprint reuse, change detection before the request is written, and
 * the first-use-forbidden policy.
 */

use std::sync::Arc;
use std::time::Duration;

use gemella_core::client::{ClientError, ClientOptions, GeminiClient};
use gemella_core::security::TofuStore;
use gemella_core::server::{Config, GeminiServer};

async fn start_server() -> (std::net::SocketAddr, gemella_core::server::ShutdownHandle, tempfile::TempDir) {
    let root = tempfile::tempdir().unwrap();
    std::fs::write(root.path().join("index.gmi"), "# Hi\n").unwrap();
    let mut config = Config::default();
    config.server.host = "127.0.0.1".to_string();
    config.server.port = 0;
    config.server.document_root = root.path().to_path_buf();
    config.server.request_timeout = Duration::from_secs(5);
    let server = GeminiServer::bind(config).await.unwrap();
    let addr = server.local_addr().unwrap();
    let shutdown = server.shutdown_handle();
    tokio::spawn(server.run());
    (addr, shutdown, root)
}

fn client_with(store: Arc<TofuStore>, trust_on_first_use: bool) -> GeminiClient {
    GeminiClient::new(ClientOptions {
        tofu_store: Some(store),
        trust_on_first_use,
        timeout: Duration::from_secs(5),
        ..ClientOptions::default()
    })
    .unwrap()
}

#[tokio::test]
async fn first_use_records_then_matches() {
    let (addr, shutdown, _root) = start_server().await;
    let store = Arc::new(TofuStore::open_in_memory().unwrap());
    let client = client_with(store.clone(), true);
    let url = format!("gemini://{}:{}/", addr.ip(), addr.port());

    assert_eq!(client.get(&url).await.unwrap().status, 20);
    let entry = store
        .get(&addr.ip().to_string(), addr.port())
        .unwrap()
        .expect("host recorded on first use");
    assert!(entry.fingerprint.starts_with("sha256:"));
    let first_seen = entry.first_seen;

    // Second request verifies against the stored fingerprint.
    assert_eq!(client.get(&url).await.unwrap().status, 20);
    let entry = store
        .get(&addr.ip().to_string(), addr.port())
        .unwrap()
        .unwrap();
    assert_eq!(entry.first_seen, first_seen);
    assert!(entry.last_seen >= first_seen);
    shutdown.shutdown();
}

#[tokio::test]
async fn first_use_forbidden_aborts() {
    let (addr, shutdown, _root) = start_server().await;
    let store = Arc::new(TofuStore::open_in_memory().unwrap());
    let client = client_with(store.clone(), false);
    let url = format!("gemini://{}:{}/", addr.ip(), addr.port());

    match client.get(&url).await.unwrap_err() {
        ClientError::UntrustedHost {
            host,
            port,
            fingerprint,
        } => {
            assert_eq!(host, addr.ip().to_string());
            assert_eq!(port, addr.port());
            assert!(fingerprint.starts_with("sha256:"));
        }
        other => panic!("expected UntrustedHost, got {}", other),
    }
    // Nothing was recorded.
    assert!(store
        .get(&addr.ip().to_string(), addr.port())
        .unwrap()
        .is_none());
    shutdown.shutdown();
}

#[tokio::test]
async fn changed_certificate_aborts_before_request() {
    let (addr, shutdown, _root) = start_server().await;
    let store = Arc::new(TofuStore::open_in_memory().unwrap());
    // Seed the store with a different certificate for this host.
    let stale_der = vec![0x42u8; 96];
    store
        .trust(&addr.ip().to_string(), addr.port(), &stale_der)
        .unwrap();
    let stale_fingerprint = gemella_core::security::fingerprint(&stale_der);

    let client = client_with(store.clone(), true);
    let url = format!("gemini://{}:{}/", addr.ip(), addr.port());
    match client.get(&url).await.unwrap_err() {
        ClientError::CertificateChanged {
            host,
            port,
            old_fingerprint,
            new_fingerprint,
        } => {
            assert_eq!(host, addr.ip().to_string());
            assert_eq!(port, addr.port());
            assert_eq!(old_fingerprint, stale_fingerprint);
            assert_ne!(new_fingerprint, old_fingerprint);
        }
        other => panic!("expected CertificateChanged, got {}", other),
    }
    // The stored fingerprint is never silently replaced.
    let entry = store
        .get(&addr.ip().to_string(), addr.port())
        .unwrap()
        .unwrap();
    assert_eq!(entry.fingerprint, stale_fingerprint);

    // Revoking the stale record turns the next contact into first use.
    store.revoke(&addr.ip().to_string(), addr.port()).unwrap();
    assert_eq!(client.get(&url).await.unwrap().status, 20);
    shutdown.shutdown();
}
