/*
 * server.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Gemella, a Gemini protocol server and client.
 *
 * Gemella is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Gemella is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Gemella.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Server lifecycle: bind, accept loop spawning one task per connection,
//! periodic rate-limit bucket eviction, atomic TLS context reload, and
//! graceful shutdown (stop accepting, drain in-flight connections, then
//! force-close).

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;

use crate::security::tls::{self, TlsError};

use super::config::{Config, ConfigError};
use super::connection::serve_connection;
use super::handler::StaticFileHandler;
use super::middleware::{AccessControl, CertificateAuth, Middleware, RateLimiter};
use super::router::Router;
use super::titan::TitanHandler;

/// How often the bucket eviction task runs.
const EVICTION_INTERVAL: Duration = Duration::from_secs(60);

/// How long in-flight connections get to finish after shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Server startup failure.
#[derive(Debug)]
pub enum ServerError {
    Config(ConfigError),
    Tls(TlsError),
    Io(io::Error),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerError::Config(e) => write!(f, "configuration error: {}", e),
            ServerError::Tls(e) => write!(f, "{}", e),
            ServerError::Io(e) => write!(f, "server I/O error: {}", e),
        }
    }
}

impl std::error::Error for ServerError {}

impl From<ConfigError> for ServerError {
    fn from(e: ConfigError) -> Self {
        ServerError::Config(e)
    }
}

impl From<TlsError> for ServerError {
    fn from(e: TlsError) -> Self {
        ServerError::Tls(e)
    }
}

impl From<io::Error> for ServerError {
    fn from(e: io::Error) -> Self {
        ServerError::Io(e)
    }
}

/// State shared by every connection task. The TLS context is behind a lock
/// only so a graceful reload can swap it; connections clone the acceptor
/// once at accept time.
pub struct ServerState {
    pub(crate) config: Config,
    tls: RwLock<TlsAcceptor>,
    pub(crate) router: Router,
    pub(crate) middlewares: Vec<Arc<dyn Middleware>>,
    pub(crate) titan: Option<Arc<TitanHandler>>,
    pub(crate) rate_limiter: Option<Arc<RateLimiter>>,
}

impl ServerState {
    pub(crate) fn acceptor(&self) -> TlsAcceptor {
        self.tls.read().expect("tls lock poisoned").clone()
    }
}

/// Handle for requesting a graceful shutdown from another task.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }
}

/// A bound Gemini server, ready to run.
pub struct GeminiServer {
    listener: TcpListener,
    state: Arc<ServerState>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl GeminiServer {
    /// Validate the configuration, build the TLS context, middleware
    /// pipeline and default routes (static files at `/`), and bind.
    pub async fn bind(config: Config) -> Result<Self, ServerError> {
        config.validate()?;
        let mut router = Router::new();
        let static_handler = StaticFileHandler::new(&config.server)?;
        router.add_prefix("/", Arc::new(static_handler));
        Self::bind_with_router(config, router).await
    }

    /// Bind with a caller-assembled route table. Routes registered first
    /// win, so specific user handlers should precede any `/` catch-all.
    pub async fn bind_with_router(config: Config, router: Router) -> Result<Self, ServerError> {
        config.validate()?;

        let tls_config = tls::server_config(
            &config.server.host,
            config.server.certfile.as_deref(),
            config.server.keyfile.as_deref(),
            config.server.require_client_cert,
        )?;
        let acceptor = TlsAcceptor::from(tls_config);

        let access_control = AccessControl::from_config(&config.access_control)?;
        let rate_limiter = Arc::new(RateLimiter::from_config(&config.rate_limit));
        let cert_auth = CertificateAuth::from_config(&config.certificate_auth);
        let middlewares: Vec<Arc<dyn Middleware>> = vec![
            Arc::new(access_control),
            rate_limiter.clone(),
            Arc::new(cert_auth),
        ];

        let titan = if config.titan.enabled {
            Some(Arc::new(TitanHandler::new(&config.titan)?))
        } else {
            None
        };

        let addr = format!("{}:{}", config.server.host, config.server.port);
        let listener = TcpListener::bind(&addr).await?;
        log::info!("[server] listening on {}", listener.local_addr()?);
        log::info!(
            "[server] document root {}",
            config.server.document_root.display()
        );

        let rate_limiter = if config.rate_limit.enabled {
            Some(rate_limiter)
        } else {
            None
        };
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Ok(Self {
            listener,
            state: Arc::new(ServerState {
                config,
                tls: RwLock::new(acceptor),
                router,
                middlewares,
                titan,
                rate_limiter,
            }),
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
        })
    }

    /// The bound address (useful with port 0).
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown_tx.clone(),
        }
    }

    /// Rebuild the TLS context from the configured paths and swap it in.
    /// In-flight connections keep the context they started with.
    pub fn reload_tls(&self) -> Result<(), TlsError> {
        let server = &self.state.config.server;
        let tls_config = tls::server_config(
            &server.host,
            server.certfile.as_deref(),
            server.keyfile.as_deref(),
            server.require_client_cert,
        )?;
        *self.state.tls.write().expect("tls lock poisoned") = TlsAcceptor::from(tls_config);
        log::info!("[server] TLS context reloaded");
        Ok(())
    }

    /// Accept until shutdown, then drain.
    pub async fn run(mut self) -> Result<(), ServerError> {
        let eviction = self.state.rate_limiter.clone().map(|limiter| {
            let mut shutdown = self.shutdown_rx.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(EVICTION_INTERVAL);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => limiter.evict_idle(),
                        _ = shutdown.changed() => break,
                    }
                }
            })
        });

        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                _ = self.shutdown_rx.changed() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((tcp, peer)) => {
                        connections.spawn(serve_connection(self.state.clone(), tcp, peer));
                    }
                    Err(e) => {
                        log::warn!("[server] accept failed: {}", e);
                    }
                },
            }
        }

        // Stop accepting; let in-flight connections finish.
        drop(self.listener);
        log::info!(
            "[server] shutting down, draining {} connections",
            connections.len()
        );
        let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            log::warn!("[server] drain timeout, aborting remaining connections");
            connections.abort_all();
        }
        if let Some(task) = eviction {
            task.abort();
        }
        Ok(())
    }
}
