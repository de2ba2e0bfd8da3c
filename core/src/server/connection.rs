/*
 * connection.rs
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

//! Per-connection protocol driver. One task per accepted socket: TLS
//! handshake, request framing (CRLF within the first 1024 bytes),
//! middleware, handler dispatch, a single response, close. A Titan request
//! additionally buffers its declared body between middleware and dispatch.
//! The whole transaction after the handshake runs under the configured
//! per-request timeout; expiry answers 40 when nothing was sent yet.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::server::TlsStream;

use crate::logging::display_ip;
use crate::protocol::url::UrlError;
use crate::protocol::{
    parse_request_line, GeminiRequest, GeminiResponse, Scheme, StatusCode, CRLF, MAX_REQUEST_SIZE,
};

use super::handler::RequestHandler;
use super::middleware::run_pipeline;
use super::server::ServerState;

/// Accept one TLS connection and drive it to completion.
pub(crate) async fn serve_connection(state: Arc<ServerState>, tcp: TcpStream, peer: SocketAddr) {
    let timeout = state.config.server.request_timeout;
    let acceptor = state.acceptor();
    let stream = match tokio::time::timeout(timeout, acceptor.accept(tcp)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            log::debug!(
                "[server] handshake failed for {}: {}",
                display_ip(peer.ip(), state.config.logging.hash_ips),
                e
            );
            return;
        }
        Err(_) => {
            log::debug!(
                "[server] handshake timeout for {}",
                display_ip(peer.ip(), state.config.logging.hash_ips)
            );
            return;
        }
    };

    let mut conn = Connection {
        stream,
        peer,
        state,
        started: Instant::now(),
        responded: false,
    };
    match tokio::time::timeout(timeout, conn.run()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            // Transport errors mid-transaction: close without another
            // response attempt.
            log::debug!("[server] connection error from {}: {}", conn.peer, e);
        }
        Err(_) => {
            if !conn.responded {
                let _ = conn
                    .send(None, GeminiResponse::new(StatusCode::TemporaryFailure, "Timeout"))
                    .await;
            }
        }
    }
    let _ = conn.stream.shutdown().await;
}

struct Connection {
    stream: TlsStream<TcpStream>,
    peer: SocketAddr,
    state: Arc<ServerState>,
    started: Instant,
    responded: bool,
}

impl Connection {
    async fn run(&mut self) -> io::Result<()> {
        let peer_cert = self
            .stream
            .get_ref()
            .1
            .peer_certificates()
            .and_then(|certs| certs.first())
            .map(|cert| cert.clone().into_owned());

        // AWAIT_REQUEST: accumulate until CRLF inside the 1024-byte window.
        let mut buf = BytesMut::with_capacity(MAX_REQUEST_SIZE);
        let line = loop {
            let window = &buf[..buf.len().min(MAX_REQUEST_SIZE)];
            if let Some(pos) = window.windows(2).position(|pair| pair == CRLF) {
                break buf.split_to(pos + 2);
            }
            if buf.len() >= MAX_REQUEST_SIZE {
                return self
                    .send(None, GeminiResponse::new(StatusCode::BadRequest, "Request too large"))
                    .await;
            }
            let n = self.stream.read_buf(&mut buf).await?;
            if n == 0 {
                // Peer went away before completing a request.
                return Ok(());
            }
        };

        let url = match parse_request_line(&line) {
            Ok(url) => url,
            Err(e) => {
                let meta = match e {
                    UrlError::TooLong(_) => "Request too large".to_string(),
                    UrlError::InvalidUtf8 => "Invalid UTF-8".to_string(),
                    other => other.to_string(),
                };
                return self
                    .send(None, GeminiResponse::new(StatusCode::BadRequest, meta))
                    .await;
            }
        };

        let mut request = GeminiRequest::new(url, self.peer);
        request.peer_cert = peer_cert;

        if let Some(rejection) = run_pipeline(&self.state.middlewares, &request) {
            let path = request.url.path.clone();
            return self.send(Some(&path), rejection).await;
        }

        match request.url.scheme {
            Scheme::Titan => self.run_titan(request, buf).await,
            Scheme::Gemini => self.run_gemini(request).await,
        }
    }

    async fn run_gemini(&mut self, request: GeminiRequest) -> io::Result<()> {
        let path = request.url.path.clone();
        let handler = match self.state.router.route(&path) {
            Some(handler) => handler,
            None => {
                return self
                    .send(Some(&path), GeminiResponse::new(StatusCode::NotFound, "Not found"))
                    .await;
            }
        };
        let response = dispatch(handler, request).await;
        self.send(Some(&path), response).await
    }

    async fn run_titan(&mut self, mut request: GeminiRequest, buf: BytesMut) -> io::Result<()> {
        let path = request.url.path.clone();
        let titan = match &self.state.titan {
            Some(titan) => titan.clone(),
            None => {
                return self
                    .send(
                        Some(&path),
                        GeminiResponse::new(StatusCode::ProxyRequestRefused, "Titan not enabled"),
                    )
                    .await;
            }
        };
        if let Err(rejection) = titan.preflight(&request) {
            return self.send(Some(&path), rejection).await;
        }

        // READING_TITAN_BODY: exactly the declared size; anything beyond
        // it is left unread and dies with the connection.
        let declared = request
            .titan_params()
            .map(|params| params.size as usize)
            .unwrap_or(0);
        let mut body = Vec::with_capacity(declared.min(1 << 20));
        let take = declared.min(buf.len());
        body.extend_from_slice(&buf[..take]);
        let mut chunk = [0u8; 16 * 1024];
        while body.len() < declared {
            let want = (declared - body.len()).min(chunk.len());
            let n = self.stream.read(&mut chunk[..want]).await?;
            if n == 0 {
                return self
                    .send(
                        Some(&path),
                        GeminiResponse::new(StatusCode::TemporaryFailure, "Incomplete upload"),
                    )
                    .await;
            }
            body.extend_from_slice(&chunk[..n]);
        }
        request.body = Some(body);

        let response = tokio::task::spawn_blocking(move || titan.handle(&request))
            .await
            .unwrap_or_else(|e| {
                log::error!("[titan] handler panicked: {}", e);
                GeminiResponse::new(StatusCode::TemporaryFailure, "Internal error")
            });
        self.send(Some(&path), response).await
    }

    /// RESPONDING: header, body for 2x, flush, close. Exactly once.
    async fn send(&mut self, path: Option<&str>, response: GeminiResponse) -> io::Result<()> {
        if self.responded {
            return Ok(());
        }
        self.responded = true;
        let bytes = response
            .encode()
            .unwrap_or_else(|_| b"40 Internal error\r\n".to_vec());
        log::info!(
            "[server] {} {} {} {}ms",
            display_ip(self.peer.ip(), self.state.config.logging.hash_ips),
            response.status,
            path.unwrap_or("-"),
            self.started.elapsed().as_millis()
        );
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        self.stream.shutdown().await?;
        Ok(())
    }
}

/// Run a handler on the blocking pool; panics become a 40 with no details
/// leaked to the client.
async fn dispatch(handler: Arc<dyn RequestHandler>, request: GeminiRequest) -> GeminiResponse {
    tokio::task::spawn_blocking(move || handler.handle(&request))
        .await
        .unwrap_or_else(|e| {
            log::error!("[server] handler panicked: {}", e);
            GeminiResponse::new(StatusCode::TemporaryFailure, "Internal error")
        })
}
