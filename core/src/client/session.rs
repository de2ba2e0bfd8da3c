/*
 * session.rs
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

//! Client session: dial TLS, verify certificate continuity against the
//! TOFU store before a single request byte is written, send the request
//! line, read the response, and follow gemini redirects within a bounded
//! budget. Titan uploads reuse the same dial path with a body.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::net::TlsStreamWrapper;
use crate::protocol::response::ResponseError;
use crate::protocol::url::UrlError;
use crate::protocol::{
    parse_response_header, GeminiResponse, GeminiUrl, Scheme, TitanParams, MAX_REDIRECTS,
    MAX_REQUEST_SIZE, MIME_GEMTEXT,
};
use crate::security::certificates;
use crate::security::tls::{self, TlsError};
use crate::security::tofu::{TofuError, TofuStore, TofuVerdict};

/// Client construction options.
pub struct ClientOptions {
    pub timeout: Duration,
    pub max_redirects: usize,
    pub follow_redirects: bool,
    /// Record unknown hosts automatically on first contact. With a store
    /// configured and this off, first contact is a policy failure.
    pub trust_on_first_use: bool,
    /// Certificate continuity database. `None` disables verification
    /// entirely (testing only).
    pub tofu_store: Option<Arc<TofuStore>>,
    /// Client certificate and key PEM paths for mTLS.
    pub client_cert: Option<(PathBuf, PathBuf)>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_redirects: MAX_REDIRECTS,
            follow_redirects: true,
            trust_on_first_use: true,
            tofu_store: None,
            client_cert: None,
        }
    }
}

/// Client-side failure kinds.
#[derive(Debug)]
pub enum ClientError {
    Io(io::Error),
    Tls(TlsError),
    Url(UrlError),
    Tofu(TofuError),
    Response(ResponseError),
    Timeout,
    /// The server's certificate does not match the stored fingerprint.
    /// Possibly a MITM, possibly a legitimate renewal; the caller must
    /// decide (e.g. revoke and retry); it is never trusted silently.
    CertificateChanged {
        host: String,
        port: u16,
        old_fingerprint: String,
        new_fingerprint: String,
    },
    /// First contact with trust-on-first-use disabled.
    UntrustedHost {
        host: String,
        port: u16,
        fingerprint: String,
    },
    /// The handshake produced no peer certificate to verify.
    NoPeerCertificate,
    RedirectLoop(String),
    TooManyRedirects(usize),
    NonGeminiRedirect(String),
    MissingRedirectTarget,
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Io(e) => write!(f, "connection error: {}", e),
            ClientError::Tls(e) => write!(f, "{}", e),
            ClientError::Url(e) => write!(f, "{}", e),
            ClientError::Tofu(e) => write!(f, "{}", e),
            ClientError::Response(e) => write!(f, "{}", e),
            ClientError::Timeout => write!(f, "request timed out"),
            ClientError::CertificateChanged {
                host,
                port,
                old_fingerprint,
                new_fingerprint,
            } => write!(
                f,
                "certificate for {}:{} has changed (stored {}, presented {})",
                host, port, old_fingerprint, new_fingerprint
            ),
            ClientError::UntrustedHost {
                host,
                port,
                fingerprint,
            } => write!(
                f,
                "first contact with {}:{} ({}) and trust-on-first-use is disabled",
                host, port, fingerprint
            ),
            ClientError::NoPeerCertificate => write!(f, "server presented no certificate"),
            ClientError::RedirectLoop(url) => write!(f, "redirect loop at {}", url),
            ClientError::TooManyRedirects(max) => {
                write!(f, "more than {} redirects", max)
            }
            ClientError::NonGeminiRedirect(url) => {
                write!(f, "refusing redirect to non-gemini URL {}", url)
            }
            ClientError::MissingRedirectTarget => write!(f, "redirect response without a URL"),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<io::Error> for ClientError {
    fn from(e: io::Error) -> Self {
        ClientError::Io(e)
    }
}

impl From<UrlError> for ClientError {
    fn from(e: UrlError) -> Self {
        ClientError::Url(e)
    }
}

impl From<TofuError> for ClientError {
    fn from(e: TofuError) -> Self {
        ClientError::Tofu(e)
    }
}

impl From<ResponseError> for ClientError {
    fn from(e: ResponseError) -> Self {
        ClientError::Response(e)
    }
}

/// A Gemini client. One TLS connection per request, as the protocol
/// requires; the client itself is reusable and cheap to share.
pub struct GeminiClient {
    timeout: Duration,
    max_redirects: usize,
    follow_redirects: bool,
    trust_on_first_use: bool,
    tofu: Option<Arc<TofuStore>>,
    tls: Arc<tokio_rustls::rustls::ClientConfig>,
}

impl GeminiClient {
    pub fn new(options: ClientOptions) -> Result<Self, ClientError> {
        let tls = tls::client_config(
            options
                .client_cert
                .as_ref()
                .map(|(cert, key)| (cert.as_path(), key.as_path())),
        )
        .map_err(ClientError::Tls)?;
        Ok(Self {
            timeout: options.timeout,
            max_redirects: options.max_redirects,
            follow_redirects: options.follow_redirects,
            trust_on_first_use: options.trust_on_first_use,
            tofu: options.tofu_store,
            tls,
        })
    }

    /// Fetch a gemini:// URL, following redirects per the options.
    pub async fn get(&self, url: &str) -> Result<GeminiResponse, ClientError> {
        let mut current = GeminiUrl::parse(url)?;
        if current.scheme != Scheme::Gemini {
            return Err(ClientError::Url(UrlError::UnsupportedScheme(
                current.scheme.to_string(),
            )));
        }

        let mut visited: Vec<String> = Vec::new();
        loop {
            let response = self.fetch_once(&current, None).await?;
            if !(self.follow_redirects && response.is_redirect()) {
                return Ok(response);
            }
            if response.meta.is_empty() {
                return Err(ClientError::MissingRedirectTarget);
            }
            let target = resolve_redirect(&current, &response.meta)?;
            let target_url = GeminiUrl::parse(&target)?;
            if target_url.scheme != Scheme::Gemini {
                return Err(ClientError::NonGeminiRedirect(target));
            }
            visited.push(current.to_string());
            if visited.contains(&target) {
                return Err(ClientError::RedirectLoop(target));
            }
            if visited.len() > self.max_redirects {
                return Err(ClientError::TooManyRedirects(self.max_redirects));
            }
            log::debug!("[client] following redirect to {}", target);
            current = target_url;
        }
    }

    /// Titan upload: rewrite the URL to titan://, attach
    /// `;size=N[;mime=...][;token=...]` and send the body after the
    /// request line. Redirects are not followed for uploads.
    pub async fn upload(
        &self,
        url: &str,
        body: &[u8],
        mime: &str,
        token: Option<&str>,
    ) -> Result<GeminiResponse, ClientError> {
        let mut target = GeminiUrl::parse(url)?;
        target.scheme = Scheme::Titan;
        target.titan = Some(TitanParams {
            size: body.len() as u64,
            mime: mime.to_string(),
            token: token.map(str::to_string),
        });
        self.fetch_once(&target, Some(body)).await
    }

    /// Titan delete: an upload of zero bytes.
    pub async fn delete(
        &self,
        url: &str,
        token: Option<&str>,
    ) -> Result<GeminiResponse, ClientError> {
        self.upload(url, &[], MIME_GEMTEXT, token).await
    }

    /// One dial / one request / one response, under the timeout.
    async fn fetch_once(
        &self,
        url: &GeminiUrl,
        body: Option<&[u8]>,
    ) -> Result<GeminiResponse, ClientError> {
        let transaction = async {
            let mut stream =
                TlsStreamWrapper::connect(&url.host, url.port, self.tls.clone()).await?;
            let peer_der = stream
                .peer_certificate()
                .ok_or(ClientError::NoPeerCertificate)?;
            // Continuity check happens before any request byte leaves.
            self.check_continuity(&url.host, url.port, peer_der.as_ref())?;

            let line = format!("{}\r\n", url);
            if line.len() > MAX_REQUEST_SIZE {
                return Err(ClientError::Url(UrlError::TooLong(line.len())));
            }
            stream.write_all(line.as_bytes()).await?;
            if let Some(body) = body {
                stream.write_all(body).await?;
            }
            stream.flush().await?;

            let mut buf = Vec::new();
            stream.read_to_end(&mut buf).await?;
            let (status, meta, remainder) = parse_response_header(&buf)?;
            Ok(GeminiResponse::with_status(status, meta, remainder.to_vec()))
        };
        tokio::time::timeout(self.timeout, transaction)
            .await
            .map_err(|_| ClientError::Timeout)?
    }

    fn check_continuity(&self, host: &str, port: u16, der: &[u8]) -> Result<(), ClientError> {
        let store = match &self.tofu {
            Some(store) => store,
            None => return Ok(()),
        };
        match store.verify(host, port, der)? {
            TofuVerdict::Match => Ok(()),
            TofuVerdict::FirstUse => {
                if self.trust_on_first_use {
                    store.trust(host, port, der)?;
                    log::info!(
                        "[client] trusting {}:{} on first use ({})",
                        host,
                        port,
                        certificates::fingerprint(der)
                    );
                    Ok(())
                } else {
                    Err(ClientError::UntrustedHost {
                        host: host.to_string(),
                        port,
                        fingerprint: certificates::fingerprint(der),
                    })
                }
            }
            TofuVerdict::Changed {
                old_fingerprint,
                new_fingerprint,
            } => Err(ClientError::CertificateChanged {
                host: host.to_string(),
                port,
                old_fingerprint,
                new_fingerprint,
            }),
        }
    }
}

/// Resolve a redirect meta (absolute or relative) against the current URL.
fn resolve_redirect(current: &GeminiUrl, meta: &str) -> Result<String, ClientError> {
    let base = url::Url::parse(&current.to_string())
        .map_err(|e| ClientError::Url(UrlError::Malformed(e.to_string())))?;
    let joined = base
        .join(meta)
        .map_err(|e| ClientError::Url(UrlError::Malformed(e.to_string())))?;
    Ok(joined.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redirect_resolution_absolute_and_relative() {
        let current = GeminiUrl::parse("gemini://example.org/dir/page").unwrap();
        assert_eq!(
            resolve_redirect(&current, "gemini://other.org/x").unwrap(),
            "gemini://other.org/x"
        );
        assert_eq!(
            resolve_redirect(&current, "/moved").unwrap(),
            "gemini://example.org/moved"
        );
        assert_eq!(
            resolve_redirect(&current, "sibling").unwrap(),
            "gemini://example.org/dir/sibling"
        );
    }

    #[test]
    fn options_default_to_tofu_on() {
        let options = ClientOptions::default();
        assert!(options.trust_on_first_use);
        assert!(options.follow_redirects);
        assert_eq!(options.max_redirects, MAX_REDIRECTS);
    }
}
