/*
 * request.rs
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

//! A parsed request as handed to middleware and handlers: the validated URL
//! plus the peer address, the peer certificate DER when one was negotiated,
//! and the buffered Titan body once the connection layer has read it.

use std::net::{IpAddr, SocketAddr};

use tokio_rustls::rustls::pki_types::CertificateDer;

use super::url::{GeminiUrl, Scheme, TitanParams};
use crate::security::certificates;

/// A single Gemini or Titan request.
#[derive(Debug, Clone)]
pub struct GeminiRequest {
    pub url: GeminiUrl,
    pub peer_addr: SocketAddr,
    /// DER bytes of the client certificate, when the handshake produced one.
    pub peer_cert: Option<CertificateDer<'static>>,
    /// Titan upload body, buffered in full by the connection layer before
    /// the handler runs. Always `None` for gemini requests.
    pub body: Option<Vec<u8>>,
}

impl GeminiRequest {
    pub fn new(url: GeminiUrl, peer_addr: SocketAddr) -> Self {
        Self {
            url,
            peer_addr,
            peer_cert: None,
            body: None,
        }
    }

    pub fn peer_ip(&self) -> IpAddr {
        self.peer_addr.ip()
    }

    pub fn is_titan(&self) -> bool {
        self.url.scheme == Scheme::Titan
    }

    pub fn titan_params(&self) -> Option<&TitanParams> {
        self.url.titan.as_ref()
    }

    /// `sha256:<hex>` fingerprint of the peer certificate, if present.
    pub fn peer_fingerprint(&self) -> Option<String> {
        self.peer_cert
            .as_ref()
            .map(|der| certificates::fingerprint(der.as_ref()))
    }
}
