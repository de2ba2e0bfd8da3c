/*
 * lib.rs
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

//! Gemella: a Gemini protocol server and companion client with Titan
//! upload support.
//!
//! The server is TLS-only, one request per connection: a CRLF-terminated
//! absolute URL in, a `<status> <meta>` header (plus a body for 2x) out.
//! Requests pass an ordered middleware pipeline (CIDR access control,
//! per-IP token-bucket rate limiting, path-scoped client certificate
//! rules) before reaching the static-file or Titan handler. The client
//! replaces CA PKI with trust-on-first-use: certificate fingerprints are
//! recorded in a SQLite store and continuity is enforced on every dial.
//!
//! Logging goes through the `log` facade; Gemella never installs a logger
//! or reads configuration files; the embedding application supplies a
//! validated [`server::Config`] and whatever sink it wants.

pub mod client;
pub mod content;
pub mod logging;
pub mod net;
pub mod protocol;
pub mod security;
pub mod server;

pub use client::{ClientError, ClientOptions, GeminiClient};
pub use protocol::{GeminiRequest, GeminiResponse, GeminiUrl, Scheme, StatusCode};
pub use security::{TofuStore, TofuVerdict};
pub use server::{Config, GeminiServer, Router};
