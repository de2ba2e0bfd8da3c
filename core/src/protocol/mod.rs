/*
 * mod.rs
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

//! Gemini wire protocol: status taxonomy, response codec, URL validation,
//! and the parsed request type shared by the server and client.

pub mod request;
pub mod response;
pub mod status;
pub mod url;

pub use request::GeminiRequest;
pub use response::{parse_response_header, GeminiResponse, ResponseError};
pub use status::StatusCode;
pub use url::{parse_request_line, GeminiUrl, Scheme, TitanParams, UrlError};

/// Default Gemini (and Titan) port.
pub const DEFAULT_PORT: u16 = 1965;

/// Maximum request line size in bytes, CRLF included.
pub const MAX_REQUEST_SIZE: usize = 1024;

/// Maximum meta size in bytes.
pub const MAX_META_SIZE: usize = 1024;

/// Maximum response header size: two digits, a space, the meta and CRLF.
pub const MAX_RESPONSE_HEADER_SIZE: usize = 2 + 1 + MAX_META_SIZE + 2;

/// Line terminator for request and response headers.
pub const CRLF: &[u8] = b"\r\n";

/// The gemtext MIME type (without charset parameter).
pub const MIME_GEMTEXT: &str = "text/gemini";

/// Default redirect budget for the client session.
pub const MAX_REDIRECTS: usize = 5;
