/*
 * response.rs
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

//! Response codec: `<status> <meta>\r\n` followed by a body for 2x only.
//! The header is at most 1029 bytes (2 digits + space + 1024-byte meta +
//! CRLF); meta is UTF-8 with no CR or LF.

use std::fmt;

use super::status::{self, StatusCode};
use super::{CRLF, MAX_META_SIZE, MAX_RESPONSE_HEADER_SIZE};

/// A Gemini response: status, meta and (for 2x) a body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeminiResponse {
    pub status: u8,
    pub meta: String,
    pub body: Vec<u8>,
}

/// Codec failures for response encoding and header parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseError {
    StatusOutOfRange(u8),
    MetaTooLong(usize),
    MetaHasLineBreak,
    BodyNotAllowed(u8),
    HeaderTooLong,
    MissingTerminator,
    InvalidUtf8,
    Malformed(String),
}

impl fmt::Display for ResponseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseError::StatusOutOfRange(code) => {
                write!(f, "status {} outside the range 10-69", code)
            }
            ResponseError::MetaTooLong(len) => {
                write!(f, "meta is {} bytes (maximum {})", len, MAX_META_SIZE)
            }
            ResponseError::MetaHasLineBreak => write!(f, "meta contains CR or LF"),
            ResponseError::BodyNotAllowed(code) => {
                write!(f, "status {} must not carry a body", code)
            }
            ResponseError::HeaderTooLong => {
                write!(f, "response header exceeds {} bytes", MAX_RESPONSE_HEADER_SIZE)
            }
            ResponseError::MissingTerminator => write!(f, "response header has no CRLF"),
            ResponseError::InvalidUtf8 => write!(f, "meta is not valid UTF-8"),
            ResponseError::Malformed(reason) => write!(f, "malformed response header: {}", reason),
        }
    }
}

impl std::error::Error for ResponseError {}

impl GeminiResponse {
    /// A response with no body.
    pub fn new(status: StatusCode, meta: impl Into<String>) -> Self {
        Self {
            status: status.code(),
            meta: meta.into(),
            body: Vec::new(),
        }
    }

    /// A 20 response with the given MIME meta and body bytes.
    pub fn success(meta: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: StatusCode::Success.code(),
            meta: meta.into(),
            body: body.into(),
        }
    }

    /// A response with an explicit raw status code.
    pub fn with_status(status: u8, meta: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            status,
            meta: meta.into(),
            body,
        }
    }

    pub fn is_success(&self) -> bool {
        status::is_success(self.status)
    }

    pub fn is_redirect(&self) -> bool {
        status::is_redirect(self.status)
    }

    /// Serialize as header + body, enforcing the codec invariants.
    pub fn encode(&self) -> Result<Vec<u8>, ResponseError> {
        if !status::is_valid(self.status) {
            return Err(ResponseError::StatusOutOfRange(self.status));
        }
        if self.meta.len() > MAX_META_SIZE {
            return Err(ResponseError::MetaTooLong(self.meta.len()));
        }
        if self.meta.contains('\r') || self.meta.contains('\n') {
            return Err(ResponseError::MetaHasLineBreak);
        }
        if !self.body.is_empty() && !status::is_success(self.status) {
            return Err(ResponseError::BodyNotAllowed(self.status));
        }
        let mut out = Vec::with_capacity(5 + self.meta.len() + self.body.len());
        out.extend_from_slice(format!("{} {}", self.status, self.meta).as_bytes());
        out.extend_from_slice(CRLF);
        out.extend_from_slice(&self.body);
        Ok(out)
    }
}

/// Parse a response header from raw bytes (client side).
///
/// Returns the status, the meta string and the remainder of `buf` after the
/// CRLF (the start of the body for 2x responses). The CRLF must appear
/// within the first 1029 bytes.
pub fn parse_response_header(buf: &[u8]) -> Result<(u8, String, &[u8]), ResponseError> {
    let window = &buf[..buf.len().min(MAX_RESPONSE_HEADER_SIZE)];
    let crlf = match window.windows(2).position(|pair| pair == CRLF) {
        Some(pos) => pos,
        None => {
            if buf.len() >= MAX_RESPONSE_HEADER_SIZE {
                return Err(ResponseError::HeaderTooLong);
            }
            return Err(ResponseError::MissingTerminator);
        }
    };
    let line = &buf[..crlf];
    let remainder = &buf[crlf + 2..];

    if line.len() < 2 {
        return Err(ResponseError::Malformed("header shorter than status".into()));
    }
    if !line[0].is_ascii_digit() || !line[1].is_ascii_digit() {
        return Err(ResponseError::Malformed("status is not two digits".into()));
    }
    let status = (line[0] - b'0') * 10 + (line[1] - b'0');
    if !status::is_valid(status) {
        return Err(ResponseError::StatusOutOfRange(status));
    }

    let meta = match line.len() {
        2 => String::new(),
        _ => {
            if line[2] != b' ' {
                return Err(ResponseError::Malformed("status not followed by space".into()));
            }
            let raw = &line[3..];
            if raw.len() > MAX_META_SIZE {
                return Err(ResponseError::MetaTooLong(raw.len()));
            }
            std::str::from_utf8(raw)
                .map_err(|_| ResponseError::InvalidUtf8)?
                .to_string()
        }
    };
    Ok((status, meta, remainder))
}
