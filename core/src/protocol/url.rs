/*
 * url.rs
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

//! Gemini/Titan URL parsing and validation. The request line is an absolute
//! URL terminated by CRLF, at most 1024 bytes in total. Hosts are lowercased
//! and IDNA-normalized, userinfo and fragments are rejected, paths are
//! percent-decoded then dot-segment canonicalized (`..` clamps at the root),
//! and the query is preserved raw. Titan URLs additionally carry
//! `;size=N[;mime=TYPE][;token=T]` parameters on the path.

use std::fmt;

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};

use super::{CRLF, DEFAULT_PORT, MAX_REQUEST_SIZE, MIME_GEMTEXT};

/// Characters percent-encoded when serializing a path: controls plus the
/// delimiters that would change the URL structure.
const PATH_ENCODE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'?')
    .add(b'#')
    .add(b'%')
    .add(b';');

/// Request scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Gemini,
    Titan,
}

impl Scheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Gemini => "gemini",
            Scheme::Titan => "titan",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Titan upload parameters extracted from the path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TitanParams {
    pub size: u64,
    pub mime: String,
    pub token: Option<String>,
}

/// A validated Gemini or Titan URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeminiUrl {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    /// Canonical percent-decoded path, always starting with `/`.
    pub path: String,
    /// Raw (still percent-encoded) query, if any.
    pub query: Option<String>,
    pub titan: Option<TitanParams>,
}

/// URL validation failures; all map to a 59 response at the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlError {
    TooLong(usize),
    MissingTerminator,
    InvalidUtf8,
    UnsupportedScheme(String),
    EmptyHost,
    HasUserinfo,
    HasFragment,
    InvalidPort,
    InvalidTitanParams(String),
    Malformed(String),
}

impl fmt::Display for UrlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UrlError::TooLong(len) => {
                write!(f, "request line is {} bytes (maximum {})", len, MAX_REQUEST_SIZE)
            }
            UrlError::MissingTerminator => write!(f, "request line does not end with CRLF"),
            UrlError::InvalidUtf8 => write!(f, "request line is not valid UTF-8"),
            UrlError::UnsupportedScheme(scheme) => write!(f, "unsupported scheme: {}", scheme),
            UrlError::EmptyHost => write!(f, "URL has no host"),
            UrlError::HasUserinfo => write!(f, "userinfo is not permitted"),
            UrlError::HasFragment => write!(f, "fragments are not permitted"),
            UrlError::InvalidPort => write!(f, "port outside the range 1-65535"),
            UrlError::InvalidTitanParams(reason) => write!(f, "bad titan parameters: {}", reason),
            UrlError::Malformed(reason) => write!(f, "malformed URL: {}", reason),
        }
    }
}

impl std::error::Error for UrlError {}

/// Parse a raw request line (URL + CRLF) as received on the wire.
pub fn parse_request_line(line: &[u8]) -> Result<GeminiUrl, UrlError> {
    if line.len() > MAX_REQUEST_SIZE {
        return Err(UrlError::TooLong(line.len()));
    }
    if !line.ends_with(CRLF) {
        return Err(UrlError::MissingTerminator);
    }
    let text = std::str::from_utf8(&line[..line.len() - 2]).map_err(|_| UrlError::InvalidUtf8)?;
    GeminiUrl::parse(text)
}

impl GeminiUrl {
    /// Parse and validate an absolute gemini:// or titan:// URL.
    pub fn parse(input: &str) -> Result<GeminiUrl, UrlError> {
        if input.len() > MAX_REQUEST_SIZE - CRLF.len() {
            return Err(UrlError::TooLong(input.len() + CRLF.len()));
        }
        let url = url::Url::parse(input).map_err(|e| match e {
            url::ParseError::InvalidPort => UrlError::InvalidPort,
            url::ParseError::EmptyHost => UrlError::EmptyHost,
            other => UrlError::Malformed(other.to_string()),
        })?;

        let scheme = match url.scheme() {
            "gemini" => Scheme::Gemini,
            "titan" => Scheme::Titan,
            other => return Err(UrlError::UnsupportedScheme(other.to_string())),
        };
        if !url.username().is_empty() || url.password().is_some() {
            return Err(UrlError::HasUserinfo);
        }
        if url.fragment().is_some() {
            return Err(UrlError::HasFragment);
        }

        let host = normalize_host(url.host_str().unwrap_or(""))?;
        let port = match url.port() {
            Some(0) => return Err(UrlError::InvalidPort),
            Some(p) => p,
            None => DEFAULT_PORT,
        };

        // Titan parameters are split off the raw path before percent-decoding
        // so an encoded ';' inside a file name is not taken for a separator.
        let raw_path = url.path();
        let (raw_path, titan) = match scheme {
            Scheme::Titan => {
                let mut parts = raw_path.split(';');
                let file_part = parts.next().unwrap_or("");
                (file_part, Some(parse_titan_params(parts)?))
            }
            Scheme::Gemini => (raw_path, None),
        };

        let decoded = percent_decode_str(raw_path)
            .decode_utf8()
            .map_err(|_| UrlError::InvalidUtf8)?;
        let path = canonicalize_path(&decoded);
        let query = url.query().map(|q| q.to_string());

        Ok(GeminiUrl {
            scheme,
            host,
            port,
            path,
            query,
            titan,
        })
    }

    /// Authority as `host` or `host:port` (port elided when default).
    pub fn authority(&self) -> String {
        if self.port == DEFAULT_PORT {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for GeminiUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}://{}{}",
            self.scheme,
            self.authority(),
            utf8_percent_encode(&self.path, PATH_ENCODE)
        )?;
        if let Some(titan) = &self.titan {
            write!(f, ";size={}", titan.size)?;
            if titan.mime != MIME_GEMTEXT {
                write!(f, ";mime={}", titan.mime)?;
            }
            if let Some(token) = &titan.token {
                write!(f, ";token={}", utf8_percent_encode(token, PATH_ENCODE))?;
            }
        }
        if let Some(query) = &self.query {
            write!(f, "?{}", query)?;
        }
        Ok(())
    }
}

/// Lowercase and IDNA-normalize the host. `url::Host::parse` performs the
/// same normalization the WHATWG parser applies to special schemes, which
/// the opaque-host parser skips for gemini/titan.
fn normalize_host(raw: &str) -> Result<String, UrlError> {
    if raw.is_empty() {
        return Err(UrlError::EmptyHost);
    }
    let decoded = percent_decode_str(raw)
        .decode_utf8()
        .map_err(|_| UrlError::InvalidUtf8)?;
    let host = url::Host::parse(&decoded).map_err(|e| UrlError::Malformed(e.to_string()))?;
    Ok(host.to_string())
}

/// Resolve `.` and `..` segments in a percent-decoded path. `..` never
/// climbs above the root; an empty path becomes `/`. A trailing slash is
/// preserved so directory requests stay recognizable.
pub fn canonicalize_path(path: &str) -> String {
    let trailing_slash = path.ends_with('/');
    let mut stack: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                stack.pop();
            }
            segment => stack.push(segment),
        }
    }
    if stack.is_empty() {
        return "/".to_string();
    }
    let mut out = String::new();
    for segment in &stack {
        out.push('/');
        out.push_str(segment);
    }
    if trailing_slash {
        out.push('/');
    }
    out
}

fn parse_titan_params<'a>(
    parts: impl Iterator<Item = &'a str>,
) -> Result<TitanParams, UrlError> {
    let mut size: Option<u64> = None;
    let mut mime: Option<String> = None;
    let mut token: Option<String> = None;
    for part in parts {
        let (key, value) = part
            .split_once('=')
            .ok_or_else(|| UrlError::InvalidTitanParams(format!("bare parameter: {}", part)))?;
        let value = percent_decode_str(value)
            .decode_utf8()
            .map_err(|_| UrlError::InvalidUtf8)?
            .into_owned();
        match key {
            "size" => {
                let n = value
                    .parse::<u64>()
                    .map_err(|_| UrlError::InvalidTitanParams(format!("bad size: {}", value)))?;
                size = Some(n);
            }
            "mime" => mime = Some(value),
            "token" => token = Some(value),
            // Unknown parameters are tolerated for forward compatibility.
            _ => {}
        }
    }
    let size = size.ok_or_else(|| UrlError::InvalidTitanParams("missing size".into()))?;
    Ok(TitanParams {
        size,
        mime: mime.unwrap_or_else(|| MIME_GEMTEXT.to_string()),
        token,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple() {
        let url = GeminiUrl::parse("gemini://example.org/").unwrap();
        assert_eq!(url.scheme, Scheme::Gemini);
        assert_eq!(url.host, "example.org");
        assert_eq!(url.port, DEFAULT_PORT);
        assert_eq!(url.path, "/");
        assert_eq!(url.query, None);
    }

    #[test]
    fn empty_path_becomes_root() {
        let url = GeminiUrl::parse("gemini://example.org").unwrap();
        assert_eq!(url.path, "/");
    }

    #[test]
    fn host_is_lowercased() {
        let url = GeminiUrl::parse("gemini://ExAmPlE.ORG/").unwrap();
        assert_eq!(url.host, "example.org");
    }

    #[test]
    fn explicit_port_kept() {
        let url = GeminiUrl::parse("gemini://example.org:1966/x").unwrap();
        assert_eq!(url.port, 1966);
        assert_eq!(url.authority(), "example.org:1966");
    }

    #[test]
    fn port_zero_rejected() {
        assert_eq!(
            GeminiUrl::parse("gemini://example.org:0/"),
            Err(UrlError::InvalidPort)
        );
    }

    #[test]
    fn userinfo_rejected() {
        assert_eq!(
            GeminiUrl::parse("gemini://user@example.org/"),
            Err(UrlError::HasUserinfo)
        );
    }

    #[test]
    fn fragment_rejected() {
        assert_eq!(
            GeminiUrl::parse("gemini://example.org/page#frag"),
            Err(UrlError::HasFragment)
        );
    }

    #[test]
    fn bad_scheme_rejected() {
        assert!(matches!(
            GeminiUrl::parse("https://example.org/"),
            Err(UrlError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn traversal_clamps_at_root() {
        let url = GeminiUrl::parse("gemini://localhost/../etc/passwd").unwrap();
        assert_eq!(url.path, "/etc/passwd");
        assert_eq!(canonicalize_path("/../../.."), "/");
        assert_eq!(canonicalize_path("/a/../../b"), "/b");
        assert_eq!(canonicalize_path("/a/./b/../c"), "/a/c");
    }

    #[test]
    fn percent_decoding_before_canonicalization() {
        let url = GeminiUrl::parse("gemini://localhost/%2e%2e/%2e%2e/etc/passwd").unwrap();
        assert!(!url.path.starts_with("/.."));
        assert_eq!(url.path, "/etc/passwd");
    }

    #[test]
    fn query_preserved_raw() {
        let url = GeminiUrl::parse("gemini://example.org/search?q=a%20b").unwrap();
        assert_eq!(url.query.as_deref(), Some("q=a%20b"));
    }

    #[test]
    fn oversize_line_rejected() {
        let mut line = b"gemini://example.org/".to_vec();
        line.extend(std::iter::repeat(b'a').take(MAX_REQUEST_SIZE));
        line.extend_from_slice(b"\r\n");
        assert!(matches!(
            parse_request_line(&line),
            Err(UrlError::TooLong(_))
        ));
    }

    #[test]
    fn request_line_requires_crlf() {
        assert_eq!(
            parse_request_line(b"gemini://example.org/\n"),
            Err(UrlError::MissingTerminator)
        );
    }

    #[test]
    fn titan_params_extracted() {
        let url =
            GeminiUrl::parse("titan://host/notes/a.gmi;size=5;mime=text/gemini;token=T").unwrap();
        assert_eq!(url.scheme, Scheme::Titan);
        assert_eq!(url.path, "/notes/a.gmi");
        let titan = url.titan.unwrap();
        assert_eq!(titan.size, 5);
        assert_eq!(titan.mime, "text/gemini");
        assert_eq!(titan.token.as_deref(), Some("T"));
    }

    #[test]
    fn titan_mime_defaults_to_gemtext() {
        let url = GeminiUrl::parse("titan://host/a;size=0").unwrap();
        let titan = url.titan.unwrap();
        assert_eq!(titan.mime, MIME_GEMTEXT);
        assert_eq!(titan.token, None);
    }

    #[test]
    fn titan_without_size_rejected() {
        assert!(matches!(
            GeminiUrl::parse("titan://host/a;mime=text/plain"),
            Err(UrlError::InvalidTitanParams(_))
        ));
    }

    #[test]
    fn titan_negative_size_rejected() {
        assert!(matches!(
            GeminiUrl::parse("titan://host/a;size=-1"),
            Err(UrlError::InvalidTitanParams(_))
        ));
    }

    #[test]
    fn display_roundtrip() {
        let url = GeminiUrl::parse("gemini://example.org/dir/file.gmi?x=1").unwrap();
        assert_eq!(url.to_string(), "gemini://example.org/dir/file.gmi?x=1");
        let titan = GeminiUrl::parse("titan://host:1966/a.gmi;size=5;token=T").unwrap();
        assert_eq!(titan.to_string(), "titan://host:1966/a.gmi;size=5;token=T");
    }
}
