/*
 * handler.rs
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

//! Request handlers. A handler is a pure function of the parsed request
//! plus server-scoped state; it never performs socket I/O and never
//! escapes errors past its boundary: every failure becomes a response.
//! The connection layer runs handlers on the blocking pool since they
//! touch the filesystem.
//!
//! `StaticFileHandler` serves a capsule directory: root-confined path
//! resolution, index files, optional gemtext directory listings.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::content::{self, mime, ListingEntry};
use crate::protocol::{GeminiRequest, GeminiResponse, StatusCode, MIME_GEMTEXT};

use super::config::ServerConfig;

/// A routable request handler.
pub trait RequestHandler: Send + Sync {
    fn handle(&self, request: &GeminiRequest) -> GeminiResponse;
}

/// Serves files under a document root.
pub struct StaticFileHandler {
    document_root: PathBuf,
    default_indices: Vec<String>,
    enable_directory_listing: bool,
    max_file_size: u64,
}

impl StaticFileHandler {
    /// The document root is canonicalized once so later prefix checks
    /// compare resolved paths.
    pub fn new(config: &ServerConfig) -> io::Result<Self> {
        Ok(Self {
            document_root: config.document_root.canonicalize()?,
            default_indices: config.default_indices.clone(),
            enable_directory_listing: config.enable_directory_listing,
            max_file_size: config.max_file_size,
        })
    }

    /// Resolve a request path to a filesystem path inside the root.
    /// Returns `None` for anything nonexistent, escaping (including via
    /// symlinks), or containing residual relative components.
    fn resolve(&self, request_path: &str) -> Option<PathBuf> {
        let relative = Path::new(request_path.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return None;
        }
        let resolved = self.document_root.join(relative).canonicalize().ok()?;
        if !resolved.starts_with(&self.document_root) {
            return None;
        }
        Some(resolved)
    }

    fn not_found() -> GeminiResponse {
        // The meta never echoes the attempted path.
        GeminiResponse::new(StatusCode::NotFound, "Not found")
    }

    fn serve_file(&self, path: &Path) -> GeminiResponse {
        let meta = match fs::metadata(path) {
            Ok(meta) => meta,
            Err(_) => return Self::not_found(),
        };
        if meta.len() > self.max_file_size {
            return GeminiResponse::new(StatusCode::PermanentFailure, "File too large");
        }
        match fs::read(path) {
            Ok(body) => GeminiResponse::success(mime::for_path(path), body),
            Err(e) => {
                log::warn!("[static] read failed for {}: {}", path.display(), e);
                GeminiResponse::new(StatusCode::TemporaryFailure, "Resource unavailable")
            }
        }
    }

    fn serve_directory(&self, dir: &Path, request_path: &str) -> GeminiResponse {
        for index in &self.default_indices {
            let candidate = dir.join(index);
            if candidate.is_file() {
                return self.serve_file(&candidate);
            }
        }
        if !self.enable_directory_listing {
            return Self::not_found();
        }
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("[static] listing failed for {}: {}", dir.display(), e);
                return GeminiResponse::new(StatusCode::TemporaryFailure, "Resource unavailable");
            }
        };
        let mut listing = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            listing.push(ListingEntry { name, is_dir });
        }
        let at_root = request_path == "/";
        let body = content::directory_listing(request_path, &listing, at_root);
        GeminiResponse::success(format!("{}; charset=utf-8", MIME_GEMTEXT), body.into_bytes())
    }
}

impl RequestHandler for StaticFileHandler {
    fn handle(&self, request: &GeminiRequest) -> GeminiResponse {
        let resolved = match self.resolve(&request.url.path) {
            Some(path) => path,
            None => return Self::not_found(),
        };
        if resolved.is_dir() {
            self.serve_directory(&resolved, &request.url.path)
        } else if resolved.is_file() {
            self.serve_file(&resolved)
        } else {
            // Devices, sockets and friends are never served.
            Self::not_found()
        }
    }
}
