/*
 * titan.rs
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

//! Titan upload handler. `preflight` gates a request (token, MIME type,
//! declared size) before the connection layer buffers the body; `handle`
//! then commits it: temp file inside the upload root, fsync, atomic rename.
//! A declared size of zero is a delete. The temp file is unlinked on every
//! failure path, including task cancellation, via its Drop.

use std::collections::HashSet;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

use crate::protocol::{GeminiRequest, GeminiResponse, StatusCode, TitanParams};

use super::config::TitanConfig;

/// Handles titan:// uploads under a confined directory.
pub struct TitanHandler {
    upload_dir: PathBuf,
    max_upload_size: u64,
    allowed_mime_types: Option<HashSet<String>>,
    auth_tokens: Option<HashSet<String>>,
    enable_delete: bool,
}

impl TitanHandler {
    pub fn new(config: &TitanConfig) -> io::Result<Self> {
        Ok(Self {
            upload_dir: config.upload_dir.canonicalize()?,
            max_upload_size: config.max_upload_size,
            allowed_mime_types: config.allowed_mime_types.clone(),
            auth_tokens: config.auth_tokens.clone(),
            enable_delete: config.enable_delete,
        })
    }

    /// Validation that must happen before the body is read off the wire:
    /// auth token, MIME allow-list, declared size against the cap.
    pub fn preflight(&self, request: &GeminiRequest) -> Result<(), GeminiResponse> {
        let params = match request.titan_params() {
            Some(params) => params,
            None => {
                return Err(GeminiResponse::new(
                    StatusCode::BadRequest,
                    "Missing titan parameters",
                ));
            }
        };
        if let Some(tokens) = &self.auth_tokens {
            let authorized = params
                .token
                .as_ref()
                .map(|token| tokens.contains(token))
                .unwrap_or(false);
            if !authorized {
                return Err(GeminiResponse::new(
                    StatusCode::ClientCertificateRequired,
                    "Authentication required",
                ));
            }
        }
        if let Some(allowed) = &self.allowed_mime_types {
            if !allowed.contains(&params.mime) {
                return Err(GeminiResponse::new(
                    StatusCode::BadRequest,
                    "Disallowed MIME type",
                ));
            }
        }
        if params.size > self.max_upload_size {
            return Err(GeminiResponse::new(StatusCode::PermanentFailure, "Too large"));
        }
        Ok(())
    }

    /// Commit an upload whose body the connection layer has buffered.
    pub fn handle(&self, request: &GeminiRequest) -> GeminiResponse {
        let params = match request.titan_params() {
            Some(params) => params,
            None => return GeminiResponse::new(StatusCode::BadRequest, "Missing titan parameters"),
        };
        let target = match self.resolve_target(&request.url.path) {
            Some(target) => target,
            None => return GeminiResponse::new(StatusCode::BadRequest, "Bad upload path"),
        };
        if params.size == 0 {
            return self.delete(&target);
        }
        let body = request.body.as_deref().unwrap_or(&[]);
        self.store(&target, params, body)
    }

    /// Map the request path to a target inside the upload root. Residual
    /// relative components (already clamped at the URL layer) and symlink
    /// escapes are refused.
    fn resolve_target(&self, request_path: &str) -> Option<PathBuf> {
        let relative = Path::new(request_path.trim_start_matches('/'));
        if relative.as_os_str().is_empty() {
            return None;
        }
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return None;
        }
        let target = self.upload_dir.join(relative);
        // The deepest existing ancestor must resolve inside the root;
        // parents below it are created by `store`.
        let mut probe = target.parent()?;
        loop {
            match probe.canonicalize() {
                Ok(resolved) => {
                    if resolved.starts_with(&self.upload_dir) {
                        return Some(target);
                    }
                    return None;
                }
                Err(_) => probe = probe.parent()?,
            }
        }
    }

    fn delete(&self, target: &Path) -> GeminiResponse {
        if !self.enable_delete {
            return GeminiResponse::new(StatusCode::PermanentFailure, "Deletes disabled");
        }
        if !target.exists() {
            // Idempotent: deleting a missing file succeeds.
            return GeminiResponse::new(StatusCode::Success, "Deleted");
        }
        if !target.is_file() {
            return GeminiResponse::new(StatusCode::BadRequest, "Not a regular file");
        }
        match std::fs::remove_file(target) {
            Ok(()) => GeminiResponse::new(StatusCode::Success, "Deleted"),
            Err(e) => {
                log::warn!("[titan] delete failed: {}", e);
                GeminiResponse::new(StatusCode::TemporaryFailure, "Delete failed")
            }
        }
    }

    fn store(&self, target: &Path, params: &TitanParams, body: &[u8]) -> GeminiResponse {
        match self.write_atomically(target, body) {
            Ok(()) => {
                log::info!(
                    "[titan] stored {} ({} bytes, {})",
                    target
                        .strip_prefix(&self.upload_dir)
                        .unwrap_or(target)
                        .display(),
                    body.len(),
                    params.mime
                );
                GeminiResponse::new(StatusCode::Success, "Uploaded")
            }
            Err(e) => {
                log::warn!("[titan] upload failed: {}", e);
                GeminiResponse::new(StatusCode::TemporaryFailure, "Upload failed")
            }
        }
    }

    fn write_atomically(&self, target: &Path, body: &[u8]) -> io::Result<()> {
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // The temp file lives in the upload root so the rename stays on
        // one filesystem; its Drop unlinks it on any failure path.
        let mut temp = tempfile::NamedTempFile::new_in(&self.upload_dir)?;
        temp.write_all(body)?;
        temp.as_file().sync_all()?;
        temp.persist(target).map_err(|e| e.error)?;
        Ok(())
    }
}
