/*
 * mime.rs
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

//! Extension-based MIME detection for the static file handler. Text types
//! carry an explicit UTF-8 charset parameter; unknown extensions fall back
//! to application/octet-stream.

use std::path::Path;

/// MIME type for unknown extensions.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Gemtext with charset, as served in a 20 meta.
pub const GEMTEXT_UTF8: &str = "text/gemini; charset=utf-8";

/// MIME type for a file extension (without the dot), case-insensitive.
pub fn from_extension(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "gmi" | "gemini" => GEMTEXT_UTF8,
        "txt" => "text/plain; charset=utf-8",
        "md" | "markdown" => "text/markdown; charset=utf-8",
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "xml" => "text/xml; charset=utf-8",
        "json" => "application/json",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        "mp3" => "audio/mpeg",
        "ogg" => "audio/ogg",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        _ => OCTET_STREAM,
    }
}

/// MIME type for a filesystem path, from its extension.
pub fn for_path(path: &Path) -> &'static str {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(from_extension)
        .unwrap_or(OCTET_STREAM)
}
