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

//! Security: TLS context factories, certificate utilities, and the TOFU
//! trust store.

pub mod certificates;
pub mod tls;
pub mod tofu;

pub use certificates::{fingerprint, generate_self_signed, CertificateError};
pub use tls::{client_config, server_config, TlsError};
pub use tofu::{ImportMode, ImportSummary, TofuEntry, TofuError, TofuStore, TofuVerdict};
