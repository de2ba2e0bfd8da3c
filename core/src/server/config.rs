/*
 * config.rs
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

//! Server configuration value. Gemella consumes an already-assembled
//! configuration (loading TOML/env/CLI is the embedding application's
//! concern) but validates it before the server starts.

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::protocol::DEFAULT_PORT;

use super::middleware::Cidr;

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default idle interval after which a rate-limit bucket is evicted.
pub const DEFAULT_BUCKET_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Complete server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub rate_limit: RateLimitConfig,
    pub access_control: AccessControlConfig,
    pub certificate_auth: CertificateAuthConfig,
    pub titan: TitanConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub document_root: PathBuf,
    pub certfile: Option<PathBuf>,
    pub keyfile: Option<PathBuf>,
    pub max_file_size: u64,
    pub require_client_cert: bool,
    pub default_indices: Vec<String>,
    pub enable_directory_listing: bool,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub capacity: u32,
    /// Tokens per second.
    pub refill_rate: f64,
    /// Seconds reported in the 44 meta.
    pub retry_after: u32,
    pub idle_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct AccessControlConfig {
    pub enabled: bool,
    pub allow_list: Vec<String>,
    pub deny_list: Vec<String>,
    pub default_allow: bool,
}

/// One certificate-auth rule. Rules are scanned in order and the first
/// prefix match wins, so more specific prefixes (and public holes inside
/// protected trees) must be listed first.
#[derive(Debug, Clone)]
pub struct PathRule {
    pub prefix: String,
    pub require_cert: bool,
    /// Empty set: any certificate satisfies the rule.
    pub allowed_fingerprints: HashSet<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CertificateAuthConfig {
    pub paths: Vec<PathRule>,
}

#[derive(Debug, Clone)]
pub struct TitanConfig {
    pub enabled: bool,
    pub upload_dir: PathBuf,
    pub max_upload_size: u64,
    /// `None`: any MIME type accepted.
    pub allowed_mime_types: Option<HashSet<String>>,
    /// `None`: no token required.
    pub auth_tokens: Option<HashSet<String>>,
    pub enable_delete: bool,
}

#[derive(Debug, Clone, Default)]
pub struct LoggingConfig {
    pub hash_ips: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            document_root: PathBuf::from("."),
            certfile: None,
            keyfile: None,
            max_file_size: 10 * 1024 * 1024,
            require_client_cert: false,
            default_indices: vec!["index.gmi".to_string(), "index.gemini".to_string()],
            enable_directory_listing: false,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            capacity: 10,
            refill_rate: 1.0,
            retry_after: 30,
            idle_timeout: DEFAULT_BUCKET_IDLE_TIMEOUT,
        }
    }
}

impl Default for AccessControlConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            allow_list: Vec::new(),
            deny_list: Vec::new(),
            default_allow: true,
        }
    }
}

impl Default for TitanConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            upload_dir: PathBuf::from("uploads"),
            max_upload_size: 1024 * 1024,
            allowed_mime_types: None,
            auth_tokens: None,
            enable_delete: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            rate_limit: RateLimitConfig::default(),
            access_control: AccessControlConfig::default(),
            certificate_auth: CertificateAuthConfig::default(),
            titan: TitanConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Configuration rejection reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub message: String,
}

impl ConfigError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    /// Check the invariants the server relies on. Runs before bind.
    /// Port 0 is allowed here (bind to an ephemeral port); the wire-level
    /// URL parser still rejects explicit zero ports.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.server.document_root.exists() {
            return Err(ConfigError::new(format!(
                "document root does not exist: {}",
                self.server.document_root.display()
            )));
        }
        if !self.server.document_root.is_dir() {
            return Err(ConfigError::new(format!(
                "document root is not a directory: {}",
                self.server.document_root.display()
            )));
        }
        if self.server.certfile.is_some() != self.server.keyfile.is_some() {
            return Err(ConfigError::new(
                "server.certfile and server.keyfile must be provided together",
            ));
        }
        if self.server.request_timeout.is_zero() {
            return Err(ConfigError::new("server.request_timeout must be positive"));
        }

        if self.rate_limit.enabled {
            if self.rate_limit.capacity < 1 {
                return Err(ConfigError::new("rate_limit.capacity must be at least 1"));
            }
            if !(self.rate_limit.refill_rate > 0.0) {
                return Err(ConfigError::new("rate_limit.refill_rate must be positive"));
            }
        }

        if self.access_control.enabled {
            for entry in self
                .access_control
                .allow_list
                .iter()
                .chain(self.access_control.deny_list.iter())
            {
                entry
                    .parse::<Cidr>()
                    .map_err(|e| ConfigError::new(format!("bad CIDR {}: {}", entry, e)))?;
            }
        }

        for rule in &self.certificate_auth.paths {
            if !rule.prefix.starts_with('/') {
                return Err(ConfigError::new(format!(
                    "certificate_auth prefix must start with '/': {}",
                    rule.prefix
                )));
            }
        }

        if self.titan.enabled {
            if !self.titan.upload_dir.is_dir() {
                return Err(ConfigError::new(format!(
                    "titan.upload_dir is not a directory: {}",
                    self.titan.upload_dir.display()
                )));
            }
            if self.titan.max_upload_size == 0 {
                return Err(ConfigError::new("titan.max_upload_size must be positive"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config(root: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.server.document_root = root.to_path_buf();
        config
    }

    #[test]
    fn default_with_existing_root_validates() {
        let dir = tempfile::tempdir().unwrap();
        valid_config(dir.path()).validate().unwrap();
    }

    #[test]
    fn missing_document_root_rejected() {
        let mut config = Config::default();
        config.server.document_root = PathBuf::from("/does/not/exist/gemella");
        assert!(config.validate().is_err());
    }

    #[test]
    fn lone_keyfile_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = valid_config(dir.path());
        config.server.keyfile = Some(dir.path().join("key.pem"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_capacity_rate_limit_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = valid_config(dir.path());
        config.rate_limit.enabled = true;
        config.rate_limit.capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn bad_cidr_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = valid_config(dir.path());
        config.access_control.enabled = true;
        config.access_control.deny_list = vec!["10.0.0.0/99".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn titan_requires_existing_upload_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = valid_config(dir.path());
        config.titan.enabled = true;
        config.titan.upload_dir = PathBuf::from("/does/not/exist/up");
        assert!(config.validate().is_err());
        config.titan.upload_dir = dir.path().to_path_buf();
        config.validate().unwrap();
    }
}
