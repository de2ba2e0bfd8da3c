/*
 * middleware.rs
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

//! Request middleware: ordered filters run before routing; the first one to
//! reject short-circuits with its response. Built-ins cover CIDR access
//! control, per-IP token-bucket rate limiting, and path-scoped client
//! certificate authorization.

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;

use crate::protocol::{GeminiRequest, GeminiResponse, StatusCode};
use crate::security::certificates;

use super::config::{
    AccessControlConfig, CertificateAuthConfig, ConfigError, PathRule, RateLimitConfig,
};

/// Outcome of one middleware.
#[derive(Debug)]
pub enum Decision {
    Allow,
    Reject(GeminiResponse),
}

/// A request filter. Implementations must be cheap and non-blocking; they
/// run inline on the connection task.
pub trait Middleware: Send + Sync {
    fn name(&self) -> &'static str;
    fn process(&self, request: &GeminiRequest) -> Decision;
}

/// Run the pipeline in order; the first rejection wins.
pub fn run_pipeline(
    middlewares: &[Arc<dyn Middleware>],
    request: &GeminiRequest,
) -> Option<GeminiResponse> {
    for middleware in middlewares {
        if let Decision::Reject(response) = middleware.process(request) {
            log::debug!(
                "[middleware] {} rejected {} with {}",
                middleware.name(),
                request.url.path,
                response.status
            );
            return Some(response);
        }
    }
    None
}

// ======================================================================
// CIDR matching
// ======================================================================

/// An IPv4 or IPv6 network in CIDR notation. A bare address parses as a
/// single-host network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cidr {
    network: IpAddr,
    prefix_len: u8,
}

impl Cidr {
    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.network, ip) {
            (IpAddr::V4(network), IpAddr::V4(ip)) => {
                let mask = if self.prefix_len == 0 {
                    0
                } else {
                    u32::MAX << (32 - u32::from(self.prefix_len))
                };
                u32::from(network) & mask == u32::from(ip) & mask
            }
            (IpAddr::V6(network), IpAddr::V6(ip)) => {
                let mask = if self.prefix_len == 0 {
                    0
                } else {
                    u128::MAX << (128 - u32::from(self.prefix_len))
                };
                u128::from(network) & mask == u128::from(ip) & mask
            }
            _ => false,
        }
    }
}

impl FromStr for Cidr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, prefix) = match s.split_once('/') {
            Some((addr, prefix)) => {
                let prefix: u8 = prefix
                    .parse()
                    .map_err(|_| format!("bad prefix length: {}", prefix))?;
                (addr, Some(prefix))
            }
            None => (s, None),
        };
        let network: IpAddr = addr.parse().map_err(|_| format!("bad address: {}", addr))?;
        let max = match network {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        let prefix_len = prefix.unwrap_or(max);
        if prefix_len > max {
            return Err(format!("prefix /{} too long for address family", prefix_len));
        }
        Ok(Cidr {
            network,
            prefix_len,
        })
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

// ======================================================================
// Access control
// ======================================================================

/// CIDR allow/deny filter. Deny entries always win; a non-empty allow list
/// then acts as a whitelist; otherwise the default policy applies.
pub struct AccessControl {
    enabled: bool,
    allow: Vec<Cidr>,
    deny: Vec<Cidr>,
    default_allow: bool,
}

impl AccessControl {
    pub fn from_config(config: &AccessControlConfig) -> Result<Self, ConfigError> {
        if !config.enabled {
            return Ok(Self {
                enabled: false,
                allow: Vec::new(),
                deny: Vec::new(),
                default_allow: config.default_allow,
            });
        }
        let parse_list = |entries: &[String]| -> Result<Vec<Cidr>, ConfigError> {
            entries
                .iter()
                .map(|entry| {
                    entry
                        .parse::<Cidr>()
                        .map_err(|e| ConfigError::new(format!("bad CIDR {}: {}", entry, e)))
                })
                .collect()
        };
        Ok(Self {
            enabled: config.enabled,
            allow: parse_list(&config.allow_list)?,
            deny: parse_list(&config.deny_list)?,
            default_allow: config.default_allow,
        })
    }

    fn denied() -> Decision {
        Decision::Reject(GeminiResponse::new(
            StatusCode::ProxyRequestRefused,
            "Access denied",
        ))
    }
}

impl Middleware for AccessControl {
    fn name(&self) -> &'static str {
        "access_control"
    }

    fn process(&self, request: &GeminiRequest) -> Decision {
        if !self.enabled {
            return Decision::Allow;
        }
        let ip = request.peer_ip();
        if self.deny.iter().any(|cidr| cidr.contains(ip)) {
            return Self::denied();
        }
        if !self.allow.is_empty() {
            if self.allow.iter().any(|cidr| cidr.contains(ip)) {
                return Decision::Allow;
            }
            return Self::denied();
        }
        if self.default_allow {
            Decision::Allow
        } else {
            Self::denied()
        }
    }
}

// ======================================================================
// Rate limiting
// ======================================================================

struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

/// Per-IP token bucket limiter. Buckets refill continuously at
/// `refill_rate` tokens per second up to `capacity`; each request consumes
/// one token. Exhausted buckets answer 44 with the retry-after seconds in
/// the meta. Buckets idle past `idle_timeout` are dropped by `evict_idle`,
/// which shares the map lock with consumers.
pub struct RateLimiter {
    enabled: bool,
    capacity: u32,
    refill_rate: f64,
    retry_after: u32,
    idle_timeout: Duration,
    buckets: Mutex<HashMap<IpAddr, TokenBucket>>,
}

impl RateLimiter {
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self {
            enabled: config.enabled,
            capacity: config.capacity,
            refill_rate: config.refill_rate,
            retry_after: config.retry_after,
            idle_timeout: config.idle_timeout,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Refill and consume one token for `ip`. Returns false when the
    /// bucket is empty.
    fn try_consume(&self, ip: IpAddr) -> bool {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().expect("rate limit mutex poisoned");
        let bucket = buckets.entry(ip).or_insert_with(|| TokenBucket {
            tokens: f64::from(self.capacity),
            last_refill: now,
        });
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens =
            (bucket.tokens + elapsed * self.refill_rate).min(f64::from(self.capacity));
        bucket.last_refill = now;
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Drop buckets idle past the configured threshold. Called
    /// periodically by the server.
    pub fn evict_idle(&self) {
        let mut buckets = self.buckets.lock().expect("rate limit mutex poisoned");
        let before = buckets.len();
        buckets.retain(|_, bucket| bucket.last_refill.elapsed() < self.idle_timeout);
        let evicted = before - buckets.len();
        if evicted > 0 {
            log::debug!("[rate_limit] evicted {} idle buckets", evicted);
        }
    }

    /// Number of live buckets (for eviction tests and introspection).
    pub fn bucket_count(&self) -> usize {
        self.buckets.lock().expect("rate limit mutex poisoned").len()
    }
}

impl Middleware for RateLimiter {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    fn process(&self, request: &GeminiRequest) -> Decision {
        if !self.enabled {
            return Decision::Allow;
        }
        if self.try_consume(request.peer_ip()) {
            Decision::Allow
        } else {
            Decision::Reject(GeminiResponse::new(
                StatusCode::SlowDown,
                self.retry_after.to_string(),
            ))
        }
    }
}

// ======================================================================
// Certificate authorization
// ======================================================================

/// Path-scoped client certificate rules.
///
/// The FIRST rule whose prefix matches the request path applies, not the
/// most specific one. Ordering is a data-entry convention: list specific
/// prefixes (including public holes with `require_cert = false` inside a
/// protected tree) before their parents. No matching rule means no
/// certificate is required.
pub struct CertificateAuth {
    rules: Vec<PathRule>,
}

impl CertificateAuth {
    pub fn from_config(config: &CertificateAuthConfig) -> Self {
        Self {
            rules: config.paths.clone(),
        }
    }
}

impl Middleware for CertificateAuth {
    fn name(&self) -> &'static str {
        "certificate_auth"
    }

    fn process(&self, request: &GeminiRequest) -> Decision {
        let rule = self
            .rules
            .iter()
            .find(|rule| request.url.path.starts_with(&rule.prefix));
        let rule = match rule {
            Some(rule) => rule,
            None => return Decision::Allow,
        };
        if !rule.require_cert {
            return Decision::Allow;
        }
        let cert = match &request.peer_cert {
            Some(cert) => cert,
            None => {
                return Decision::Reject(GeminiResponse::new(
                    StatusCode::ClientCertificateRequired,
                    "Certificate required",
                ));
            }
        };
        match certificates::is_expired(cert.as_ref(), Utc::now()) {
            Ok(false) => {}
            // Expired or structurally unparseable certificates get 62.
            Ok(true) | Err(_) => {
                return Decision::Reject(GeminiResponse::new(
                    StatusCode::CertificateNotValid,
                    "Certificate not valid",
                ));
            }
        }
        if !rule.allowed_fingerprints.is_empty() {
            let fingerprint = certificates::fingerprint(cert.as_ref());
            if !rule.allowed_fingerprints.contains(&fingerprint) {
                return Decision::Reject(GeminiResponse::new(
                    StatusCode::CertificateNotAuthorised,
                    "Certificate not authorised",
                ));
            }
        }
        Decision::Allow
    }
}
