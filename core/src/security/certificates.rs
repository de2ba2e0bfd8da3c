/*
 * certificates.rs
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

//! Certificate utilities: SHA-256 fingerprints over DER (the sole identity
//! TOFU uses), validity and hostname introspection for reporting, and
//! self-signed generation for server bootstrap and client identities.

use std::fmt;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use x509_parser::prelude::*;

/// Certificate parsing or generation failure.
#[derive(Debug)]
pub enum CertificateError {
    Parse(String),
    Generate(String),
}

impl fmt::Display for CertificateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CertificateError::Parse(reason) => write!(f, "certificate parse error: {}", reason),
            CertificateError::Generate(reason) => {
                write!(f, "certificate generation error: {}", reason)
            }
        }
    }
}

impl std::error::Error for CertificateError {}

/// `sha256:<lowercase-hex>` fingerprint of DER-encoded certificate bytes.
///
/// Always computed over DER, never PEM.
pub fn fingerprint(der: &[u8]) -> String {
    let digest = Sha256::digest(der);
    let mut out = String::with_capacity(7 + digest.len() * 2);
    out.push_str("sha256:");
    for byte in digest {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

/// Whether the certificate's validity window has ended at `now`.
pub fn is_expired(der: &[u8], now: DateTime<Utc>) -> Result<bool, CertificateError> {
    let (_, cert) =
        X509Certificate::from_der(der).map_err(|e| CertificateError::Parse(e.to_string()))?;
    Ok(cert.validity().not_after.timestamp() < now.timestamp())
}

/// Whether the certificate names `host` in a SAN dNSName (wildcards cover a
/// single label) or, lacking SANs, in the subject CN. Informational only;
/// TOFU identity is the fingerprint.
pub fn valid_for_hostname(der: &[u8], host: &str) -> Result<bool, CertificateError> {
    let (_, cert) =
        X509Certificate::from_der(der).map_err(|e| CertificateError::Parse(e.to_string()))?;

    if let Ok(Some(san)) = cert.subject_alternative_name() {
        let mut saw_name = false;
        for name in &san.value.general_names {
            match name {
                GeneralName::DNSName(pattern) => {
                    saw_name = true;
                    if hostname_matches(pattern, host) {
                        return Ok(true);
                    }
                }
                GeneralName::IPAddress(addr) => {
                    saw_name = true;
                    if ip_matches(addr, host) {
                        return Ok(true);
                    }
                }
                _ => {}
            }
        }
        if saw_name {
            return Ok(false);
        }
    }

    let cn = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|attr| attr.as_str().ok());
    Ok(cn.map(|cn| hostname_matches(cn, host)).unwrap_or(false))
}

fn hostname_matches(pattern: &str, host: &str) -> bool {
    let pattern = pattern.to_ascii_lowercase();
    let host = host.to_ascii_lowercase();
    if let Some(suffix) = pattern.strip_prefix("*.") {
        // A wildcard covers exactly one leading label.
        match host.split_once('.') {
            Some((_, domain)) => domain == suffix,
            None => false,
        }
    } else {
        pattern == host
    }
}

fn ip_matches(san_bytes: &[u8], host: &str) -> bool {
    match host.parse::<std::net::IpAddr>() {
        Ok(std::net::IpAddr::V4(v4)) => san_bytes == v4.octets(),
        Ok(std::net::IpAddr::V6(v6)) => san_bytes == v6.octets(),
        Err(_) => false,
    }
}

/// Generate a self-signed certificate for `hostname`, valid for
/// `valid_days` days. Returns `(cert_pem, key_pem)`.
///
/// The key is ECDSA P-256; rcgen cannot generate RSA keys, so the key-size
/// knob of classic deployments does not apply.
pub fn generate_self_signed(
    hostname: &str,
    valid_days: i64,
) -> Result<(String, String), CertificateError> {
    let key = rcgen::KeyPair::generate().map_err(|e| CertificateError::Generate(e.to_string()))?;
    let mut params = rcgen::CertificateParams::new(vec![hostname.to_string()])
        .map_err(|e| CertificateError::Generate(e.to_string()))?;
    let mut dn = rcgen::DistinguishedName::new();
    dn.push(rcgen::DnType::CommonName, hostname);
    params.distinguished_name = dn;
    let now = ::time::OffsetDateTime::now_utc();
    params.not_before = now - ::time::Duration::days(1);
    params.not_after = now + ::time::Duration::days(valid_days);
    let cert = params
        .self_signed(&key)
        .map_err(|e| CertificateError::Generate(e.to_string()))?;
    Ok((cert.pem(), key.serialize_pem()))
}
