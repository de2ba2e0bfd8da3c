/*
 * logging.rs
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

//! Log formatting helpers. Gemella logs through the `log` facade and never
//! installs a logger itself; the embedding application chooses the sink.
//! With `logging.hash_ips` enabled, client addresses are logged as a
//! truncated SHA-256 digest instead of the literal IP.

use std::net::IpAddr;

use sha2::{Digest, Sha256};

/// Hex digits kept from the hashed address.
const HASHED_IP_LEN: usize = 12;

/// Render a client IP for logging, hashed when the configuration asks for
/// anonymized logs.
pub fn display_ip(ip: IpAddr, hash: bool) -> String {
    if !hash {
        return ip.to_string();
    }
    let digest = Sha256::digest(ip.to_string().as_bytes());
    let mut out = String::with_capacity(HASHED_IP_LEN);
    for byte in digest.iter().take(HASHED_IP_LEN / 2) {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_ip_passthrough() {
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        assert_eq!(display_ip(ip, false), "10.0.0.1");
    }

    #[test]
    fn hashed_ip_is_stable_and_opaque() {
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        let hashed = display_ip(ip, true);
        assert_eq!(hashed.len(), HASHED_IP_LEN);
        assert_eq!(hashed, display_ip(ip, true));
        assert!(!hashed.contains("10.0.0.1"));
        let other: IpAddr = "10.0.0.2".parse().unwrap();
        assert_ne!(hashed, display_ip(other, true));
    }
}
