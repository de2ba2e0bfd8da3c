/*
 * status.rs
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

//! Gemini status taxonomy: two-digit codes grouped by first digit
//! (1 input, 2 success, 3 redirect, 4 temporary failure, 5 permanent
//! failure, 6 certificate). Classifiers operate on the raw code so
//! unnamed codes within a category are handled uniformly.

use std::fmt;

/// Lowest valid Gemini status code.
pub const MIN_STATUS: u8 = 10;
/// Highest valid Gemini status code.
pub const MAX_STATUS: u8 = 69;

/// Named status codes used by Gemella.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StatusCode {
    Input = 10,
    SensitiveInput = 11,
    Success = 20,
    RedirectTemporary = 30,
    RedirectPermanent = 31,
    TemporaryFailure = 40,
    ServerUnavailable = 41,
    ProxyError = 43,
    SlowDown = 44,
    PermanentFailure = 50,
    NotFound = 51,
    Gone = 52,
    ProxyRequestRefused = 53,
    BadRequest = 59,
    ClientCertificateRequired = 60,
    CertificateNotAuthorised = 61,
    CertificateNotValid = 62,
}

impl StatusCode {
    /// Numeric value of the status code.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Named code for a numeric value, if Gemella names it.
    pub fn from_code(code: u8) -> Option<StatusCode> {
        match code {
            10 => Some(StatusCode::Input),
            11 => Some(StatusCode::SensitiveInput),
            20 => Some(StatusCode::Success),
            30 => Some(StatusCode::RedirectTemporary),
            31 => Some(StatusCode::RedirectPermanent),
            40 => Some(StatusCode::TemporaryFailure),
            41 => Some(StatusCode::ServerUnavailable),
            43 => Some(StatusCode::ProxyError),
            44 => Some(StatusCode::SlowDown),
            50 => Some(StatusCode::PermanentFailure),
            51 => Some(StatusCode::NotFound),
            52 => Some(StatusCode::Gone),
            53 => Some(StatusCode::ProxyRequestRefused),
            59 => Some(StatusCode::BadRequest),
            60 => Some(StatusCode::ClientCertificateRequired),
            61 => Some(StatusCode::CertificateNotAuthorised),
            62 => Some(StatusCode::CertificateNotValid),
            _ => None,
        }
    }
}

impl From<StatusCode> for u8 {
    fn from(status: StatusCode) -> u8 {
        status.code()
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// True if `code` lies in the valid Gemini range [10, 69].
pub fn is_valid(code: u8) -> bool {
    (MIN_STATUS..=MAX_STATUS).contains(&code)
}

/// 1x: the server expects a query-string resubmission.
pub fn is_input_required(code: u8) -> bool {
    (10..20).contains(&code)
}

/// 2x: the response carries a MIME-typed body.
pub fn is_success(code: u8) -> bool {
    (20..30).contains(&code)
}

/// 3x: meta is the redirect target URL.
pub fn is_redirect(code: u8) -> bool {
    (30..40).contains(&code)
}

/// 4x: transient failure, the request may be retried.
pub fn is_temporary_failure(code: u8) -> bool {
    (40..50).contains(&code)
}

/// 5x: permanent failure.
pub fn is_permanent_failure(code: u8) -> bool {
    (50..60).contains(&code)
}

/// 6x: client certificate required or rejected.
pub fn is_certificate(code: u8) -> bool {
    (60..70).contains(&code)
}

/// Any failure category (4x, 5x or 6x).
pub fn is_error(code: u8) -> bool {
    is_temporary_failure(code) || is_permanent_failure(code) || is_certificate(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_roundtrip() {
        for code in MIN_STATUS..=MAX_STATUS {
            if let Some(named) = StatusCode::from_code(code) {
                assert_eq!(named.code(), code);
            }
        }
    }

    #[test]
    fn classifiers_by_first_digit() {
        assert!(is_input_required(10));
        assert!(is_input_required(11));
        assert!(is_success(20));
        assert!(!is_success(30));
        assert!(is_redirect(30));
        assert!(is_redirect(31));
        assert!(is_temporary_failure(44));
        assert!(is_permanent_failure(51));
        assert!(is_certificate(62));
        assert!(is_error(40) && is_error(59) && is_error(60));
        assert!(!is_error(20) && !is_error(31));
    }

    #[test]
    fn range_bounds() {
        assert!(!is_valid(9));
        assert!(is_valid(10));
        assert!(is_valid(69));
        assert!(!is_valid(70));
    }
}
