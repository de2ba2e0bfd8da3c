/*
 * tls.rs
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

//! TLS context factory. Both contexts floor at TLS 1.2. The server context
//! can request (never require a CA chain for) client certificates, since
//! Gemini clients present self-signed identities under TOFU; the client
//! context performs no CA or hostname verification at all because the TOFU
//! store replaces both after the handshake.

use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use tokio_rustls::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use tokio_rustls::rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use tokio_rustls::rustls::{
    version, ClientConfig, DigitallySignedStruct, DistinguishedName, ServerConfig, SignatureScheme,
};

use super::certificates::{self, CertificateError};

/// Default validity for bootstrap self-signed certificates, in days.
pub const SELF_SIGNED_VALID_DAYS: i64 = 365;

/// TLS context construction failure.
#[derive(Debug)]
pub enum TlsError {
    Io(io::Error),
    Config(String),
    NoCertificate(String),
    NoPrivateKey(String),
    Certificate(CertificateError),
}

impl fmt::Display for TlsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TlsError::Io(e) => write!(f, "TLS I/O error: {}", e),
            TlsError::Config(reason) => write!(f, "TLS configuration error: {}", reason),
            TlsError::NoCertificate(path) => write!(f, "no certificate found in {}", path),
            TlsError::NoPrivateKey(path) => write!(f, "no private key found in {}", path),
            TlsError::Certificate(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for TlsError {}

impl From<io::Error> for TlsError {
    fn from(e: io::Error) -> Self {
        TlsError::Io(e)
    }
}

impl From<CertificateError> for TlsError {
    fn from(e: CertificateError) -> Self {
        TlsError::Certificate(e)
    }
}

/// Build the server context.
///
/// With both paths configured: load them, generating and persisting a
/// self-signed pair first when neither file exists yet (private key written
/// with mode 0600). With no paths configured: an ephemeral in-memory
/// identity. A lone certfile or keyfile is a configuration error.
pub fn server_config(
    hostname: &str,
    certfile: Option<&Path>,
    keyfile: Option<&Path>,
    require_client_cert: bool,
) -> Result<Arc<ServerConfig>, TlsError> {
    let (certs, key) = match (certfile, keyfile) {
        (Some(certfile), Some(keyfile)) => {
            if !certfile.exists() && !keyfile.exists() {
                let (cert_pem, key_pem) =
                    certificates::generate_self_signed(hostname, SELF_SIGNED_VALID_DAYS)?;
                persist_identity(certfile, keyfile, &cert_pem, &key_pem)?;
                log::info!(
                    "[tls] generated self-signed certificate for {} at {}",
                    hostname,
                    certfile.display()
                );
            } else if !certfile.exists() || !keyfile.exists() {
                return Err(TlsError::Config(
                    "certfile and keyfile must both exist or both be absent".into(),
                ));
            }
            (load_certs(certfile)?, load_key(keyfile)?)
        }
        (None, None) => {
            let (cert_pem, key_pem) =
                certificates::generate_self_signed(hostname, SELF_SIGNED_VALID_DAYS)?;
            log::warn!("[tls] no certificate configured, using an ephemeral identity");
            (certs_from_pem(&cert_pem)?, key_from_pem(&key_pem)?)
        }
        _ => {
            return Err(TlsError::Config(
                "certfile and keyfile must be configured together".into(),
            ));
        }
    };

    let builder = ServerConfig::builder_with_protocol_versions(&[&version::TLS12, &version::TLS13]);
    let builder = if require_client_cert {
        builder.with_client_cert_verifier(Arc::new(AcceptAnyClientCert))
    } else {
        builder.with_no_client_auth()
    };
    let config = builder
        .with_single_cert(certs, key)
        .map_err(|e| TlsError::Config(e.to_string()))?;
    Ok(Arc::new(config))
}

/// Build the client context: no CA verification (TOFU), optional mTLS
/// identity loaded from PEM paths.
pub fn client_config(
    client_cert: Option<(&Path, &Path)>,
) -> Result<Arc<ClientConfig>, TlsError> {
    let builder = ClientConfig::builder_with_protocol_versions(&[&version::TLS12, &version::TLS13])
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(TofuServerCertVerifier));
    let config = match client_cert {
        Some((certfile, keyfile)) => builder
            .with_client_auth_cert(load_certs(certfile)?, load_key(keyfile)?)
            .map_err(|e| TlsError::Config(e.to_string()))?,
        None => builder.with_no_client_auth(),
    };
    Ok(Arc::new(config))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let pem = fs::read_to_string(path)?;
    certs_from_pem(&pem).map_err(|e| match e {
        TlsError::NoCertificate(_) => TlsError::NoCertificate(path.display().to_string()),
        other => other,
    })
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let pem = fs::read_to_string(path)?;
    key_from_pem(&pem).map_err(|e| match e {
        TlsError::NoPrivateKey(_) => TlsError::NoPrivateKey(path.display().to_string()),
        other => other,
    })
}

fn certs_from_pem(pem: &str) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut pem.as_bytes())
        .collect::<Result<_, _>>()
        .map_err(TlsError::Io)?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificate("PEM data".into()));
    }
    Ok(certs)
}

fn key_from_pem(pem: &str) -> Result<PrivateKeyDer<'static>, TlsError> {
    rustls_pemfile::private_key(&mut pem.as_bytes())
        .map_err(TlsError::Io)?
        .ok_or_else(|| TlsError::NoPrivateKey("PEM data".into()))
}

/// Write the generated identity; the key file is owner read/write only.
fn persist_identity(
    certfile: &Path,
    keyfile: &Path,
    cert_pem: &str,
    key_pem: &str,
) -> Result<(), TlsError> {
    if let Some(parent) = certfile.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    if let Some(parent) = keyfile.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(certfile, cert_pem)?;

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(keyfile)?;
    file.write_all(key_pem.as_bytes())?;
    Ok(())
}

fn all_signature_schemes() -> Vec<SignatureScheme> {
    vec![
        SignatureScheme::ECDSA_NISTP256_SHA256,
        SignatureScheme::ECDSA_NISTP384_SHA384,
        SignatureScheme::ED25519,
        SignatureScheme::RSA_PSS_SHA256,
        SignatureScheme::RSA_PSS_SHA384,
        SignatureScheme::RSA_PSS_SHA512,
        SignatureScheme::RSA_PKCS1_SHA256,
        SignatureScheme::RSA_PKCS1_SHA384,
        SignatureScheme::RSA_PKCS1_SHA512,
    ]
}

/// Accepts any syntactically present client certificate and never aborts
/// the handshake when none is sent. Authorization happens later, in the
/// certificate-auth middleware, against the DER fingerprint.
#[derive(Debug)]
struct AcceptAnyClientCert;

impl ClientCertVerifier for AcceptAnyClientCert {
    fn offer_client_auth(&self) -> bool {
        true
    }

    fn client_auth_mandatory(&self) -> bool {
        // Missing certificates are handled by middleware (status 60), not
        // by a handshake alert.
        false
    }

    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> Result<ClientCertVerified, tokio_rustls::rustls::Error> {
        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        all_signature_schemes()
    }
}

/// Accepts any server certificate during the handshake; continuity is
/// enforced afterwards by the TOFU store over the captured peer DER.
#[derive(Debug)]
struct TofuServerCertVerifier;

impl ServerCertVerifier for TofuServerCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, tokio_rustls::rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        all_signature_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ephemeral_server_config() {
        let config = server_config("localhost", None, None, false).unwrap();
        assert!(!config.alpn_protocols.iter().any(|p| p == b"h2"));
    }

    #[test]
    fn server_config_persists_generated_identity() {
        let dir = tempfile::tempdir().unwrap();
        let certfile = dir.path().join("cert.pem");
        let keyfile = dir.path().join("key.pem");
        server_config("localhost", Some(&certfile), Some(&keyfile), false).unwrap();
        assert!(certfile.exists() && keyfile.exists());
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&keyfile).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
        // Second construction reuses the persisted pair.
        server_config("localhost", Some(&certfile), Some(&keyfile), true).unwrap();
    }

    #[test]
    fn lone_certfile_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let certfile = dir.path().join("cert.pem");
        fs::write(&certfile, "not a cert").unwrap();
        let err = server_config(
            "localhost",
            Some(&certfile),
            Some(&dir.path().join("missing.pem")),
            false,
        )
        .unwrap_err();
        assert!(matches!(err, TlsError::Config(_)));
    }

    #[test]
    fn client_config_builds_without_identity() {
        client_config(None).unwrap();
    }
}
