use std::fs;
use std::os::unix::fs::PermissionsExt as _;
use std::path::Path;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha2::{Digest, Sha256};
use time::{Duration, OffsetDateTime};

use crate::error::ShellydError;

/// The self-signed server certificate and private key, loaded once and
/// cached for the listener (spec.md 4.2).
pub struct TrustMaterial {
    pub certificate_der: Vec<u8>,
    pub private_key_der: Vec<u8>,
    pub fingerprint: String,
}

impl TrustMaterial {
    /// Generates a certificate/key pair if either file is missing, then loads.
    pub fn ensure(cert_path: &Path, key_path: &Path) -> Result<Self, ShellydError> {
        if !cert_path.exists() || !key_path.exists() {
            Self::generate(cert_path, key_path)?;
        }
        Self::load(cert_path, key_path)
    }

    fn generate(cert_path: &Path, key_path: &Path) -> Result<(), ShellydError> {
        let mut params = rcgen::CertificateParams::new(Vec::new())?;
        let mut dn = rcgen::DistinguishedName::new();
        dn.push(rcgen::DnType::CommonName, "Shelly Daemon");
        params.distinguished_name = dn;

        let now = OffsetDateTime::now_utc();
        params.not_before = now - Duration::days(1);
        params.not_after = now + Duration::days(365);

        let key_pair = rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256)?;
        let cert = params.self_signed(&key_pair)?;

        write_mode(cert_path, cert.pem().as_bytes(), 0o644)?;
        write_mode(key_path, key_pair.serialize_pem().as_bytes(), 0o600)?;
        Ok(())
    }

    /// Parses the on-disk PEM certificate and key and computes the
    /// certificate fingerprint (spec.md 4.2: SHA-256 of the DER leaf,
    /// colon-separated uppercase hex).
    pub fn load(cert_path: &Path, key_path: &Path) -> Result<Self, ShellydError> {
        let cert_pem = fs::read_to_string(cert_path).map_err(|source| ShellydError::Read {
            path: cert_path.to_path_buf(),
            source,
        })?;
        let key_pem = fs::read_to_string(key_path).map_err(|source| ShellydError::Read {
            path: key_path.to_path_buf(),
            source,
        })?;

        let certificate_der = pem_to_der(&cert_pem)?;
        let private_key_der = pem_to_der(&key_pem)?;
        let fingerprint = fingerprint_der(&certificate_der);

        Ok(Self {
            certificate_der,
            private_key_der,
            fingerprint,
        })
    }
}

fn write_mode(path: &Path, bytes: &[u8], mode: u32) -> Result<(), ShellydError> {
    fs::write(path, bytes).map_err(|source| ShellydError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|source| {
        ShellydError::SetPermissions {
            path: path.to_path_buf(),
            source,
        }
    })
}

fn pem_to_der(pem: &str) -> Result<Vec<u8>, ShellydError> {
    let body: String = pem
        .lines()
        .filter(|line| !line.starts_with("-----"))
        .collect();
    Ok(STANDARD.decode(body)?)
}

fn fingerprint_der(der: &[u8]) -> String {
    Sha256::digest(der)
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn ensure_creates_material_with_expected_permissions() {
        let dir = tempfile::tempdir().unwrap();
        let cert_path = dir.path().join("server.crt");
        let key_path = dir.path().join("server.key");

        let material = TrustMaterial::ensure(&cert_path, &key_path).unwrap();
        assert!(!material.certificate_der.is_empty());
        assert!(!material.private_key_der.is_empty());

        let cert_mode = fs::metadata(&cert_path).unwrap().permissions().mode() & 0o777;
        let key_mode = fs::metadata(&key_path).unwrap().permissions().mode() & 0o777;
        assert_eq!(cert_mode, 0o644);
        assert_eq!(key_mode, 0o600);
    }

    #[test]
    fn fingerprint_is_stable_across_loads() {
        let dir = tempfile::tempdir().unwrap();
        let cert_path = dir.path().join("server.crt");
        let key_path = dir.path().join("server.key");

        let first = TrustMaterial::ensure(&cert_path, &key_path).unwrap();
        let second = TrustMaterial::load(&cert_path, &key_path).unwrap();
        assert_eq!(first.fingerprint, second.fingerprint);
        assert!(first.fingerprint.contains(':'));
    }
}
