use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha2::{Digest, Sha256};
use shellyd_proto::KeyAlgorithm;
use tracing::warn;

use crate::error::ShellydError;

/// One parsed line of `authorized_keys` (spec.md 3, 4.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizedKey {
    pub algorithm: KeyAlgorithm,
    pub key_bytes: Vec<u8>,
    pub label: String,
    pub fingerprint: String,
}

/// Computes `SHA256:<base64, unpadded>` over the raw key bytes.
pub fn fingerprint(key_bytes: &[u8]) -> String {
    let digest = Sha256::digest(key_bytes);
    let encoded = STANDARD.encode(digest);
    format!("SHA256:{}", encoded.trim_end_matches('='))
}

/// The file is the source of truth; every query re-reads it (spec.md 4.1).
pub struct KeyStore {
    path: PathBuf,
}

impl KeyStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn ensure_exists(&self) -> Result<(), ShellydError> {
        if !self.path.exists() {
            fs::write(&self.path, b"").map_err(|source| ShellydError::Write {
                path: self.path.clone(),
                source,
            })?;
        }
        fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600)).map_err(|source| {
            ShellydError::SetPermissions {
                path: self.path.clone(),
                source,
            }
        })
    }

    pub fn list(&self) -> Result<Vec<AuthorizedKey>, ShellydError> {
        let contents = read_or_empty(&self.path)?;
        Ok(contents.lines().filter_map(parse_line).collect())
    }

    pub fn is_authorized(&self, algorithm: KeyAlgorithm, key_bytes: &[u8]) -> Result<bool, ShellydError> {
        Ok(self
            .list()?
            .iter()
            .any(|k| k.algorithm == algorithm && k.key_bytes == key_bytes))
    }

    pub fn add(
        &self,
        algorithm: KeyAlgorithm,
        key_bytes: Vec<u8>,
        label: String,
    ) -> Result<AuthorizedKey, ShellydError> {
        let mut keys = self.list()?;
        let entry = AuthorizedKey {
            algorithm,
            fingerprint: fingerprint(&key_bytes),
            key_bytes,
            label,
        };
        keys.retain(|k| k.fingerprint != entry.fingerprint);
        keys.push(entry.clone());
        self.write_all(&keys)?;
        Ok(entry)
    }

    /// Parses and validates a wire-format key blob (algorithm tag + base64)
    /// before handing it to [`Self::add`]. Used by the `add-key` CLI path
    /// and by pairing verification.
    pub fn add_from_wire(
        &self,
        algorithm_tag: &str,
        base64_blob: &str,
        label: String,
    ) -> Result<AuthorizedKey, ShellydError> {
        let algorithm =
            KeyAlgorithm::parse(algorithm_tag).ok_or_else(|| ShellydError::InvalidKeyFormat {
                reason: format!("unsupported algorithm `{algorithm_tag}`"),
            })?;
        let key_bytes = STANDARD
            .decode(base64_blob)
            .map_err(|_| ShellydError::InvalidKeyFormat {
                reason: "key blob is not valid base64".to_string(),
            })?;
        self.add(algorithm, key_bytes, label)
    }

    pub fn remove(&self, fingerprint: &str) -> Result<bool, ShellydError> {
        let mut keys = self.list()?;
        let before = keys.len();
        keys.retain(|k| k.fingerprint != fingerprint);
        let removed = keys.len() != before;
        if removed {
            self.write_all(&keys)?;
        }
        Ok(removed)
    }

    fn write_all(&self, keys: &[AuthorizedKey]) -> Result<(), ShellydError> {
        let mut contents = String::new();
        for key in keys {
            contents.push_str(key.algorithm.as_str());
            contents.push(' ');
            contents.push_str(&STANDARD.encode(&key.key_bytes));
            if !key.label.is_empty() {
                contents.push(' ');
                contents.push_str(&key.label);
            }
            contents.push('\n');
        }

        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, contents).map_err(|source| ShellydError::Write {
            path: tmp_path.clone(),
            source,
        })?;
        fs::set_permissions(&tmp_path, fs::Permissions::from_mode(0o600)).map_err(|source| {
            ShellydError::SetPermissions {
                path: tmp_path.clone(),
                source,
            }
        })?;
        fs::rename(&tmp_path, &self.path).map_err(|source| ShellydError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

fn read_or_empty(path: &Path) -> Result<String, ShellydError> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(contents),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(source) => Err(ShellydError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn parse_line(line: &str) -> Option<AuthorizedKey> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let mut parts = line.splitn(3, ' ');
    let algorithm_tag = parts.next()?;
    let blob = parts.next()?;
    let label = parts.next().unwrap_or("").to_string();

    let algorithm = match KeyAlgorithm::parse(algorithm_tag) {
        Some(algorithm) => algorithm,
        None => {
            warn!("skipping authorized_keys line with unsupported algorithm `{algorithm_tag}`");
            return None;
        }
    };

    let key_bytes = match STANDARD.decode(blob) {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!("skipping malformed authorized_keys line: {err}");
            return None;
        }
    };

    let fingerprint = fingerprint(&key_bytes);
    Some(AuthorizedKey {
        algorithm,
        key_bytes,
        label,
        fingerprint,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_key() -> Vec<u8> {
        vec![1u8; 32]
    }

    #[test]
    fn add_then_list_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::new(dir.path().join("authorized_keys"));
        let added = store
            .add(KeyAlgorithm::Ed25519, sample_key(), "Phone A".to_string())
            .unwrap();
        let listed = store.list().unwrap();
        assert_eq!(listed, vec![added]);
    }

    #[test]
    fn add_then_remove_restores_prior_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::new(dir.path().join("authorized_keys"));
        let before = store.list().unwrap();
        let added = store
            .add(KeyAlgorithm::Ed25519, sample_key(), "Phone A".to_string())
            .unwrap();
        store.remove(&added.fingerprint).unwrap();
        assert_eq!(store.list().unwrap(), before);
    }

    #[test]
    fn is_authorized_ignores_label() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::new(dir.path().join("authorized_keys"));
        store
            .add(KeyAlgorithm::Ed25519, sample_key(), "Phone A".to_string())
            .unwrap();
        assert!(store
            .is_authorized(KeyAlgorithm::Ed25519, &sample_key())
            .unwrap());
        assert!(!store
            .is_authorized(KeyAlgorithm::Ed25519, &vec![9u8; 32])
            .unwrap());
    }

    #[test]
    fn unsupported_algorithm_line_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("authorized_keys");
        fs::write(&path, "ssh-rsa AAAAB3 some-label\n").unwrap();
        let store = KeyStore::new(path);
        assert_eq!(store.list().unwrap(), vec![]);
    }

    #[test]
    fn add_from_wire_rejects_unsupported_algorithm() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::new(dir.path().join("authorized_keys"));
        let err = store
            .add_from_wire("ssh-rsa", &STANDARD.encode(sample_key()), "x".into())
            .unwrap_err();
        assert!(matches!(err, ShellydError::InvalidKeyFormat { .. }));
    }

    #[test]
    fn fingerprint_is_stable() {
        let a = fingerprint(&sample_key());
        let b = fingerprint(&sample_key());
        assert_eq!(a, b);
        assert!(a.starts_with("SHA256:"));
        assert!(!a.ends_with('='));
    }
}
