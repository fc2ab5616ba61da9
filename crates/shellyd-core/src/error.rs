use std::path::PathBuf;

use thiserror::Error;

/// Failures raised by the key store, trust material, pairing controller,
/// shell session, and connection state machine.
#[derive(Debug, Error)]
pub enum ShellydError {
    #[error("failed to create directory `{path}`: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read `{path}`: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write `{path}`: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to set permissions on `{path}`: {source}")]
    SetPermissions {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file `{path}`: {source}")]
    ParseConfig {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("data is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("invalid authorized key: {reason}")]
    InvalidKeyFormat { reason: String },
    #[error("failed to generate self-signed certificate: {0}")]
    CertificateGeneration(#[from] rcgen::Error),
    #[error("failed to allocate a pseudo-terminal: {0}")]
    PtyAllocation(String),
    #[error("failed to spawn shell: {0}")]
    ShellSpawn(String),
    #[error("failed to write to shell: {0}")]
    ShellWrite(#[source] std::io::Error),
    #[error("home directory could not be determined")]
    HomeDirUnresolved,
}
