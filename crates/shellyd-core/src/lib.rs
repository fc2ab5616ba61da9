#![forbid(unsafe_code)]
//! Session protocol state machine, PTY shell session, key store, trust
//! material, pairing, and audit for the shelly remote terminal daemon.
//!
//! `shellyd-listener` owns sockets and framing; this crate owns everything
//! that happens once a transport hands it a stream of [`connection::Inbound`]
//! values for one accepted connection.

mod audit;
mod config;
mod connection;
mod discovery;
mod error;
mod keystore;
mod pairing;
mod shell;
mod trust;

pub use audit::{AuditKind, AuditRecord, AuditSink};
pub use config::{Config, ConfigStore, Paths};
pub use connection::{Connection, ConnectionHandles, Inbound, Phase};
pub use discovery::{DiscoveryAdvertiser, LoggingDiscoveryAdvertiser, LoggingPairingDisplay, PairingDisplay, ServiceRecord};
pub use error::ShellydError;
pub use keystore::{fingerprint, AuthorizedKey, KeyStore};
pub use pairing::{PairingAttempt, PairingController};
pub use shell::{detect_sudo_prompt, ShellSession};
pub use trust::TrustMaterial;
