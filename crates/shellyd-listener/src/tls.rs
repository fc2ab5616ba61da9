use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use shellyd_core::TrustMaterial;

use crate::error::ListenerError;

/// Builds a minimum-TLS-1.2 server config from the daemon's self-signed
/// leaf certificate (spec.md 4.2). rustls never negotiates below 1.2, so
/// the default protocol set already satisfies the floor.
pub fn build_server_config(trust: &TrustMaterial) -> Result<Arc<rustls::ServerConfig>, ListenerError> {
    let _ = rustls::crypto::ring::default_provider().install_default();

    let cert = CertificateDer::from(trust.certificate_der.clone());
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(trust.private_key_der.clone()));

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![cert], key)?;

    Ok(Arc::new(config))
}
