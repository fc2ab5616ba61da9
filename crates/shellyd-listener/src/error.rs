use thiserror::Error;

/// Failures raised by the dual-port listener and its TLS setup.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("failed to bind {host}:{port}: {source}")]
    Bind {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to build TLS server config: {0}")]
    TlsConfig(#[from] rustls::Error),
}
