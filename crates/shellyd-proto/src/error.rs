use thiserror::Error;

/// Failures decoding or re-encoding wire messages.
#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("envelope is not valid JSON: {0}")]
    Envelope(#[source] serde_json::Error),
    #[error("payload for `{kind}` is not valid JSON: {source}")]
    Payload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("unknown message type `{0}`")]
    UnknownType(String),
}
