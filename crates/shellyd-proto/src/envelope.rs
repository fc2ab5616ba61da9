use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::ProtoError;

/// The envelope that carries exactly one message on the framed channel.
///
/// `payload` is the base64 encoding of a nested JSON document whose shape
/// depends on `kind`; see [`crate::Message`] for the typed view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: String,
    pub timestamp: String,
    #[serde(rename = "messageId")]
    pub message_id: Uuid,
}

impl Envelope {
    pub fn new(kind: impl Into<String>, payload_json: &serde_json::Value) -> Self {
        let payload_bytes = serde_json::to_vec(payload_json).unwrap_or_default();
        Self {
            kind: kind.into(),
            payload: STANDARD.encode(payload_bytes),
            timestamp: now_iso8601(),
            message_id: Uuid::new_v4(),
        }
    }

    /// Builds an envelope carrying raw bytes rather than a JSON document,
    /// used for the binary-frame / forward-compat terminal input path.
    pub fn from_raw_bytes(kind: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            kind: kind.into(),
            payload: STANDARD.encode(bytes),
            timestamp: now_iso8601(),
            message_id: Uuid::new_v4(),
        }
    }

    pub fn decode_payload_bytes(&self) -> Result<Vec<u8>, ProtoError> {
        Ok(STANDARD.decode(&self.payload)?)
    }

    pub fn decode_payload_json(&self) -> Result<serde_json::Value, ProtoError> {
        let bytes = self.decode_payload_bytes()?;
        serde_json::from_slice(&bytes).map_err(|source| ProtoError::Payload {
            kind: self.kind.clone(),
            source,
        })
    }

    pub fn to_wire_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn from_wire_str(text: &str) -> Result<Self, ProtoError> {
        serde_json::from_str(text).map_err(ProtoError::Envelope)
    }
}

fn now_iso8601() -> String {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_wire_string() {
        let env = Envelope::new("ping", &serde_json::json!({}));
        let wire = env.to_wire_string();
        let back = Envelope::from_wire_str(&wire).unwrap();
        assert_eq!(back.kind, "ping");
        assert_eq!(back.payload, env.payload);
    }

    #[test]
    fn decodes_payload_json_round_trip() {
        let payload = serde_json::json!({"rows": 24, "cols": 80});
        let env = Envelope::new("terminalResize", &payload);
        let decoded = env.decode_payload_json().unwrap();
        assert_eq!(decoded, payload);
    }
}
