use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::envelope::Envelope;
use crate::error::ProtoError;
use crate::settings::SettingsValue;

/// The `type` taxonomy from spec §6, exhaustively matched everywhere a
/// message is dispatched (spec.md 9: "tagged variants over inheritance").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Hello,
    AuthChallenge,
    AuthResponse,
    AuthResult,
    Disconnect,
    PairRequest,
    PairChallenge,
    PairVerify,
    PairResponse,
    TerminalOutput,
    TerminalInput,
    TerminalResize,
    SudoPrompt,
    SudoConfirmRequest,
    SudoConfirmResponse,
    SudoPassword,
    RegisterPushToken,
    LongRunningCommand,
    CommandComplete,
    SettingsSync,
    SettingsUpdate,
    SettingsConfirm,
    Ping,
    Pong,
    Error,
}

impl MessageKind {
    pub fn wire_name(self) -> &'static str {
        match self {
            MessageKind::Hello => "hello",
            MessageKind::AuthChallenge => "authChallenge",
            MessageKind::AuthResponse => "authResponse",
            MessageKind::AuthResult => "authResult",
            MessageKind::Disconnect => "disconnect",
            MessageKind::PairRequest => "pairRequest",
            MessageKind::PairChallenge => "pairChallenge",
            MessageKind::PairVerify => "pairVerify",
            MessageKind::PairResponse => "pairResponse",
            MessageKind::TerminalOutput => "terminalOutput",
            MessageKind::TerminalInput => "terminalInput",
            MessageKind::TerminalResize => "terminalResize",
            MessageKind::SudoPrompt => "sudoPrompt",
            MessageKind::SudoConfirmRequest => "sudoConfirmRequest",
            MessageKind::SudoConfirmResponse => "sudoConfirmResponse",
            MessageKind::SudoPassword => "sudoPassword",
            MessageKind::RegisterPushToken => "registerPushToken",
            MessageKind::LongRunningCommand => "longRunningCommand",
            MessageKind::CommandComplete => "commandComplete",
            MessageKind::SettingsSync => "settingsSync",
            MessageKind::SettingsUpdate => "settingsUpdate",
            MessageKind::SettingsConfirm => "settingsConfirm",
            MessageKind::Ping => "ping",
            MessageKind::Pong => "pong",
            MessageKind::Error => "error",
        }
    }

    pub fn from_wire_name(name: &str) -> Option<Self> {
        Some(match name {
            "hello" => MessageKind::Hello,
            "authChallenge" => MessageKind::AuthChallenge,
            "authResponse" => MessageKind::AuthResponse,
            "authResult" => MessageKind::AuthResult,
            "disconnect" => MessageKind::Disconnect,
            "pairRequest" => MessageKind::PairRequest,
            "pairChallenge" => MessageKind::PairChallenge,
            "pairVerify" => MessageKind::PairVerify,
            "pairResponse" => MessageKind::PairResponse,
            "terminalOutput" => MessageKind::TerminalOutput,
            "terminalInput" => MessageKind::TerminalInput,
            "terminalResize" => MessageKind::TerminalResize,
            "sudoPrompt" => MessageKind::SudoPrompt,
            "sudoConfirmRequest" => MessageKind::SudoConfirmRequest,
            "sudoConfirmResponse" => MessageKind::SudoConfirmResponse,
            "sudoPassword" => MessageKind::SudoPassword,
            "registerPushToken" => MessageKind::RegisterPushToken,
            "longRunningCommand" => MessageKind::LongRunningCommand,
            "commandComplete" => MessageKind::CommandComplete,
            "settingsSync" => MessageKind::SettingsSync,
            "settingsUpdate" => MessageKind::SettingsUpdate,
            "settingsConfirm" => MessageKind::SettingsConfirm,
            "ping" => MessageKind::Ping,
            "pong" => MessageKind::Pong,
            "error" => MessageKind::Error,
            _ => return None,
        })
    }
}

/// The Ed25519-only algorithm family spec.md 3 restricts authorized keys to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyAlgorithm {
    #[serde(rename = "ssh-ed25519")]
    Ed25519,
}

impl KeyAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            KeyAlgorithm::Ed25519 => "ssh-ed25519",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "ssh-ed25519" | "ed25519" => Some(KeyAlgorithm::Ed25519),
            _ => None,
        }
    }
}

/// A public key as it travels on the wire: algorithm tag plus base64 blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicKeyMaterial {
    pub algorithm: KeyAlgorithm,
    /// Base64-encoded raw key bytes (32 bytes for Ed25519).
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloPayload {
    pub public_key: PublicKeyMaterial,
    pub device_name: String,
    #[serde(default)]
    pub client_version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthChallengePayload {
    /// Base64-encoded random challenge bytes.
    pub challenge: String,
    pub server_version: String,
    #[serde(default)]
    pub server_public_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthResponsePayload {
    /// Base64-encoded Ed25519 signature over the stored challenge.
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResultPayload {
    pub success: bool,
    #[serde(default)]
    pub session_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairRequestPayload {
    pub key: PublicKeyMaterial,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairChallengePayload {
    #[serde(rename = "macName")]
    pub mac_name: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairVerifyPayload {
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairResponsePayload {
    pub success: bool,
    #[serde(default)]
    pub certificate_fingerprint: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminalOutputPayload {
    /// Base64-encoded raw bytes read from the shell master.
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminalInputPayload {
    /// Base64-encoded raw bytes to write to the shell master.
    pub data: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalResizePayload {
    pub rows: i32,
    pub cols: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SudoConfirmRequestPayload {
    pub id: String,
    pub command: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SudoConfirmResponsePayload {
    pub id: String,
    pub approved: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SudoPasswordPayload {
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterPushTokenPayload {
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LongRunningCommandPayload {
    pub command_id: String,
    pub command: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandCompletePayload {
    pub command_id: String,
    #[serde(default)]
    pub exit_code: Option<i32>,
}

/// The subset of the persisted security profile that is echoed to the
/// client on connect and after a successful `settingsUpdate`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityProfileWire {
    pub tls_enabled: bool,
    pub certificate_pinning_enabled: bool,
    pub session_timeout_enabled: bool,
    pub session_timeout_seconds: u32,
    pub audit_logging_enabled: bool,
    pub audit_log_retention_days: u32,
    pub max_connections: u32,
    pub push_notifications_enabled: bool,
    pub enable_sudo_interception: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsSyncPayload {
    pub profile: SecurityProfileWire,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsUpdatePayload {
    pub setting: String,
    pub value: SettingsValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsConfirmPayload {
    pub setting: String,
    pub success: bool,
    #[serde(default)]
    pub reconnect_required: bool,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
    pub recoverable: bool,
}

/// A decoded message: the typed counterpart of an [`Envelope`].
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Hello(HelloPayload),
    AuthChallenge(AuthChallengePayload),
    AuthResponse(AuthResponsePayload),
    AuthResult(AuthResultPayload),
    Disconnect,
    PairRequest(PairRequestPayload),
    PairChallenge(PairChallengePayload),
    PairVerify(PairVerifyPayload),
    PairResponse(PairResponsePayload),
    TerminalOutput(TerminalOutputPayload),
    TerminalInput(TerminalInputPayload),
    TerminalResize(TerminalResizePayload),
    SudoPrompt,
    SudoConfirmRequest(SudoConfirmRequestPayload),
    SudoConfirmResponse(SudoConfirmResponsePayload),
    SudoPassword(SudoPasswordPayload),
    RegisterPushToken(RegisterPushTokenPayload),
    LongRunningCommand(LongRunningCommandPayload),
    CommandComplete(CommandCompletePayload),
    SettingsSync(SettingsSyncPayload),
    SettingsUpdate(SettingsUpdatePayload),
    SettingsConfirm(SettingsConfirmPayload),
    Ping,
    Pong,
    Error(ErrorPayload),
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Hello(_) => MessageKind::Hello,
            Message::AuthChallenge(_) => MessageKind::AuthChallenge,
            Message::AuthResponse(_) => MessageKind::AuthResponse,
            Message::AuthResult(_) => MessageKind::AuthResult,
            Message::Disconnect => MessageKind::Disconnect,
            Message::PairRequest(_) => MessageKind::PairRequest,
            Message::PairChallenge(_) => MessageKind::PairChallenge,
            Message::PairVerify(_) => MessageKind::PairVerify,
            Message::PairResponse(_) => MessageKind::PairResponse,
            Message::TerminalOutput(_) => MessageKind::TerminalOutput,
            Message::TerminalInput(_) => MessageKind::TerminalInput,
            Message::TerminalResize(_) => MessageKind::TerminalResize,
            Message::SudoPrompt => MessageKind::SudoPrompt,
            Message::SudoConfirmRequest(_) => MessageKind::SudoConfirmRequest,
            Message::SudoConfirmResponse(_) => MessageKind::SudoConfirmResponse,
            Message::SudoPassword(_) => MessageKind::SudoPassword,
            Message::RegisterPushToken(_) => MessageKind::RegisterPushToken,
            Message::LongRunningCommand(_) => MessageKind::LongRunningCommand,
            Message::CommandComplete(_) => MessageKind::CommandComplete,
            Message::SettingsSync(_) => MessageKind::SettingsSync,
            Message::SettingsUpdate(_) => MessageKind::SettingsUpdate,
            Message::SettingsConfirm(_) => MessageKind::SettingsConfirm,
            Message::Ping => MessageKind::Ping,
            Message::Pong => MessageKind::Pong,
            Message::Error(_) => MessageKind::Error,
        }
    }

    pub fn to_envelope(&self) -> Envelope {
        let empty = Value::Object(Default::default());
        let value = match self {
            Message::Hello(p) => serde_json::to_value(p),
            Message::AuthChallenge(p) => serde_json::to_value(p),
            Message::AuthResponse(p) => serde_json::to_value(p),
            Message::AuthResult(p) => serde_json::to_value(p),
            Message::Disconnect => Ok(empty.clone()),
            Message::PairRequest(p) => serde_json::to_value(p),
            Message::PairChallenge(p) => serde_json::to_value(p),
            Message::PairVerify(p) => serde_json::to_value(p),
            Message::PairResponse(p) => serde_json::to_value(p),
            Message::TerminalOutput(p) => serde_json::to_value(p),
            Message::TerminalInput(p) => serde_json::to_value(p),
            Message::TerminalResize(p) => serde_json::to_value(p),
            Message::SudoPrompt => Ok(empty.clone()),
            Message::SudoConfirmRequest(p) => serde_json::to_value(p),
            Message::SudoConfirmResponse(p) => serde_json::to_value(p),
            Message::SudoPassword(p) => serde_json::to_value(p),
            Message::RegisterPushToken(p) => serde_json::to_value(p),
            Message::LongRunningCommand(p) => serde_json::to_value(p),
            Message::CommandComplete(p) => serde_json::to_value(p),
            Message::SettingsSync(p) => serde_json::to_value(p),
            Message::SettingsUpdate(p) => serde_json::to_value(p),
            Message::SettingsConfirm(p) => serde_json::to_value(p),
            Message::Ping => Ok(empty.clone()),
            Message::Pong => Ok(empty.clone()),
            Message::Error(p) => serde_json::to_value(p),
        }
        .unwrap_or(empty);
        Envelope::new(self.kind().wire_name(), &value)
    }

    pub fn from_envelope(envelope: &Envelope) -> Result<Self, ProtoError> {
        let kind = MessageKind::from_wire_name(&envelope.kind)
            .ok_or_else(|| ProtoError::UnknownType(envelope.kind.clone()))?;
        let value = envelope.decode_payload_json()?;
        decode_payload(kind, value)
    }
}

fn decode_payload(kind: MessageKind, value: Value) -> Result<Message, ProtoError> {
    macro_rules! parse {
        ($variant:ident) => {
            serde_json::from_value(value).map_err(|source| ProtoError::Payload {
                kind: kind.wire_name().to_string(),
                source,
            })
        };
    }

    Ok(match kind {
        MessageKind::Hello => Message::Hello(parse!(Hello)?),
        MessageKind::AuthChallenge => Message::AuthChallenge(parse!(AuthChallenge)?),
        MessageKind::AuthResponse => Message::AuthResponse(parse!(AuthResponse)?),
        MessageKind::AuthResult => Message::AuthResult(parse!(AuthResult)?),
        MessageKind::Disconnect => Message::Disconnect,
        MessageKind::PairRequest => Message::PairRequest(parse!(PairRequest)?),
        MessageKind::PairChallenge => Message::PairChallenge(parse!(PairChallenge)?),
        MessageKind::PairVerify => Message::PairVerify(parse!(PairVerify)?),
        MessageKind::PairResponse => Message::PairResponse(parse!(PairResponse)?),
        MessageKind::TerminalOutput => Message::TerminalOutput(parse!(TerminalOutput)?),
        MessageKind::TerminalInput => Message::TerminalInput(parse!(TerminalInput)?),
        MessageKind::TerminalResize => Message::TerminalResize(parse!(TerminalResize)?),
        MessageKind::SudoPrompt => Message::SudoPrompt,
        MessageKind::SudoConfirmRequest => Message::SudoConfirmRequest(parse!(SudoConfirmRequest)?),
        MessageKind::SudoConfirmResponse => {
            Message::SudoConfirmResponse(parse!(SudoConfirmResponse)?)
        }
        MessageKind::SudoPassword => Message::SudoPassword(parse!(SudoPassword)?),
        MessageKind::RegisterPushToken => Message::RegisterPushToken(parse!(RegisterPushToken)?),
        MessageKind::LongRunningCommand => {
            Message::LongRunningCommand(parse!(LongRunningCommand)?)
        }
        MessageKind::CommandComplete => Message::CommandComplete(parse!(CommandComplete)?),
        MessageKind::SettingsSync => Message::SettingsSync(parse!(SettingsSync)?),
        MessageKind::SettingsUpdate => Message::SettingsUpdate(parse!(SettingsUpdate)?),
        MessageKind::SettingsConfirm => Message::SettingsConfirm(parse!(SettingsConfirm)?),
        MessageKind::Ping => Message::Ping,
        MessageKind::Pong => Message::Pong,
        MessageKind::Error => Message::Error(parse!(Error)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_message_kind_through_an_envelope() {
        let key = PublicKeyMaterial {
            algorithm: KeyAlgorithm::Ed25519,
            key: "a2V5Ynl0ZXM=".to_string(),
        };
        let samples = vec![
            Message::Hello(HelloPayload {
                public_key: key.clone(),
                device_name: "Phone A".into(),
                client_version: Some("1.0".into()),
            }),
            Message::AuthChallenge(AuthChallengePayload {
                challenge: "Y2hhbGxlbmdl".into(),
                server_version: "1.0".into(),
                server_public_key: None,
            }),
            Message::AuthResponse(AuthResponsePayload {
                signature: "c2ln".into(),
            }),
            Message::AuthResult(AuthResultPayload {
                success: true,
                session_token: Some("tok".into()),
            }),
            Message::Disconnect,
            Message::PairRequest(PairRequestPayload {
                key: key.clone(),
                label: "Phone A".into(),
            }),
            Message::PairChallenge(PairChallengePayload {
                mac_name: "host".into(),
                message: "Enter the code".into(),
            }),
            Message::PairVerify(PairVerifyPayload {
                code: "482951".into(),
            }),
            Message::PairResponse(PairResponsePayload {
                success: true,
                certificate_fingerprint: Some("AA:BB".into()),
                message: None,
            }),
            Message::TerminalOutput(TerminalOutputPayload {
                data: "aGk=".into(),
            }),
            Message::TerminalInput(TerminalInputPayload {
                data: "ZWNobyBoaQo=".into(),
            }),
            Message::TerminalResize(TerminalResizePayload { rows: 24, cols: 80 }),
            Message::SudoPrompt,
            Message::SudoConfirmRequest(SudoConfirmRequestPayload {
                id: "r1".into(),
                command: "sudo ls".into(),
            }),
            Message::SudoConfirmResponse(SudoConfirmResponsePayload {
                id: "r1".into(),
                approved: true,
            }),
            Message::SudoPassword(SudoPasswordPayload {
                password: "hunter2".into(),
            }),
            Message::RegisterPushToken(RegisterPushTokenPayload { token: "tok".into() }),
            Message::LongRunningCommand(LongRunningCommandPayload {
                command_id: "c1".into(),
                command: "make".into(),
            }),
            Message::CommandComplete(CommandCompletePayload {
                command_id: "c1".into(),
                exit_code: Some(0),
            }),
            Message::SettingsSync(SettingsSyncPayload {
                profile: SecurityProfileWire {
                    tls_enabled: true,
                    certificate_pinning_enabled: true,
                    session_timeout_enabled: false,
                    session_timeout_seconds: 0,
                    audit_logging_enabled: true,
                    audit_log_retention_days: 30,
                    max_connections: 4,
                    push_notifications_enabled: false,
                    enable_sudo_interception: true,
                },
            }),
            Message::SettingsUpdate(SettingsUpdatePayload {
                setting: "tlsEnabled".into(),
                value: SettingsValue::Bool(true),
            }),
            Message::SettingsConfirm(SettingsConfirmPayload {
                setting: "tlsEnabled".into(),
                success: true,
                reconnect_required: true,
                message: None,
            }),
            Message::Ping,
            Message::Pong,
            Message::Error(ErrorPayload {
                code: "bad-type".into(),
                message: "nope".into(),
                recoverable: true,
            }),
        ];

        for message in samples {
            let envelope = message.to_envelope();
            assert_eq!(envelope.kind, message.kind().wire_name());
            let decoded = Message::from_envelope(&envelope).unwrap();
            assert_eq!(decoded, message);
        }
    }

    #[test]
    fn unknown_type_is_rejected_without_panicking() {
        let envelope = Envelope::new("notARealType", &serde_json::json!({}));
        let err = Message::from_envelope(&envelope).unwrap_err();
        assert!(matches!(err, ProtoError::UnknownType(_)));
    }

    #[test]
    fn malformed_payload_is_rejected() {
        let mut envelope = Envelope::new("terminalResize", &serde_json::json!({"rows": 1}));
        envelope.payload = base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            b"{not json",
        );
        assert!(Message::from_envelope(&envelope).is_err());
    }
}
