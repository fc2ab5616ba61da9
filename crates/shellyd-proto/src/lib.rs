#![forbid(unsafe_code)]
//! Wire types for the shelly remote terminal protocol.
//!
//! The transport (`shellyd-listener`) and the connection state machine
//! (`shellyd-core`) both depend on this crate and nothing else: no tokio,
//! no sockets, no TLS. Every inbound byte string becomes an [`Envelope`],
//! every envelope decodes (or fails to decode) into a [`Message`], and
//! every outbound [`Message`] re-encodes into an `Envelope` ready to frame.

mod envelope;
mod error;
mod message;
mod settings;

pub use envelope::Envelope;
pub use error::ProtoError;
pub use message::{
    AuthChallengePayload, AuthResponsePayload, AuthResultPayload, CommandCompletePayload,
    ErrorPayload, HelloPayload, KeyAlgorithm, LongRunningCommandPayload, Message, MessageKind,
    PairChallengePayload, PairRequestPayload, PairResponsePayload, PairVerifyPayload,
    PublicKeyMaterial, RegisterPushTokenPayload, SecurityProfileWire, SettingsConfirmPayload,
    SettingsSyncPayload, SettingsUpdatePayload, SudoConfirmRequestPayload,
    SudoConfirmResponsePayload, SudoPasswordPayload, TerminalInputPayload, TerminalOutputPayload,
    TerminalResizePayload,
};
pub use settings::{SettingKey, SettingsValue};
