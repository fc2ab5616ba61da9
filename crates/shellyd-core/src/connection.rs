use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use rand::RngCore;
use shellyd_proto::{
    AuthChallengePayload, AuthResponsePayload, AuthResultPayload, Envelope, ErrorPayload,
    HelloPayload, Message, MessageKind, PairChallengePayload, PairRequestPayload,
    PairResponsePayload, PairVerifyPayload, SettingKey, SettingsConfirmPayload,
    SettingsSyncPayload, SettingsUpdatePayload, SudoConfirmRequestPayload,
    SudoConfirmResponsePayload, SudoPasswordPayload, TerminalInputPayload, TerminalOutputPayload,
    TerminalResizePayload,
};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audit::AuditSink;
use crate::config::{Config, ConfigStore};
use crate::keystore::KeyStore;
use crate::pairing::PairingController;
use crate::shell::{detect_sudo_prompt, ShellSession};
use crate::trust::TrustMaterial;

/// Connection lifecycle phase (spec.md 3, 4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AwaitingHello,
    AwaitingPairVerify,
    AwaitingAuthResponse,
    Open,
    Closing,
}

/// An inbound unit of work for a connection: either a decoded envelope or
/// a raw binary transport frame, which spec.md 6 treats as unwrapped
/// terminal input once a session is open.
pub enum Inbound {
    Envelope(Envelope),
    RawBinary(Vec<u8>),
}

/// Shared, process-wide collaborators a connection needs (spec.md 3, 5).
#[derive(Clone)]
pub struct ConnectionHandles {
    pub keystore: Arc<KeyStore>,
    pub pairing: Arc<PairingController>,
    pub audit: Arc<AuditSink>,
    pub trust: Arc<TrustMaterial>,
    pub config: Arc<Mutex<ConfigStore>>,
    pub shell_path: String,
    pub host_label: String,
}

struct PendingSudo {
    id: String,
    awaiting_password: bool,
}

enum Outcome {
    Continue,
    Close,
}

/// One connection's session-protocol state machine (spec.md 4.5). Owns its
/// shell session exclusively and drives it to completion.
pub struct Connection {
    handles: ConnectionHandles,
    outbound: mpsc::UnboundedSender<Message>,
    phase: Phase,
    session_id: String,
    client_label: String,
    pending_challenge: Option<Vec<u8>>,
    client_public_key: Option<Vec<u8>>,
    shell: Option<ShellSession>,
    shell_output: Option<mpsc::Receiver<Vec<u8>>>,
    pending_sudo: Option<PendingSudo>,
    last_command: Option<String>,
    suppress_audit_until_newline: bool,
}

impl Connection {
    pub fn new(handles: ConnectionHandles, outbound: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            handles,
            outbound,
            phase: Phase::AwaitingHello,
            session_id: Uuid::new_v4().to_string(),
            client_label: String::new(),
            pending_challenge: None,
            client_public_key: None,
            shell: None,
            shell_output: None,
            pending_sudo: None,
            last_command: None,
            suppress_audit_until_newline: false,
        }
    }

    /// Drives the connection to completion: dispatches inbound frames
    /// serially and marshals shell output back onto the single outbound
    /// channel (spec.md 4.5, 5).
    pub async fn run(mut self, mut inbound: mpsc::Receiver<Inbound>) {
        self.handles
            .audit
            .log_connection(&self.session_id, &self.client_label, "establish");

        loop {
            tokio::select! {
                frame = inbound.recv() => {
                    match frame {
                        Some(frame) => {
                            if matches!(self.handle_inbound(frame).await, Outcome::Close) {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                chunk = recv_shell_chunk(&mut self.shell_output) => {
                    match chunk {
                        Some(chunk) => self.handle_shell_chunk(chunk).await,
                        None if self.shell.is_some() || self.phase == Phase::Open => break,
                        None => {}
                    }
                }
            }
        }

        self.teardown_shell().await;
        self.handles
            .audit
            .log_connection(&self.session_id, &self.client_label, "terminate");
    }

    async fn handle_inbound(&mut self, frame: Inbound) -> Outcome {
        let message = match frame {
            Inbound::RawBinary(bytes) => {
                if self.phase != Phase::Open {
                    return Outcome::Continue;
                }
                return self.handle_terminal_input(bytes).await;
            }
            Inbound::Envelope(envelope) => match Message::from_envelope(&envelope) {
                Ok(message) => message,
                Err(_) if envelope.kind == "terminalInput" && self.phase == Phase::Open => {
                    match envelope.decode_payload_bytes() {
                        Ok(bytes) => return self.handle_terminal_input(bytes).await,
                        Err(_) => return self.send_error("bad-payload", "payload is not valid base64", true),
                    }
                }
                Err(_) => {
                    return self.send_error("unknown-type", "unrecognized message type", true);
                }
            },
        };

        match self.phase {
            Phase::AwaitingHello => self.handle_awaiting_hello(message).await,
            Phase::AwaitingPairVerify => self.handle_awaiting_pair_verify(message).await,
            Phase::AwaitingAuthResponse => self.handle_awaiting_auth_response(message).await,
            Phase::Open => self.handle_open(message).await,
            Phase::Closing => Outcome::Close,
        }
    }

    async fn handle_awaiting_hello(&mut self, message: Message) -> Outcome {
        match message {
            Message::PairRequest(PairRequestPayload { key, label }) => {
                self.client_label = label.clone();
                let key_bytes = match STANDARD.decode(&key.key) {
                    Ok(bytes) => bytes,
                    Err(_) => return self.send_error("bad-key", "key blob is not valid base64", false),
                };
                self.handles
                    .pairing
                    .generate(key.algorithm.as_str().to_string(), key_bytes, label)
                    .await;
                self.send(Message::PairChallenge(PairChallengePayload {
                    mac_name: self.handles.host_label.clone(),
                    message: "Enter the 6-digit code shown on the host".to_string(),
                }));
                self.phase = Phase::AwaitingPairVerify;
                Outcome::Continue
            }
            Message::Hello(HelloPayload {
                public_key,
                device_name,
                ..
            }) => {
                self.client_label = device_name;
                let key_bytes = match STANDARD.decode(&public_key.key) {
                    Ok(bytes) => bytes,
                    Err(_) => {
                        self.send(Message::AuthResult(AuthResultPayload {
                            success: false,
                            session_token: None,
                        }));
                        return Outcome::Close;
                    }
                };

                let authorized = self
                    .handles
                    .keystore
                    .is_authorized(public_key.algorithm, &key_bytes)
                    .unwrap_or(false);

                if !authorized {
                    self.send(Message::AuthResult(AuthResultPayload {
                        success: false,
                        session_token: None,
                    }));
                    return Outcome::Close;
                }

                let mut challenge = vec![0u8; 32];
                rand::thread_rng().fill_bytes(&mut challenge);
                self.pending_challenge = Some(challenge.clone());
                self.client_public_key = Some(key_bytes);

                self.send(Message::AuthChallenge(AuthChallengePayload {
                    challenge: STANDARD.encode(challenge),
                    server_version: env!("CARGO_PKG_VERSION").to_string(),
                    server_public_key: None,
                }));
                self.phase = Phase::AwaitingAuthResponse;
                Outcome::Continue
            }
            other => self.wrong_phase(other.kind()),
        }
    }

    async fn handle_awaiting_pair_verify(&mut self, message: Message) -> Outcome {
        match message {
            Message::PairVerify(PairVerifyPayload { code }) => {
                match self.handles.pairing.verify(&code).await {
                    Some(attempt) => {
                        let add_result = self.handles.keystore.add_from_wire(
                            &attempt.proposed_key_algorithm_tag,
                            &STANDARD.encode(&attempt.proposed_key_bytes),
                            attempt.proposed_label,
                        );
                        self.handles.pairing.dismiss();

                        match add_result {
                            Ok(_) => {
                                self.send(Message::PairResponse(PairResponsePayload {
                                    success: true,
                                    certificate_fingerprint: Some(self.handles.trust.fingerprint.clone()),
                                    message: None,
                                }));
                            }
                            Err(err) => {
                                warn!("failed to persist paired key: {err}");
                                self.send(Message::PairResponse(PairResponsePayload {
                                    success: false,
                                    certificate_fingerprint: None,
                                    message: Some(err.to_string()),
                                }));
                            }
                        }
                    }
                    None => {
                        self.send(Message::PairResponse(PairResponsePayload {
                            success: false,
                            certificate_fingerprint: None,
                            message: Some("invalid or expired code".to_string()),
                        }));
                    }
                }
                Outcome::Close
            }
            other => self.wrong_phase(other.kind()),
        }
    }

    async fn handle_awaiting_auth_response(&mut self, message: Message) -> Outcome {
        match message {
            Message::AuthResponse(AuthResponsePayload { signature }) => {
                let verified = self.verify_signature(&signature);
                if !verified {
                    self.send(Message::AuthResult(AuthResultPayload {
                        success: false,
                        session_token: None,
                    }));
                    return Outcome::Close;
                }

                self.send(Message::AuthResult(AuthResultPayload {
                    success: true,
                    session_token: Some(self.session_id.clone()),
                }));

                let config = self.handles.config.lock().await.load_or_default();
                let profile = config
                    .map(|c| c.security_profile())
                    .unwrap_or_else(|_| Config::default().security_profile());
                self.send(Message::SettingsSync(SettingsSyncPayload { profile }));

                match ShellSession::spawn(&self.handles.shell_path, 24, 80) {
                    Ok((session, rx)) => {
                        self.shell = Some(session);
                        self.shell_output = Some(rx);
                        self.phase = Phase::Open;
                        Outcome::Continue
                    }
                    Err(err) => {
                        warn!("failed to spawn shell: {err}");
                        self.send(Message::Error(ErrorPayload {
                            code: "shell-spawn-failed".to_string(),
                            message: err.to_string(),
                            recoverable: false,
                        }));
                        Outcome::Close
                    }
                }
            }
            other => self.wrong_phase(other.kind()),
        }
    }

    async fn handle_open(&mut self, message: Message) -> Outcome {
        match message {
            Message::TerminalInput(TerminalInputPayload { data }) => {
                match STANDARD.decode(&data) {
                    Ok(bytes) => self.handle_terminal_input(bytes).await,
                    Err(_) => self.send_error("bad-payload", "terminalInput data is not valid base64", true),
                }
            }
            Message::TerminalResize(TerminalResizePayload { rows, cols }) => {
                if let Some(shell) = &self.shell {
                    shell.resize(rows, cols);
                }
                Outcome::Continue
            }
            Message::SudoConfirmResponse(SudoConfirmResponsePayload { id, approved }) => {
                if let Some(pending) = &self.pending_sudo {
                    if pending.id != id {
                        return Outcome::Continue;
                    }
                }
                if approved {
                    if let Some(pending) = &mut self.pending_sudo {
                        pending.awaiting_password = true;
                    }
                } else {
                    if let Some(shell) = &mut self.shell {
                        let _ = shell.write_input(&[0x03]);
                    }
                    self.pending_sudo = None;
                }
                Outcome::Continue
            }
            Message::SudoPassword(SudoPasswordPayload { password }) => {
                let awaiting = self
                    .pending_sudo
                    .as_ref()
                    .map(|p| p.awaiting_password)
                    .unwrap_or(false);
                if awaiting {
                    if let Some(shell) = &mut self.shell {
                        let mut line = password;
                        line.push('\n');
                        let _ = shell.write_input(line.as_bytes());
                    }
                    self.suppress_audit_until_newline = true;
                    self.pending_sudo = None;
                }
                Outcome::Continue
            }
            Message::SettingsUpdate(SettingsUpdatePayload { setting, value }) => {
                self.handle_settings_update(setting, value).await;
                Outcome::Continue
            }
            Message::Ping => {
                self.send(Message::Pong);
                Outcome::Continue
            }
            Message::Disconnect => Outcome::Close,
            Message::RegisterPushToken(_) | Message::LongRunningCommand(_) | Message::CommandComplete(_) => {
                debug!("acknowledging notification-style message without a reply");
                Outcome::Continue
            }
            other => {
                info!("rejected {:?} in open phase", other.kind());
                self.send_error("out-of-phase", "unexpected message type in open phase", true)
            }
        }
    }

    async fn handle_terminal_input(&mut self, bytes: Vec<u8>) -> Outcome {
        let committed = match &mut self.shell {
            Some(shell) => shell.write_input(&bytes).ok().flatten(),
            None => None,
        };
        if let Some(command) = committed {
            self.handles
                .audit
                .log_command(&self.session_id, &self.client_label, &command);
            self.last_command = Some(command);
        }
        Outcome::Continue
    }

    async fn handle_shell_chunk(&mut self, chunk: Vec<u8>) {
        self.send(Message::TerminalOutput(TerminalOutputPayload {
            data: STANDARD.encode(&chunk),
        }));

        self.audit_shell_chunk(&chunk);

        if self.pending_sudo.is_none() && detect_sudo_prompt(&chunk) {
            let id = Uuid::new_v4().to_string();
            let command = self.last_command.clone().unwrap_or_default();
            self.pending_sudo = Some(PendingSudo {
                id: id.clone(),
                awaiting_password: false,
            });
            self.send(Message::SudoConfirmRequest(SudoConfirmRequestPayload { id, command }));
        }
    }

    /// spec.md 4.5: output within one line of a sudoPassword write is never
    /// handed to the audit sink. The shell may deliver that line's output
    /// split across more than one PTY read, so suppression is a watermark
    /// that persists until a line boundary is actually seen, not a flag
    /// that clears after exactly one chunk.
    fn audit_shell_chunk(&mut self, chunk: &[u8]) {
        if !self.suppress_audit_until_newline {
            self.handles
                .audit
                .log_output(&self.session_id, &self.client_label, chunk);
            return;
        }

        if let Some(newline) = chunk.iter().position(|&b| b == b'\n') {
            self.suppress_audit_until_newline = false;
            let remainder = &chunk[newline + 1..];
            if !remainder.is_empty() {
                self.handles
                    .audit
                    .log_output(&self.session_id, &self.client_label, remainder);
            }
        }
    }

    async fn handle_settings_update(&mut self, setting: String, value: shellyd_proto::SettingsValue) {
        let Some(key) = SettingKey::from_wire_name(&setting) else {
            self.send(Message::SettingsConfirm(SettingsConfirmPayload {
                setting,
                success: false,
                reconnect_required: false,
                message: Some("unknown setting".to_string()),
            }));
            return;
        };

        let store = self.handles.config.lock().await;
        let mut config = match store.load_or_default() {
            Ok(config) => config,
            Err(err) => {
                self.send(Message::SettingsConfirm(SettingsConfirmPayload {
                    setting,
                    success: false,
                    reconnect_required: false,
                    message: Some(err.to_string()),
                }));
                return;
            }
        };

        let applied = config.apply_setting(key, &value);
        if applied {
            if let Err(err) = store.save(&config) {
                warn!("failed to persist settings update: {err}");
            }
        }

        self.send(Message::SettingsConfirm(SettingsConfirmPayload {
            setting,
            success: applied,
            reconnect_required: applied && key.requires_reconnect(),
            message: None,
        }));
    }

    fn verify_signature(&self, signature_b64: &str) -> bool {
        let (Some(challenge), Some(key_bytes)) = (&self.pending_challenge, &self.client_public_key) else {
            return false;
        };
        let Ok(signature_bytes) = STANDARD.decode(signature_b64) else {
            return false;
        };
        let Ok(signature) = Signature::try_from(signature_bytes.as_slice()) else {
            return false;
        };
        let Ok(key_array) = <[u8; 32]>::try_from(key_bytes.as_slice()) else {
            return false;
        };
        let Ok(verifying_key) = VerifyingKey::from_bytes(&key_array) else {
            return false;
        };
        verifying_key.verify(challenge, &signature).is_ok()
    }

    fn wrong_phase(&mut self, kind: MessageKind) -> Outcome {
        let recoverable = self.phase == Phase::Open;
        self.send(Message::Error(ErrorPayload {
            code: "wrong-phase".to_string(),
            message: format!("{:?} is not valid in the current phase", kind),
            recoverable,
        }));
        if recoverable {
            Outcome::Continue
        } else {
            Outcome::Close
        }
    }

    fn send_error(&mut self, code: &str, message: &str, recoverable: bool) -> Outcome {
        self.send(Message::Error(ErrorPayload {
            code: code.to_string(),
            message: message.to_string(),
            recoverable,
        }));
        if recoverable {
            Outcome::Continue
        } else {
            Outcome::Close
        }
    }

    fn send(&self, message: Message) {
        let _ = self.outbound.send(message);
    }

    async fn teardown_shell(&mut self) {
        self.phase = Phase::Closing;
        if let Some(shell) = self.shell.take() {
            shell.shutdown().await;
        }
        self.shell_output = None;
    }
}

async fn recv_shell_chunk(rx: &mut Option<mpsc::Receiver<Vec<u8>>>) -> Option<Vec<u8>> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{SigningKey, Signer};
    use shellyd_proto::{KeyAlgorithm, PublicKeyMaterial};
    use std::time::Duration;
    use tokio::time::timeout;

    const RECV_TIMEOUT: Duration = Duration::from_secs(5);

    fn test_signing_key() -> SigningKey {
        SigningKey::from_bytes(&[7u8; 32])
    }

    fn fixture() -> (ConnectionHandles, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let keystore = Arc::new(KeyStore::new(dir.path().join("authorized_keys")));
        keystore.ensure_exists().unwrap();
        let pairing = Arc::new(PairingController::new(
            Arc::new(crate::discovery::LoggingPairingDisplay),
            None,
        ));
        let audit = Arc::new(AuditSink::start(dir.path().join("audit.log"), 30));
        let cert_path = dir.path().join("server.crt");
        let key_path = dir.path().join("server.key");
        let trust = Arc::new(TrustMaterial::ensure(&cert_path, &key_path).unwrap());
        let config_store = ConfigStore::new(dir.path().join("config.json"));

        let handles = ConnectionHandles {
            keystore,
            pairing,
            audit,
            trust,
            config: Arc::new(Mutex::new(config_store)),
            shell_path: "/bin/sh".to_string(),
            host_label: "test-host".to_string(),
        };
        (handles, dir)
    }

    async fn recv(outbound: &mut mpsc::UnboundedReceiver<Message>) -> Message {
        timeout(RECV_TIMEOUT, outbound.recv())
            .await
            .expect("timed out waiting for a message")
            .expect("outbound channel closed unexpectedly")
    }

    #[tokio::test]
    async fn unauthorized_key_is_rejected_and_closes() {
        let (handles, _dir) = fixture();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::channel(8);

        let connection = Connection::new(handles, outbound_tx);
        let run = tokio::spawn(connection.run(inbound_rx));

        let key = test_signing_key();
        let hello = Message::Hello(HelloPayload {
            public_key: PublicKeyMaterial {
                algorithm: KeyAlgorithm::Ed25519,
                key: STANDARD.encode(key.verifying_key().to_bytes()),
            },
            device_name: "Phone A".to_string(),
            client_version: None,
        });
        inbound_tx.send(Inbound::Envelope(hello.to_envelope())).await.unwrap();

        match recv(&mut outbound_rx).await {
            Message::AuthResult(result) => assert!(!result.success),
            other => panic!("expected authResult, got {other:?}"),
        }

        drop(inbound_tx);
        timeout(RECV_TIMEOUT, run).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn authorized_key_reaches_open_phase_and_receives_settings_sync() {
        let (handles, _dir) = fixture();
        let key = test_signing_key();
        handles
            .keystore
            .add(KeyAlgorithm::Ed25519, key.verifying_key().to_bytes().to_vec(), "Phone A".to_string())
            .unwrap();

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::channel(8);

        let connection = Connection::new(handles, outbound_tx);
        let run = tokio::spawn(connection.run(inbound_rx));

        let hello = Message::Hello(HelloPayload {
            public_key: PublicKeyMaterial {
                algorithm: KeyAlgorithm::Ed25519,
                key: STANDARD.encode(key.verifying_key().to_bytes()),
            },
            device_name: "Phone A".to_string(),
            client_version: None,
        });
        inbound_tx.send(Inbound::Envelope(hello.to_envelope())).await.unwrap();

        let challenge = match recv(&mut outbound_rx).await {
            Message::AuthChallenge(payload) => STANDARD.decode(payload.challenge).unwrap(),
            other => panic!("expected authChallenge, got {other:?}"),
        };

        let signature = key.sign(&challenge);
        let auth_response = Message::AuthResponse(AuthResponsePayload {
            signature: STANDARD.encode(signature.to_bytes()),
        });
        inbound_tx
            .send(Inbound::Envelope(auth_response.to_envelope()))
            .await
            .unwrap();

        match recv(&mut outbound_rx).await {
            Message::AuthResult(result) => assert!(result.success),
            other => panic!("expected authResult, got {other:?}"),
        }

        // settingsSync must be the very next server-initiated frame
        // (spec.md 5's ordering guarantee).
        match recv(&mut outbound_rx).await {
            Message::SettingsSync(_) => {}
            other => panic!("expected settingsSync immediately after authResult, got {other:?}"),
        }

        inbound_tx.send(Inbound::Envelope(Message::Disconnect.to_envelope())).await.unwrap();
        drop(inbound_tx);
        timeout(RECV_TIMEOUT, run).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn pair_verify_with_wrong_code_fails_and_closes() {
        let (handles, _dir) = fixture();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::channel(8);

        let connection = Connection::new(handles, outbound_tx);
        let run = tokio::spawn(connection.run(inbound_rx));

        let key = test_signing_key();
        let pair_request = Message::PairRequest(PairRequestPayload {
            key: PublicKeyMaterial {
                algorithm: KeyAlgorithm::Ed25519,
                key: STANDARD.encode(key.verifying_key().to_bytes()),
            },
            label: "Phone A".to_string(),
        });
        inbound_tx
            .send(Inbound::Envelope(pair_request.to_envelope()))
            .await
            .unwrap();

        match recv(&mut outbound_rx).await {
            Message::PairChallenge(_) => {}
            other => panic!("expected pairChallenge, got {other:?}"),
        }

        let pair_verify = Message::PairVerify(PairVerifyPayload {
            code: "000000".to_string(),
        });
        inbound_tx
            .send(Inbound::Envelope(pair_verify.to_envelope()))
            .await
            .unwrap();

        match recv(&mut outbound_rx).await {
            Message::PairResponse(response) => assert!(!response.success),
            other => panic!("expected pairResponse, got {other:?}"),
        }

        drop(inbound_tx);
        timeout(RECV_TIMEOUT, run).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn sudo_password_suppression_survives_a_split_line() {
        let (handles, dir) = fixture();
        let audit_log_path = dir.path().join("audit.log");
        let (outbound_tx, _outbound_rx) = mpsc::unbounded_channel();

        let mut connection = Connection::new(handles, outbound_tx);
        connection.session_id = "sess-split".to_string();
        connection.client_label = "Phone A".to_string();
        connection.suppress_audit_until_newline = true;

        // The shell delivers the echoed newline and the retry banner across
        // three separate PTY reads before the line is actually terminated.
        connection.audit_shell_chunk(b"hunter2");
        connection.audit_shell_chunk(b"\r\nSorry, try");
        connection.audit_shell_chunk(b" again.\n[sudo] password for dev: ");

        assert!(!connection.suppress_audit_until_newline);

        tokio::time::sleep(Duration::from_millis(50)).await;

        let contents = std::fs::read_to_string(&audit_log_path).unwrap();
        assert!(!contents.contains("hunter2"));
        // Everything after the line boundary is still audited normally.
        assert!(contents.contains("[sudo] password for dev"));
    }
}
