use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use shellyd_core::{Connection, ConnectionHandles, Inbound};
use shellyd_proto::Envelope;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use crate::error::ListenerError;

/// Endpoint binding parameters for one port (spec.md 4.6).
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub host: String,
    pub port: u16,
}

/// Drives the plain endpoint, and the TLS endpoint when present, until
/// `shutdown` fires. TLS bind failure is logged and never prevents the
/// plain endpoint from serving (spec.md 4.6).
pub async fn serve(
    plain: EndpointConfig,
    tls: Option<(EndpointConfig, Arc<rustls::ServerConfig>)>,
    handles: Arc<ConnectionHandles>,
    max_connections: usize,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), ListenerError> {
    let semaphore = Arc::new(Semaphore::new(max_connections));

    let plain_listener = TcpListener::bind((plain.host.as_str(), plain.port))
        .await
        .map_err(|source| ListenerError::Bind {
            host: plain.host.clone(),
            port: plain.port,
            source,
        })?;
    info!(host = %plain.host, port = plain.port, "listening (plain)");

    let tls_listener = match tls {
        Some((endpoint, config)) => match TcpListener::bind((endpoint.host.as_str(), endpoint.port)).await {
            Ok(listener) => {
                info!(host = %endpoint.host, port = endpoint.port, "listening (tls)");
                Some((listener, TlsAcceptor::from(config)))
            }
            Err(err) => {
                warn!("failed to bind TLS endpoint {}:{}: {err}", endpoint.host, endpoint.port);
                None
            }
        },
        None => None,
    };

    let mut plain_shutdown = shutdown.clone();
    let plain_handles = handles.clone();
    let plain_semaphore = semaphore.clone();
    let plain_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                accepted = plain_listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            debug!(%peer, "accepted plain connection");
                            let handles = plain_handles.clone();
                            let semaphore = plain_semaphore.clone();
                            tokio::spawn(async move { handle_stream(stream, handles, semaphore).await });
                        }
                        Err(err) => warn!("plain accept failed: {err}"),
                    }
                }
                _ = plain_shutdown.changed() => {
                    if *plain_shutdown.borrow() { break; }
                }
            }
        }
    });

    let tls_task = tls_listener.map(|(listener, acceptor)| {
        let handles = handles.clone();
        let semaphore = semaphore.clone();
        let mut shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, peer)) => {
                                debug!(%peer, "accepted tls connection");
                                let acceptor = acceptor.clone();
                                let handles = handles.clone();
                                let semaphore = semaphore.clone();
                                tokio::spawn(async move {
                                    match acceptor.accept(stream).await {
                                        Ok(tls_stream) => handle_stream(tls_stream, handles, semaphore).await,
                                        Err(err) => warn!("tls handshake failed: {err}"),
                                    }
                                });
                            }
                            Err(err) => warn!("tls accept failed: {err}"),
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() { break; }
                    }
                }
            }
        })
    });

    let _ = shutdown.changed().await;
    let _ = plain_task.await;
    if let Some(task) = tls_task {
        let _ = task.await;
    }
    Ok(())
}

/// Completes the websocket upgrade over an already-established byte
/// stream (plain or post-TLS-handshake) and bridges framed messages to a
/// fresh connection state machine (spec.md 4.5, 4.6).
async fn handle_stream<S>(stream: S, handles: Arc<ConnectionHandles>, semaphore: Arc<Semaphore>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let has_capacity = semaphore.available_permits() > 0;
    let callback = move |_req: &Request, response: Response| {
        if has_capacity {
            Ok(response)
        } else {
            Err(reject_over_capacity())
        }
    };

    let ws = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(err) => {
            debug!("websocket handshake rejected or failed: {err}");
            return;
        }
    };

    let Ok(permit) = semaphore.try_acquire_owned() else {
        debug!("dropping accepted connection: capacity exhausted between check and acquire");
        return;
    };

    let (mut sink, mut stream) = ws.split();
    let (inbound_tx, inbound_rx) = mpsc::channel(64);
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();

    let reader = tokio::spawn(async move {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(WsMessage::Text(text)) => match Envelope::from_wire_str(&text) {
                    Ok(envelope) => {
                        if inbound_tx.send(Inbound::Envelope(envelope)).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => warn!("dropping malformed frame: {err}"),
                },
                Ok(WsMessage::Binary(bytes)) => {
                    if inbound_tx.send(Inbound::RawBinary(bytes)).await.is_err() {
                        break;
                    }
                }
                Ok(WsMessage::Close(_)) => break,
                Ok(_) => {}
                Err(err) => {
                    debug!("websocket read error: {err}");
                    break;
                }
            }
        }
    });

    let writer = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let envelope = message.to_envelope();
            if sink.send(WsMessage::Text(envelope.to_wire_string())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let connection = Connection::new((*handles).clone(), outbound_tx);
    connection.run(inbound_rx).await;

    reader.abort();
    let _ = writer.await;
    drop(permit);
}

fn reject_over_capacity() -> ErrorResponse {
    http::Response::builder()
        .status(503)
        .body(Some("max connections reached".to_string()))
        .unwrap_or_else(|_| http::Response::new(None))
}

#[cfg(test)]
mod tests {
    use super::*;
    use shellyd_core::{AuditSink, ConfigStore, KeyStore, LoggingPairingDisplay, PairingController, TrustMaterial};
    use shellyd_proto::Message;
    use std::time::Duration;
    use tokio::sync::Mutex;
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;

    const RECV_TIMEOUT: Duration = Duration::from_secs(5);

    fn fixture_handles() -> (Arc<ConnectionHandles>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let keystore = Arc::new(KeyStore::new(dir.path().join("authorized_keys")));
        keystore.ensure_exists().unwrap();
        let pairing = Arc::new(PairingController::new(Arc::new(LoggingPairingDisplay), None));
        let audit = Arc::new(AuditSink::start(dir.path().join("audit.log"), 30));
        let trust = Arc::new(
            TrustMaterial::ensure(&dir.path().join("server.crt"), &dir.path().join("server.key")).unwrap(),
        );
        let config_store = ConfigStore::new(dir.path().join("config.json"));

        let handles = Arc::new(ConnectionHandles {
            keystore,
            pairing,
            audit,
            trust,
            config: Arc::new(Mutex::new(config_store)),
            shell_path: "/bin/sh".to_string(),
            host_label: "test-host".to_string(),
        });
        (handles, dir)
    }

    #[tokio::test]
    async fn handshake_succeeds_and_bridges_an_unauthorized_hello() {
        let (handles, _dir) = fixture_handles();
        let semaphore = Arc::new(Semaphore::new(4));

        let (server_stream, client_stream) = tokio::io::duplex(8192);
        let server = tokio::spawn(handle_stream(server_stream, handles, semaphore));

        let request = "ws://localhost/".into_client_request().unwrap();
        let (mut ws, _response) = tokio_tungstenite::client_async(request, client_stream)
            .await
            .expect("client handshake should succeed when capacity is available");

        let hello = Message::Hello(shellyd_proto::HelloPayload {
            public_key: shellyd_proto::PublicKeyMaterial {
                algorithm: shellyd_proto::KeyAlgorithm::Ed25519,
                key: "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=".to_string(),
            },
            device_name: "Phone A".to_string(),
            client_version: None,
        });
        ws.send(WsMessage::Text(hello.to_envelope().to_wire_string()))
            .await
            .unwrap();

        let reply = tokio::time::timeout(RECV_TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for a reply")
            .expect("stream ended without a reply")
            .expect("websocket read error");
        let text = reply.into_text().expect("expected a text frame");
        let envelope = Envelope::from_wire_str(&text).unwrap();
        let message = Message::from_envelope(&envelope).unwrap();
        match message {
            Message::AuthResult(result) => assert!(!result.success),
            other => panic!("expected authResult, got {other:?}"),
        }

        let _ = ws.close(None).await;
        let _ = tokio::time::timeout(RECV_TIMEOUT, server).await;
    }

    #[tokio::test]
    async fn handshake_is_rejected_with_503_when_capacity_is_exhausted() {
        let (handles, _dir) = fixture_handles();
        let semaphore = Arc::new(Semaphore::new(1));
        let _held_permit = semaphore.clone().try_acquire_owned().unwrap();

        let (server_stream, client_stream) = tokio::io::duplex(8192);
        let server = tokio::spawn(handle_stream(server_stream, handles, semaphore));

        let request = "ws://localhost/".into_client_request().unwrap();
        let result = tokio_tungstenite::client_async(request, client_stream).await;
        assert!(result.is_err(), "expected the upgrade to be rejected over capacity");

        let _ = tokio::time::timeout(RECV_TIMEOUT, server).await;
    }
}
