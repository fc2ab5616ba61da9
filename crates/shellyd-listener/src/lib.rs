#![forbid(unsafe_code)]
//! Dual-port TCP listener, TLS setup and websocket framing for the shelly
//! remote terminal daemon. `shellyd-core` owns the connection state machine;
//! this crate owns sockets, the TLS handshake, and bridging websocket frames
//! into [`shellyd_core::Inbound`] values.

mod error;
mod server;
mod tls;

pub use error::ListenerError;
pub use server::{serve, EndpointConfig};
pub use tls::build_server_config;
