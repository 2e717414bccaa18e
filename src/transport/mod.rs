//! Secure transport: TLS setup and the framed connection

pub mod connection;
pub mod tls;

pub use connection::{
    Connection, HANDSHAKE_TIMEOUT_MS, MTU_BUFFER, SSL_RETRY_MS, TARGET_CLIENT_LOOP_MS,
};
