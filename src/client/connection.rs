//! Connecting to the server
//!
//! [`ServerConnection::connect`] performs the whole client-side bring-up:
//! TCP, the TLS handshake with hostname verification, then the HELLO
//! exchange. A NAK from the server surfaces its `error` string verbatim so
//! the UI can show it.

use std::path::PathBuf;
use std::sync::Arc;

use rustls::pki_types::ServerName;
use tokio::net::TcpStream;
use tracing::{error, info, warn};

use crate::config::ClientConfig;
use crate::error::{ChatError, Result};
use crate::protocol::messages::{create_hello, message_value_or, MessageType};
use crate::transport::{tls, Connection, HANDSHAKE_TIMEOUT_MS};

/// The secure stream type for the client side.
pub type ClientStream = tokio_rustls::client::TlsStream<TcpStream>;

/// Fallback error string when the server gives no reason.
const CONNECT_FAILED: &str = "Unable to connect to server.";

/// An established, handshaken connection to the chat server.
pub struct ServerConnection {
    host_name: String,
    user_name: String,
    /// The framed connection and its two queues.
    pub connection: Arc<Connection<ClientStream>>,
}

impl ServerConnection {
    /// Connect to the configured server and perform the HELLO handshake
    /// claiming `user_name`.
    pub async fn connect(config: &ClientConfig, user_name: &str) -> Result<Self> {
        let custom: Vec<PathBuf> = config
            .custom_certificates
            .iter()
            .map(PathBuf::from)
            .collect();
        let connector = tls::client_connector(&custom)?;

        info!("Connecting to {}:{} ...", config.host_name, config.host_port);
        let tcp = TcpStream::connect((config.host_name.as_str(), config.host_port))
            .await
            .map_err(|e| {
                ChatError::transport(format!(
                    "cannot reach {}:{}: {}",
                    config.host_name, config.host_port, e
                ))
            })?;
        let server_name = ServerName::try_from(config.host_name.clone())
            .map_err(|e| ChatError::config(format!("invalid host name: {}", e)))?;
        let stream = connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| ChatError::transport(format!("TLS handshake failed: {}", e)))?;

        let connection = Arc::new(Connection::new(stream));
        connection.send_message(&create_hello(user_name)).await?;

        match connection.wait_for_ack_or_nak(HANDSHAKE_TIMEOUT_MS).await? {
            Some(reply) if reply.message_type == MessageType::Nak => {
                let reason = message_value_or(&reply, "error", String::new());
                warn!("Server denied request to connect: {}", reason);
                connection.shutdown().await;
                Err(ChatError::transport(if reason.is_empty() {
                    CONNECT_FAILED.to_string()
                } else {
                    reason
                }))
            }
            Some(_ack) => {
                info!("Connected.");
                Ok(Self {
                    host_name: config.host_name.clone(),
                    user_name: user_name.to_owned(),
                    connection,
                })
            }
            None => {
                error!("Server did not acknowledge HELLO.");
                connection.shutdown().await;
                Err(ChatError::timeout(CONNECT_FAILED))
            }
        }
    }

    /// The server host name this connection was made to.
    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    /// The user name claimed during the handshake.
    pub fn user_name(&self) -> &str {
        &self.user_name
    }
}
