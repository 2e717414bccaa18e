//! Per-client worker task
//!
//! One of these runs for every accepted client. It validates the HELLO
//! handshake, then pumps frames between the socket and the session's queues
//! until the connection ends. Everything it queues inbound is picked up by
//! the scheduler on its next tick.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::pace_loop;
use crate::protocol::codec::unpack_messages;
use crate::protocol::messages::{create_ack, message_value_or, MessageType};
use crate::server::connection_manager::ClientSession;
use crate::transport::{HANDSHAKE_TIMEOUT_MS, TARGET_CLIENT_LOOP_MS};

/// Handle sending and receiving messages for one connected client.
pub async fn client_worker<S>(client: Arc<ClientSession<S>>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    if let Err(e) = run(&client).await {
        error!("Client worker exited with error: {}", e);
    }
    client.connection.shutdown().await;
    info!("Client worker exiting.");
}

async fn run<S>(client: &ClientSession<S>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // Expect the client to send HELLO as the first message
    let Some(hello) = client
        .connection
        .wait_for(MessageType::Hello, HANDSHAKE_TIMEOUT_MS)
        .await?
    else {
        info!("No HELLO sent by client, disconnecting.");
        return Ok(());
    };
    let user_name = message_value_or(&hello, "user_name", String::new());
    if user_name.is_empty() {
        warn!("Client sent HELLO without a user name, disconnecting.");
        return Ok(());
    }
    info!("Client connected: {}", user_name);
    client.set_user_name(user_name);
    client.connection.send_message(&create_ack()).await?;

    // Serialize messages back and forth from the client
    while client.connection.is_connected() {
        let loop_start = Instant::now();
        let mut pending_acks = Vec::new();

        // 1. Read waiting messages on the socket
        if let Some(block) = client.connection.receive_message().await? {
            debug!("Received message block: {} bytes", block.payload_size);
            for message in unpack_messages(&block)? {
                debug!("Received message: {:#06x}", message.message_type as u32);
                match message.message_type {
                    // a HEARTBEAT can be answered immediately
                    MessageType::Heartbeat => pending_acks.push(create_ack()),
                    // outside of the handshake, ACK/NAK carry no information
                    MessageType::Ack | MessageType::Nak => {}
                    MessageType::Invalid => {
                        debug_assert!(false, "received INVALID message type");
                        warn!("Received INVALID message type, dropping.");
                    }
                    // anything else is for the scheduler
                    _ => client.connection.messages_in.push(message),
                }
            }
        }

        // 2. Send queued messages to the socket in one frame
        let mut send_messages = client.connection.messages_out.drain();
        send_messages.append(&mut pending_acks);
        client.connection.send_messages(&send_messages).await?;

        // 3. Sleep
        pace_loop(
            loop_start,
            Duration::from_millis(TARGET_CLIENT_LOOP_MS),
            "Client worker",
        )
        .await;
    }
    Ok(())
}
