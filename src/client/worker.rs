//! Background connection worker for the client
//!
//! Runs while the chat window is open. Pumps frames between the socket and
//! the connection's queues, probes the server with a HEARTBEAT when nothing
//! has been heard for a while, and publishes `connection_ended` on exit so
//! the UI can react.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::pace_loop;
use crate::protocol::codec::unpack_messages;
use crate::protocol::messages::{create_ack, create_heartbeat, create_room_list, MessageType};
use crate::transport::{Connection, TARGET_CLIENT_LOOP_MS};

/// How long the server may stay silent before the worker probes it with a
/// HEARTBEAT. Another interval of silence after the probe ends the session.
pub const QUIET_TIMEOUT: Duration = Duration::from_secs(30);

/// Cross-thread flags coordinating the UI and the connection worker.
///
/// Each flag is a one-shot style binary signal; "take" operations consume
/// the set state so a signal fires exactly once per raise.
#[derive(Clone, Debug, Default)]
pub struct ConnectionSignals {
    shutdown_connection: Arc<AtomicBool>,
    connection_ended: Arc<AtomicBool>,
    waiting_on_server: Arc<AtomicBool>,
}

impl ConnectionSignals {
    /// Create a fresh set of signals.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the worker to cleanly shut the connection down (UI side).
    pub fn request_shutdown(&self) {
        self.shutdown_connection.store(true, Ordering::Release);
    }

    fn take_shutdown_request(&self) -> bool {
        self.shutdown_connection.swap(false, Ordering::AcqRel)
    }

    fn publish_connection_ended(&self) {
        self.connection_ended.store(true, Ordering::Release);
    }

    /// Check and consume the worker-exit notification (UI side).
    pub fn take_connection_ended(&self) -> bool {
        self.connection_ended.swap(false, Ordering::AcqRel)
    }

    fn set_waiting_on_server(&self, waiting: bool) {
        self.waiting_on_server.store(waiting, Ordering::Release);
    }

    /// Whether the worker is currently waiting on a heartbeat reply.
    pub fn is_waiting_on_server(&self) -> bool {
        self.waiting_on_server.load(Ordering::Acquire)
    }
}

/// Drive the connection to the server until it ends or shutdown is requested.
pub async fn server_message_worker<S>(server: Arc<Connection<S>>, signals: ConnectionSignals)
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    if let Err(e) = run(&server, &signals).await {
        error!("Connection worker exited with error: {}", e);
    }
    server.shutdown().await;
    info!("Connection worker exiting.");
    signals.publish_connection_ended();
}

async fn run<S>(server: &Connection<S>, signals: &ConnectionSignals) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut last_message_received = Instant::now();
    let mut heartbeat_sent: Option<Instant> = None;

    // the room list reply seeds the chat window
    server.send_message(&create_room_list()).await?;

    while server.is_connected() {
        if signals.take_shutdown_request() {
            info!("Connection worker shutting down by request.");
            return Ok(());
        }

        let loop_start = Instant::now();
        let mut pending_replies = Vec::new();

        // 1. Read waiting messages on the socket
        if let Some(block) = server.receive_message().await? {
            debug!("Received message block: {} bytes", block.payload_size);
            for message in unpack_messages(&block)? {
                debug!("Received message: {:#06x}", message.message_type as u32);
                match message.message_type {
                    // if the server requests a HEARTBEAT, answer immediately
                    MessageType::Heartbeat => pending_replies.push(create_ack()),
                    // outside of the handshake, ACK/NAK carry no information
                    MessageType::Ack | MessageType::Nak => {}
                    MessageType::Invalid => {
                        debug_assert!(false, "received INVALID message type");
                        warn!("Received INVALID message type, dropping.");
                    }
                    // anything else is for the chat window update hook
                    _ => server.messages_in.push(message),
                }
            }
            last_message_received = Instant::now();
            heartbeat_sent = None;
            signals.set_waiting_on_server(false);
        }

        // 2. Have we heard from the server lately? If not, probe it.
        if last_message_received.elapsed() > QUIET_TIMEOUT {
            match heartbeat_sent {
                None => {
                    pending_replies.push(create_heartbeat());
                    heartbeat_sent = Some(Instant::now());
                    signals.set_waiting_on_server(true);
                }
                Some(sent) if sent.elapsed() > QUIET_TIMEOUT => {
                    info!("Server did not respond to heartbeat.");
                    break;
                }
                Some(_) => {}
            }
        }

        // 3. Send queued messages to the socket in one frame
        let mut send_messages = server.messages_out.drain();
        send_messages.append(&mut pending_replies);
        server.send_messages(&send_messages).await?;

        // 4. Sleep
        pace_loop(
            loop_start,
            Duration::from_millis(TARGET_CLIENT_LOOP_MS),
            "Server connection",
        )
        .await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::{create_chat_send, create_room_create, Message};
    use tokio::io::DuplexStream;

    fn worker_pair() -> (Arc<Connection<DuplexStream>>, Connection<DuplexStream>) {
        let (near, far) = tokio::io::duplex(64 * 1024);
        (Arc::new(Connection::new(near)), Connection::new(far))
    }

    async fn receive_messages(conn: &Connection<DuplexStream>) -> Vec<Message> {
        for _ in 0..40 {
            if let Some(block) = conn.receive_message().await.unwrap() {
                return unpack_messages(&block).unwrap();
            }
        }
        Vec::new()
    }

    #[tokio::test]
    async fn test_initial_room_list_request() {
        let (server, peer) = worker_pair();
        let signals = ConnectionSignals::new();
        let handle = tokio::spawn(server_message_worker(Arc::clone(&server), signals.clone()));

        let first = receive_messages(&peer).await;
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].message_type, MessageType::RoomList);

        signals.request_shutdown();
        handle.await.unwrap();
        assert!(signals.take_connection_ended());
    }

    #[tokio::test]
    async fn test_heartbeat_is_answered_with_ack() {
        let (server, peer) = worker_pair();
        let signals = ConnectionSignals::new();
        let handle = tokio::spawn(server_message_worker(Arc::clone(&server), signals.clone()));

        // swallow the initial room list request
        receive_messages(&peer).await;

        peer.send_message(&create_heartbeat()).await.unwrap();
        let reply = peer.wait_for(MessageType::Ack, 2000).await.unwrap();
        assert!(reply.is_some());

        signals.request_shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_room_traffic_reaches_inbox_and_outbox_flushes() {
        let (server, peer) = worker_pair();
        let signals = ConnectionSignals::new();
        let handle = tokio::spawn(server_message_worker(Arc::clone(&server), signals.clone()));
        receive_messages(&peer).await;

        // inbound: a lifecycle announcement is queued for the update hook
        peer.send_message(&create_room_create("dev")).await.unwrap();
        for _ in 0..40 {
            if !server.messages_in.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        let queued = server.messages_in.pop().expect("announcement not queued");
        assert_eq!(queued.message_type, MessageType::RoomCreate);

        // outbound: a queued chat line goes out on the next tick
        server.messages_out.push(create_chat_send("dev", "hello"));
        let flushed = receive_messages(&peer).await;
        assert!(
            flushed
                .iter()
                .any(|m| m.message_type == MessageType::ChatSend)
        );

        signals.request_shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_peer_close_publishes_connection_ended() {
        let (server, peer) = worker_pair();
        let signals = ConnectionSignals::new();
        let handle = tokio::spawn(server_message_worker(Arc::clone(&server), signals.clone()));
        receive_messages(&peer).await;

        peer.shutdown().await;
        handle.await.unwrap();
        assert!(signals.take_connection_ended());
        assert!(!server.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_quiet_server_is_probed_then_dropped() {
        let (server, peer) = worker_pair();
        let signals = ConnectionSignals::new();
        let handle = tokio::spawn(server_message_worker(Arc::clone(&server), signals.clone()));

        // room list request arrives first, then silence from our side
        receive_messages(&peer).await;

        // after QUIET_TIMEOUT the worker sends one heartbeat
        let probe = peer.wait_for(MessageType::Heartbeat, 61_000).await.unwrap();
        assert!(probe.is_some());
        assert!(signals.is_waiting_on_server());

        // we never answer, so another QUIET_TIMEOUT later the worker quits
        handle.await.unwrap();
        assert!(signals.take_connection_ended());
    }
}
