//! Framed message exchange over a secure byte stream
//!
//! A [`Connection`] owns the underlying stream plus the two queues that make
//! up its public face: `messages_in` for typed messages awaiting local
//! processing and `messages_out` for typed messages awaiting transmission.
//! The worker tasks pump frames between the stream and the queues; everyone
//! else only ever touches the queues.
//!
//! The stream type is generic so the engine can run over a TLS session in
//! production and over in-memory pipes in tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::time::{timeout, Instant};

use crate::error::{ChatError, Result};
use crate::protocol::codec::{pack_messages, unpack_messages};
use crate::protocol::frame::{pack_block, BlockDecoder, MessageBlock};
use crate::protocol::messages::{Message, MessageType};
use crate::sync::ThreadSafeQueue;

/// Receive buffer size, roughly one ethernet MTU.
pub const MTU_BUFFER: usize = 1500;

/// Milliseconds to wait for stream data before giving up one read slice.
/// This built-in retry delay is what downstream loop pacing relies on.
pub const SSL_RETRY_MS: u64 = 50;

/// Milliseconds to wait for an expected handshake response.
pub const HANDSHAKE_TIMEOUT_MS: u64 = 3000;

/// Target period for the frame-pumping worker loops. Anything below
/// 2 x [`SSL_RETRY_MS`] would just spin against the read retry wait.
pub const TARGET_CLIENT_LOOP_MS: u64 = SSL_RETRY_MS * 2;

struct Io<S> {
    stream: S,
    decoder: BlockDecoder,
}

/// One endpoint of a framed, secure message stream.
pub struct Connection<S> {
    io: Mutex<Option<Io<S>>>,
    connected: AtomicBool,
    /// Typed messages received from the peer, awaiting local processing.
    pub messages_in: ThreadSafeQueue<Message>,
    /// Typed messages queued for transmission to the peer.
    pub messages_out: ThreadSafeQueue<Message>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Connection<S> {
    /// Wrap an established secure stream.
    pub fn new(stream: S) -> Self {
        Self {
            io: Mutex::new(Some(Io {
                stream,
                decoder: BlockDecoder::new(),
            })),
            connected: AtomicBool::new(true),
            messages_in: ThreadSafeQueue::new(),
            messages_out: ThreadSafeQueue::new(),
        }
    }

    /// Tests if the connection to the peer is still active.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Attempts to send one message block to the peer.
    pub async fn send_block(&self, block: &MessageBlock) -> Result<()> {
        if !self.is_connected() {
            return Err(ChatError::transport("connection lost"));
        }
        let mut guard = self.io.lock().await;
        let Some(io) = guard.as_mut() else {
            return Err(ChatError::transport("connection lost"));
        };

        let data = pack_block(block);
        let written = io.stream.write_all(&data).await;
        let flushed = match written {
            Ok(()) => io.stream.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = flushed {
            self.connected.store(false, Ordering::Release);
            return Err(ChatError::transport(format!("send failed: {}", e)));
        }
        Ok(())
    }

    /// Attempts to send a single message to the peer.
    pub async fn send_message(&self, message: &Message) -> Result<()> {
        self.send_block(&pack_messages(std::slice::from_ref(message))?)
            .await
    }

    /// Attempts to send zero or more messages to the peer. The entire batch
    /// is packed into one frame, never split. An empty batch writes nothing.
    pub async fn send_messages(&self, messages: &[Message]) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }
        self.send_block(&pack_messages(messages)?).await
    }

    /// Attempts to read one message block from the peer, if one is waiting.
    ///
    /// At most one MTU-sized read is issued per call; if no data arrives
    /// within [`SSL_RETRY_MS`] the call returns `None`, so callers can poll
    /// without spinning. A block split across reads completes over several
    /// calls. Peer shutdown flips [`is_connected`] to false.
    ///
    /// [`is_connected`]: Connection::is_connected
    pub async fn receive_message(&self) -> Result<Option<MessageBlock>> {
        if !self.is_connected() {
            return Err(ChatError::transport("connection lost"));
        }
        let mut guard = self.io.lock().await;
        let Some(io) = guard.as_mut() else {
            return Err(ChatError::transport("connection lost"));
        };

        // a block may already be fully buffered from an earlier read
        if let Some(block) = next_usable_block(&mut io.decoder)? {
            return Ok(Some(block));
        }

        let mut buffer = [0u8; MTU_BUFFER];
        match timeout(
            Duration::from_millis(SSL_RETRY_MS),
            io.stream.read(&mut buffer),
        )
        .await
        {
            // nothing available within the retry window
            Err(_) => Ok(None),
            Ok(Ok(0)) => {
                self.connected.store(false, Ordering::Release);
                Ok(None)
            }
            Ok(Ok(n)) => {
                io.decoder.feed(&buffer[..n]);
                next_usable_block(&mut io.decoder)
            }
            Ok(Err(e)) => {
                self.connected.store(false, Ordering::Release);
                Err(ChatError::transport(format!("receive failed: {}", e)))
            }
        }
    }

    /// Attempts to cleanly shut down the connection. Idempotent; never fails.
    pub async fn shutdown(&self) {
        self.connected.store(false, Ordering::Release);
        let mut guard = self.io.lock().await;
        if let Some(mut io) = guard.take() {
            let _ = io.stream.shutdown().await;
        }
    }

    /// Blocks up to `timeout_ms`, waiting for a message of `message_type`.
    ///
    /// Any other message received while waiting is discarded.
    pub async fn wait_for(
        &self,
        message_type: MessageType,
        timeout_ms: u64,
    ) -> Result<Option<Message>> {
        self.wait_for_match(timeout_ms, |t| t == message_type).await
    }

    /// Blocks up to `timeout_ms`, waiting for either an ACK or a NAK.
    pub async fn wait_for_ack_or_nak(&self, timeout_ms: u64) -> Result<Option<Message>> {
        self.wait_for_match(timeout_ms, |t| {
            t == MessageType::Ack || t == MessageType::Nak
        })
        .await
    }

    async fn wait_for_match(
        &self,
        timeout_ms: u64,
        matches: impl Fn(MessageType) -> bool,
    ) -> Result<Option<Message>> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            if let Some(block) = self.receive_message().await? {
                for message in unpack_messages(&block)? {
                    if matches(message.message_type) {
                        return Ok(Some(message));
                    }
                }
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
        }
    }
}

/// Pull the next decodable block, skipping zero-length blocks, which can
/// only arise from stream garbage.
fn next_usable_block(decoder: &mut BlockDecoder) -> Result<Option<MessageBlock>> {
    loop {
        match decoder.next_block()? {
            Some(block) if block.payload_size == 0 => continue,
            other => return Ok(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::{
        create_ack, create_chat_send, create_heartbeat, create_hello, message_value_or,
    };

    fn pair() -> (Connection<tokio::io::DuplexStream>, Connection<tokio::io::DuplexStream>) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        (Connection::new(a), Connection::new(b))
    }

    async fn receive_soon(
        conn: &Connection<tokio::io::DuplexStream>,
    ) -> Option<MessageBlock> {
        for _ in 0..20 {
            if let Some(block) = conn.receive_message().await.unwrap() {
                return Some(block);
            }
        }
        None
    }

    #[tokio::test]
    async fn test_send_receive_roundtrip() {
        let (alice, bob) = pair();
        alice
            .send_message(&create_chat_send("lobby", "hello"))
            .await
            .unwrap();

        let block = receive_soon(&bob).await.expect("no block received");
        let messages = unpack_messages(&block).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].message_type, MessageType::ChatSend);
    }

    #[tokio::test]
    async fn test_batch_arrives_in_one_block() {
        let (alice, bob) = pair();
        let batch = vec![
            create_heartbeat(),
            create_chat_send("lobby", "one"),
            create_chat_send("lobby", "two"),
        ];
        alice.send_messages(&batch).await.unwrap();

        let block = receive_soon(&bob).await.expect("no block received");
        assert_eq!(unpack_messages(&block).unwrap(), batch);
    }

    #[tokio::test]
    async fn test_empty_batch_writes_nothing() {
        let (alice, bob) = pair();
        alice.send_messages(&[]).await.unwrap();
        assert!(bob.receive_message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_receive_returns_none_when_quiet() {
        let (_alice, bob) = pair();
        let started = std::time::Instant::now();
        assert!(bob.receive_message().await.unwrap().is_none());
        // the retry wait is built into the call
        assert!(started.elapsed() >= Duration::from_millis(SSL_RETRY_MS / 2));
    }

    #[tokio::test]
    async fn test_peer_shutdown_disconnects() {
        let (alice, bob) = pair();
        assert!(bob.is_connected());

        alice.shutdown().await;
        // drain until the EOF is observed
        for _ in 0..20 {
            if !bob.is_connected() {
                break;
            }
            let _ = bob.receive_message().await;
        }
        assert!(!bob.is_connected());
        assert!(bob.receive_message().await.is_err());
        assert!(bob.send_message(&create_ack()).await.is_err());
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let (alice, _bob) = pair();
        alice.shutdown().await;
        alice.shutdown().await;
        assert!(!alice.is_connected());
    }

    #[tokio::test]
    async fn test_wait_for_discards_other_messages() {
        let (alice, bob) = pair();
        alice.send_message(&create_heartbeat()).await.unwrap();
        alice.send_message(&create_hello("alice")).await.unwrap();

        let hello = bob
            .wait_for(MessageType::Hello, 1000)
            .await
            .unwrap()
            .expect("expected HELLO");
        assert_eq!(
            message_value_or(&hello, "user_name", String::new()),
            "alice"
        );
        // the heartbeat that arrived first was discarded, not queued
        assert!(bob.messages_in.is_empty());
    }

    #[tokio::test]
    async fn test_wait_for_times_out() {
        let (_alice, bob) = pair();
        let result = bob.wait_for(MessageType::Ack, 120).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_wait_for_ack_or_nak_matches_either() {
        let (alice, bob) = pair();
        alice.send_message(&create_ack()).await.unwrap();
        let reply = bob.wait_for_ack_or_nak(1000).await.unwrap();
        assert_eq!(reply.map(|m| m.message_type), Some(MessageType::Ack));
    }
}
