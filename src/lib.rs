//! Parlor - a multi-room chat service over TLS
//!
//! The server accepts many simultaneous client sessions, maintains a set of
//! named chat rooms, routes chat events only to clients joined to the
//! originating room, keeps a bounded per-room history, and announces room
//! lifecycle changes to every client. Each client holds one persistent
//! secure connection and exchanges typed messages with the server.
//!
//! ## Architecture
//!
//! - **Wire protocol** ([`protocol`]): self-synchronizing frames carrying
//!   MessagePack-encoded batches of typed messages.
//! - **Transport** ([`transport`]): TLS setup and the [`Connection`], which
//!   owns the stream plus the inbound/outbound message queues.
//! - **Server** ([`server`]): the connection manager accepts sessions, one
//!   worker per client pumps frames, and a single scheduler tick loop owns
//!   all room state and fans messages in and out.
//! - **Client** ([`client`]): a background worker pumps frames and probes
//!   liveness while the chat-window state applies updates per UI frame.
//! - **Primitives** ([`sync`]): the mutex-guarded queue and the bounded
//!   ring buffer the layers above are built on.

pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod rooms;
pub mod server;
pub mod sync;
pub mod transport;

pub use error::{ChatError, Result};
pub use protocol::{Message, MessageBlock, MessageType};
pub use transport::Connection;

use std::time::{SystemTime, UNIX_EPOCH};

/// Get the current time as whole seconds since the UNIX epoch.
pub fn current_timestamp() -> i32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i32
}

/// Sleep off the remainder of a worker tick; warn when the tick overran its
/// target instead of sleeping.
pub(crate) async fn pace_loop(
    loop_start: tokio::time::Instant,
    target: std::time::Duration,
    label: &str,
) {
    let elapsed = loop_start.elapsed();
    if elapsed < target {
        tokio::time::sleep(target - elapsed).await;
    } else {
        tracing::warn!(
            "{} loop took too long to process: {}ms",
            label,
            elapsed.as_millis()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_timestamp_is_recent() {
        let now = current_timestamp();
        // sometime after 2023 and before the i32 rollover
        assert!(now > 1_700_000_000);
    }
}
