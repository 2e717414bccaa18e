//! Client side: server connection, background worker, and chat-window state

pub mod chat_window;
pub mod connection;
pub mod worker;

pub use chat_window::{ChatWindowEvent, ChatWindowState, ClientRoom, ClientRoomExt};
pub use connection::{ClientStream, ServerConnection};
pub use worker::{server_message_worker, ConnectionSignals, QUIET_TIMEOUT};
