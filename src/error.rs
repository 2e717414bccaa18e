//! Error handling for the chat engine

use std::fmt;

/// Result type alias for chat operations
pub type Result<T> = std::result::Result<T, ChatError>;

/// Chat engine error types
#[derive(Debug, Clone)]
pub enum ChatError {
    /// Secure-stream read/write/handshake failure
    Transport(String),
    /// Frame or payload could not be decoded
    Protocol(String),
    /// Configuration missing or invalid
    Config(String),
    /// Server is at its connection limit
    Capacity(String),
    /// An expected message did not arrive in time
    Timeout(String),
}

impl ChatError {
    /// Get human-readable error message
    pub fn message(&self) -> &str {
        match self {
            ChatError::Transport(msg) => msg,
            ChatError::Protocol(msg) => msg,
            ChatError::Config(msg) => msg,
            ChatError::Capacity(msg) => msg,
            ChatError::Timeout(msg) => msg,
        }
    }

    /// Create a transport error
    pub fn transport<T: Into<String>>(msg: T) -> Self {
        ChatError::Transport(msg.into())
    }

    /// Create a protocol error
    pub fn protocol<T: Into<String>>(msg: T) -> Self {
        ChatError::Protocol(msg.into())
    }

    /// Create a configuration error
    pub fn config<T: Into<String>>(msg: T) -> Self {
        ChatError::Config(msg.into())
    }

    /// Create a capacity error
    pub fn capacity<T: Into<String>>(msg: T) -> Self {
        ChatError::Capacity(msg.into())
    }

    /// Create a timeout error
    pub fn timeout<T: Into<String>>(msg: T) -> Self {
        ChatError::Timeout(msg.into())
    }
}

impl fmt::Display for ChatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatError::Transport(msg) => write!(f, "Transport error: {}", msg),
            ChatError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            ChatError::Config(msg) => write!(f, "Configuration error: {}", msg),
            ChatError::Capacity(msg) => write!(f, "Capacity error: {}", msg),
            ChatError::Timeout(msg) => write!(f, "Timeout: {}", msg),
        }
    }
}

impl std::error::Error for ChatError {}

impl From<std::io::Error> for ChatError {
    fn from(err: std::io::Error) -> Self {
        ChatError::Transport(format!("IO error: {}", err))
    }
}

impl From<rustls::Error> for ChatError {
    fn from(err: rustls::Error) -> Self {
        ChatError::Transport(format!("TLS error: {}", err))
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        ChatError::Config(format!("JSON error: {}", err))
    }
}

impl From<rmpv::encode::Error> for ChatError {
    fn from(err: rmpv::encode::Error) -> Self {
        ChatError::Protocol(format!("MessagePack encode error: {}", err))
    }
}

impl From<rmpv::decode::Error> for ChatError {
    fn from(err: rmpv::decode::Error) -> Self {
        ChatError::Protocol(format!("MessagePack decode error: {}", err))
    }
}
