//! Accepting and tracking client connections
//!
//! The manager owns the listening socket and the shared references to every
//! active session. Rooms only ever hold weak handles; when the manager drops
//! a session, the scheduler's next compaction pass forgets it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, warn};

use crate::error::{ChatError, Result};
use crate::protocol::messages::create_nak;
use crate::transport::Connection;

/// The secure stream type for accepted clients.
pub type ServerStream = tokio_rustls::server::TlsStream<TcpStream>;

/// One connected client as the server sees it: the framed connection plus
/// the user name recorded after HELLO validation.
pub struct ClientSession<S = ServerStream> {
    /// The client's framed connection and its two queues.
    pub connection: Connection<S>,
    user_name: OnceLock<String>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> ClientSession<S> {
    /// Wrap a freshly accepted secure stream.
    pub fn new(stream: S) -> Self {
        Self {
            connection: Connection::new(stream),
            user_name: OnceLock::new(),
        }
    }
}

impl<S> ClientSession<S> {
    /// The user name claimed in HELLO, once the handshake has completed.
    pub fn user_name(&self) -> Option<&str> {
        self.user_name.get().map(String::as_str)
    }

    /// Record the validated user name. Later calls are ignored.
    pub fn set_user_name(&self, user_name: String) {
        let _ = self.user_name.set(user_name);
    }
}

/// Accepts new client connections and manages the active set.
pub struct ClientConnectionManager {
    listener: TcpListener,
    acceptor: TlsAcceptor,
    max_clients: usize,
    active_connections: Mutex<Vec<Arc<ClientSession>>>,
    accepting: AtomicBool,
}

impl ClientConnectionManager {
    /// Bind the accept socket on `host_port`.
    pub async fn bind(host_port: u16, acceptor: TlsAcceptor, max_clients: usize) -> Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", host_port))
            .await
            .map_err(|e| {
                ChatError::transport(format!("cannot bind port {}: {}", host_port, e))
            })?;
        Ok(Self {
            listener,
            acceptor,
            max_clients,
            active_connections: Mutex::new(Vec::new()),
            accepting: AtomicBool::new(true),
        })
    }

    /// Blocks until the next client finishes the TLS handshake.
    ///
    /// Returns `None` when the connection was dropped before becoming a
    /// session: a failed TLS handshake, or the server being at capacity, in
    /// which case the client is sent NAK("Too many connections.") and shut.
    pub async fn await_next_connection(&self) -> Result<Option<Arc<ClientSession>>> {
        let (tcp, peer_addr) = self
            .listener
            .accept()
            .await
            .map_err(|e| ChatError::transport(format!("accept failed: {}", e)))?;

        let stream = match self.acceptor.accept(tcp).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("TLS handshake with {} failed: {}", peer_addr, e);
                return Ok(None);
            }
        };

        self.cleanup_connections();

        let session = Arc::new(ClientSession::new(stream));
        let at_capacity = {
            let mut active = self.lock_active();
            if active.len() >= self.max_clients {
                true
            } else {
                active.push(Arc::clone(&session));
                false
            }
        };

        if at_capacity {
            warn!("Connection limit reached, refusing {}", peer_addr);
            let _ = session
                .connection
                .send_message(&create_nak("Too many connections."))
                .await;
            session.connection.shutdown().await;
            return Ok(None);
        }

        debug!("New connection from {}", peer_addr);
        Ok(Some(session))
    }

    /// Retrieve all of the active client sessions.
    pub fn get_active_connections(&self) -> Vec<Arc<ClientSession>> {
        self.lock_active().clone()
    }

    /// Check whether the manager is still accepting connections.
    pub fn is_accepting_connections(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Stop accepting and shut down every active session.
    pub async fn shutdown(&self) {
        self.accepting.store(false, Ordering::Release);
        let sessions: Vec<Arc<ClientSession>> = self.lock_active().drain(..).collect();
        for session in sessions {
            session.connection.shutdown().await;
        }
    }

    /// Drop sessions whose connection has ended.
    fn cleanup_connections(&self) {
        self.lock_active()
            .retain(|session| session.connection.is_connected());
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, Vec<Arc<ClientSession>>> {
        self.active_connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
