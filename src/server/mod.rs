//! Server side: connection acceptance, per-client workers, and the scheduler

pub mod client_worker;
pub mod connection_manager;
pub mod scheduler;

pub use client_worker::client_worker;
pub use connection_manager::{ClientConnectionManager, ClientSession, ServerStream};
pub use scheduler::{server_worker, ServerRoom, ServerRoomExt, TARGET_SERVER_LOOP_MS};
