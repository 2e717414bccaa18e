//! Thread-safe primitives shared by the workers
//!
//! These are the only data structures crossing task boundaries outside of
//! the transport itself: a mutex-guarded FIFO queue for message passing and
//! a bounded ring buffer for chat history retention.

pub mod queue;
pub mod ring;

pub use queue::ThreadSafeQueue;
pub use ring::RingBuffer;
