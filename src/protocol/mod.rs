//! Wire protocol: framing, typed messages, and the packing codec

pub mod codec;
pub mod frame;
pub mod messages;

pub use codec::{pack_message, pack_messages, unpack_messages};
pub use frame::{apply_chunk, pack_block, BlockDecoder, MessageBlock, BLOCK_MAGIC};
pub use messages::{Message, MessageType, Value, MAX_HISTORY_ENTRIES};
