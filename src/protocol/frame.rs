//! Self-synchronizing binary framing
//!
//! Every frame on the wire is:
//!
//! ```text
//! +----------+----------------+------------------+
//! | magic    | payload_size   | payload          |
//! | (4 bytes)| (4 bytes, BE)  | (variable)       |
//! +----------+----------------+------------------+
//! ```
//!
//! The decoder scans for the magic, so any garbage preceding a frame is
//! discarded and the stream re-synchronizes on the next frame boundary.

use bytes::{Buf, BytesMut};

use crate::error::{ChatError, Result};

/// Marks the start of a [`MessageBlock`] on the wire.
pub const BLOCK_MAGIC: [u8; 4] = [b't', b'm', b'x', 0x02];

/// Block header size: 4 bytes magic + 4 bytes length
pub const BLOCK_HEADER_SIZE: usize = 8;

/// Maximum block payload size (16 MB)
pub const MAX_BLOCK_SIZE: usize = 16 * 1024 * 1024;

/// The framing unit on the wire: a length-prefixed payload of packed messages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageBlock {
    /// Size in bytes of the payload, as carried in the header.
    pub payload_size: u32,
    /// Payload data.
    pub payload: Vec<u8>,
}

impl MessageBlock {
    /// Create a block wrapping `payload`.
    pub fn with_payload(payload: Vec<u8>) -> Self {
        Self {
            payload_size: payload.len() as u32,
            payload,
        }
    }

    /// Check whether the payload has been fully assembled.
    pub fn is_complete(&self) -> bool {
        self.payload.len() == self.payload_size as usize
    }

    /// Total encoded size of this block, header included.
    pub fn encoded_size(&self) -> usize {
        BLOCK_HEADER_SIZE + self.payload.len()
    }
}

/// Convert `block` into its on-wire byte representation.
pub fn pack_block(block: &MessageBlock) -> Vec<u8> {
    let mut data = Vec::with_capacity(block.encoded_size());
    data.extend_from_slice(&BLOCK_MAGIC);
    data.extend_from_slice(&block.payload_size.to_be_bytes());
    data.extend_from_slice(&block.payload);
    data
}

/// Find the first occurrence of [`BLOCK_MAGIC`] in `data`.
fn find_magic(data: &[u8]) -> Option<usize> {
    data.windows(BLOCK_MAGIC.len())
        .position(|window| window == BLOCK_MAGIC)
}

/// Incrementally assemble one [`MessageBlock`] from an arbitrary chunk of
/// bytes, returning the number of payload bytes appended to `block`.
///
/// On the first call pass `payload_offset == 0`: the chunk is scanned for the
/// magic, everything before it is discarded, the length header is read into
/// `block.payload_size` and as much payload as the chunk holds is appended.
/// If the magic or the length bytes are not present yet, 0 is returned and
/// the caller retries with more data.
///
/// On subsequent calls pass the accumulated return value as `payload_offset`;
/// the chunk is appended wholesale (up to the remaining payload size). The
/// block is complete once the accumulated total equals `block.payload_size`.
pub fn apply_chunk(chunk: &[u8], block: &mut MessageBlock, payload_offset: usize) -> usize {
    if chunk.is_empty() {
        return 0;
    }

    if payload_offset == 0 {
        let Some(start) = find_magic(chunk) else {
            return 0;
        };
        let after_magic = &chunk[start + BLOCK_MAGIC.len()..];
        if after_magic.len() < 4 {
            return 0;
        }
        let (len_bytes, rest) = after_magic.split_at(4);
        block.payload_size = u32::from_be_bytes([
            len_bytes[0],
            len_bytes[1],
            len_bytes[2],
            len_bytes[3],
        ]);
        block.payload.clear();
        block.payload.reserve(block.payload_size as usize);
        let take = rest.len().min(block.payload_size as usize);
        block.payload.extend_from_slice(&rest[..take]);
        take
    } else if payload_offset < block.payload_size as usize {
        let take = chunk.len().min(block.payload_size as usize - payload_offset);
        block.payload.extend_from_slice(&chunk[..take]);
        take
    } else {
        0
    }
}

/// Stateful streaming decoder over a byte stream of concatenated blocks.
///
/// Unlike [`apply_chunk`], the decoder retains any bytes that follow a
/// complete block, so several blocks arriving in one read are all decodable.
#[derive(Debug, Default)]
pub struct BlockDecoder {
    buffer: BytesMut,
}

impl BlockDecoder {
    /// Create a new block decoder.
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Feed raw bytes into the decoder.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode the next complete block.
    ///
    /// Returns `Ok(None)` if more data is needed. Garbage before the magic is
    /// discarded. A length header exceeding [`MAX_BLOCK_SIZE`] is a protocol
    /// error; the stream cannot be trusted past it.
    pub fn next_block(&mut self) -> Result<Option<MessageBlock>> {
        match find_magic(&self.buffer) {
            Some(start) => {
                if start > 0 {
                    self.buffer.advance(start);
                }
            }
            None => {
                // keep a possible magic prefix at the end of the buffer
                let keep = magic_prefix_len(&self.buffer);
                let discard = self.buffer.len() - keep;
                if discard > 0 {
                    self.buffer.advance(discard);
                }
                return Ok(None);
            }
        }

        if self.buffer.len() < BLOCK_HEADER_SIZE {
            return Ok(None);
        }
        let payload_size = u32::from_be_bytes([
            self.buffer[4],
            self.buffer[5],
            self.buffer[6],
            self.buffer[7],
        ]);
        if payload_size as usize > MAX_BLOCK_SIZE {
            return Err(ChatError::protocol(format!(
                "block payload too large: {} bytes (max: {})",
                payload_size, MAX_BLOCK_SIZE
            )));
        }
        if self.buffer.len() < BLOCK_HEADER_SIZE + payload_size as usize {
            return Ok(None);
        }

        self.buffer.advance(BLOCK_HEADER_SIZE);
        let payload = self.buffer.split_to(payload_size as usize).to_vec();
        Ok(Some(MessageBlock {
            payload_size,
            payload,
        }))
    }

    /// Number of bytes currently buffered.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Discard all buffered bytes.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

/// Length of the longest buffer suffix that is a proper prefix of the magic.
fn magic_prefix_len(data: &[u8]) -> usize {
    let max = data.len().min(BLOCK_MAGIC.len() - 1);
    for keep in (1..=max).rev() {
        if data[data.len() - keep..] == BLOCK_MAGIC[..keep] {
            return keep;
        }
    }
    0
}
