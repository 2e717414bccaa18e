//! Packing and unpacking messages into framed payloads
//!
//! The payload of every [`MessageBlock`] is a MessagePack array of
//! `{ "message_type": uint, "values": map }` objects. One block carries an
//! entire send batch; there is no split-by-size.

use std::collections::BTreeMap;

use tracing::warn;

use super::frame::MessageBlock;
use super::messages::{Message, MessageType, Value};
use crate::error::{ChatError, Result};

const KEY_MESSAGE_TYPE: &str = "message_type";
const KEY_VALUES: &str = "values";

fn message_to_value(message: &Message) -> Value {
    let values: Vec<(Value, Value)> = message
        .values
        .iter()
        .map(|(key, value)| (Value::from(key.as_str()), value.clone()))
        .collect();
    Value::Map(vec![
        (
            Value::from(KEY_MESSAGE_TYPE),
            Value::from(message.message_type as u32),
        ),
        (Value::from(KEY_VALUES), Value::Map(values)),
    ])
}

/// Decode one array element back into a [`Message`].
///
/// A structurally malformed element is a protocol error. An element whose
/// `message_type` code is unknown decodes to `None` so the caller can skip
/// it without tearing the session down.
fn value_to_message(value: Value) -> Result<Option<Message>> {
    let Value::Map(entries) = value else {
        return Err(ChatError::protocol("packed message is not a map"));
    };

    let mut type_code: Option<u64> = None;
    let mut values: Option<Vec<(Value, Value)>> = None;
    for (key, value) in entries {
        match key.as_str() {
            Some(KEY_MESSAGE_TYPE) => type_code = value.as_u64(),
            Some(KEY_VALUES) => {
                if let Value::Map(map) = value {
                    values = Some(map);
                }
            }
            _ => {}
        }
    }

    let (Some(type_code), Some(values)) = (type_code, values) else {
        return Err(ChatError::protocol(
            "packed message is missing message_type or values",
        ));
    };

    let Some(message_type) = u32::try_from(type_code)
        .ok()
        .and_then(MessageType::from_u32)
    else {
        warn!("skipping message with unknown type code: {:#x}", type_code);
        return Ok(None);
    };

    let mut map = BTreeMap::new();
    for (key, value) in values {
        let Some(key) = key.as_str() else {
            return Err(ChatError::protocol("message value key is not a string"));
        };
        map.insert(key.to_owned(), value);
    }

    Ok(Some(Message {
        message_type,
        values: map,
    }))
}

/// Pack a single message into a [`MessageBlock`].
pub fn pack_message(message: &Message) -> Result<MessageBlock> {
    pack_messages(std::slice::from_ref(message))
}

/// Pack zero or more messages into one [`MessageBlock`]. The whole batch
/// lands in a single frame.
pub fn pack_messages(messages: &[Message]) -> Result<MessageBlock> {
    let array = Value::Array(messages.iter().map(message_to_value).collect());
    let mut payload = Vec::new();
    rmpv::encode::write_value(&mut payload, &array)?;
    Ok(MessageBlock::with_payload(payload))
}

/// Unpack zero or more messages from `block`.
///
/// Elements with an unknown message type are skipped; any structural decode
/// failure is an error the caller treats as a transport fault.
pub fn unpack_messages(block: &MessageBlock) -> Result<Vec<Message>> {
    let mut cursor = &block.payload[..];
    let root = rmpv::decode::read_value(&mut cursor)?;
    let Value::Array(elements) = root else {
        return Err(ChatError::protocol("block payload is not a message array"));
    };

    let mut messages = Vec::with_capacity(elements.len());
    for element in elements {
        if let Some(message) = value_to_message(element)? {
            messages.push(message);
        }
    }
    Ok(messages)
}
