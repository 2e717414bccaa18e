//! Typed messages understood by client and server
//!
//! A [`Message`] is a type tag plus an open map of values whose leaves are
//! strings, 32-bit integers, or booleans; arrays and nested maps are allowed
//! for compound payloads such as room history. Prefer the `create_*`
//! factories over building messages by hand so required keys stay consistent
//! between peers.

use std::collections::BTreeMap;

/// Dynamic value type for message parameters.
pub type Value = rmpv::Value;

/// Maximum number of entries that can be retrieved as part of a
/// [`MessageType::RoomHistory`] request.
pub const MAX_HISTORY_ENTRIES: i32 = 100;

/// Specific messages understood by client and server.
///
/// The discriminants are stable on-wire identifiers.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Default, never legal on the wire
    Invalid = 0x0000,

    // Basic messages
    /// Acknowledged
    Ack = 0x1000,
    /// Not acknowledged, optionally carrying an `error` string
    Nak = 0x1001,

    // Connection-related messages
    /// Sent by client to server with the claimed user name
    Hello = 0x2000,
    /// Sent by either side to check the other is alive (answered with ACK)
    Heartbeat = 0x2001,

    // Room-related messages
    /// Request (client) or reply (server) for the list of rooms
    RoomList = 0x3000,
    /// Request creation of a room (client) or announce a new room (server)
    RoomCreate = 0x3001,
    /// Join a room
    RoomJoin = 0x3002,
    /// Request destruction of a room (client) or announce it (server)
    RoomDestroy = 0x3003,
    /// Request (client) or deliver (server) the chat history of a room
    RoomHistory = 0x3004,

    // Chat-related messages
    /// Client sending one line of chat to a room
    ChatSend = 0x4000,
    /// Server echoing one line of chat to a room's joined clients
    ChatEcho = 0x4001,
}

impl MessageType {
    /// Convert from the on-wire code, returns `None` for unknown codes.
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0x0000 => Some(MessageType::Invalid),
            0x1000 => Some(MessageType::Ack),
            0x1001 => Some(MessageType::Nak),
            0x2000 => Some(MessageType::Hello),
            0x2001 => Some(MessageType::Heartbeat),
            0x3000 => Some(MessageType::RoomList),
            0x3001 => Some(MessageType::RoomCreate),
            0x3002 => Some(MessageType::RoomJoin),
            0x3003 => Some(MessageType::RoomDestroy),
            0x3004 => Some(MessageType::RoomHistory),
            0x4000 => Some(MessageType::ChatSend),
            0x4001 => Some(MessageType::ChatEcho),
            _ => None,
        }
    }
}

/// One typed message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// The type of message sent.
    pub message_type: MessageType,
    /// Arbitrary map of parameters associated with the message.
    pub values: BTreeMap<String, Value>,
}

impl Message {
    /// Create a message of `message_type` with no values.
    pub fn new(message_type: MessageType) -> Self {
        Self {
            message_type,
            values: BTreeMap::new(),
        }
    }

    /// Insert a value under `key`, builder-style.
    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }
}

/// Check if `message` contains a value under `key`.
pub fn message_has_value(message: &Message, key: &str) -> bool {
    message.values.contains_key(key)
}

/// Leaf types retrievable from a message's value map.
pub trait MessageValue: Sized {
    /// Extract `Self` from a dynamic value, if it holds this leaf type.
    fn from_value(value: &Value) -> Option<Self>;
}

impl MessageValue for String {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_str().map(str::to_owned)
    }
}

impl MessageValue for i32 {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_i64().and_then(|n| i32::try_from(n).ok())
    }
}

impl MessageValue for bool {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_bool()
    }
}

/// Retrieve the value under `key` as a `T`, or `default` if the key is
/// absent or holds a different leaf type.
pub fn message_value_or<T: MessageValue>(message: &Message, key: &str, default: T) -> T {
    message
        .values
        .get(key)
        .and_then(T::from_value)
        .unwrap_or(default)
}

/// Create an ACK message.
pub fn create_ack() -> Message {
    Message::new(MessageType::Ack)
}

/// Create a NAK message with an optional error description.
pub fn create_nak(error: impl Into<String>) -> Message {
    Message::new(MessageType::Nak).with_value("error", error.into())
}

/// Create a HELLO message carrying the claimed user name.
pub fn create_hello(user_name: impl Into<String>) -> Message {
    Message::new(MessageType::Hello).with_value("user_name", user_name.into())
}

/// Create a HEARTBEAT message.
pub fn create_heartbeat() -> Message {
    Message::new(MessageType::Heartbeat)
}

/// Create a ROOM_LIST message requesting the room list.
pub fn create_room_list() -> Message {
    Message::new(MessageType::RoomList)
}

/// Create a ROOM_LIST reply carrying `rooms` under the keys "0", "1", ...
/// in iteration order.
pub fn create_room_list_reply<I, S>(rooms: I) -> Message
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut message = Message::new(MessageType::RoomList);
    for (i, room) in rooms.into_iter().enumerate() {
        message
            .values
            .insert(i.to_string(), Value::from(room.into()));
    }
    message
}

/// Create a ROOM_CREATE message for a new chat room.
pub fn create_room_create(room_name: impl Into<String>) -> Message {
    Message::new(MessageType::RoomCreate).with_value("room_name", room_name.into())
}

/// Create a ROOM_JOIN message for an existing chat room.
pub fn create_room_join(room_name: impl Into<String>) -> Message {
    Message::new(MessageType::RoomJoin).with_value("room_name", room_name.into())
}

/// Create a ROOM_DESTROY message for an existing chat room.
pub fn create_room_destroy(room_name: impl Into<String>) -> Message {
    Message::new(MessageType::RoomDestroy).with_value("room_name", room_name.into())
}

/// Create a ROOM_HISTORY message.
///
/// As a request, `event_count` is the maximum number of events wanted and
/// must lie in `0..=MAX_HISTORY_ENTRIES`. As a reply skeleton, start from 0
/// and append entries with [`add_room_history_event`].
pub fn create_room_history(room_name: impl Into<String>, event_count: i32) -> Message {
    debug_assert!((0..=MAX_HISTORY_ENTRIES).contains(&event_count));
    Message::new(MessageType::RoomHistory)
        .with_value("room_name", room_name.into())
        .with_value("event_count", event_count)
}

/// Append one event to a ROOM_HISTORY reply under the `events` array and
/// refresh `event_count`. Returns the number of events now present.
pub fn add_room_history_event(
    message: &mut Message,
    timestamp: i32,
    user_name: impl Into<String>,
    text: impl Into<String>,
) -> usize {
    let event = Value::Map(vec![
        (Value::from("timestamp"), Value::from(timestamp)),
        (Value::from("user_name"), Value::from(user_name.into())),
        (Value::from("text"), Value::from(text.into())),
    ]);

    let events = message
        .values
        .entry("events".to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    let count = match events {
        Value::Array(entries) => {
            entries.push(event);
            entries.len()
        }
        // a malformed caller-supplied value is replaced outright
        other => {
            *other = Value::Array(vec![event]);
            1
        }
    };
    message
        .values
        .insert("event_count".to_string(), Value::from(count as i32));
    count
}

/// Create a CHAT_SEND message carrying one line of chat for a room.
pub fn create_chat_send(room_name: impl Into<String>, text: impl Into<String>) -> Message {
    Message::new(MessageType::ChatSend)
        .with_value("room_name", room_name.into())
        .with_value("text", text.into())
}

/// Create a CHAT_ECHO message distributing one line of chat to a client.
pub fn create_chat_echo(
    room_name: impl Into<String>,
    text: impl Into<String>,
    user_name: impl Into<String>,
    timestamp: i32,
) -> Message {
    Message::new(MessageType::ChatEcho)
        .with_value("room_name", room_name.into())
        .with_value("text", text.into())
        .with_value("user_name", user_name.into())
        .with_value("timestamp", timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_roundtrip() {
        let types = [
            MessageType::Invalid,
            MessageType::Ack,
            MessageType::Nak,
            MessageType::Hello,
            MessageType::Heartbeat,
            MessageType::RoomList,
            MessageType::RoomCreate,
            MessageType::RoomJoin,
            MessageType::RoomDestroy,
            MessageType::RoomHistory,
            MessageType::ChatSend,
            MessageType::ChatEcho,
        ];
        for message_type in types {
            let code = message_type as u32;
            assert_eq!(MessageType::from_u32(code), Some(message_type));
        }
        assert_eq!(MessageType::from_u32(0xbeef), None);
    }

    #[test]
    fn test_factories_set_required_keys() {
        let hello = create_hello("alice");
        assert_eq!(hello.message_type, MessageType::Hello);
        assert_eq!(
            message_value_or(&hello, "user_name", String::new()),
            "alice"
        );

        let send = create_chat_send("lobby", "hi there");
        assert!(message_has_value(&send, "room_name"));
        assert!(message_has_value(&send, "text"));

        let echo = create_chat_echo("lobby", "hi there", "alice", 1234);
        assert_eq!(message_value_or(&echo, "timestamp", 0), 1234);
        assert_eq!(message_value_or(&echo, "user_name", String::new()), "alice");
    }

    #[test]
    fn test_value_or_type_mismatch_yields_default() {
        let echo = create_chat_echo("lobby", "text", "alice", 99);
        // "timestamp" holds an integer, not a string
        assert_eq!(
            message_value_or(&echo, "timestamp", "fallback".to_string()),
            "fallback"
        );
        assert_eq!(message_value_or(&echo, "missing", 7), 7);
        assert!(!message_value_or(&echo, "room_name", false));
    }

    #[test]
    fn test_room_list_reply_indexes_in_order() {
        let reply = create_room_list_reply(["lobby", "games", "dev"]);
        assert_eq!(message_value_or(&reply, "0", String::new()), "lobby");
        assert_eq!(message_value_or(&reply, "1", String::new()), "games");
        assert_eq!(message_value_or(&reply, "2", String::new()), "dev");
        assert!(!message_has_value(&reply, "3"));
    }

    #[test]
    fn test_room_history_event_accumulation() {
        let mut history = create_room_history("lobby", 0);
        assert_eq!(add_room_history_event(&mut history, 100, "alice", "one"), 1);
        assert_eq!(add_room_history_event(&mut history, 101, "bob", "two"), 2);
        assert_eq!(message_value_or(&history, "event_count", 0), 2);

        let events = history.values.get("events").unwrap();
        let entries = events.as_array().unwrap();
        assert_eq!(entries.len(), 2);

        let first = entries[0].as_map().unwrap();
        let text = first
            .iter()
            .find(|(k, _)| k.as_str() == Some("text"))
            .map(|(_, v)| v.as_str().unwrap());
        assert_eq!(text, Some("one"));
    }

    #[test]
    fn test_nak_carries_error_string() {
        let nak = create_nak("Too many connections.");
        assert_eq!(nak.message_type, MessageType::Nak);
        assert_eq!(
            message_value_or(&nak, "error", String::new()),
            "Too many connections."
        );
    }
}
