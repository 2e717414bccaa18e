//! Chat-window state and its update contract
//!
//! This is the surface the UI layer drives: it owns the client-side room
//! list, the current selection, and the per-room history mirror. Once per
//! frame the UI calls [`ChatWindowState::apply_server_updates`] to drain the
//! inbound queue and fold messages into local state; submitted input goes
//! through [`ChatWindowState::submit_chat_input`], which also interprets the
//! local `/` commands. The engine never renders anything itself.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use tracing::{info, warn};

use crate::protocol::messages::{
    create_chat_send, create_room_create, create_room_destroy, create_room_history,
    create_room_join, message_value_or, Message, MessageType, Value, MAX_HISTORY_ENTRIES,
};
use crate::rooms::{
    is_valid_room_name, Room, RoomEvent, RoomManager, CHAT_ROOM_HISTORY_SIZE,
};
use crate::sync::{RingBuffer, ThreadSafeQueue};

/// Client-side room extras: whether a join has been issued for the room.
#[derive(Debug, Default)]
pub struct ClientRoomExt {
    joined: std::sync::atomic::AtomicBool,
}

impl ClientRoomExt {
    /// Mark the room joined; returns true when it was not joined before.
    fn mark_joined(&self) -> bool {
        !self.joined.swap(true, std::sync::atomic::Ordering::AcqRel)
    }
}

/// A chat room as mirrored by the client.
pub type ClientRoom = Room<ClientRoomExt>;

/// State changes the update hook reports back to the rendering layer.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatWindowEvent {
    /// The room list or the current selection changed.
    RoomsChanged,
    /// The history mirror for a room was rewritten from a server reply.
    HistoryRefreshed { room_name: String },
    /// One chat line arrived for a room.
    Chat { room_name: String, event: RoomEvent },
}

type HistoryMirror = HashMap<String, RingBuffer<RoomEvent, CHAT_ROOM_HISTORY_SIZE>>;

/// The chat-window state the client connection worker and the UI share.
pub struct ChatWindowState {
    /// Text the user has typed but not yet submitted.
    pub chat_input: String,
    /// Mirror of the worker's waiting-on-server flag, for display.
    pub waiting_on_server: bool,
    current_room_name: String,
    rooms: RoomManager<ClientRoomExt>,
    history: Mutex<HistoryMirror>,
}

impl ChatWindowState {
    /// Create an empty chat window with no rooms and no selection.
    pub fn new() -> Self {
        Self {
            chat_input: String::new(),
            waiting_on_server: false,
            current_room_name: String::new(),
            rooms: RoomManager::new(),
            history: Mutex::new(HashMap::new()),
        }
    }

    /// Name of the currently selected room, empty when there is none.
    pub fn current_room_name(&self) -> &str {
        &self.current_room_name
    }

    /// Known room names, in the order the server reported them.
    pub fn room_names(&self) -> Vec<String> {
        self.rooms.room_names()
    }

    /// Copy of the mirrored history for `room_name`, oldest first.
    pub fn history_snapshot(&self, room_name: &str) -> Vec<RoomEvent> {
        self.lock_history()
            .get(room_name)
            .map(|ring| ring.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Select `room_name` if it still exists, otherwise fall back to the
    /// first known room (or no selection at all).
    pub fn select_room_by_name(&mut self, room_name: &str) {
        if self.rooms.get(room_name).is_some() {
            self.current_room_name = room_name.to_owned();
        } else {
            self.current_room_name = self
                .rooms
                .rooms()
                .first()
                .map(|room| room.room_name().to_owned())
                .unwrap_or_default();
        }
    }

    fn lock_history(&self) -> std::sync::MutexGuard<'_, HistoryMirror> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Issue a ROOM_JOIN plus a history request for the current selection,
    /// unless we already joined it (or nothing is selected).
    fn issue_room_join_if_needed(&self, messages_out: &ThreadSafeQueue<Message>) {
        if self.current_room_name.is_empty() {
            return;
        }
        let Some(room) = self.rooms.get(&self.current_room_name) else {
            return;
        };
        if room.ext.mark_joined() {
            info!("Join issued for room: {}", room.room_name());
            messages_out.push(create_room_join(room.room_name()));
            info!("Requesting room history for room: {}", room.room_name());
            messages_out.push(create_room_history(room.room_name(), MAX_HISTORY_ENTRIES));
        }
    }

    /// The per-frame update hook: drain `messages_in` and fold every message
    /// into local state, emitting any needed requests onto `messages_out`.
    ///
    /// Returns the state changes the rendering layer should reflect.
    pub fn apply_server_updates(
        &mut self,
        messages_in: &ThreadSafeQueue<Message>,
        messages_out: &ThreadSafeQueue<Message>,
    ) -> Vec<ChatWindowEvent> {
        let mut ui_events = Vec::new();
        while let Some(message) = messages_in.pop() {
            match message.message_type {
                MessageType::RoomList => {
                    self.on_room_list(&message, messages_out);
                    ui_events.push(ChatWindowEvent::RoomsChanged);
                }
                MessageType::RoomCreate => {
                    if self.on_room_create(&message, messages_out) {
                        ui_events.push(ChatWindowEvent::RoomsChanged);
                    }
                }
                MessageType::RoomDestroy => {
                    if self.on_room_destroy(&message, messages_out) {
                        ui_events.push(ChatWindowEvent::RoomsChanged);
                    }
                }
                MessageType::RoomHistory => {
                    if let Some(room_name) = self.on_room_history(&message) {
                        ui_events.push(ChatWindowEvent::HistoryRefreshed { room_name });
                    }
                }
                MessageType::ChatEcho => {
                    let room_name = message_value_or(&message, "room_name", String::new());
                    let event = room_event_from_values(&message);
                    self.lock_history()
                        .entry(room_name.clone())
                        .or_default()
                        .insert(event.clone());
                    ui_events.push(ChatWindowEvent::Chat { room_name, event });
                }
                _ => {
                    warn!(
                        "Unhandled UI message type: {:#06x}",
                        message.message_type as u32
                    );
                }
            }
        }
        ui_events
    }

    fn on_room_list(&mut self, message: &Message, messages_out: &ThreadSafeQueue<Message>) {
        // remember the selection, rebuilding the list will clobber it
        let selected = self.current_room_name.clone();
        self.rooms.clear();
        let mut index = 0usize;
        while let Some(room_name) = message
            .values
            .get(&index.to_string())
            .and_then(Value::as_str)
        {
            if self.rooms.create_room(room_name).is_some() {
                info!("Created room: #{}", room_name);
            } else {
                warn!("Room already exists: #{}", room_name);
            }
            index += 1;
        }
        self.select_room_by_name(&selected);
        self.issue_room_join_if_needed(messages_out);
    }

    fn on_room_create(
        &mut self,
        message: &Message,
        messages_out: &ThreadSafeQueue<Message>,
    ) -> bool {
        let room_name = message_value_or(message, "room_name", String::new());
        let selected = self.current_room_name.clone();
        if self.rooms.create_room(&room_name).is_some() {
            info!("Created room: #{}", room_name);
            // re-select the previous room; defaults to the first room when
            // nothing was selected yet
            self.select_room_by_name(&selected);
            self.issue_room_join_if_needed(messages_out);
            true
        } else {
            warn!("Room already exists: #{}", room_name);
            false
        }
    }

    fn on_room_destroy(
        &mut self,
        message: &Message,
        messages_out: &ThreadSafeQueue<Message>,
    ) -> bool {
        let room_name = message_value_or(message, "room_name", String::new());
        let Some(room) = self.rooms.get(&room_name) else {
            return false;
        };
        info!("Destroyed room: #{}", room.room_name());
        room.request_destroy();
        self.rooms.remove_destroyed_rooms();
        self.lock_history().remove(&room_name);

        let selected = self.current_room_name.clone();
        self.select_room_by_name(&selected);
        if selected == room_name {
            // the room we were in was destroyed, join the new selection
            self.issue_room_join_if_needed(messages_out);
        }
        true
    }

    fn on_room_history(&mut self, message: &Message) -> Option<String> {
        let room_name = message_value_or(message, "room_name", String::new());
        self.rooms.get(&room_name)?;
        let events = room_history_message_to_events(message);
        let mut history = self.lock_history();
        let ring = history.entry(room_name.clone()).or_default();
        ring.reset();
        for event in events {
            ring.insert(event);
        }
        Some(room_name)
    }

    /// Submit the current chat input: interpret `/` commands locally, send
    /// everything else as a CHAT_SEND to the selected room.
    pub fn submit_chat_input(&mut self, messages_out: &ThreadSafeQueue<Message>) {
        if self.chat_input.is_empty() {
            return;
        }
        let input = std::mem::take(&mut self.chat_input);
        info!("Chat entry: {}", input);

        if input.starts_with('/') {
            let tokens: Vec<&str> = input.split_whitespace().collect();
            let command = tokens[0].to_ascii_lowercase();
            match command.as_str() {
                "/create_room" => {
                    if tokens.len() != 2 {
                        warn!("Usage: /create_room <room_name>");
                    } else if is_valid_room_name(tokens[1]) {
                        messages_out.push(create_room_create(tokens[1]));
                    } else {
                        warn!("create_room: '{}' is not a valid room name", tokens[1]);
                    }
                }
                "/destroy_room" => {
                    if tokens.len() != 2 {
                        warn!("Usage: /destroy_room <room_name>");
                    } else if let Some(room) = self.rooms.get(tokens[1]) {
                        messages_out.push(create_room_destroy(room.room_name()));
                    } else {
                        warn!("destroy_room: '{}' is not a known room name", tokens[1]);
                    }
                }
                _ => warn!("Unknown chat command: {}", command),
            }
        } else if !self.current_room_name.is_empty() {
            messages_out.push(create_chat_send(&self.current_room_name, input));
        } else {
            warn!("No room selected.");
        }
    }
}

impl Default for ChatWindowState {
    fn default() -> Self {
        Self::new()
    }
}

/// Build a [`RoomEvent`] from the flat values of a CHAT_ECHO message.
fn room_event_from_values(message: &Message) -> RoomEvent {
    RoomEvent {
        timestamp: message_value_or(message, "timestamp", 0),
        origin_user_name: message_value_or(message, "user_name", String::new()),
        event_text: message_value_or(message, "text", String::new()),
    }
}

fn map_entry<'a>(pairs: &'a [(Value, Value)], key: &str) -> Option<&'a Value> {
    pairs
        .iter()
        .find(|(k, _)| k.as_str() == Some(key))
        .map(|(_, v)| v)
}

/// Convert a ROOM_HISTORY reply back into its events, in the given order.
fn room_history_message_to_events(message: &Message) -> Vec<RoomEvent> {
    let mut events = Vec::new();
    if let Some(Value::Array(entries)) = message.values.get("events") {
        for entry in entries {
            let Value::Map(pairs) = entry else {
                warn!("Malformed room history entry, skipping.");
                continue;
            };
            events.push(RoomEvent {
                timestamp: map_entry(pairs, "timestamp")
                    .and_then(Value::as_i64)
                    .and_then(|n| i32::try_from(n).ok())
                    .unwrap_or(0),
                origin_user_name: map_entry(pairs, "user_name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned(),
                event_text: map_entry(pairs, "text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned(),
            });
        }
    }
    let event_count = message_value_or(message, "event_count", 0);
    if event_count as usize != events.len() {
        warn!("Event count mismatch: {} vs {}", event_count, events.len());
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::{
        add_room_history_event, create_chat_echo, create_room_list_reply,
    };

    fn queues() -> (ThreadSafeQueue<Message>, ThreadSafeQueue<Message>) {
        (ThreadSafeQueue::new(), ThreadSafeQueue::new())
    }

    fn seeded_state(rooms: &[&str]) -> (ChatWindowState, ThreadSafeQueue<Message>, ThreadSafeQueue<Message>) {
        let (messages_in, messages_out) = queues();
        let mut state = ChatWindowState::new();
        messages_in.push(create_room_list_reply(rooms.to_vec()));
        state.apply_server_updates(&messages_in, &messages_out);
        messages_out.drain();
        (state, messages_in, messages_out)
    }

    #[test]
    fn test_room_list_builds_rooms_and_joins_first() {
        let (messages_in, messages_out) = queues();
        let mut state = ChatWindowState::new();

        messages_in.push(create_room_list_reply(["lobby", "games"]));
        let events = state.apply_server_updates(&messages_in, &messages_out);

        assert_eq!(events, vec![ChatWindowEvent::RoomsChanged]);
        assert_eq!(state.room_names(), vec!["lobby", "games"]);
        assert_eq!(state.current_room_name(), "lobby");

        let sent = messages_out.drain();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].message_type, MessageType::RoomJoin);
        assert_eq!(sent[1].message_type, MessageType::RoomHistory);
        assert_eq!(
            message_value_or(&sent[0], "room_name", String::new()),
            "lobby"
        );
    }

    #[test]
    fn test_room_list_preserves_selection_by_name() {
        let (mut state, messages_in, messages_out) = seeded_state(&["lobby", "games"]);
        state.select_room_by_name("games");

        // a fresh list with the same rooms in a different order
        messages_in.push(create_room_list_reply(["games", "lobby"]));
        state.apply_server_updates(&messages_in, &messages_out);
        assert_eq!(state.current_room_name(), "games");

        // the rebuilt rooms are unjoined, so a join is issued again
        let sent = messages_out.drain();
        assert_eq!(sent[0].message_type, MessageType::RoomJoin);
        assert_eq!(
            message_value_or(&sent[0], "room_name", String::new()),
            "games"
        );
    }

    #[test]
    fn test_room_create_keeps_selection() {
        let (mut state, messages_in, messages_out) = seeded_state(&["lobby"]);

        messages_in.push(create_room_create("dev"));
        let events = state.apply_server_updates(&messages_in, &messages_out);

        assert_eq!(events, vec![ChatWindowEvent::RoomsChanged]);
        assert_eq!(state.room_names(), vec!["lobby", "dev"]);
        assert_eq!(state.current_room_name(), "lobby");
        // already joined to lobby, nothing new to send
        assert!(messages_out.is_empty());
    }

    #[test]
    fn test_room_create_with_no_selection_joins_it() {
        let (messages_in, messages_out) = queues();
        let mut state = ChatWindowState::new();

        messages_in.push(create_room_create("first"));
        state.apply_server_updates(&messages_in, &messages_out);

        assert_eq!(state.current_room_name(), "first");
        let sent = messages_out.drain();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].message_type, MessageType::RoomJoin);
    }

    #[test]
    fn test_destroying_current_room_moves_selection() {
        let (mut state, messages_in, messages_out) = seeded_state(&["lobby", "games"]);
        assert_eq!(state.current_room_name(), "lobby");

        messages_in.push(create_room_destroy("lobby"));
        state.apply_server_updates(&messages_in, &messages_out);

        assert_eq!(state.room_names(), vec!["games"]);
        assert_eq!(state.current_room_name(), "games");
        let sent = messages_out.drain();
        assert_eq!(sent[0].message_type, MessageType::RoomJoin);
        assert_eq!(
            message_value_or(&sent[0], "room_name", String::new()),
            "games"
        );
    }

    #[test]
    fn test_destroying_other_room_keeps_selection() {
        let (mut state, messages_in, messages_out) = seeded_state(&["lobby", "games"]);

        messages_in.push(create_room_destroy("games"));
        state.apply_server_updates(&messages_in, &messages_out);

        assert_eq!(state.current_room_name(), "lobby");
        assert!(messages_out.is_empty());
    }

    #[test]
    fn test_history_reply_rewrites_mirror() {
        let (mut state, messages_in, messages_out) = seeded_state(&["lobby"]);

        // an older line is already mirrored
        messages_in.push(create_chat_echo("lobby", "stale", "bob", 50));
        state.apply_server_updates(&messages_in, &messages_out);

        let mut reply = create_room_history("lobby", 0);
        add_room_history_event(&mut reply, 100, "alice", "one");
        add_room_history_event(&mut reply, 101, "bob", "two");
        messages_in.push(reply);
        let events = state.apply_server_updates(&messages_in, &messages_out);

        assert_eq!(
            events,
            vec![ChatWindowEvent::HistoryRefreshed {
                room_name: "lobby".to_string()
            }]
        );
        let history = state.history_snapshot("lobby");
        let texts: Vec<&str> = history.iter().map(|e| e.event_text.as_str()).collect();
        assert_eq!(texts, vec!["one", "two"]);
    }

    #[test]
    fn test_history_reply_for_unknown_room_is_dropped() {
        let (mut state, messages_in, messages_out) = seeded_state(&["lobby"]);

        let mut reply = create_room_history("nowhere", 0);
        add_room_history_event(&mut reply, 100, "alice", "lost");
        messages_in.push(reply);
        let events = state.apply_server_updates(&messages_in, &messages_out);
        assert!(events.is_empty());
        assert!(state.history_snapshot("nowhere").is_empty());
    }

    #[test]
    fn test_chat_echo_appends_to_mirror() {
        let (mut state, messages_in, messages_out) = seeded_state(&["lobby"]);

        messages_in.push(create_chat_echo("lobby", "hello", "alice", 123));
        let events = state.apply_server_updates(&messages_in, &messages_out);

        assert_eq!(events.len(), 1);
        match &events[0] {
            ChatWindowEvent::Chat { room_name, event } => {
                assert_eq!(room_name, "lobby");
                assert_eq!(event.origin_user_name, "alice");
                assert_eq!(event.event_text, "hello");
                assert_eq!(event.timestamp, 123);
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(state.history_snapshot("lobby").len(), 1);
    }

    #[test]
    fn test_chat_echo_evicts_oldest_when_full() {
        let (mut state, messages_in, messages_out) = seeded_state(&["lobby"]);

        for i in 0..(CHAT_ROOM_HISTORY_SIZE as i32 + 100) {
            messages_in.push(create_chat_echo("lobby", format!("line {}", i), "alice", i));
            state.apply_server_updates(&messages_in, &messages_out);
        }

        let history = state.history_snapshot("lobby");
        assert_eq!(history.len(), CHAT_ROOM_HISTORY_SIZE - 1);
        assert_eq!(history.last().unwrap().event_text, "line 1099");
    }

    #[test]
    fn test_command_create_room() {
        let (mut state, _messages_in, messages_out) = seeded_state(&["lobby"]);

        state.chat_input = "/create_room new-room".to_string();
        state.submit_chat_input(&messages_out);
        let sent = messages_out.drain();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].message_type, MessageType::RoomCreate);

        // invalid name is rejected locally
        state.chat_input = "/create_room -bad".to_string();
        state.submit_chat_input(&messages_out);
        assert!(messages_out.is_empty());

        // wrong arity is rejected locally
        state.chat_input = "/create_room one two".to_string();
        state.submit_chat_input(&messages_out);
        assert!(messages_out.is_empty());
    }

    #[test]
    fn test_command_destroy_room() {
        let (mut state, _messages_in, messages_out) = seeded_state(&["lobby"]);

        state.chat_input = "/destroy_room lobby".to_string();
        state.submit_chat_input(&messages_out);
        let sent = messages_out.drain();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].message_type, MessageType::RoomDestroy);

        state.chat_input = "/destroy_room nowhere".to_string();
        state.submit_chat_input(&messages_out);
        assert!(messages_out.is_empty());
    }

    #[test]
    fn test_unknown_command_is_rejected_locally() {
        let (mut state, _messages_in, messages_out) = seeded_state(&["lobby"]);
        state.chat_input = "/frobnicate now".to_string();
        state.submit_chat_input(&messages_out);
        assert!(messages_out.is_empty());
    }

    #[test]
    fn test_plain_input_becomes_chat_send() {
        let (mut state, _messages_in, messages_out) = seeded_state(&["lobby"]);
        state.chat_input = "hello everyone".to_string();
        state.submit_chat_input(&messages_out);

        let sent = messages_out.drain();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].message_type, MessageType::ChatSend);
        assert_eq!(
            message_value_or(&sent[0], "room_name", String::new()),
            "lobby"
        );
        assert_eq!(
            message_value_or(&sent[0], "text", String::new()),
            "hello everyone"
        );
        assert!(state.chat_input.is_empty());
    }

    #[test]
    fn test_input_without_selection_goes_nowhere() {
        let (_messages_in, messages_out) = queues();
        let mut state = ChatWindowState::new();
        state.chat_input = "hello?".to_string();
        state.submit_chat_input(&messages_out);
        assert!(messages_out.is_empty());
    }
}
