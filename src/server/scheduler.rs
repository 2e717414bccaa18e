//! The server scheduler: one tick loop owning all room state
//!
//! The scheduler is the sole mutator of the room set and the per-room
//! history store. Each tick fans in messages from every client's inbound
//! queue, mutates room state, then fans out: lifecycle announcements go to
//! every client, chat events only to the clients joined to the room. Room
//! destruction is swept at the end of the tick, so a final CHAT_ECHO can
//! still precede the ROOM_DESTROY but never follow it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::pace_loop;
use crate::protocol::messages::{
    add_room_history_event, create_chat_echo, create_room_create, create_room_destroy,
    create_room_history, create_room_list_reply, message_value_or, Message, MessageType,
    MAX_HISTORY_ENTRIES,
};
use crate::rooms::{Room, RoomEvent, RoomManager, CHAT_ROOM_HISTORY_SIZE};
use crate::server::connection_manager::{ClientConnectionManager, ClientSession, ServerStream};
use crate::sync::{RingBuffer, ThreadSafeQueue};

/// Target maximum ms for one scheduler tick.
pub const TARGET_SERVER_LOOP_MS: u64 = 20;

/// Server-side room extras: the joined clients and the pending event queue.
///
/// Rooms hold weak handles so a room can never keep a dead session alive;
/// the connection manager owns the strong references.
pub struct ServerRoomExt<S = ServerStream> {
    joined_clients: Mutex<Vec<Weak<ClientSession<S>>>>,
    /// Chat events awaiting distribution to the joined clients.
    pub events: ThreadSafeQueue<RoomEvent>,
}

impl<S> Default for ServerRoomExt<S> {
    fn default() -> Self {
        Self {
            joined_clients: Mutex::new(Vec::new()),
            events: ThreadSafeQueue::new(),
        }
    }
}

impl<S> ServerRoomExt<S> {
    fn lock_joined(&self) -> std::sync::MutexGuard<'_, Vec<Weak<ClientSession<S>>>> {
        self.joined_clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark `client` as joined to this room. Joining twice is a no-op.
    pub fn join(&self, client: &Arc<ClientSession<S>>) {
        let handle = Arc::downgrade(client);
        let mut joined = self.lock_joined();
        if !joined.iter().any(|existing| existing.ptr_eq(&handle)) {
            joined.push(handle);
        }
    }

    /// Drop handles to sessions that no longer exist.
    pub fn clean_expired_clients(&self) {
        self.lock_joined().retain(|weak| weak.strong_count() > 0);
    }

    /// The still-live joined clients.
    pub fn joined_clients(&self) -> Vec<Arc<ClientSession<S>>> {
        self.lock_joined().iter().filter_map(Weak::upgrade).collect()
    }
}

/// A chat room as managed by the server scheduler.
pub type ServerRoom<S = ServerStream> = Room<ServerRoomExt<S>>;

type RoomHistory = HashMap<String, RingBuffer<RoomEvent, CHAT_ROOM_HISTORY_SIZE>>;

/// Convert the pending events of `room` into CHAT_ECHO messages.
fn room_events_to_messages<S>(room: &ServerRoom<S>) -> Vec<Message> {
    let mut messages = Vec::new();
    while let Some(event) = room.ext.events.pop() {
        messages.push(create_chat_echo(
            room.room_name(),
            event.event_text,
            event.origin_user_name,
            event.timestamp,
        ));
    }
    messages
}

/// Record `event` as part of the history of `room_name`.
fn insert_event_into_room_history(history: &mut RoomHistory, room_name: &str, event: RoomEvent) {
    history.entry(room_name.to_owned()).or_default().insert(event);
}

/// Pack the newest `max_events` history entries of `room_name` into a
/// ROOM_HISTORY reply, oldest first.
fn room_history_reply(history: &RoomHistory, room_name: &str, max_events: usize) -> Message {
    let mut reply = create_room_history(room_name, 0);
    if let Some(ring) = history.get(room_name) {
        let newest: Vec<&RoomEvent> = ring.iter_rev().take(max_events).collect();
        for event in newest.into_iter().rev() {
            add_room_history_event(
                &mut reply,
                event.timestamp,
                event.origin_user_name.as_str(),
                event.event_text.as_str(),
            );
        }
    }
    reply
}

/// The authoritative room set and history store behind the tick loop.
struct SchedulerState<S> {
    rooms: RoomManager<ServerRoomExt<S>>,
    history: RoomHistory,
}

impl<S> SchedulerState<S> {
    fn new(initial_rooms: &[String]) -> Self {
        let mut rooms = RoomManager::new();
        for room_name in initial_rooms {
            match rooms.create_room(room_name) {
                Some(room) => info!("Room created: #{}", room.room_name()),
                None => warn!("Room already exists or invalid name: #{}", room_name),
            }
        }
        Self {
            rooms,
            history: HashMap::new(),
        }
    }

    /// Run one scheduler tick over the given snapshot of active clients.
    fn tick(&mut self, clients: &[Arc<ClientSession<S>>]) {
        let mut new_rooms: Vec<String> = Vec::new();
        let mut destroyed_rooms: Vec<String> = Vec::new();

        // Step 1. Gather all messages from clients and mutate room state
        for client in clients {
            while let Some(message) = client.connection.messages_in.pop() {
                self.dispatch(client, &message, &mut new_rooms, &mut destroyed_rooms);
            }
        }

        // Step 2. Notify everyone of created and destroyed rooms
        for room_name in &new_rooms {
            let message = create_room_create(room_name.as_str());
            for client in clients {
                client.connection.messages_out.push(message.clone());
            }
        }
        for room_name in &destroyed_rooms {
            let message = create_room_destroy(room_name.as_str());
            for client in clients {
                client.connection.messages_out.push(message.clone());
            }
        }

        // Step 3. Distribute room events to joined clients only
        for room in self.rooms.rooms() {
            room.ext.clean_expired_clients();
            let messages = room_events_to_messages(room);
            if messages.is_empty() {
                continue;
            }
            for client in room.ext.joined_clients() {
                for message in &messages {
                    client.connection.messages_out.push(message.clone());
                }
            }
        }

        // Step 4. Clean up destroyed rooms and their history
        for room_name in &destroyed_rooms {
            self.history.remove(room_name);
        }
        self.rooms.remove_destroyed_rooms();
    }

    fn dispatch(
        &mut self,
        client: &Arc<ClientSession<S>>,
        message: &Message,
        new_rooms: &mut Vec<String>,
        destroyed_rooms: &mut Vec<String>,
    ) {
        match message.message_type {
            MessageType::RoomList => {
                // client requested the room list, send it back
                client
                    .connection
                    .messages_out
                    .push(create_room_list_reply(self.rooms.room_names()));
            }
            MessageType::RoomCreate => {
                let room_name = message_value_or(message, "room_name", String::new());
                if let Some(room) = self.rooms.create_room(&room_name) {
                    info!("Room created (client request): #{}", room.room_name());
                    room.ext.join(client);
                    new_rooms.push(room_name);
                } else {
                    warn!(
                        "Room already exists or invalid name (client create request): #{}",
                        room_name
                    );
                }
            }
            MessageType::RoomJoin => {
                let room_name = message_value_or(message, "room_name", String::new());
                if let Some(room) = self.rooms.get(&room_name) {
                    room.ext.join(client);
                } else {
                    warn!("Room does not exist (client join request): #{}", room_name);
                }
            }
            MessageType::RoomDestroy => {
                let room_name = message_value_or(message, "room_name", String::new());
                if let Some(room) = self.rooms.get(&room_name) {
                    room.request_destroy();
                    destroyed_rooms.push(room_name);
                } else {
                    warn!(
                        "Room does not exist (client destroy request): #{}",
                        room_name
                    );
                }
            }
            MessageType::RoomHistory => {
                let room_name = message_value_or(message, "room_name", String::new());
                let event_count = message_value_or(message, "event_count", 0);
                let room = self.rooms.get(&room_name);
                if (0..=MAX_HISTORY_ENTRIES).contains(&event_count) && room.is_some() {
                    client.connection.messages_out.push(room_history_reply(
                        &self.history,
                        &room_name,
                        event_count as usize,
                    ));
                } else {
                    warn!(
                        "Invalid room history request: name '{}', count {}",
                        room_name, event_count
                    );
                }
            }
            MessageType::ChatSend => {
                let room_name = message_value_or(message, "room_name", String::new());
                if let Some(room) = self.rooms.get(&room_name) {
                    let event = RoomEvent::now(
                        client.user_name().unwrap_or_default(),
                        message_value_or(message, "text", String::new()),
                    );
                    insert_event_into_room_history(&mut self.history, room.room_name(), event.clone());
                    room.ext.events.push(event);
                } else {
                    warn!("Client sent message to unknown room: {}", room_name);
                }
            }
            _ => {
                warn!(
                    "Client sent unhandled message type: {:#06x}",
                    message.message_type as u32
                );
            }
        }
    }
}

/// Main server work loop distributing messages between all clients.
///
/// Creates the initial rooms, signals `ready`, then ticks until the
/// connection manager stops accepting.
pub async fn server_worker(
    config: ServerConfig,
    connections: Arc<ClientConnectionManager>,
    ready: oneshot::Sender<()>,
) {
    info!("Server worker starting.");

    info!("Creating initial rooms ...");
    let mut state: SchedulerState<ServerStream> = SchedulerState::new(&config.initial_rooms);
    info!("All rooms created.");

    // the main task holds off accepting connections until rooms exist
    let _ = ready.send(());

    info!("Server work loop starting ...");
    while connections.is_accepting_connections() {
        let loop_start = Instant::now();
        state.tick(&connections.get_active_connections());
        pace_loop(
            loop_start,
            Duration::from_millis(TARGET_SERVER_LOOP_MS),
            "Server worker",
        )
        .await;
    }

    info!("Server worker exiting.");
}
