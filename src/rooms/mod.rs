//! Chat rooms and the room set
//!
//! A [`Room`] is shared state: the scheduler and the workers hold it behind
//! an `Arc`, so the destroy flag is atomic and endpoint-specific extras
//! manage their own interior mutability. The [`RoomManager`] keeps names
//! unique and preserves creation order, which is the order the room list is
//! reported in.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::current_timestamp;

/// Maximum number of characters allowed in room names.
pub const MAX_ROOM_NAME_SIZE: usize = 25;

/// Maximum amount of chat room history retained per room.
pub const CHAT_ROOM_HISTORY_SIZE: usize = 1000;

/// Checks if `room_name` is in a valid format.
///
/// Rules:
/// - cannot be empty or longer than [`MAX_ROOM_NAME_SIZE`]
/// - may only contain ASCII alphanumeric characters or hyphen (-)
/// - may only begin and end with alphanumeric characters
pub fn is_valid_room_name(room_name: &str) -> bool {
    if room_name.is_empty() || room_name.len() > MAX_ROOM_NAME_SIZE {
        return false;
    }
    if room_name.starts_with('-') || room_name.ends_with('-') {
        return false;
    }
    room_name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// An individual event that occurred in a chat room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomEvent {
    /// Seconds since epoch when the event occurred.
    pub timestamp: i32,
    /// The user that originated the event, if any.
    pub origin_user_name: String,
    /// Event text to be displayed.
    pub event_text: String,
}

impl RoomEvent {
    /// Create an event stamped with the current time.
    pub fn now(origin_user_name: impl Into<String>, event_text: impl Into<String>) -> Self {
        Self {
            timestamp: current_timestamp(),
            origin_user_name: origin_user_name.into(),
            event_text: event_text.into(),
        }
    }
}

/// A chat room: an immutable name, a destroy-requested flag, and
/// endpoint-specific extras `E` (joined clients and the event queue on the
/// server, the joined flag on the client).
#[derive(Debug)]
pub struct Room<E> {
    name: String,
    destroy_requested: AtomicBool,
    /// Endpoint-specific room state.
    pub ext: E,
}

impl<E: Default> Room<E> {
    /// Create a room named `name`. Validation is the manager's job.
    fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            destroy_requested: AtomicBool::new(false),
            ext: E::default(),
        }
    }
}

impl<E> Room<E> {
    /// The room's unique name.
    pub fn room_name(&self) -> &str {
        &self.name
    }

    /// Should this room be destroyed on the next sweep?
    pub fn is_destroy_requested(&self) -> bool {
        self.destroy_requested.load(Ordering::Acquire)
    }

    /// Mark this room to be destroyed.
    pub fn request_destroy(&self) {
        self.destroy_requested.store(true, Ordering::Release);
    }
}

/// Manages an ordered set of chat rooms keyed by unique name.
#[derive(Debug, Default)]
pub struct RoomManager<E> {
    active_rooms: Vec<Arc<Room<E>>>,
}

impl<E: Default> RoomManager<E> {
    /// Create an empty room manager.
    pub fn new() -> Self {
        Self {
            active_rooms: Vec::new(),
        }
    }

    /// Create a new room named `room_name` and add it to the set.
    ///
    /// Returns `None` if the name is invalid or already taken
    /// (case-sensitive).
    pub fn create_room(&mut self, room_name: &str) -> Option<Arc<Room<E>>> {
        if !is_valid_room_name(room_name) {
            return None;
        }
        if self.get(room_name).is_some() {
            return None;
        }
        let room = Arc::new(Room::new(room_name));
        self.active_rooms.push(Arc::clone(&room));
        Some(room)
    }

    /// Retrieve a room by name.
    pub fn get(&self, room_name: &str) -> Option<Arc<Room<E>>> {
        self.active_rooms
            .iter()
            .find(|room| room.name == room_name)
            .cloned()
    }

    /// The active rooms, in creation order.
    pub fn rooms(&self) -> &[Arc<Room<E>>] {
        &self.active_rooms
    }

    /// The active room names, in creation order.
    pub fn room_names(&self) -> Vec<String> {
        self.active_rooms
            .iter()
            .map(|room| room.name.clone())
            .collect()
    }

    /// Remove all rooms marked for destruction.
    pub fn remove_destroyed_rooms(&mut self) {
        self.active_rooms
            .retain(|room| !room.is_destroy_requested());
    }

    /// Remove all rooms.
    pub fn clear(&mut self) {
        self.active_rooms.clear();
    }

    /// Number of active rooms.
    pub fn len(&self) -> usize {
        self.active_rooms.len()
    }

    /// Check whether the set holds no rooms.
    pub fn is_empty(&self) -> bool {
        self.active_rooms.is_empty()
    }
}
