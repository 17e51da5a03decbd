use std::{collections::HashMap, fmt, sync::{Mutex, MutexGuard, PoisonError}};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Transport session identifier. A user keeps their `id` across reconnects,
/// but each socket gets a fresh one of these.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A user's presence in one room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: String,
    #[serde(rename = "username")]
    pub display_name: String,
    pub connection_id: ConnectionId,
    pub online: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub joined_at: OffsetDateTime,
}

impl Participant {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>, connection_id: ConnectionId) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            connection_id,
            online: true,
            joined_at: OffsetDateTime::now_utc(),
        }
    }
}

/// Who is online in which room.
///
/// Each room keeps its participants in join order. Rooms are small, so
/// lookups by id or connection are linear scans. The lock is only ever held
/// for the duration of one call.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: Mutex<HashMap<String, Vec<Participant>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn rooms(&self) -> MutexGuard<'_, HashMap<String, Vec<Participant>>> {
        self.rooms.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts `participant`, replacing any entry with the same id, and
    /// returns the room's list in join order.
    pub fn join(&self, room_id: &str, participant: Participant) -> Vec<Participant> {
        let mut rooms = self.rooms();
        let participants = rooms.entry(room_id.to_owned()).or_default();

        participants.retain(|p| p.id != participant.id);
        participants.push(participant);

        participants.clone()
    }

    /// Removes `user_id` from the room. Returns false if they weren't there.
    pub fn leave(&self, room_id: &str, user_id: &str) -> bool {
        let mut rooms = self.rooms();
        let Some(participants) = rooms.get_mut(room_id) else {
            return false;
        };

        let before = participants.len();
        participants.retain(|p| p.id != user_id);
        let removed = participants.len() != before;

        if participants.is_empty() {
            rooms.remove(room_id);
        }

        removed
    }

    /// Drops every participant bound to `connection_id` across all rooms and
    /// returns the `(room_id, user_id)` pairs that went away.
    pub fn leave_by_connection(&self, connection_id: &ConnectionId) -> Vec<(String, String)> {
        let mut rooms = self.rooms();
        let mut removed = Vec::new();

        for (room_id, participants) in rooms.iter_mut() {
            participants.retain(|p| {
                if p.connection_id == *connection_id {
                    removed.push((room_id.clone(), p.id.clone()));
                    false
                } else {
                    true
                }
            });
        }
        rooms.retain(|_, participants| !participants.is_empty());

        removed
    }

    pub fn list_online(&self, room_id: &str) -> Vec<Participant> {
        self.rooms()
            .get(room_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Rooms that currently have at least one participant.
    pub fn rooms_in_use(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.rooms().keys().cloned().collect();
        ids.sort();
        ids
    }
}
