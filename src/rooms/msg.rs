use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// A chat message as accepted into a room's history.
///
/// Immutable once the store hands it back; the same value is persisted and
/// broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub room_id: String,
    pub user_id: String,
    pub username: String,
    pub content: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// A message before the store has given it an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub room_id: String,
    pub user_id: String,
    pub username: String,
    pub content: String,
    pub timestamp: Option<OffsetDateTime>,
}

impl NewMessage {
    /// Stamps the message with a fresh id, keeping a caller-supplied timestamp.
    pub(crate) fn into_message(self) -> Message {
        let NewMessage { room_id, user_id, username, content, timestamp } = self;

        Message {
            id: new_message_id(),
            room_id,
            user_id,
            username,
            content,
            timestamp: timestamp.unwrap_or_else(OffsetDateTime::now_utc),
        }
    }
}

// now_v7 shares a process-wide counter, so ids minted within the same
// millisecond are still strictly increasing.
pub(crate) fn new_message_id() -> String {
    Uuid::now_v7().to_string()
}
