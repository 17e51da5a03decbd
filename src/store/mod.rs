mod memory;
mod sqlite;

use async_trait::async_trait;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::rooms::{Message, NewMessage};

/// Messages kept per room.
pub const HISTORY_LIMIT: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("can't format message timestamp: {0}")]
    TimestampFormat(#[from] time::error::Format),

    #[error("bad timestamp in stored message {id}: {source}")]
    TimestampParse {
        id: String,
        #[source]
        source: time::error::Parse,
    },
}

/// Bounded per-room message history.
///
/// `append` assigns the id (and a timestamp when the caller gave none) and
/// returns exactly what was stored. `history` is oldest first and never longer
/// than [`HISTORY_LIMIT`]; a room nobody has written to has an empty history.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn append(&self, msg: NewMessage) -> Result<Message, StoreError>;

    async fn history(&self, room_id: &str) -> Result<Vec<Message>, StoreError>;
}
