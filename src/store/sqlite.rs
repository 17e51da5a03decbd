use async_trait::async_trait;
use sqlx::SqlitePool;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::rooms::{Message, NewMessage};

use super::{MessageStore, StoreError, HISTORY_LIMIT};

type MessageRow = (String, String, String, String, String, String);

/// History persisted in SQLite, so it survives restarts and can be shared by
/// several processes pointed at the same file.
///
/// Every call goes to the database and can fail. Callers that need per-room
/// ordering must serialize their appends; the store itself doesn't.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    db_pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(db_pool: SqlitePool) -> Self {
        Self { db_pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.db_pool
    }

    /// Writes `msg` and trims the room back to the retention window. Returns
    /// the row's sequence number.
    pub async fn insert_message(&self, msg: &Message) -> Result<i64, StoreError> {
        let created_at = msg.timestamp.format(&Rfc3339)?;

        let mut tx = self.db_pool.begin().await?;
        let seq = sqlx::query("INSERT INTO messages (id,room_id,user_id,username,content,created_at) VALUES (?,?,?,?,?,?)")
            .bind(&msg.id)
            .bind(&msg.room_id)
            .bind(&msg.user_id)
            .bind(&msg.username)
            .bind(&msg.content)
            .bind(created_at)
            .execute(&mut *tx)
            .await?
            .last_insert_rowid();

        sqlx::query("DELETE FROM messages WHERE room_id=? AND seq NOT IN (SELECT seq FROM messages WHERE room_id=? ORDER BY seq DESC LIMIT ?)")
            .bind(&msg.room_id)
            .bind(&msg.room_id)
            .bind(HISTORY_LIMIT as i64)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(seq)
    }

    /// The newest `limit` messages of a room, oldest first.
    pub async fn query_recent_messages(&self, room_id: &str, limit: usize) -> Result<Vec<Message>, StoreError> {
        let rows: Vec<MessageRow> =
            sqlx::query_as("SELECT id,room_id,user_id,username,content,created_at FROM messages WHERE room_id=? ORDER BY seq DESC LIMIT ?")
                .bind(room_id)
                .bind(limit as i64)
                .fetch_all(&self.db_pool)
                .await?;

        let mut msgs = rows.into_iter()
            .map(row_to_msg)
            .collect::<Result<Vec<_>, _>>()?;
        msgs.reverse();

        Ok(msgs)
    }
}

fn row_to_msg((id, room_id, user_id, username, content, created_at): MessageRow) -> Result<Message, StoreError> {
    let timestamp = match OffsetDateTime::parse(&created_at, &Rfc3339) {
        Ok(timestamp) => timestamp,
        Err(source) => return Err(StoreError::TimestampParse { id, source }),
    };

    Ok(Message { id, room_id, user_id, username, content, timestamp })
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn append(&self, msg: NewMessage) -> Result<Message, StoreError> {
        let msg = msg.into_message();
        self.insert_message(&msg).await?;
        Ok(msg)
    }

    async fn history(&self, room_id: &str) -> Result<Vec<Message>, StoreError> {
        self.query_recent_messages(room_id, HISTORY_LIMIT).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    async fn store() -> SqliteStore {
        // one connection, or every checkout would see a fresh in-memory db
        let db_pool = db::connect("sqlite::memory:", 1).await.unwrap();
        SqliteStore::new(db_pool)
    }

    fn new_message(room_id: &str, content: String) -> NewMessage {
        NewMessage {
            room_id: room_id.to_owned(),
            user_id: "u1".to_owned(),
            username: "Calm Whale".to_owned(),
            content,
            timestamp: None,
        }
    }

    #[tokio::test]
    async fn unknown_room_has_empty_history() {
        let store = store().await;

        assert!(store.history("nowhere").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn append_round_trips_through_the_database() {
        let store = store().await;
        let at = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();

        let stored = store.append(NewMessage { timestamp: Some(at), ..new_message("r1", "hi".to_owned()) }).await.unwrap();
        let history = store.history("r1").await.unwrap();

        assert_eq!(history, [stored.clone()]);
        assert_eq!(stored.timestamp, at);
        assert_eq!(stored.content, "hi");
    }

    #[tokio::test]
    async fn history_is_bounded_and_oldest_first() {
        let store = store().await;

        for i in 0..130 {
            store.append(new_message("r1", format!("m{i}"))).await.unwrap();
        }
        store.append(new_message("r2", "other".to_owned())).await.unwrap();

        let contents: Vec<String> = store.history("r1").await.unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        let expected: Vec<String> = (30..130).map(|i| format!("m{i}")).collect();
        assert_eq!(contents, expected);
        assert_eq!(store.history("r2").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn old_rows_are_pruned() {
        let store = store().await;

        for i in 0..120 {
            store.append(new_message("r1", format!("m{i}"))).await.unwrap();
        }

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM messages WHERE room_id=?")
            .bind("r1")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(count, HISTORY_LIMIT as i64);
    }

    #[tokio::test]
    async fn insert_returns_increasing_sequence() {
        let store = store().await;

        let first = store.insert_message(&new_message("r1", "a".to_owned()).into_message()).await.unwrap();
        let second = store.insert_message(&new_message("r1", "b".to_owned()).into_message()).await.unwrap();

        assert!(second > first);
    }

    #[tokio::test]
    async fn closed_pool_surfaces_database_error() {
        let store = store().await;
        store.pool().close().await;

        let err = store.append(new_message("r1", "lost".to_owned())).await.unwrap_err();
        assert!(matches!(err, StoreError::Database(_)));
    }
}
