use std::{collections::{HashMap, VecDeque}, sync::{Mutex, PoisonError}};

use async_trait::async_trait;

use crate::rooms::{Message, NewMessage};

use super::{MessageStore, StoreError, HISTORY_LIMIT};

/// In-process ring buffer per room. Gone on restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rooms: Mutex<HashMap<String, VecDeque<Message>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn append(&self, msg: NewMessage) -> Result<Message, StoreError> {
        let msg = msg.into_message();

        let mut rooms = self.rooms.lock().unwrap_or_else(PoisonError::into_inner);
        let history = rooms.entry(msg.room_id.clone()).or_default();
        history.push_back(msg.clone());
        while history.len() > HISTORY_LIMIT {
            history.pop_front();
        }

        Ok(msg)
    }

    async fn history(&self, room_id: &str) -> Result<Vec<Message>, StoreError> {
        let rooms = self.rooms.lock().unwrap_or_else(PoisonError::into_inner);

        Ok(
            rooms.get(room_id)
                .map(|history| history.iter().cloned().collect())
                .unwrap_or_default()
        )
    }
}
