use std::{collections::HashMap, sync::{Arc, Mutex, PoisonError}};

use tokio::sync::OwnedMutexGuard;

use crate::{
    events::{ClientEvent, Instruction, JoinRoom, LeaveRoom, SendMessage, ServerEvent, Transport},
    store::{MessageStore, StoreError},
};

use super::{ConnectionId, Message, NewMessage, Participant, RoomRegistry};

/// Turns inbound events into registry/store changes and outbound emits.
///
/// Presence lives in the relay's own [`RoomRegistry`]; history lives in
/// whichever [`MessageStore`] it was built with. Work on one room runs under
/// that room's lock, so what lands in a room's history is in the same order
/// as what was broadcast to it, no matter how long the store takes.
pub struct Relay {
    registry: RoomRegistry,
    store: Arc<dyn MessageStore>,
    transport: Arc<dyn Transport>,
    room_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

struct RoomTurn<'a> {
    relay: &'a Relay,
    room_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for RoomTurn<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.relay.release_room_lock(&self.room_id);
    }
}

impl Relay {
    pub fn new(store: Arc<dyn MessageStore>, transport: Arc<dyn Transport>) -> Self {
        Self {
            registry: RoomRegistry::new(),
            store,
            transport,
            room_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Waits for this room's turn. Dropping the returned guard hands the turn
    /// on, and forgets the room's lock once nobody else holds or awaits it.
    async fn lock_room(&self, room_id: &str) -> RoomTurn<'_> {
        let lock = self.room_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(room_id.to_owned())
            .or_default()
            .clone();

        RoomTurn {
            relay: self,
            room_id: room_id.to_owned(),
            guard: Some(lock.lock_owned().await),
        }
    }

    fn release_room_lock(&self, room_id: &str) {
        let mut room_locks = self.room_locks.lock().unwrap_or_else(PoisonError::into_inner);
        // the map's own handle is the only one left
        if room_locks.get(room_id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            room_locks.remove(room_id);
        }
    }

    fn emit(&self, out: &mut Vec<Instruction>, instruction: Instruction) {
        instruction.apply(self.transport.as_ref());
        out.push(instruction);
    }

    /// Parses one text frame from `connection_id` and acts on it. A frame
    /// that doesn't parse gets an `error` back to its sender and nothing else.
    pub async fn handle_text(&self, connection_id: &ConnectionId, text: &str) -> Vec<Instruction> {
        match ClientEvent::parse(text) {
            Ok(event) => self.handle(connection_id, event).await,
            Err(err) => {
                tracing::warn!(connection_id = %connection_id, "dropping frame: {err}");

                let mut out = Vec::new();
                self.emit(&mut out, Instruction::EmitToConnection {
                    connection_id: connection_id.clone(),
                    event: ServerEvent::Error { message: err.to_string() },
                });
                out
            }
        }
    }

    pub async fn handle(&self, connection_id: &ConnectionId, event: ClientEvent) -> Vec<Instruction> {
        match event {
            ClientEvent::JoinRoom(join) => self.join(connection_id, join).await,
            ClientEvent::LeaveRoom(leave) => self.leave(connection_id, leave).await,
            ClientEvent::SendMessage(send) => self.send(connection_id, send).await,
        }
    }

    pub async fn join(&self, connection_id: &ConnectionId, JoinRoom { user_id, username, room_id }: JoinRoom) -> Vec<Instruction> {
        let _turn = self.lock_room(&room_id).await;
        let mut out = Vec::new();

        tracing::info!(room_id = %room_id, user_id = %user_id, connection_id = %connection_id, "{username} joined");

        self.emit(&mut out, Instruction::JoinGroup {
            connection_id: connection_id.clone(),
            room_id: room_id.clone(),
        });

        let participant = Participant::new(user_id, username, connection_id.clone());
        let online = self.registry.join(&room_id, participant.clone());

        self.emit(&mut out, Instruction::EmitToRoom {
            room_id: room_id.clone(),
            event: ServerEvent::OnlineUsers(online),
        });
        self.emit(&mut out, Instruction::EmitToRoomExcept {
            room_id: room_id.clone(),
            except: connection_id.clone(),
            event: ServerEvent::UserConnected(participant),
        });

        let history = match self.store.history(&room_id).await {
            Ok(history) => history,
            Err(err) => {
                tracing::warn!(room_id = %room_id, "history unavailable, sending none: {err}");
                Vec::new()
            }
        };
        self.emit(&mut out, Instruction::EmitToConnection {
            connection_id: connection_id.clone(),
            event: ServerEvent::MessageHistory(history),
        });

        out
    }

    pub async fn leave(&self, connection_id: &ConnectionId, LeaveRoom { user_id, room_id }: LeaveRoom) -> Vec<Instruction> {
        let _turn = self.lock_room(&room_id).await;
        let mut out = Vec::new();

        if self.registry.leave(&room_id, &user_id) {
            tracing::info!(room_id = %room_id, user_id = %user_id, "left");
            self.emit(&mut out, Instruction::EmitToRoomExcept {
                room_id: room_id.clone(),
                except: connection_id.clone(),
                event: ServerEvent::UserDisconnected(user_id),
            });
        }

        self.emit(&mut out, Instruction::LeaveGroup {
            connection_id: connection_id.clone(),
            room_id,
        });

        out
    }

    /// Stores and broadcasts a message. A store failure costs the message its
    /// place in history but it is still relayed live.
    pub async fn send(&self, connection_id: &ConnectionId, send: SendMessage) -> Vec<Instruction> {
        let room_id = send.room_id.clone();
        let _turn = self.lock_room(&room_id).await;
        let mut out = Vec::new();

        let new_msg = NewMessage::from(send);
        let msg = match self.store.append(new_msg.clone()).await {
            Ok(msg) => msg,
            Err(err) => {
                tracing::warn!(room_id = %room_id, connection_id = %connection_id, "message not persisted, relaying anyway: {err}");
                new_msg.into_message()
            }
        };

        self.emit(&mut out, Instruction::EmitToRoom {
            room_id,
            event: ServerEvent::NewMessage(msg),
        });

        out
    }

    /// Transport lost `connection_id`; every room it was present in hears
    /// about it once per user removed.
    ///
    /// The registry forgets the connection before any room lock is taken. A
    /// rejoin already queued on one of those locks can therefore broadcast an
    /// `online_users` that includes the user ahead of this `user_disconnected`.
    /// Clients see a stale notice until the room's next presence event.
    pub async fn disconnect(&self, connection_id: &ConnectionId) -> Vec<Instruction> {
        let removed = self.registry.leave_by_connection(connection_id);
        let mut out = Vec::new();

        tracing::info!(connection_id = %connection_id, rooms = removed.len(), "disconnected");

        for (room_id, user_id) in removed {
            let _turn = self.lock_room(&room_id).await;

            self.emit(&mut out, Instruction::EmitToRoom {
                room_id,
                event: ServerEvent::UserDisconnected(user_id),
            });
        }

        out
    }

    pub fn online(&self, room_id: &str) -> Vec<Participant> {
        self.registry.list_online(room_id)
    }

    pub fn rooms(&self) -> Vec<String> {
        self.registry.rooms_in_use()
    }

    pub async fn history(&self, room_id: &str) -> Result<Vec<Message>, StoreError> {
        self.store.history(room_id).await
    }
}
