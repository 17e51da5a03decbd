use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::rooms::{ConnectionId, Message, NewMessage, Participant};

/// An inbound frame the relay can't act on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed event: {0}")]
pub struct MalformedEvent(pub String);

/// Frames a client sends, `{"event": "...", "data": {...}}`.
///
/// Disconnect has no frame; the socket closing is the event.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    JoinRoom(JoinRoom),
    LeaveRoom(LeaveRoom),
    SendMessage(SendMessage),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoom {
    pub user_id: String,
    pub username: String,
    pub room_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveRoom {
    pub user_id: String,
    pub room_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    pub room_id: String,
    pub user_id: String,
    pub username: String,
    pub content: String,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub timestamp: Option<OffsetDateTime>,
}

impl From<SendMessage> for NewMessage {
    fn from(SendMessage { room_id, user_id, username, content, timestamp }: SendMessage) -> Self {
        NewMessage { room_id, user_id, username, content, timestamp }
    }
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::JoinRoom(_) => "join_room",
            ClientEvent::LeaveRoom(_) => "leave_room",
            ClientEvent::SendMessage(_) => "send_message",
        }
    }

    pub fn room_id(&self) -> &str {
        match self {
            ClientEvent::JoinRoom(e) => &e.room_id,
            ClientEvent::LeaveRoom(e) => &e.room_id,
            ClientEvent::SendMessage(e) => &e.room_id,
        }
    }

    fn user_id(&self) -> &str {
        match self {
            ClientEvent::JoinRoom(e) => &e.user_id,
            ClientEvent::LeaveRoom(e) => &e.user_id,
            ClientEvent::SendMessage(e) => &e.user_id,
        }
    }

    /// Parses a text frame. Unknown events, missing fields, and blank room
    /// or user ids are all rejected.
    pub fn parse(text: &str) -> Result<ClientEvent, MalformedEvent> {
        let event: ClientEvent = serde_json::from_str(text)
            .map_err(|e| MalformedEvent(e.to_string()))?;

        if event.room_id().is_empty() {
            return Err(MalformedEvent(format!("{}: roomId must not be empty", event.name())));
        }
        if event.user_id().is_empty() {
            return Err(MalformedEvent(format!("{}: userId must not be empty", event.name())));
        }

        Ok(event)
    }
}

/// Frames the server sends, in the same envelope as [`ClientEvent`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    OnlineUsers(Vec<Participant>),
    UserConnected(Participant),
    UserDisconnected(String),
    MessageHistory(Vec<Message>),
    NewMessage(Message),
    Error { message: String },
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::OnlineUsers(_) => "online_users",
            ServerEvent::UserConnected(_) => "user_connected",
            ServerEvent::UserDisconnected(_) => "user_disconnected",
            ServerEvent::MessageHistory(_) => "message_history",
            ServerEvent::NewMessage(_) => "new_message",
            ServerEvent::Error { .. } => "error",
        }
    }
}

/// Something the relay asks the transport to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    EmitToRoom { room_id: String, event: ServerEvent },
    EmitToRoomExcept { room_id: String, except: ConnectionId, event: ServerEvent },
    EmitToConnection { connection_id: ConnectionId, event: ServerEvent },
    JoinGroup { connection_id: ConnectionId, room_id: String },
    LeaveGroup { connection_id: ConnectionId, room_id: String },
}

/// The wire side: connections, and which room groups they belong to.
pub trait Transport: Send + Sync {
    fn emit_to_room(&self, room_id: &str, event: &ServerEvent);

    fn emit_to_room_except(&self, room_id: &str, except: &ConnectionId, event: &ServerEvent);

    fn emit_to_connection(&self, connection_id: &ConnectionId, event: &ServerEvent);

    fn join_group(&self, connection_id: &ConnectionId, room_id: &str);

    fn leave_group(&self, connection_id: &ConnectionId, room_id: &str);
}

impl Instruction {
    pub fn apply(&self, transport: &dyn Transport) {
        match self {
            Instruction::EmitToRoom { room_id, event } => transport.emit_to_room(room_id, event),
            Instruction::EmitToRoomExcept { room_id, except, event } => transport.emit_to_room_except(room_id, except, event),
            Instruction::EmitToConnection { connection_id, event } => transport.emit_to_connection(connection_id, event),
            Instruction::JoinGroup { connection_id, room_id } => transport.join_group(connection_id, room_id),
            Instruction::LeaveGroup { connection_id, room_id } => transport.leave_group(connection_id, room_id),
        }
    }

    /// The event carried, if this instruction emits one.
    pub fn event(&self) -> Option<&ServerEvent> {
        match self {
            Instruction::EmitToRoom { event, .. }
            | Instruction::EmitToRoomExcept { event, .. }
            | Instruction::EmitToConnection { event, .. } => Some(event),
            Instruction::JoinGroup { .. } | Instruction::LeaveGroup { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_join_room() {
        let event = ClientEvent::parse(r#"{"event":"join_room","data":{"userId":"u1","username":"Shy Panda","roomId":"r1"}}"#).unwrap();

        assert_eq!(event, ClientEvent::JoinRoom(JoinRoom {
            user_id: "u1".to_owned(),
            username: "Shy Panda".to_owned(),
            room_id: "r1".to_owned(),
        }));
    }

    #[test]
    fn send_message_timestamp_is_optional() {
        let event = ClientEvent::parse(r#"{"event":"send_message","data":{"roomId":"r1","userId":"u1","username":"x","content":"hi"}}"#).unwrap();
        let ClientEvent::SendMessage(send) = event else {
            panic!("expected send_message");
        };
        assert_eq!(send.timestamp, None);

        let event = ClientEvent::parse(r#"{"event":"send_message","data":{"roomId":"r1","userId":"u1","username":"x","content":"hi","timestamp":"2024-01-01T00:00:00Z"}}"#).unwrap();
        let ClientEvent::SendMessage(send) = event else {
            panic!("expected send_message");
        };
        assert!(send.timestamp.is_some());
    }

    #[test]
    fn rejects_missing_or_blank_room() {
        assert!(ClientEvent::parse(r#"{"event":"send_message","data":{"userId":"u1","username":"x","content":"hi"}}"#).is_err());
        assert!(ClientEvent::parse(r#"{"event":"send_message","data":{"roomId":"","userId":"u1","username":"x","content":"hi"}}"#).is_err());
        assert!(ClientEvent::parse(r#"{"event":"leave_room","data":{"userId":"","roomId":"r1"}}"#).is_err());
    }

    #[test]
    fn rejects_unknown_event_and_garbage() {
        assert!(ClientEvent::parse(r#"{"event":"dance","data":{}}"#).is_err());
        assert!(ClientEvent::parse("not json").is_err());
    }

    #[test]
    fn server_events_use_the_same_envelope() {
        let json = serde_json::to_value(ServerEvent::UserDisconnected("u1".to_owned())).unwrap();
        assert_eq!(json, serde_json::json!({"event": "user_disconnected", "data": "u1"}));

        let json = serde_json::to_value(ServerEvent::MessageHistory(Vec::new())).unwrap();
        assert_eq!(json, serde_json::json!({"event": "message_history", "data": []}));

        let json = serde_json::to_value(ServerEvent::Error { message: "nope".to_owned() }).unwrap();
        assert_eq!(json, serde_json::json!({"event": "error", "data": {"message": "nope"}}));
    }
}
