use std::{collections::{HashMap, HashSet}, sync::{Mutex, MutexGuard, PoisonError}};

use tokio::sync::mpsc::{self, error::TrySendError};

use crate::events::{ServerEvent, Transport};

use super::ConnectionId;

/// Events a connection may have queued before it is dropped as too slow.
pub const OUTBOX_CAPACITY: usize = 256;

#[derive(Debug, Default)]
struct Groups {
    connections: HashMap<ConnectionId, mpsc::Sender<ServerEvent>>,
    rooms: HashMap<String, HashSet<ConnectionId>>,
}

impl Groups {
    fn remove(&mut self, connection_id: &ConnectionId) {
        self.connections.remove(connection_id);
        self.rooms.retain(|_, members| {
            members.remove(connection_id);
            !members.is_empty()
        });
    }

    /// Queues `event` for `connection_id`. Returns false if its outbox is full.
    fn offer(&self, connection_id: &ConnectionId, event: &ServerEvent) -> bool {
        let Some(tx) = self.connections.get(connection_id) else {
            return true;
        };
        !matches!(tx.try_send(event.clone()), Err(TrySendError::Full(_)))
    }

    fn evict(&mut self, slow: Vec<ConnectionId>) {
        for connection_id in slow {
            tracing::warn!(connection_id = %connection_id, "outbox full, dropping connection");
            self.remove(&connection_id);
        }
    }
}

/// Live sockets and the room groups they're subscribed to.
///
/// Each connection drains its own bounded outbox, so emitting never blocks.
/// A connection that lets [`OUTBOX_CAPACITY`] events pile up is dropped from
/// the hub; its receiver then runs dry and the socket task hangs up.
#[derive(Debug, Default)]
pub struct Hub {
    groups: Mutex<Groups>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    fn groups(&self) -> MutexGuard<'_, Groups> {
        self.groups.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn connect(&self) -> (ConnectionId, mpsc::Receiver<ServerEvent>) {
        let connection_id = ConnectionId::new();
        let rx = self.register(connection_id.clone());
        (connection_id, rx)
    }

    pub fn register(&self, connection_id: ConnectionId) -> mpsc::Receiver<ServerEvent> {
        let (tx, rx) = mpsc::channel(OUTBOX_CAPACITY);
        self.groups().connections.insert(connection_id, tx);
        rx
    }

    /// Forgets the connection and pulls it out of every group.
    pub fn disconnect(&self, connection_id: &ConnectionId) {
        self.groups().remove(connection_id);
    }

    pub fn connection_count(&self) -> usize {
        self.groups().connections.len()
    }

    pub fn members(&self, room_id: &str) -> HashSet<ConnectionId> {
        self.groups()
            .rooms
            .get(room_id)
            .cloned()
            .unwrap_or_default()
    }

    fn send_to_group(&self, room_id: &str, except: Option<&ConnectionId>, event: &ServerEvent) {
        let mut groups = self.groups();
        let Some(members) = groups.rooms.get(room_id) else {
            return;
        };

        let slow: Vec<ConnectionId> = members.iter()
            .filter(|connection_id| Some(*connection_id) != except)
            .filter(|connection_id| !groups.offer(connection_id, event))
            .cloned()
            .collect();
        groups.evict(slow);
    }
}

impl Transport for Hub {
    fn emit_to_room(&self, room_id: &str, event: &ServerEvent) {
        self.send_to_group(room_id, None, event);
    }

    fn emit_to_room_except(&self, room_id: &str, except: &ConnectionId, event: &ServerEvent) {
        self.send_to_group(room_id, Some(except), event);
    }

    fn emit_to_connection(&self, connection_id: &ConnectionId, event: &ServerEvent) {
        let mut groups = self.groups();
        if !groups.offer(connection_id, event) {
            groups.evict(vec![connection_id.clone()]);
        }
    }

    fn join_group(&self, connection_id: &ConnectionId, room_id: &str) {
        let mut groups = self.groups();
        // a join racing the socket close must not resurrect the connection
        if !groups.connections.contains_key(connection_id) {
            return;
        }
        groups.rooms.entry(room_id.to_owned()).or_default().insert(connection_id.clone());
    }

    fn leave_group(&self, connection_id: &ConnectionId, room_id: &str) {
        let mut groups = self.groups();
        if let Some(members) = groups.rooms.get_mut(room_id) {
            members.remove(connection_id);
            if members.is_empty() {
                groups.rooms.remove(room_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(user_id: &str) -> ServerEvent {
        ServerEvent::UserDisconnected(user_id.to_owned())
    }

    #[tokio::test]
    async fn room_emit_reaches_members_only() {
        let hub = Hub::new();
        let (a, mut rx_a) = hub.connect();
        let (b, mut rx_b) = hub.connect();
        let (_c, mut rx_c) = hub.connect();
        hub.join_group(&a, "r1");
        hub.join_group(&b, "r1");

        hub.emit_to_room("r1", &event("x"));

        assert_eq!(rx_a.try_recv().unwrap(), event("x"));
        assert_eq!(rx_b.try_recv().unwrap(), event("x"));
        assert!(rx_c.try_recv().is_err());
    }

    #[tokio::test]
    async fn room_except_skips_sender() {
        let hub = Hub::new();
        let (a, mut rx_a) = hub.connect();
        let (b, mut rx_b) = hub.connect();
        hub.join_group(&a, "r1");
        hub.join_group(&b, "r1");

        hub.emit_to_room_except("r1", &a, &event("x"));

        assert!(rx_a.try_recv().is_err());
        assert_eq!(rx_b.try_recv().unwrap(), event("x"));
    }

    #[tokio::test]
    async fn leave_group_stops_delivery() {
        let hub = Hub::new();
        let (a, mut rx_a) = hub.connect();
        hub.join_group(&a, "r1");
        hub.leave_group(&a, "r1");

        hub.emit_to_room("r1", &event("x"));

        assert!(rx_a.try_recv().is_err());
        assert!(hub.members("r1").is_empty());
    }

    #[tokio::test]
    async fn disconnect_clears_every_group() {
        let hub = Hub::new();
        let (a, _rx_a) = hub.connect();
        let (b, _rx_b) = hub.connect();
        hub.join_group(&a, "r1");
        hub.join_group(&a, "r2");
        hub.join_group(&b, "r2");

        hub.disconnect(&a);

        assert_eq!(hub.connection_count(), 1);
        assert!(hub.members("r1").is_empty());
        assert_eq!(hub.members("r2"), HashSet::from([b]));
    }

    #[tokio::test]
    async fn join_after_disconnect_is_ignored() {
        let hub = Hub::new();
        let (a, _rx_a) = hub.connect();
        hub.disconnect(&a);

        hub.join_group(&a, "r1");

        assert!(hub.members("r1").is_empty());
    }

    #[tokio::test]
    async fn stalled_reader_is_dropped_once_its_outbox_fills() {
        let hub = Hub::new();
        let (stalled, mut rx_stalled) = hub.connect();
        let (reader, mut rx_reader) = hub.connect();
        hub.join_group(&stalled, "r1");
        hub.join_group(&reader, "r1");

        for i in 0..OUTBOX_CAPACITY + 10 {
            hub.emit_to_room("r1", &event(&format!("u{i}")));
            assert_eq!(rx_reader.try_recv().unwrap(), event(&format!("u{i}")));
        }

        assert_eq!(hub.connection_count(), 1);
        assert_eq!(hub.members("r1"), HashSet::from([reader]));

        let mut queued = 0;
        while rx_stalled.try_recv().is_ok() {
            queued += 1;
        }
        assert_eq!(queued, OUTBOX_CAPACITY);
        assert_eq!(rx_stalled.try_recv(), Err(mpsc::error::TryRecvError::Disconnected));
    }

    #[tokio::test]
    async fn full_outbox_on_direct_emit_drops_connection() {
        let hub = Hub::new();
        let (a, _rx_a) = hub.connect();
        hub.join_group(&a, "r1");

        for i in 0..=OUTBOX_CAPACITY {
            hub.emit_to_connection(&a, &event(&format!("u{i}")));
        }

        assert_eq!(hub.connection_count(), 0);
        assert!(hub.members("r1").is_empty());
    }
}
