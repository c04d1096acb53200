//! In-process channel broadcaster
//!
//! Backs each room with a `tokio::sync::broadcast` channel. The session
//! gateway subscribes per room and forwards envelopes to its own wire
//! format; the engine never sees individual connections.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::{BroadcastError, Broadcaster, EventName, RoomId};

const ROOM_CHANNEL_CAPACITY: usize = 64;

/// One delivered event. `exclude_actor` travels with the payload so the
/// session layer can skip the triggering actor's own connections.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub room: RoomId,
    pub event: EventName,
    pub payload: serde_json::Value,
    pub exclude_actor: Option<Uuid>,
}

#[derive(Default)]
struct Rooms {
    senders: HashMap<RoomId, broadcast::Sender<Envelope>>,
    connected: HashSet<Uuid>,
}

/// Broadcaster backed by per-room `tokio::sync::broadcast` channels
#[derive(Default)]
pub struct ChannelBroadcaster {
    rooms: Mutex<Rooms>,
}

impl ChannelBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a room. Creates the room on first use.
    pub fn subscribe(&self, room: RoomId) -> broadcast::Receiver<Envelope> {
        let mut rooms = self.rooms.lock().unwrap();
        rooms
            .senders
            .entry(room)
            .or_insert_with(|| broadcast::channel(ROOM_CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Mark an actor as having a live session
    pub fn connect(&self, actor: Uuid) {
        self.rooms.lock().unwrap().connected.insert(actor);
    }

    /// Mark an actor as fully disconnected
    pub fn disconnect(&self, actor: Uuid) {
        self.rooms.lock().unwrap().connected.remove(&actor);
    }
}

#[async_trait::async_trait]
impl Broadcaster for ChannelBroadcaster {
    async fn broadcast(
        &self,
        room: RoomId,
        event: EventName,
        payload: serde_json::Value,
        exclude_actor: Option<Uuid>,
    ) -> Result<(), BroadcastError> {
        let sender = {
            let rooms = self.rooms.lock().unwrap();
            rooms.senders.get(&room).cloned()
        };

        let Some(sender) = sender else {
            // Nobody ever joined the room; nothing to deliver
            tracing::trace!(room = %room, event = %event, "No subscribers for room");
            return Ok(());
        };

        let envelope = Envelope {
            room,
            event,
            payload,
            exclude_actor,
        };

        // An empty room is not a failure: delivery is best-effort
        if sender.send(envelope).is_err() {
            tracing::debug!(room = %room, event = %event, "Room has no live receivers");
        }

        Ok(())
    }

    fn is_connected(&self, actor: Uuid) -> bool {
        self.rooms.lock().unwrap().connected.contains(&actor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_broadcast_reaches_room_subscribers() {
        let broadcaster = ChannelBroadcaster::new();
        let room = RoomId::for_conversation(Uuid::new_v4());
        let mut rx = broadcaster.subscribe(room);

        broadcaster
            .broadcast(
                room,
                EventName::ConversationMessageAppended,
                json!({"content": "hello"}),
                None,
            )
            .await
            .unwrap();

        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.room, room);
        assert_eq!(envelope.event, EventName::ConversationMessageAppended);
        assert_eq!(envelope.payload["content"], "hello");
    }

    #[tokio::test]
    async fn test_broadcast_does_not_cross_rooms() {
        let broadcaster = ChannelBroadcaster::new();
        let room_a = RoomId::for_conversation(Uuid::new_v4());
        let room_b = RoomId::for_conversation(Uuid::new_v4());
        let mut rx_b = broadcaster.subscribe(room_b);

        // room_a needs at least one subscriber so the send path runs
        let _rx_a = broadcaster.subscribe(room_a);

        broadcaster
            .broadcast(room_a, EventName::SynthesisChunk, json!({"text": "x"}), None)
            .await
            .unwrap();

        assert!(matches!(
            rx_b.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_broadcast_to_empty_room_is_a_noop() {
        let broadcaster = ChannelBroadcaster::new();
        let result = broadcaster
            .broadcast(
                RoomId::for_couple(Uuid::new_v4()),
                EventName::PartnerActivity,
                json!({"kind": "typing"}),
                None,
            )
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_exclude_actor_travels_with_envelope() {
        let broadcaster = ChannelBroadcaster::new();
        let room = RoomId::for_couple(Uuid::new_v4());
        let actor = Uuid::new_v4();
        let mut rx = broadcaster.subscribe(room);

        broadcaster
            .broadcast(
                room,
                EventName::ConversationStatusChanged,
                json!({"status": "discussion"}),
                Some(actor),
            )
            .await
            .unwrap();

        assert_eq!(rx.recv().await.unwrap().exclude_actor, Some(actor));
    }

    #[test]
    fn test_connection_tracking() {
        let broadcaster = ChannelBroadcaster::new();
        let actor = Uuid::new_v4();

        assert!(!broadcaster.is_connected(actor));
        broadcaster.connect(actor);
        assert!(broadcaster.is_connected(actor));
        broadcaster.disconnect(actor);
        assert!(!broadcaster.is_connected(actor));
    }
}
