//! No-op broadcaster
//!
//! Selected by configuration when no session layer is attached (tests,
//! batch tooling). Stands in for the real gateway behind the same
//! interface rather than making the socket dependency optional at the
//! call sites.

use uuid::Uuid;

use crate::{BroadcastError, Broadcaster, EventName, RoomId};

/// Broadcaster that drops everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullBroadcaster;

impl NullBroadcaster {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl Broadcaster for NullBroadcaster {
    async fn broadcast(
        &self,
        room: RoomId,
        event: EventName,
        _payload: serde_json::Value,
        _exclude_actor: Option<Uuid>,
    ) -> Result<(), BroadcastError> {
        tracing::trace!(room = %room, event = %event, "Dropping broadcast (null broadcaster)");
        Ok(())
    }

    fn is_connected(&self, _actor: Uuid) -> bool {
        false
    }
}
