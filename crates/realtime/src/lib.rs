//! Real-time fan-out layer for Accord
//!
//! The engine addresses connected sessions through [`RoomId`] values
//! (one room per couple, one per conversation) and emits events through
//! the [`Broadcaster`] trait. Delivery is best-effort: a failed
//! broadcast is logged and dropped, never queued or retried — the
//! receiving client's next read observes the persisted state anyway, so
//! a lost broadcast only costs latency.

pub mod channel;
pub mod null;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use channel::{ChannelBroadcaster, Envelope};
pub use null::NullBroadcaster;

/// An addressable broadcast scope.
///
/// Replaces ad-hoc `"couple:" + id` string concatenation with a value
/// type so the two scopes cannot be confused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomId {
    Couple(Uuid),
    Conversation(Uuid),
}

impl RoomId {
    /// Room holding every session belonging to either member of a couple
    pub fn for_couple(couple_id: Uuid) -> Self {
        Self::Couple(couple_id)
    }

    /// Room holding every session currently viewing one conversation
    pub fn for_conversation(conversation_id: Uuid) -> Self {
        Self::Conversation(conversation_id)
    }
}

impl std::fmt::Display for RoomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Couple(id) => write!(f, "couple:{}", id),
            Self::Conversation(id) => write!(f, "conversation:{}", id),
        }
    }
}

/// Symbolic event names the engine emits. The exact wire format is the
/// session gateway's concern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventName {
    ConversationStatusChanged,
    ConversationMessageAppended,
    SynthesisChunk,
    InvitationSent,
    InvitationResponded,
    /// Advisory-only typing/speaking/reading/online/offline signals.
    /// Never persisted, no ordering guarantee relative to content events.
    PartnerActivity,
    RequestCreated,
    RequestUpdated,
    CompromiseCreated,
    CompromiseUpdated,
}

impl EventName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConversationStatusChanged => "conversation-status-changed",
            Self::ConversationMessageAppended => "conversation-message-appended",
            Self::SynthesisChunk => "synthesis-chunk",
            Self::InvitationSent => "invitation-sent",
            Self::InvitationResponded => "invitation-responded",
            Self::PartnerActivity => "partner-activity",
            Self::RequestCreated => "request-created",
            Self::RequestUpdated => "request-updated",
            Self::CompromiseCreated => "compromise-created",
            Self::CompromiseUpdated => "compromise-updated",
        }
    }
}

impl std::fmt::Display for EventName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from the session layer. Callers treat these as best-effort
/// losses, not operation failures.
#[derive(Debug, thiserror::Error)]
pub enum BroadcastError {
    #[error("Session gateway unavailable: {0}")]
    Unavailable(String),
}

/// Fan-out contract consumed by the engine.
///
/// Implementations carry no state beyond current room membership; the
/// entity store remains the single source of truth.
#[async_trait::async_trait]
pub trait Broadcaster: Send + Sync {
    /// Deliver `payload` to every session in `room` except the
    /// triggering actor (who already has the authoritative response).
    async fn broadcast(
        &self,
        room: RoomId,
        event: EventName,
        payload: serde_json::Value,
        exclude_actor: Option<Uuid>,
    ) -> Result<(), BroadcastError>;

    /// Whether the actor has at least one live session
    fn is_connected(&self, actor: Uuid) -> bool;
}
