//! Visibility resolver
//!
//! Pure access-control functions determining what content a given actor
//! may read. Called on every read path, never cached across requests.
//! The rules protect partial disclosure: one party must never see the
//! other's unsubmitted perspective, and per-message tags are honored on
//! every read including after a conversation flips to shared.

use uuid::Uuid;

use crate::domain::entities::{
    Conversation, Couple, MemberRole, Message, MessageAudience, Perspective, Visibility,
};

/// What a requesting actor may see of one perspective.
///
/// Existence is not hidden, content is: before the both-submitted gate
/// opens, the non-author sees the row with `content: None`.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct PerspectiveView {
    pub id: Uuid,
    pub user_id: Uuid,
    pub content: Option<String>,
    pub submitted: bool,
}

/// Resolve one perspective for a requesting actor.
///
/// `all_submitted` must be computed over every perspective row of the
/// conversation; the author always sees their own content in full.
pub fn resolve_perspective(
    perspective: &Perspective,
    actor_id: Uuid,
    all_submitted: bool,
) -> PerspectiveView {
    let content = if perspective.user_id == actor_id || all_submitted {
        perspective.content.clone()
    } else {
        None
    };

    PerspectiveView {
        id: perspective.id,
        user_id: perspective.user_id,
        content,
        submitted: perspective.submitted,
    }
}

/// Whether every perspective row of a conversation has been submitted
pub fn all_submitted(perspectives: &[Perspective]) -> bool {
    !perspectives.is_empty() && perspectives.iter().all(|p| p.submitted)
}

/// Whether one message is visible to the requesting actor.
///
/// A private conversation restricts every message to the creator. A
/// message addressed to a role with no matching member fails safe:
/// visible to nobody but the creator.
pub fn message_visible_to(
    message: &Message,
    actor_id: Uuid,
    conversation: &Conversation,
    couple: Option<&Couple>,
) -> bool {
    if conversation.visibility == Visibility::Private {
        return actor_id == conversation.created_by;
    }

    match message.visible_to {
        MessageAudience::All => match couple {
            Some(c) => c.is_member(actor_id),
            None => actor_id == conversation.created_by,
        },
        MessageAudience::CreatorOnly => actor_id == conversation.created_by,
        MessageAudience::PartnerOnly => match couple {
            Some(c) => match c.member_role(actor_id) {
                Some(MemberRole::Partner) => true,
                // Fail-safe: the creator may see their own mis-addressed
                // message, nobody else may
                _ => actor_id == conversation.created_by && c.partner_user_id.is_none(),
            },
            None => false,
        },
    }
}

/// Filter a transcript down to the subsequence the actor may read
pub fn visible_messages<'a>(
    messages: &'a [Message],
    actor_id: Uuid,
    conversation: &Conversation,
    couple: Option<&Couple>,
) -> Vec<&'a Message> {
    messages
        .iter()
        .filter(|m| message_visible_to(m, actor_id, conversation, couple))
        .collect()
}
