//! In-memory store
//!
//! One mutex-guarded map set implementing every store trait. Each trait
//! method takes the lock once, so predicate checks and patches are
//! atomic exactly like the single-row conditional updates the Postgres
//! repositories issue. Selected for tests and tooling that run without
//! a database.

use std::collections::HashMap;
use std::sync::Mutex;

use accord_common::Result;
use chrono::Utc;
use uuid::Uuid;

use crate::domain::entities::{
    Agreement, AgreementStatus, Conversation, Couple, CoupleStatus, Invitation, InvitationStatus,
    MemberRole, Message, Perspective,
};
use crate::store::{
    AgreementStore, ConversationPatch, ConversationStore, CoupleStore, InvitationStore,
    MessageStore, PerspectiveStore, StatusPredicate,
};

#[derive(Default)]
struct Inner {
    couples: HashMap<Uuid, Couple>,
    conversations: HashMap<Uuid, Conversation>,
    perspectives: Vec<Perspective>,
    messages: Vec<Message>,
    invitations: HashMap<Uuid, Invitation>,
    agreements: HashMap<Uuid, Agreement>,
}

/// In-memory implementation of all dialogue stores
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn predicate_holds(conversation: &Conversation, predicate: &StatusPredicate) -> bool {
    if !predicate.status_in.is_empty() && !predicate.status_in.contains(&conversation.status) {
        return false;
    }
    if predicate.requires_synthesis && conversation.synthesis.is_none() {
        return false;
    }
    if predicate.requires_no_feedback && conversation.rejection_feedback.is_some() {
        return false;
    }
    if let Some(role) = predicate.not_yet_accepted_by {
        if conversation.accepted_by(role) {
            return false;
        }
    }
    true
}

fn apply_patch(conversation: &mut Conversation, patch: ConversationPatch) {
    if let Some(status) = patch.status {
        conversation.status = status;
    }
    if let Some(visibility) = patch.visibility {
        conversation.visibility = visibility;
    }
    if let Some(couple_id) = patch.couple_id {
        conversation.couple_id = Some(couple_id);
    }
    if let Some(synthesis) = patch.synthesis {
        conversation.synthesis = synthesis;
    }
    if let Some(chunk) = patch.append_synthesis {
        match &mut conversation.synthesis {
            Some(text) => text.push_str(&chunk),
            None => conversation.synthesis = Some(chunk),
        }
    }
    if patch.reset_acceptance {
        conversation.accepted_by_creator = false;
        conversation.accepted_by_partner = false;
    }
    if let Some(role) = patch.set_accepted {
        match role {
            MemberRole::Creator => conversation.accepted_by_creator = true,
            MemberRole::Partner => conversation.accepted_by_partner = true,
        }
    }
    if let Some(feedback) = patch.rejection_feedback {
        conversation.rejection_feedback = feedback;
    }
    if let Some(notes) = patch.resolution_notes {
        conversation.resolution_notes = Some(notes);
    }
    if let Some(at) = patch.resolved_at {
        conversation.resolved_at = Some(at);
    }
    conversation.updated_at = Utc::now();
}

#[async_trait::async_trait]
impl CoupleStore for MemoryStore {
    async fn insert(&self, couple: &Couple) -> Result<Couple> {
        let mut inner = self.inner.lock().unwrap();
        inner.couples.insert(couple.id, couple.clone());
        Ok(couple.clone())
    }

    async fn find(&self, id: Uuid) -> Result<Option<Couple>> {
        Ok(self.inner.lock().unwrap().couples.get(&id).cloned())
    }

    async fn find_by_member(&self, user_id: Uuid) -> Result<Option<Couple>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .couples
            .values()
            .find(|c| c.is_member(user_id))
            .cloned())
    }

    async fn find_by_invite_code(&self, code: &str) -> Result<Option<Couple>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .couples
            .values()
            .find(|c| c.invite_code == code)
            .cloned())
    }

    async fn link_partner(&self, id: Uuid, partner_user_id: Uuid) -> Result<Option<Couple>> {
        let mut inner = self.inner.lock().unwrap();
        let Some(couple) = inner.couples.get_mut(&id) else {
            return Ok(None);
        };
        if couple.partner_user_id.is_some() {
            return Ok(None);
        }
        couple.partner_user_id = Some(partner_user_id);
        couple.status = CoupleStatus::Active;
        Ok(Some(couple.clone()))
    }
}

#[async_trait::async_trait]
impl ConversationStore for MemoryStore {
    async fn insert(&self, conversation: &Conversation) -> Result<Conversation> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .conversations
            .insert(conversation.id, conversation.clone());
        Ok(conversation.clone())
    }

    async fn find(&self, id: Uuid) -> Result<Option<Conversation>> {
        Ok(self.inner.lock().unwrap().conversations.get(&id).cloned())
    }

    async fn list_by_couple(&self, couple_id: Uuid) -> Result<Vec<Conversation>> {
        let inner = self.inner.lock().unwrap();
        let mut rows: Vec<Conversation> = inner
            .conversations
            .values()
            .filter(|c| c.couple_id == Some(couple_id))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn update_guarded(
        &self,
        id: Uuid,
        predicate: StatusPredicate,
        patch: ConversationPatch,
    ) -> Result<Option<Conversation>> {
        let mut inner = self.inner.lock().unwrap();
        let Some(conversation) = inner.conversations.get_mut(&id) else {
            return Ok(None);
        };
        if !predicate_holds(conversation, &predicate) {
            return Ok(None);
        }
        apply_patch(conversation, patch);
        Ok(Some(conversation.clone()))
    }
}

#[async_trait::async_trait]
impl PerspectiveStore for MemoryStore {
    async fn insert(&self, perspective: &Perspective) -> Result<Perspective> {
        let mut inner = self.inner.lock().unwrap();
        inner.perspectives.push(perspective.clone());
        Ok(perspective.clone())
    }

    async fn list_by_conversation(&self, conversation_id: Uuid) -> Result<Vec<Perspective>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .perspectives
            .iter()
            .filter(|p| p.conversation_id == conversation_id)
            .cloned()
            .collect())
    }

    async fn find_for_user(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Perspective>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .perspectives
            .iter()
            .find(|p| p.conversation_id == conversation_id && p.user_id == user_id)
            .cloned())
    }

    async fn save_content(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        content: &str,
    ) -> Result<Option<Perspective>> {
        let mut inner = self.inner.lock().unwrap();
        let Some(perspective) = inner
            .perspectives
            .iter_mut()
            .find(|p| p.conversation_id == conversation_id && p.user_id == user_id && !p.submitted)
        else {
            return Ok(None);
        };
        perspective.content = Some(content.to_string());
        perspective.updated_at = Utc::now();
        Ok(Some(perspective.clone()))
    }

    async fn submit(&self, conversation_id: Uuid, user_id: Uuid) -> Result<Option<Perspective>> {
        let mut inner = self.inner.lock().unwrap();
        let Some(perspective) = inner.perspectives.iter_mut().find(|p| {
            p.conversation_id == conversation_id
                && p.user_id == user_id
                && !p.submitted
                && p.content.is_some()
        }) else {
            return Ok(None);
        };
        perspective.submitted = true;
        perspective.submitted_at = Some(Utc::now());
        perspective.updated_at = Utc::now();
        Ok(Some(perspective.clone()))
    }
}

#[async_trait::async_trait]
impl MessageStore for MemoryStore {
    async fn insert(&self, message: &Message) -> Result<Message> {
        let mut inner = self.inner.lock().unwrap();
        inner.messages.push(message.clone());
        Ok(message.clone())
    }

    async fn list_by_conversation(&self, conversation_id: Uuid) -> Result<Vec<Message>> {
        let inner = self.inner.lock().unwrap();
        let mut rows: Vec<Message> = inner
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then(a.sequence.cmp(&b.sequence))
        });
        Ok(rows)
    }

    async fn next_sequence(&self, conversation_id: Uuid) -> Result<i32> {
        let inner = self.inner.lock().unwrap();
        let max = inner
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .map(|m| m.sequence)
            .max()
            .unwrap_or(0);
        Ok(max + 1)
    }
}

#[async_trait::async_trait]
impl InvitationStore for MemoryStore {
    async fn insert_if_no_pending(&self, invitation: &Invitation) -> Result<Option<Invitation>> {
        let mut inner = self.inner.lock().unwrap();
        let pending_exists = inner.invitations.values().any(|i| {
            i.conversation_id == invitation.conversation_id
                && i.invited_user_id == invitation.invited_user_id
                && i.status == InvitationStatus::Pending
        });
        if pending_exists {
            return Ok(None);
        }
        inner.invitations.insert(invitation.id, invitation.clone());
        Ok(Some(invitation.clone()))
    }

    async fn find(&self, id: Uuid) -> Result<Option<Invitation>> {
        Ok(self.inner.lock().unwrap().invitations.get(&id).cloned())
    }

    async fn respond(&self, id: Uuid, status: InvitationStatus) -> Result<Option<Invitation>> {
        let mut inner = self.inner.lock().unwrap();
        let Some(invitation) = inner.invitations.get_mut(&id) else {
            return Ok(None);
        };
        if invitation.status != InvitationStatus::Pending {
            return Ok(None);
        }
        invitation.status = status;
        invitation.responded_at = Some(Utc::now());
        Ok(Some(invitation.clone()))
    }
}

#[async_trait::async_trait]
impl AgreementStore for MemoryStore {
    async fn insert(&self, agreement: &Agreement) -> Result<Agreement> {
        let mut inner = self.inner.lock().unwrap();
        inner.agreements.insert(agreement.id, agreement.clone());
        Ok(agreement.clone())
    }

    async fn find(&self, id: Uuid) -> Result<Option<Agreement>> {
        Ok(self.inner.lock().unwrap().agreements.get(&id).cloned())
    }

    async fn list_by_conversation(&self, conversation_id: Uuid) -> Result<Vec<Agreement>> {
        let inner = self.inner.lock().unwrap();
        let mut rows: Vec<Agreement> = inner
            .agreements
            .values()
            .filter(|a| a.conversation_id == conversation_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(rows)
    }

    async fn update_status(
        &self,
        id: Uuid,
        from: AgreementStatus,
        to: AgreementStatus,
    ) -> Result<Option<Agreement>> {
        let mut inner = self.inner.lock().unwrap();
        let Some(agreement) = inner.agreements.get_mut(&id) else {
            return Ok(None);
        };
        if agreement.status != from {
            return Ok(None);
        }
        agreement.status = to;
        agreement.updated_at = Utc::now();
        Ok(Some(agreement.clone()))
    }
}
