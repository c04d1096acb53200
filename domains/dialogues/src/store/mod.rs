//! Entity store contracts
//!
//! The engine talks to storage through per-entity traits. Every guarded
//! mutation is a single-row conditional update: the predicate is
//! evaluated atomically with the patch, so concurrent double-accept or
//! double-submit races are settled here — the loser's update matches
//! zero rows and comes back as `None`, a no-op rather than an error.
//!
//! Two implementations ship with the crate: Postgres repositories (the
//! production path) and an in-memory store selected for tests and
//! tooling that run without a database.

pub mod memory;

use std::sync::Arc;

use accord_common::Result;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::entities::{
    Agreement, AgreementStatus, Conversation, Couple, DialogueStatus, Invitation,
    InvitationStatus, MemberRole, Message, Perspective, Visibility,
};

/// Predicate half of the conversation compare-and-set.
///
/// All set conditions must hold for the patch to apply.
#[derive(Debug, Clone, Default)]
pub struct StatusPredicate {
    /// Current status must be one of these (empty = any)
    pub status_in: Vec<DialogueStatus>,
    /// A synthesis text must exist
    pub requires_synthesis: bool,
    /// No un-addressed rejection feedback may be pending
    pub requires_no_feedback: bool,
    /// The given side must not have accepted yet (the double-accept guard)
    pub not_yet_accepted_by: Option<MemberRole>,
}

impl StatusPredicate {
    pub fn status_in(statuses: impl IntoIterator<Item = DialogueStatus>) -> Self {
        Self {
            status_in: statuses.into_iter().collect(),
            ..Default::default()
        }
    }
}

/// Patch half of the conversation compare-and-set
#[derive(Debug, Clone, Default)]
pub struct ConversationPatch {
    pub status: Option<DialogueStatus>,
    pub visibility: Option<Visibility>,
    pub couple_id: Option<Uuid>,
    /// `Some(None)` clears the synthesis, `Some(Some(_))` replaces it
    pub synthesis: Option<Option<String>>,
    /// Appends to the synthesis text (incremental streaming persistence)
    pub append_synthesis: Option<String>,
    pub set_accepted: Option<MemberRole>,
    /// Clears both acceptance flags
    pub reset_acceptance: bool,
    /// `Some(None)` clears stored feedback, `Some(Some(_))` records it
    pub rejection_feedback: Option<Option<String>>,
    pub resolution_notes: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ConversationPatch {
    pub fn status(to: DialogueStatus) -> Self {
        Self {
            status: Some(to),
            ..Default::default()
        }
    }
}

#[async_trait::async_trait]
pub trait CoupleStore: Send + Sync {
    async fn insert(&self, couple: &Couple) -> Result<Couple>;
    async fn find(&self, id: Uuid) -> Result<Option<Couple>>;
    async fn find_by_member(&self, user_id: Uuid) -> Result<Option<Couple>>;
    async fn find_by_invite_code(&self, code: &str) -> Result<Option<Couple>>;
    /// Link the partner and activate, only if no partner is linked yet
    async fn link_partner(&self, id: Uuid, partner_user_id: Uuid) -> Result<Option<Couple>>;
}

#[async_trait::async_trait]
pub trait ConversationStore: Send + Sync {
    async fn insert(&self, conversation: &Conversation) -> Result<Conversation>;
    async fn find(&self, id: Uuid) -> Result<Option<Conversation>>;
    async fn list_by_couple(&self, couple_id: Uuid) -> Result<Vec<Conversation>>;
    /// The compare-and-set primitive: apply `patch` iff `predicate`
    /// holds, atomically. `None` means the predicate did not match.
    async fn update_guarded(
        &self,
        id: Uuid,
        predicate: StatusPredicate,
        patch: ConversationPatch,
    ) -> Result<Option<Conversation>>;
}

#[async_trait::async_trait]
pub trait PerspectiveStore: Send + Sync {
    async fn insert(&self, perspective: &Perspective) -> Result<Perspective>;
    async fn list_by_conversation(&self, conversation_id: Uuid) -> Result<Vec<Perspective>>;
    async fn find_for_user(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Perspective>>;
    /// Save draft content; no-op once submitted
    async fn save_content(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        content: &str,
    ) -> Result<Option<Perspective>>;
    /// One-shot submit; no-op if already submitted or still empty
    async fn submit(&self, conversation_id: Uuid, user_id: Uuid) -> Result<Option<Perspective>>;
}

#[async_trait::async_trait]
pub trait MessageStore: Send + Sync {
    async fn insert(&self, message: &Message) -> Result<Message>;
    /// Transcript in creation order (sequence as tiebreaker)
    async fn list_by_conversation(&self, conversation_id: Uuid) -> Result<Vec<Message>>;
    async fn next_sequence(&self, conversation_id: Uuid) -> Result<i32>;
}

#[async_trait::async_trait]
pub trait InvitationStore: Send + Sync {
    /// Insert unless a pending invitation already exists for the same
    /// (conversation, invitee). `None` means a pending one exists.
    async fn insert_if_no_pending(&self, invitation: &Invitation) -> Result<Option<Invitation>>;
    async fn find(&self, id: Uuid) -> Result<Option<Invitation>>;
    /// Record the response; no-op unless still pending
    async fn respond(&self, id: Uuid, status: InvitationStatus) -> Result<Option<Invitation>>;
}

#[async_trait::async_trait]
pub trait AgreementStore: Send + Sync {
    async fn insert(&self, agreement: &Agreement) -> Result<Agreement>;
    async fn find(&self, id: Uuid) -> Result<Option<Agreement>>;
    async fn list_by_conversation(&self, conversation_id: Uuid) -> Result<Vec<Agreement>>;
    /// Conditional status move; `None` means the row was not in `from`
    async fn update_status(
        &self,
        id: Uuid,
        from: AgreementStatus,
        to: AgreementStatus,
    ) -> Result<Option<Agreement>>;
}

/// The full set of stores the engine is constructed from
#[derive(Clone)]
pub struct DialogueStores {
    pub couples: Arc<dyn CoupleStore>,
    pub conversations: Arc<dyn ConversationStore>,
    pub perspectives: Arc<dyn PerspectiveStore>,
    pub messages: Arc<dyn MessageStore>,
    pub invitations: Arc<dyn InvitationStore>,
    pub agreements: Arc<dyn AgreementStore>,
}

impl DialogueStores {
    /// Postgres-backed stores sharing one pool
    pub fn postgres(pool: PgPool) -> Self {
        use crate::repository::{
            AgreementRepository, ConversationRepository, CoupleRepository, InvitationRepository,
            MessageRepository, PerspectiveRepository,
        };

        Self {
            couples: Arc::new(CoupleRepository::new(pool.clone())),
            conversations: Arc::new(ConversationRepository::new(pool.clone())),
            perspectives: Arc::new(PerspectiveRepository::new(pool.clone())),
            messages: Arc::new(MessageRepository::new(pool.clone())),
            invitations: Arc::new(InvitationRepository::new(pool.clone())),
            agreements: Arc::new(AgreementRepository::new(pool)),
        }
    }

    /// In-memory stores backed by one shared map set
    pub fn in_memory() -> Self {
        let store = Arc::new(memory::MemoryStore::new());
        Self {
            couples: store.clone(),
            conversations: store.clone(),
            perspectives: store.clone(),
            messages: store.clone(),
            invitations: store.clone(),
            agreements: store,
        }
    }
}
