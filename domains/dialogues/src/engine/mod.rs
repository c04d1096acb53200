//! Dialogue engine service
//!
//! The public surface of the workflow: stateless operations over the
//! entity stores, guarded by the state machine, with fan-out through
//! the broadcaster and text generation through the LLM gateway. Both
//! collaborators are injected at construction, so the engine is
//! testable without a live socket layer or provider.
//!
//! Concurrency is settled at the store: every guarded mutation is a
//! conditional update, and a losing racer observes [`Outcome::NoOp`]
//! rather than an error. Broadcast failures are logged and dropped;
//! the store stays the single source of truth.

pub mod prompts;

use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use accord_common::{Error, Result, StateError};
use accord_llm::{CompletionRequest, LlmError, LlmService};
use accord_realtime::{Broadcaster, EventName, RoomId};

use crate::domain::entities::{
    Agreement, AgreementKind, Conversation, Couple, DetailLevel, DialogueStatus, Invitation,
    InvitationStatus, MemberRole, Message, MessageAudience, Perspective, Track, Visibility,
};
use crate::domain::state::{AgreementEvent, AgreementStateMachine, WorkflowEvent, WorkflowMachine};
use crate::domain::visibility::{self, PerspectiveView};
use crate::store::{ConversationPatch, DialogueStores, StatusPredicate};

/// Result of a guarded mutation that may lose a race.
///
/// The loser of a conditional update gets `NoOp`, never an error; its
/// caller simply refreshes state.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Applied(T),
    NoOp,
}

impl<T> Outcome<T> {
    pub fn is_noop(&self) -> bool {
        matches!(self, Outcome::NoOp)
    }

    pub fn applied(self) -> Option<T> {
        match self {
            Outcome::Applied(value) => Some(value),
            Outcome::NoOp => None,
        }
    }
}

/// Ephemeral presence signals. Fanned out, never persisted, no ordering
/// guarantee relative to content events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    Typing,
    Speaking,
    Reading,
    Online,
    Offline,
}

impl std::fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Typing => "typing",
            Self::Speaking => "speaking",
            Self::Reading => "reading",
            Self::Online => "online",
            Self::Offline => "offline",
        };
        write!(f, "{}", s)
    }
}

fn gateway_error(err: LlmError) -> Error {
    match err {
        LlmError::Unavailable(m) => Error::Upstream(m),
        LlmError::RateLimit => Error::Upstream("text-generation gateway rate limited".to_string()),
        LlmError::Empty => Error::Upstream("text-generation gateway returned no text".to_string()),
        LlmError::Request(m) | LlmError::Response(m) => Error::Internal(m),
    }
}

fn guard_error(event: &WorkflowEvent, err: StateError) -> Error {
    match err {
        StateError::TerminalState(from) => {
            Error::invalid_transition(from, event.to_string(), "conversation is resolved")
        }
        StateError::InvalidTransition { from, event } => {
            Error::invalid_transition(from, event, "no transition rule matches this state")
        }
    }
}

/// The dialogue workflow engine
pub struct DialogueEngine {
    stores: DialogueStores,
    llm: Arc<dyn LlmService>,
    broadcaster: Arc<dyn Broadcaster>,
}

impl DialogueEngine {
    pub fn new(
        stores: DialogueStores,
        llm: Arc<dyn LlmService>,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Self {
        Self {
            stores,
            llm,
            broadcaster,
        }
    }

    // ------------------------------------------------------------------
    // Internal helpers
    // ------------------------------------------------------------------

    async fn load_conversation(&self, id: Uuid) -> Result<Conversation> {
        self.stores
            .conversations
            .find(id)
            .await?
            .ok_or_else(|| Error::NotFound("Conversation not found".to_string()))
    }

    async fn couple_for(&self, conversation: &Conversation) -> Result<Option<Couple>> {
        match conversation.couple_id {
            Some(couple_id) => self.stores.couples.find(couple_id).await,
            None => Ok(None),
        }
    }

    /// The actor's role in this conversation, or `Unauthorized`
    fn participant_role(
        &self,
        conversation: &Conversation,
        couple: Option<&Couple>,
        actor: Uuid,
    ) -> Result<MemberRole> {
        if let Some(couple) = couple {
            return couple
                .member_role(actor)
                .ok_or_else(|| Error::Unauthorized("Not a participant".to_string()));
        }
        if conversation.created_by == actor {
            Ok(MemberRole::Creator)
        } else {
            Err(Error::Unauthorized("Not a participant".to_string()))
        }
    }

    /// Best-effort fan-out: failures are logged and dropped
    async fn emit(
        &self,
        room: RoomId,
        event: EventName,
        payload: serde_json::Value,
        exclude_actor: Option<Uuid>,
    ) {
        if let Err(err) = self
            .broadcaster
            .broadcast(room, event, payload, exclude_actor)
            .await
        {
            tracing::warn!(room = %room, event = %event, error = %err, "Dropping failed broadcast");
        }
    }

    async fn emit_status(&self, conversation: &Conversation, exclude_actor: Option<Uuid>) {
        self.emit(
            RoomId::for_conversation(conversation.id),
            EventName::ConversationStatusChanged,
            json!({
                "conversation_id": conversation.id,
                "status": conversation.status,
            }),
            exclude_actor,
        )
        .await;
    }

    async fn emit_message(&self, message: &Message, exclude_actor: Option<Uuid>) {
        self.emit(
            RoomId::for_conversation(message.conversation_id),
            EventName::ConversationMessageAppended,
            json!({
                "conversation_id": message.conversation_id,
                "message_id": message.id,
                "sender_type": message.sender_type,
                "sequence": message.sequence,
            }),
            exclude_actor,
        )
        .await;
    }

    async fn append_message(&self, message: Message, exclude_actor: Option<Uuid>) -> Result<Message> {
        let created = self.stores.messages.insert(&message).await?;
        self.emit_message(&created, exclude_actor).await;
        Ok(created)
    }

    // ------------------------------------------------------------------
    // Conversation lifecycle
    // ------------------------------------------------------------------

    /// Create a conversation. Direct conversations require an active
    /// couple; guided ones may start solo, before any couple exists.
    /// An empty perspective row is created for each known member.
    pub async fn create_conversation(
        &self,
        actor: Uuid,
        category: String,
        track: Track,
        visibility: Visibility,
    ) -> Result<Conversation> {
        let couple = self.stores.couples.find_by_member(actor).await?;

        let couple_id = match track {
            Track::Direct => {
                let couple = couple.as_ref().ok_or_else(|| {
                    Error::Validation("Direct conversations require an existing couple".to_string())
                })?;
                if couple.partner_user_id.is_none() {
                    return Err(Error::Validation(
                        "Direct conversations require both members to have joined".to_string(),
                    ));
                }
                Some(couple.id)
            }
            Track::Guided => couple.as_ref().map(|c| c.id),
        };

        let conversation = Conversation::new(actor, couple_id, category, track, visibility)?;
        let created = self.stores.conversations.insert(&conversation).await?;

        let members: Vec<Uuid> = match couple.as_ref() {
            Some(c) => [Some(c.creator_user_id), c.partner_user_id]
                .into_iter()
                .flatten()
                .collect(),
            None => vec![actor],
        };
        for member in members {
            self.stores
                .perspectives
                .insert(&Perspective::new_empty(created.id, member))
                .await?;
        }

        tracing::info!(
            conversation_id = %created.id,
            track = %created.track,
            status = %created.status,
            "Conversation created"
        );

        if let Some(couple) = couple {
            self.emit(
                RoomId::for_couple(couple.id),
                EventName::ConversationStatusChanged,
                json!({
                    "conversation_id": created.id,
                    "status": created.status,
                }),
                Some(actor),
            )
            .await;
        }

        Ok(created)
    }

    /// Fetch a conversation the actor participates in
    pub async fn get_conversation(&self, actor: Uuid, id: Uuid) -> Result<Conversation> {
        let conversation = self.load_conversation(id).await?;
        let couple = self.couple_for(&conversation).await?;
        self.participant_role(&conversation, couple.as_ref(), actor)?;
        Ok(conversation)
    }

    /// Transcript visible to the actor, in creation order
    pub async fn list_messages(&self, actor: Uuid, id: Uuid) -> Result<Vec<Message>> {
        let conversation = self.load_conversation(id).await?;
        let couple = self.couple_for(&conversation).await?;
        self.participant_role(&conversation, couple.as_ref(), actor)?;

        let messages = self.stores.messages.list_by_conversation(id).await?;
        Ok(
            visibility::visible_messages(&messages, actor, &conversation, couple.as_ref())
                .into_iter()
                .cloned()
                .collect(),
        )
    }

    /// Both perspective rows, each resolved through the both-submitted gate
    pub async fn get_perspectives(&self, actor: Uuid, id: Uuid) -> Result<Vec<PerspectiveView>> {
        let conversation = self.load_conversation(id).await?;
        let couple = self.couple_for(&conversation).await?;
        self.participant_role(&conversation, couple.as_ref(), actor)?;

        let perspectives = self.stores.perspectives.list_by_conversation(id).await?;
        let gate_open = visibility::all_submitted(&perspectives);
        Ok(perspectives
            .iter()
            .map(|p| visibility::resolve_perspective(p, actor, gate_open))
            .collect())
    }

    /// Append a user message. On the guided track the creator's first
    /// message opens clarification, and intake messages get an AI reply.
    pub async fn send_message(&self, actor: Uuid, id: Uuid, content: String) -> Result<Vec<Message>> {
        let conversation = self.load_conversation(id).await?;
        let couple = self.couple_for(&conversation).await?;
        self.participant_role(&conversation, couple.as_ref(), actor)?;

        if conversation.is_resolved() {
            return Err(Error::invalid_transition(
                conversation.status.to_string(),
                "send_message",
                "conversation is resolved",
            ));
        }

        let sequence = self.stores.messages.next_sequence(id).await?;
        let message = Message::new_user(id, actor, content, MessageAudience::All, sequence)?;
        let created = self.append_message(message, Some(actor)).await?;
        let mut appended = vec![created];

        if conversation.track == Track::Guided {
            if conversation.status == DialogueStatus::Intake && actor == conversation.created_by {
                let event = WorkflowEvent::FirstUserMessage;
                let target = WorkflowMachine::transition(conversation.track, conversation.status, &event)
                    .map_err(|e| guard_error(&event, e))?;
                if let Some(updated) = self
                    .stores
                    .conversations
                    .update_guarded(
                        id,
                        StatusPredicate::status_in([DialogueStatus::Intake]),
                        ConversationPatch::status(target),
                    )
                    .await?
                {
                    self.emit_status(&updated, Some(actor)).await;
                }
            }

            if matches!(
                conversation.status,
                DialogueStatus::Intake | DialogueStatus::Clarifying
            ) {
                let transcript = self.stores.messages.list_by_conversation(id).await?;
                let request = CompletionRequest {
                    model: String::new(),
                    system_prompt: Some(prompts::clarify_system_prompt(&conversation.category)),
                    messages: prompts::clarify_messages(&transcript),
                    max_tokens: None,
                };
                let response = self.llm.complete(request).await.map_err(gateway_error)?;

                let sequence = self.stores.messages.next_sequence(id).await?;
                let reply = Message::new_ai(id, response.content, MessageAudience::All, sequence)?;
                appended.push(self.append_message(reply, Some(actor)).await?);
            }

            if conversation.status == DialogueStatus::PartnerJoined {
                let event = WorkflowEvent::DialogueOpened;
                let target = WorkflowMachine::transition(conversation.track, conversation.status, &event)
                    .map_err(|e| guard_error(&event, e))?;
                if let Some(updated) = self
                    .stores
                    .conversations
                    .update_guarded(
                        id,
                        StatusPredicate::status_in([DialogueStatus::PartnerJoined]),
                        ConversationPatch::status(target),
                    )
                    .await?
                {
                    self.emit_status(&updated, Some(actor)).await;
                }
            }
        }

        Ok(appended)
    }

    /// Creator confirms the clarified intake, unlocking the invitation
    pub async fn confirm_intake(&self, actor: Uuid, id: Uuid) -> Result<Outcome<Conversation>> {
        let conversation = self.load_conversation(id).await?;
        if conversation.created_by != actor {
            return Err(Error::Unauthorized(
                "Only the creator may confirm intake".to_string(),
            ));
        }

        let event = WorkflowEvent::IntakeConfirmed;
        let target = WorkflowMachine::transition(conversation.track, conversation.status, &event)
            .map_err(|e| guard_error(&event, e))?;

        match self
            .stores
            .conversations
            .update_guarded(
                id,
                StatusPredicate::status_in([conversation.status]),
                ConversationPatch::status(target),
            )
            .await?
        {
            Some(updated) => {
                self.emit_status(&updated, Some(actor)).await;
                Ok(Outcome::Applied(updated))
            }
            None => Ok(Outcome::NoOp),
        }
    }

    // ------------------------------------------------------------------
    // Perspectives
    // ------------------------------------------------------------------

    /// Save draft perspective content. Locked once submitted.
    pub async fn save_perspective(
        &self,
        actor: Uuid,
        id: Uuid,
        content: String,
    ) -> Result<Perspective> {
        let conversation = self.load_conversation(id).await?;
        let couple = self.couple_for(&conversation).await?;
        self.participant_role(&conversation, couple.as_ref(), actor)?;
        Perspective::validate_content(&content)?;

        if conversation.is_resolved() {
            return Err(Error::invalid_transition(
                conversation.status.to_string(),
                "save_perspective",
                "conversation is resolved",
            ));
        }

        match self
            .stores
            .perspectives
            .save_content(id, actor, &content)
            .await?
        {
            Some(perspective) => Ok(perspective),
            None => match self.stores.perspectives.find_for_user(id, actor).await? {
                Some(p) if p.submitted => Err(Error::invalid_transition(
                    conversation.status.to_string(),
                    "save_perspective",
                    "perspective is locked after submission",
                )),
                _ => Err(Error::NotFound(
                    "No perspective row for this participant".to_string(),
                )),
            },
        }
    }

    /// One-shot submit. When every row is submitted the direct track
    /// advances to `submitted` and the gate opens for both readers.
    pub async fn submit_perspective(&self, actor: Uuid, id: Uuid) -> Result<Perspective> {
        let conversation = self.load_conversation(id).await?;
        let couple = self.couple_for(&conversation).await?;
        self.participant_role(&conversation, couple.as_ref(), actor)?;

        let Some(submitted) = self.stores.perspectives.submit(id, actor).await? else {
            return match self.stores.perspectives.find_for_user(id, actor).await? {
                Some(p) if p.submitted => Err(Error::invalid_transition(
                    conversation.status.to_string(),
                    "perspective_submitted",
                    "perspective already submitted",
                )),
                Some(_) => Err(Error::Validation(
                    "Cannot submit an empty perspective".to_string(),
                )),
                None => Err(Error::NotFound(
                    "No perspective row for this participant".to_string(),
                )),
            };
        };

        let perspectives = self.stores.perspectives.list_by_conversation(id).await?;
        let event = WorkflowEvent::PerspectiveSubmitted {
            all_submitted: visibility::all_submitted(&perspectives),
        };
        // The target depends only on the gate, so racing submitters from
        // either pre-submit status land on the same final state
        if WorkflowMachine::can_transition(conversation.track, conversation.status, &event) {
            let target = WorkflowMachine::transition(conversation.track, conversation.status, &event)
                .map_err(|e| guard_error(&event, e))?;
            if let Some(updated) = self
                .stores
                .conversations
                .update_guarded(
                    id,
                    StatusPredicate::status_in([
                        DialogueStatus::Created,
                        DialogueStatus::Perspectives,
                    ]),
                    ConversationPatch::status(target),
                )
                .await?
            {
                self.emit_status(&updated, Some(actor)).await;
            }
        }

        Ok(submitted)
    }

    // ------------------------------------------------------------------
    // Invitations
    // ------------------------------------------------------------------

    /// Invite the partner into a guided conversation. At most one
    /// pending invitation per invitee; re-inviting after a decline is
    /// allowed and does not regress state.
    pub async fn invite_partner(
        &self,
        actor: Uuid,
        id: Uuid,
        invited_user: Uuid,
        detail_level: DetailLevel,
    ) -> Result<Invitation> {
        let conversation = self.load_conversation(id).await?;
        if conversation.created_by != actor {
            return Err(Error::Unauthorized(
                "Only the creator may invite a partner".to_string(),
            ));
        }
        if invited_user == actor {
            return Err(Error::Validation(
                "Cannot invite yourself".to_string(),
            ));
        }

        let couple = self.couple_for(&conversation).await?;
        if let Some(couple) = couple.as_ref() {
            if let Some(partner) = couple.partner_user_id {
                if partner != invited_user {
                    return Err(Error::Validation(
                        "Invited user is not the couple's partner".to_string(),
                    ));
                }
            }
        }

        // Structurally legal only from confirmed / invite_sent on the
        // guided track
        let event = WorkflowEvent::InvitationSent;
        let target = WorkflowMachine::transition(conversation.track, conversation.status, &event)
            .map_err(|e| guard_error(&event, e))?;

        let invitation = Invitation::new(id, invited_user, detail_level);
        let created = self
            .stores
            .invitations
            .insert_if_no_pending(&invitation)
            .await?
            .ok_or_else(|| {
                Error::Validation(
                    "A pending invitation already exists for this user".to_string(),
                )
            })?;

        if let Some(updated) = self
            .stores
            .conversations
            .update_guarded(
                id,
                StatusPredicate::status_in([conversation.status]),
                ConversationPatch::status(target),
            )
            .await?
        {
            self.emit_status(&updated, Some(actor)).await;
        }

        let room = match conversation.couple_id {
            Some(couple_id) => RoomId::for_couple(couple_id),
            None => RoomId::for_conversation(id),
        };
        self.emit(
            room,
            EventName::InvitationSent,
            json!({
                "conversation_id": id,
                "invitation_id": created.id,
                "invited_user_id": invited_user,
                "detail_level": created.detail_level,
            }),
            Some(actor),
        )
        .await;

        Ok(created)
    }

    /// Respond to a pending invitation. Accepting flips the
    /// conversation to shared, activates the couple linkage, creates
    /// the partner's perspective row and persists an AI onboarding
    /// message. Declining records a creator-only system message and
    /// leaves the workflow state untouched.
    pub async fn respond_invitation(
        &self,
        actor: Uuid,
        invitation_id: Uuid,
        accept: bool,
    ) -> Result<Outcome<Invitation>> {
        let invitation = self
            .stores
            .invitations
            .find(invitation_id)
            .await?
            .ok_or_else(|| Error::NotFound("Invitation not found".to_string()))?;
        if invitation.invited_user_id != actor {
            return Err(Error::Unauthorized(
                "Invitation addressed to another user".to_string(),
            ));
        }

        let status = if accept {
            InvitationStatus::Accepted
        } else {
            InvitationStatus::Declined
        };
        let Some(responded) = self.stores.invitations.respond(invitation_id, status).await? else {
            // Already responded; the caller refreshes
            return Ok(Outcome::NoOp);
        };

        let conversation = self.load_conversation(invitation.conversation_id).await?;

        if accept {
            self.join_partner(actor, &conversation, &responded).await?;
        } else {
            let sequence = self
                .stores
                .messages
                .next_sequence(conversation.id)
                .await?;
            let notice = Message::new_system(
                conversation.id,
                "Your partner declined the invitation. You can send a new one when you are ready."
                    .to_string(),
                MessageAudience::CreatorOnly,
                sequence,
            )?;
            self.stores.messages.insert(&notice).await?;
        }

        let room = match conversation.couple_id {
            Some(couple_id) => RoomId::for_couple(couple_id),
            None => RoomId::for_conversation(conversation.id),
        };
        self.emit(
            room,
            EventName::InvitationResponded,
            json!({
                "conversation_id": conversation.id,
                "invitation_id": invitation_id,
                "status": responded.status,
            }),
            Some(actor),
        )
        .await;

        Ok(Outcome::Applied(responded))
    }

    /// Accept-side effects of an invitation response
    async fn join_partner(
        &self,
        actor: Uuid,
        conversation: &Conversation,
        invitation: &Invitation,
    ) -> Result<()> {
        let couple = match conversation.couple_id {
            Some(couple_id) => {
                let couple = self
                    .stores
                    .couples
                    .find(couple_id)
                    .await?
                    .ok_or_else(|| Error::NotFound("Couple not found".to_string()))?;
                if couple.is_member(actor) {
                    couple
                } else {
                    couple.validate_partner(actor)?;
                    self.stores
                        .couples
                        .link_partner(couple_id, actor)
                        .await?
                        .ok_or_else(|| {
                            Error::Validation("Couple already has two members".to_string())
                        })?
                }
            }
            None => {
                // Solo intake: the couple comes into being at join time
                let couple = Couple::new(conversation.created_by)?;
                let couple = self.stores.couples.insert(&couple).await?;
                self.stores
                    .couples
                    .link_partner(couple.id, actor)
                    .await?
                    .ok_or_else(|| Error::Internal("Failed to activate new couple".to_string()))?
            }
        };

        if self
            .stores
            .perspectives
            .find_for_user(conversation.id, actor)
            .await?
            .is_none()
        {
            self.stores
                .perspectives
                .insert(&Perspective::new_empty(conversation.id, actor))
                .await?;
        }

        let event = WorkflowEvent::PartnerJoined;
        let target = WorkflowMachine::transition(conversation.track, conversation.status, &event)
            .map_err(|e| guard_error(&event, e))?;
        let patch = ConversationPatch {
            status: Some(target),
            visibility: Some(Visibility::Shared),
            couple_id: Some(couple.id),
            ..Default::default()
        };
        if let Some(updated) = self
            .stores
            .conversations
            .update_guarded(
                conversation.id,
                StatusPredicate::status_in([conversation.status]),
                patch,
            )
            .await?
        {
            self.emit_status(&updated, Some(actor)).await;
        }

        // Onboarding message is best-effort: the join itself never
        // fails on the gateway
        let request = CompletionRequest {
            model: String::new(),
            system_prompt: None,
            messages: prompts::onboarding_prompt(&conversation.category, invitation.detail_level),
            max_tokens: None,
        };
        match self.llm.complete(request).await {
            Ok(response) => {
                let sequence = self
                    .stores
                    .messages
                    .next_sequence(conversation.id)
                    .await?;
                let message = Message::new_ai(
                    conversation.id,
                    response.content,
                    MessageAudience::All,
                    sequence,
                )?;
                self.append_message(message, Some(actor)).await?;
            }
            Err(err) => {
                tracing::warn!(
                    conversation_id = %conversation.id,
                    error = %err,
                    "Skipping onboarding message, gateway unavailable"
                );
            }
        }

        Ok(())
    }

    // ------------------------------------------------------------------
    // Synthesis lifecycle
    // ------------------------------------------------------------------

    /// Generate a fresh synthesis. Not idempotent: every call clears
    /// the previous text and the acceptance ledger, then streams the
    /// new text — each chunk is persisted incrementally and fanned out,
    /// and the full text lands as an AI message on completion. Stored
    /// rejection feedback is folded into the prompt and cleared once
    /// the new synthesis lands. A rejection recorded while the stream
    /// is still running is kept: it blocks the finalize's feedback
    /// clear and feeds the generation after this one.
    pub async fn request_synthesis(&self, actor: Uuid, id: Uuid) -> Result<Conversation> {
        let conversation = self.load_conversation(id).await?;
        let couple = self.couple_for(&conversation).await?;
        self.participant_role(&conversation, couple.as_ref(), actor)?;

        let event = WorkflowEvent::SynthesisRequested;
        let target = WorkflowMachine::transition(conversation.track, conversation.status, &event)
            .map_err(|e| guard_error(&event, e))?;

        // Claim the generation: reset the ledger and clear the old text
        let claim = ConversationPatch {
            status: Some(target),
            synthesis: Some(None),
            reset_acceptance: true,
            ..Default::default()
        };
        let claimed = self
            .stores
            .conversations
            .update_guarded(id, StatusPredicate::status_in([conversation.status]), claim)
            .await?
            .ok_or_else(|| {
                Error::invalid_transition(
                    conversation.status.to_string(),
                    event.to_string(),
                    "conversation state changed, refresh and re-request",
                )
            })?;
        self.emit_status(&claimed, Some(actor)).await;

        let perspectives = self.stores.perspectives.list_by_conversation(id).await?;
        let transcript = self.stores.messages.list_by_conversation(id).await?;
        let request = CompletionRequest {
            model: String::new(),
            system_prompt: Some(prompts::synthesis_system_prompt(&conversation.category)),
            messages: prompts::synthesis_messages(
                conversation.track,
                &perspectives,
                &transcript,
                conversation.rejection_feedback.as_deref(),
            ),
            max_tokens: None,
        };

        tracing::info!(conversation_id = %id, "Requesting synthesis stream");
        let mut stream = self
            .llm
            .complete_stream(request)
            .await
            .map_err(gateway_error)?;

        let mut full = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(gateway_error)?;
            if chunk.is_empty() {
                continue;
            }
            full.push_str(&chunk);
            // Two consumers of the same stream: incremental persistence
            // and live fan-out
            self.stores
                .conversations
                .update_guarded(
                    id,
                    StatusPredicate::default(),
                    ConversationPatch {
                        append_synthesis: Some(chunk.clone()),
                        ..Default::default()
                    },
                )
                .await?;
            self.emit(
                RoomId::for_conversation(id),
                EventName::SynthesisChunk,
                json!({ "conversation_id": id, "chunk": chunk }),
                None,
            )
            .await;
        }

        if full.trim().is_empty() {
            return Err(Error::Upstream(
                "Text generation returned an empty synthesis".to_string(),
            ));
        }

        let sequence = self.stores.messages.next_sequence(id).await?;
        let message = Message::new_ai(id, full.clone(), MessageAudience::All, sequence)?;
        self.append_message(message, None).await?;

        let finalized = ConversationPatch {
            synthesis: Some(Some(full)),
            rejection_feedback: Some(None),
            ..Default::default()
        };
        // A rejection can land while the stream is still running; its
        // feedback must survive the finalize and shape the next
        // generation, so the finalize loses to it
        let guard = StatusPredicate {
            requires_no_feedback: true,
            ..Default::default()
        };
        match self
            .stores
            .conversations
            .update_guarded(id, guard, finalized)
            .await?
        {
            Some(updated) => Ok(updated),
            None => {
                tracing::info!(
                    conversation_id = %id,
                    "Rejection landed mid-generation, keeping its feedback"
                );
                self.load_conversation(id).await
            }
        }
    }

    /// Record one side's acceptance of the current synthesis. Both
    /// sides accepted advances to discussion; the loser of a concurrent
    /// double-accept sees a no-op.
    pub async fn accept_synthesis(&self, actor: Uuid, id: Uuid) -> Result<Outcome<Conversation>> {
        let conversation = self.load_conversation(id).await?;
        let couple = self.couple_for(&conversation).await?;
        let role = self.participant_role(&conversation, couple.as_ref(), actor)?;

        let probe = WorkflowEvent::SynthesisAccepted {
            both_accepted: false,
        };
        WorkflowMachine::transition(conversation.track, conversation.status, &probe)
            .map_err(|e| guard_error(&probe, e))?;

        let predicate = StatusPredicate {
            status_in: vec![DialogueStatus::Synthesis, DialogueStatus::Review],
            requires_synthesis: true,
            requires_no_feedback: true,
            not_yet_accepted_by: Some(role),
        };
        let patch = ConversationPatch {
            set_accepted: Some(role),
            ..Default::default()
        };
        let Some(updated) = self
            .stores
            .conversations
            .update_guarded(id, predicate, patch)
            .await?
        else {
            let current = self.load_conversation(id).await?;
            if current.accepted_by(role) {
                return Ok(Outcome::NoOp);
            }
            if current.synthesis.is_none() {
                return Err(Error::invalid_transition(
                    current.status.to_string(),
                    "synthesis_accepted",
                    "no synthesis to accept",
                ));
            }
            if current.rejection_feedback.is_some() {
                return Err(Error::invalid_transition(
                    current.status.to_string(),
                    "synthesis_accepted",
                    "a rejection is pending a new synthesis",
                ));
            }
            return Err(Error::invalid_transition(
                current.status.to_string(),
                "synthesis_accepted",
                "conversation state changed",
            ));
        };

        let event = WorkflowEvent::SynthesisAccepted {
            both_accepted: updated.acceptance_complete(),
        };
        let target = WorkflowMachine::transition(conversation.track, updated.status, &event)
            .map_err(|e| guard_error(&event, e))?;
        let finalized = if target != updated.status {
            // A racing accepter may have already moved the status; the
            // predicate spans both pre-discussion states so whichever
            // side observes the completed ledger lands the move
            match self
                .stores
                .conversations
                .update_guarded(
                    id,
                    StatusPredicate::status_in([
                        DialogueStatus::Synthesis,
                        DialogueStatus::Review,
                    ]),
                    ConversationPatch::status(target),
                )
                .await?
            {
                Some(conversation) => conversation,
                None => self.load_conversation(id).await?,
            }
        } else {
            updated
        };

        self.emit(
            RoomId::for_conversation(id),
            EventName::ConversationStatusChanged,
            json!({
                "conversation_id": id,
                "status": finalized.status,
                "accepted_by": role,
            }),
            Some(actor),
        )
        .await;

        Ok(Outcome::Applied(finalized))
    }

    /// Reject the current synthesis with feedback. Clears both
    /// acceptance flags; the feedback shapes the next generation. A
    /// second rejection before a new synthesis is refused, as is
    /// rejecting when no synthesis exists.
    pub async fn reject_synthesis(
        &self,
        actor: Uuid,
        id: Uuid,
        feedback: String,
    ) -> Result<Conversation> {
        if feedback.trim().is_empty() {
            return Err(Error::Validation(
                "Rejection feedback is required".to_string(),
            ));
        }

        let conversation = self.load_conversation(id).await?;
        let couple = self.couple_for(&conversation).await?;
        self.participant_role(&conversation, couple.as_ref(), actor)?;

        let event = WorkflowEvent::SynthesisRejected;
        let target = WorkflowMachine::transition(conversation.track, conversation.status, &event)
            .map_err(|e| guard_error(&event, e))?;

        let predicate = StatusPredicate {
            status_in: vec![DialogueStatus::Synthesis, DialogueStatus::Review],
            requires_synthesis: true,
            requires_no_feedback: true,
            not_yet_accepted_by: None,
        };
        let patch = ConversationPatch {
            status: Some(target),
            reset_acceptance: true,
            rejection_feedback: Some(Some(feedback)),
            ..Default::default()
        };
        let Some(updated) = self
            .stores
            .conversations
            .update_guarded(id, predicate, patch)
            .await?
        else {
            let current = self.load_conversation(id).await?;
            let reason = if current.synthesis.is_none() {
                "no synthesis to reject"
            } else if current.rejection_feedback.is_some() {
                "a rejection is already pending a new synthesis"
            } else {
                "conversation state changed"
            };
            return Err(Error::invalid_transition(
                current.status.to_string(),
                "synthesis_rejected",
                reason,
            ));
        };

        self.emit_status(&updated, Some(actor)).await;
        Ok(updated)
    }

    // ------------------------------------------------------------------
    // Agreements & resolution
    // ------------------------------------------------------------------

    /// Propose a request or compromise during discussion. On the direct
    /// track the first agreement moves the conversation to commitments;
    /// perspective submission never does.
    pub async fn create_agreement(
        &self,
        actor: Uuid,
        id: Uuid,
        kind: AgreementKind,
        title: String,
        description: Option<String>,
    ) -> Result<Agreement> {
        let conversation = self.load_conversation(id).await?;
        let couple = self.couple_for(&conversation).await?;
        self.participant_role(&conversation, couple.as_ref(), actor)?;

        let event = WorkflowEvent::AgreementProposed;
        let target = WorkflowMachine::transition(conversation.track, conversation.status, &event)
            .map_err(|e| guard_error(&event, e))?;

        let agreement = Agreement::new(id, kind, Some(actor), title, description)?;
        let created = self.stores.agreements.insert(&agreement).await?;

        if target != conversation.status {
            if let Some(updated) = self
                .stores
                .conversations
                .update_guarded(
                    id,
                    StatusPredicate::status_in([conversation.status]),
                    ConversationPatch::status(target),
                )
                .await?
            {
                self.emit_status(&updated, Some(actor)).await;
            }
        }

        let event_name = match kind {
            AgreementKind::Request => EventName::RequestCreated,
            AgreementKind::Compromise => EventName::CompromiseCreated,
        };
        self.emit(
            RoomId::for_conversation(id),
            event_name,
            json!({
                "conversation_id": id,
                "agreement_id": created.id,
                "kind": created.kind,
                "status": created.status,
            }),
            Some(actor),
        )
        .await;

        Ok(created)
    }

    /// Drive an agreement through its own lifecycle. A stale
    /// expectation loses the conditional update and reports a no-op.
    pub async fn update_agreement_status(
        &self,
        actor: Uuid,
        agreement_id: Uuid,
        event: AgreementEvent,
    ) -> Result<Outcome<Agreement>> {
        let agreement = self
            .stores
            .agreements
            .find(agreement_id)
            .await?
            .ok_or_else(|| Error::NotFound("Agreement not found".to_string()))?;
        let conversation = self.load_conversation(agreement.conversation_id).await?;
        let couple = self.couple_for(&conversation).await?;
        self.participant_role(&conversation, couple.as_ref(), actor)?;

        let target = AgreementStateMachine::transition(agreement.status, event).map_err(|e| {
            match e {
                StateError::TerminalState(from) => {
                    Error::invalid_transition(from, event.to_string(), "agreement is settled")
                }
                StateError::InvalidTransition { from, event } => {
                    Error::invalid_transition(from, event, "no transition rule matches this state")
                }
            }
        })?;

        let Some(updated) = self
            .stores
            .agreements
            .update_status(agreement_id, agreement.status, target)
            .await?
        else {
            return Ok(Outcome::NoOp);
        };

        let event_name = match updated.kind {
            AgreementKind::Request => EventName::RequestUpdated,
            AgreementKind::Compromise => EventName::CompromiseUpdated,
        };
        self.emit(
            RoomId::for_conversation(conversation.id),
            event_name,
            json!({
                "conversation_id": conversation.id,
                "agreement_id": updated.id,
                "status": updated.status,
            }),
            Some(actor),
        )
        .await;

        Ok(Outcome::Applied(updated))
    }

    /// Resolve the conversation. The terminal summary extraction of
    /// Requests/Compromises is best-effort: gateway or parse failures
    /// are logged and swallowed, the conversation resolves regardless.
    pub async fn resolve(&self, actor: Uuid, id: Uuid, notes: String) -> Result<Outcome<Conversation>> {
        let conversation = self.load_conversation(id).await?;
        let couple = self.couple_for(&conversation).await?;
        self.participant_role(&conversation, couple.as_ref(), actor)?;

        let event = WorkflowEvent::Resolve;
        WorkflowMachine::transition(conversation.track, conversation.status, &event)
            .map_err(|e| guard_error(&event, e))?;

        let patch = ConversationPatch {
            status: Some(DialogueStatus::Resolved),
            resolution_notes: Some(notes.clone()),
            resolved_at: Some(Utc::now()),
            ..Default::default()
        };
        let Some(resolved) = self
            .stores
            .conversations
            .update_guarded(
                id,
                StatusPredicate::status_in([
                    DialogueStatus::Discussion,
                    DialogueStatus::Commitments,
                ]),
                patch,
            )
            .await?
        else {
            let current = self.load_conversation(id).await?;
            if current.is_resolved() {
                return Ok(Outcome::NoOp);
            }
            return Err(Error::invalid_transition(
                current.status.to_string(),
                event.to_string(),
                "conversation state changed",
            ));
        };

        self.emit_status(&resolved, Some(actor)).await;

        if let Err(err) = self.extract_agreements(&resolved, &notes).await {
            tracing::warn!(
                conversation_id = %id,
                error = %err,
                "Terminal agreement extraction failed, resolving without artifacts"
            );
        }

        Ok(Outcome::Applied(resolved))
    }

    async fn extract_agreements(&self, conversation: &Conversation, notes: &str) -> Result<()> {
        let request = CompletionRequest {
            model: String::new(),
            system_prompt: Some(prompts::extraction_system_prompt()),
            messages: prompts::extraction_messages(conversation.synthesis.as_deref(), notes),
            max_tokens: None,
        };
        let response = self.llm.complete(request).await.map_err(gateway_error)?;
        let extracted = prompts::parse_extraction(&response.content)?;

        for item in extracted {
            let agreement =
                Agreement::new(conversation.id, item.kind, None, item.title, item.description)?;
            let created = self.stores.agreements.insert(&agreement).await?;
            let event_name = match created.kind {
                AgreementKind::Request => EventName::RequestCreated,
                AgreementKind::Compromise => EventName::CompromiseCreated,
            };
            self.emit(
                RoomId::for_conversation(conversation.id),
                event_name,
                json!({
                    "conversation_id": conversation.id,
                    "agreement_id": created.id,
                    "kind": created.kind,
                    "status": created.status,
                }),
                None,
            )
            .await;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Presence
    // ------------------------------------------------------------------

    /// Fan out an ephemeral presence signal. Nothing is persisted.
    pub async fn record_activity(&self, actor: Uuid, id: Uuid, kind: ActivityKind) -> Result<()> {
        let conversation = self.load_conversation(id).await?;
        let couple = self.couple_for(&conversation).await?;
        self.participant_role(&conversation, couple.as_ref(), actor)?;

        self.emit(
            RoomId::for_conversation(id),
            EventName::PartnerActivity,
            json!({
                "conversation_id": id,
                "user_id": actor,
                "kind": kind,
            }),
            Some(actor),
        )
        .await;
        Ok(())
    }
}
