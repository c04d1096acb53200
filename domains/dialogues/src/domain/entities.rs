//! Domain entities for the dialogue workflow
//!
//! Each entity includes validation, serialization, and the business
//! rules that do not depend on stored state. Stateful rules (guards,
//! races) live in the engine and the store layer.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use accord_common::{Error, Result};

/// Maximum category string length (varchar(100))
const MAX_CATEGORY_LENGTH: usize = 100;

/// Maximum free-text length for perspectives and messages (CHECK length <= 20000)
const MAX_TEXT_LENGTH: usize = 20_000;

/// Which side of the couple an actor is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Creator,
    Partner,
}

impl MemberRole {
    pub fn other(&self) -> MemberRole {
        match self {
            MemberRole::Creator => MemberRole::Partner,
            MemberRole::Partner => MemberRole::Creator,
        }
    }
}

impl std::fmt::Display for MemberRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemberRole::Creator => write!(f, "creator"),
            MemberRole::Partner => write!(f, "partner"),
        }
    }
}

/// Couple status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CoupleStatus {
    #[default]
    Pending,
    Active,
}

impl std::fmt::Display for CoupleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoupleStatus::Pending => write!(f, "pending"),
            CoupleStatus::Active => write!(f, "active"),
        }
    }
}

/// Couple entity - the root aggregate for access control.
/// Never exceeds two members.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Couple {
    pub id: Uuid,
    pub creator_user_id: Uuid,
    pub partner_user_id: Option<Uuid>,
    pub invite_code: String,
    pub status: CoupleStatus,
    pub created_at: DateTime<Utc>,
}

impl Couple {
    /// Create a new couple with a fresh invite code
    pub fn new(creator_user_id: Uuid) -> Result<Self> {
        // 6 random bytes -> 8 URL-safe chars, unique per couple
        let mut code_bytes = [0u8; 6];
        getrandom::getrandom(&mut code_bytes)
            .map_err(|e| Error::Internal(format!("Failed to generate invite code: {}", e)))?;
        let invite_code = URL_SAFE_NO_PAD.encode(code_bytes);

        Ok(Couple {
            id: Uuid::new_v4(),
            creator_user_id,
            partner_user_id: None,
            invite_code,
            status: CoupleStatus::default(),
            created_at: Utc::now(),
        })
    }

    /// Which role a user plays in this couple, if any
    pub fn member_role(&self, user_id: Uuid) -> Option<MemberRole> {
        if self.creator_user_id == user_id {
            Some(MemberRole::Creator)
        } else if self.partner_user_id == Some(user_id) {
            Some(MemberRole::Partner)
        } else {
            None
        }
    }

    pub fn is_member(&self, user_id: Uuid) -> bool {
        self.member_role(user_id).is_some()
    }

    /// The other member's user id, if both sides exist
    pub fn other_member(&self, user_id: Uuid) -> Option<Uuid> {
        match self.member_role(user_id)? {
            MemberRole::Creator => self.partner_user_id,
            MemberRole::Partner => Some(self.creator_user_id),
        }
    }

    pub fn member_for_role(&self, role: MemberRole) -> Option<Uuid> {
        match role {
            MemberRole::Creator => Some(self.creator_user_id),
            MemberRole::Partner => self.partner_user_id,
        }
    }

    /// Validate a candidate partner before linking
    pub fn validate_partner(&self, partner_user_id: Uuid) -> Result<()> {
        if partner_user_id == self.creator_user_id {
            return Err(Error::Validation(
                "Partner must be a different user than the creator".to_string(),
            ));
        }
        if self.partner_user_id.is_some() {
            return Err(Error::Validation(
                "Couple already has two members".to_string(),
            ));
        }
        Ok(())
    }
}

/// Which workflow track a conversation follows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Track {
    /// Solo intake with AI clarification, then partner invitation
    Guided,
    /// Created directly between two existing couple members
    Direct,
}

impl std::fmt::Display for Track {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Track::Guided => write!(f, "guided"),
            Track::Direct => write!(f, "direct"),
        }
    }
}

/// Conversation workflow status (both tracks share one closed set)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DialogueStatus {
    // Guided track
    Intake,
    Clarifying,
    Confirmed,
    InviteSent,
    PartnerJoined,
    Active,
    // Direct track
    Created,
    Perspectives,
    Submitted,
    Synthesis,
    Commitments,
    // Shared tail
    Review,
    Discussion,
    Resolved,
}

impl std::fmt::Display for DialogueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DialogueStatus::Intake => "intake",
            DialogueStatus::Clarifying => "clarifying",
            DialogueStatus::Confirmed => "confirmed",
            DialogueStatus::InviteSent => "invite_sent",
            DialogueStatus::PartnerJoined => "partner_joined",
            DialogueStatus::Active => "active",
            DialogueStatus::Created => "created",
            DialogueStatus::Perspectives => "perspectives",
            DialogueStatus::Submitted => "submitted",
            DialogueStatus::Synthesis => "synthesis",
            DialogueStatus::Commitments => "commitments",
            DialogueStatus::Review => "review",
            DialogueStatus::Discussion => "discussion",
            DialogueStatus::Resolved => "resolved",
        };
        write!(f, "{}", s)
    }
}

/// Conversation visibility
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Private,
    Shared,
}

impl std::fmt::Display for Visibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Visibility::Private => write!(f, "private"),
            Visibility::Shared => write!(f, "shared"),
        }
    }
}

/// Conversation entity - root of perspectives, messages, and invitations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Conversation {
    pub id: Uuid,
    /// Nullable until a couple exists (solo intake)
    pub couple_id: Option<Uuid>,
    pub created_by: Uuid,
    pub category: String,
    pub track: Track,
    pub status: DialogueStatus,
    pub visibility: Visibility,
    /// Current AI-authored synthesis text, reset on regeneration
    pub synthesis: Option<String>,
    pub accepted_by_creator: bool,
    pub accepted_by_partner: bool,
    /// Feedback from the last rejection; cleared when a new synthesis lands
    pub rejection_feedback: Option<String>,
    pub resolution_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Create a new conversation. Guided conversations start in intake;
    /// direct ones (between two existing couple members) start created
    /// and shared.
    pub fn new(
        created_by: Uuid,
        couple_id: Option<Uuid>,
        category: String,
        track: Track,
        visibility: Visibility,
    ) -> Result<Self> {
        if category.trim().is_empty() {
            return Err(Error::Validation("Category is required".to_string()));
        }
        if category.len() > MAX_CATEGORY_LENGTH {
            return Err(Error::Validation(format!(
                "Category must be at most {} characters",
                MAX_CATEGORY_LENGTH
            )));
        }
        if track == Track::Direct && couple_id.is_none() {
            return Err(Error::Validation(
                "Direct conversations require an existing couple".to_string(),
            ));
        }

        let status = match track {
            Track::Guided => DialogueStatus::Intake,
            Track::Direct => DialogueStatus::Created,
        };

        let now = Utc::now();
        Ok(Conversation {
            id: Uuid::new_v4(),
            couple_id,
            created_by,
            category,
            track,
            status,
            visibility,
            synthesis: None,
            accepted_by_creator: false,
            accepted_by_partner: false,
            rejection_feedback: None,
            resolution_notes: None,
            created_at: now,
            resolved_at: None,
            updated_at: now,
        })
    }

    pub fn accepted_by(&self, role: MemberRole) -> bool {
        match role {
            MemberRole::Creator => self.accepted_by_creator,
            MemberRole::Partner => self.accepted_by_partner,
        }
    }

    /// Both participants have signed off on the current synthesis
    pub fn acceptance_complete(&self) -> bool {
        self.accepted_by_creator && self.accepted_by_partner
    }

    pub fn is_resolved(&self) -> bool {
        self.status == DialogueStatus::Resolved
    }
}

/// Perspective entity - one participant's private account of the issue.
/// Immutable once submitted; created empty for each known member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Perspective {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub user_id: Uuid,
    pub content: Option<String>,
    pub submitted: bool,
    pub submitted_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Perspective {
    /// Create the empty row for a participant at conversation creation
    pub fn new_empty(conversation_id: Uuid, user_id: Uuid) -> Self {
        Perspective {
            id: Uuid::new_v4(),
            conversation_id,
            user_id,
            content: None,
            submitted: false,
            submitted_at: None,
            updated_at: Utc::now(),
        }
    }

    /// Validate content before a save or submit
    pub fn validate_content(content: &str) -> Result<()> {
        if content.trim().is_empty() {
            return Err(Error::Validation(
                "Perspective content cannot be empty or whitespace-only".to_string(),
            ));
        }
        if content.len() > MAX_TEXT_LENGTH {
            return Err(Error::Validation(format!(
                "Perspective must be at most {} characters",
                MAX_TEXT_LENGTH
            )));
        }
        Ok(())
    }
}

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SenderType {
    User,
    Ai,
    System,
}

impl std::fmt::Display for SenderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SenderType::User => write!(f, "user"),
            SenderType::Ai => write!(f, "ai"),
            SenderType::System => write!(f, "system"),
        }
    }
}

/// Per-message visibility tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MessageAudience {
    #[default]
    All,
    CreatorOnly,
    PartnerOnly,
}

impl std::fmt::Display for MessageAudience {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageAudience::All => write!(f, "all"),
            MessageAudience::CreatorOnly => write!(f, "creator_only"),
            MessageAudience::PartnerOnly => write!(f, "partner_only"),
        }
    }
}

/// Message entity - ordered by creation time within a conversation,
/// sequence as tiebreaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_type: SenderType,
    /// Null for ai/system senders
    pub sender_id: Option<Uuid>,
    pub content: String,
    pub visible_to: MessageAudience,
    pub sequence: i32,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new_user(
        conversation_id: Uuid,
        sender_id: Uuid,
        content: String,
        visible_to: MessageAudience,
        sequence: i32,
    ) -> Result<Self> {
        Self::validate(&content, sequence)?;
        Ok(Self::build(
            conversation_id,
            SenderType::User,
            Some(sender_id),
            content,
            visible_to,
            sequence,
        ))
    }

    pub fn new_ai(
        conversation_id: Uuid,
        content: String,
        visible_to: MessageAudience,
        sequence: i32,
    ) -> Result<Self> {
        Self::validate(&content, sequence)?;
        Ok(Self::build(
            conversation_id,
            SenderType::Ai,
            None,
            content,
            visible_to,
            sequence,
        ))
    }

    pub fn new_system(
        conversation_id: Uuid,
        content: String,
        visible_to: MessageAudience,
        sequence: i32,
    ) -> Result<Self> {
        Self::validate(&content, sequence)?;
        Ok(Self::build(
            conversation_id,
            SenderType::System,
            None,
            content,
            visible_to,
            sequence,
        ))
    }

    fn build(
        conversation_id: Uuid,
        sender_type: SenderType,
        sender_id: Option<Uuid>,
        content: String,
        visible_to: MessageAudience,
        sequence: i32,
    ) -> Self {
        Message {
            id: Uuid::new_v4(),
            conversation_id,
            sender_type,
            sender_id,
            content,
            visible_to,
            sequence,
            created_at: Utc::now(),
        }
    }

    fn validate(content: &str, sequence: i32) -> Result<()> {
        if content.trim().is_empty() {
            return Err(Error::Validation(
                "Message content cannot be empty or whitespace-only".to_string(),
            ));
        }
        if content.len() > MAX_TEXT_LENGTH {
            return Err(Error::Validation(format!(
                "Message must be at most {} characters",
                MAX_TEXT_LENGTH
            )));
        }
        if sequence < 1 {
            return Err(Error::Validation(
                "Message sequence must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// How much of the creator's intake the invited partner gets to see
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DetailLevel {
    Minimal,
    #[default]
    Summary,
    Full,
}

impl std::fmt::Display for DetailLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DetailLevel::Minimal => write!(f, "minimal"),
            DetailLevel::Summary => write!(f, "summary"),
            DetailLevel::Full => write!(f, "full"),
        }
    }
}

/// Invitation status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum InvitationStatus {
    #[default]
    Pending,
    Accepted,
    Declined,
}

impl std::fmt::Display for InvitationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvitationStatus::Pending => write!(f, "pending"),
            InvitationStatus::Accepted => write!(f, "accepted"),
            InvitationStatus::Declined => write!(f, "declined"),
        }
    }
}

/// Invitation entity - at most one pending per (conversation, invitee)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Invitation {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub invited_user_id: Uuid,
    pub detail_level: DetailLevel,
    pub status: InvitationStatus,
    pub created_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
}

impl Invitation {
    pub fn new(conversation_id: Uuid, invited_user_id: Uuid, detail_level: DetailLevel) -> Self {
        Invitation {
            id: Uuid::new_v4(),
            conversation_id,
            invited_user_id,
            detail_level,
            status: InvitationStatus::default(),
            created_at: Utc::now(),
            responded_at: None,
        }
    }
}

/// Terminal artifact kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AgreementKind {
    Request,
    Compromise,
}

impl std::fmt::Display for AgreementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgreementKind::Request => write!(f, "request"),
            AgreementKind::Compromise => write!(f, "compromise"),
        }
    }
}

/// Agreement lifecycle, independent of the owning conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AgreementStatus {
    #[default]
    Proposed,
    Accepted,
    Declined,
    InProgress,
    Fulfilled,
    Broken,
}

impl std::fmt::Display for AgreementStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AgreementStatus::Proposed => "proposed",
            AgreementStatus::Accepted => "accepted",
            AgreementStatus::Declined => "declined",
            AgreementStatus::InProgress => "in_progress",
            AgreementStatus::Fulfilled => "fulfilled",
            AgreementStatus::Broken => "broken",
        };
        write!(f, "{}", s)
    }
}

/// Request / Compromise entity - created during discussion or extracted
/// at resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Agreement {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub kind: AgreementKind,
    pub proposed_by: Option<Uuid>,
    pub title: String,
    pub description: Option<String>,
    pub status: AgreementStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Agreement {
    pub fn new(
        conversation_id: Uuid,
        kind: AgreementKind,
        proposed_by: Option<Uuid>,
        title: String,
        description: Option<String>,
    ) -> Result<Self> {
        if title.trim().is_empty() {
            return Err(Error::Validation(
                "Agreement title cannot be empty".to_string(),
            ));
        }

        let now = Utc::now();
        Ok(Agreement {
            id: Uuid::new_v4(),
            conversation_id,
            kind,
            proposed_by,
            title,
            description,
            status: AgreementStatus::default(),
            created_at: now,
            updated_at: now,
        })
    }
}
