//! Workflow state machines
//!
//! Both conversation tracks are instances of one machine driven by a
//! transition table; the table is data, not scattered conditionals.
//! Guards that need stored state (synthesis present, perspective
//! ownership, race outcomes) are enforced by the engine and the store's
//! conditional updates — the table only encodes structural legality.

pub use accord_common::StateError;

use crate::domain::entities::{AgreementStatus, DialogueStatus, Track};

/// Events that drive conversation status transitions
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WorkflowEvent {
    /// First user message from the creator during intake
    FirstUserMessage,
    /// Creator confirms the clarified intake
    IntakeConfirmed,
    /// Partner invitation created (or re-sent after a decline)
    InvitationSent,
    /// Invited partner accepted
    PartnerJoined,
    /// First message after the partner joined opens open discussion
    DialogueOpened,
    PerspectiveSubmitted {
        all_submitted: bool,
    },
    SynthesisRequested,
    SynthesisAccepted {
        both_accepted: bool,
    },
    SynthesisRejected,
    /// A request/compromise was proposed during discussion
    AgreementProposed,
    Resolve,
}

/// Event discriminant used for table lookups
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventKind {
    FirstUserMessage,
    IntakeConfirmed,
    InvitationSent,
    PartnerJoined,
    DialogueOpened,
    PerspectiveSubmitted,
    SynthesisRequested,
    SynthesisAccepted,
    SynthesisRejected,
    AgreementProposed,
    Resolve,
}

impl WorkflowEvent {
    fn kind(&self) -> EventKind {
        match self {
            Self::FirstUserMessage => EventKind::FirstUserMessage,
            Self::IntakeConfirmed => EventKind::IntakeConfirmed,
            Self::InvitationSent => EventKind::InvitationSent,
            Self::PartnerJoined => EventKind::PartnerJoined,
            Self::DialogueOpened => EventKind::DialogueOpened,
            Self::PerspectiveSubmitted { .. } => EventKind::PerspectiveSubmitted,
            Self::SynthesisRequested => EventKind::SynthesisRequested,
            Self::SynthesisAccepted { .. } => EventKind::SynthesisAccepted,
            Self::SynthesisRejected => EventKind::SynthesisRejected,
            Self::AgreementProposed => EventKind::AgreementProposed,
            Self::Resolve => EventKind::Resolve,
        }
    }
}

impl std::fmt::Display for WorkflowEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::FirstUserMessage => "first_user_message",
            Self::IntakeConfirmed => "intake_confirmed",
            Self::InvitationSent => "invitation_sent",
            Self::PartnerJoined => "partner_joined",
            Self::DialogueOpened => "dialogue_opened",
            Self::PerspectiveSubmitted { .. } => "perspective_submitted",
            Self::SynthesisRequested => "synthesis_requested",
            Self::SynthesisAccepted { .. } => "synthesis_accepted",
            Self::SynthesisRejected => "synthesis_rejected",
            Self::AgreementProposed => "agreement_proposed",
            Self::Resolve => "resolve",
        };
        write!(f, "{}", s)
    }
}

/// Table-level guard over the event payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Guard {
    Always,
    AllSubmitted,
    NotAllSubmitted,
    BothAccepted,
    NotBothAccepted,
}

impl Guard {
    fn allows(&self, event: &WorkflowEvent) -> bool {
        match (self, event) {
            (Guard::Always, _) => true,
            (Guard::AllSubmitted, WorkflowEvent::PerspectiveSubmitted { all_submitted }) => {
                *all_submitted
            }
            (Guard::NotAllSubmitted, WorkflowEvent::PerspectiveSubmitted { all_submitted }) => {
                !*all_submitted
            }
            (Guard::BothAccepted, WorkflowEvent::SynthesisAccepted { both_accepted }) => {
                *both_accepted
            }
            (Guard::NotBothAccepted, WorkflowEvent::SynthesisAccepted { both_accepted }) => {
                !*both_accepted
            }
            _ => false,
        }
    }
}

struct TransitionRule {
    from: DialogueStatus,
    event: EventKind,
    guard: Guard,
    to: DialogueStatus,
}

const fn rule(
    from: DialogueStatus,
    event: EventKind,
    guard: Guard,
    to: DialogueStatus,
) -> TransitionRule {
    TransitionRule {
        from,
        event,
        guard,
        to,
    }
}

use DialogueStatus as S;
use EventKind as E;
use Guard as G;

/// Guided track: solo intake, clarification, partner invitation, then
/// the shared review/discussion tail
const GUIDED_RULES: &[TransitionRule] = &[
    rule(S::Intake, E::FirstUserMessage, G::Always, S::Clarifying),
    rule(S::Clarifying, E::IntakeConfirmed, G::Always, S::Confirmed),
    rule(S::Confirmed, E::InvitationSent, G::Always, S::InviteSent),
    // Re-invite after a decline; no state regression
    rule(S::InviteSent, E::InvitationSent, G::Always, S::InviteSent),
    rule(S::InviteSent, E::PartnerJoined, G::Always, S::PartnerJoined),
    rule(S::PartnerJoined, E::DialogueOpened, G::Always, S::Active),
    rule(S::PartnerJoined, E::SynthesisRequested, G::Always, S::Review),
    rule(S::Active, E::SynthesisRequested, G::Always, S::Review),
    // Regeneration after rejection
    rule(S::Review, E::SynthesisRequested, G::Always, S::Review),
    rule(S::Review, E::SynthesisAccepted, G::NotBothAccepted, S::Review),
    rule(S::Review, E::SynthesisAccepted, G::BothAccepted, S::Discussion),
    rule(S::Review, E::SynthesisRejected, G::Always, S::Review),
    rule(S::Discussion, E::AgreementProposed, G::Always, S::Discussion),
    rule(S::Discussion, E::Resolve, G::Always, S::Resolved),
];

/// Direct track: both perspectives up front, synthesis, then the shared
/// review/discussion tail with an explicit commitments stage
const DIRECT_RULES: &[TransitionRule] = &[
    rule(S::Created, E::PerspectiveSubmitted, G::NotAllSubmitted, S::Perspectives),
    rule(S::Created, E::PerspectiveSubmitted, G::AllSubmitted, S::Submitted),
    rule(S::Perspectives, E::PerspectiveSubmitted, G::NotAllSubmitted, S::Perspectives),
    rule(S::Perspectives, E::PerspectiveSubmitted, G::AllSubmitted, S::Submitted),
    rule(S::Submitted, E::SynthesisRequested, G::Always, S::Synthesis),
    // Back-to-back regeneration; synthesis is deliberately not idempotent
    rule(S::Synthesis, E::SynthesisRequested, G::Always, S::Synthesis),
    rule(S::Synthesis, E::SynthesisAccepted, G::NotBothAccepted, S::Review),
    rule(S::Synthesis, E::SynthesisAccepted, G::BothAccepted, S::Discussion),
    rule(S::Synthesis, E::SynthesisRejected, G::Always, S::Review),
    rule(S::Review, E::SynthesisRequested, G::Always, S::Synthesis),
    rule(S::Review, E::SynthesisAccepted, G::NotBothAccepted, S::Review),
    rule(S::Review, E::SynthesisAccepted, G::BothAccepted, S::Discussion),
    rule(S::Review, E::SynthesisRejected, G::Always, S::Review),
    rule(S::Discussion, E::AgreementProposed, G::Always, S::Commitments),
    rule(S::Commitments, E::AgreementProposed, G::Always, S::Commitments),
    rule(S::Discussion, E::Resolve, G::Always, S::Resolved),
    rule(S::Commitments, E::Resolve, G::Always, S::Resolved),
];

/// Conversation workflow state machine
pub struct WorkflowMachine;

impl WorkflowMachine {
    fn rules(track: Track) -> &'static [TransitionRule] {
        match track {
            Track::Guided => GUIDED_RULES,
            Track::Direct => DIRECT_RULES,
        }
    }

    /// Attempt a state transition
    pub fn transition(
        track: Track,
        current: DialogueStatus,
        event: &WorkflowEvent,
    ) -> Result<DialogueStatus, StateError> {
        if current == DialogueStatus::Resolved {
            return Err(StateError::TerminalState(current.to_string()));
        }

        let kind = event.kind();
        Self::rules(track)
            .iter()
            .find(|r| r.from == current && r.event == kind && r.guard.allows(event))
            .map(|r| r.to)
            .ok_or_else(|| StateError::InvalidTransition {
                from: current.to_string(),
                event: event.to_string(),
            })
    }

    /// Check if a transition is valid without performing it
    pub fn can_transition(track: Track, current: DialogueStatus, event: &WorkflowEvent) -> bool {
        Self::transition(track, current, event).is_ok()
    }

    /// All states reachable in one step from `current` on this track
    pub fn valid_next_states(track: Track, current: DialogueStatus) -> Vec<DialogueStatus> {
        let mut next: Vec<DialogueStatus> = Self::rules(track)
            .iter()
            .filter(|r| r.from == current)
            .map(|r| r.to)
            .collect();
        next.dedup();
        next
    }
}

// ============================================================================
// Agreement State Machine
// ============================================================================

/// Events that trigger agreement state transitions
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AgreementEvent {
    /// The other member accepts the proposal
    Accept,
    /// The other member declines the proposal
    Decline,
    /// Work on the accepted agreement begins
    Start,
    Fulfill,
    Break,
}

impl std::fmt::Display for AgreementEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Accept => write!(f, "accept"),
            Self::Decline => write!(f, "decline"),
            Self::Start => write!(f, "start"),
            Self::Fulfill => write!(f, "fulfill"),
            Self::Break => write!(f, "break"),
        }
    }
}

impl AgreementStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Declined | Self::Fulfilled | Self::Broken)
    }
}

/// Agreement (request/compromise) state machine
pub struct AgreementStateMachine;

impl AgreementStateMachine {
    /// Attempt a state transition
    pub fn transition(
        current: AgreementStatus,
        event: AgreementEvent,
    ) -> Result<AgreementStatus, StateError> {
        if current.is_terminal() {
            return Err(StateError::TerminalState(current.to_string()));
        }

        let next = match (&current, &event) {
            (AgreementStatus::Proposed, AgreementEvent::Accept) => AgreementStatus::Accepted,
            (AgreementStatus::Proposed, AgreementEvent::Decline) => AgreementStatus::Declined,
            (AgreementStatus::Accepted, AgreementEvent::Start) => AgreementStatus::InProgress,
            (AgreementStatus::InProgress, AgreementEvent::Fulfill) => AgreementStatus::Fulfilled,
            (AgreementStatus::InProgress, AgreementEvent::Break) => AgreementStatus::Broken,
            _ => {
                return Err(StateError::InvalidTransition {
                    from: current.to_string(),
                    event: event.to_string(),
                });
            }
        };

        Ok(next)
    }
}
