//! Dialogue workflow engine
//!
//! Coordinates an asynchronous two-party conversation about a conflict,
//! mediated by an AI synthesis step. The engine owns the workflow state
//! machine, the visibility rules protecting each partner's unsubmitted
//! perspective, and the fan-out of state changes to both participants'
//! sessions. Storage, text generation, and the session layer are
//! injected collaborators.

pub mod domain;
pub mod engine;
pub mod repository;
pub mod store;

// Re-export domain types at the crate root for convenience
pub use domain::entities::{
    Agreement, AgreementKind, AgreementStatus, Conversation, Couple, CoupleStatus, DetailLevel,
    DialogueStatus, Invitation, InvitationStatus, MemberRole, Message, MessageAudience,
    Perspective, SenderType, Track, Visibility,
};
pub use domain::state::{
    AgreementEvent, AgreementStateMachine, StateError, WorkflowEvent, WorkflowMachine,
};
pub use domain::visibility;

// Re-export store types
pub use store::memory::MemoryStore;
pub use store::{
    AgreementStore, ConversationPatch, ConversationStore, CoupleStore, DialogueStores,
    InvitationStore, MessageStore, PerspectiveStore, StatusPredicate,
};

// Re-export the engine
pub use engine::{ActivityKind, DialogueEngine, Outcome};
