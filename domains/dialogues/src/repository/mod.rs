//! Postgres repositories for the dialogues domain
//!
//! One repository per entity, each holding a clone of the shared pool.
//! Guarded mutations are expressed as conditional single-row updates so
//! the database settles concurrent writers.

pub mod agreements;
pub mod conversations;
pub mod couples;
pub mod invitations;
pub mod messages;
pub mod perspectives;

pub use agreements::AgreementRepository;
pub use conversations::ConversationRepository;
pub use couples::CoupleRepository;
pub use invitations::InvitationRepository;
pub use messages::MessageRepository;
pub use perspectives::PerspectiveRepository;
