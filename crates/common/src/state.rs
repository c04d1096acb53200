//! Transition errors shared by the workflow machines
//!
//! The conversation workflow and the agreement lifecycle both report
//! failed transitions through [`StateError`]; the engine maps it onto
//! the application error taxonomy with the event context attached.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum StateError {
    /// No transition rule matches the current state and event
    #[error("no transition from {from} on {event}")]
    InvalidTransition { from: String, event: String },

    /// The state is terminal; nothing transitions out of it
    #[error("{0} is a terminal state")]
    TerminalState(String),
}
