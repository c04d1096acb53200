//! Shared utilities, configuration, and error handling for Accord
//!
//! This crate provides common functionality used across the Accord
//! dialogue engine:
//! - Configuration management following 12-factor principles
//! - Error types and handling
//! - State machine error types shared by the workflow crates

pub mod config;
pub mod error;
pub mod state;

pub use config::{BroadcasterKind, Config, LlmProvider};
pub use error::{Error, Result};
pub use state::StateError;
