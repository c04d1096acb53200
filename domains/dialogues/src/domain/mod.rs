//! Domain types for the dialogue workflow

pub mod entities;
pub mod state;
pub mod visibility;
