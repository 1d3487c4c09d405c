//! Parley Core - Value, Conversation and Error Types
//!
//! Pure data structures shared by the template compiler and its callers.
//! This crate contains no parsing or compilation logic.

pub mod conversation;
pub mod error;
pub mod value;

pub use conversation::*;
pub use error::*;
pub use value::*;
