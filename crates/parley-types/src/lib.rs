//! Shared data types for the Parley command bus.
//!
//! Conversation contexts, commands, messages, completion fragments, and the
//! bus error taxonomy live here so every other crate can depend on one leaf.

mod command;
mod context;
mod error;
mod fragment;
mod message;

pub use command::{Command, CommandVerb};
pub use context::Context;
pub use error::{BusError, BusResult};
pub use fragment::{CompletionState, Fragment, StatusTransitionError};
pub use message::{Message, TYPE_JPEG, TYPE_JSON, TYPE_TEXT};
