use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parley_core::current_unix_timestamp_ms;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Command, CommandVerb, Context};

static FRAGMENT_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Error returned when a completion state transition is invalid.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StatusTransitionError {
    #[error("invalid {kind} transition: {from:?} -> {to:?}")]
    Invalid {
        kind: &'static str,
        from: String,
        to: String,
    },
}

/// Lifecycle state for a pending completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CompletionState {
    #[default]
    Open,
    PendingAnswer,
    Resolved,
    Superseded,
}

impl CompletionState {
    /// Returns true when this state can transition to `next`.
    pub fn can_transition_to(self, next: Self) -> bool {
        if self == next {
            return true;
        }

        matches!(
            (self, next),
            (Self::Open, Self::PendingAnswer)
                | (Self::PendingAnswer, Self::Resolved)
                | (Self::PendingAnswer, Self::Superseded)
        )
    }

    /// Returns an error if transitioning to `next` is not allowed.
    pub fn ensure_transition(self, next: Self) -> Result<(), StatusTransitionError> {
        if self.can_transition_to(next) {
            return Ok(());
        }

        Err(StatusTransitionError::Invalid {
            kind: "completion_state",
            from: format!("{self:?}"),
            to: format!("{next:?}"),
        })
    }

    /// Returns true when the fragment can no longer be answered.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Resolved | Self::Superseded)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// A command waiting for one missing field to be supplied by the user.
pub struct Fragment {
    pub id: String,
    pub context: Context,
    pub completion_key: String,
    pub key: String,
    pub prompt: String,
    pub noun: String,
    pub verb: CommandVerb,
    #[serde(default)]
    pub data: BTreeMap<String, Vec<String>>,
    pub parser_id: String,
    #[serde(default)]
    pub state: CompletionState,
    pub created_unix_ms: u64,
}

impl Fragment {
    /// Opens a fragment for `command`, asking for `key` with `prompt`.
    pub fn open(
        command: &Command,
        parser_id: impl Into<String>,
        key: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        let created_unix_ms = current_unix_timestamp_ms();
        let sequence = FRAGMENT_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        Self {
            id: format!("fragment-{created_unix_ms}-{sequence}"),
            completion_key: command.context.completion_key(),
            context: command.context.clone(),
            key: key.into(),
            prompt: prompt.into(),
            noun: command.noun.clone(),
            verb: command.verb,
            data: command.data.clone(),
            parser_id: parser_id.into(),
            state: CompletionState::Open,
            created_unix_ms,
        }
    }

    /// Moves the fragment to `next`, rejecting invalid transitions.
    pub fn transition(&mut self, next: CompletionState) -> Result<(), StatusTransitionError> {
        self.state.ensure_transition(next)?;
        self.state = next;
        Ok(())
    }

    /// Rebuilds the original command with `value` supplied for the missing key.
    pub fn complete_with(&self, context: &Context, value: Vec<String>) -> Command {
        let mut data = self.data.clone();
        data.insert(self.key.clone(), value);
        let mut context = context.clone();
        if context.parser.is_none() {
            context.parser = Some(self.parser_id.clone());
        }
        Command {
            noun: self.noun.clone(),
            verb: self.verb,
            data,
            labels: BTreeMap::new(),
            context,
        }
    }
}
