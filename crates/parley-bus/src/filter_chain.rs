//! Filter aggregation for messages and commands.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;
use futures_util::FutureExt;
use parley_types::{BusResult, Command, Context, Message};

/// Verdict a single filter returns for a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterBehavior {
    Allow,
    Deny,
    /// The filter has no opinion and is excluded from aggregation.
    Ignore,
}

/// Aggregate verdict of a filter chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Deny,
}

impl Verdict {
    pub fn is_allowed(self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Value passed through the filter chain.
#[derive(Debug, Clone, Copy)]
pub enum FilterValue<'a> {
    Message(&'a Message),
    Command(&'a Command),
}

impl FilterValue<'_> {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Message(_) => "message",
            Self::Command(_) => "command",
        }
    }

    pub fn context(&self) -> &Context {
        match self {
            Self::Message(message) => &message.context,
            Self::Command(command) => &command.context,
        }
    }

    pub fn uid(&self) -> &str {
        &self.context().uid
    }
}

/// Independent predicate over messages and commands.
#[async_trait]
pub trait Filter: Send + Sync {
    fn id(&self) -> &str;
    async fn evaluate(&self, value: FilterValue<'_>) -> BusResult<FilterBehavior>;
}

/// Evaluates `filters` concurrently and aggregates their verdicts.
///
/// Ignored filters do not count; with none left the value is allowed. Strict
/// mode requires every remaining filter to allow, lenient mode requires one.
/// A filter that errors or panics is treated as ignored.
pub async fn evaluate_filters(
    value: FilterValue<'_>,
    filters: &[Arc<dyn Filter>],
    strict: bool,
) -> Verdict {
    let checks = filters.iter().map(|filter| async move {
        match AssertUnwindSafe(filter.evaluate(value)).catch_unwind().await {
            Ok(Ok(behavior)) => behavior,
            Ok(Err(error)) => {
                tracing::warn!(
                    filter = filter.id(),
                    kind = value.kind(),
                    error = %error,
                    "filter failed, ignoring"
                );
                FilterBehavior::Ignore
            }
            Err(_) => {
                tracing::warn!(
                    filter = filter.id(),
                    kind = value.kind(),
                    "filter panicked, ignoring"
                );
                FilterBehavior::Ignore
            }
        }
    });
    let behaviors = join_all(checks).await;
    aggregate_behaviors(&behaviors, strict)
}

fn aggregate_behaviors(behaviors: &[FilterBehavior], strict: bool) -> Verdict {
    let mut applicable = behaviors
        .iter()
        .filter(|behavior| **behavior != FilterBehavior::Ignore)
        .peekable();
    if applicable.peek().is_none() {
        return Verdict::Allow;
    }

    let allowed = if strict {
        applicable.all(|behavior| *behavior == FilterBehavior::Allow)
    } else {
        applicable.any(|behavior| *behavior == FilterBehavior::Allow)
    };
    if allowed {
        Verdict::Allow
    } else {
        Verdict::Deny
    }
}
