//! Handler route table and RBAC gate.

use std::sync::Arc;

use async_trait::async_trait;
use parley_access::{GrantRequirement, GrantSet};
use parley_types::{BusError, BusResult, Command, CommandVerb, Message, TYPE_TEXT};
use serde::{Deserialize, Serialize};

use crate::BusHandle;

/// One `(noun, verb)` pair a handler serves, with its grant requirement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerRoute {
    pub noun: String,
    pub verb: CommandVerb,
    #[serde(default)]
    pub grant: GrantRequirement,
    #[serde(default)]
    pub help: String,
}

impl HandlerRoute {
    pub fn new(noun: impl Into<String>, verb: CommandVerb) -> Self {
        Self {
            noun: noun.into(),
            verb,
            grant: GrantRequirement::None,
            help: String::new(),
        }
    }

    /// Gates the route on the derived `<noun>:<verb>` grant.
    pub fn gated(mut self) -> Self {
        self.grant = GrantRequirement::Derived;
        self
    }

    pub fn with_grant(mut self, grant: GrantRequirement) -> Self {
        self.grant = grant;
        self
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = help.into();
        self
    }

    pub fn serves(&self, command: &Command) -> bool {
        self.noun == command.noun && self.verb == command.verb
    }
}

/// Executes commands for the routes it declares.
#[async_trait]
pub trait Handler: Send + Sync {
    fn id(&self) -> &str;
    fn routes(&self) -> &[HandlerRoute];

    /// Returns `Ok(true)` when the command was claimed.
    async fn handle(
        &self,
        route: &HandlerRoute,
        command: &Command,
        bus: &BusHandle,
    ) -> BusResult<bool>;
}

/// Result of routing one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleOutcome {
    Handled { handler: String },
    Denied { grant: String },
    HelpAnswered,
    Unhandled,
}

/// Handlers in registration order.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: Vec<Arc<dyn Handler>>,
    reply_unhandled: bool,
}

impl HandlerRegistry {
    pub fn new(handlers: Vec<Arc<dyn Handler>>, reply_unhandled: bool) -> Self {
        Self {
            handlers,
            reply_unhandled,
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Routes `command` to the first handler that claims it.
    ///
    /// Gated routes are checked before the handler body runs; a denial sends
    /// the grant-missing reply and stops routing. A declared `help` route is
    /// answered here from the help texts of the noun's routes. Handler errors
    /// propagate.
    pub async fn dispatch(&self, command: &Command, bus: &BusHandle) -> BusResult<HandleOutcome> {
        for handler in &self.handlers {
            let Some(route) = handler.routes().iter().find(|route| route.serves(command)) else {
                continue;
            };

            let required = route
                .grant
                .resolve(&command.noun, command.verb.as_str())
                .map_err(|error| BusError::validation(error.to_string()))?;
            if let Some(required) = required {
                let decision = GrantSet::from_lossy(&command.context.grants).check(&required);
                if !decision.is_allowed() {
                    tracing::warn!(
                        handler = handler.id(),
                        uid = %command.context.uid,
                        grant = %required,
                        reason_code = decision.reason_code(),
                        "command denied by grant check"
                    );
                    bus.send(grant_missing_reply(command, required.as_str()))?;
                    return Ok(HandleOutcome::Denied {
                        grant: required.to_string(),
                    });
                }
            }

            if route.verb == CommandVerb::Help {
                let lines = self.help_lines(&command.noun);
                bus.send(Message::reply(&command.context, TYPE_TEXT, lines.join("\n")))?;
                return Ok(HandleOutcome::HelpAnswered);
            }

            tracing::debug!(
                handler = handler.id(),
                noun = %command.noun,
                verb = %command.verb,
                "handling command"
            );
            if handler.handle(route, command, bus).await? {
                return Ok(HandleOutcome::Handled {
                    handler: handler.id().to_string(),
                });
            }
        }

        tracing::warn!(
            noun = %command.noun,
            verb = %command.verb,
            uid = %command.context.uid,
            "unhandled command"
        );
        if self.reply_unhandled {
            bus.send(Message::reply(
                &command.context,
                TYPE_TEXT,
                format!("no handler for {}", command.route_key()),
            ))?;
        }
        Ok(HandleOutcome::Unhandled)
    }

    /// Help text for every non-help route declared for `noun`.
    pub fn help_lines(&self, noun: &str) -> Vec<String> {
        self.handlers
            .iter()
            .flat_map(|handler| handler.routes().iter())
            .filter(|route| route.noun == noun && route.verb != CommandVerb::Help)
            .map(|route| {
                if route.help.is_empty() {
                    format!("{}:{}", route.noun, route.verb)
                } else {
                    format!("{}:{}: {}", route.noun, route.verb, route.help)
                }
            })
            .collect()
    }
}

/// Standard reply sent when a caller lacks the grant a route requires.
pub fn grant_missing_reply(command: &Command, grant: &str) -> Message {
    Message::reply(
        &command.context,
        TYPE_TEXT,
        format!("permission denied: missing grant '{grant}'"),
    )
}
