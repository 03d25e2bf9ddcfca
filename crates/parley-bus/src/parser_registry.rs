//! Ordered parser strategies for inbound messages.

use std::sync::Arc;

use async_trait::async_trait;
use parley_types::{BusResult, Command, Context, Fragment, Message};

/// Turns matching messages into commands.
#[async_trait]
pub trait Parser: Send + Sync {
    /// Stable id recorded on produced commands and on pending fragments.
    fn id(&self) -> &str;

    /// Cheap, non-failing applicability check.
    fn matches(&self, message: &Message) -> bool;

    async fn parse(&self, message: &Message) -> BusResult<Vec<Command>>;

    /// Rebuilds the command a fragment was parked for, with `value` supplied
    /// for the missing key.
    async fn complete(
        &self,
        context: &Context,
        fragment: &Fragment,
        value: Vec<String>,
    ) -> BusResult<Vec<Command>> {
        Ok(vec![fragment.complete_with(context, value)])
    }
}

/// Parsers in registration order.
#[derive(Clone, Default)]
pub struct ParserRegistry {
    parsers: Vec<Arc<dyn Parser>>,
}

impl ParserRegistry {
    pub fn new(parsers: Vec<Arc<dyn Parser>>) -> Self {
        Self { parsers }
    }

    pub fn len(&self) -> usize {
        self.parsers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parsers.is_empty()
    }

    pub fn get(&self, parser_id: &str) -> Option<&Arc<dyn Parser>> {
        self.parsers.iter().find(|parser| parser.id() == parser_id)
    }

    /// Runs every matching parser and collects their commands in
    /// registration order. A failing parser is logged and skipped.
    pub async fn parse(&self, message: &Message) -> Vec<Command> {
        let mut matched = false;
        let mut commands = Vec::new();
        for parser in &self.parsers {
            if !parser.matches(message) {
                continue;
            }
            matched = true;
            match parser.parse(message).await {
                Ok(parsed) => {
                    tracing::debug!(
                        parser = parser.id(),
                        count = parsed.len(),
                        "parser produced commands"
                    );
                    commands.extend(parsed.into_iter().map(|mut command| {
                        if command.context.parser.is_none() {
                            command.context.parser = Some(parser.id().to_string());
                        }
                        command
                    }));
                }
                Err(error) => {
                    tracing::error!(
                        parser = parser.id(),
                        uid = %message.context.uid,
                        error = %error,
                        "error running parser"
                    );
                }
            }
        }

        if !matched {
            tracing::debug!(
                uid = %message.context.uid,
                "incoming message was not matched by any parsers"
            );
        }
        commands
    }
}
