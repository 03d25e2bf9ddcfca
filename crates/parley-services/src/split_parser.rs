//! Argument-splitting parser.

use async_trait::async_trait;
use parley_bus::Parser;
use parley_types::{BusError, BusResult, Command, Message};
use serde::{Deserialize, Serialize};

use crate::data_mapper::{CommandTemplate, DataMapper};
use crate::match_rules::{MatchRules, MatchRulesConfig};
use crate::split::{split_args, SplitOptions};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitParserConfig {
    pub id: String,
    #[serde(default, rename = "match")]
    pub rules: MatchRulesConfig,
    pub default_command: CommandTemplate,
    pub data_mapper: DataMapper,
    /// Split every character into its own argument.
    #[serde(default)]
    pub every: bool,
    #[serde(default)]
    pub split: SplitOptions,
}

#[derive(Debug)]
pub struct SplitParser {
    id: String,
    rules: MatchRules,
    template: CommandTemplate,
    mapper: DataMapper,
    every: bool,
    options: SplitOptions,
}

impl SplitParser {
    pub fn new(config: &SplitParserConfig) -> BusResult<Self> {
        Ok(Self {
            id: config.id.clone(),
            rules: MatchRules::compile(&config.rules)?,
            template: config.default_command.clone(),
            mapper: config.data_mapper.clone(),
            every: config.every,
            options: config.split.clone(),
        })
    }

    /// Trimmed, non-empty arguments of the tag-stripped body.
    pub fn split(&self, body: &str) -> BusResult<Vec<String>> {
        let raw: Vec<String> = if self.every {
            body.chars().map(String::from).collect()
        } else {
            split_args(body, &self.options).map_err(|error| BusError::validation(error.to_string()))?
        };
        Ok(raw
            .iter()
            .map(|arg| arg.trim())
            .filter(|arg| !arg.is_empty())
            .map(str::to_string)
            .collect())
    }
}

#[async_trait]
impl Parser for SplitParser {
    fn id(&self) -> &str {
        &self.id
    }

    fn matches(&self, message: &Message) -> bool {
        self.rules.matches(message)
    }

    async fn parse(&self, message: &Message) -> BusResult<Vec<Command>> {
        if !message.is_text() {
            return Err(BusError::UnsupportedType(message.mime_type.clone()));
        }
        let body = self.rules.remove_tags(&message.body);
        let args = self.split(&body)?;
        tracing::debug!(parser = %self.id, ?args, "splitting message body");
        Ok(vec![self
            .template
            .build(&message.context, self.mapper.map(&args))])
    }
}
