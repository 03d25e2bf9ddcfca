//! Regex capture parser.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parley_bus::Parser;
use parley_types::{BusError, BusResult, Command, Message};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::data_mapper::{CommandTemplate, DataMapper};
use crate::match_rules::{MatchRules, MatchRulesConfig};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegexParserConfig {
    pub id: String,
    #[serde(default, rename = "match")]
    pub rules: MatchRulesConfig,
    pub default_command: CommandTemplate,
    pub data_mapper: DataMapper,
    pub regexp: String,
}

/// Emits one command per message from the pattern's capture groups.
#[derive(Debug)]
pub struct RegexParser {
    id: String,
    rules: MatchRules,
    template: CommandTemplate,
    mapper: DataMapper,
    pattern: Regex,
}

impl RegexParser {
    pub fn new(config: &RegexParserConfig) -> BusResult<Self> {
        let pattern = Regex::new(&config.regexp).map_err(|error| {
            BusError::validation(format!(
                "parser '{}' has invalid regexp '{}': {error}",
                config.id, config.regexp
            ))
        })?;
        Ok(Self {
            id: config.id.clone(),
            rules: MatchRules::compile(&config.rules)?,
            template: config.default_command.clone(),
            mapper: config.data_mapper.clone(),
            pattern,
        })
    }

    /// Capture list for the message body, full match first. Groups that did
    /// not participate are empty strings.
    pub fn captures(&self, message: &Message) -> BusResult<Vec<String>> {
        if !message.is_text() {
            return Err(BusError::UnsupportedType(message.mime_type.clone()));
        }
        let body = self.rules.remove_tags(&message.body);
        let captures = self.pattern.captures(&body).ok_or_else(|| {
            BusError::validation(format!("parser '{}' did not match message body", self.id))
        })?;
        Ok(captures
            .iter()
            .map(|group| group.map(|m| m.as_str().to_string()).unwrap_or_default())
            .collect())
    }

    pub fn decode(&self, message: &Message) -> BusResult<BTreeMap<String, Vec<String>>> {
        Ok(BTreeMap::from([("body".to_string(), self.captures(message)?)]))
    }
}

#[async_trait]
impl Parser for RegexParser {
    fn id(&self) -> &str {
        &self.id
    }

    fn matches(&self, message: &Message) -> bool {
        self.rules.matches(message)
    }

    async fn parse(&self, message: &Message) -> BusResult<Vec<Command>> {
        let captures = self.captures(message)?;
        tracing::debug!(parser = %self.id, groups = captures.len(), "regex parser matched");
        let data = self.mapper.map(&captures);
        Ok(vec![self.template.build(&message.context, data)])
    }
}
