use async_trait::async_trait;
use parley_bus::Parser;
use parley_types::{BusResult, Command, CommandVerb, Message};
use serde::{Deserialize, Serialize};

use crate::data_mapper::CommandTemplate;
use crate::match_rules::{MatchRules, MatchRulesConfig};

fn default_echo_command() -> CommandTemplate {
    CommandTemplate::new("echo", CommandVerb::Create)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EchoParserConfig {
    pub id: String,
    #[serde(default, rename = "match")]
    pub rules: MatchRulesConfig,
    #[serde(default = "default_echo_command")]
    pub default_command: CommandTemplate,
}

/// Passes the tag-stripped body through as `data.body`.
#[derive(Debug)]
pub struct EchoParser {
    id: String,
    rules: MatchRules,
    template: CommandTemplate,
}

impl EchoParser {
    pub fn new(config: &EchoParserConfig) -> BusResult<Self> {
        Ok(Self {
            id: config.id.clone(),
            rules: MatchRules::compile(&config.rules)?,
            template: config.default_command.clone(),
        })
    }
}

#[async_trait]
impl Parser for EchoParser {
    fn id(&self) -> &str {
        &self.id
    }

    fn matches(&self, message: &Message) -> bool {
        self.rules.matches(message)
    }

    async fn parse(&self, message: &Message) -> BusResult<Vec<Command>> {
        let body = self.rules.remove_tags(&message.body);
        let data = [("body".to_string(), vec![body])].into_iter().collect();
        Ok(vec![self.template.build(&message.context, data)])
    }
}
