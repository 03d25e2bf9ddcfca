//! Message match rules and prefix stripping.

use regex::Regex;
use serde::{Deserialize, Serialize};

use parley_types::{BusError, BusResult, Message};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `RuleOperator` values.
pub enum RuleOperator {
    /// At least one value must match.
    #[default]
    Any,
    /// Every value must match.
    Every,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `RuleValue` values.
pub enum RuleValue {
    String(String),
    Regexp(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRule {
    pub key: String,
    #[serde(default)]
    pub operator: RuleOperator,
    pub values: Vec<RuleValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRulesConfig {
    #[serde(default)]
    pub rules: Vec<MatchRule>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuleField {
    Body,
    Uid,
    Name,
    Channel,
}

impl RuleField {
    fn parse(key: &str) -> BusResult<Self> {
        match key {
            "body" => Ok(Self::Body),
            "uid" => Ok(Self::Uid),
            "name" => Ok(Self::Name),
            "channel" => Ok(Self::Channel),
            other => Err(BusError::validation(format!(
                "unsupported match rule key '{other}'"
            ))),
        }
    }

    fn read<'a>(self, message: &'a Message) -> &'a str {
        match self {
            Self::Body => &message.body,
            Self::Uid => &message.context.uid,
            Self::Name => &message.context.name,
            Self::Channel => &message.context.channel,
        }
    }
}

#[derive(Debug, Clone)]
enum CompiledValue {
    Literal(String),
    Pattern(Regex),
}

impl CompiledValue {
    fn matches(&self, haystack: &str) -> bool {
        match self {
            Self::Literal(literal) => haystack.contains(literal.as_str()),
            Self::Pattern(pattern) => pattern.is_match(haystack),
        }
    }

    fn strip(&self, haystack: &str) -> String {
        match self {
            Self::Literal(literal) => haystack.replacen(literal.as_str(), "", 1),
            Self::Pattern(pattern) => pattern.replace(haystack, "").into_owned(),
        }
    }
}

#[derive(Debug, Clone)]
struct CompiledRule {
    field: RuleField,
    operator: RuleOperator,
    values: Vec<CompiledValue>,
}

/// Compiled rules deciding whether a parser applies to a message.
#[derive(Debug, Clone, Default)]
pub struct MatchRules {
    rules: Vec<CompiledRule>,
}

impl MatchRules {
    pub fn compile(config: &MatchRulesConfig) -> BusResult<Self> {
        let mut rules = Vec::with_capacity(config.rules.len());
        for rule in &config.rules {
            let values = rule
                .values
                .iter()
                .map(|value| match value {
                    RuleValue::String(literal) => Ok(CompiledValue::Literal(literal.clone())),
                    RuleValue::Regexp(pattern) => Regex::new(pattern)
                        .map(CompiledValue::Pattern)
                        .map_err(|error| {
                            BusError::validation(format!("invalid match regexp '{pattern}': {error}"))
                        }),
                })
                .collect::<BusResult<Vec<_>>>()?;
            rules.push(CompiledRule {
                field: RuleField::parse(&rule.key)?,
                operator: rule.operator,
                values,
            });
        }
        Ok(Self { rules })
    }

    /// True when every rule holds; no rules match everything.
    pub fn matches(&self, message: &Message) -> bool {
        self.rules.iter().all(|rule| {
            let haystack = rule.field.read(message);
            match rule.operator {
                RuleOperator::Any => rule.values.iter().any(|value| value.matches(haystack)),
                RuleOperator::Every => rule.values.iter().all(|value| value.matches(haystack)),
            }
        })
    }

    /// Removes the first occurrence of every body rule value from `body`.
    pub fn remove_tags(&self, body: &str) -> String {
        let mut stripped = body.to_string();
        for rule in self.rules.iter().filter(|rule| rule.field == RuleField::Body) {
            for value in &rule.values {
                stripped = value.strip(&stripped);
            }
        }
        stripped.trim().to_string()
    }
}
