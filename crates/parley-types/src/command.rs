use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{BusError, BusResult, Context};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `CommandVerb` values.
pub enum CommandVerb {
    Create,
    Get,
    Update,
    Delete,
    List,
    Help,
}

impl CommandVerb {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Get => "get",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::List => "list",
            Self::Help => "help",
        }
    }
}

impl fmt::Display for CommandVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandVerb {
    type Err = BusError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "create" => Ok(Self::Create),
            "get" => Ok(Self::Get),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            "list" => Ok(Self::List),
            "help" => Ok(Self::Help),
            other => Err(BusError::validation(format!("unknown command verb '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// A structured request produced by a parser or trigger and routed to handlers.
pub struct Command {
    pub noun: String,
    pub verb: CommandVerb,
    #[serde(default)]
    pub data: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub context: Context,
}

impl Command {
    pub fn new(noun: impl Into<String>, verb: CommandVerb, context: Context) -> Self {
        Self {
            noun: noun.into(),
            verb,
            data: BTreeMap::new(),
            labels: BTreeMap::new(),
            context,
        }
    }

    pub fn with_data<I, S>(mut self, key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.data
            .insert(key.into(), values.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Route key in `noun:verb` form, also used as the derived grant.
    pub fn route_key(&self) -> String {
        format!("{}:{}", self.noun, self.verb)
    }

    pub fn has(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Values for `key`, empty when absent.
    pub fn get(&self, key: &str) -> &[String] {
        self.data.get(key).map(Vec::as_slice).unwrap_or_default()
    }

    /// First value for `key`.
    pub fn get_head(&self, key: &str) -> BusResult<&str> {
        self.get(key)
            .first()
            .map(String::as_str)
            .ok_or_else(|| BusError::not_found("command data", key))
    }

    pub fn get_head_or_default<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).first().map(String::as_str).unwrap_or(default)
    }

    /// First value for `key` parsed as a number, falling back to `default`
    /// when missing or not numeric.
    pub fn get_number_or_default(&self, key: &str, default: f64) -> f64 {
        self.get(key)
            .first()
            .and_then(|value| value.trim().parse::<f64>().ok())
            .unwrap_or(default)
    }
}
