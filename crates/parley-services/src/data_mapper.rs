//! Maps positional arguments onto named command data.

use std::collections::BTreeMap;

use parley_types::{Command, CommandVerb, Context};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
/// Skips `skip` arguments, assigns the next ones to `take` keys one each, and
/// puts whatever remains under `rest`.
pub struct DataMapper {
    #[serde(default)]
    pub skip: usize,
    #[serde(default)]
    pub take: Vec<String>,
    pub rest: String,
}

impl DataMapper {
    pub fn map(&self, args: &[String]) -> BTreeMap<String, Vec<String>> {
        let mut data = BTreeMap::new();
        let mut remaining = args.iter().skip(self.skip);
        for key in &self.take {
            match remaining.next() {
                Some(value) => {
                    data.insert(key.clone(), vec![value.clone()]);
                }
                None => break,
            }
        }
        let rest = remaining.cloned().collect::<Vec<_>>();
        if !rest.is_empty() {
            data.insert(self.rest.clone(), rest);
        }
        data
    }
}

/// Noun, verb and seed data for commands a parser emits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandTemplate {
    pub noun: String,
    pub verb: CommandVerb,
    #[serde(default)]
    pub data: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl CommandTemplate {
    pub fn new(noun: impl Into<String>, verb: CommandVerb) -> Self {
        Self {
            noun: noun.into(),
            verb,
            data: BTreeMap::new(),
            labels: BTreeMap::new(),
        }
    }

    /// Builds a command in `context`; keys in `data` replace template keys.
    pub fn build(&self, context: &Context, data: BTreeMap<String, Vec<String>>) -> Command {
        let mut command = Command::new(self.noun.clone(), self.verb, context.clone());
        command.labels = self.labels.clone();
        command.data = self.data.clone();
        command.data.extend(data);
        command
    }
}
