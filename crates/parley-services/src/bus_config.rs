//! JSON bus configuration: loading, validation and component wiring.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context as _, Result};
use parley_access::StaticTokenVerifier;
use parley_bus::{
    BusSettings, ComponentFactory, Filter, Handler, IntervalTrigger, Parser, StartupContext,
    Transport,
};
use parley_store::StoreConfig;
use parley_types::BusResult;
use serde::{Deserialize, Serialize};

use crate::account_handler::{AccountHandler, AccountHandlerConfig};
use crate::echo_handler::{EchoHandler, EchoHandlerConfig};
use crate::echo_parser::{EchoParser, EchoParserConfig};
use crate::regex_parser::{RegexParser, RegexParserConfig};
use crate::split_parser::{SplitParser, SplitParserConfig};
use crate::stdio_transport::{StdioTransport, StdioTransportConfig};
use crate::user_filter::{UserFilter, UserFilterConfig};

pub const BUS_CONFIG_SCHEMA_VERSION: u32 = 1;

fn bus_config_schema_version() -> u32 {
    BUS_CONFIG_SCHEMA_VERSION
}

fn default_bus_name() -> String {
    BusSettings::default().name
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
/// Enumerates supported `FilterConfig` values.
pub enum FilterConfig {
    User(UserFilterConfig),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
/// Enumerates supported `ParserConfig` values.
pub enum ParserConfig {
    Regex(RegexParserConfig),
    Split(SplitParserConfig),
    Echo(EchoParserConfig),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
/// Enumerates supported `HandlerConfig` values.
pub enum HandlerConfig {
    Echo(EchoHandlerConfig),
    Account(AccountHandlerConfig),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
/// Enumerates supported `TransportConfig` values.
pub enum TransportConfig {
    Stdio(StdioTransportConfig),
}

impl FilterConfig {
    pub fn id(&self) -> &str {
        match self {
            Self::User(config) => &config.id,
        }
    }
}

impl ParserConfig {
    pub fn id(&self) -> &str {
        match self {
            Self::Regex(config) => &config.id,
            Self::Split(config) => &config.id,
            Self::Echo(config) => &config.id,
        }
    }

    fn default_noun(&self) -> &str {
        match self {
            Self::Regex(config) => &config.default_command.noun,
            Self::Split(config) => &config.default_command.noun,
            Self::Echo(config) => &config.default_command.noun,
        }
    }

    fn build(&self) -> BusResult<Arc<dyn Parser>> {
        let parser: Arc<dyn Parser> = match self {
            Self::Regex(config) => Arc::new(RegexParser::new(config)?),
            Self::Split(config) => Arc::new(SplitParser::new(config)?),
            Self::Echo(config) => Arc::new(EchoParser::new(config)?),
        };
        Ok(parser)
    }
}

impl HandlerConfig {
    pub fn id(&self) -> &str {
        match self {
            Self::Echo(config) => &config.id,
            Self::Account(config) => &config.id,
        }
    }
}

impl TransportConfig {
    pub fn id(&self) -> &str {
        match self {
            Self::Stdio(config) => &config.id,
        }
    }
}

/// Top-level bus configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusConfig {
    #[serde(default = "bus_config_schema_version")]
    pub schema_version: u32,
    #[serde(default = "default_bus_name")]
    pub name: String,
    #[serde(default)]
    pub strict_filters: bool,
    #[serde(default)]
    pub reply_unhandled: bool,
    #[serde(default)]
    pub storage: StoreConfig,
    #[serde(default)]
    pub filters: Vec<FilterConfig>,
    #[serde(default)]
    pub parsers: Vec<ParserConfig>,
    #[serde(default)]
    pub handlers: Vec<HandlerConfig>,
    #[serde(default)]
    pub intervals: Vec<IntervalTrigger>,
    #[serde(default)]
    pub transports: Vec<TransportConfig>,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            schema_version: BUS_CONFIG_SCHEMA_VERSION,
            name: default_bus_name(),
            strict_filters: false,
            reply_unhandled: false,
            storage: StoreConfig::default(),
            filters: Vec::new(),
            parsers: Vec::new(),
            handlers: Vec::new(),
            intervals: Vec::new(),
            transports: Vec::new(),
        }
    }
}

impl BusConfig {
    pub fn settings(&self) -> BusSettings {
        BusSettings {
            name: self.name.clone(),
            strict_filters: self.strict_filters,
            reply_unhandled: self.reply_unhandled,
        }
    }

    /// One-line description used by the CLI.
    pub fn summary(&self) -> String {
        format!(
            "bus '{}': {} filters, {} parsers, {} handlers, {} intervals, {} transports",
            self.name,
            self.filters.len(),
            self.parsers.len(),
            self.handlers.len(),
            self.intervals.len(),
            self.transports.len()
        )
    }
}

pub fn load_bus_config_file(path: &Path) -> Result<BusConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read bus config {}", path.display()))?;
    parse_bus_config(&raw).with_context(|| format!("invalid bus config {}", path.display()))
}

pub fn parse_bus_config(raw: &str) -> Result<BusConfig> {
    let parsed = serde_json::from_str::<BusConfig>(raw).context("failed to parse bus config")?;
    validate_bus_config(&parsed)?;
    Ok(parsed)
}

fn ensure_unique_ids<'a>(section: &str, ids: impl Iterator<Item = &'a str>) -> Result<()> {
    let mut seen = BTreeSet::new();
    for id in ids {
        if id.trim().is_empty() {
            bail!("bus config {section} id must not be empty");
        }
        if !seen.insert(id) {
            bail!("bus config {section} id '{id}' is duplicated");
        }
    }
    Ok(())
}

pub fn validate_bus_config(config: &BusConfig) -> Result<()> {
    if config.schema_version != BUS_CONFIG_SCHEMA_VERSION {
        bail!(
            "unsupported bus config schema_version {} (expected {})",
            config.schema_version,
            BUS_CONFIG_SCHEMA_VERSION
        );
    }
    if config.name.trim().is_empty() {
        bail!("bus config name must not be empty");
    }
    ensure_unique_ids("filter", config.filters.iter().map(FilterConfig::id))?;
    ensure_unique_ids("parser", config.parsers.iter().map(ParserConfig::id))?;
    ensure_unique_ids("handler", config.handlers.iter().map(HandlerConfig::id))?;
    ensure_unique_ids("interval", config.intervals.iter().map(|interval| interval.id.as_str()))?;
    ensure_unique_ids("transport", config.transports.iter().map(TransportConfig::id))?;

    for parser in &config.parsers {
        if parser.default_noun().trim().is_empty() {
            bail!("parser '{}' default_command noun must not be empty", parser.id());
        }
        parser
            .build()
            .with_context(|| format!("parser '{}' is invalid", parser.id()))?;
    }
    for interval in &config.intervals {
        interval
            .schedule
            .validate()
            .with_context(|| format!("interval '{}' has an invalid schedule", interval.id))?;
        if interval.commands.iter().any(|command| command.noun.trim().is_empty()) {
            bail!("interval '{}' emits a command with an empty noun", interval.id);
        }
    }
    Ok(())
}

impl ComponentFactory for BusConfig {
    fn filters(&self) -> BusResult<Vec<Arc<dyn Filter>>> {
        Ok(self
            .filters
            .iter()
            .map(|filter| match filter {
                FilterConfig::User(config) => Arc::new(UserFilter::new(config.clone())) as Arc<dyn Filter>,
            })
            .collect())
    }

    fn handlers(&self, startup: &StartupContext) -> BusResult<Vec<Arc<dyn Handler>>> {
        let tokens = Arc::new(StaticTokenVerifier::new());
        Ok(self
            .handlers
            .iter()
            .map(|handler| match handler {
                HandlerConfig::Echo(config) => Arc::new(EchoHandler::new(config)) as Arc<dyn Handler>,
                HandlerConfig::Account(config) => Arc::new(AccountHandler::new(
                    config.clone(),
                    startup.store.clone(),
                    tokens.clone(),
                )) as Arc<dyn Handler>,
            })
            .collect())
    }

    fn intervals(&self) -> BusResult<Vec<IntervalTrigger>> {
        Ok(self.intervals.clone())
    }

    fn transports(&self) -> BusResult<Vec<Arc<dyn Transport>>> {
        Ok(self
            .transports
            .iter()
            .map(|transport| match transport {
                TransportConfig::Stdio(config) => {
                    Arc::new(StdioTransport::stdio(config.clone())) as Arc<dyn Transport>
                }
            })
            .collect())
    }

    fn parsers(&self) -> BusResult<Vec<Arc<dyn Parser>>> {
        self.parsers.iter().map(ParserConfig::build).collect()
    }
}
