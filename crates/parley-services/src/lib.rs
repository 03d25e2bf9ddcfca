//! Reference parsers, handlers, filters and transports for the command bus,
//! plus the JSON configuration that wires them together.

pub mod account_handler;
pub mod bus_config;
pub mod data_mapper;
pub mod echo_handler;
pub mod echo_parser;
pub mod match_rules;
pub mod regex_parser;
pub mod split;
pub mod split_parser;
pub mod stdio_transport;
pub mod user_filter;

pub use account_handler::{
    AccountHandler, AccountHandlerConfig, JoinConfig, RootConfig, TokenConfig,
};
pub use bus_config::{
    load_bus_config_file, parse_bus_config, validate_bus_config, BusConfig, FilterConfig,
    HandlerConfig, ParserConfig, TransportConfig, BUS_CONFIG_SCHEMA_VERSION,
};
pub use data_mapper::{CommandTemplate, DataMapper};
pub use echo_handler::{EchoHandler, EchoHandlerConfig};
pub use echo_parser::{EchoParser, EchoParserConfig};
pub use match_rules::{MatchRule, MatchRules, MatchRulesConfig, RuleOperator, RuleValue};
pub use regex_parser::{RegexParser, RegexParserConfig};
pub use split::{split_args, SplitError, SplitOptions};
pub use split_parser::{SplitParser, SplitParserConfig};
pub use stdio_transport::{StdioTransport, StdioTransportConfig};
pub use user_filter::{UserFilter, UserFilterConfig};
