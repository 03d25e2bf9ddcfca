//! Command bus and completion engine.
//!
//! Moves inbound messages through the filter chain and parser registry onto
//! the command stream, routes commands through the RBAC gate to handlers, and
//! dispatches outgoing messages to transports. Under-specified commands are
//! parked as fragments and reassembled when the user answers.

pub mod command_bus;
pub mod completion;
pub mod filter_chain;
pub mod handler_registry;
pub mod parser_registry;
pub mod scheduler;
pub mod transport;

pub use command_bus::{
    BusComponents, BusHandle, BusMetrics, BusReceivers, BusSettings, CommandBus,
    ComponentFactory, StartupContext,
};
pub use completion::{
    collect_or_complete, collect_value, create_completion, resolve_completion, CollectField,
    CollectResult, CollectValue, FragmentHandler, NOUN_FRAGMENT,
};
pub use filter_chain::{evaluate_filters, Filter, FilterBehavior, FilterValue, Verdict};
pub use handler_registry::{
    grant_missing_reply, HandleOutcome, Handler, HandlerRegistry, HandlerRoute,
};
pub use parser_registry::{Parser, ParserRegistry};
pub use scheduler::{IntervalSchedule, IntervalTrigger};
pub use transport::{Transport, TransportSet};
