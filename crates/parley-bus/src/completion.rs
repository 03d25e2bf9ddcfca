//! Completion engine: parks under-specified commands as fragments and
//! reassembles them when the user answers.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parley_store::BusStore;
use parley_types::{
    BusError, BusResult, Command, CommandVerb, CompletionState, Fragment, Message, TYPE_TEXT,
};

use crate::handler_registry::{Handler, HandlerRoute};
use crate::parser_registry::ParserRegistry;
use crate::BusHandle;

/// Noun of the synthetic command that opens a completion.
pub const NOUN_FRAGMENT: &str = "fragment";

const KEY_FIELD: &str = "key";
const KEY_PROMPT: &str = "msg";
const KEY_NOUN: &str = "noun";
const KEY_VERB: &str = "verb";
const KEY_PARSER: &str = "parser";
const RESERVED_KEYS: [&str; 5] = [KEY_FIELD, KEY_PROMPT, KEY_NOUN, KEY_VERB, KEY_PARSER];

/// Builds the `fragment:create` command asking the user for `key`.
///
/// The original data is carried along with the field name, prompt, and the
/// route and parser needed to rebuild the command later. Commands without a
/// parser cannot be completed.
pub fn create_completion(command: &Command, key: &str, prompt: &str) -> BusResult<Command> {
    let Some(parser) = command.context.parser.as_deref() else {
        return Err(BusError::validation(
            "command has no parser to prompt for completion",
        ));
    };

    Ok(Command {
        noun: NOUN_FRAGMENT.to_string(),
        verb: CommandVerb::Create,
        data: command.data.clone(),
        labels: BTreeMap::new(),
        context: command.context.clone(),
    }
    .with_data(KEY_FIELD, [key])
    .with_data(KEY_PROMPT, [prompt])
    .with_data(KEY_NOUN, [command.noun.as_str()])
    .with_data(KEY_VERB, [command.verb.as_str()])
    .with_data(KEY_PARSER, [parser]))
}

/// A collected field value.
#[derive(Debug, Clone, PartialEq)]
pub enum CollectValue {
    List(Vec<String>),
    Number(i64),
    Text(String),
}

/// Coerces `value` to the shape of `default`.
pub fn collect_value(value: CollectValue, default: &CollectValue) -> BusResult<CollectValue> {
    match (default, value) {
        (CollectValue::List(_), CollectValue::List(values)) => Ok(CollectValue::List(values)),
        (CollectValue::List(_), CollectValue::Number(number)) => {
            Ok(CollectValue::List(vec![number.to_string()]))
        }
        (CollectValue::List(_), CollectValue::Text(text)) => Ok(CollectValue::List(vec![text])),
        (CollectValue::Number(_), CollectValue::List(values)) => values
            .first()
            .map(|head| parse_number(head))
            .unwrap_or_else(|| Err(value_type_error())),
        (CollectValue::Number(_), CollectValue::Number(number)) => Ok(CollectValue::Number(number)),
        (CollectValue::Number(_), CollectValue::Text(text)) => parse_number(&text),
        (CollectValue::Text(_), CollectValue::List(values)) => values
            .into_iter()
            .next()
            .map(CollectValue::Text)
            .ok_or_else(value_type_error),
        (CollectValue::Text(_), CollectValue::Number(number)) => {
            Ok(CollectValue::Text(number.to_string()))
        }
        (CollectValue::Text(_), CollectValue::Text(text)) => Ok(CollectValue::Text(text)),
    }
}

fn parse_number(raw: &str) -> BusResult<CollectValue> {
    raw.trim()
        .parse::<i64>()
        .map(CollectValue::Number)
        .map_err(|_| value_type_error())
}

fn value_type_error() -> BusError {
    BusError::validation("value type error")
}

/// Declared field for [`collect_or_complete`].
#[derive(Debug, Clone, PartialEq)]
pub struct CollectField {
    pub key: String,
    pub default: CollectValue,
    pub prompt: String,
    pub required: bool,
}

impl CollectField {
    pub fn required(key: impl Into<String>, default: CollectValue, prompt: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            default,
            prompt: prompt.into(),
            required: true,
        }
    }

    pub fn optional(key: impl Into<String>, default: CollectValue) -> Self {
        Self {
            key: key.into(),
            default,
            prompt: String::new(),
            required: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CollectResult {
    Complete { data: BTreeMap<String, CollectValue> },
    /// A field is missing or malformed; `completion` asks the user for it.
    Incomplete { completion: Command },
}

/// Collects declared fields from `command`, or builds the completion that
/// asks for the first missing or malformed one.
pub fn collect_or_complete(command: &Command, fields: &[CollectField]) -> BusResult<CollectResult> {
    let mut data = BTreeMap::new();
    for field in fields {
        if !command.has(&field.key) {
            if field.required {
                return Ok(CollectResult::Incomplete {
                    completion: create_completion(command, &field.key, &field.prompt)?,
                });
            }
            data.insert(field.key.clone(), field.default.clone());
            continue;
        }

        let value = CollectValue::List(command.get(&field.key).to_vec());
        match collect_value(value, &field.default) {
            Ok(coerced) => {
                data.insert(field.key.clone(), coerced);
            }
            Err(_) => {
                return Ok(CollectResult::Incomplete {
                    completion: create_completion(command, &field.key, &field.prompt)?,
                });
            }
        }
    }
    Ok(CollectResult::Complete { data })
}

/// Resolves the newest pending fragment for the message's conversation.
///
/// Returns `None` when nothing is pending, so the message is parsed normally.
/// The fragment is consumed before its parser runs; a second answer racing
/// this one finds nothing and is parsed as a new message.
pub async fn resolve_completion(
    message: &Message,
    store: &dyn BusStore,
    parsers: &ParserRegistry,
) -> BusResult<Option<Vec<Command>>> {
    let completion_key = message.context.completion_key();
    let Some(mut fragment) = store.take_fragment(&completion_key).await? else {
        return Ok(None);
    };
    fragment
        .transition(CompletionState::Resolved)
        .map_err(|error| BusError::validation(error.to_string()))?;

    let parser = parsers
        .get(&fragment.parser_id)
        .ok_or_else(|| BusError::not_found("parser", fragment.parser_id.clone()))?;
    tracing::debug!(
        fragment = %fragment.id,
        key = %fragment.key,
        parser = parser.id(),
        "resolving completion"
    );
    let value = vec![message.body.trim().to_string()];
    parser
        .complete(&message.context, &fragment, value)
        .await
        .map(Some)
}

/// Built-in handler that persists fragments and sends their prompts.
pub struct FragmentHandler {
    routes: Vec<HandlerRoute>,
}

impl FragmentHandler {
    pub fn new() -> Self {
        Self {
            routes: vec![HandlerRoute::new(NOUN_FRAGMENT, CommandVerb::Create)
                .with_help("ask the user for a missing command field")],
        }
    }
}

impl Default for FragmentHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Handler for FragmentHandler {
    fn id(&self) -> &str {
        "fragment"
    }

    fn routes(&self) -> &[HandlerRoute] {
        &self.routes
    }

    async fn handle(
        &self,
        _route: &HandlerRoute,
        command: &Command,
        bus: &BusHandle,
    ) -> BusResult<bool> {
        let key = command.get_head(KEY_FIELD)?;
        let prompt = command.get_head_or_default(KEY_PROMPT, key);
        let parser = command.get_head(KEY_PARSER)?;
        let verb = command.get_head(KEY_VERB)?.parse::<CommandVerb>()?;

        let mut original = Command::new(command.get_head(KEY_NOUN)?, verb, command.context.clone());
        original.data = command
            .data
            .iter()
            .filter(|(name, _)| !RESERVED_KEYS.contains(&name.as_str()))
            .map(|(name, values)| (name.clone(), values.clone()))
            .collect();

        let fragment = Fragment::open(&original, parser, key, prompt);
        tracing::debug!(
            fragment = %fragment.id,
            key = %fragment.key,
            route = %original.route_key(),
            "saving completion fragment"
        );
        if let Some(superseded) = bus.store().save_fragment(fragment).await? {
            tracing::debug!(fragment = %superseded.id, "superseded pending fragment");
        }
        bus.send(Message::reply(&command.context, TYPE_TEXT, prompt))?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::{
        collect_or_complete, collect_value, create_completion, resolve_completion, CollectField,
        CollectResult, CollectValue, FragmentHandler, NOUN_FRAGMENT,
    };
    use crate::handler_registry::Handler;
    use crate::parser_registry::{Parser, ParserRegistry};
    use crate::BusHandle;
    use async_trait::async_trait;
    use parley_store::{BusStore, InMemoryBusStore};
    use parley_types::{BusError, BusResult, Command, CommandVerb, Context, Message};
    use std::sync::Arc;

    fn context() -> Context {
        Context::new("u-1", "alice", "general")
            .with_source("stdio")
            .with_parser("split")
    }

    fn delete_command() -> Command {
        Command::new("account", CommandVerb::Delete, context()).with_data("name", ["alice"])
    }

    struct NoopParser;

    #[async_trait]
    impl Parser for NoopParser {
        fn id(&self) -> &str {
            "split"
        }

        fn matches(&self, _message: &Message) -> bool {
            false
        }

        async fn parse(&self, _message: &Message) -> BusResult<Vec<Command>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn unit_create_completion_carries_route_and_prompt() {
        let completion = create_completion(&delete_command(), "confirm", "are you sure?")
            .expect("create completion");
        assert_eq!(completion.noun, NOUN_FRAGMENT);
        assert_eq!(completion.verb, CommandVerb::Create);
        assert_eq!(completion.get_head("key"), Ok("confirm"));
        assert_eq!(completion.get_head("msg"), Ok("are you sure?"));
        assert_eq!(completion.get_head("noun"), Ok("account"));
        assert_eq!(completion.get_head("verb"), Ok("delete"));
        assert_eq!(completion.get_head("parser"), Ok("split"));
        assert_eq!(completion.get_head("name"), Ok("alice"));
    }

    #[test]
    fn regression_create_completion_requires_parser() {
        let mut command = delete_command();
        command.context.parser = None;
        assert!(matches!(
            create_completion(&command, "confirm", "?"),
            Err(BusError::Validation(_))
        ));
    }

    #[test]
    fn unit_collect_value_coerces_to_default_shape() {
        let list = CollectValue::List(Vec::new());
        let number = CollectValue::Number(0);
        let text = CollectValue::Text(String::new());

        assert_eq!(
            collect_value(CollectValue::List(vec!["a".into(), "b".into()]), &list),
            Ok(CollectValue::List(vec!["a".into(), "b".into()]))
        );
        assert_eq!(
            collect_value(CollectValue::Number(3), &list),
            Ok(CollectValue::List(vec!["3".into()]))
        );
        assert_eq!(
            collect_value(CollectValue::Text("x".into()), &list),
            Ok(CollectValue::List(vec!["x".into()]))
        );
        assert_eq!(
            collect_value(CollectValue::List(vec!["12".into(), "9".into()]), &number),
            Ok(CollectValue::Number(12))
        );
        assert_eq!(
            collect_value(CollectValue::Text(" 7 ".into()), &number),
            Ok(CollectValue::Number(7))
        );
        assert_eq!(
            collect_value(CollectValue::List(vec!["head".into(), "tail".into()]), &text),
            Ok(CollectValue::Text("head".into()))
        );
        assert_eq!(
            collect_value(CollectValue::Number(5), &text),
            Ok(CollectValue::Text("5".into()))
        );
    }

    #[test]
    fn regression_collect_value_rejects_unparseable_values() {
        let number = CollectValue::Number(0);
        assert_eq!(
            collect_value(CollectValue::Text("ten".into()), &number),
            Err(BusError::validation("value type error"))
        );
        assert!(collect_value(CollectValue::List(Vec::new()), &number).is_err());
        assert!(collect_value(CollectValue::List(Vec::new()), &CollectValue::Text(String::new())).is_err());
    }

    #[test]
    fn functional_collect_or_complete_fills_defaults_and_prompts_for_missing() {
        let fields = vec![
            CollectField::optional("count", CollectValue::Number(1)),
            CollectField::required("confirm", CollectValue::Text(String::new()), "are you sure?"),
        ];

        let incomplete = collect_or_complete(&delete_command(), &fields).expect("collect");
        let CollectResult::Incomplete { completion } = incomplete else {
            panic!("expected incomplete result");
        };
        assert_eq!(completion.get_head("key"), Ok("confirm"));

        let answered = delete_command().with_data("confirm", ["yes"]);
        let complete = collect_or_complete(&answered, &fields).expect("collect");
        let CollectResult::Complete { data } = complete else {
            panic!("expected complete result");
        };
        assert_eq!(data.get("count"), Some(&CollectValue::Number(1)));
        assert_eq!(data.get("confirm"), Some(&CollectValue::Text("yes".into())));
    }

    #[test]
    fn regression_malformed_value_prompts_again() {
        let fields = vec![CollectField::required(
            "count",
            CollectValue::Number(0),
            "how many?",
        )];
        let command = delete_command().with_data("count", ["many"]);
        let result = collect_or_complete(&command, &fields).expect("collect");
        assert!(matches!(result, CollectResult::Incomplete { completion } if completion.get_head("msg") == Ok("how many?")));
    }

    #[tokio::test]
    async fn functional_fragment_round_trip_rebuilds_command_once() {
        let store: Arc<dyn BusStore> = Arc::new(InMemoryBusStore::new());
        let (bus, mut receivers) = BusHandle::detached(Arc::clone(&store));
        let completion = create_completion(&delete_command(), "confirm", "are you sure?")
            .expect("create completion");

        let handler = FragmentHandler::new();
        let route = handler.routes()[0].clone();
        assert!(handler.handle(&route, &completion, &bus).await.expect("handle"));
        let prompt = receivers.outgoing.try_recv().expect("prompt sent");
        assert_eq!(prompt.body, "are you sure?");

        let parsers = ParserRegistry::new(vec![Arc::new(NoopParser)]);
        let mut answer_context = context();
        answer_context.parser = None;
        let answer = Message::text(answer_context, " yes ");
        let commands = resolve_completion(&answer, store.as_ref(), &parsers)
            .await
            .expect("resolve")
            .expect("fragment resolved");
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].route_key(), "account:delete");
        assert_eq!(commands[0].get("confirm"), ["yes".to_string()]);
        assert_eq!(commands[0].get("name"), ["alice".to_string()]);
        assert!(!commands[0].has("msg"));

        let duplicate = resolve_completion(&answer, store.as_ref(), &parsers)
            .await
            .expect("resolve duplicate");
        assert!(duplicate.is_none());
    }

    #[tokio::test]
    async fn regression_unknown_fragment_parser_is_not_found() {
        let store: Arc<dyn BusStore> = Arc::new(InMemoryBusStore::new());
        let (bus, _receivers) = BusHandle::detached(Arc::clone(&store));
        let completion = create_completion(&delete_command(), "confirm", "sure?")
            .expect("create completion");
        let handler = FragmentHandler::new();
        let route = handler.routes()[0].clone();
        handler.handle(&route, &completion, &bus).await.expect("handle");

        let answer = Message::text(context(), "yes");
        let error = resolve_completion(&answer, store.as_ref(), &ParserRegistry::default())
            .await
            .expect_err("missing parser");
        assert!(matches!(error, BusError::NotFound { kind: "parser", .. }));
    }
}
