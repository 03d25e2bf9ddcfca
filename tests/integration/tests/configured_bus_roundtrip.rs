use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use parley_bus::{
    BusHandle, CommandBus, ComponentFactory, Filter, Handler, IntervalTrigger, Parser,
    StartupContext, Transport,
};
use parley_services::{parse_bus_config, BusConfig};
use parley_store::{BusStore, SqliteBusStore};
use parley_types::{BusResult, Context, Message};
use tokio::sync::Mutex as AsyncMutex;

const IDLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Records outgoing bodies in place of a chat network.
#[derive(Default)]
struct RecordingTransport {
    sent: AsyncMutex<Vec<String>>,
}

impl RecordingTransport {
    async fn bodies(&self) -> Vec<String> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    fn id(&self) -> &str {
        "memory"
    }

    async fn start(&self, _bus: BusHandle) -> BusResult<()> {
        Ok(())
    }

    async fn stop(&self) -> BusResult<()> {
        Ok(())
    }

    async fn send(&self, message: &Message) -> BusResult<()> {
        self.sent.lock().await.push(message.body.clone());
        Ok(())
    }
}

/// Builds everything from the config except transports.
struct ConfiguredComponents {
    config: BusConfig,
    transport: Arc<RecordingTransport>,
}

impl ComponentFactory for ConfiguredComponents {
    fn filters(&self) -> BusResult<Vec<Arc<dyn Filter>>> {
        self.config.filters()
    }

    fn handlers(&self, startup: &StartupContext) -> BusResult<Vec<Arc<dyn Handler>>> {
        self.config.handlers(startup)
    }

    fn intervals(&self) -> BusResult<Vec<IntervalTrigger>> {
        self.config.intervals()
    }

    fn transports(&self) -> BusResult<Vec<Arc<dyn Transport>>> {
        let transport: Arc<dyn Transport> = self.transport.clone();
        Ok(vec![transport])
    }

    fn parsers(&self) -> BusResult<Vec<Arc<dyn Parser>>> {
        self.config.parsers()
    }
}

struct Harness {
    bus: CommandBus,
    transport: Arc<RecordingTransport>,
}

impl Harness {
    async fn start(raw_config: &str) -> Self {
        let config = parse_bus_config(raw_config).expect("parse config");
        let transport = Arc::new(RecordingTransport::default());
        let components = ConfiguredComponents {
            config: config.clone(),
            transport: transport.clone(),
        };
        let bus = CommandBus::start(config.settings(), &config.storage, &components)
            .await
            .expect("start bus");
        Self { bus, transport }
    }

    async fn say(&self, context: &Context, body: &str) {
        self.bus
            .handle()
            .publish_incoming(Message::text(context.clone(), body))
            .expect("publish");
        assert!(self.bus.wait_idle(IDLE_TIMEOUT).await, "bus did not go idle");
    }

    async fn last_reply(&self) -> String {
        self.transport
            .bodies()
            .await
            .last()
            .cloned()
            .expect("at least one reply")
    }
}

fn alice(grants: &[&str]) -> Context {
    Context::new("u-1", "alice", "general")
        .with_source("memory")
        .with_grants(grants.iter().copied())
}

fn account_config(join_allow: bool) -> String {
    format!(
        r#"{{
            "schema_version": 1,
            "parsers": [
                {{
                    "kind": "split",
                    "id": "join",
                    "match": {{ "rules": [ {{ "key": "body", "values": [ {{ "string": "!join" }} ] }} ] }},
                    "default_command": {{ "noun": "account", "verb": "create" }},
                    "data_mapper": {{ "take": ["name"], "rest": "extra" }}
                }},
                {{
                    "kind": "split",
                    "id": "leave",
                    "match": {{ "rules": [ {{ "key": "body", "values": [ {{ "string": "!leave" }} ] }} ] }},
                    "default_command": {{ "noun": "account", "verb": "delete" }},
                    "data_mapper": {{ "take": ["confirm"], "rest": "extra" }}
                }}
            ],
            "handlers": [
                {{
                    "kind": "account",
                    "id": "account",
                    "join": {{ "allow": {join_allow}, "grants": ["account:delete"] }}
                }}
            ]
        }}"#
    )
}

#[tokio::test]
async fn integration_split_parser_echoes_through_configured_bus() {
    let mut harness = Harness::start(
        r#"{
            "schema_version": 1,
            "parsers": [
                {
                    "kind": "split",
                    "id": "echo",
                    "match": { "rules": [ { "key": "body", "values": [ { "string": "!echo" } ] } ] },
                    "default_command": { "noun": "echo", "verb": "create" },
                    "data_mapper": { "rest": "body" }
                }
            ],
            "handlers": [ { "kind": "echo", "id": "echo" } ]
        }"#,
    )
    .await;

    harness
        .say(&alice(&[]), r#"!echo hello "big world""#)
        .await;
    assert_eq!(harness.transport.bodies().await, vec!["hello big world"]);

    harness.say(&alice(&[]), "no prefix here").await;
    let metrics = harness.bus.metrics();
    assert_eq!(metrics.unmatched, 1);
    assert_eq!(metrics.handled, 1);
    harness.bus.stop().await;
}

#[tokio::test]
async fn integration_closed_join_denies_account_creation() {
    let mut harness = Harness::start(&account_config(false)).await;

    harness.say(&alice(&[]), "!join alice").await;
    assert_eq!(
        harness.last_reply().await,
        "permission denied: missing grant 'account:create'"
    );
    let store = harness.bus.handle().store().clone();
    assert_eq!(store.count_users().await.expect("count users"), 0);
    harness.bus.stop().await;
}

#[tokio::test]
async fn integration_account_delete_completes_after_confirmation_once() {
    let mut harness = Harness::start(&account_config(true)).await;
    let context = alice(&["account:delete"]);

    harness.say(&context, "!join").await;
    assert!(harness
        .last_reply()
        .await
        .starts_with("created account 'alice'"));

    harness.say(&context, "!leave").await;
    assert_eq!(
        harness.last_reply().await,
        "delete account 'alice'? answer yes to confirm"
    );

    harness.say(&context, "yes").await;
    assert_eq!(harness.last_reply().await, "deleted account 'alice'");
    let store = harness.bus.handle().store().clone();
    assert!(store.find_user("alice").await.expect("find user").is_none());

    harness.say(&context, "yes").await;
    let metrics = harness.bus.metrics();
    assert_eq!(metrics.completions_resolved, 1);
    assert_eq!(metrics.unmatched, 1);
    assert_eq!(harness.transport.bodies().await.len(), 3);
    harness.bus.stop().await;
}

#[tokio::test]
async fn integration_user_filter_drops_denied_users() {
    let mut harness = Harness::start(
        r#"{
            "schema_version": 1,
            "filters": [ { "kind": "user", "id": "users", "deny": ["mallory"] } ],
            "parsers": [ { "kind": "echo", "id": "echo" } ],
            "handlers": [ { "kind": "echo", "id": "echo" } ]
        }"#,
    )
    .await;

    let mallory = Context::new("u-9", "mallory", "general").with_source("memory");
    harness.say(&mallory, "let me in").await;
    harness.say(&alice(&[]), "hi").await;

    assert_eq!(harness.transport.bodies().await, vec!["hi"]);
    assert_eq!(harness.bus.metrics().dropped_by_filter, 1);
    harness.bus.stop().await;
}

#[tokio::test]
async fn integration_sqlite_storage_keeps_audit_log_across_restart() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("state").join("bus.sqlite");
    let raw = format!(
        r#"{{
            "schema_version": 1,
            "storage": {{ "kind": "sqlite", "path": {path:?} }},
            "parsers": [ {{ "kind": "echo", "id": "echo" }} ],
            "handlers": [ {{ "kind": "echo", "id": "echo" }} ]
        }}"#,
        path = path.display().to_string()
    );

    let mut harness = Harness::start(&raw).await;
    harness.say(&alice(&[]), "persist me").await;
    harness.bus.stop().await;

    let reopened = SqliteBusStore::new(&path).expect("reopen store");
    let commands = reopened.list_commands().await.expect("list commands");
    let messages = reopened.list_messages().await.expect("list messages");
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0].command.route_key(), "echo:create");
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].message.body, "persist me");
}
