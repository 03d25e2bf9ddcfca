//! Account, grant and session commands.

use std::sync::Arc;

use async_trait::async_trait;
use parley_access::{derived_grant, Grant, GrantSet, StaticTokenVerifier, TokenVerifier};
use parley_bus::{grant_missing_reply, BusHandle, Handler, HandlerRoute};
use parley_store::{BusStore, User};
use parley_types::{BusError, BusResult, Command, CommandVerb, Message, TYPE_TEXT};
use serde::{Deserialize, Serialize};

pub const NOUN_ACCOUNT: &str = "account";
pub const NOUN_GRANT: &str = "grant";
pub const NOUN_SESSION: &str = "session";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinConfig {
    /// Anyone may create an account; otherwise `account:create` is required.
    #[serde(default)]
    pub allow: bool,
    #[serde(default)]
    pub grants: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootConfig {
    #[serde(default)]
    pub allow: bool,
    /// Account that receives the root grants. When empty, the first account
    /// created receives them.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub grants: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenConfig {
    #[serde(default)]
    pub ttl_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountHandlerConfig {
    pub id: String,
    #[serde(default)]
    pub join: JoinConfig,
    #[serde(default)]
    pub root: RootConfig,
    #[serde(default)]
    pub token: TokenConfig,
}

pub struct AccountHandler {
    config: AccountHandlerConfig,
    routes: Vec<HandlerRoute>,
    store: Arc<dyn BusStore>,
    tokens: Arc<StaticTokenVerifier>,
}

impl AccountHandler {
    pub fn new(
        config: AccountHandlerConfig,
        store: Arc<dyn BusStore>,
        tokens: Arc<StaticTokenVerifier>,
    ) -> Self {
        let routes = vec![
            HandlerRoute::new(NOUN_ACCOUNT, CommandVerb::Create)
                .with_help("create an account and receive a login token"),
            HandlerRoute::new(NOUN_ACCOUNT, CommandVerb::Delete)
                .gated()
                .with_help("delete your account after confirming"),
            HandlerRoute::new(NOUN_GRANT, CommandVerb::Get)
                .gated()
                .with_help("check whether you hold each requested grant"),
            HandlerRoute::new(NOUN_GRANT, CommandVerb::List)
                .gated()
                .with_help("list your grants covered by each requested grant"),
            HandlerRoute::new(NOUN_SESSION, CommandVerb::Create)
                .with_help("verify a login token and report its grants"),
            HandlerRoute::new(NOUN_ACCOUNT, CommandVerb::Help),
        ];
        Self {
            config,
            routes,
            store,
            tokens,
        }
    }

    async fn create_account(&self, command: &Command, bus: &BusHandle) -> BusResult<()> {
        let context = &command.context;
        if !self.config.join.allow {
            let required = derived_grant(NOUN_ACCOUNT, CommandVerb::Create.as_str())
                .map_err(|error| BusError::validation(error.to_string()))?;
            if !GrantSet::from_lossy(&context.grants).satisfies(&required) {
                tracing::warn!(uid = %context.uid, "account creation denied");
                bus.send(grant_missing_reply(command, required.as_str()))?;
                return Ok(());
            }
        }

        let name = command.get_head_or_default("name", &context.name).trim();
        if name.is_empty() {
            return Err(BusError::validation("account name is required"));
        }
        if self.store.find_user(name).await?.is_some() {
            return reply(bus, command, format!("account '{name}' already exists"));
        }

        let grants = self.account_grants(name).await?;
        self.store
            .create_user(User::new(name, context.uid.clone(), grants.clone()))
            .await?;
        let token = self
            .tokens
            .issue(
                name,
                GrantSet::from_lossy(&grants).iter().cloned().collect(),
                self.config.token.ttl_ms,
            )
            .await;
        tracing::info!(name, uid = %context.uid, "created account");
        reply(
            bus,
            command,
            format!("created account '{name}', login token: {token}"),
        )
    }

    async fn account_grants(&self, name: &str) -> BusResult<Vec<String>> {
        let mut grants = self.config.join.grants.clone();
        let root = &self.config.root;
        if root.allow {
            let is_root = if root.name.is_empty() {
                self.store.count_users().await? == 0
            } else {
                root.name == name
            };
            if is_root {
                tracing::warn!(user = name, grants = ?root.grants, "granting root grants to user");
                grants.extend(root.grants.iter().cloned());
            }
        }
        Ok(grants)
    }

    async fn delete_account(&self, command: &Command, bus: &BusHandle) -> BusResult<()> {
        let context = &command.context;
        let name = context.name.as_str();
        let owned = self
            .store
            .find_user(name)
            .await?
            .is_some_and(|user| user.uid == context.uid);
        if !owned {
            tracing::debug!(uid = %context.uid, name, "no account owned by caller");
            return reply(bus, command, format!("no account named '{name}'"));
        }
        if command.get_head_or_default("confirm", "no") != "yes" {
            return bus.request_completion(
                command,
                "confirm",
                &format!("delete account '{name}'? answer yes to confirm"),
            );
        }
        self.store.delete_user(name).await?;
        tracing::info!(name, "deleted account");
        reply(bus, command, format!("deleted account '{name}'"))
    }

    async fn create_session(&self, command: &Command, bus: &BusHandle) -> BusResult<()> {
        let token = command.get_head("token")?;
        let verified = match self.tokens.verify(token).await {
            Ok(verified) => verified,
            Err(error) => {
                tracing::debug!(uid = %command.context.uid, %error, "rejected login token");
                return reply(bus, command, format!("invalid token: {error}"));
            }
        };
        if self.store.find_user(&verified.subject).await?.is_none() {
            return reply(
                bus,
                command,
                format!("no account named '{}'", verified.subject),
            );
        }
        let grants = verified
            .grants
            .iter()
            .map(Grant::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        reply(
            bus,
            command,
            format!("session started for '{}' with grants: {grants}", verified.subject),
        )
    }
}

fn reply(bus: &BusHandle, command: &Command, body: String) -> BusResult<()> {
    bus.send(Message::reply(&command.context, TYPE_TEXT, body))
}

/// One line per requested grant, rendered by `describe`.
fn grant_report(command: &Command, describe: impl Fn(&GrantSet, &Grant) -> String) -> String {
    let held = GrantSet::from_lossy(&command.context.grants);
    let requested = command.get("grants");
    if requested.is_empty() {
        return "no grants requested".to_string();
    }
    requested
        .iter()
        .map(|raw| match Grant::parse(raw) {
            Ok(grant) => format!("{raw}: {}", describe(&held, &grant)),
            Err(error) => format!("{raw}: invalid grant ({error})"),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl Handler for AccountHandler {
    fn id(&self) -> &str {
        &self.config.id
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
        match (command.noun.as_str(), command.verb) {
            (NOUN_ACCOUNT, CommandVerb::Create) => self.create_account(command, bus).await?,
            (NOUN_ACCOUNT, CommandVerb::Delete) => self.delete_account(command, bus).await?,
            (NOUN_GRANT, CommandVerb::Get) => {
                let report = grant_report(command, |held, grant| {
                    held.satisfies(grant).to_string()
                });
                reply(bus, command, report)?;
            }
            (NOUN_GRANT, CommandVerb::List) => {
                let report = grant_report(command, |held, grant| {
                    let covered = held
                        .iter()
                        .filter(|candidate| grant.satisfies(candidate))
                        .map(Grant::as_str)
                        .collect::<Vec<_>>();
                    if covered.is_empty() {
                        "none".to_string()
                    } else {
                        covered.join(", ")
                    }
                });
                reply(bus, command, report)?;
            }
            (NOUN_SESSION, CommandVerb::Create) => self.create_session(command, bus).await?,
            _ => return Ok(false),
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::{AccountHandler, AccountHandlerConfig, JoinConfig, RootConfig, TokenConfig};
    use parley_access::StaticTokenVerifier;
    use parley_bus::{
        BusHandle, BusReceivers, HandleOutcome, Handler, HandlerRegistry, HandlerRoute,
        NOUN_FRAGMENT,
    };
    use parley_store::{BusStore, InMemoryBusStore};
    use parley_types::{Command, CommandVerb, Context};
    use std::sync::Arc;

    struct Harness {
        handler: AccountHandler,
        store: Arc<InMemoryBusStore>,
        bus: BusHandle,
        receivers: BusReceivers,
    }

    fn harness(join_allow: bool, root: RootConfig) -> Harness {
        let store = Arc::new(InMemoryBusStore::new());
        let (bus, receivers) = BusHandle::detached(store.clone());
        let handler = AccountHandler::new(
            AccountHandlerConfig {
                id: "account".to_string(),
                join: JoinConfig {
                    allow: join_allow,
                    grants: vec!["account:delete".to_string(), "grant:*".to_string()],
                },
                root,
                token: TokenConfig::default(),
            },
            store.clone(),
            Arc::new(StaticTokenVerifier::new()),
        );
        Harness {
            handler,
            store,
            bus,
            receivers,
        }
    }

    fn command(noun: &str, verb: CommandVerb, grants: &[&str]) -> Command {
        Command::new(
            noun,
            verb,
            Context::new("u-1", "alice", "general")
                .with_source("stdio")
                .with_parser("split")
                .with_grants(grants.iter().copied()),
        )
    }

    impl Harness {
        fn route(&self, command: &Command) -> HandlerRoute {
            self.handler
                .routes()
                .iter()
                .find(|route| route.serves(command))
                .cloned()
                .expect("route")
        }

        async fn run(&mut self, command: &Command) -> String {
            let route = self.route(command);
            assert!(self
                .handler
                .handle(&route, command, &self.bus)
                .await
                .expect("handle"));
            self.receivers.outgoing.recv().await.expect("reply").body
        }
    }

    #[tokio::test]
    async fn functional_closed_join_without_grant_is_denied() {
        let mut harness = harness(false, RootConfig::default());
        let reply = harness
            .run(&command("account", CommandVerb::Create, &[]))
            .await;
        assert_eq!(reply, "permission denied: missing grant 'account:create'");
        assert_eq!(harness.store.count_users().await.expect("count"), 0);

        let granted = harness
            .run(&command("account", CommandVerb::Create, &["account:*"]))
            .await;
        assert!(granted.starts_with("created account 'alice'"));
    }

    #[tokio::test]
    async fn functional_open_join_creates_account_and_token_once() {
        let mut harness = harness(true, RootConfig::default());
        let reply = harness
            .run(&command("account", CommandVerb::Create, &[]))
            .await;
        assert!(reply.contains("login token: "));
        let user = harness
            .store
            .find_user("alice")
            .await
            .expect("find")
            .expect("user");
        assert_eq!(user.uid, "u-1");
        assert_eq!(user.grants, vec!["account:delete", "grant:*"]);

        let again = harness
            .run(&command("account", CommandVerb::Create, &[]))
            .await;
        assert_eq!(again, "account 'alice' already exists");
    }

    #[tokio::test]
    async fn functional_first_account_receives_root_grants() {
        let mut harness = harness(
            true,
            RootConfig {
                allow: true,
                name: String::new(),
                grants: vec!["*".to_string()],
            },
        );
        harness
            .run(&command("account", CommandVerb::Create, &[]))
            .await;
        let named_bob = command("account", CommandVerb::Create, &[]).with_data("name", ["bob"]);
        harness.run(&named_bob).await;

        let alice = harness.store.find_user("alice").await.expect("find").expect("alice");
        let bob = harness.store.find_user("bob").await.expect("find").expect("bob");
        assert!(alice.grants.contains(&"*".to_string()));
        assert!(!bob.grants.contains(&"*".to_string()));
    }

    #[tokio::test]
    async fn functional_session_verifies_issued_token() {
        let mut harness = harness(true, RootConfig::default());
        let created = harness
            .run(&command("account", CommandVerb::Create, &[]))
            .await;
        let token = created
            .rsplit("login token: ")
            .next()
            .expect("token")
            .to_string();

        let session = command("session", CommandVerb::Create, &[]).with_data("token", [token]);
        let reply = harness.run(&session).await;
        assert_eq!(
            reply,
            "session started for 'alice' with grants: account:delete, grant:*"
        );

        let forged = command("session", CommandVerb::Create, &[]).with_data("token", ["nope"]);
        assert_eq!(
            harness.run(&forged).await,
            "invalid token: token is not recognized"
        );
    }

    #[tokio::test]
    async fn functional_delete_requests_confirmation_then_deletes() {
        let mut harness = harness(true, RootConfig::default());
        harness
            .run(&command("account", CommandVerb::Create, &[]))
            .await;

        let delete = command("account", CommandVerb::Delete, &["account:delete"]);
        let route = harness.route(&delete);
        assert!(harness
            .handler
            .handle(&route, &delete, &harness.bus)
            .await
            .expect("handle"));
        let completion = harness.receivers.commands.recv().await.expect("completion");
        assert_eq!(completion.noun, NOUN_FRAGMENT);
        assert_eq!(completion.get_head("key").expect("key"), "confirm");
        assert!(harness.store.find_user("alice").await.expect("find").is_some());

        let confirmed = delete.clone().with_data("confirm", ["yes"]);
        assert_eq!(harness.run(&confirmed).await, "deleted account 'alice'");
        assert!(harness.store.find_user("alice").await.expect("find").is_none());
    }

    #[tokio::test]
    async fn regression_delete_requires_matching_uid_not_display_name() {
        let mut harness = harness(true, RootConfig::default());
        harness
            .run(&command("account", CommandVerb::Create, &[]))
            .await;

        let impostor = Command::new(
            "account",
            CommandVerb::Delete,
            Context::new("u-9", "alice", "general")
                .with_source("stdio")
                .with_parser("split")
                .with_grants(["account:delete"]),
        )
        .with_data("confirm", ["yes"]);
        assert_eq!(harness.run(&impostor).await, "no account named 'alice'");
        let alice = harness
            .store
            .find_user("alice")
            .await
            .expect("find")
            .expect("alice survives");
        assert_eq!(alice.uid, "u-1");
    }

    #[tokio::test]
    async fn functional_account_help_lists_account_routes() {
        let Harness {
            handler,
            bus,
            mut receivers,
            ..
        } = harness(true, RootConfig::default());
        let registry = HandlerRegistry::new(vec![Arc::new(handler)], false);

        let outcome = registry
            .dispatch(&command("account", CommandVerb::Help, &[]), &bus)
            .await
            .expect("dispatch");
        assert_eq!(outcome, HandleOutcome::HelpAnswered);
        let reply = receivers.outgoing.recv().await.expect("reply");
        assert_eq!(
            reply.body,
            "account:create: create an account and receive a login token\n\
             account:delete: delete your account after confirming"
        );
    }

    #[tokio::test]
    async fn unit_grant_reports_cover_each_requested_grant() {
        let mut harness = harness(true, RootConfig::default());
        let held = &["account:create", "account:delete", "grant:get"];

        let get = command("grant", CommandVerb::Get, held)
            .with_data("grants", ["account:create", "session:get", "bad*grant"]);
        let reply = harness.run(&get).await;
        let lines = reply.lines().collect::<Vec<_>>();
        assert_eq!(lines[0], "account:create: true");
        assert_eq!(lines[1], "session:get: false");
        assert!(lines[2].starts_with("bad*grant: invalid grant"));

        let list = command("grant", CommandVerb::List, held)
            .with_data("grants", ["account:*", "session:*"]);
        assert_eq!(
            harness.run(&list).await,
            "account:*: account:create, account:delete\nsession:*: none"
        );
    }
}
