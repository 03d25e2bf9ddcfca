//! Bus persistence abstractions and in-memory backend.
//!
//! The store is the only state shared between in-flight bus items: the
//! command and message audit log, pending completion fragments, and the user
//! accounts managed by the account handler.

use async_trait::async_trait;
use parley_core::current_unix_timestamp_ms;
use parley_types::{BusError, Command, CompletionState, Fragment, Message, StatusTransitionError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{Notify, RwLock};

mod sqlite;

pub use sqlite::SqliteBusStore;

/// Result type for bus store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("user '{0}' already exists")]
    UserAlreadyExists(String),
    #[error(transparent)]
    InvalidTransition(#[from] StatusTransitionError),
    #[error("invalid persisted value for '{field}': {value}")]
    InvalidPersistedValue { field: &'static str, value: String },
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<StoreError> for BusError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::UserAlreadyExists(_) | StoreError::InvalidTransition(_) => {
                BusError::Validation(error.to_string())
            }
            other => BusError::TransientIo(other.to_string()),
        }
    }
}

/// Audit record for a command accepted by the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCommand {
    pub id: u64,
    pub command: Command,
    pub created_unix_ms: u64,
}

/// Audit record for an outgoing message accepted by the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub id: u64,
    pub message: Message,
    pub created_unix_ms: u64,
}

/// Account managed through the `account` noun.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub name: String,
    pub uid: String,
    #[serde(default)]
    pub grants: Vec<String>,
    pub created_unix_ms: u64,
}

impl User {
    pub fn new(name: impl Into<String>, uid: impl Into<String>, grants: Vec<String>) -> Self {
        Self {
            name: name.into(),
            uid: uid.into(),
            grants,
            created_unix_ms: current_unix_timestamp_ms(),
        }
    }
}

/// Async store contract used by the command bus and its handlers.
#[async_trait]
pub trait BusStore: Send + Sync {
    async fn save_command(&self, command: &Command) -> StoreResult<u64>;
    async fn save_message(&self, message: &Message) -> StoreResult<u64>;
    async fn list_commands(&self) -> StoreResult<Vec<StoredCommand>>;
    async fn list_messages(&self) -> StoreResult<Vec<StoredMessage>>;

    async fn find_fragment(&self, completion_key: &str, key: &str)
        -> StoreResult<Option<Fragment>>;
    /// Persists `fragment` as pending, returning the fragment it superseded.
    async fn save_fragment(&self, fragment: Fragment) -> StoreResult<Option<Fragment>>;
    async fn delete_fragment(&self, fragment_id: &str) -> StoreResult<bool>;
    /// Atomically removes and returns the newest pending fragment for
    /// `completion_key`; concurrent callers never receive the same fragment.
    async fn take_fragment(&self, completion_key: &str) -> StoreResult<Option<Fragment>>;

    async fn create_user(&self, user: User) -> StoreResult<()>;
    async fn find_user(&self, name: &str) -> StoreResult<Option<User>>;
    async fn delete_user(&self, name: &str) -> StoreResult<bool>;
    async fn count_users(&self) -> StoreResult<u64>;
}

/// Storage backend selected by bus configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreConfig {
    #[default]
    Memory,
    Sqlite { path: PathBuf },
}

impl StoreConfig {
    /// Opens the configured backend.
    pub fn connect(&self) -> StoreResult<Arc<dyn BusStore>> {
        match self {
            Self::Memory => Ok(Arc::new(InMemoryBusStore::new())),
            Self::Sqlite { path } => Ok(Arc::new(SqliteBusStore::new(path)?)),
        }
    }
}

fn mark_pending(mut fragment: Fragment) -> StoreResult<Fragment> {
    fragment.transition(CompletionState::PendingAnswer)?;
    Ok(fragment)
}

fn mark_superseded(mut fragment: Fragment) -> StoreResult<Fragment> {
    fragment.transition(CompletionState::Superseded)?;
    Ok(fragment)
}

/// In-memory implementation for tests and local experimentation.
#[derive(Debug, Default)]
pub struct InMemoryBusStore {
    inner: RwLock<StoreInner>,
    notify: Notify,
}

#[derive(Debug, Default)]
struct StoreInner {
    next_id: u64,
    commands: Vec<StoredCommand>,
    messages: Vec<StoredMessage>,
    fragments: Vec<Fragment>,
    users: BTreeMap<String, User>,
}

impl StoreInner {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

impl InMemoryBusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until at least `count` outgoing messages were saved, returning
    /// whatever is stored when `timeout` elapses first.
    pub async fn wait_for_messages(&self, count: usize, timeout: Duration) -> Vec<StoredMessage> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            let messages = self.inner.read().await.messages.clone();
            if messages.len() >= count {
                return messages;
            }

            let now = Instant::now();
            if now >= deadline {
                return messages;
            }

            let remaining = deadline.saturating_duration_since(now);
            if tokio::time::timeout(remaining, notified).await.is_err() {
                return self.inner.read().await.messages.clone();
            }
        }
    }
}

#[async_trait]
impl BusStore for InMemoryBusStore {
    async fn save_command(&self, command: &Command) -> StoreResult<u64> {
        let mut inner = self.inner.write().await;
        let id = inner.allocate_id();
        inner.commands.push(StoredCommand {
            id,
            command: command.clone(),
            created_unix_ms: current_unix_timestamp_ms(),
        });
        drop(inner);
        self.notify.notify_waiters();
        Ok(id)
    }

    async fn save_message(&self, message: &Message) -> StoreResult<u64> {
        let mut inner = self.inner.write().await;
        let id = inner.allocate_id();
        inner.messages.push(StoredMessage {
            id,
            message: message.clone(),
            created_unix_ms: current_unix_timestamp_ms(),
        });
        drop(inner);
        self.notify.notify_waiters();
        Ok(id)
    }

    async fn list_commands(&self) -> StoreResult<Vec<StoredCommand>> {
        Ok(self.inner.read().await.commands.clone())
    }

    async fn list_messages(&self) -> StoreResult<Vec<StoredMessage>> {
        Ok(self.inner.read().await.messages.clone())
    }

    async fn find_fragment(
        &self,
        completion_key: &str,
        key: &str,
    ) -> StoreResult<Option<Fragment>> {
        let inner = self.inner.read().await;
        Ok(inner
            .fragments
            .iter()
            .find(|fragment| fragment.completion_key == completion_key && fragment.key == key)
            .cloned())
    }

    async fn save_fragment(&self, fragment: Fragment) -> StoreResult<Option<Fragment>> {
        let fragment = mark_pending(fragment)?;
        let mut inner = self.inner.write().await;
        let existing = inner.fragments.iter().position(|item| {
            item.completion_key == fragment.completion_key && item.key == fragment.key
        });
        let superseded = existing
            .map(|index| inner.fragments.remove(index))
            .map(mark_superseded)
            .transpose()?;
        inner.fragments.push(fragment);
        Ok(superseded)
    }

    async fn delete_fragment(&self, fragment_id: &str) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        let before = inner.fragments.len();
        inner.fragments.retain(|fragment| fragment.id != fragment_id);
        Ok(inner.fragments.len() != before)
    }

    async fn take_fragment(&self, completion_key: &str) -> StoreResult<Option<Fragment>> {
        let mut inner = self.inner.write().await;
        let newest = inner
            .fragments
            .iter()
            .rposition(|fragment| fragment.completion_key == completion_key);
        Ok(newest.map(|index| inner.fragments.remove(index)))
    }

    async fn create_user(&self, user: User) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if inner.users.contains_key(&user.name) {
            return Err(StoreError::UserAlreadyExists(user.name));
        }
        inner.users.insert(user.name.clone(), user);
        Ok(())
    }

    async fn find_user(&self, name: &str) -> StoreResult<Option<User>> {
        Ok(self.inner.read().await.users.get(name).cloned())
    }

    async fn delete_user(&self, name: &str) -> StoreResult<bool> {
        Ok(self.inner.write().await.users.remove(name).is_some())
    }

    async fn count_users(&self) -> StoreResult<u64> {
        Ok(self.inner.read().await.users.len() as u64)
    }
}
