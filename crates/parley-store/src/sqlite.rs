//! SQLite-backed `BusStore` implementation with durable persistence.

use crate::{
    mark_pending, mark_superseded, BusStore, StoreError, StoreResult, StoredCommand,
    StoredMessage, User,
};
use async_trait::async_trait;
use parley_core::current_unix_timestamp_ms;
use parley_types::{Command, CompletionState, Fragment, Message};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Persistent SQLite store backend for bus audit data, fragments, and users.
#[derive(Debug)]
pub struct SqliteBusStore {
    db_path: PathBuf,
}

impl SqliteBusStore {
    /// Creates a SQLite-backed store at `path`, creating schema if needed.
    pub fn new(path: impl AsRef<Path>) -> StoreResult<Self> {
        let db_path = path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let store = Self { db_path };
        let connection = store.open_connection()?;
        store.initialize_schema(&connection)?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn open_connection(&self) -> StoreResult<Connection> {
        let connection = Connection::open(&self.db_path)?;
        connection.busy_timeout(Duration::from_secs(5))?;
        connection.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            "#,
        )?;
        Ok(connection)
    }

    fn initialize_schema(&self, connection: &Connection) -> StoreResult<()> {
        connection.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS commands (
                command_id INTEGER PRIMARY KEY AUTOINCREMENT,
                noun TEXT NOT NULL,
                verb TEXT NOT NULL,
                completion_key TEXT NOT NULL,
                command_json TEXT NOT NULL,
                created_unix_ms INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS messages (
                message_id INTEGER PRIMARY KEY AUTOINCREMENT,
                mime_type TEXT NOT NULL,
                completion_key TEXT NOT NULL,
                message_json TEXT NOT NULL,
                created_unix_ms INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS fragments (
                fragment_row_id INTEGER PRIMARY KEY AUTOINCREMENT,
                fragment_id TEXT NOT NULL UNIQUE,
                completion_key TEXT NOT NULL,
                field_key TEXT NOT NULL,
                state TEXT NOT NULL,
                fragment_json TEXT NOT NULL,
                UNIQUE (completion_key, field_key)
            );

            CREATE INDEX IF NOT EXISTS idx_fragments_completion_key
                ON fragments (completion_key, fragment_row_id);

            CREATE TABLE IF NOT EXISTS users (
                name TEXT PRIMARY KEY,
                uid TEXT NOT NULL,
                grants_json TEXT NOT NULL,
                created_unix_ms INTEGER NOT NULL
            );
            "#,
        )?;
        Ok(())
    }
}

#[async_trait]
impl BusStore for SqliteBusStore {
    async fn save_command(&self, command: &Command) -> StoreResult<u64> {
        let connection = self.open_connection()?;
        connection.execute(
            r#"
            INSERT INTO commands (noun, verb, completion_key, command_json, created_unix_ms)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                command.noun,
                command.verb.as_str(),
                command.context.completion_key(),
                serialize_json(command)?,
                u64_to_i64("created_unix_ms", current_unix_timestamp_ms())?,
            ],
        )?;
        i64_to_u64("command_id", connection.last_insert_rowid())
    }

    async fn save_message(&self, message: &Message) -> StoreResult<u64> {
        let connection = self.open_connection()?;
        connection.execute(
            r#"
            INSERT INTO messages (mime_type, completion_key, message_json, created_unix_ms)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                message.mime_type,
                message.context.completion_key(),
                serialize_json(message)?,
                u64_to_i64("created_unix_ms", current_unix_timestamp_ms())?,
            ],
        )?;
        i64_to_u64("message_id", connection.last_insert_rowid())
    }

    async fn list_commands(&self) -> StoreResult<Vec<StoredCommand>> {
        let connection = self.open_connection()?;
        let mut statement = connection.prepare(
            "SELECT command_id, command_json, created_unix_ms FROM commands ORDER BY command_id",
        )?;
        let rows = statement.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;

        let mut commands = Vec::new();
        for row in rows {
            let (id, command_json, created_unix_ms) = row?;
            commands.push(StoredCommand {
                id: i64_to_u64("command_id", id)?,
                command: deserialize_json(&command_json)?,
                created_unix_ms: i64_to_u64("created_unix_ms", created_unix_ms)?,
            });
        }
        Ok(commands)
    }

    async fn list_messages(&self) -> StoreResult<Vec<StoredMessage>> {
        let connection = self.open_connection()?;
        let mut statement = connection.prepare(
            "SELECT message_id, message_json, created_unix_ms FROM messages ORDER BY message_id",
        )?;
        let rows = statement.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;

        let mut messages = Vec::new();
        for row in rows {
            let (id, message_json, created_unix_ms) = row?;
            messages.push(StoredMessage {
                id: i64_to_u64("message_id", id)?,
                message: deserialize_json(&message_json)?,
                created_unix_ms: i64_to_u64("created_unix_ms", created_unix_ms)?,
            });
        }
        Ok(messages)
    }

    async fn find_fragment(
        &self,
        completion_key: &str,
        key: &str,
    ) -> StoreResult<Option<Fragment>> {
        let connection = self.open_connection()?;
        let row: Option<(String, String)> = connection
            .query_row(
                r#"
                SELECT state, fragment_json FROM fragments
                WHERE completion_key = ?1 AND field_key = ?2
                "#,
                params![completion_key, key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        row.map(|(state, fragment_json)| fragment_from_db(&state, &fragment_json))
            .transpose()
    }

    async fn save_fragment(&self, fragment: Fragment) -> StoreResult<Option<Fragment>> {
        let fragment = mark_pending(fragment)?;
        let mut connection = self.open_connection()?;
        let transaction = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let existing: Option<(i64, String, String)> = transaction
            .query_row(
                r#"
                SELECT fragment_row_id, state, fragment_json FROM fragments
                WHERE completion_key = ?1 AND field_key = ?2
                "#,
                params![fragment.completion_key, fragment.key],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        let superseded = match existing {
            Some((row_id, state, fragment_json)) => {
                transaction.execute(
                    "DELETE FROM fragments WHERE fragment_row_id = ?1",
                    params![row_id],
                )?;
                Some(mark_superseded(fragment_from_db(&state, &fragment_json)?)?)
            }
            None => None,
        };

        transaction.execute(
            r#"
            INSERT INTO fragments (fragment_id, completion_key, field_key, state, fragment_json)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                fragment.id,
                fragment.completion_key,
                fragment.key,
                completion_state_to_db(fragment.state),
                serialize_json(&fragment)?,
            ],
        )?;
        transaction.commit()?;
        Ok(superseded)
    }

    async fn delete_fragment(&self, fragment_id: &str) -> StoreResult<bool> {
        let connection = self.open_connection()?;
        let removed = connection.execute(
            "DELETE FROM fragments WHERE fragment_id = ?1",
            params![fragment_id],
        )?;
        Ok(removed > 0)
    }

    async fn take_fragment(&self, completion_key: &str) -> StoreResult<Option<Fragment>> {
        let mut connection = self.open_connection()?;
        let transaction = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let newest: Option<(i64, String, String)> = transaction
            .query_row(
                r#"
                SELECT fragment_row_id, state, fragment_json FROM fragments
                WHERE completion_key = ?1
                ORDER BY fragment_row_id DESC
                LIMIT 1
                "#,
                params![completion_key],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        let Some((row_id, state, fragment_json)) = newest else {
            transaction.commit()?;
            return Ok(None);
        };

        transaction.execute(
            "DELETE FROM fragments WHERE fragment_row_id = ?1",
            params![row_id],
        )?;
        transaction.commit()?;
        fragment_from_db(&state, &fragment_json).map(Some)
    }

    async fn create_user(&self, user: User) -> StoreResult<()> {
        let mut connection = self.open_connection()?;
        let transaction = connection.transaction()?;
        let exists = transaction
            .query_row(
                "SELECT 1 FROM users WHERE name = ?1",
                params![user.name],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        if exists.is_some() {
            return Err(StoreError::UserAlreadyExists(user.name));
        }

        transaction.execute(
            r#"
            INSERT INTO users (name, uid, grants_json, created_unix_ms)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                user.name,
                user.uid,
                serialize_json(&user.grants)?,
                u64_to_i64("created_unix_ms", user.created_unix_ms)?,
            ],
        )?;
        transaction.commit()?;
        Ok(())
    }

    async fn find_user(&self, name: &str) -> StoreResult<Option<User>> {
        let connection = self.open_connection()?;
        let row: Option<(String, String, String, i64)> = connection
            .query_row(
                "SELECT name, uid, grants_json, created_unix_ms FROM users WHERE name = ?1",
                params![name],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;

        row.map(
            |(name, uid, grants_json, created_unix_ms)| -> StoreResult<User> {
                Ok(User {
                    name,
                    uid,
                    grants: deserialize_json(&grants_json)?,
                    created_unix_ms: i64_to_u64("created_unix_ms", created_unix_ms)?,
                })
            },
        )
        .transpose()
    }

    async fn delete_user(&self, name: &str) -> StoreResult<bool> {
        let connection = self.open_connection()?;
        let removed = connection.execute("DELETE FROM users WHERE name = ?1", params![name])?;
        Ok(removed > 0)
    }

    async fn count_users(&self) -> StoreResult<u64> {
        let connection = self.open_connection()?;
        let count: i64 = connection.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        i64_to_u64("user_count", count)
    }
}

fn fragment_from_db(state: &str, fragment_json: &str) -> StoreResult<Fragment> {
    let mut fragment: Fragment = deserialize_json(fragment_json)?;
    fragment.state = completion_state_from_db(state)?;
    Ok(fragment)
}

fn serialize_json<T: Serialize + ?Sized>(value: &T) -> StoreResult<String> {
    serde_json::to_string(value).map_err(StoreError::from)
}

fn deserialize_json<T: DeserializeOwned>(value: &str) -> StoreResult<T> {
    serde_json::from_str(value).map_err(StoreError::from)
}

fn completion_state_to_db(state: CompletionState) -> &'static str {
    match state {
        CompletionState::Open => "open",
        CompletionState::PendingAnswer => "pending_answer",
        CompletionState::Resolved => "resolved",
        CompletionState::Superseded => "superseded",
    }
}

fn completion_state_from_db(value: &str) -> StoreResult<CompletionState> {
    match value {
        "open" => Ok(CompletionState::Open),
        "pending_answer" => Ok(CompletionState::PendingAnswer),
        "resolved" => Ok(CompletionState::Resolved),
        "superseded" => Ok(CompletionState::Superseded),
        _ => Err(StoreError::InvalidPersistedValue {
            field: "completion_state",
            value: value.to_string(),
        }),
    }
}

fn i64_to_u64(field: &'static str, value: i64) -> StoreResult<u64> {
    u64::try_from(value).map_err(|_| StoreError::InvalidPersistedValue {
        field,
        value: value.to_string(),
    })
}

fn u64_to_i64(field: &'static str, value: u64) -> StoreResult<i64> {
    i64::try_from(value).map_err(|_| StoreError::InvalidPersistedValue {
        field,
        value: value.to_string(),
    })
}
