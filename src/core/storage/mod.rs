// src/core/storage/mod.rs

//! The persistence gateway: message history and user credentials in SQLite.
//!
//! Every operation opens its own short-lived connection (open, act, close),
//! so no lock is held across calls and concurrent workers only contend
//! inside SQLite itself. Blocking database work is moved off the async
//! runtime with `spawn_blocking`.
//!
//! Storage is best-effort for the chat path: a failed insert is dropped and
//! a failed history fetch replays nothing. Only the credential operations
//! during the handshake treat failure as a reason to reject the session.

mod schema;

use crate::core::{PalaverError, now_timestamp};
use rusqlite::{Connection, OptionalExtension, params};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use tokio::task;

/// Recipient marker for public broadcasts.
pub const BROADCAST_RECIPIENT: &str = "ALL";

/// Address placeholder for rows without a concrete recipient address.
pub const NO_ADDR: &str = "---";

/// One persisted message row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRow {
    pub sender: String,
    pub sender_addr: String,
    pub recipient: String,
    pub recipient_addr: String,
    pub content: String,
    pub timestamp: String,
}

/// Handle to the SQLite database. Cloning is cheap; the handle only carries
/// the database path.
#[derive(Debug, Clone)]
pub struct MessageStore {
    path: PathBuf,
}

impl MessageStore {
    /// Opens (or creates) the database at `path` and ensures the schema
    /// exists.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PalaverError> {
        let store = Self { path: path.into() };
        let conn = store.connect()?;
        schema::init(&conn)?;
        Ok(store)
    }

    fn connect(&self) -> Result<Connection, PalaverError> {
        Connection::open(&self.path).map_err(Into::into)
    }

    /// Checks whether a credential record exists for `username`.
    pub async fn user_exists(&self, username: &str) -> Result<bool, PalaverError> {
        let store = self.clone();
        let username = username.to_owned();
        task::spawn_blocking(move || store.user_exists_blocking(&username)).await?
    }

    /// Creates a credential record for a new user. Returns `false` when the
    /// username was claimed concurrently: the UNIQUE constraint on the users
    /// table decides the race and the losing insert is reported here, not as
    /// a hard error.
    pub async fn register_user(
        &self,
        username: &str,
        password: &str,
    ) -> Result<bool, PalaverError> {
        let store = self.clone();
        let username = username.to_owned();
        let password = password.to_owned();
        task::spawn_blocking(move || store.register_user_blocking(&username, &password)).await?
    }

    /// Verifies `password` against the stored hash for `username`. An
    /// unknown username verifies as `false`.
    pub async fn verify_password(
        &self,
        username: &str,
        password: &str,
    ) -> Result<bool, PalaverError> {
        let store = self.clone();
        let username = username.to_owned();
        let password = password.to_owned();
        task::spawn_blocking(move || store.verify_password_blocking(&username, &password)).await?
    }

    /// Persists one message row.
    pub async fn insert_message(&self, row: MessageRow) -> Result<(), PalaverError> {
        let store = self.clone();
        task::spawn_blocking(move || store.insert_message_blocking(&row)).await?
    }

    /// Returns the formatted history visible to `username`: public rows plus
    /// private rows the user sent or received, in insertion order.
    pub async fn history_for(&self, username: &str) -> Result<Vec<String>, PalaverError> {
        let store = self.clone();
        let username = username.to_owned();
        task::spawn_blocking(move || store.history_for_blocking(&username)).await?
    }

    // --- Blocking primitives ---

    fn user_exists_blocking(&self, username: &str) -> Result<bool, PalaverError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT 1 FROM users WHERE username = ?1 LIMIT 1")?;
        Ok(stmt.exists(params![username])?)
    }

    fn register_user_blocking(&self, username: &str, password: &str) -> Result<bool, PalaverError> {
        let conn = self.connect()?;
        let result = conn.execute(
            "INSERT INTO users (username, password_hash, created_at) VALUES (?1, ?2, ?3)",
            params![username, hash_password(password), now_timestamp()],
        );
        match result {
            Ok(_) => Ok(true),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn verify_password_blocking(&self, username: &str, password: &str) -> Result<bool, PalaverError> {
        let conn = self.connect()?;
        let stored: Option<String> = conn
            .query_row(
                "SELECT password_hash FROM users WHERE username = ?1",
                params![username],
                |row| row.get(0),
            )
            .optional()?;
        Ok(stored.is_some_and(|hash| hash == hash_password(password)))
    }

    fn insert_message_blocking(&self, row: &MessageRow) -> Result<(), PalaverError> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO messages (sender, sender_ip, recipient, recipient_ip, content, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                row.sender,
                row.sender_addr,
                row.recipient,
                row.recipient_addr,
                row.content,
                row.timestamp,
            ],
        )?;
        Ok(())
    }

    fn history_for_blocking(&self, username: &str) -> Result<Vec<String>, PalaverError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT sender, recipient, content, timestamp FROM messages
             WHERE recipient = ?1 OR sender = ?2 OR recipient = ?2
             ORDER BY id",
        )?;
        let rows = stmt.query_map(params![BROADCAST_RECIPIENT, username], |row| {
            let sender: String = row.get(0)?;
            let recipient: String = row.get(1)?;
            let content: String = row.get(2)?;
            let timestamp: String = row.get(3)?;
            Ok(if recipient == BROADCAST_RECIPIENT {
                format!("[{timestamp}] {sender}: {content}")
            } else {
                format!("[{timestamp}] {sender}(Private to {recipient}): {content}")
            })
        })?;

        let mut history = Vec::new();
        for line in rows {
            history.push(line?);
        }
        Ok(history)
    }
}

/// One-way SHA-256 hash of a password, hex encoded.
pub fn hash_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}
