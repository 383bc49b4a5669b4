// src/core/storage/schema.rs

//! Database schema initialization.

use crate::core::PalaverError;
use rusqlite::Connection;
use tracing::info;

/// Creates the messages and users tables if they do not already exist.
/// Called once at startup, before the listener is bound.
pub fn init(conn: &Connection) -> Result<(), PalaverError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            sender TEXT NOT NULL,
            sender_ip TEXT NOT NULL,
            recipient TEXT NOT NULL,
            recipient_ip TEXT NOT NULL,
            content TEXT NOT NULL,
            timestamp TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            created_at TEXT NOT NULL
        );",
    )?;
    info!("Database: 'messages' and 'users' tables checked/created.");
    Ok(())
}
