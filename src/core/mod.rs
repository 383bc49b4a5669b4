// src/core/mod.rs

//! The central module containing the core logic and data structures of Palaver.

pub mod commands;
pub mod errors;
pub mod protocol;
pub mod registry;
pub mod routing;
pub mod state;
pub mod storage;

pub use commands::ChatCommand;
pub use errors::PalaverError;

/// Timestamp format used for chat lines and persisted rows.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Formats the current local time with [`TIMESTAMP_FORMAT`].
pub(crate) fn now_timestamp() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}
