// src/core/errors.rs

//! Defines the primary error type for the entire application.

use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing all possible failures within the server.
/// Using `thiserror` allows for clean error definitions and automatic `From`
/// trait implementations.
///
/// Errors local to one session never propagate to other sessions: framing and
/// IO errors end the offending connection, auth errors end it after a reply
/// code, storage and routing errors are reported or logged and the session
/// continues.
#[derive(Error, Debug)]
pub enum PalaverError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    /// More bytes are needed before a complete frame can be decoded. Internal
    /// to the codec; the framed stream turns this into "keep reading".
    #[error("Incomplete frame in stream")]
    IncompleteData,

    #[error("Unknown frame tag {0:#04x}")]
    UnknownFrameTag(u8),

    #[error("Frame payload is not valid UTF-8")]
    InvalidUtf8,

    #[error("Frame too large: {0}")]
    FrameTooLarge(String),

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Incorrect password")]
    InvalidPassword,

    #[error("Final username does not match the name from the identity check")]
    UsernameMismatch,

    #[error("Username '{0}' is already connected")]
    UsernameTaken(String),

    #[error("Registration failed: {0}")]
    RegistrationFailed(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal Server Error: {0}")]
    Internal(String),
}

// --- From trait implementations for easy error conversion ---

// `std::io::Error` is not cloneable; wrapping it in an Arc keeps the enum
// cheap to pass around.
impl From<std::io::Error> for PalaverError {
    fn from(e: std::io::Error) -> Self {
        PalaverError::Io(Arc::new(e))
    }
}

impl From<rusqlite::Error> for PalaverError {
    fn from(e: rusqlite::Error) -> Self {
        PalaverError::Storage(e.to_string())
    }
}

impl From<std::str::Utf8Error> for PalaverError {
    fn from(_: std::str::Utf8Error) -> Self {
        PalaverError::InvalidUtf8
    }
}

impl From<std::string::FromUtf8Error> for PalaverError {
    fn from(_: std::string::FromUtf8Error) -> Self {
        PalaverError::InvalidUtf8
    }
}

impl From<tokio::task::JoinError> for PalaverError {
    fn from(e: tokio::task::JoinError) -> Self {
        PalaverError::Internal(format!("storage task failed: {e}"))
    }
}
