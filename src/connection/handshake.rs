// src/connection/handshake.rs

//! The per-connection authentication handshake.
//!
//! The state machine is linear:
//! `AwaitingIdentityRequest -> {CheckingExisting | Registering} ->
//! AwaitingFinalUsername -> Authenticated`, with any failure terminal. The
//! caller never registers a session unless this module returned `Ok`.
//!
//! Control strings travel inside ordinary TEXT frames. A first frame that
//! does not carry a `CHECK_USER:` request is treated as a legacy
//! bare-username login and authenticates immediately — a documented
//! backward-compatibility gap, not a security feature.

use crate::core::PalaverError;
use crate::core::protocol::{Frame, FrameCodec, Inbound};
use crate::core::storage::MessageStore;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;
use tracing::{debug, warn};

pub const CHECK_USER_PREFIX: &str = "CHECK_USER:";
pub const VERIFY_PASSWORD_PREFIX: &str = "VERIFY_PASSWORD:";
pub const REGISTER_PASSWORD_PREFIX: &str = "REGISTER_PASSWORD:";
pub const USER_EXISTS: &str = "USER_EXISTS";
pub const USER_NEW: &str = "USER_NEW";
pub const PASSWORD_CORRECT: &str = "PASSWORD_CORRECT";
pub const PASSWORD_INCORRECT: &str = "PASSWORD_INCORRECT";

/// Runs the handshake to completion and returns the authenticated username.
///
/// Any IO error, premature EOF, or out-of-sequence frame aborts the
/// handshake; the connection is closed without ever touching the registry.
/// Reconnection is the client's problem.
pub async fn authenticate<S>(
    framed: &mut Framed<S, FrameCodec>,
    store: &MessageStore,
) -> Result<String, PalaverError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let first = read_text(framed).await?;

    let Some(requested) = first.strip_prefix(CHECK_USER_PREFIX) else {
        // Legacy clients send a bare username and skip the password exchange
        // entirely.
        warn!(user = %first, "legacy login without password verification");
        return Ok(first);
    };
    let requested = requested.to_string();

    if store.user_exists(&requested).await? {
        framed.send(Frame::Text(USER_EXISTS.to_string())).await?;

        let reply = read_text(framed).await?;
        let Some(password) = reply.strip_prefix(VERIFY_PASSWORD_PREFIX) else {
            return Err(PalaverError::ProtocolViolation(
                "expected VERIFY_PASSWORD after USER_EXISTS".to_string(),
            ));
        };
        if store.verify_password(&requested, password).await? {
            framed.send(Frame::Text(PASSWORD_CORRECT.to_string())).await?;
        } else {
            framed
                .send(Frame::Text(PASSWORD_INCORRECT.to_string()))
                .await?;
            return Err(PalaverError::InvalidPassword);
        }
    } else {
        framed.send(Frame::Text(USER_NEW.to_string())).await?;

        let reply = read_text(framed).await?;
        let Some(password) = reply.strip_prefix(REGISTER_PASSWORD_PREFIX) else {
            return Err(PalaverError::ProtocolViolation(
                "expected REGISTER_PASSWORD after USER_NEW".to_string(),
            ));
        };
        // Two connections may race to claim the same new name; the UNIQUE
        // constraint on the users table decides, and the loser is rejected
        // here with a storage-level error rather than a password mismatch.
        if !store.register_user(&requested, password).await? {
            return Err(PalaverError::RegistrationFailed(format!(
                "username '{requested}' was just registered by another connection"
            )));
        }
        debug!(user = %requested, "registered new user");
    }

    // The protocol carries the username a second time after the password
    // exchange. It must match the name the credentials were checked for,
    // otherwise a client could authenticate as one user and chat as another.
    let confirmed = read_text(framed).await?;
    if confirmed != requested {
        warn!(
            checked = %requested,
            confirmed = %confirmed,
            "rejecting handshake: final username differs from identity check"
        );
        return Err(PalaverError::UsernameMismatch);
    }

    Ok(confirmed)
}

/// Reads the next frame and requires it to be TEXT.
async fn read_text<S>(framed: &mut Framed<S, FrameCodec>) -> Result<String, PalaverError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match framed.next().await {
        Some(Ok(Inbound::Frame(Frame::Text(text)))) => Ok(text),
        Some(Ok(_)) => Err(PalaverError::ProtocolViolation(
            "expected a TEXT frame during the handshake".to_string(),
        )),
        Some(Err(e)) => Err(e),
        None => Err(PalaverError::Io(Arc::new(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "connection closed during the handshake",
        )))),
    }
}
