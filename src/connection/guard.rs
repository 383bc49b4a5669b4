// src/connection/guard.rs

//! Defines `ConnectionGuard`, an RAII guard for session teardown.

use crate::core::routing::Router;
use crate::core::state::ServerState;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info};

/// An RAII guard that deregisters the session and notifies the remaining
/// peers when the connection handler's scope is exited, however it exits.
///
/// Created only after a successful handshake and registration. Teardown runs
/// exactly once: deregistration is keyed by username and idempotent, so a
/// second drop of a stale guard (or a race with shutdown) is a no-op.
pub struct ConnectionGuard {
    state: Arc<ServerState>,
    username: String,
    addr: SocketAddr,
}

impl ConnectionGuard {
    pub(crate) fn new(state: Arc<ServerState>, username: String, addr: SocketAddr) -> Self {
        Self {
            state,
            username,
            addr,
        }
    }
}

impl Drop for ConnectionGuard {
    /// Removes the session from the registry, then announces the departure.
    /// The removal happens first so no peer can route to the session while
    /// its socket is closing.
    fn drop(&mut self) {
        if !self.state.registry.deregister(&self.username) {
            debug!(
                "Session for {} was already deregistered upon cleanup.",
                self.username
            );
            return;
        }

        let router = Router::new(self.state.clone());
        router.broadcast(
            &format!("SERVER: {} has left the chat!", self.username),
            None,
        );
        info!(user = %self.username, addr = %self.addr, "has disconnected");
    }
}
