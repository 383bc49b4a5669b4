// src/server/context.rs

use crate::core::state::ServerState;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{Semaphore, broadcast};
use tokio_rustls::TlsAcceptor;

/// Holds all the initialized state required to run the server's main loop.
pub struct ServerContext {
    pub state: Arc<ServerState>,
    pub listener: TcpListener,
    pub shutdown_tx: broadcast::Sender<()>,
    pub acceptor: Option<TlsAcceptor>,
    /// Admission throttle: one permit per connection worker slot. When all
    /// permits are out, the accept loop stalls until a session ends.
    pub connection_permits: Arc<Semaphore>,
}
