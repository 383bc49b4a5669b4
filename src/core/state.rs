// src/core/state.rs

//! The shared server state handed to every connection worker.

use crate::config::Config;
use crate::core::registry::ClientRegistry;
use crate::core::storage::MessageStore;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters exposed for logging and the `/list`-style introspection paths.
#[derive(Debug, Default)]
pub struct ServerStats {
    total_connections: AtomicU64,
}

impl ServerStats {
    pub fn increment_total_connections(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total_connections(&self) -> u64 {
        self.total_connections.load(Ordering::Relaxed)
    }
}

/// Holds everything shared across connection workers: the immutable
/// configuration, the live-session registry, and the persistence gateway.
#[derive(Debug)]
pub struct ServerState {
    pub config: Arc<Config>,
    pub registry: ClientRegistry,
    pub store: MessageStore,
    pub stats: ServerStats,
}

impl ServerState {
    pub fn new(config: Arc<Config>, store: MessageStore) -> Arc<Self> {
        Arc::new(Self {
            config,
            registry: ClientRegistry::new(),
            store,
            stats: ServerStats::default(),
        })
    }
}
