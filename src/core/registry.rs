// src/core/registry.rs

//! The concurrency-safe directory of live, authenticated sessions.

use crate::core::protocol::Frame;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::net::SocketAddr;
use tokio::sync::mpsc;

pub type OutboxReceiver = mpsc::UnboundedReceiver<Frame>;

/// A non-owning reference to a connected session.
///
/// The handle carries the session's identity and the sending half of its
/// outbox. The connection worker owns the receiving half and the socket, so
/// dropping handles never tears a session down; once the worker exits,
/// deliveries into the outbox simply start failing and are skipped.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub username: String,
    pub addr: SocketAddr,
    outbox: mpsc::UnboundedSender<Frame>,
}

impl SessionHandle {
    /// Creates a handle and the outbox receiver its worker will drain.
    pub fn new(username: String, addr: SocketAddr) -> (Self, OutboxReceiver) {
        let (outbox, rx) = mpsc::unbounded_channel();
        (
            Self {
                username,
                addr,
                outbox,
            },
            rx,
        )
    }

    /// Queues a frame for delivery to this session. Returns `false` when the
    /// session's worker has already gone away.
    pub fn deliver(&self, frame: Frame) -> bool {
        self.outbox.send(frame).is_ok()
    }
}

/// The shared directory of active sessions, keyed by username.
///
/// All mutation happens through the map's own internal locking; callers can
/// never observe a partial update. Iteration for routing always goes through
/// [`ClientRegistry::snapshot`], so a disconnect that races a broadcast only
/// results in a skipped delivery, never a deadlock.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: DashMap<String, SessionHandle>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a session under its username. The insert is atomic
    /// check-and-set: if the name is already live the registry is left
    /// untouched and `false` is returned.
    pub fn register(&self, handle: SessionHandle) -> bool {
        match self.clients.entry(handle.username.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(handle);
                true
            }
        }
    }

    /// Removes the session registered under `username`. Idempotent: removing
    /// an absent name is a no-op. Returns whether an entry was removed.
    pub fn deregister(&self, username: &str) -> bool {
        self.clients.remove(username).is_some()
    }

    /// Looks up a single session by username.
    pub fn find(&self, username: &str) -> Option<SessionHandle> {
        self.clients.get(username).map(|entry| entry.value().clone())
    }

    /// Returns a point-in-time copy of all active sessions for iteration.
    pub fn snapshot(&self) -> Vec<SessionHandle> {
        self.clients
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// All live usernames, sorted for stable display.
    pub fn usernames(&self) -> Vec<String> {
        let mut names: Vec<String> = self.clients.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
