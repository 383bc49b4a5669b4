// src/core/routing.rs

//! The routing engine: broadcast, whisper, and file-relay logic operating
//! over snapshots of the client registry.
//!
//! Delivery failures are isolated per recipient. A session that disconnects
//! while a broadcast is in flight only costs its own frame; the rest of the
//! snapshot is still served.

use crate::core::protocol::Frame;
use crate::core::registry::SessionHandle;
use crate::core::state::ServerState;
use crate::core::storage::{BROADCAST_RECIPIENT, MessageRow, NO_ADDR};
use crate::core::{ChatCommand, now_timestamp};
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The next step for a connection's read loop after a frame is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextAction {
    Continue,
    ExitLoop,
}

/// Routes frames between sessions and persists what should be persisted.
#[derive(Debug, Clone)]
pub struct Router {
    state: Arc<ServerState>,
}

impl Router {
    pub fn new(state: Arc<ServerState>) -> Self {
        Self { state }
    }

    /// Delivers a TEXT frame to every registered session except `exclude`
    /// (or to all when `exclude` is `None`). Returns how many sessions the
    /// frame was queued for.
    pub fn broadcast(&self, text: &str, exclude: Option<&str>) -> usize {
        let mut delivered = 0;
        for peer in self.state.registry.snapshot() {
            if exclude.is_some_and(|name| name == peer.username) {
                continue;
            }
            if peer.deliver(Frame::Text(text.to_string())) {
                delivered += 1;
            } else {
                // The peer deregistered between the snapshot and the send.
                debug!(peer = %peer.username, "skipping broadcast to departed session");
            }
        }
        delivered
    }

    /// Sends a private message. The target gets the whisper, the sender gets
    /// a confirmation echo, and exactly one row is persisted. An unknown
    /// target produces a single error frame for the sender and nothing else.
    pub async fn whisper(&self, sender: &SessionHandle, target: &str, text: &str) {
        let Some(peer) = self.state.registry.find(target) else {
            sender.deliver(Frame::Text(format!("Error: User '{target}' not found.")));
            return;
        };

        let timestamp = now_timestamp();
        if !peer.deliver(Frame::Text(format!(
            "[{timestamp}] {} (Whisper): {text}",
            sender.username
        ))) {
            debug!(peer = %peer.username, "whisper target departed before delivery");
        }
        sender.deliver(Frame::Text(format!(
            "[{timestamp}] You whispered to {target}: {text}"
        )));

        let row = MessageRow {
            sender: sender.username.clone(),
            sender_addr: sender.addr.ip().to_string(),
            recipient: peer.username.clone(),
            recipient_addr: peer.addr.ip().to_string(),
            content: text.to_string(),
            timestamp,
        };
        if let Err(e) = self.state.store.insert_message(row).await {
            warn!("Failed to persist whisper: {e}");
        }
    }

    /// Relays a file to every other session: a TEXT notice first, then the
    /// FILE frame itself. The payload is reference-counted, not copied per
    /// recipient.
    pub fn relay_file(&self, sender: &SessionHandle, name: &str, data: Bytes) {
        for peer in self.state.registry.snapshot() {
            if peer.username == sender.username {
                continue;
            }
            if !peer.deliver(Frame::Text(format!("Incoming file from {}", sender.username))) {
                debug!(peer = %peer.username, "skipping file relay to departed session");
                continue;
            }
            if !peer.deliver(Frame::File {
                name: name.to_string(),
                data: data.clone(),
            }) {
                debug!(peer = %peer.username, "session departed mid file relay");
            }
        }
    }

    /// Dispatches one TEXT payload from `session`.
    pub async fn handle_text(&self, session: &SessionHandle, raw: &str) -> NextAction {
        match ChatCommand::parse(raw) {
            ChatCommand::ListUsers => {
                let users = self.state.registry.usernames();
                session.deliver(Frame::Text(format!(
                    "List of users currently connected : [{}]",
                    users.join(", ")
                )));
                NextAction::Continue
            }
            ChatCommand::WhisperUsage => {
                session.deliver(Frame::Text("Usage: /w <username> <message>".to_string()));
                NextAction::Continue
            }
            ChatCommand::Whisper { target, text } => {
                self.whisper(session, &target, &text).await;
                NextAction::Continue
            }
            ChatCommand::Quit => NextAction::ExitLoop,
            ChatCommand::Say(text) => {
                let timestamp = now_timestamp();
                info!("[{timestamp}] {} says: {text}", session.username);
                let row = MessageRow {
                    sender: session.username.clone(),
                    sender_addr: session.addr.ip().to_string(),
                    recipient: BROADCAST_RECIPIENT.to_string(),
                    recipient_addr: NO_ADDR.to_string(),
                    content: text.clone(),
                    timestamp: timestamp.clone(),
                };
                if let Err(e) = self.state.store.insert_message(row).await {
                    warn!("Failed to persist message: {e}");
                }
                self.broadcast(
                    &format!("[{timestamp}] {}: {text}", session.username),
                    Some(&session.username),
                );
                NextAction::Continue
            }
        }
    }

    /// Handles an accepted (within the size cap) file transfer: persists a
    /// placeholder row, then relays the payload. The payload itself is never
    /// stored.
    pub async fn handle_file(&self, session: &SessionHandle, name: String, data: Bytes) {
        info!(
            user = %session.username,
            file = %name,
            size = data.len(),
            "Relaying file transfer"
        );
        let row = MessageRow {
            sender: session.username.clone(),
            sender_addr: session.addr.ip().to_string(),
            recipient: BROADCAST_RECIPIENT.to_string(),
            recipient_addr: NO_ADDR.to_string(),
            content: format!("[File: {name}]"),
            timestamp: now_timestamp(),
        };
        if let Err(e) = self.state.store.insert_message(row).await {
            warn!("Failed to persist file placeholder: {e}");
        }
        self.relay_file(session, &name, data);
    }
}
