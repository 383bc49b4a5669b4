// src/connection/handler.rs

//! Defines the `ConnectionHandler` which manages the full lifecycle of a
//! client connection.

use super::guard::ConnectionGuard;
use super::handshake;
use crate::core::PalaverError;
use crate::core::protocol::{Frame, FrameCodec, Inbound};
use crate::core::registry::{OutboxReceiver, SessionHandle};
use crate::core::routing::{NextAction, Router};
use crate::core::state::ServerState;
use crate::server::AnyStream;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

/// Manages the full lifecycle of a client connection: handshake,
/// registration, history replay, the framed read loop, and teardown.
///
/// The handler's task is the only writer to its socket. Frames from other
/// sessions arrive through the outbox channel and are encoded and flushed
/// here, one at a time, so concurrent senders can never interleave bytes
/// inside a frame.
pub struct ConnectionHandler {
    framed: Framed<AnyStream, FrameCodec>,
    addr: SocketAddr,
    state: Arc<ServerState>,
    router: Router,
    global_shutdown_rx: broadcast::Receiver<()>,
}

impl ConnectionHandler {
    /// Creates a new `ConnectionHandler` over an established (and, if
    /// configured, TLS-wrapped) stream.
    pub fn new(
        socket: AnyStream,
        addr: SocketAddr,
        state: Arc<ServerState>,
        global_shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            framed: Framed::new(socket, FrameCodec::new()),
            addr,
            router: Router::new(state.clone()),
            state,
            global_shutdown_rx,
        }
    }

    /// Drives the connection from handshake to teardown.
    pub async fn run(mut self) -> Result<(), PalaverError> {
        let username = handshake::authenticate(&mut self.framed, &self.state.store).await?;

        let (handle, mut outbox_rx) = SessionHandle::new(username.clone(), self.addr);
        if !self.state.registry.register(handle.clone()) {
            let _ = self
                .framed
                .send(Frame::Text(format!(
                    "SERVER: Username '{username}' is already connected."
                )))
                .await;
            return Err(PalaverError::UsernameTaken(username));
        }

        // From here on the guard owns teardown: deregister first, then the
        // leave notice, no matter how the loop below exits.
        let _guard = ConnectionGuard::new(self.state.clone(), username.clone(), self.addr);
        info!(user = %username, addr = %self.addr, "session registered");

        self.framed
            .send(Frame::Text(format!("Welcome, {username}!")))
            .await?;
        self.router.broadcast(
            &format!("SERVER: {username} has joined the chat!"),
            Some(&username),
        );
        self.replay_history(&username).await?;

        loop {
            tokio::select! {
                // Prioritize shutdown signals over other events.
                biased;
                _ = self.global_shutdown_rx.recv() => {
                    debug!("Connection handler for {} received shutdown signal.", self.addr);
                    break;
                }
                maybe_frame = outbox_rx.recv() => {
                    match maybe_frame {
                        Some(frame) => self.framed.send(frame).await?,
                        // Unreachable while the registry holds a sender, but
                        // a closed outbox means nobody can reach us anyway.
                        None => break,
                    }
                }
                result = self.framed.next() => {
                    match result {
                        Some(Ok(Inbound::Frame(Frame::Text(text)))) => {
                            if self.router.handle_text(&handle, &text).await == NextAction::ExitLoop {
                                break;
                            }
                        }
                        Some(Ok(Inbound::Frame(Frame::File { name, data }))) => {
                            self.router.handle_file(&handle, name, data).await;
                        }
                        Some(Ok(Inbound::OversizedFile { name, declared_len })) => {
                            warn!(
                                user = %username,
                                file = %name,
                                declared_len,
                                "rejecting oversized file transfer"
                            );
                            self.framed
                                .send(Frame::Text(
                                    "SERVER: File too large (max 50MB). Rejected.".to_string(),
                                ))
                                .await?;
                        }
                        Some(Err(e)) => {
                            if is_normal_disconnect(&e) {
                                debug!("Connection from {} closed by peer: {}", self.addr, e);
                            } else {
                                warn!("Connection error for {}: {}", self.addr, e);
                            }
                            break;
                        }
                        None => {
                            debug!("Connection from {} closed by peer.", self.addr);
                            break;
                        }
                    }
                }
            }
        }

        // Push out anything still queued (farewells, the shutdown notice)
        // before the socket drops. Best effort.
        self.flush_outbox(&mut outbox_rx).await;
        Ok(())
    }

    /// Replays persisted history to the freshly joined client. A failed
    /// fetch degrades to an empty history rather than blocking the login.
    async fn replay_history(&mut self, username: &str) -> Result<(), PalaverError> {
        match self.state.store.history_for(username).await {
            Ok(lines) => {
                for line in lines {
                    self.framed.send(Frame::Text(line)).await?;
                }
            }
            Err(e) => warn!(user = %username, "Failed to fetch history: {e}"),
        }
        Ok(())
    }

    /// Writes out whatever is already queued in the outbox without waiting
    /// for more.
    async fn flush_outbox(&mut self, outbox_rx: &mut OutboxReceiver) {
        while let Ok(frame) = outbox_rx.try_recv() {
            if self.framed.send(frame).await.is_err() {
                break;
            }
        }
    }
}

/// Helper function to check for non-critical disconnection errors.
fn is_normal_disconnect(e: &PalaverError) -> bool {
    matches!(e, PalaverError::Io(arc_err) if matches!(
        arc_err.kind(),
        std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionAborted
    ))
}
