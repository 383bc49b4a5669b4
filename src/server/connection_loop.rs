// src/server/connection_loop.rs

//! Contains the main server loop for accepting connections and handling
//! graceful shutdown.
//!
//! Admission is throttled by a semaphore sized to `max_clients`: a worker
//! slot is claimed *before* the loop waits in `accept()`, so when every slot
//! is busy the server simply stops accepting. There is no overflow queue and
//! no rejection path; pending sockets wait in the kernel backlog until a
//! session ends.

use super::context::ServerContext;
use super::stream::AnyStream;
use crate::connection::ConnectionHandler;
use crate::core::routing::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::OwnedSemaphorePermit;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// The main server loop that accepts connections and handles graceful
/// shutdown.
pub async fn run(ctx: ServerContext) {
    let mut client_tasks = JoinSet::new();

    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(stream) => stream,
        Err(e) => {
            error!("Failed to register SIGINT handler: {e}");
            return;
        }
    };
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            error!("Failed to register SIGTERM handler: {e}");
            return;
        }
    };

    'accept_loop: loop {
        tokio::select! {
            biased;

            _ = sigint.recv() => {
                info!("SIGINT received, initiating graceful shutdown.");
                break 'accept_loop;
            }
            _ = sigterm.recv() => {
                info!("SIGTERM received, initiating graceful shutdown.");
                break 'accept_loop;
            }

            Some(res) = client_tasks.join_next() => {
                if let Err(e) = res
                    && e.is_panic()
                {
                    error!("A client handler panicked: {e:?}");
                }
            }

            // A free worker slot gates the accept call itself: this is the
            // system's only backpressure mechanism.
            permit = Arc::clone(&ctx.connection_permits).acquire_owned() => {
                let Ok(permit) = permit else {
                    error!("Connection semaphore closed unexpectedly; stopping accept loop.");
                    break 'accept_loop;
                };

                tokio::select! {
                    biased;
                    _ = sigint.recv() => {
                        info!("SIGINT received, initiating graceful shutdown.");
                        break 'accept_loop;
                    }
                    _ = sigterm.recv() => {
                        info!("SIGTERM received, initiating graceful shutdown.");
                        break 'accept_loop;
                    }
                    res = ctx.listener.accept() => match res {
                        Ok((socket, addr)) => {
                            spawn_client(&ctx, &mut client_tasks, socket, addr, permit);
                        }
                        Err(e) => error!("Failed to accept connection: {}", e),
                    }
                }
            }
        }
    }

    shutdown(ctx, client_tasks).await;
}

/// Hands an accepted socket to a connection worker on the pool.
fn spawn_client(
    ctx: &ServerContext,
    client_tasks: &mut JoinSet<()>,
    socket: TcpStream,
    addr: SocketAddr,
    permit: OwnedSemaphorePermit,
) {
    info!("Accepted new connection from: {}", addr);
    ctx.state.stats.increment_total_connections();

    let state = ctx.state.clone();
    let global_shutdown_rx = ctx.shutdown_tx.subscribe();

    if let Some(acceptor) = ctx.acceptor.clone() {
        client_tasks.spawn(async move {
            // The permit rides with the worker; dropping it frees the slot.
            let _permit = permit;
            match acceptor.accept(socket).await {
                Ok(tls_stream) => {
                    debug!("TLS handshake successful for {addr}");
                    let stream = AnyStream::Tls(Box::new(tls_stream));
                    let handler = ConnectionHandler::new(stream, addr, state, global_shutdown_rx);
                    if let Err(e) = handler.run().await {
                        warn!("Connection from {} terminated: {}", addr, e);
                    }
                }
                Err(e) => {
                    warn!("TLS handshake error for {addr}: {e}");
                }
            }
        });
    } else {
        client_tasks.spawn(async move {
            let _permit = permit;
            let stream = AnyStream::Tcp(socket);
            let handler = ConnectionHandler::new(stream, addr, state, global_shutdown_rx);
            if let Err(e) = handler.run().await {
                warn!("Connection from {} terminated: {}", addr, e);
            }
        });
    }
}

/// Runs the graceful-shutdown sequence. Every step is best-effort; failures
/// are logged, never escalated.
async fn shutdown(ctx: ServerContext, mut client_tasks: JoinSet<()>) {
    let ServerContext {
        state,
        listener,
        shutdown_tx,
        ..
    } = ctx;

    // 1. Acceptance already stopped (the loop above has exited).
    // 2. Tell every connected client what is about to happen.
    info!("Shutting down. Notifying connected clients.");
    let router = Router::new(state.clone());
    let notified = router.broadcast(
        "SERVER: Server is shutting down. All connections will be closed.",
        None,
    );
    debug!("Shutdown notice queued for {notified} sessions.");

    // 3. Give the handlers a moment to flush the notice to their sockets.
    tokio::time::sleep(state.config.shutdown.grace_period).await;

    // 4. Unblock every worker; each one drops its socket on the way out.
    if shutdown_tx.send(()).is_err() {
        debug!("No client sessions were listening for the shutdown signal.");
    }

    // 5. Wait for in-flight workers, then force-cancel the stragglers.
    let drained = tokio::time::timeout(state.config.shutdown.drain_timeout, async {
        while client_tasks.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!("Timed out waiting for client sessions to finish; aborting the remainder.");
        client_tasks.shutdown().await;
    }
    info!("All client connections closed.");

    // 6. Release the listening socket.
    drop(listener);
    info!(
        "Server shutdown complete ({} connections served).",
        state.stats.total_connections()
    );
}
