// src/server/initialization.rs

//! Handles the complete server initialization process, from storage setup to
//! listener binding.

use super::context::ServerContext;
use crate::config::Config;
use crate::core::state::ServerState;
use crate::core::storage::MessageStore;
use anyhow::{Result, anyhow};
use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{Semaphore, broadcast};
use tokio_rustls::{TlsAcceptor, rustls};
use tracing::info;

/// Initializes all server components before starting the main loop.
///
/// Everything here is fatal on failure: a server that cannot open its store,
/// load its TLS material, or bind its listener has nothing useful to do.
pub async fn setup(config: Config) -> Result<ServerContext> {
    log_startup_info(&config);
    let (shutdown_tx, _) = broadcast::channel(1);

    let acceptor = setup_tls(&config)?;

    let store = MessageStore::open(&config.storage.db_path)
        .map_err(|e| anyhow!("failed to open message store '{}': {e}", config.storage.db_path))?;

    let config = Arc::new(config);
    let state = ServerState::new(config.clone(), store);
    info!("Server state initialized.");

    let listener = TcpListener::bind((config.host.as_str(), config.port))
        .await
        .map_err(|e| anyhow!("failed to bind {}:{}: {e}", config.host, config.port))?;
    info!(
        "Palaver server listening on {}:{}. Waiting for connections...",
        config.host, config.port
    );

    let connection_permits = Arc::new(Semaphore::new(config.max_clients));

    Ok(ServerContext {
        state,
        listener,
        shutdown_tx,
        acceptor,
        connection_permits,
    })
}

/// Sets up the TLS acceptor if TLS is enabled in the configuration.
fn setup_tls(config: &Config) -> Result<Option<TlsAcceptor>> {
    if config.tls.enabled {
        info!("TLS is enabled. Loading certificate and key.");
        let certs = load_certs(&config.tls.cert_path)?;
        let key = load_key(&config.tls.key_path)?;
        let server_config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)?;
        Ok(Some(TlsAcceptor::from(Arc::new(server_config))))
    } else {
        info!("TLS is disabled; serving plain TCP.");
        Ok(None)
    }
}

/// Loads TLS certificates from a PEM file.
fn load_certs(path: &str) -> Result<Vec<rustls::pki_types::CertificateDer<'static>>> {
    let cert_file = File::open(path)
        .map_err(|e| anyhow!("Failed to open certificate file '{}': {}", path, e))?;
    let mut cert_reader = BufReader::new(cert_file);
    let certs = rustls_pemfile::certs(&mut cert_reader).collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(anyhow!("No certificates found in '{}'", path));
    }
    Ok(certs)
}

/// Loads a private key from a PEM file.
fn load_key(path: &str) -> Result<rustls::pki_types::PrivateKeyDer<'static>> {
    let key_file = File::open(path)
        .map_err(|e| anyhow!("Failed to open private key file '{}': {}", path, e))?;
    let mut key_reader = BufReader::new(key_file);
    rustls_pemfile::private_key(&mut key_reader)?
        .ok_or_else(|| anyhow!("No private key found in key file '{}'", path))
}

/// Logs key configuration parameters at startup.
fn log_startup_info(config: &Config) {
    info!(
        "Server configured for at most {} concurrent clients.",
        config.max_clients
    );
    info!("Message store path: {}", config.storage.db_path);
}
