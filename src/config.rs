// src/config.rs

//! Manages server configuration: loading, validation, and defaults.
//!
//! The configuration is read once at startup and shared as an immutable
//! `Arc<Config>` for the lifetime of the process; nothing mutates it after
//! the listener is bound.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

/// Configuration for TLS encryption.
///
/// When enabled, the acceptor wraps every accepted socket before the chat
/// protocol starts; the connection core only ever sees the decrypted stream.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct TlsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_cert_path")]
    pub cert_path: String,
    #[serde(default = "default_key_path")]
    pub key_path: String,
}

fn default_cert_path() -> String {
    "palaver.crt".to_string()
}
fn default_key_path() -> String {
    "palaver.key".to_string()
}

/// Configuration for the SQLite-backed message and credential store.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StorageConfig {
    /// Path of the SQLite database file. Created on first start.
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

fn default_db_path() -> String {
    "chat.db".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

/// Timing knobs for the graceful-shutdown sequence.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ShutdownConfig {
    /// How long to wait between the shutdown notice and the forced close,
    /// so connected clients get a chance to receive the notice.
    #[serde(with = "humantime_serde", default = "default_grace_period")]
    pub grace_period: Duration,
    /// How long to wait for in-flight client sessions to finish before
    /// force-cancelling them.
    #[serde(with = "humantime_serde", default = "default_drain_timeout")]
    pub drain_timeout: Duration,
}

fn default_grace_period() -> Duration {
    Duration::from_millis(500)
}
fn default_drain_timeout() -> Duration {
    Duration::from_secs(10)
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period: default_grace_period(),
            drain_timeout: default_drain_timeout(),
        }
    }
}

/// Represents the final, validated server configuration.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Size of the connection worker pool. When every slot is busy the
    /// server stops accepting new sockets until one frees up.
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,
    #[serde(default)]
    pub tls: TlsConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    5001
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_max_clients() -> usize {
    50
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            max_clients: default_max_clients(),
            tls: TlsConfig::default(),
            storage: StorageConfig::default(),
            shutdown: ShutdownConfig::default(),
        }
    }
}

impl Config {
    /// Loads and validates a configuration from a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file '{path}'"))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file '{path}'"))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.max_clients == 0 {
            bail!("max_clients must be at least 1");
        }
        if self.tls.enabled && (self.tls.cert_path.is_empty() || self.tls.key_path.is_empty()) {
            bail!("tls.cert_path and tls.key_path are required when TLS is enabled");
        }
        if self.storage.db_path.is_empty() {
            bail!("storage.db_path must not be empty");
        }
        Ok(())
    }
}
