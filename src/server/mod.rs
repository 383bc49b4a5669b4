// src/server/mod.rs

use crate::config::Config;
use anyhow::Result;

mod connection_loop;
mod context;
mod initialization;
mod stream;

pub use stream::AnyStream;

/// The main server startup function, orchestrating all setup phases.
pub async fn run(config: Config) -> Result<()> {
    // 1. Initialize server state, storage schema, listener, and TLS.
    let server_context = initialization::setup(config).await?;

    // 2. Start the main connection acceptance loop. This function will run
    //    until shutdown.
    connection_loop::run(server_context).await;

    Ok(())
}
