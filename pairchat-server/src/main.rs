//! `PairChat` server: presence, delivery receipts and the message API.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:5001
//! cargo run --bin pairchat-server
//!
//! # Run on custom address with a config file seeding the user directory
//! cargo run --bin pairchat-server -- --bind 127.0.0.1:8080 --config users.toml
//! ```

use std::sync::Arc;

use clap::Parser;
use pairchat_server::config::{ServerCliArgs, ServerConfig};
use pairchat_server::server;
use pairchat_server::state::ServerState;
use pairchat_server::store::InMemoryStore;

#[tokio::main]
async fn main() {
    let cli = ServerCliArgs::parse();

    let config = match ServerConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    if config.users.is_empty() {
        tracing::warn!("no users configured; every request will be rejected");
    }
    tracing::info!(addr = %config.bind_addr, users = config.users.len(), "starting pairchat server");

    let state = Arc::new(ServerState::new(Arc::new(InMemoryStore::new()), &config));

    match server::start_server_with_state(&config.bind_addr, Arc::clone(&state)).await {
        Ok((bound_addr, mut handle)) => {
            tracing::info!(addr = %bound_addr, "server listening");
            tokio::select! {
                result = &mut handle => {
                    if let Err(e) = result {
                        tracing::error!(error = %e, "server task failed");
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("shutting down");
                    state.close_all_sessions().await;
                    handle.abort();
                }
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start server");
            std::process::exit(1);
        }
    }
}
