//! # parlor-server
//!
//! Real-time chat relay for Parlor.
//!
//! This binary provides:
//! - **WebSocket relay** (`/ws`) that authenticates each connection, tracks
//!   presence per room and fans out messages, typing indicators and
//!   online/offline status
//! - **REST API** (axum) for accounts, rooms, message history and receipts
//! - **Per-IP rate limiting** on HTTP and per-sender-per-room admission
//!   control on messages

mod api;
mod auth;
mod backend;
mod config;
mod error;
mod extract;
mod hub;
mod presence;
mod rate_limit;
mod session;
mod ws;

#[cfg(test)]
mod test_support;

use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;

use parlor_shared::token::signing_key_from_seed;
use parlor_store::Database;

use crate::api::AppState;
use crate::auth::TokenAuthority;
use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,parlor_server=debug")),
        )
        .init();

    info!("Starting Parlor relay v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let db = Database::open_at(&config.database_path)?;
    info!(path = %config.database_path.display(), "Database ready");

    let tokens = match config.token_signing_key {
        Some(seed) => TokenAuthority::new(signing_key_from_seed(&seed)?, config.token_ttl),
        None => {
            tracing::warn!("TOKEN_SIGNING_KEY not set, tokens will not survive a restart");
            TokenAuthority::ephemeral(config.token_ttl)
        }
    };

    let http_addr = config.http_addr;
    let app_state = AppState::new(config, db, tokens);

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Message rate-limit buckets (every minute)
    let hub = app_state.hub.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            hub.purge_idle_buckets().await;
        }
    });

    // Per-IP HTTP buckets (every 5 minutes)
    let limiter = app_state.http_limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            limiter.purge_stale().await;
        }
    });

    // Verified-token cache (every 10 minutes)
    let tokens = app_state.tokens.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(600));
        loop {
            interval.tick().await;
            tokens.purge_expired().await;
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP + WebSocket server until shutdown
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
