//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use parlor_shared::constants::{
    DEFAULT_HTTP_PORT, DEFAULT_STORE_TIMEOUT_MS, DEFAULT_TOKEN_TTL_HOURS, HTTP_RATE_LIMIT_MAX,
    HTTP_RATE_LIMIT_WINDOW_SECS,
};

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP + WebSocket server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:4000`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: `./parlor.db`
    pub database_path: PathBuf,

    /// Ed25519 seed used to sign access tokens (hex-encoded, 64 chars).
    /// Env: `TOKEN_SIGNING_KEY`
    /// Default: none, a fresh key is generated at startup and every
    /// previously issued token becomes invalid on restart.
    pub token_signing_key: Option<[u8; 32]>,

    /// Lifetime of issued access tokens.
    /// Env: `TOKEN_TTL_HOURS`
    /// Default: `24`
    pub token_ttl: chrono::Duration,

    /// Allowed CORS origins. Empty means any origin.
    /// Env: `CORS_ORIGIN` (comma-separated)
    pub cors_origins: Vec<String>,

    /// Per-IP HTTP request budget within `http_rate_window`.
    /// Env: `HTTP_RATE_LIMIT`
    /// Default: `120`
    pub http_rate_limit: usize,

    /// Window for the per-IP HTTP budget (60 s).
    pub http_rate_window: Duration,

    /// Upper bound on every storage call made by the relay.
    /// Env: `STORE_TIMEOUT_MS`
    /// Default: `5000`
    pub store_timeout: Duration,

    /// Whether `typing` events require room membership.
    /// Env: `TYPING_REQUIRES_MEMBERSHIP` (true/false)
    /// Default: `false`
    pub typing_requires_membership: bool,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("http_addr", &self.http_addr)
            .field("database_path", &self.database_path)
            .field("token_signing_key", &self.token_signing_key.map(|_| "<redacted>"))
            .field("token_ttl_hours", &self.token_ttl.num_hours())
            .field("cors_origins", &self.cors_origins)
            .field("http_rate_limit", &self.http_rate_limit)
            .field("store_timeout", &self.store_timeout)
            .field("typing_requires_membership", &self.typing_requires_membership)
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: PathBuf::from("./parlor.db"),
            token_signing_key: None,
            token_ttl: chrono::Duration::hours(DEFAULT_TOKEN_TTL_HOURS),
            cors_origins: Vec::new(),
            http_rate_limit: HTTP_RATE_LIMIT_MAX,
            http_rate_window: Duration::from_secs(HTTP_RATE_LIMIT_WINDOW_SECS),
            store_timeout: Duration::from_millis(DEFAULT_STORE_TIMEOUT_MS),
            typing_requires_membership: false,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = get("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Some(path) = get("DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }

        if let Some(hex_key) = get("TOKEN_SIGNING_KEY") {
            match parse_hex_seed(&hex_key) {
                Ok(key) => config.token_signing_key = Some(key),
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "Invalid TOKEN_SIGNING_KEY, generating an ephemeral key"
                    );
                }
            }
        }

        if let Some(val) = get("TOKEN_TTL_HOURS") {
            match val.parse::<i64>() {
                Ok(hours) if hours > 0 => config.token_ttl = chrono::Duration::hours(hours),
                _ => tracing::warn!(value = %val, "Invalid TOKEN_TTL_HOURS, using default"),
            }
        }

        if let Some(origins) = get("CORS_ORIGIN") {
            config.cors_origins = origins
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty() && o != "*")
                .collect();
        }

        if let Some(val) = get("HTTP_RATE_LIMIT") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.http_rate_limit = n,
                _ => tracing::warn!(value = %val, "Invalid HTTP_RATE_LIMIT, using default"),
            }
        }

        if let Some(val) = get("STORE_TIMEOUT_MS") {
            match val.parse::<u64>() {
                Ok(ms) if ms > 0 => config.store_timeout = Duration::from_millis(ms),
                _ => tracing::warn!(value = %val, "Invalid STORE_TIMEOUT_MS, using default"),
            }
        }

        if let Some(val) = get("TYPING_REQUIRES_MEMBERSHIP") {
            config.typing_requires_membership = val == "true" || val == "1";
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

/// Parse a 64-character hex string into a 32-byte seed.
fn parse_hex_seed(value: &str) -> Result<[u8; 32], String> {
    let value = value.trim();
    if value.len() != 64 {
        return Err(format!("expected 64 hex chars, got {}", value.len()));
    }

    let bytes = hex::decode(value).map_err(|e| format!("invalid hex: {e}"))?;
    let mut seed = [0u8; 32];
    seed.copy_from_slice(&bytes);
    Ok(seed)
}
