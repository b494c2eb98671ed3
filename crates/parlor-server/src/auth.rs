//! Access-token issuing, verification and caching, plus password hashing.
//!
//! Tokens are Ed25519-signed by this server (see
//! [`parlor_shared::token`]). Successful verifications are cached until the
//! token expires so that reconnect storms do not re-check signatures.

use std::collections::HashMap;
use std::sync::Arc;

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use tokio::sync::RwLock;
use tracing::debug;

use parlor_shared::token::{check_access_token, issue_access_token, AccessToken};
use parlor_shared::{TokenError, UserId};

use crate::api::AppState;
use crate::error::ServerError;

// ---------------------------------------------------------------------------
// Cached entry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct CachedToken {
    user_id: UserId,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        Utc::now() < self.expires_at
    }
}

// ---------------------------------------------------------------------------
// Token authority
// ---------------------------------------------------------------------------

/// Issues and verifies access tokens for this server instance.
#[derive(Clone)]
pub struct TokenAuthority {
    signing_key: Arc<SigningKey>,
    ttl: chrono::Duration,
    /// Cache: encoded token -> verified identity.
    cache: Arc<RwLock<HashMap<String, CachedToken>>>,
}

impl TokenAuthority {
    pub fn new(signing_key: SigningKey, ttl: chrono::Duration) -> Self {
        Self {
            signing_key: Arc::new(signing_key),
            ttl,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Authority with a freshly generated key. Tokens do not survive a
    /// restart.
    pub fn ephemeral(ttl: chrono::Duration) -> Self {
        Self::new(SigningKey::generate(&mut OsRng), ttl)
    }

    /// Issue an encoded token for `user_id`.
    pub fn issue(&self, user_id: UserId) -> String {
        issue_access_token(user_id, Utc::now() + self.ttl, &self.signing_key).encode()
    }

    /// Verify an encoded token and return the identity it carries.
    pub async fn verify(&self, token: &str) -> Result<UserId, TokenError> {
        {
            let cache = self.cache.read().await;
            if let Some(entry) = cache.get(token) {
                if entry.is_fresh() {
                    return Ok(entry.user_id);
                }
            }
        }

        let decoded = AccessToken::decode(token)?;
        let user_id = check_access_token(&decoded, &self.signing_key.verifying_key(), Utc::now())?;

        self.cache.write().await.insert(
            token.to_string(),
            CachedToken {
                user_id,
                expires_at: decoded.expires_at,
            },
        );

        Ok(user_id)
    }

    /// Evict expired entries from the cache.
    pub async fn purge_expired(&self) {
        let mut cache = self.cache.write().await;
        let before = cache.len();
        cache.retain(|_, entry| entry.is_fresh());
        let removed = before - cache.len();
        if removed > 0 {
            debug!(removed, "Purged expired token cache entries");
        }
    }
}

// ---------------------------------------------------------------------------
// Passwords
// ---------------------------------------------------------------------------

pub fn hash_password(password: &str) -> Result<String, ServerError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ServerError::Internal(format!("password hashing failed: {e}")))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

// ---------------------------------------------------------------------------
// Request extraction
// ---------------------------------------------------------------------------

/// The token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// The authenticated caller of a REST endpoint.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub UserId);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)
            .ok_or_else(|| ServerError::Unauthorized("Missing token".into()))?;

        state
            .tokens
            .verify(token)
            .await
            .map(AuthUser)
            .map_err(|_| ServerError::Unauthorized("Invalid token".into()))
    }
}
