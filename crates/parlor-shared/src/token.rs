use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::error::TokenError;
use crate::types::UserId;

// Bearer credential signed by the server, presented on every connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessToken {
    pub user_id: UserId,
    pub expires_at: DateTime<Utc>,
    pub signature: Vec<u8>,
}

impl AccessToken {
    /// Encode as the opaque string handed to clients.
    pub fn encode(&self) -> String {
        // Serializing a struct of plain fields cannot fail.
        let json = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    pub fn decode(token: &str) -> Result<Self, TokenError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|_| TokenError::Malformed)?;
        serde_json::from_slice(&bytes).map_err(|_| TokenError::Malformed)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

// payload = user_id bytes || expires_at (rfc3339)
fn signing_payload(user_id: &UserId, expires_at: &DateTime<Utc>) -> Vec<u8> {
    let mut payload = Vec::with_capacity(48);
    payload.extend_from_slice(user_id.0.as_bytes());
    payload.extend_from_slice(expires_at.to_rfc3339().as_bytes());
    payload
}

pub fn issue_access_token(
    user_id: UserId,
    expires_at: DateTime<Utc>,
    signing_key: &SigningKey,
) -> AccessToken {
    let signature = signing_key.sign(&signing_payload(&user_id, &expires_at));

    AccessToken {
        user_id,
        expires_at,
        signature: signature.to_bytes().to_vec(),
    }
}

/// Check signature and expiry of an already-decoded token.
pub fn check_access_token(
    token: &AccessToken,
    verifying_key: &VerifyingKey,
    now: DateTime<Utc>,
) -> Result<UserId, TokenError> {
    if token.is_expired(now) {
        return Err(TokenError::Expired);
    }

    let signature =
        Signature::from_slice(&token.signature).map_err(|_| TokenError::BadSignature)?;

    verifying_key
        .verify(&signing_payload(&token.user_id, &token.expires_at), &signature)
        .map_err(|_| TokenError::BadSignature)?;

    Ok(token.user_id)
}

pub fn signing_key_from_seed(seed: &[u8]) -> Result<SigningKey, TokenError> {
    let seed: [u8; 32] = seed.try_into().map_err(|_| TokenError::InvalidKey)?;
    Ok(SigningKey::from_bytes(&seed))
}
