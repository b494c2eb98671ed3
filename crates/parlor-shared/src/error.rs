use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParlorError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TokenError {
    #[error("Malformed token encoding")]
    Malformed,

    #[error("Invalid token signature")]
    BadSignature,

    #[error("Invalid signing key")]
    InvalidKey,

    #[error("Token expired")]
    Expired,
}
