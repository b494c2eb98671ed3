use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use parlor_shared::constants::{SEND_BURST_CAPACITY, SEND_WINDOW_SECS};
use parlor_store::StoreError;

use crate::backend::BackendError;

// ---------------------------------------------------------------------------
// HTTP API errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, self.to_string()),
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::Forbidden(_) => (StatusCode::FORBIDDEN, self.to_string()),
            ServerError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ServerError::Conflict(_) => (StatusCode::CONFLICT, self.to_string()),
            ServerError::Internal(detail) => {
                tracing::error!(error = %detail, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}

impl From<BackendError> for ServerError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Store(StoreError::NotFound) => {
                ServerError::NotFound("Record not found".into())
            }
            BackendError::Store(StoreError::Conflict(what)) => ServerError::Conflict(what),
            other => ServerError::Internal(other.to_string()),
        }
    }
}

impl From<JsonRejection> for ServerError {
    fn from(rejection: JsonRejection) -> Self {
        ServerError::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for ServerError {
    fn from(rejection: PathRejection) -> Self {
        ServerError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ServerError {
    fn from(rejection: QueryRejection) -> Self {
        ServerError::BadRequest(rejection.body_text())
    }
}

// ---------------------------------------------------------------------------
// Relay errors
// ---------------------------------------------------------------------------

/// Failure of a single relay action. Reported to the acting session only.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RelayError {
    /// Missing or invalid credential at connect time. Terminal.
    #[error("Unauthorized")]
    AuthFailure,

    #[error("Not a room member")]
    MembershipDenied,

    #[error(
        "Rate limit exceeded (max {} messages / {}s)",
        SEND_BURST_CAPACITY,
        SEND_WINDOW_SECS
    )]
    RateLimited,

    /// Empty content or a frame that does not parse.
    #[error("{0}")]
    Validation(String),

    /// A write to storage failed or timed out.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// The membership lookup failed or timed out.
    #[error("Membership lookup error: {0}")]
    Lookup(String),

    /// The session is not in a state that accepts this action.
    #[error("Session closed")]
    SessionClosed,
}

impl RelayError {
    /// Text delivered to the client in an `error` event. Storage details
    /// stay in the server log.
    pub fn client_message(&self) -> String {
        match self {
            RelayError::Persistence(_) => "Failed to send message".to_string(),
            RelayError::Lookup(_) => "Membership lookup failed".to_string(),
            other => other.to_string(),
        }
    }
}
