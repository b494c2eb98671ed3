//! Request extractors that report malformed input as a JSON `400`.
//!
//! axum's own `Json`, `Path` and `Query` reject with plain text and, for a
//! body missing a field, `422`. These wrappers route every rejection through
//! [`ServerError::BadRequest`] so clients always get `{"error": ...}`.

use axum::extract::{FromRequest, FromRequestParts};

use crate::error::ServerError;

#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(ServerError))]
pub struct ApiJson<T>(pub T);

#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(ServerError))]
pub struct ApiPath<T>(pub T);

#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ServerError))]
pub struct ApiQuery<T>(pub T);
