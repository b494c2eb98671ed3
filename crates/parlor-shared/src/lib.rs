//! # parlor-shared
//!
//! Identity, wire-protocol and token types shared by the Parlor relay
//! server and its storage layer.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod token;
pub mod types;

pub use error::{ParlorError, TokenError};
pub use types::{Message, MessageId, ReceiptStatus, RoomId, SessionId, UserId};
