//! # parlor-store
//!
//! SQLite persistence for the Parlor relay: accounts, rooms, room
//! membership, messages and delivery receipts.
//!
//! The crate exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection` and provides typed CRUD helpers for every domain
//! model. Async callers are expected to run these helpers on a blocking
//! thread.

pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod receipts;
pub mod rooms;
pub mod users;

mod convert;
mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
