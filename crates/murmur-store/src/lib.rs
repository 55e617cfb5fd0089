//! # murmur-store
//!
//! Local SQLite cache backing the client's persistence collaborator.
//!
//! The crate exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection` and provides typed helpers for sessions, messages,
//! directory records (contacts, products, spaces, wallet transactions,
//! stories) and call logs. Structured fields such as participants, payload
//! metadata and reactions are stored as JSON text.

pub mod call_logs;
pub mod database;
pub mod directory;
pub mod messages;
pub mod migrations;
pub mod sessions;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
