use thiserror::Error;

use murmur_realtime::RealtimeError;
use murmur_shared::types::SessionId;
use murmur_store::StoreError;

/// Errors surfaced by the controllers to their caller.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Unknown session: {0}")]
    UnknownSession(SessionId),

    #[error("Message is empty")]
    EmptyMessage,

    #[error("Buzz is cooling down ({remaining_secs}s left)")]
    BuzzCooldown { remaining_secs: u64 },

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Realtime error: {0}")]
    Realtime(#[from] RealtimeError),
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Local cache error: {0}")]
    Store(#[from] StoreError),

    #[error("Persistence task failed: {0}")]
    Task(String),

    #[error("Backend rejected the request: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Upload rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Generation request failed with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Malformed generation response: {0}")]
    Malformed(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum CallError {
    #[error("A call is already in progress")]
    AlreadyActive,

    #[error("Media device unavailable: {0}")]
    Device(String),
}
