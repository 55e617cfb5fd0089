use thiserror::Error;

/// Errors raised while decoding realtime payloads.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Unknown event: {0}")]
    UnknownEvent(String),

    #[error("Malformed payload for {event}: {reason}")]
    MalformedPayload { event: String, reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
