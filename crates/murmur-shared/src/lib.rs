//! Types shared by every Murmur crate: identifiers, the chat domain model,
//! realtime event payloads, timing constants and error enums.

pub mod constants;
pub mod error;
pub mod models;
pub mod protocol;
pub mod types;
