//! Narrow interfaces to the external collaborators: the persistence backend
//! and object storage. Generation lives in [`crate::generation`].

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use murmur_shared::models::{
    CallLog, Contact, Message, MessageStatus, Participant, Product, Reaction, Session, Space,
    Story, WalletTransaction,
};
use murmur_shared::types::{MessageId, SessionId, UserId};

use crate::error::{PersistenceError, StorageError};
use crate::generation::FallbackGeneration;

pub type PersistResult<T> = Result<T, PersistenceError>;

#[async_trait]
pub trait Persistence: Send + Sync {
    async fn list_sessions(&self) -> PersistResult<Vec<Session>>;

    async fn send_message(&self, session: &SessionId, message: &Message) -> PersistResult<()>;

    async fn create_session(&self, participant: Participant) -> PersistResult<Session>;

    async fn create_group(&self, name: &str, members: &[UserId]) -> PersistResult<Session>;

    async fn toggle_pin(&self, session: &SessionId, pinned: bool) -> PersistResult<()>;

    // Mutations a backend may not track. The defaults accept and drop them.

    async fn delete_session(&self, _session: &SessionId) -> PersistResult<()> {
        Ok(())
    }

    async fn set_disappearing(&self, _session: &SessionId, _enabled: bool) -> PersistResult<()> {
        Ok(())
    }

    async fn update_reactions(
        &self,
        _message: &MessageId,
        _reactions: &[Reaction],
    ) -> PersistResult<()> {
        Ok(())
    }

    async fn set_starred(&self, _message: &MessageId, _starred: bool) -> PersistResult<()> {
        Ok(())
    }

    async fn delete_message(&self, _message: &MessageId) -> PersistResult<()> {
        Ok(())
    }

    /// Drop the session's messages that expired at or before `now`.
    async fn delete_expired(&self, _session: &SessionId, _now: DateTime<Utc>) -> PersistResult<()> {
        Ok(())
    }

    async fn update_status(&self, _message: &MessageId, _status: MessageStatus) -> PersistResult<()> {
        Ok(())
    }

    // -- Directory and catalog --

    async fn list_contacts(&self) -> PersistResult<Vec<Contact>>;
    async fn create_contact(&self, contact: &Contact) -> PersistResult<()>;

    async fn list_products(&self) -> PersistResult<Vec<Product>>;
    async fn create_product(&self, product: &Product) -> PersistResult<()>;

    async fn list_spaces(&self) -> PersistResult<Vec<Space>>;
    async fn create_space(&self, space: &Space) -> PersistResult<()>;

    async fn list_transactions(&self) -> PersistResult<Vec<WalletTransaction>>;
    async fn create_transaction(&self, tx: &WalletTransaction) -> PersistResult<()>;

    /// Stories that have not expired yet.
    async fn list_stories(&self) -> PersistResult<Vec<Story>>;
    async fn create_story(&self, story: &Story) -> PersistResult<()>;

    async fn list_call_logs(&self) -> PersistResult<Vec<CallLog>>;
    async fn create_call_log(&self, log: &CallLog) -> PersistResult<()>;
}

/// What kind of attachment an upload is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Document,
}

/// A local file about to be sent as an attachment.
#[derive(Debug, Clone)]
pub struct MediaFile {
    pub kind: MediaKind,
    pub file_name: String,
    pub content_type: String,
    pub bytes: Bytes,
    /// Playback length for audio and video.
    pub duration_secs: Option<u32>,
}

impl MediaFile {
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Store the file and return a durable public URL for it.
    async fn upload(&self, file: &MediaFile) -> Result<String, StorageError>;
}

/// The collaborators the message controller talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub persistence: Arc<dyn Persistence>,
    pub storage: Arc<dyn ObjectStorage>,
    pub generation: FallbackGeneration,
}
