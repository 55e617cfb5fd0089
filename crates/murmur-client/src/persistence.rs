//! [`Persistence`] backed by the local SQLite cache.
//!
//! `rusqlite` is blocking, so every call runs on the blocking pool behind a
//! shared mutex.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use murmur_shared::models::{
    CallLog, Contact, Message, MessageStatus, Participant, Product, Reaction, Session, Space,
    Story, WalletTransaction,
};
use murmur_shared::types::{MessageId, SessionId, UserId};
use murmur_store::{Database, StoreError};

use crate::collab::{PersistResult, Persistence};
use crate::error::PersistenceError;

#[derive(Clone)]
pub struct LocalPersistence {
    db: Arc<Mutex<Database>>,
}

impl LocalPersistence {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    /// Open the cache at `path`, or in the platform data directory.
    pub fn open(path: Option<&Path>) -> Result<Self, StoreError> {
        let db = match path {
            Some(path) => Database::open_at(path)?,
            None => Database::new()?,
        };
        Ok(Self::new(db))
    }

    async fn with_db<T, F>(&self, f: F) -> PersistResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> murmur_store::Result<T> + Send + 'static,
    {
        let db = self.db.clone();
        let result = tokio::task::spawn_blocking(move || {
            let guard = db.lock().unwrap_or_else(PoisonError::into_inner);
            f(&guard)
        })
        .await
        .map_err(|e| PersistenceError::Task(e.to_string()))?;
        Ok(result?)
    }
}

#[async_trait]
impl Persistence for LocalPersistence {
    async fn list_sessions(&self) -> PersistResult<Vec<Session>> {
        self.with_db(|db| db.list_sessions()).await
    }

    async fn send_message(&self, session: &SessionId, message: &Message) -> PersistResult<()> {
        let session = session.clone();
        let message = message.clone();
        let inserted = self
            .with_db(move |db| db.insert_message(&session, &message))
            .await?;
        if !inserted {
            tracing::debug!("Message already cached");
        }
        Ok(())
    }

    async fn create_session(&self, participant: Participant) -> PersistResult<Session> {
        let session = Session::new(SessionId::new(), participant);
        let row = session.clone();
        self.with_db(move |db| db.insert_session(&row)).await?;
        Ok(session)
    }

    async fn create_group(&self, name: &str, members: &[UserId]) -> PersistResult<Session> {
        self.create_session(Participant::Group {
            name: name.to_string(),
            members: members.to_vec(),
            avatar: None,
        })
        .await
    }

    async fn toggle_pin(&self, session: &SessionId, pinned: bool) -> PersistResult<()> {
        let session = session.clone();
        self.with_db(move |db| db.set_session_pinned(&session, pinned))
            .await
            .map(drop)
    }

    async fn delete_session(&self, session: &SessionId) -> PersistResult<()> {
        let session = session.clone();
        self.with_db(move |db| db.delete_session(&session))
            .await
            .map(drop)
    }

    async fn set_disappearing(&self, session: &SessionId, enabled: bool) -> PersistResult<()> {
        let session = session.clone();
        self.with_db(move |db| db.set_session_disappearing(&session, enabled))
            .await
            .map(drop)
    }

    async fn update_reactions(
        &self,
        message: &MessageId,
        reactions: &[Reaction],
    ) -> PersistResult<()> {
        let message = message.clone();
        let reactions = reactions.to_vec();
        self.with_db(move |db| db.update_message_reactions(&message, &reactions))
            .await
            .map(drop)
    }

    async fn set_starred(&self, message: &MessageId, starred: bool) -> PersistResult<()> {
        let message = message.clone();
        self.with_db(move |db| db.set_message_starred(&message, starred))
            .await
            .map(drop)
    }

    async fn delete_message(&self, message: &MessageId) -> PersistResult<()> {
        let message = message.clone();
        self.with_db(move |db| db.delete_message(&message))
            .await
            .map(drop)
    }

    async fn delete_expired(&self, session: &SessionId, now: DateTime<Utc>) -> PersistResult<()> {
        let session = session.clone();
        let removed = self
            .with_db(move |db| db.delete_expired_messages(&session, now))
            .await?;
        tracing::debug!(removed, "Expired messages purged from cache");
        Ok(())
    }

    async fn update_status(&self, message: &MessageId, status: MessageStatus) -> PersistResult<()> {
        let message = message.clone();
        self.with_db(move |db| db.update_message_status(&message, status))
            .await
            .map(drop)
    }

    async fn list_contacts(&self) -> PersistResult<Vec<Contact>> {
        self.with_db(|db| db.list_contacts()).await
    }

    async fn create_contact(&self, contact: &Contact) -> PersistResult<()> {
        let contact = contact.clone();
        self.with_db(move |db| db.upsert_contact(&contact)).await
    }

    async fn list_products(&self) -> PersistResult<Vec<Product>> {
        self.with_db(|db| db.list_products()).await
    }

    async fn create_product(&self, product: &Product) -> PersistResult<()> {
        let product = product.clone();
        self.with_db(move |db| db.insert_product(&product)).await
    }

    async fn list_spaces(&self) -> PersistResult<Vec<Space>> {
        self.with_db(|db| db.list_spaces()).await
    }

    async fn create_space(&self, space: &Space) -> PersistResult<()> {
        let space = space.clone();
        self.with_db(move |db| db.insert_space(&space)).await
    }

    async fn list_transactions(&self) -> PersistResult<Vec<WalletTransaction>> {
        self.with_db(|db| db.list_transactions()).await
    }

    async fn create_transaction(&self, tx: &WalletTransaction) -> PersistResult<()> {
        let tx = tx.clone();
        self.with_db(move |db| db.insert_transaction(&tx)).await
    }

    async fn list_stories(&self) -> PersistResult<Vec<Story>> {
        let now = Utc::now();
        self.with_db(move |db| db.list_active_stories(now)).await
    }

    async fn create_story(&self, story: &Story) -> PersistResult<()> {
        let story = story.clone();
        self.with_db(move |db| db.insert_story(&story)).await
    }

    async fn list_call_logs(&self) -> PersistResult<Vec<CallLog>> {
        self.with_db(|db| db.list_call_logs()).await
    }

    async fn create_call_log(&self, log: &CallLog) -> PersistResult<()> {
        let log = log.clone();
        self.with_db(move |db| db.insert_call_log(&log)).await
    }
}
