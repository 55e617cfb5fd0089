//! Message Lifecycle Controller.
//!
//! Every user action is applied to the [`SessionStore`] first and the
//! matching external write follows in the background. Persistence failures
//! become notifications; nothing is rolled back.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use murmur_shared::models::{Message, Participant, Payload, Product, Session};
use murmur_shared::types::{MessageId, SessionId, UserId};

use crate::clock::Clock;
use crate::collab::{Collaborators, MediaFile, MediaKind};
use crate::config::Timings;
use crate::error::ClientError;
use crate::expiry::ExpiryScheduler;
use crate::generation::{Summary, Turn};
use crate::notifications::Notifier;
use crate::store::{Action, ReconcileStrategy, SessionStore};

/// A message that has been appended locally. `work` finishes once the
/// background write (and bot reply, if any) has completed.
#[derive(Debug)]
pub struct Outgoing {
    pub id: MessageId,
    pub work: JoinHandle<()>,
}

#[derive(Clone)]
pub struct MessageController {
    me: UserId,
    store: SessionStore,
    collab: Collaborators,
    notifier: Notifier,
    clock: Arc<dyn Clock>,
    timings: Timings,
    expiry: ExpiryScheduler,
}

impl MessageController {
    pub fn new(
        me: UserId,
        store: SessionStore,
        collab: Collaborators,
        notifier: Notifier,
        clock: Arc<dyn Clock>,
        timings: Timings,
    ) -> Self {
        let expiry = ExpiryScheduler::new(
            store.clone(),
            collab.persistence.clone(),
            clock.clone(),
            timings.expiry_sweep,
        );
        Self {
            me,
            store,
            collab,
            notifier,
            clock,
            timings,
            expiry,
        }
    }

    pub fn expiry(&self) -> &ExpiryScheduler {
        &self.expiry
    }

    // -- Sessions -----------------------------------------------------------

    /// Replace the store's sessions with the persisted list.
    pub async fn load_sessions(&self) -> Result<usize, ClientError> {
        let sessions = match self.collab.persistence.list_sessions().await {
            Ok(sessions) => sessions,
            Err(e) => {
                warn!(error = %e, "Failed to load sessions");
                self.notifier.error("Could not load your chats");
                return Err(e.into());
            }
        };

        let expiring: Vec<SessionId> = sessions
            .iter()
            .filter(|s| s.has_pending_expiry())
            .map(|s| s.id.clone())
            .collect();
        let count = sessions.len();

        self.store.dispatch(Action::LoadSessions(sessions));
        for session in &expiring {
            self.expiry.ensure(session);
        }

        info!(count, "Sessions loaded");
        Ok(count)
    }

    pub async fn create_session(&self, participant: Participant) -> Result<SessionId, ClientError> {
        let created = self.collab.persistence.create_session(participant).await;
        self.adopt_session(created, "Could not start the conversation")
    }

    pub async fn create_group(
        &self,
        name: &str,
        members: &[UserId],
    ) -> Result<SessionId, ClientError> {
        let created = self.collab.persistence.create_group(name, members).await;
        self.adopt_session(created, "Could not create the group")
    }

    fn adopt_session(
        &self,
        created: crate::collab::PersistResult<Session>,
        failure: &str,
    ) -> Result<SessionId, ClientError> {
        match created {
            Ok(session) => {
                let id = session.id.clone();
                info!(session = %id, name = session.participant.display_name(), "Session created");
                self.store.dispatch(Action::CreateSession(session));
                Ok(id)
            }
            Err(e) => {
                warn!(error = %e, "Failed to create session");
                self.notifier.error(failure);
                Err(e.into())
            }
        }
    }

    /// Show `session` on screen; its unread counter resets.
    pub fn focus(&self, session: Option<&SessionId>) {
        self.store.dispatch(Action::Focus(session.cloned()));
        if let Some(session) = session {
            self.mark_read(session);
        }
    }

    pub fn mark_read(&self, session: &SessionId) {
        self.store.dispatch(Action::MarkRead(session.clone()));
    }

    pub fn toggle_pin(&self, session: &SessionId) -> Option<JoinHandle<()>> {
        self.store.dispatch(Action::TogglePin(session.clone()));
        let pinned = self.store.with_session(session, |s| s.pinned)?;
        let persistence = self.collab.persistence.clone();
        let notifier = self.notifier.clone();
        let session = session.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = persistence.toggle_pin(&session, pinned).await {
                warn!(session = %session, error = %e, "Failed to persist pin");
                notifier.error("Could not update the pinned state");
            }
        }))
    }

    pub fn delete_session(&self, session: &SessionId) -> JoinHandle<()> {
        self.expiry.cancel(session);
        self.store.dispatch(Action::DeleteSession(session.clone()));
        let persistence = self.collab.persistence.clone();
        let notifier = self.notifier.clone();
        let session = session.clone();
        tokio::spawn(async move {
            if let Err(e) = persistence.delete_session(&session).await {
                warn!(session = %session, error = %e, "Failed to delete session");
                notifier.error("Could not delete the conversation");
            }
        })
    }

    /// Only messages composed afterwards are affected.
    pub fn set_disappearing(&self, session: &SessionId, enabled: bool) -> JoinHandle<()> {
        self.store.dispatch(Action::SetDisappearing {
            session: session.clone(),
            enabled,
        });
        let persistence = self.collab.persistence.clone();
        let session = session.clone();
        tokio::spawn(async move {
            if let Err(e) = persistence.set_disappearing(&session, enabled).await {
                warn!(session = %session, error = %e, "Failed to persist disappearing mode");
            }
        })
    }

    pub fn set_wallpaper(&self, session: &SessionId, wallpaper: Option<String>) {
        self.store.dispatch(Action::SetWallpaper {
            session: session.clone(),
            wallpaper,
        });
    }

    pub fn clear_chat(&self, session: &SessionId) {
        self.store.dispatch(Action::ClearChat(session.clone()));
    }

    // -- Sending ------------------------------------------------------------

    /// Send a text message, optionally as a reply.
    ///
    /// In a bot session the reply is generated from the full prior transcript
    /// and delivered as a received message; the session is flagged as
    /// generating until then.
    pub fn send_text(
        &self,
        session: &SessionId,
        text: &str,
        reply_to: Option<&MessageId>,
    ) -> Result<Outgoing, ClientError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ClientError::EmptyMessage);
        }
        let snapshot = self.session(session)?;
        let message = self.compose(&snapshot, Some(text.to_string()), Payload::Text, reply_to);

        let bot = match &snapshot.participant {
            Participant::User {
                id, is_bot: true, ..
            } => Some((id.clone(), transcript(&snapshot, &self.me))),
            _ => None,
        };
        if bot.is_some() {
            self.store.dispatch(Action::SetGenerating {
                session: session.clone(),
                generating: true,
            });
        }

        let id = message.id.clone();
        let persist = self.commit(session, message);

        let this = self.clone();
        let session = session.clone();
        let text = text.to_string();
        let work = tokio::spawn(async move {
            match bot {
                Some((bot_id, history)) => {
                    let reply = this.bot_reply(&session, bot_id, history, &text);
                    futures::future::join(persist, reply).await;
                }
                None => persist.await,
            }
        });

        Ok(Outgoing { id, work })
    }

    /// Upload the file, then send it. The upload blocks the send; a failed
    /// upload sends nothing.
    pub async fn send_media(
        &self,
        session: &SessionId,
        file: MediaFile,
        caption: Option<String>,
    ) -> Result<Outgoing, ClientError> {
        self.session(session)?;

        let url = match self.collab.storage.upload(&file).await {
            Ok(url) => url,
            Err(e) => {
                warn!(session = %session, file = %file.file_name, error = %e, "Upload failed");
                self.notifier.error(format!("Could not upload {}", file.file_name));
                return Err(e.into());
            }
        };

        let size = Some(file.size());
        let payload = match file.kind {
            MediaKind::Image => Payload::Image {
                url,
                file_name: Some(file.file_name),
                file_size: size,
            },
            MediaKind::Video => Payload::Video {
                url,
                file_size: size,
                duration_secs: file.duration_secs,
            },
            MediaKind::Audio => Payload::Audio {
                url,
                duration_secs: file.duration_secs,
            },
            MediaKind::Document => Payload::Document {
                url,
                file_name: file.file_name,
                file_size: size,
            },
        };
        let caption = caption.filter(|c| !c.trim().is_empty());
        self.send_payload(session, caption, payload)
    }

    pub fn send_location(
        &self,
        session: &SessionId,
        latitude: f64,
        longitude: f64,
    ) -> Result<Outgoing, ClientError> {
        self.send_payload(
            session,
            None,
            Payload::Location {
                latitude,
                longitude,
            },
        )
    }

    pub fn send_payment(
        &self,
        session: &SessionId,
        amount: f64,
        currency: &str,
    ) -> Result<Outgoing, ClientError> {
        self.send_payload(
            session,
            None,
            Payload::Payment {
                amount,
                currency: currency.to_string(),
            },
        )
    }

    pub fn share_product(
        &self,
        session: &SessionId,
        product: &Product,
    ) -> Result<Outgoing, ClientError> {
        self.send_payload(
            session,
            None,
            Payload::Product {
                product_id: product.id.clone(),
                title: product.title.clone(),
                price: product.price,
            },
        )
    }

    fn send_payload(
        &self,
        session: &SessionId,
        text: Option<String>,
        payload: Payload,
    ) -> Result<Outgoing, ClientError> {
        let snapshot = self.session(session)?;
        let message = self.compose(&snapshot, text, payload, None);
        let id = message.id.clone();
        let work = tokio::spawn(self.commit(session, message));
        Ok(Outgoing { id, work })
    }

    fn session(&self, id: &SessionId) -> Result<Session, ClientError> {
        self.store
            .with_session(id, Session::clone)
            .ok_or_else(|| ClientError::UnknownSession(id.clone()))
    }

    fn compose(
        &self,
        session: &Session,
        text: Option<String>,
        payload: Payload,
        reply_to: Option<&MessageId>,
    ) -> Message {
        let now = self.clock.now();
        let mut message = Message::new(MessageId::new(), self.me.clone(), text, payload, now);
        if session.disappearing {
            message.expires_at = Some(now + ttl(self.timings));
        }
        message.reply_to = reply_to
            .and_then(|id| session.message(id))
            .map(Message::reply_ref);
        message
    }

    /// Append locally, schedule expiry, and return the persistence write.
    fn commit(
        &self,
        session: &SessionId,
        message: Message,
    ) -> impl std::future::Future<Output = ()> + Send + 'static {
        debug!(session = %session, msg_id = %message.id, kind = message.payload.kind().as_str(), "Sending");

        let expires = message.expires_at.is_some();
        self.store.dispatch(Action::Send {
            session: session.clone(),
            message: message.clone(),
        });
        if expires {
            self.expiry.ensure(session);
        }

        let persistence = self.collab.persistence.clone();
        let notifier = self.notifier.clone();
        let session = session.clone();
        async move {
            if let Err(e) = persistence.send_message(&session, &message).await {
                warn!(session = %session, msg_id = %message.id, error = %e, "Failed to persist message");
                notifier.error("Message could not be saved");
            }
        }
    }

    async fn bot_reply(&self, session: &SessionId, bot: UserId, history: Vec<Turn>, text: &str) {
        let reply = self.collab.generation.reply(&history, text).await;
        let message = Message::text(bot, reply, self.clock.now());

        self.store.dispatch(Action::Receive {
            session: session.clone(),
            message: message.clone(),
        });
        self.store.dispatch(Action::SetGenerating {
            session: session.clone(),
            generating: false,
        });

        // The session may have been deleted while the reply was generated.
        if self.store.with_session(session, |_| ()).is_none() {
            debug!(session = %session, "Dropping bot reply for deleted session");
            return;
        }
        if let Err(e) = self.collab.persistence.send_message(session, &message).await {
            warn!(session = %session, error = %e, "Failed to persist bot reply");
        }
    }

    // -- Incoming -----------------------------------------------------------

    /// Apply a message that arrived over the realtime channel.
    ///
    /// An expiring message starts the session's sweep. An echo of one of our
    /// own messages that raises its status has the new status persisted.
    pub fn receive(&self, session: SessionId, message: Message) {
        let upgrade = match self.store.strategy() {
            ReconcileStrategy::DedupById => self
                .store
                .with_session(&session, |s| {
                    s.message(&message.id).map(|m| m.status < message.status)
                })
                .flatten()
                .unwrap_or(false),
            ReconcileStrategy::TrustLocal => false,
        };
        let expires = message.expires_at.is_some();
        let id = message.id.clone();
        let status = message.status;

        self.store.dispatch(Action::Receive {
            session: session.clone(),
            message,
        });
        if expires && self.store.with_session(&session, |_| ()).is_some() {
            self.expiry.ensure(&session);
        }

        if upgrade {
            let persistence = self.collab.persistence.clone();
            tokio::spawn(async move {
                if let Err(e) = persistence.update_status(&id, status).await {
                    warn!(msg_id = %id, error = %e, "Failed to persist message status");
                }
            });
        }
    }

    // -- Message actions ----------------------------------------------------

    pub fn react(&self, session: &SessionId, message: &MessageId, emoji: &str) -> Option<JoinHandle<()>> {
        self.store.dispatch(Action::React {
            session: session.clone(),
            message: message.clone(),
            emoji: emoji.to_string(),
            user: self.me.clone(),
        });

        let reactions = self
            .store
            .with_session(session, |s| s.message(message).map(|m| m.reactions.clone()))??;
        let persistence = self.collab.persistence.clone();
        let message = message.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = persistence.update_reactions(&message, &reactions).await {
                warn!(msg_id = %message, error = %e, "Failed to persist reaction");
            }
        }))
    }

    pub fn toggle_star(&self, session: &SessionId, message: &MessageId) -> Option<JoinHandle<()>> {
        self.store.dispatch(Action::ToggleStar {
            session: session.clone(),
            message: message.clone(),
        });

        let starred = self
            .store
            .with_session(session, |s| s.message(message).map(|m| m.starred))??;
        let persistence = self.collab.persistence.clone();
        let message = message.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = persistence.set_starred(&message, starred).await {
                warn!(msg_id = %message, error = %e, "Failed to persist star");
            }
        }))
    }

    pub fn delete_message(&self, session: &SessionId, message: &MessageId) -> JoinHandle<()> {
        self.store.dispatch(Action::DeleteMessage {
            session: session.clone(),
            message: message.clone(),
        });
        let persistence = self.collab.persistence.clone();
        let notifier = self.notifier.clone();
        let message = message.clone();
        tokio::spawn(async move {
            if let Err(e) = persistence.delete_message(&message).await {
                warn!(msg_id = %message, error = %e, "Failed to delete message");
                notifier.error("Could not delete the message");
            }
        })
    }

    // -- Assistance ---------------------------------------------------------

    /// Three quick replies to the latest message from the other side.
    pub async fn suggestions(&self, session: &SessionId) -> Result<[String; 3], ClientError> {
        let snapshot = self.session(session)?;
        let last = snapshot
            .messages
            .iter()
            .rev()
            .filter(|m| m.sender != self.me)
            .find_map(|m| m.text.clone())
            .unwrap_or_default();
        Ok(self.collab.generation.suggestions(&last).await)
    }

    pub async fn summarize(&self, session: &SessionId) -> Result<Summary, ClientError> {
        let snapshot = self.session(session)?;
        Ok(self
            .collab
            .generation
            .summarize(&transcript(&snapshot, &self.me))
            .await)
    }
}

fn ttl(timings: Timings) -> chrono::Duration {
    chrono::Duration::milliseconds(timings.disappearing_ttl.as_millis() as i64)
}

/// Text messages of the session as (role, text) turns, oldest first.
fn transcript(session: &Session, me: &UserId) -> Vec<Turn> {
    session
        .messages
        .iter()
        .filter_map(|m| {
            let text = m.text.as_deref().filter(|t| !t.is_empty())?;
            Some(if &m.sender == me {
                Turn::user(text)
            } else {
                Turn::model(text)
            })
        })
        .collect()
}

/// Whole seconds until `message` expires, for countdown badges.
pub fn seconds_left(message: &Message, now: DateTime<Utc>) -> Option<i64> {
    message
        .expires_at
        .map(|at| ((at - now).num_milliseconds().max(0) + 999) / 1_000)
}
