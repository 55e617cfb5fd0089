use serde::Serialize;
use tokio::sync::broadcast;

use murmur_shared::models::ActiveCall;
use murmur_shared::types::{SessionId, UserId};

use crate::notifications::Notification;

const EVENT_CAPACITY: usize = 128;

/// Transient UI-facing events that do not live in the Session Store.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    TypingChanged {
        session: SessionId,
        user: UserId,
        is_typing: bool,
    },
    BuzzStarted {
        session: SessionId,
        user: UserId,
    },
    BuzzCleared {
        session: SessionId,
    },
    PresenceChanged {
        online: Vec<UserId>,
    },
    CallStateChanged {
        call: Option<ActiveCall>,
    },
    NotificationShown(Notification),
    NotificationDismissed {
        id: u64,
    },
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::TypingChanged { .. } => "typing-changed",
            ClientEvent::BuzzStarted { .. } => "buzz-started",
            ClientEvent::BuzzCleared { .. } => "buzz-cleared",
            ClientEvent::PresenceChanged { .. } => "presence-changed",
            ClientEvent::CallStateChanged { .. } => "call-state-changed",
            ClientEvent::NotificationShown(_) => "notification-shown",
            ClientEvent::NotificationDismissed { .. } => "notification-dismissed",
        }
    }
}

pub type EventSender = broadcast::Sender<ClientEvent>;

pub fn event_channel() -> EventSender {
    broadcast::channel(EVENT_CAPACITY).0
}

pub fn emit_event(events: &EventSender, event: ClientEvent) {
    let name = event.name();
    if events.send(event).is_err() {
        tracing::trace!(event = name, "No subscribers for client event");
    }
}
