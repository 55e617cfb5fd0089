//! Toast notifications for swallowed failures.
//!
//! Notifications are queued and shown one at a time, oldest first, each for
//! a fixed display time. A background task drives the queue and reports
//! every show/dismiss as a [`ClientEvent`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

use crate::events::{emit_event, ClientEvent, EventSender};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub id: u64,
    pub level: NotificationLevel,
    pub text: String,
}

/// Cloneable producer side of the notification queue.
#[derive(Clone)]
pub struct Notifier {
    tx: mpsc::UnboundedSender<Notification>,
    next_id: Arc<AtomicU64>,
    current: Arc<Mutex<Option<Notification>>>,
}

impl Notifier {
    /// Start the display task. It runs until every `Notifier` clone is dropped.
    pub fn spawn(events: EventSender, display: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let current = Arc::new(Mutex::new(None));
        tokio::spawn(display_loop(rx, events, display, current.clone()));
        Self {
            tx,
            next_id: Arc::new(AtomicU64::new(1)),
            current,
        }
    }

    pub fn notify(&self, level: NotificationLevel, text: impl Into<String>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let notification = Notification {
            id,
            level,
            text: text.into(),
        };
        if self.tx.send(notification).is_err() {
            debug!(id, "Notification display task is gone");
        }
        id
    }

    pub fn error(&self, text: impl Into<String>) -> u64 {
        self.notify(NotificationLevel::Error, text)
    }

    pub fn warning(&self, text: impl Into<String>) -> u64 {
        self.notify(NotificationLevel::Warning, text)
    }

    /// The notification on screen right now.
    pub fn current(&self) -> Option<Notification> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

async fn display_loop(
    mut rx: mpsc::UnboundedReceiver<Notification>,
    events: EventSender,
    display: Duration,
    current: Arc<Mutex<Option<Notification>>>,
) {
    while let Some(notification) = rx.recv().await {
        let id = notification.id;
        *current.lock().unwrap_or_else(PoisonError::into_inner) = Some(notification.clone());
        emit_event(&events, ClientEvent::NotificationShown(notification));

        tokio::time::sleep(display).await;

        *current.lock().unwrap_or_else(PoisonError::into_inner) = None;
        emit_event(&events, ClientEvent::NotificationDismissed { id });
    }
}
