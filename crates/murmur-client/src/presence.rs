//! Presence and signaling: typing indicators, buzzes and the online roster.
//!
//! None of this state lives in the Session Store. Outgoing signals go
//! straight to the realtime channel; incoming ones are tracked here with
//! their own timers.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use murmur_realtime::RealtimeChannel;
use murmur_shared::protocol::{Buzz, PresenceChange, TypingStatus};
use murmur_shared::types::{SessionId, UserId};

use crate::clock::Clock;
use crate::error::ClientError;
use crate::events::{emit_event, ClientEvent, EventSender};

// ---------------------------------------------------------------------------
// Outgoing typing
// ---------------------------------------------------------------------------

/// Pending timers keyed by session, each tagged with the generation that
/// armed it. A timer only clears its own entry.
type Timers = Arc<Mutex<HashMap<SessionId, (u64, JoinHandle<()>)>>>;

/// Remove `session`'s timer if it is still the one armed as `generation`.
fn disarm(timers: &Timers, session: &SessionId, generation: u64) -> bool {
    let mut timers = timers.lock().unwrap_or_else(PoisonError::into_inner);
    match timers.get(session) {
        Some((armed, _)) if *armed == generation => {
            timers.remove(session);
            true
        }
        _ => false,
    }
}

/// Broadcasts `typing = true` on each keystroke and `typing = false` once
/// the user has been idle for the debounce period.
#[derive(Clone)]
pub struct TypingNotifier {
    channel: RealtimeChannel,
    me: UserId,
    debounce: Duration,
    timers: Timers,
    generation: Arc<AtomicU64>,
}

impl TypingNotifier {
    pub fn new(channel: RealtimeChannel, me: UserId, debounce: Duration) -> Self {
        Self {
            channel,
            me,
            debounce,
            timers: Arc::default(),
            generation: Arc::default(),
        }
    }

    /// Call on every change of the compose field.
    pub async fn keystroke(&self, session: &SessionId, draft: &str) {
        if draft.is_empty() {
            return;
        }

        if let Err(e) = self.channel.broadcast_typing(session, &self.me, true).await {
            warn!(session = %session, error = %e, "Typing broadcast failed");
        }

        let channel = self.channel.clone();
        let me = self.me.clone();
        let debounce = self.debounce;
        let timers = self.timers.clone();
        let sid = session.clone();
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);

        let mut armed = self.timers.lock().unwrap_or_else(PoisonError::into_inner);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            if !disarm(&timers, &sid, generation) {
                return;
            }
            if let Err(e) = channel.broadcast_typing(&sid, &me, false).await {
                warn!(session = %sid, error = %e, "Typing broadcast failed");
            }
        });
        if let Some((_, previous)) = armed.insert(session.clone(), (generation, timer)) {
            previous.abort();
        }
    }

    /// Stop typing immediately, e.g. when the draft is sent.
    pub async fn stop(&self, session: &SessionId) {
        let pending = self
            .timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session);
        if let Some((_, timer)) = pending {
            timer.abort();
            if let Err(e) = self.channel.broadcast_typing(session, &self.me, false).await {
                warn!(session = %session, error = %e, "Typing broadcast failed");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Incoming typing
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct TypingTracker {
    typing: Arc<Mutex<HashMap<SessionId, HashSet<UserId>>>>,
}

impl TypingTracker {
    /// Record a typing signal. Returns whether anything changed.
    pub fn apply(&self, status: &TypingStatus) -> bool {
        let mut typing = self.typing.lock().unwrap_or_else(PoisonError::into_inner);
        if status.is_typing {
            typing
                .entry(status.chat_id.clone())
                .or_default()
                .insert(status.user_id.clone())
        } else {
            let Some(users) = typing.get_mut(&status.chat_id) else {
                return false;
            };
            let removed = users.remove(&status.user_id);
            if users.is_empty() {
                typing.remove(&status.chat_id);
            }
            removed
        }
    }

    pub fn is_typing(&self, session: &SessionId) -> bool {
        self.typing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(session)
    }

    pub fn typing_users(&self, session: &SessionId) -> Vec<UserId> {
        let typing = self.typing.lock().unwrap_or_else(PoisonError::into_inner);
        let mut users: Vec<UserId> = typing
            .get(session)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        users.sort();
        users
    }
}

// ---------------------------------------------------------------------------
// Buzz
// ---------------------------------------------------------------------------

/// Sends buzzes, at most one per cooldown period.
#[derive(Clone)]
pub struct BuzzSender {
    channel: RealtimeChannel,
    me: UserId,
    clock: Arc<dyn Clock>,
    cooldown: Duration,
    last: Arc<Mutex<Option<Instant>>>,
}

impl BuzzSender {
    pub fn new(channel: RealtimeChannel, me: UserId, clock: Arc<dyn Clock>, cooldown: Duration) -> Self {
        Self {
            channel,
            me,
            clock,
            cooldown,
            last: Arc::default(),
        }
    }

    /// Time left before the next buzz is allowed.
    pub fn remaining(&self) -> Duration {
        self.last
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .map(|at| self.cooldown.saturating_sub(at.elapsed()))
            .unwrap_or(Duration::ZERO)
    }

    /// Broadcast a buzz. The cooldown only starts once the broadcast has
    /// gone out.
    pub async fn buzz(&self, session: &SessionId) -> Result<(), ClientError> {
        let previous = {
            let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(at) = *last {
                let elapsed = at.elapsed();
                if elapsed < self.cooldown {
                    let remaining = self.cooldown - elapsed;
                    return Err(ClientError::BuzzCooldown {
                        remaining_secs: remaining.as_secs_f64().ceil() as u64,
                    });
                }
            }
            let previous = *last;
            *last = Some(Instant::now());
            previous
        };

        debug!(session = %session, "Buzzing");
        if let Err(e) = self
            .channel
            .broadcast_buzz(session, &self.me, self.clock.now())
            .await
        {
            *self.last.lock().unwrap_or_else(PoisonError::into_inner) = previous;
            return Err(e.into());
        }
        Ok(())
    }
}

/// Transient on-screen effect for received buzzes.
#[derive(Clone)]
pub struct BuzzEffect {
    events: EventSender,
    duration: Duration,
    active: Timers,
    generation: Arc<AtomicU64>,
}

impl BuzzEffect {
    pub fn new(events: EventSender, duration: Duration) -> Self {
        Self {
            events,
            duration,
            active: Arc::default(),
            generation: Arc::default(),
        }
    }

    /// Start (or restart) the effect for the buzzed session.
    pub fn trigger(&self, buzz: &Buzz) {
        let session = buzz.chat_id.clone();
        emit_event(
            &self.events,
            ClientEvent::BuzzStarted {
                session: session.clone(),
                user: buzz.user_id.clone(),
            },
        );

        let events = self.events.clone();
        let active = self.active.clone();
        let duration = self.duration;
        let sid = session.clone();
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);

        let mut armed = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            if disarm(&active, &sid, generation) {
                emit_event(&events, ClientEvent::BuzzCleared { session: sid });
            }
        });
        if let Some((_, previous)) = armed.insert(session, (generation, timer)) {
            previous.abort();
        }
    }

    pub fn is_active(&self, session: &SessionId) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(session)
    }
}

// ---------------------------------------------------------------------------
// Roster
// ---------------------------------------------------------------------------

/// Users currently present on the channel.
#[derive(Clone, Default)]
pub struct PresenceRoster {
    online: Arc<Mutex<BTreeSet<UserId>>>,
}

impl PresenceRoster {
    /// Apply joins then leaves and return the resulting roster.
    pub fn apply(&self, change: &PresenceChange) -> Vec<UserId> {
        let mut online = self.online.lock().unwrap_or_else(PoisonError::into_inner);
        online.extend(change.joins.iter().cloned());
        for user in &change.leaves {
            online.remove(user);
        }
        online.iter().cloned().collect()
    }

    pub fn is_online(&self, user: &UserId) -> bool {
        self.online
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(user)
    }
}
