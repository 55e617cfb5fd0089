//! Per-session expiry sweeps for disappearing messages.
//!
//! A session gets a polling loop only while it holds at least one message
//! with an expiry. A tick that finds expired messages dispatches an
//! `ExpireSweep` and purges them from persistence; the loop exits once
//! nothing in the session is left to expire.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use murmur_shared::types::SessionId;

use crate::clock::Clock;
use crate::collab::Persistence;
use crate::store::{Action, SessionStore};

type Loops = Arc<Mutex<HashMap<SessionId, JoinHandle<()>>>>;

#[derive(Clone)]
pub struct ExpiryScheduler {
    store: SessionStore,
    persistence: Arc<dyn Persistence>,
    clock: Arc<dyn Clock>,
    period: Duration,
    loops: Loops,
}

impl ExpiryScheduler {
    pub fn new(
        store: SessionStore,
        persistence: Arc<dyn Persistence>,
        clock: Arc<dyn Clock>,
        period: Duration,
    ) -> Self {
        Self {
            store,
            persistence,
            clock,
            period,
            loops: Arc::default(),
        }
    }

    /// Start the sweep loop for `session` unless one is already running.
    pub fn ensure(&self, session: &SessionId) {
        let mut loops = self.loops.lock().unwrap_or_else(PoisonError::into_inner);
        if loops.contains_key(session) {
            return;
        }
        debug!(session = %session, "Starting expiry sweep");
        let handle = tokio::spawn(sweep_loop(
            self.store.clone(),
            self.persistence.clone(),
            self.clock.clone(),
            session.clone(),
            self.period,
            self.loops.clone(),
        ));
        loops.insert(session.clone(), handle);
    }

    pub fn cancel(&self, session: &SessionId) {
        let handle = self
            .loops
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session);
        if let Some(handle) = handle {
            handle.abort();
        }
    }

    pub fn is_running(&self, session: &SessionId) -> bool {
        self.loops
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(session)
    }
}

async fn sweep_loop(
    store: SessionStore,
    persistence: Arc<dyn Persistence>,
    clock: Arc<dyn Clock>,
    session: SessionId,
    period: Duration,
    loops: Loops,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let now = clock.now();
        let expired = store
            .with_session(&session, |s| s.messages.iter().any(|m| m.is_expired(now)))
            .unwrap_or(false);
        if expired {
            store.dispatch(Action::ExpireSweep {
                session: session.clone(),
                now,
            });
            if let Err(e) = persistence.delete_expired(&session, now).await {
                warn!(session = %session, error = %e, "Failed to purge expired messages");
            }
        }

        // Decide and deregister under the lock so a concurrent `ensure`
        // either sees this loop still running or starts a fresh one.
        let mut running = loops.lock().unwrap_or_else(PoisonError::into_inner);
        let pending = store
            .with_session(&session, |s| s.has_pending_expiry())
            .unwrap_or(false);
        if !pending {
            running.remove(&session);
            debug!(session = %session, "Expiry sweep finished");
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use murmur_shared::models::{Message, Participant, Session};
    use murmur_shared::types::UserId;

    use murmur_store::Database;

    use super::*;
    use crate::clock::TokioClock;
    use crate::persistence::LocalPersistence;

    fn scheduler(store: &SessionStore, clock: Arc<TokioClock>) -> ExpiryScheduler {
        let cache = LocalPersistence::new(Database::open_in_memory().unwrap());
        ExpiryScheduler::new(store.clone(), Arc::new(cache), clock, Duration::from_secs(1))
    }

    fn store_with_expiring(ttl_ms: i64) -> (SessionStore, SessionId, Arc<TokioClock>) {
        let clock = Arc::new(TokioClock::starting_at(Utc.timestamp_millis_opt(0).unwrap()));
        let store = SessionStore::default();
        let sid = SessionId::from("s1");
        store.dispatch(Action::LoadSessions(vec![Session::new(
            sid.clone(),
            Participant::User {
                id: UserId::new("u2"),
                name: "Ada".into(),
                avatar: None,
                is_bot: false,
            },
        )]));
        let mut msg = Message::text(UserId::new("me"), "poof", clock.now());
        msg.expires_at = Some(clock.now() + chrono::Duration::milliseconds(ttl_ms));
        store.dispatch(Action::Send {
            session: sid.clone(),
            message: msg,
        });
        (store, sid, clock)
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_removes_message_and_stops() {
        let (store, sid, clock) = store_with_expiring(10_000);
        let scheduler = scheduler(&store, clock);
        scheduler.ensure(&sid);
        scheduler.ensure(&sid);
        assert!(scheduler.is_running(&sid));

        tokio::time::sleep(Duration::from_millis(9_500)).await;
        assert_eq!(store.with_session(&sid, |s| s.messages.len()), Some(1));

        tokio::time::sleep(Duration::from_millis(1_000)).await;
        assert_eq!(store.with_session(&sid, |s| s.messages.len()), Some(0));
        assert!(!scheduler.is_running(&sid));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_the_loop() {
        let (store, sid, clock) = store_with_expiring(60_000);
        let scheduler = scheduler(&store, clock);
        scheduler.ensure(&sid);
        scheduler.cancel(&sid);
        assert!(!scheduler.is_running(&sid));

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(store.with_session(&sid, |s| s.messages.len()), Some(1));
    }
}
