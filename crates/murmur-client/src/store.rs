//! Session Store: the reducer that owns every session and message.
//!
//! [`reduce`] is a pure function from a [`ChatState`] and an [`Action`] to the
//! next state. Sessions are held behind `Arc`, so a step only copies the one
//! session it touches and earlier snapshots stay valid. [`SessionStore`] is the
//! single-writer dispatch boundary the controllers and the realtime bridge
//! share; readers observe it through a `watch` channel.
//!
//! The reducer never fails. Actions naming a session or message that does
//! not exist are ignored.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::debug;

use murmur_shared::models::{ActiveCall, CallState, Message, MessageStatus, Reaction, Session};
use murmur_shared::types::{CallId, MessageId, SessionId, UserId};

/// How an inbound message whose id is already in the session is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconcileStrategy {
    /// Every inbound message is appended, including echoes of local sends.
    TrustLocal,
    /// An inbound message with a known id upgrades the stored copy instead
    /// of being appended again.
    #[default]
    DedupById,
}

impl ReconcileStrategy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "trust-local" => Some(Self::TrustLocal),
            "dedup" => Some(Self::DedupById),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChatState {
    pub sessions: Vec<Arc<Session>>,
    /// Session currently on screen. Messages received there do not count
    /// as unread.
    pub focused: Option<SessionId>,
    pub active_call: Option<ActiveCall>,
    pub strategy: ReconcileStrategy,
}

impl ChatState {
    pub fn new(strategy: ReconcileStrategy) -> Self {
        Self {
            strategy,
            ..Self::default()
        }
    }

    pub fn session(&self, id: &SessionId) -> Option<&Session> {
        self.sessions.iter().find(|s| &s.id == id).map(Arc::as_ref)
    }

    fn session_mut(&mut self, id: &SessionId) -> Option<&mut Session> {
        self.sessions
            .iter_mut()
            .find(|s| &s.id == id)
            .map(Arc::make_mut)
    }

    fn message_mut(&mut self, session: &SessionId, message: &MessageId) -> Option<&mut Message> {
        self.session_mut(session)?
            .messages
            .iter_mut()
            .find(|m| &m.id == message)
    }

    pub fn total_unread(&self) -> u32 {
        self.sessions.iter().map(|s| s.unread).sum()
    }
}

#[derive(Debug, Clone)]
pub enum Action {
    /// Replace the session list, keeping focus if the session survived.
    LoadSessions(Vec<Session>),
    /// Add a session at the top of the list.
    CreateSession(Session),
    Focus(Option<SessionId>),
    /// Optimistically append a locally composed message.
    Send { session: SessionId, message: Message },
    /// Append (or reconcile) a message that arrived from elsewhere.
    Receive { session: SessionId, message: Message },
    MarkRead(SessionId),
    /// Upgrade a message's status. Downgrades are ignored.
    UpdateStatus {
        session: SessionId,
        message: MessageId,
        status: MessageStatus,
    },
    React {
        session: SessionId,
        message: MessageId,
        emoji: String,
        user: UserId,
    },
    ToggleStar { session: SessionId, message: MessageId },
    DeleteMessage { session: SessionId, message: MessageId },
    ClearChat(SessionId),
    SetDisappearing { session: SessionId, enabled: bool },
    SetWallpaper {
        session: SessionId,
        wallpaper: Option<String>,
    },
    SetGenerating { session: SessionId, generating: bool },
    /// Drop every message of the session with `expires_at <= now`.
    ExpireSweep { session: SessionId, now: DateTime<Utc> },
    TogglePin(SessionId),
    DeleteSession(SessionId),
    /// Ignored while another call is active.
    StartCall(ActiveCall),
    CallConnected { call: CallId, at: DateTime<Utc> },
    ToggleMute,
    ToggleVideo,
    EndCall,
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::LoadSessions(_) => "load_sessions",
            Action::CreateSession(_) => "create_session",
            Action::Focus(_) => "focus",
            Action::Send { .. } => "send",
            Action::Receive { .. } => "receive",
            Action::MarkRead(_) => "mark_read",
            Action::UpdateStatus { .. } => "update_status",
            Action::React { .. } => "react",
            Action::ToggleStar { .. } => "toggle_star",
            Action::DeleteMessage { .. } => "delete_message",
            Action::ClearChat(_) => "clear_chat",
            Action::SetDisappearing { .. } => "set_disappearing",
            Action::SetWallpaper { .. } => "set_wallpaper",
            Action::SetGenerating { .. } => "set_generating",
            Action::ExpireSweep { .. } => "expire_sweep",
            Action::TogglePin(_) => "toggle_pin",
            Action::DeleteSession(_) => "delete_session",
            Action::StartCall(_) => "start_call",
            Action::CallConnected { .. } => "call_connected",
            Action::ToggleMute => "toggle_mute",
            Action::ToggleVideo => "toggle_video",
            Action::EndCall => "end_call",
        }
    }
}

/// Apply `action` to `state` and return the next state.
pub fn reduce(mut state: ChatState, action: Action) -> ChatState {
    apply(&mut state, action);
    state
}

fn apply(state: &mut ChatState, action: Action) {
    match action {
        Action::LoadSessions(sessions) => {
            state.sessions = sessions.into_iter().map(Arc::new).collect();
            if let Some(focused) = &state.focused {
                if state.session(focused).is_none() {
                    state.focused = None;
                }
            }
        }

        Action::CreateSession(session) => {
            if state.session(&session.id).is_none() {
                state.sessions.insert(0, Arc::new(session));
            }
        }

        Action::Focus(session) => state.focused = session,

        Action::Send {
            session,
            mut message,
        } => {
            let dedup = state.strategy == ReconcileStrategy::DedupById;
            if let Some(s) = state.session_mut(&session) {
                if dedup && s.message(&message.id).is_some() {
                    return;
                }
                message.status = MessageStatus::Sent;
                message.pending_ack = true;
                append(s, message);
            }
        }

        Action::Receive { session, message } => {
            let dedup = state.strategy == ReconcileStrategy::DedupById;
            let focused = state.focused.as_ref() == Some(&session);
            let Some(s) = state.session_mut(&session) else {
                return;
            };

            if dedup {
                if let Some(existing) = s.messages.iter_mut().find(|m| m.id == message.id) {
                    existing.status = existing.status.max(message.status);
                    existing.pending_ack = false;
                    return;
                }
            }

            append(s, message);
            if !focused {
                s.unread += 1;
            }
        }

        Action::MarkRead(session) => {
            if let Some(s) = state.session_mut(&session) {
                s.unread = 0;
            }
        }

        Action::UpdateStatus {
            session,
            message,
            status,
        } => {
            if let Some(m) = state.message_mut(&session, &message) {
                m.status = m.status.max(status);
            }
        }

        Action::React {
            session,
            message,
            emoji,
            user,
        } => {
            if let Some(m) = state.message_mut(&session, &message) {
                match m.reactions.iter_mut().find(|r| r.emoji == emoji) {
                    Some(reaction) => {
                        reaction.count += 1;
                        reaction.users.insert(user);
                    }
                    None => m.reactions.push(Reaction {
                        emoji,
                        count: 1,
                        users: [user].into(),
                    }),
                }
            }
        }

        Action::ToggleStar { session, message } => {
            if let Some(m) = state.message_mut(&session, &message) {
                m.starred = !m.starred;
            }
        }

        Action::DeleteMessage { session, message } => {
            if let Some(s) = state.session_mut(&session) {
                let was_last = s.messages.last().map(|m| &m.id) == Some(&message);
                s.messages.retain(|m| m.id != message);
                if was_last {
                    refresh_preview(s);
                }
            }
        }

        Action::ClearChat(session) => {
            if let Some(s) = state.session_mut(&session) {
                s.messages.clear();
                s.unread = 0;
                s.last_message = None;
                s.last_time = None;
            }
        }

        Action::SetDisappearing { session, enabled } => {
            if let Some(s) = state.session_mut(&session) {
                s.disappearing = enabled;
            }
        }

        Action::SetWallpaper { session, wallpaper } => {
            if let Some(s) = state.session_mut(&session) {
                s.wallpaper = wallpaper;
            }
        }

        Action::SetGenerating {
            session,
            generating,
        } => {
            if let Some(s) = state.session_mut(&session) {
                s.generating = generating;
            }
        }

        Action::ExpireSweep { session, now } => {
            let has_expired = state
                .session(&session)
                .is_some_and(|s| s.messages.iter().any(|m| m.is_expired(now)));
            // Leave the Arc untouched when nothing expires.
            if has_expired {
                if let Some(s) = state.session_mut(&session) {
                    let tail_expired = s.messages.last().is_some_and(|m| m.is_expired(now));
                    s.messages.retain(|m| !m.is_expired(now));
                    if tail_expired {
                        refresh_preview(s);
                    }
                }
            }
        }

        Action::TogglePin(session) => {
            if let Some(s) = state.session_mut(&session) {
                s.pinned = !s.pinned;
            }
        }

        Action::DeleteSession(session) => {
            state.sessions.retain(|s| s.id != session);
            if state.focused.as_ref() == Some(&session) {
                state.focused = None;
            }
        }

        Action::StartCall(call) => {
            if state.active_call.is_none() {
                state.active_call = Some(call);
            }
        }

        Action::CallConnected { call, at } => {
            if let Some(active) = state.active_call.as_mut() {
                if active.id == call && active.state == CallState::Ringing {
                    active.state = CallState::Connected;
                    active.started_at = Some(at);
                }
            }
        }

        Action::ToggleMute => {
            if let Some(active) = state.active_call.as_mut() {
                active.muted = !active.muted;
            }
        }

        Action::ToggleVideo => {
            if let Some(active) = state.active_call.as_mut() {
                active.video_off = !active.video_off;
            }
        }

        Action::EndCall => state.active_call = None,
    }
}

fn append(session: &mut Session, message: Message) {
    session.last_message = Some(message.preview());
    session.last_time = Some(message.created_at);
    session.messages.push(message);
}

/// Point the list preview at the newest remaining message.
fn refresh_preview(session: &mut Session) {
    session.last_message = session.messages.last().map(Message::preview);
    session.last_time = session.messages.last().map(|m| m.created_at);
}

/// Shared handle to the chat state. Cloning it shares the same state.
#[derive(Clone)]
pub struct SessionStore {
    tx: Arc<watch::Sender<ChatState>>,
}

impl SessionStore {
    pub fn new(strategy: ReconcileStrategy) -> Self {
        let (tx, _rx) = watch::channel(ChatState::new(strategy));
        Self { tx: Arc::new(tx) }
    }

    /// Apply one action synchronously and notify subscribers.
    pub fn dispatch(&self, action: Action) {
        debug!(action = action.name(), "Dispatching");
        self.tx.send_modify(|state| apply(state, action));
    }

    /// Cheap copy of the current state.
    pub fn snapshot(&self) -> ChatState {
        self.tx.borrow().clone()
    }

    /// Receiver that is marked changed after every dispatch.
    pub fn subscribe(&self) -> watch::Receiver<ChatState> {
        self.tx.subscribe()
    }

    /// Run `f` against one session without copying the state.
    pub fn with_session<T>(&self, id: &SessionId, f: impl FnOnce(&Session) -> T) -> Option<T> {
        self.tx.borrow().session(id).map(f)
    }

    pub fn strategy(&self) -> ReconcileStrategy {
        self.tx.borrow().strategy
    }

    pub fn active_call(&self) -> Option<ActiveCall> {
        self.tx.borrow().active_call.clone()
    }

    /// Case-insensitive search over message text, in session order.
    pub fn search(&self, query: &str) -> Vec<(SessionId, Message)> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        self.collect_messages(|m| {
            m.text
                .as_deref()
                .is_some_and(|t| t.to_lowercase().contains(&needle))
        })
    }

    pub fn starred_messages(&self) -> Vec<(SessionId, Message)> {
        self.collect_messages(|m| m.starred)
    }

    fn collect_messages(&self, keep: impl Fn(&Message) -> bool) -> Vec<(SessionId, Message)> {
        let state = self.tx.borrow();
        state
            .sessions
            .iter()
            .flat_map(|s| {
                s.messages
                    .iter()
                    .filter(|m| keep(m))
                    .map(|m| (s.id.clone(), m.clone()))
            })
            .collect()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(ReconcileStrategy::default())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use murmur_shared::models::{CallMedia, Participant};

    use super::*;

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    fn sid(id: &str) -> SessionId {
        SessionId::from(id)
    }

    fn dm(id: &str) -> Session {
        Session::new(
            sid(id),
            Participant::User {
                id: UserId::new(format!("peer-{id}")),
                name: id.to_uppercase(),
                avatar: None,
                is_bot: false,
            },
        )
    }

    fn state_with(ids: &[&str]) -> ChatState {
        reduce(
            ChatState::default(),
            Action::LoadSessions(ids.iter().map(|id| dm(id)).collect()),
        )
    }

    fn text(id: &str, body: &str, ms: i64) -> Message {
        let mut m = Message::text(UserId::new("me"), body, at(ms));
        m.id = MessageId::from(id);
        m
    }

    #[test]
    fn send_appends_in_order_and_updates_preview() {
        let mut state = state_with(&["s1"]);
        for i in 0..3 {
            state = reduce(
                state,
                Action::Send {
                    session: sid("s1"),
                    message: text(&format!("m{i}"), &format!("hello {i}"), i * 10),
                },
            );
        }

        let s = state.session(&sid("s1")).unwrap();
        assert_eq!(s.messages.len(), 3);
        assert!(s.messages.windows(2).all(|w| w[0].created_at <= w[1].created_at));
        assert!(s.messages.iter().all(|m| m.status == MessageStatus::Sent && m.pending_ack));
        assert_eq!(s.last_message.as_deref(), Some("hello 2"));
        assert_eq!(s.last_time, Some(at(20)));
        assert_eq!(s.unread, 0);
    }

    #[test]
    fn receive_counts_unread_unless_focused() {
        let mut state = state_with(&["s1", "s2"]);
        state = reduce(state, Action::Focus(Some(sid("s2"))));
        state = reduce(
            state,
            Action::Receive {
                session: sid("s1"),
                message: text("a", "x", 0),
            },
        );
        state = reduce(
            state,
            Action::Receive {
                session: sid("s2"),
                message: text("b", "y", 0),
            },
        );

        assert_eq!(state.session(&sid("s1")).unwrap().unread, 1);
        assert_eq!(state.session(&sid("s2")).unwrap().unread, 0);
    }

    #[test]
    fn receive_into_missing_session_is_a_no_op() {
        let state = state_with(&["s1"]);
        let before = state.sessions.clone();
        let after = reduce(
            state,
            Action::Receive {
                session: sid("gone"),
                message: text("a", "late reply", 0),
            },
        );
        assert_eq!(after.sessions, before);
    }

    #[test]
    fn dedup_merges_echo_of_local_send() {
        let mut state = state_with(&["s1"]);
        state = reduce(
            state,
            Action::Send {
                session: sid("s1"),
                message: text("m1", "hi", 0),
            },
        );
        let mut echo = text("m1", "hi", 0);
        echo.status = MessageStatus::Delivered;
        state = reduce(
            state,
            Action::Receive {
                session: sid("s1"),
                message: echo,
            },
        );

        let s = state.session(&sid("s1")).unwrap();
        assert_eq!(s.messages.len(), 1);
        assert_eq!(s.messages[0].status, MessageStatus::Delivered);
        assert!(!s.messages[0].pending_ack);
        assert_eq!(s.unread, 0);
    }

    #[test]
    fn trust_local_appends_echo_again() {
        let mut state = reduce(
            ChatState::new(ReconcileStrategy::TrustLocal),
            Action::LoadSessions(vec![dm("s1")]),
        );
        state = reduce(
            state,
            Action::Send {
                session: sid("s1"),
                message: text("m1", "hi", 0),
            },
        );
        state = reduce(
            state,
            Action::Receive {
                session: sid("s1"),
                message: text("m1", "hi", 0),
            },
        );
        assert_eq!(state.session(&sid("s1")).unwrap().messages.len(), 2);
    }

    #[test]
    fn mark_read_only_touches_one_session() {
        let mut state = state_with(&["s1", "s2"]);
        for s in ["s1", "s2"] {
            state = reduce(
                state,
                Action::Receive {
                    session: sid(s),
                    message: text(&format!("{s}-m"), "x", 0),
                },
            );
        }
        state = reduce(state, Action::MarkRead(sid("s1")));

        let s1 = state.session(&sid("s1")).unwrap();
        assert_eq!(s1.unread, 0);
        assert_eq!(s1.messages[0].status, MessageStatus::Sent);
        assert_eq!(state.session(&sid("s2")).unwrap().unread, 1);
    }

    #[test]
    fn react_increments_and_records_users() {
        let mut state = state_with(&["s1"]);
        state = reduce(
            state,
            Action::Send {
                session: sid("s1"),
                message: text("m1", "hi", 0),
            },
        );
        for user in ["u1", "u2"] {
            state = reduce(
                state,
                Action::React {
                    session: sid("s1"),
                    message: MessageId::from("m1"),
                    emoji: "❤️".into(),
                    user: UserId::new(user),
                },
            );
        }

        let reactions = &state.session(&sid("s1")).unwrap().messages[0].reactions;
        assert_eq!(reactions.len(), 1);
        assert_eq!(reactions[0].count, 2);
        assert_eq!(reactions[0].users.len(), 2);
    }

    #[test]
    fn expire_sweep_is_inclusive_and_idempotent() {
        let mut state = state_with(&["s1"]);
        let mut secret = text("m1", "secret", 0);
        secret.expires_at = Some(at(10_000));
        state = reduce(
            state,
            Action::Send {
                session: sid("s1"),
                message: secret,
            },
        );

        state = reduce(
            state,
            Action::ExpireSweep {
                session: sid("s1"),
                now: at(9_999),
            },
        );
        assert_eq!(state.session(&sid("s1")).unwrap().messages.len(), 1);

        state = reduce(
            state,
            Action::ExpireSweep {
                session: sid("s1"),
                now: at(10_000),
            },
        );
        let once = state.session(&sid("s1")).unwrap().clone();
        assert!(once.messages.is_empty());
        assert_eq!(once.last_message, None);
        assert_eq!(once.last_time, None);

        state = reduce(
            state,
            Action::ExpireSweep {
                session: sid("s1"),
                now: at(10_000),
            },
        );
        assert_eq!(state.session(&sid("s1")).unwrap(), &once);
    }

    #[test]
    fn sweeping_the_newest_message_restores_the_older_preview() {
        let mut state = state_with(&["s1"]);
        let mut secret = text("m2", "secret", 5);
        secret.expires_at = Some(at(10_000));
        for message in [text("m1", "plain", 0), secret] {
            state = reduce(
                state,
                Action::Send {
                    session: sid("s1"),
                    message,
                },
            );
        }
        assert_eq!(state.session(&sid("s1")).unwrap().last_message.as_deref(), Some("secret"));

        state = reduce(
            state,
            Action::ExpireSweep {
                session: sid("s1"),
                now: at(10_000),
            },
        );

        let s = state.session(&sid("s1")).unwrap();
        assert_eq!(s.messages.len(), 1);
        assert_eq!(s.last_message.as_deref(), Some("plain"));
        assert_eq!(s.last_time, Some(at(0)));
    }

    #[test]
    fn clear_chat_drops_preview_and_time() {
        let mut state = state_with(&["s1"]);
        state = reduce(
            state,
            Action::Receive {
                session: sid("s1"),
                message: text("m1", "hi", 40),
            },
        );
        state = reduce(state, Action::ClearChat(sid("s1")));

        let s = state.session(&sid("s1")).unwrap();
        assert!(s.messages.is_empty());
        assert_eq!(s.unread, 0);
        assert_eq!(s.last_message, None);
        assert_eq!(s.last_time, None);
    }

    #[test]
    fn untouched_sessions_share_their_allocation() {
        let before = state_with(&["s1", "s2"]);
        let after = reduce(
            before.clone(),
            Action::Send {
                session: sid("s1"),
                message: text("m1", "hi", 0),
            },
        );
        assert!(Arc::ptr_eq(&before.sessions[1], &after.sessions[1]));
        assert!(before.sessions[0].messages.is_empty());
    }

    #[test]
    fn delete_session_clears_focus_and_leaves_others() {
        let mut state = state_with(&["s1", "s2"]);
        state = reduce(state, Action::Focus(Some(sid("s1"))));
        let other = state.sessions[1].clone();
        state = reduce(state, Action::DeleteSession(sid("s1")));

        assert!(state.session(&sid("s1")).is_none());
        assert!(state.focused.is_none());
        assert_eq!(state.sessions, vec![other]);
    }

    #[test]
    fn delete_message_refreshes_preview() {
        let mut state = state_with(&["s1"]);
        for (id, body) in [("m1", "first"), ("m2", "second")] {
            state = reduce(
                state,
                Action::Send {
                    session: sid("s1"),
                    message: text(id, body, 0),
                },
            );
        }
        state = reduce(
            state,
            Action::DeleteMessage {
                session: sid("s1"),
                message: MessageId::from("m2"),
            },
        );
        assert_eq!(
            state.session(&sid("s1")).unwrap().last_message.as_deref(),
            Some("first")
        );
    }

    #[test]
    fn status_never_downgrades() {
        let mut state = state_with(&["s1"]);
        state = reduce(
            state,
            Action::Send {
                session: sid("s1"),
                message: text("m1", "hi", 0),
            },
        );
        for status in [MessageStatus::Read, MessageStatus::Delivered] {
            state = reduce(
                state,
                Action::UpdateStatus {
                    session: sid("s1"),
                    message: MessageId::from("m1"),
                    status,
                },
            );
        }
        assert_eq!(
            state.session(&sid("s1")).unwrap().messages[0].status,
            MessageStatus::Read
        );
    }

    #[test]
    fn second_call_does_not_replace_the_first() {
        let first = ActiveCall::ringing(UserId::new("u1"), "Ada".into(), CallMedia::Audio);
        let second = ActiveCall::ringing(UserId::new("u2"), "Bob".into(), CallMedia::Video);
        let mut state = reduce(ChatState::default(), Action::StartCall(first.clone()));
        state = reduce(state, Action::StartCall(second));
        assert_eq!(state.active_call, Some(first.clone()));

        state = reduce(
            state,
            Action::CallConnected {
                call: first.id,
                at: at(3_000),
            },
        );
        let call = state.active_call.clone().unwrap();
        assert_eq!(call.state, CallState::Connected);
        assert_eq!(call.started_at, Some(at(3_000)));

        state = reduce(state, Action::EndCall);
        assert!(state.active_call.is_none());
    }

    #[test]
    fn store_search_and_starred() {
        let store = SessionStore::default();
        store.dispatch(Action::LoadSessions(vec![dm("s1"), dm("s2")]));
        store.dispatch(Action::Send {
            session: sid("s1"),
            message: text("m1", "Dinner at eight?", 0),
        });
        store.dispatch(Action::Send {
            session: sid("s2"),
            message: text("m2", "see you at DINNER", 0),
        });
        store.dispatch(Action::ToggleStar {
            session: sid("s2"),
            message: MessageId::from("m2"),
        });

        assert_eq!(store.search("dinner").len(), 2);
        assert!(store.search("   ").is_empty());
        let starred = store.starred_messages();
        assert_eq!(starred.len(), 1);
        assert_eq!(starred[0].0, sid("s2"));
    }

    #[test]
    fn parse_reconcile_strategy() {
        assert_eq!(ReconcileStrategy::parse("dedup"), Some(ReconcileStrategy::DedupById));
        assert_eq!(
            ReconcileStrategy::parse("trust-local"),
            Some(ReconcileStrategy::TrustLocal)
        );
        assert_eq!(ReconcileStrategy::parse("maybe"), None);
    }
}
