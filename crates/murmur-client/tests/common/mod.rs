#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;

use murmur_client::calls::{MediaDevices, MediaTrack, TrackKind};
use murmur_client::clock::TokioClock;
use murmur_client::collab::{Collaborators, MediaFile, ObjectStorage, PersistResult, Persistence};
use murmur_client::config::Timings;
use murmur_client::error::{CallError, GenerationError, PersistenceError, StorageError};
use murmur_client::generation::{FallbackGeneration, Generation, Summary, Turn};
use murmur_client::store::{ChatState, ReconcileStrategy};
use murmur_client::{ChatClient, ClientParts};
use murmur_realtime::{loopback, ChannelConfig, Frame, LoopbackPeer, RealtimeChannel};
use murmur_shared::models::{
    CallLog, CallMedia, Contact, Message, MessageStatus, Participant, Product, Session, Space,
    Story, WalletTransaction,
};
use murmur_shared::protocol::MessageRow;
use murmur_shared::types::{MessageId, SessionId, UserId};

pub fn me() -> UserId {
    UserId::new("me")
}

/// Wall-clock time the harness clock starts at.
pub fn anchor() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

pub fn ada() -> Participant {
    Participant::User {
        id: UserId::new("ada"),
        name: "Ada".into(),
        avatar: None,
        is_bot: false,
    }
}

pub fn bot() -> Participant {
    Participant::User {
        id: UserId::new("helper-bot"),
        name: "Helper".into(),
        avatar: None,
        is_bot: true,
    }
}

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryPersistence {
    pub sessions: Mutex<Vec<Session>>,
    pub sent: Mutex<Vec<(SessionId, Message)>>,
    pub call_logs: Mutex<Vec<CallLog>>,
    pub statuses: Mutex<Vec<(MessageId, MessageStatus)>>,
    pub expired: Mutex<Vec<(SessionId, DateTime<Utc>)>>,
    pub fail: AtomicBool,
}

impl MemoryPersistence {
    pub fn with_sessions(sessions: Vec<Session>) -> Self {
        Self {
            sessions: Mutex::new(sessions),
            ..Default::default()
        }
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn sent_ids(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, m)| m.id.as_str().to_string())
            .collect()
    }

    fn check(&self) -> PersistResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(PersistenceError::Backend("backend offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Persistence for MemoryPersistence {
    async fn list_sessions(&self) -> PersistResult<Vec<Session>> {
        self.check()?;
        Ok(self.sessions.lock().unwrap().clone())
    }

    async fn send_message(&self, session: &SessionId, message: &Message) -> PersistResult<()> {
        self.check()?;
        self.sent
            .lock()
            .unwrap()
            .push((session.clone(), message.clone()));
        Ok(())
    }

    async fn create_session(&self, participant: Participant) -> PersistResult<Session> {
        self.check()?;
        let session = Session::new(SessionId::new(), participant);
        self.sessions.lock().unwrap().push(session.clone());
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

    async fn toggle_pin(&self, _session: &SessionId, _pinned: bool) -> PersistResult<()> {
        self.check()
    }

    async fn delete_expired(&self, session: &SessionId, now: DateTime<Utc>) -> PersistResult<()> {
        self.check()?;
        self.expired.lock().unwrap().push((session.clone(), now));
        Ok(())
    }

    async fn update_status(&self, message: &MessageId, status: MessageStatus) -> PersistResult<()> {
        self.check()?;
        self.statuses.lock().unwrap().push((message.clone(), status));
        Ok(())
    }

    async fn list_contacts(&self) -> PersistResult<Vec<Contact>> {
        Ok(Vec::new())
    }

    async fn create_contact(&self, _contact: &Contact) -> PersistResult<()> {
        self.check()
    }

    async fn list_products(&self) -> PersistResult<Vec<Product>> {
        Ok(Vec::new())
    }

    async fn create_product(&self, _product: &Product) -> PersistResult<()> {
        self.check()
    }

    async fn list_spaces(&self) -> PersistResult<Vec<Space>> {
        Ok(Vec::new())
    }

    async fn create_space(&self, _space: &Space) -> PersistResult<()> {
        self.check()
    }

    async fn list_transactions(&self) -> PersistResult<Vec<WalletTransaction>> {
        Ok(Vec::new())
    }

    async fn create_transaction(&self, _tx: &WalletTransaction) -> PersistResult<()> {
        self.check()
    }

    async fn list_stories(&self) -> PersistResult<Vec<Story>> {
        Ok(Vec::new())
    }

    async fn create_story(&self, _story: &Story) -> PersistResult<()> {
        self.check()
    }

    async fn list_call_logs(&self) -> PersistResult<Vec<CallLog>> {
        Ok(self.call_logs.lock().unwrap().clone())
    }

    async fn create_call_log(&self, log: &CallLog) -> PersistResult<()> {
        self.check()?;
        self.call_logs.lock().unwrap().push(log.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeStorage {
    pub uploads: Mutex<Vec<String>>,
    pub fail: AtomicBool,
}

#[async_trait]
impl ObjectStorage for FakeStorage {
    async fn upload(&self, file: &MediaFile) -> Result<String, StorageError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(StorageError::Rejected {
                status: 413,
                body: "too large".into(),
            });
        }
        self.uploads.lock().unwrap().push(file.file_name.clone());
        Ok(format!("https://cdn.test/{}", file.file_name))
    }
}

/// Replies after `delay`, echoing the prompt.
pub struct SlowGeneration {
    pub delay: Duration,
}

#[async_trait]
impl Generation for SlowGeneration {
    async fn reply(&self, history: &[Turn], message: &str) -> Result<String, GenerationError> {
        tokio::time::sleep(self.delay).await;
        Ok(format!("[{}] re: {message}", history.len()))
    }

    async fn suggestions(&self, _last_message: &str) -> Result<[String; 3], GenerationError> {
        Err(GenerationError::Malformed("no suggestions".into()))
    }

    async fn summarize(&self, _transcript: &[Turn]) -> Result<Summary, GenerationError> {
        Err(GenerationError::Malformed("no summary".into()))
    }
}

pub struct FakeTrack {
    pub kind: TrackKind,
    pub enabled: AtomicBool,
    pub stopped: AtomicBool,
}

impl MediaTrack for FakeTrack {
    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakeDevices {
    pub unavailable: AtomicBool,
    pub tracks: Mutex<Vec<Arc<FakeTrack>>>,
}

impl FakeDevices {
    pub fn track(&self, kind: TrackKind) -> Option<Arc<FakeTrack>> {
        self.tracks
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.kind == kind)
            .cloned()
    }
}

#[async_trait]
impl MediaDevices for FakeDevices {
    async fn acquire(&self, media: CallMedia) -> Result<Vec<Arc<dyn MediaTrack>>, CallError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CallError::Device("permission denied".into()));
        }
        let mut kinds = vec![TrackKind::Audio];
        if media == CallMedia::Video {
            kinds.push(TrackKind::Video);
        }
        let tracks: Vec<Arc<FakeTrack>> = kinds
            .into_iter()
            .map(|kind| {
                Arc::new(FakeTrack {
                    kind,
                    enabled: AtomicBool::new(true),
                    stopped: AtomicBool::new(false),
                })
            })
            .collect();
        self.tracks.lock().unwrap().extend(tracks.iter().cloned());
        Ok(tracks
            .into_iter()
            .map(|t| t as Arc<dyn MediaTrack>)
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub client: ChatClient,
    pub peer: LoopbackPeer,
    pub persistence: Arc<MemoryPersistence>,
    pub storage: Arc<FakeStorage>,
    pub devices: Arc<FakeDevices>,
}

pub struct Setup {
    pub sessions: Vec<Session>,
    pub strategy: ReconcileStrategy,
    pub generation: FallbackGeneration,
}

impl Default for Setup {
    fn default() -> Self {
        Self {
            sessions: vec![Session::new(SessionId::from("s1"), ada())],
            strategy: ReconcileStrategy::DedupById,
            generation: FallbackGeneration::disabled(),
        }
    }
}

pub async fn harness() -> Harness {
    harness_with(Setup::default()).await
}

pub async fn harness_with(setup: Setup) -> Harness {
    let (handle, mut peer) = loopback();
    let channel = RealtimeChannel::join(handle, ChannelConfig::new("tok", me()))
        .await
        .unwrap();
    peer.from_client.recv().await.unwrap();

    let persistence = Arc::new(MemoryPersistence::with_sessions(setup.sessions));
    let storage = Arc::new(FakeStorage::default());
    let devices = Arc::new(FakeDevices::default());

    let client = ChatClient::with_parts(ClientParts {
        me: me(),
        channel,
        collaborators: Collaborators {
            persistence: persistence.clone(),
            storage: storage.clone(),
            generation: setup.generation,
        },
        devices: devices.clone(),
        clock: Arc::new(TokioClock::starting_at(anchor())),
        strategy: setup.strategy,
        timings: Timings::default(),
    });
    client.messages.load_sessions().await.unwrap();

    Harness {
        client,
        peer,
        persistence,
        storage,
        devices,
    }
}

impl Harness {
    pub fn session(&self, id: &str) -> Session {
        self.client
            .store
            .with_session(&SessionId::from(id), Session::clone)
            .unwrap()
    }

    /// Wait until the store satisfies `pred`.
    pub async fn wait_for(&self, pred: impl FnMut(&ChatState) -> bool) {
        let mut rx = self.client.store.subscribe();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(pred))
            .await
            .expect("store never reached the expected state")
            .unwrap();
    }

    /// Deliver a row insert as the backend would.
    pub async fn deliver_row(&self, row: &MessageRow) {
        let frame = Frame {
            topic: self.client.channel().topic().to_string(),
            event: "postgres_changes".into(),
            payload: json!({
                "data": { "type": "INSERT", "table": "messages", "record": row }
            }),
            reference: None,
        };
        self.peer.to_client.send(frame).await.unwrap();
    }

    /// Deliver an ephemeral broadcast from another participant.
    pub async fn deliver_broadcast(&self, event: &str, payload: serde_json::Value) {
        let frame = Frame::broadcast(self.client.channel().topic(), event, payload, 0);
        self.peer.to_client.send(frame).await.unwrap();
    }
}
