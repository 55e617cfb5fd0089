//! # murmur-client
//!
//! Client-side chat session coordinator. The [`store::SessionStore`] owns
//! every session and message; controllers apply user actions to it and fire
//! the matching external writes, while the realtime bridge feeds remote
//! events through the same reducer.

pub mod bridge;
pub mod calls;
pub mod clock;
pub mod collab;
pub mod config;
pub mod error;
pub mod events;
pub mod expiry;
pub mod generation;
pub mod lifecycle;
pub mod notifications;
pub mod persistence;
pub mod presence;
pub mod storage;
pub mod store;

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use murmur_realtime::{ChannelConfig, RealtimeChannel};
use murmur_shared::types::UserId;

use crate::bridge::RealtimeBridge;
use crate::calls::{CallController, MediaDevices};
use crate::clock::{Clock, SystemClock};
use crate::collab::Collaborators;
use crate::config::{ClientConfig, Timings};
use crate::events::{event_channel, ClientEvent, EventSender};
use crate::generation::{FallbackGeneration, GeminiClient, Generation};
use crate::lifecycle::MessageController;
use crate::notifications::Notifier;
use crate::persistence::LocalPersistence;
use crate::presence::{BuzzEffect, BuzzSender, PresenceRoster, TypingNotifier, TypingTracker};
use crate::storage::BucketStorage;
use crate::store::{ReconcileStrategy, SessionStore};

/// Install the global tracing subscriber. `RUST_LOG` overrides the default
/// filter. Calling it twice is harmless.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("murmur_client=debug,murmur_realtime=debug,murmur_store=info,warn")
    });

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}

/// Everything [`ChatClient::with_parts`] needs, already constructed.
pub struct ClientParts {
    pub me: UserId,
    pub channel: RealtimeChannel,
    pub collaborators: Collaborators,
    pub devices: Arc<dyn MediaDevices>,
    pub clock: Arc<dyn Clock>,
    pub strategy: ReconcileStrategy,
    pub timings: Timings,
}

/// One signed-in user's chat client.
pub struct ChatClient {
    me: UserId,
    pub store: SessionStore,
    pub messages: MessageController,
    pub calls: CallController,
    pub typing: TypingNotifier,
    pub buzz: BuzzSender,
    pub typing_state: TypingTracker,
    pub buzz_effect: BuzzEffect,
    pub roster: PresenceRoster,
    pub notifier: Notifier,
    events: EventSender,
    channel: RealtimeChannel,
    _bridge: RealtimeBridge,
}

impl ChatClient {
    /// Open the local cache, join the realtime channel and load sessions.
    pub async fn connect(
        config: ClientConfig,
        access_token: &str,
        me: UserId,
        devices: Arc<dyn MediaDevices>,
    ) -> anyhow::Result<Self> {
        let persistence = LocalPersistence::open(config.db_path.as_deref())
            .context("Failed to open local cache")?;

        let generation = FallbackGeneration::new(config.generation_api_key.as_ref().map(|key| {
            Arc::new(GeminiClient::new(key.clone(), config.generation_model.clone()))
                as Arc<dyn Generation>
        }));
        if config.generation_api_key.is_none() {
            tracing::info!("No generation API key, bot replies use fallbacks");
        }

        let channel = RealtimeChannel::connect(
            &config.realtime_url(),
            ChannelConfig::new(access_token, me.clone()),
        )
        .await
        .context("Failed to join realtime channel")?;

        if let Err(e) = channel.track_presence(&me).await {
            tracing::warn!(error = %e, "Failed to track presence");
        }

        let client = Self::with_parts(ClientParts {
            me,
            channel,
            collaborators: Collaborators {
                persistence: Arc::new(persistence),
                storage: Arc::new(BucketStorage::new(&config, access_token)),
                generation,
            },
            devices,
            clock: Arc::new(SystemClock),
            strategy: config.reconcile,
            timings: config.timings,
        });

        // A failed load has already been reported as a notification.
        let _ = client.messages.load_sessions().await;

        Ok(client)
    }

    /// Wire a client from prebuilt parts. Must run inside a tokio runtime.
    pub fn with_parts(parts: ClientParts) -> Self {
        let ClientParts {
            me,
            channel,
            collaborators,
            devices,
            clock,
            strategy,
            timings,
        } = parts;

        let events = event_channel();
        let store = SessionStore::new(strategy);
        let notifier = Notifier::spawn(events.clone(), timings.notification);

        let calls = CallController::new(
            store.clone(),
            devices,
            collaborators.persistence.clone(),
            notifier.clone(),
            events.clone(),
            clock.clone(),
            timings.ring,
        );
        let messages = MessageController::new(
            me.clone(),
            store.clone(),
            collaborators,
            notifier.clone(),
            clock.clone(),
            timings,
        );

        let typing = TypingNotifier::new(channel.clone(), me.clone(), timings.typing_debounce);
        let buzz = BuzzSender::new(channel.clone(), me.clone(), clock, timings.buzz_cooldown);
        let typing_state = TypingTracker::default();
        let buzz_effect = BuzzEffect::new(events.clone(), timings.buzz_effect);
        let roster = PresenceRoster::default();

        let bridge = RealtimeBridge::attach(
            &channel,
            me.clone(),
            messages.clone(),
            typing_state.clone(),
            buzz_effect.clone(),
            roster.clone(),
            events.clone(),
        );

        tracing::info!(user = %me.short(), topic = channel.topic(), "Chat client ready");

        Self {
            me,
            store,
            messages,
            calls,
            typing,
            buzz,
            typing_state,
            buzz_effect,
            roster,
            notifier,
            events,
            channel,
            _bridge: bridge,
        }
    }

    pub fn me(&self) -> &UserId {
        &self.me
    }

    pub fn channel(&self) -> &RealtimeChannel {
        &self.channel
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Hang up any call and leave the realtime channel.
    pub async fn shutdown(self) {
        self.calls.end_call();
        self.channel.close().await;
        tracing::info!(user = %self.me.short(), "Chat client shut down");
    }
}
