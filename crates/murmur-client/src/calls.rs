//! Call Session Controller.
//!
//! `idle -> ringing -> connected -> idle`, where idle means the store holds
//! no active call. Local media is acquired while ringing; if the hardware is
//! unavailable the user is told and the call goes on without it.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use murmur_shared::models::{ActiveCall, CallLog, CallMedia};
use murmur_shared::types::{CallId, UserId};

use crate::clock::Clock;
use crate::collab::Persistence;
use crate::error::CallError;
use crate::events::{emit_event, ClientEvent, EventSender};
use crate::notifications::Notifier;
use crate::store::{Action, SessionStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

/// One local capture track.
pub trait MediaTrack: Send + Sync {
    fn kind(&self) -> TrackKind;
    fn set_enabled(&self, enabled: bool);
    fn stop(&self);
}

/// Access to the microphone and camera.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Microphone for audio calls, microphone and camera for video calls.
    async fn acquire(&self, media: CallMedia) -> Result<Vec<Arc<dyn MediaTrack>>, CallError>;
}

#[derive(Clone)]
pub struct CallController {
    store: SessionStore,
    devices: Arc<dyn MediaDevices>,
    persistence: Arc<dyn Persistence>,
    notifier: Notifier,
    events: EventSender,
    clock: Arc<dyn Clock>,
    ring: Duration,
    tracks: Arc<Mutex<Vec<Arc<dyn MediaTrack>>>>,
    ring_timer: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl CallController {
    pub fn new(
        store: SessionStore,
        devices: Arc<dyn MediaDevices>,
        persistence: Arc<dyn Persistence>,
        notifier: Notifier,
        events: EventSender,
        clock: Arc<dyn Clock>,
        ring: Duration,
    ) -> Self {
        Self {
            store,
            devices,
            persistence,
            notifier,
            events,
            clock,
            ring,
            tracks: Arc::default(),
            ring_timer: Arc::default(),
        }
    }

    /// Start ringing `participant`. Rejected while another call is active.
    pub fn start_call(
        &self,
        participant: UserId,
        participant_name: impl Into<String>,
        media: CallMedia,
    ) -> Result<CallId, CallError> {
        if self.store.active_call().is_some() {
            return Err(CallError::AlreadyActive);
        }

        let call = ActiveCall::ringing(participant, participant_name.into(), media);
        let id = call.id;
        info!(call = %id, peer = %call.participant.short(), media = media.as_str(), "Call ringing");
        self.store.dispatch(Action::StartCall(call));
        self.publish_state();

        let this = self.clone();
        tokio::spawn(async move { this.acquire_media(id, media).await });

        let this = self.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(this.ring).await;
            this.store.dispatch(Action::CallConnected {
                call: id,
                at: this.clock.now(),
            });
            info!(call = %id, "Call connected");
            this.publish_state();
        });
        if let Some(previous) = self.ring_timer().replace(timer) {
            previous.abort();
        }

        Ok(id)
    }

    async fn acquire_media(&self, call: CallId, media: CallMedia) {
        match self.devices.acquire(media).await {
            Ok(tracks) => {
                let Some(active) = self.store.active_call().filter(|c| c.id == call) else {
                    // Hung up before the devices answered.
                    tracks.iter().for_each(|t| t.stop());
                    return;
                };
                for track in &tracks {
                    let enabled = match track.kind() {
                        TrackKind::Audio => !active.muted,
                        TrackKind::Video => !active.video_off,
                    };
                    track.set_enabled(enabled);
                }
                self.tracks
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .extend(tracks);
            }
            Err(e) => {
                warn!(call = %call, error = %e, "Media acquisition failed");
                let device = match media {
                    CallMedia::Audio => "microphone",
                    CallMedia::Video => "camera or microphone",
                };
                self.notifier
                    .error(format!("Could not access the {device}. The call continues without it."));
            }
        }
    }

    /// Hang up. Returns the call log, or `None` when no call was active.
    pub fn end_call(&self) -> Option<CallLog> {
        let call = self.store.active_call()?;
        if let Some(timer) = self.ring_timer().take() {
            timer.abort();
        }
        for track in self
            .tracks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
        {
            track.stop();
        }

        let now = self.clock.now();
        let log = CallLog {
            id: call.id,
            participant: call.participant.clone(),
            media: call.media,
            outgoing: true,
            started_at: call.started_at.unwrap_or(now),
            duration_secs: call.duration_secs(now),
        };

        self.store.dispatch(Action::EndCall);
        info!(call = %call.id, duration = %log.formatted_duration(), "Call ended");
        self.publish_state();

        let persistence = self.persistence.clone();
        let entry = log.clone();
        tokio::spawn(async move {
            if let Err(e) = persistence.create_call_log(&entry).await {
                warn!(call = %entry.id, error = %e, "Failed to save call log");
            }
        });

        Some(log)
    }

    /// Returns the new muted flag.
    pub fn toggle_mute(&self) -> Option<bool> {
        self.store.dispatch(Action::ToggleMute);
        let muted = self.store.active_call()?.muted;
        self.set_tracks(TrackKind::Audio, !muted);
        Some(muted)
    }

    /// Returns the new video-off flag.
    pub fn toggle_video(&self) -> Option<bool> {
        self.store.dispatch(Action::ToggleVideo);
        let video_off = self.store.active_call()?.video_off;
        self.set_tracks(TrackKind::Video, !video_off);
        Some(video_off)
    }

    fn set_tracks(&self, kind: TrackKind, enabled: bool) {
        for track in self
            .tracks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|t| t.kind() == kind)
        {
            track.set_enabled(enabled);
        }
    }

    fn ring_timer(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.ring_timer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish_state(&self) {
        emit_event(
            &self.events,
            ClientEvent::CallStateChanged {
                call: self.store.active_call(),
            },
        );
    }
}
