//! The multiplexed realtime channel.
//!
//! One [`RealtimeChannel`] exists per signed-in user. A dispatcher task reads
//! inbound frames from the transport, decodes them into [`RealtimeEvent`]s
//! and fans each one out to the listeners registered for its event name.
//! Listeners are held by [`Subscription`] handles and are removed when the
//! handle is dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use murmur_shared::constants::{DEFAULT_CHANNEL_TOPIC, HEARTBEAT_INTERVAL_SECS};
use murmur_shared::protocol::{RealtimeEvent, EVENT_INCOMING_BUZZ, EVENT_TYPING_STATUS};
use murmur_shared::types::{SessionId, UserId};

use crate::error::RealtimeError;
use crate::frames::Frame;
use crate::transport::{connect_websocket, TransportHandle};

pub type Listener = Arc<dyn Fn(&RealtimeEvent) + Send + Sync>;

/// Parameters for joining the chat channel.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub topic: String,
    pub access_token: String,
    /// Key under which this client tracks presence.
    pub user: UserId,
}

impl ChannelConfig {
    pub fn new(access_token: impl Into<String>, user: UserId) -> Self {
        Self {
            topic: DEFAULT_CHANNEL_TOPIC.to_string(),
            access_token: access_token.into(),
            user,
        }
    }
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    listeners: HashMap<String, Vec<(u64, Listener)>>,
}

impl Registry {
    fn insert(&mut self, event: &str, listener: Listener) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        self.listeners
            .entry(event.to_string())
            .or_default()
            .push((id, listener));
        id
    }

    fn remove(&mut self, event: &str, id: u64) {
        if let Some(list) = self.listeners.get_mut(event) {
            list.retain(|(lid, _)| *lid != id);
            if list.is_empty() {
                self.listeners.remove(event);
            }
        }
    }

    fn snapshot(&self, event: &str) -> Vec<Listener> {
        self.listeners
            .get(event)
            .map(|list| list.iter().map(|(_, l)| l.clone()).collect())
            .unwrap_or_default()
    }
}

/// Scoped registration of one listener. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes the listener"]
pub struct Subscription {
    registry: Weak<Mutex<Registry>>,
    event: String,
    id: u64,
}

impl Subscription {
    pub fn event(&self) -> &str {
        &self.event
    }

    /// Explicit form of dropping the handle.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&self.event, self.id);
        }
    }
}

struct Inner {
    topic: String,
    outbound: mpsc::Sender<Frame>,
    registry: Arc<Mutex<Registry>>,
    next_ref: AtomicU64,
    dispatcher: JoinHandle<()>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

/// Cloneable handle to the joined channel.
#[derive(Clone)]
pub struct RealtimeChannel {
    inner: Arc<Inner>,
}

impl RealtimeChannel {
    /// Open a websocket to `url` and join the channel.
    pub async fn connect(url: &str, config: ChannelConfig) -> Result<Self, RealtimeError> {
        let transport =
            connect_websocket(url, Duration::from_secs(HEARTBEAT_INTERVAL_SECS)).await?;
        Self::join(transport, config).await
    }

    /// Join the channel over an already open transport and start dispatching.
    pub async fn join(transport: TransportHandle, config: ChannelConfig) -> Result<Self, RealtimeError> {
        let TransportHandle { outbound, inbound } = transport;

        outbound
            .send(Frame::join(&config.topic, &config.access_token, &config.user, 1))
            .await
            .map_err(|_| RealtimeError::Closed)?;

        let registry = Arc::new(Mutex::new(Registry::default()));
        let dispatcher = tokio::spawn(dispatch_loop(
            config.topic.clone(),
            inbound,
            Arc::downgrade(&registry),
        ));

        info!(topic = %config.topic, user = %config.user.short(), "Joined realtime channel");

        Ok(Self {
            inner: Arc::new(Inner {
                topic: config.topic,
                outbound,
                registry,
                next_ref: AtomicU64::new(2),
                dispatcher,
            }),
        })
    }

    pub fn topic(&self) -> &str {
        &self.inner.topic
    }

    /// Register `listener` for every event named `event`.
    pub fn on<F>(&self, event: &str, listener: F) -> Subscription
    where
        F: Fn(&RealtimeEvent) + Send + Sync + 'static,
    {
        let id = self
            .inner
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(event, Arc::new(listener));

        debug!(event, id, "Listener registered");

        Subscription {
            registry: Arc::downgrade(&self.inner.registry),
            event: event.to_string(),
            id,
        }
    }

    /// Remove the listener held by `subscription`.
    pub fn off(&self, subscription: Subscription) {
        subscription.unsubscribe();
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.inner
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot(event)
            .len()
    }

    pub async fn broadcast_typing(
        &self,
        session: &SessionId,
        user: &UserId,
        is_typing: bool,
    ) -> Result<(), RealtimeError> {
        self.broadcast(
            EVENT_TYPING_STATUS,
            json!({ "chat_id": session, "user_id": user, "is_typing": is_typing }),
        )
        .await
    }

    pub async fn broadcast_buzz(
        &self,
        session: &SessionId,
        user: &UserId,
        sent_at: DateTime<Utc>,
    ) -> Result<(), RealtimeError> {
        self.broadcast(
            EVENT_INCOMING_BUZZ,
            json!({ "chat_id": session, "user_id": user, "sent_at": sent_at }),
        )
        .await
    }

    pub async fn track_presence(&self, user: &UserId) -> Result<(), RealtimeError> {
        let frame = Frame::track_presence(&self.inner.topic, user, self.next_ref());
        self.publish(frame).await
    }

    /// Send an ephemeral broadcast. Each call is independent; a failure is
    /// not retried.
    pub async fn broadcast(&self, event: &str, payload: serde_json::Value) -> Result<(), RealtimeError> {
        let frame = Frame::broadcast(&self.inner.topic, event, payload, self.next_ref());
        self.publish(frame).await
    }

    /// Leave the channel and stop dispatching.
    pub async fn close(&self) {
        let frame = Frame::leave(&self.inner.topic, self.next_ref());
        if self.publish(frame).await.is_err() {
            debug!("Transport already closed on leave");
        }
        self.inner.dispatcher.abort();
    }

    fn next_ref(&self) -> u64 {
        self.inner.next_ref.fetch_add(1, Ordering::Relaxed)
    }

    async fn publish(&self, frame: Frame) -> Result<(), RealtimeError> {
        self.inner
            .outbound
            .send(frame)
            .await
            .map_err(|_| RealtimeError::Closed)
    }
}

async fn dispatch_loop(
    topic: String,
    mut inbound: mpsc::Receiver<Frame>,
    registry: Weak<Mutex<Registry>>,
) {
    while let Some(frame) = inbound.recv().await {
        if frame.topic != topic && !frame.is_control() {
            debug!(topic = %frame.topic, "Ignoring frame for another topic");
            continue;
        }

        let event = match frame.into_event() {
            Ok(Some(event)) => event,
            Ok(None) => continue,
            Err(e) => {
                debug!(error = %e, "Dropping undecodable realtime frame");
                continue;
            }
        };

        let Some(registry) = registry.upgrade() else {
            break;
        };

        // Call listeners outside the lock so they may (un)subscribe.
        let listeners = registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot(event.name());

        debug!(event = event.name(), listeners = listeners.len(), "Dispatching realtime event");

        for listener in listeners {
            listener(&event);
        }
    }

    warn!(topic = %topic, "Realtime dispatcher ended");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use murmur_shared::protocol::EVENT_NEW_MESSAGE;

    use super::*;
    use crate::frames::PHX_JOIN;
    use crate::transport::loopback;

    async fn joined() -> (RealtimeChannel, crate::transport::LoopbackPeer) {
        let (handle, mut peer) = loopback();
        let channel = RealtimeChannel::join(handle, ChannelConfig::new("tok", UserId::new("me")))
            .await
            .unwrap();
        let join = peer.from_client.recv().await.unwrap();
        assert_eq!(join.event, PHX_JOIN);
        (channel, peer)
    }

    fn typing_frame(topic: &str) -> Frame {
        Frame::broadcast(
            topic,
            EVENT_TYPING_STATUS,
            json!({ "chat_id": "s1", "user_id": "u2", "is_typing": true }),
            9,
        )
    }

    #[tokio::test]
    async fn test_broadcast_typing_publishes_frame() {
        let (channel, mut peer) = joined().await;
        channel
            .broadcast_typing(&SessionId::from("s1"), &UserId::new("me"), true)
            .await
            .unwrap();

        let frame = peer.from_client.recv().await.unwrap();
        assert_eq!(frame.payload["event"], EVENT_TYPING_STATUS);
        assert_eq!(frame.payload["payload"]["is_typing"], true);
    }

    #[tokio::test]
    async fn test_events_fan_out_by_name() {
        let (channel, peer) = joined().await;
        let typing_hits = Arc::new(AtomicUsize::new(0));
        let message_hits = Arc::new(AtomicUsize::new(0));

        let t = typing_hits.clone();
        let _typing = channel.on(EVENT_TYPING_STATUS, move |_| {
            t.fetch_add(1, Ordering::SeqCst);
        });
        let m = message_hits.clone();
        let _messages = channel.on(EVENT_NEW_MESSAGE, move |_| {
            m.fetch_add(1, Ordering::SeqCst);
        });

        peer.to_client.send(typing_frame(channel.topic())).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(typing_hits.load(Ordering::SeqCst), 1);
        assert_eq!(message_hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_dropping_subscription_unsubscribes() {
        let (channel, peer) = joined().await;
        let hits = Arc::new(AtomicUsize::new(0));

        let h = hits.clone();
        let sub = channel.on(EVENT_TYPING_STATUS, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(channel.listener_count(EVENT_TYPING_STATUS), 1);

        channel.off(sub);
        assert_eq!(channel.listener_count(EVENT_TYPING_STATUS), 0);

        peer.to_client.send(typing_frame(channel.topic())).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_frames_for_other_topics_are_ignored() {
        let (channel, peer) = joined().await;
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let _sub = channel.on(EVENT_TYPING_STATUS, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        peer.to_client.send(typing_frame("realtime:other")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_publish_after_transport_closed_fails() {
        let (channel, peer) = joined().await;
        drop(peer);
        let err = channel
            .broadcast_buzz(&SessionId::from("s1"), &UserId::new("me"), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, RealtimeError::Closed));
    }
}
