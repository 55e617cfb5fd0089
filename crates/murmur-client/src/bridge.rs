//! Bridge between the realtime channel and the client state.
//!
//! Inbound messages go through the [`MessageController`]; other realtime
//! events become transient presence state. Signals echoed back from our own user are ignored.

use tracing::{debug, warn};

use murmur_realtime::{RealtimeChannel, Subscription};
use murmur_shared::protocol::{
    RealtimeEvent, EVENT_INCOMING_BUZZ, EVENT_NEW_MESSAGE, EVENT_PRESENCE_CHANGE,
    EVENT_TYPING_STATUS,
};
use murmur_shared::types::UserId;

use crate::events::{emit_event, ClientEvent, EventSender};
use crate::presence::{BuzzEffect, PresenceRoster, TypingTracker};
use crate::lifecycle::MessageController;

/// Keeps the bridge's listeners registered. Dropping it detaches them.
pub struct RealtimeBridge {
    _subscriptions: Vec<Subscription>,
}

impl RealtimeBridge {
    pub fn attach(
        channel: &RealtimeChannel,
        me: UserId,
        messages: MessageController,
        typing: TypingTracker,
        buzz: BuzzEffect,
        roster: PresenceRoster,
        events: EventSender,
    ) -> Self {
        let new_message = channel.on(EVENT_NEW_MESSAGE, move |event| {
            let RealtimeEvent::NewMessage(row) = event else {
                return;
            };
            match row.clone().into_message() {
                Ok((session, message)) => {
                    debug!(session = %session, msg_id = %message.id, "New message from realtime");
                    messages.receive(session, message);
                }
                Err(e) => warn!(error = %e, "Dropping undecodable message row"),
            }
        });

        let typing_me = me.clone();
        let typing_events = events.clone();
        let typing_status = channel.on(EVENT_TYPING_STATUS, move |event| {
            let RealtimeEvent::TypingStatus(status) = event else {
                return;
            };
            if status.user_id == typing_me || !typing.apply(status) {
                return;
            }
            emit_event(
                &typing_events,
                ClientEvent::TypingChanged {
                    session: status.chat_id.clone(),
                    user: status.user_id.clone(),
                    is_typing: status.is_typing,
                },
            );
        });

        let buzz_me = me;
        let incoming_buzz = channel.on(EVENT_INCOMING_BUZZ, move |event| {
            let RealtimeEvent::IncomingBuzz(incoming) = event else {
                return;
            };
            if incoming.user_id == buzz_me {
                return;
            }
            debug!(session = %incoming.chat_id, from = %incoming.user_id.short(), "Buzz received");
            buzz.trigger(incoming);
        });

        let presence = channel.on(EVENT_PRESENCE_CHANGE, move |event| {
            let RealtimeEvent::PresenceChange(change) = event else {
                return;
            };
            let online = roster.apply(change);
            debug!(
                joins = change.joins.len(),
                leaves = change.leaves.len(),
                online = online.len(),
                "Presence changed"
            );
            emit_event(&events, ClientEvent::PresenceChanged { online });
        });

        Self {
            _subscriptions: vec![new_message, typing_status, incoming_buzz, presence],
        }
    }
}
