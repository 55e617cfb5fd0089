use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::models::{Message, MessageKind, MessageStatus, Payload, ReplyRef};
use crate::types::{MessageId, SessionId, UserId};

/// A row was inserted into the messages table.
pub const EVENT_NEW_MESSAGE: &str = "new_message";
/// A participant started or stopped typing.
pub const EVENT_TYPING_STATUS: &str = "typing_status";
/// A participant buzzed the session.
pub const EVENT_INCOMING_BUZZ: &str = "incoming_buzz";
/// Presence joins/leaves on the channel.
pub const EVENT_PRESENCE_CHANGE: &str = "presence_change";

/// Logical events delivered by the realtime channel
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    NewMessage(MessageRow),
    TypingStatus(TypingStatus),
    IncomingBuzz(Buzz),
    PresenceChange(PresenceChange),
}

impl RealtimeEvent {
    pub fn name(&self) -> &'static str {
        match self {
            RealtimeEvent::NewMessage(_) => EVENT_NEW_MESSAGE,
            RealtimeEvent::TypingStatus(_) => EVENT_TYPING_STATUS,
            RealtimeEvent::IncomingBuzz(_) => EVENT_INCOMING_BUZZ,
            RealtimeEvent::PresenceChange(_) => EVENT_PRESENCE_CHANGE,
        }
    }

    /// Decode an ephemeral broadcast by its event name.
    pub fn from_broadcast(event: &str, payload: serde_json::Value) -> Result<Self, ProtocolError> {
        match event {
            EVENT_TYPING_STATUS => Ok(Self::TypingStatus(serde_json::from_value(payload)?)),
            EVENT_INCOMING_BUZZ => Ok(Self::IncomingBuzz(serde_json::from_value(payload)?)),
            other => Err(ProtocolError::UnknownEvent(other.to_string())),
        }
    }
}

/// A `messages` row as delivered by the backend's insert notifications.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageRow {
    pub id: MessageId,
    pub chat_id: SessionId,
    pub sender_id: UserId,
    #[serde(default)]
    pub text: Option<String>,
    pub kind: MessageKind,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub status: Option<MessageStatus>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reply_to: Option<ReplyRef>,
}

impl MessageRow {
    pub fn from_message(session: &SessionId, message: &Message) -> Self {
        Self {
            id: message.id.clone(),
            chat_id: session.clone(),
            sender_id: message.sender.clone(),
            text: message.text.clone(),
            kind: message.payload.kind(),
            metadata: message.payload.metadata(),
            created_at: message.created_at,
            status: Some(message.status),
            expires_at: message.expires_at,
            reply_to: message.reply_to.clone(),
        }
    }

    pub fn into_message(self) -> Result<(SessionId, Message), ProtocolError> {
        let payload = Payload::from_parts(self.kind, self.metadata).map_err(|e| {
            ProtocolError::MalformedPayload {
                event: EVENT_NEW_MESSAGE.to_string(),
                reason: e.to_string(),
            }
        })?;

        let mut message = Message::new(self.id, self.sender_id, self.text, payload, self.created_at);
        message.status = self.status.unwrap_or(MessageStatus::Delivered);
        message.expires_at = self.expires_at;
        message.reply_to = self.reply_to;
        Ok((self.chat_id, message))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TypingStatus {
    pub chat_id: SessionId,
    pub user_id: UserId,
    pub is_typing: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Buzz {
    pub chat_id: SessionId,
    pub user_id: UserId,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresenceChange {
    pub joins: Vec<UserId>,
    pub leaves: Vec<UserId>,
}
