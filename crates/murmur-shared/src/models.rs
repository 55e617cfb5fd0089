//! Chat domain model.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed to
//! the UI layer, written to the local cache, or decoded from a realtime row.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{CallId, MessageId, SessionId, UserId};

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Who is on the other end of a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Participant {
    User {
        id: UserId,
        name: String,
        #[serde(default)]
        avatar: Option<String>,
        /// Automated counterpart whose replies come from the generation service.
        #[serde(default)]
        is_bot: bool,
    },
    Group {
        name: String,
        members: Vec<UserId>,
        #[serde(default)]
        avatar: Option<String>,
    },
}

impl Participant {
    pub fn display_name(&self) -> &str {
        match self {
            Participant::User { name, .. } | Participant::Group { name, .. } => name,
        }
    }

    pub fn is_bot(&self) -> bool {
        matches!(self, Participant::User { is_bot: true, .. })
    }

    /// The counterpart's user id for one-to-one sessions.
    pub fn user_id(&self) -> Option<&UserId> {
        match self {
            Participant::User { id, .. } => Some(id),
            Participant::Group { .. } => None,
        }
    }
}

/// One chat conversation and its ordered history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub id: SessionId,
    pub participant: Participant,
    /// Append-only; array position is the display order.
    pub messages: Vec<Message>,
    pub unread: u32,
    pub pinned: bool,
    /// Applies to messages composed after the flag was set.
    pub disappearing: bool,
    pub wallpaper: Option<String>,
    pub last_message: Option<String>,
    pub last_time: Option<DateTime<Utc>>,
    /// A bot reply is being generated for this session.
    #[serde(default)]
    pub generating: bool,
}

impl Session {
    pub fn new(id: SessionId, participant: Participant) -> Self {
        Self {
            id,
            participant,
            messages: Vec::new(),
            unread: 0,
            pinned: false,
            disappearing: false,
            wallpaper: None,
            last_message: None,
            last_time: None,
            generating: false,
        }
    }

    pub fn message(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| &m.id == id)
    }

    /// Whether at least one message still carries an expiry.
    pub fn has_pending_expiry(&self) -> bool {
        self.messages.iter().any(|m| m.expires_at.is_some())
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Read => "read",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sent" => Some(Self::Sent),
            "delivered" => Some(Self::Delivered),
            "read" => Some(Self::Read),
            _ => None,
        }
    }
}

/// Discriminant of [`Payload`], as stored in the `kind` column.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    Video,
    Audio,
    Document,
    Location,
    Payment,
    Product,
    System,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
            MessageKind::Video => "video",
            MessageKind::Audio => "audio",
            MessageKind::Document => "document",
            MessageKind::Location => "location",
            MessageKind::Payment => "payment",
            MessageKind::Product => "product",
            MessageKind::System => "system",
        }
    }
}

/// Kind-specific message content. Media variants point at an already
/// uploaded object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Payload {
    Text,
    Image {
        url: String,
        #[serde(default)]
        file_name: Option<String>,
        #[serde(default)]
        file_size: Option<u64>,
    },
    Video {
        url: String,
        #[serde(default)]
        file_size: Option<u64>,
        #[serde(default)]
        duration_secs: Option<u32>,
    },
    Audio {
        url: String,
        #[serde(default)]
        duration_secs: Option<u32>,
    },
    Document {
        url: String,
        file_name: String,
        #[serde(default)]
        file_size: Option<u64>,
    },
    Location {
        latitude: f64,
        longitude: f64,
    },
    Payment {
        amount: f64,
        currency: String,
    },
    Product {
        product_id: String,
        title: String,
        price: f64,
    },
    System,
}

impl Payload {
    pub fn kind(&self) -> MessageKind {
        match self {
            Payload::Text => MessageKind::Text,
            Payload::Image { .. } => MessageKind::Image,
            Payload::Video { .. } => MessageKind::Video,
            Payload::Audio { .. } => MessageKind::Audio,
            Payload::Document { .. } => MessageKind::Document,
            Payload::Location { .. } => MessageKind::Location,
            Payload::Payment { .. } => MessageKind::Payment,
            Payload::Product { .. } => MessageKind::Product,
            Payload::System => MessageKind::System,
        }
    }

    /// Rebuild a payload from a `kind` column and its JSON metadata object.
    pub fn from_parts(
        kind: MessageKind,
        metadata: serde_json::Value,
    ) -> Result<Self, serde_json::Error> {
        let mut object = match metadata {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        object.insert(
            "kind".to_string(),
            serde_json::Value::String(kind.as_str().to_string()),
        );
        serde_json::from_value(serde_json::Value::Object(object))
    }

    /// Metadata object without the `kind` tag.
    pub fn metadata(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        if let serde_json::Value::Object(ref mut map) = value {
            map.remove("kind");
        }
        value
    }
}

/// Denormalized copy of the message being replied to. It is not a live
/// pointer and survives deletion of the original.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReplyRef {
    pub message_id: MessageId,
    pub sender: UserId,
    pub text: String,
}

/// One emoji tally on a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reaction {
    pub emoji: String,
    pub count: u32,
    pub users: BTreeSet<UserId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub sender: UserId,
    /// Empty for media-only messages.
    pub text: Option<String>,
    pub payload: Payload,
    /// Authoritative ordering key. Never changes after creation.
    pub created_at: DateTime<Utc>,
    pub status: MessageStatus,
    pub expires_at: Option<DateTime<Utc>>,
    pub reply_to: Option<ReplyRef>,
    pub reactions: Vec<Reaction>,
    pub starred: bool,
    /// Sent locally and not yet echoed back by the backend.
    #[serde(default)]
    pub pending_ack: bool,
}

impl Message {
    pub fn new(
        id: MessageId,
        sender: UserId,
        text: Option<String>,
        payload: Payload,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            sender,
            text,
            payload,
            created_at,
            status: MessageStatus::Sent,
            expires_at: None,
            reply_to: None,
            reactions: Vec::new(),
            starred: false,
            pending_ack: false,
        }
    }

    pub fn text(sender: UserId, text: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self::new(
            MessageId::new(),
            sender,
            Some(text.into()),
            Payload::Text,
            created_at,
        )
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }

    /// One-line preview shown in the session list.
    pub fn preview(&self) -> String {
        if let Some(text) = self.text.as_deref().filter(|t| !t.is_empty()) {
            return text.to_string();
        }
        match &self.payload {
            Payload::Text | Payload::System => String::new(),
            Payload::Image { .. } => "Photo".to_string(),
            Payload::Video { .. } => "Video".to_string(),
            Payload::Audio { .. } => "Voice message".to_string(),
            Payload::Document { file_name, .. } => file_name.clone(),
            Payload::Location { .. } => "Location".to_string(),
            Payload::Payment { amount, currency } => format!("Payment: {amount:.2} {currency}"),
            Payload::Product { title, .. } => title.clone(),
        }
    }

    pub fn reply_ref(&self) -> ReplyRef {
        ReplyRef {
            message_id: self.id.clone(),
            sender: self.sender.clone(),
            text: self.preview(),
        }
    }
}

// ---------------------------------------------------------------------------
// Calls
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CallMedia {
    Audio,
    Video,
}

impl CallMedia {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallMedia::Audio => "audio",
            CallMedia::Video => "video",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "audio" => Some(Self::Audio),
            "video" => Some(Self::Video),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CallState {
    Ringing,
    Connected,
    Ended,
}

/// The single voice/video call in progress, if any.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActiveCall {
    pub id: CallId,
    pub participant: UserId,
    pub participant_name: String,
    pub media: CallMedia,
    pub state: CallState,
    pub muted: bool,
    pub video_off: bool,
    /// Set on the transition into `Connected`.
    pub started_at: Option<DateTime<Utc>>,
}

impl ActiveCall {
    pub fn ringing(participant: UserId, participant_name: String, media: CallMedia) -> Self {
        Self {
            id: CallId::new(),
            participant,
            participant_name,
            media,
            state: CallState::Ringing,
            muted: false,
            video_off: media == CallMedia::Audio,
            started_at: None,
        }
    }

    /// Whole seconds since the call connected; zero if it never did.
    pub fn duration_secs(&self, now: DateTime<Utc>) -> u64 {
        self.started_at
            .map(|start| (now - start).num_seconds().max(0) as u64)
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallLog {
    pub id: CallId,
    pub participant: UserId,
    pub media: CallMedia,
    pub outgoing: bool,
    pub started_at: DateTime<Utc>,
    pub duration_secs: u64,
}

impl CallLog {
    /// `mm:ss`, minutes unbounded.
    pub fn formatted_duration(&self) -> String {
        format!("{:02}:{:02}", self.duration_secs / 60, self.duration_secs % 60)
    }
}

// ---------------------------------------------------------------------------
// Directory and catalog records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Contact {
    pub id: UserId,
    pub name: String,
    pub avatar: Option<String>,
    pub about: Option<String>,
    pub is_bot: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Product {
    pub id: String,
    pub seller: UserId,
    pub title: String,
    pub description: String,
    pub price: f64,
    pub currency: String,
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// An interest group users can browse and join.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Space {
    pub id: String,
    pub name: String,
    pub description: String,
    pub member_count: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransactionDirection {
    Incoming,
    Outgoing,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WalletTransaction {
    pub id: String,
    pub counterparty: UserId,
    pub amount: f64,
    pub currency: String,
    pub direction: TransactionDirection,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Story {
    pub id: String,
    pub author: UserId,
    pub media_url: String,
    pub caption: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}
