//! JSON frames exchanged with the hosted realtime service.
//!
//! Every frame is `{topic, event, payload, ref}`. Control events (`phx_*`,
//! `heartbeat`) keep the socket alive; `broadcast`, `postgres_changes` and
//! `presence_*` carry the logical events the rest of the client consumes.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use murmur_shared::constants::MESSAGES_TABLE;
use murmur_shared::error::ProtocolError;
use murmur_shared::protocol::{MessageRow, PresenceChange, RealtimeEvent};
use murmur_shared::types::UserId;

pub const PHX_JOIN: &str = "phx_join";
pub const PHX_LEAVE: &str = "phx_leave";
pub const PHX_REPLY: &str = "phx_reply";
pub const PHX_CLOSE: &str = "phx_close";
pub const PHX_ERROR: &str = "phx_error";
pub const HEARTBEAT: &str = "heartbeat";
pub const BROADCAST: &str = "broadcast";
pub const POSTGRES_CHANGES: &str = "postgres_changes";
pub const PRESENCE: &str = "presence";
pub const PRESENCE_STATE: &str = "presence_state";
pub const PRESENCE_DIFF: &str = "presence_diff";

/// Topic used by socket-level heartbeats.
pub const HEARTBEAT_TOPIC: &str = "phoenix";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Frame {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
}

impl Frame {
    /// Join `topic`, asking for message-table inserts, broadcasts and presence.
    pub fn join(topic: &str, access_token: &str, presence_key: &UserId, reference: u64) -> Self {
        Self {
            topic: topic.to_string(),
            event: PHX_JOIN.to_string(),
            payload: json!({
                "config": {
                    "broadcast": { "self": false, "ack": false },
                    "presence": { "key": presence_key.as_str() },
                    "postgres_changes": [
                        { "event": "INSERT", "schema": "public", "table": MESSAGES_TABLE }
                    ]
                },
                "access_token": access_token,
            }),
            reference: Some(reference.to_string()),
        }
    }

    pub fn leave(topic: &str, reference: u64) -> Self {
        Self {
            topic: topic.to_string(),
            event: PHX_LEAVE.to_string(),
            payload: json!({}),
            reference: Some(reference.to_string()),
        }
    }

    pub fn broadcast(topic: &str, event: &str, payload: Value, reference: u64) -> Self {
        Self {
            topic: topic.to_string(),
            event: BROADCAST.to_string(),
            payload: json!({
                "type": BROADCAST,
                "event": event,
                "payload": payload,
            }),
            reference: Some(reference.to_string()),
        }
    }

    pub fn track_presence(topic: &str, user: &UserId, reference: u64) -> Self {
        Self {
            topic: topic.to_string(),
            event: PRESENCE.to_string(),
            payload: json!({
                "type": PRESENCE,
                "event": "track",
                "payload": { "user_id": user.as_str() },
            }),
            reference: Some(reference.to_string()),
        }
    }

    pub fn heartbeat(reference: u64) -> Self {
        Self {
            topic: HEARTBEAT_TOPIC.to_string(),
            event: HEARTBEAT.to_string(),
            payload: json!({}),
            reference: Some(reference.to_string()),
        }
    }

    pub fn is_control(&self) -> bool {
        matches!(
            self.event.as_str(),
            PHX_JOIN | PHX_LEAVE | PHX_REPLY | PHX_CLOSE | PHX_ERROR | HEARTBEAT
        )
    }

    /// Map an inbound frame to a logical event.
    ///
    /// Control frames and inserts into other tables yield `Ok(None)`.
    pub fn into_event(self) -> Result<Option<RealtimeEvent>, ProtocolError> {
        if self.is_control() {
            return Ok(None);
        }

        match self.event.as_str() {
            BROADCAST => {
                let event = self
                    .payload
                    .get("event")
                    .and_then(Value::as_str)
                    .ok_or_else(|| malformed(BROADCAST, "missing event name"))?
                    .to_string();
                let inner = self.payload.get("payload").cloned().unwrap_or(Value::Null);
                RealtimeEvent::from_broadcast(&event, inner).map(Some)
            }
            POSTGRES_CHANGES => {
                let data = self
                    .payload
                    .get("data")
                    .ok_or_else(|| malformed(POSTGRES_CHANGES, "missing data"))?;
                let change = data.get("type").and_then(Value::as_str).unwrap_or_default();
                let table = data.get("table").and_then(Value::as_str).unwrap_or_default();
                if change != "INSERT" || table != MESSAGES_TABLE {
                    return Ok(None);
                }
                let record = data
                    .get("record")
                    .cloned()
                    .ok_or_else(|| malformed(POSTGRES_CHANGES, "missing record"))?;
                let row: MessageRow = serde_json::from_value(record)?;
                Ok(Some(RealtimeEvent::NewMessage(row)))
            }
            PRESENCE_STATE => Ok(Some(RealtimeEvent::PresenceChange(PresenceChange {
                joins: presence_keys(Some(&self.payload)),
                leaves: Vec::new(),
            }))),
            PRESENCE_DIFF => Ok(Some(RealtimeEvent::PresenceChange(PresenceChange {
                joins: presence_keys(self.payload.get("joins")),
                leaves: presence_keys(self.payload.get("leaves")),
            }))),
            other => Err(ProtocolError::UnknownEvent(other.to_string())),
        }
    }
}

fn malformed(event: &str, reason: &str) -> ProtocolError {
    ProtocolError::MalformedPayload {
        event: event.to_string(),
        reason: reason.to_string(),
    }
}

fn presence_keys(map: Option<&Value>) -> Vec<UserId> {
    map.and_then(Value::as_object)
        .map(|m| m.keys().map(|k| UserId::new(k.clone())).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use murmur_shared::protocol::EVENT_INCOMING_BUZZ;
    use murmur_shared::types::SessionId;

    use super::*;

    #[test]
    fn test_join_requests_message_inserts() {
        let frame = Frame::join("realtime:chat", "tok", &UserId::new("u1"), 1);
        let changes = &frame.payload["config"]["postgres_changes"][0];
        assert_eq!(changes["table"], "messages");
        assert_eq!(frame.payload["access_token"], "tok");
        assert_eq!(frame.reference.as_deref(), Some("1"));
    }

    #[test]
    fn test_wire_shape_uses_ref_key() {
        let text = serde_json::to_string(&Frame::heartbeat(7)).unwrap();
        assert!(text.contains("\"ref\":\"7\""));
        assert!(text.contains("\"topic\":\"phoenix\""));
    }

    #[test]
    fn test_broadcast_frame_decodes_to_buzz() {
        let frame = Frame::broadcast(
            "realtime:chat",
            EVENT_INCOMING_BUZZ,
            json!({ "chat_id": "s1", "user_id": "u2", "sent_at": "2024-05-01T10:00:00Z" }),
            3,
        );
        match frame.into_event().unwrap() {
            Some(RealtimeEvent::IncomingBuzz(buzz)) => {
                assert_eq!(buzz.chat_id, SessionId::from("s1"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_postgres_insert_decodes_to_new_message() {
        let frame: Frame = serde_json::from_value(json!({
            "topic": "realtime:chat",
            "event": "postgres_changes",
            "payload": { "data": {
                "type": "INSERT",
                "table": "messages",
                "record": {
                    "id": "m-9", "chat_id": "s1", "sender_id": "u2",
                    "text": "hello back", "kind": "text",
                    "created_at": "2024-05-01T10:00:00Z"
                }
            }},
            "ref": null
        }))
        .unwrap();

        match frame.into_event().unwrap() {
            Some(RealtimeEvent::NewMessage(row)) => assert_eq!(row.text.as_deref(), Some("hello back")),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_updates_and_other_tables_are_ignored() {
        let frame = Frame {
            topic: "realtime:chat".into(),
            event: POSTGRES_CHANGES.into(),
            payload: json!({ "data": { "type": "UPDATE", "table": "messages", "record": {} } }),
            reference: None,
        };
        assert!(frame.into_event().unwrap().is_none());
    }

    #[test]
    fn test_presence_diff_lists_keys() {
        let frame = Frame {
            topic: "realtime:chat".into(),
            event: PRESENCE_DIFF.into(),
            payload: json!({ "joins": { "u2": { "metas": [] } }, "leaves": { "u3": { "metas": [] } } }),
            reference: None,
        };
        match frame.into_event().unwrap() {
            Some(RealtimeEvent::PresenceChange(change)) => {
                assert_eq!(change.joins, vec![UserId::new("u2")]);
                assert_eq!(change.leaves, vec![UserId::new("u3")]);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_control_frames_carry_no_event() {
        let reply = Frame {
            topic: "realtime:chat".into(),
            event: PHX_REPLY.into(),
            payload: json!({ "status": "ok" }),
            reference: Some("1".into()),
        };
        assert!(reply.into_event().unwrap().is_none());
    }
}
