use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use murmur_shared::models::{Message, MessageKind, MessageStatus, Payload, Reaction};
use murmur_shared::types::{MessageId, SessionId, UserId};

use crate::database::{conversion_err, fmt_ts, parse_json, parse_opt_ts, parse_ts, Database};
use crate::error::{Result, StoreError};

const MESSAGE_COLUMNS: &str = "id, sender_id, text, kind, metadata, created_at, status, \
                               expires_at, reply_to, reactions, starred";

impl Database {
    /// Store a message and refresh the owning session's preview.
    ///
    /// A message whose id is already stored is ignored, so a realtime echo of
    /// a locally written message does not duplicate it. Returns whether a row
    /// was inserted.
    pub fn insert_message(&self, session_id: &SessionId, message: &Message) -> Result<bool> {
        let reply_json = message
            .reply_to
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let inserted = self.conn().execute(
            "INSERT OR IGNORE INTO messages
                 (id, session_id, sender_id, text, kind, metadata, created_at, status,
                  expires_at, reply_to, reactions, starred)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                message.id.as_str(),
                session_id.as_str(),
                message.sender.as_str(),
                message.text,
                message.payload.kind().as_str(),
                message.payload.metadata().to_string(),
                fmt_ts(message.created_at),
                message.status.as_str(),
                message.expires_at.map(fmt_ts),
                reply_json,
                serde_json::to_string(&message.reactions)?,
                message.starred,
            ],
        )?;

        if inserted > 0 {
            self.conn().execute(
                "UPDATE sessions SET last_message = ?1, last_time = ?2 WHERE id = ?3",
                params![
                    message.preview(),
                    fmt_ts(message.created_at),
                    session_id.as_str()
                ],
            )?;
        }

        Ok(inserted > 0)
    }

    /// Messages of one session in insertion order.
    pub fn get_messages_for_session(&self, session_id: &SessionId) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE session_id = ?1 ORDER BY rowid ASC"
        ))?;

        let rows = stmt.query_map(params![session_id.as_str()], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    pub fn get_message(&self, id: &MessageId) -> Result<Message> {
        self.conn()
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id.as_str()],
                row_to_message,
            )
            .optional()?
            .ok_or(StoreError::NotFound)
    }

    pub fn update_message_status(&self, id: &MessageId, status: MessageStatus) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE messages SET status = ?1 WHERE id = ?2",
            params![status.as_str(), id.as_str()],
        )?;
        Ok(affected > 0)
    }

    pub fn update_message_reactions(&self, id: &MessageId, reactions: &[Reaction]) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE messages SET reactions = ?1 WHERE id = ?2",
            params![serde_json::to_string(reactions)?, id.as_str()],
        )?;
        Ok(affected > 0)
    }

    pub fn set_message_starred(&self, id: &MessageId, starred: bool) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE messages SET starred = ?1 WHERE id = ?2",
            params![starred, id.as_str()],
        )?;
        Ok(affected > 0)
    }

    pub fn delete_message(&self, id: &MessageId) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM messages WHERE id = ?1", params![id.as_str()])?;
        Ok(affected > 0)
    }

    /// Remove the session's messages whose expiry is at or before `now` and
    /// point the session preview at the newest survivor.
    pub fn delete_expired_messages(
        &self,
        session_id: &SessionId,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let affected = self.conn().execute(
            "DELETE FROM messages
             WHERE session_id = ?1 AND expires_at IS NOT NULL AND expires_at <= ?2",
            params![session_id.as_str(), fmt_ts(now)],
        )?;
        if affected > 0 {
            self.refresh_session_preview(session_id)?;
        }
        Ok(affected)
    }

    fn refresh_session_preview(&self, session_id: &SessionId) -> Result<()> {
        let latest = self
            .conn()
            .query_row(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages WHERE session_id = ?1
                     ORDER BY rowid DESC LIMIT 1"
                ),
                params![session_id.as_str()],
                row_to_message,
            )
            .optional()?;

        self.conn().execute(
            "UPDATE sessions SET last_message = ?1, last_time = ?2 WHERE id = ?3",
            params![
                latest.as_ref().map(Message::preview),
                latest.as_ref().map(|m| fmt_ts(m.created_at)),
                session_id.as_str()
            ],
        )?;
        Ok(())
    }
}

fn parse_kind(idx: usize, s: &str) -> rusqlite::Result<MessageKind> {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
        .map_err(|e| conversion_err(idx, e))
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id: String = row.get(0)?;
    let sender: String = row.get(1)?;
    let text: Option<String> = row.get(2)?;
    let kind_str: String = row.get(3)?;
    let metadata_json: String = row.get(4)?;
    let created_str: String = row.get(5)?;
    let status_str: String = row.get(6)?;
    let expires_str: Option<String> = row.get(7)?;
    let reply_json: Option<String> = row.get(8)?;
    let reactions_json: String = row.get(9)?;
    let starred: bool = row.get(10)?;

    let kind = parse_kind(3, &kind_str)?;
    let metadata: serde_json::Value = parse_json(4, &metadata_json)?;
    let payload = Payload::from_parts(kind, metadata).map_err(|e| conversion_err(4, e))?;

    let mut message = Message::new(
        MessageId(id),
        UserId(sender),
        text,
        payload,
        parse_ts(5, &created_str)?,
    );
    message.status = MessageStatus::parse(&status_str).unwrap_or(MessageStatus::Sent);
    message.expires_at = parse_opt_ts(7, expires_str)?;
    message.reply_to = reply_json.map(|j| parse_json(8, &j)).transpose()?;
    message.reactions = parse_json(9, &reactions_json)?;
    message.starred = starred;
    Ok(message)
}
