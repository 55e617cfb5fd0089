use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use murmur_shared::models::Session;
use murmur_shared::types::SessionId;

use crate::database::{fmt_ts, parse_json, parse_opt_ts, Database};
use crate::error::{Result, StoreError};

const SESSION_COLUMNS: &str =
    "id, participant, unread, pinned, disappearing, wallpaper, last_message, last_time";

impl Database {
    /// Insert a session row. Messages are stored separately.
    pub fn insert_session(&self, session: &Session) -> Result<()> {
        self.conn().execute(
            "INSERT INTO sessions (id, participant, unread, pinned, disappearing, wallpaper,
                                   last_message, last_time, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                session.id.as_str(),
                serde_json::to_string(&session.participant)?,
                session.unread,
                session.pinned,
                session.disappearing,
                session.wallpaper,
                session.last_message,
                session.last_time.map(fmt_ts),
                fmt_ts(Utc::now()),
            ],
        )?;
        Ok(())
    }

    /// All sessions with their messages, pinned first, then most recent.
    pub fn list_sessions(&self) -> Result<Vec<Session>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions
             ORDER BY pinned DESC, COALESCE(last_time, created_at) DESC"
        ))?;

        let rows = stmt.query_map([], row_to_session)?;

        let mut sessions = Vec::new();
        for row in rows {
            let mut session = row?;
            session.messages = self.get_messages_for_session(&session.id)?;
            sessions.push(session);
        }
        Ok(sessions)
    }

    pub fn get_session(&self, id: &SessionId) -> Result<Session> {
        let session = self
            .conn()
            .query_row(
                &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"),
                params![id.as_str()],
                row_to_session,
            )
            .optional()?
            .ok_or(StoreError::NotFound)?;

        Ok(Session {
            messages: self.get_messages_for_session(id)?,
            ..session
        })
    }

    pub fn set_session_pinned(&self, id: &SessionId, pinned: bool) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE sessions SET pinned = ?1 WHERE id = ?2",
            params![pinned, id.as_str()],
        )?;
        Ok(affected > 0)
    }

    pub fn set_session_disappearing(&self, id: &SessionId, enabled: bool) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE sessions SET disappearing = ?1 WHERE id = ?2",
            params![enabled, id.as_str()],
        )?;
        Ok(affected > 0)
    }

    /// Delete a session and, through the foreign key, its messages.
    pub fn delete_session(&self, id: &SessionId) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM sessions WHERE id = ?1", params![id.as_str()])?;
        Ok(affected > 0)
    }
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<Session> {
    let id: String = row.get(0)?;
    let participant_json: String = row.get(1)?;
    let last_time: Option<String> = row.get(7)?;

    let mut session = Session::new(SessionId(id), parse_json(1, &participant_json)?);
    session.unread = row.get(2)?;
    session.pinned = row.get(3)?;
    session.disappearing = row.get(4)?;
    session.wallpaper = row.get(5)?;
    session.last_message = row.get(6)?;
    session.last_time = parse_opt_ts(7, last_time)?;
    Ok(session)
}

#[cfg(test)]
mod tests {
    use murmur_shared::models::Participant;
    use murmur_shared::types::UserId;

    use super::*;

    fn dm(id: &str, name: &str) -> Session {
        Session::new(
            SessionId::from(id),
            Participant::User {
                id: UserId::new(format!("user-{id}")),
                name: name.to_string(),
                avatar: None,
                is_bot: false,
            },
        )
    }

    #[test]
    fn insert_and_get_session() {
        let db = Database::open_in_memory().unwrap();
        db.insert_session(&dm("s1", "Ada")).unwrap();

        let loaded = db.get_session(&SessionId::from("s1")).unwrap();
        assert_eq!(loaded.participant.display_name(), "Ada");
        assert!(loaded.messages.is_empty());
    }

    #[test]
    fn missing_session_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(
            db.get_session(&SessionId::from("nope")),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn pinned_sessions_list_first() {
        let db = Database::open_in_memory().unwrap();
        db.insert_session(&dm("s1", "Ada")).unwrap();
        db.insert_session(&dm("s2", "Bob")).unwrap();
        assert!(db.set_session_pinned(&SessionId::from("s2"), true).unwrap());

        let sessions = db.list_sessions().unwrap();
        assert_eq!(sessions[0].id, SessionId::from("s2"));
        assert!(sessions[0].pinned);
    }

    #[test]
    fn delete_session_reports_absence() {
        let db = Database::open_in_memory().unwrap();
        db.insert_session(&dm("s1", "Ada")).unwrap();
        assert!(db.delete_session(&SessionId::from("s1")).unwrap());
        assert!(!db.delete_session(&SessionId::from("s1")).unwrap());
    }
}
