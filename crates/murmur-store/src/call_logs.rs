use rusqlite::params;
use uuid::Uuid;

use murmur_shared::models::{CallLog, CallMedia};
use murmur_shared::types::{CallId, UserId};

use crate::database::{conversion_err, fmt_ts, parse_ts, Database};
use crate::directory::collect;
use crate::error::Result;

impl Database {
    pub fn insert_call_log(&self, log: &CallLog) -> Result<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO call_logs (id, participant_id, media, outgoing, started_at, duration_secs)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                log.id.to_string(),
                log.participant.as_str(),
                log.media.as_str(),
                log.outgoing,
                fmt_ts(log.started_at),
                log.duration_secs as i64,
            ],
        )?;
        Ok(())
    }

    /// Call history, most recent first.
    pub fn list_call_logs(&self) -> Result<Vec<CallLog>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, participant_id, media, outgoing, started_at, duration_secs
             FROM call_logs ORDER BY started_at DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            let id: String = row.get(0)?;
            let media: String = row.get(2)?;
            let started: String = row.get(4)?;
            let duration: i64 = row.get(5)?;
            Ok(CallLog {
                id: CallId(Uuid::parse_str(&id).map_err(|e| conversion_err(0, e))?),
                participant: UserId(row.get(1)?),
                media: CallMedia::parse(&media).ok_or_else(|| {
                    conversion_err(
                        2,
                        std::io::Error::new(
                            std::io::ErrorKind::InvalidData,
                            format!("unknown call media `{media}`"),
                        ),
                    )
                })?,
                outgoing: row.get(3)?,
                started_at: parse_ts(4, &started)?,
                duration_secs: duration.max(0) as u64,
            })
        })?;
        collect(rows)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    fn log(started_ms: i64, media: CallMedia, duration_secs: u64) -> CallLog {
        CallLog {
            id: CallId::new(),
            participant: UserId::new("u2"),
            media,
            outgoing: true,
            started_at: Utc.timestamp_millis_opt(started_ms).unwrap(),
            duration_secs,
        }
    }

    #[test]
    fn call_logs_list_most_recent_first() {
        let db = Database::open_in_memory().unwrap();
        let older = log(0, CallMedia::Audio, 65);
        let newer = log(60_000, CallMedia::Video, 5);
        db.insert_call_log(&older).unwrap();
        db.insert_call_log(&newer).unwrap();

        let logs = db.list_call_logs().unwrap();
        assert_eq!(logs, vec![newer, older]);
        assert_eq!(logs[1].formatted_duration(), "01:05");
    }

    #[test]
    fn reinserting_a_call_replaces_it() {
        let db = Database::open_in_memory().unwrap();
        let mut entry = log(0, CallMedia::Audio, 3);
        db.insert_call_log(&entry).unwrap();
        entry.duration_secs = 42;
        db.insert_call_log(&entry).unwrap();

        let logs = db.list_call_logs().unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].duration_secs, 42);
    }
}
