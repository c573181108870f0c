use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tracing::instrument;

use flynn_core::ids::SessionId;
use flynn_core::session::{Session, SessionSummary};
use flynn_core::store::{SessionStore, StoreError};

use crate::database::{db_err, Database};

/// SQLite-backed session persistence. Message history travels as one
/// JSON document per row; listing reads only the summary columns.
pub struct SqliteSessionStore {
    db: Database,
}

impl SqliteSessionStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl SessionStore for SqliteSessionStore {
    #[instrument(skip(self), fields(session_id = %id))]
    fn load(&self, id: &SessionId) -> Result<Option<Session>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, working_directory, messages, input_history, total_tokens,
                            created_at, updated_at
                     FROM sessions WHERE id = ?1",
                )
                .map_err(db_err)?;
            let mut rows = stmt.query([id.as_str()]).map_err(db_err)?;
            match rows.next().map_err(db_err)? {
                Some(row) => Ok(Some(row_to_session(row)?)),
                None => Ok(None),
            }
        })
    }

    #[instrument(skip_all, fields(session_id = %session.id, messages = session.messages.len()))]
    fn save(&self, session: &Session) -> Result<(), StoreError> {
        let messages = serde_json::to_string(&session.messages)?;
        let input_history = serde_json::to_string(&session.input_history)?;

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions
                     (id, working_directory, messages, input_history, message_count,
                      total_tokens, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(id) DO UPDATE SET
                     working_directory = excluded.working_directory,
                     messages = excluded.messages,
                     input_history = excluded.input_history,
                     message_count = excluded.message_count,
                     total_tokens = excluded.total_tokens,
                     updated_at = excluded.updated_at",
                rusqlite::params![
                    session.id.as_str(),
                    session.workdir.to_string_lossy(),
                    messages,
                    input_history,
                    session.messages.len() as i64,
                    session.total_tokens as i64,
                    session.created_at.to_rfc3339(),
                    session.updated_at.to_rfc3339(),
                ],
            )
            .map_err(db_err)?;
            Ok(())
        })
    }

    fn list(&self) -> Result<Vec<SessionSummary>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, working_directory, message_count, total_tokens, updated_at
                     FROM sessions ORDER BY updated_at DESC",
                )
                .map_err(db_err)?;
            let mut rows = stmt.query([]).map_err(db_err)?;
            let mut summaries = Vec::new();
            while let Some(row) = rows.next().map_err(db_err)? {
                let id: String = row.get(0).map_err(db_err)?;
                let workdir: String = row.get(1).map_err(db_err)?;
                let message_count: i64 = row.get(2).map_err(db_err)?;
                let total_tokens: i64 = row.get(3).map_err(db_err)?;
                let updated_at: String = row.get(4).map_err(db_err)?;
                summaries.push(SessionSummary {
                    id: SessionId::from_raw(id),
                    workdir: PathBuf::from(workdir),
                    message_count: message_count as usize,
                    total_tokens: total_tokens as u32,
                    updated_at: parse_timestamp(&updated_at)?,
                });
            }
            Ok(summaries)
        })
    }

    #[instrument(skip(self), fields(session_id = %id))]
    fn delete(&self, id: &SessionId) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn
                .execute("DELETE FROM sessions WHERE id = ?1", [id.as_str()])
                .map_err(db_err)?;
            Ok(changed > 0)
        })
    }
}

fn row_to_session(row: &rusqlite::Row<'_>) -> Result<Session, StoreError> {
    let id: String = row.get(0).map_err(db_err)?;
    let workdir: String = row.get(1).map_err(db_err)?;
    let messages_json: String = row.get(2).map_err(db_err)?;
    let input_history_json: String = row.get(3).map_err(db_err)?;
    let total_tokens: i64 = row.get(4).map_err(db_err)?;
    let created_at: String = row.get(5).map_err(db_err)?;
    let updated_at: String = row.get(6).map_err(db_err)?;

    Ok(Session {
        id: SessionId::from_raw(id),
        workdir: PathBuf::from(workdir),
        messages: serde_json::from_str(&messages_json)?,
        input_history: serde_json::from_str(&input_history_json)?,
        total_tokens: total_tokens as u32,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Serialization(format!("timestamp {raw:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flynn_core::messages::{Message, ToolResult};
    use flynn_core::ids::ToolCallId;

    fn store() -> SqliteSessionStore {
        SqliteSessionStore::new(Database::in_memory().unwrap())
    }

    fn sample_session() -> Session {
        let mut session = Session::new("/work");
        session.push(Message::user_text("list the files"));
        session.push(Message::assistant_text("running ls"));
        session.push(Message::tool_result(
            ToolCallId::from_raw("toolu_1"),
            ToolResult::ok("a.txt\nb.txt"),
        ));
        session.record_input("list the files");
        session.total_tokens = 420;
        session
    }

    #[test]
    fn save_and_load_roundtrip() {
        let store = store();
        let session = sample_session();
        store.save(&session).unwrap();

        let loaded = store.load(&session.id).unwrap().unwrap();
        assert_eq!(loaded.id, session.id);
        assert_eq!(loaded.messages.len(), 3);
        assert_eq!(loaded.messages[0].text_content(), "list the files");
        assert_eq!(loaded.input_history, vec!["list the files"]);
        assert_eq!(loaded.total_tokens, 420);
        assert_eq!(loaded.workdir, PathBuf::from("/work"));
    }

    #[test]
    fn load_missing_returns_none() {
        let store = store();
        let loaded = store.load(&SessionId::from_raw("sess_missing")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn save_is_an_upsert() {
        let store = store();
        let mut session = sample_session();
        store.save(&session).unwrap();

        session.push(Message::user_text("and now?"));
        session.total_tokens = 900;
        store.save(&session).unwrap();

        let loaded = store.load(&session.id).unwrap().unwrap();
        assert_eq!(loaded.messages.len(), 4);
        assert_eq!(loaded.total_tokens, 900);

        let summaries = store.list().unwrap();
        assert_eq!(summaries.len(), 1);
    }

    #[test]
    fn list_orders_by_most_recent() {
        let store = store();
        let mut first = Session::new("/a");
        first.updated_at = Utc::now() - chrono::Duration::minutes(5);
        store.save(&first).unwrap();

        let second = Session::new("/b");
        store.save(&second).unwrap();

        let summaries = store.list().unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].id, second.id);
        assert_eq!(summaries[1].id, first.id);
    }

    #[test]
    fn list_carries_summary_columns() {
        let store = store();
        let session = sample_session();
        store.save(&session).unwrap();

        let summaries = store.list().unwrap();
        assert_eq!(summaries[0].message_count, 3);
        assert_eq!(summaries[0].total_tokens, 420);
        assert_eq!(summaries[0].workdir, PathBuf::from("/work"));
    }

    #[test]
    fn delete_reports_whether_row_existed() {
        let store = store();
        let session = sample_session();
        store.save(&session).unwrap();

        assert!(store.delete(&session.id).unwrap());
        assert!(!store.delete(&session.id).unwrap());
        assert!(store.load(&session.id).unwrap().is_none());
    }

    #[test]
    fn corrupt_messages_json_is_a_serialization_error() {
        let store = store();
        let session = sample_session();
        store.save(&session).unwrap();

        store
            .db
            .with_conn(|conn| {
                conn.execute(
                    "UPDATE sessions SET messages = 'not json' WHERE id = ?1",
                    [session.id.as_str()],
                )
                .map_err(db_err)?;
                Ok(())
            })
            .unwrap();

        let result = store.load(&session.id);
        assert!(matches!(result, Err(StoreError::Serialization(_))));
    }
}
