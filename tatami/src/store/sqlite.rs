//! SQLite-backed session store.
//!
//! Uses [`rusqlite`] for synchronous access, bridged to async via
//! [`tokio::task::spawn_blocking`]. WAL journal mode and a composite index
//! on `(user_id, created_at)` keep concurrent reads cheap; writes serialize
//! on the connection mutex.
//!
//! # Timestamps
//!
//! Session and knowledge tables store integer epoch seconds; the runs table
//! stores RFC 3339 text. Both round-trip losslessly.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use rusqlite::types::Value as SqlValue;
use tracing::debug;

use crate::error::StoreError;

use super::{
    AgentRun, KnowledgePage, KnowledgeRow, KnowledgeSort, KnowledgeStatus, SessionRecord,
    SessionStore, StoreMode, StoreResult, from_json_text, messages_from_text, messages_to_text,
    to_json_text,
};

const BASE_COLUMNS: [&str; 7] = [
    "session_id",
    "user_id",
    "memory",
    "session_data",
    "extra_data",
    "created_at",
    "updated_at",
];

const fn mode_columns(mode: StoreMode) -> &'static [&'static str] {
    match mode {
        StoreMode::Agent => &["agent_id", "agent_data", "team_session_id"],
        StoreMode::Team => &["team_id", "team_data", "team_session_id"],
        StoreMode::Workflow => &["workflow_id", "workflow_data"],
        StoreMode::WorkflowV2 => &["workflow_id", "workflow_name", "workflow_data", "runs"],
    }
}

/// SQLite-backed [`SessionStore`].
///
/// Cloneable via `Arc<Mutex<Connection>>`; multiple handles may share a
/// database. Schema is created on construction and can be re-applied with
/// [`create_tables`](SessionStore::create_tables).
#[derive(Debug, Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    mode: StoreMode,
    sessions: String,
    runs: String,
    knowledge: String,
}

impl SqliteStore {
    /// Opens (or creates) a database at `path` and initializes the schema.
    pub fn open(path: impl AsRef<Path>, mode: StoreMode) -> StoreResult<Self> {
        let conn = Connection::open(path.as_ref())?;
        Self::from_connection(conn, mode)
    }

    /// Opens an ephemeral in-memory database (data lost on drop).
    pub fn in_memory(mode: StoreMode) -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, mode)
    }

    /// Wraps an existing [`Connection`], applying pragmas and schema setup.
    pub fn from_connection(conn: Connection, mode: StoreMode) -> StoreResult<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;\
             PRAGMA foreign_keys = ON;\
             PRAGMA busy_timeout = 5000;",
        )?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            mode,
            sessions: format!("{}_sessions", mode.as_str()),
            runs: format!("{}_runs", mode.as_str()),
            knowledge: "knowledge".to_owned(),
        };
        store.apply_schema()?;
        Ok(store)
    }

    fn apply_schema(&self) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(&self.schema_sql())?;
        Ok(())
    }

    fn schema_sql(&self) -> String {
        let extension_columns: String = mode_columns(self.mode)
            .iter()
            .map(|column| format!("                {column} TEXT,\n"))
            .collect();

        let mut sql = format!(
            "CREATE TABLE IF NOT EXISTS {sessions} (
                session_id TEXT PRIMARY KEY,
                user_id    TEXT,
                memory     TEXT,
                session_data TEXT,
                extra_data TEXT,
{extension_columns}                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS {runs} (
                id           TEXT PRIMARY KEY,
                session_id   TEXT NOT NULL REFERENCES {sessions}(session_id) ON DELETE CASCADE,
                user_id      TEXT,
                run_name     TEXT,
                run_data     TEXT,
                user_message  TEXT NOT NULL,
                agent_message TEXT NOT NULL,
                messages     TEXT NOT NULL,
                metrics      TEXT,
                created_at   TEXT NOT NULL,
                updated_at   TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS {knowledge} (
                id             TEXT PRIMARY KEY,
                name           TEXT NOT NULL,
                description    TEXT NOT NULL DEFAULT '',
                metadata       TEXT,
                type           TEXT,
                size           INTEGER,
                linked_to      TEXT,
                access_count   INTEGER NOT NULL DEFAULT 0,
                status         TEXT NOT NULL DEFAULT 'processing',
                status_message TEXT,
                created_at     INTEGER NOT NULL,
                updated_at     INTEGER NOT NULL,
                external_id    TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_{sessions}_user
            ON {sessions} (user_id, created_at);

            CREATE INDEX IF NOT EXISTS idx_{runs}_session
            ON {runs} (session_id, created_at);
",
            sessions = self.sessions,
            runs = self.runs,
            knowledge = self.knowledge,
        );

        for column in Self::indexed_mode_columns(self.mode) {
            sql.push_str(&format!(
                "\n            CREATE INDEX IF NOT EXISTS idx_{sessions}_{column}\n            ON {sessions} ({column});\n",
                sessions = self.sessions,
            ));
        }
        sql
    }

    const fn indexed_mode_columns(mode: StoreMode) -> &'static [&'static str] {
        match mode {
            StoreMode::Agent => &["agent_id", "team_session_id"],
            StoreMode::Team => &["team_id", "team_session_id"],
            StoreMode::Workflow => &["workflow_id"],
            StoreMode::WorkflowV2 => &["workflow_id", "workflow_name"],
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|e| StoreError::Lock(e.to_string()))
    }

    /// Bridges a synchronous closure onto the tokio blocking thread pool.
    async fn blocking<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|e| StoreError::Lock(e.to_string()))?;
            f(&guard)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }

    fn session_values(session: &SessionRecord, mode: StoreMode) -> StoreResult<Vec<SqlValue>> {
        let mut values = vec![
            SqlValue::Text(session.session_id.clone()),
            opt_text(session.user_id.clone()),
            opt_json(&session.memory)?,
            opt_json(&session.session_data)?,
            opt_json(&session.extra_data)?,
        ];
        match mode {
            StoreMode::Agent => {
                values.push(opt_text(session.agent_id.clone()));
                values.push(opt_json(&session.agent_data)?);
                values.push(opt_text(session.team_session_id.clone()));
            }
            StoreMode::Team => {
                values.push(opt_text(session.team_id.clone()));
                values.push(opt_json(&session.team_data)?);
                values.push(opt_text(session.team_session_id.clone()));
            }
            StoreMode::Workflow => {
                values.push(opt_text(session.workflow_id.clone()));
                values.push(opt_json(&session.workflow_data)?);
            }
            StoreMode::WorkflowV2 => {
                values.push(opt_text(session.workflow_id.clone()));
                values.push(opt_text(session.workflow_name.clone()));
                values.push(opt_json(&session.workflow_data)?);
                values.push(opt_json(&session.runs)?);
            }
        }
        values.push(SqlValue::Integer(session.created_at));
        values.push(SqlValue::Integer(session.updated_at));
        Ok(values)
    }

    fn insert_sql(&self, upsert: bool) -> String {
        let extras = mode_columns(self.mode);
        let mut columns: Vec<&str> = BASE_COLUMNS[..5].to_vec();
        columns.extend_from_slice(extras);
        columns.push("created_at");
        columns.push("updated_at");

        let placeholders: Vec<String> =
            (1..=columns.len()).map(|i| format!("?{i}")).collect();

        let mut sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.sessions,
            columns.join(", "),
            placeholders.join(", "),
        );

        if upsert {
            let updates: Vec<String> = columns
                .iter()
                .filter(|c| !matches!(**c, "session_id" | "created_at" | "updated_at"))
                .map(|c| format!("{c} = excluded.{c}"))
                .collect();
            sql.push_str(&format!(
                " ON CONFLICT(session_id) DO UPDATE SET {}, \
                 created_at = COALESCE({table}.created_at, excluded.created_at), \
                 updated_at = MAX({table}.updated_at, excluded.updated_at)",
                updates.join(", "),
                table = self.sessions,
            ));
        }
        sql
    }

    fn select_session_sql(&self) -> String {
        let extras = mode_columns(self.mode);
        let mut columns: Vec<&str> = BASE_COLUMNS[..5].to_vec();
        columns.extend_from_slice(extras);
        columns.push("created_at");
        columns.push("updated_at");
        format!("SELECT {} FROM {}", columns.join(", "), self.sessions)
    }

    fn row_to_session(row: &rusqlite::Row<'_>, mode: StoreMode) -> StoreResult<SessionRecord> {
        let mut session = SessionRecord {
            session_id: row.get(0)?,
            user_id: row.get(1)?,
            memory: from_json_text(row.get(2)?)?,
            session_data: from_json_text(row.get(3)?)?,
            extra_data: from_json_text(row.get(4)?)?,
            ..Default::default()
        };

        let base = 5;
        match mode {
            StoreMode::Agent => {
                session.agent_id = row.get(base)?;
                session.agent_data = from_json_text(row.get(base + 1)?)?;
                session.team_session_id = row.get(base + 2)?;
            }
            StoreMode::Team => {
                session.team_id = row.get(base)?;
                session.team_data = from_json_text(row.get(base + 1)?)?;
                session.team_session_id = row.get(base + 2)?;
            }
            StoreMode::Workflow => {
                session.workflow_id = row.get(base)?;
                session.workflow_data = from_json_text(row.get(base + 1)?)?;
            }
            StoreMode::WorkflowV2 => {
                session.workflow_id = row.get(base)?;
                session.workflow_name = row.get(base + 1)?;
                session.workflow_data = from_json_text(row.get(base + 2)?)?;
                session.runs = from_json_text(row.get(base + 3)?)?;
            }
        }

        let extras = mode_columns(mode).len();
        session.created_at = row.get(base + extras)?;
        session.updated_at = row.get(base + extras + 1)?;
        Ok(session)
    }

    fn row_to_run(row: &rusqlite::Row<'_>) -> StoreResult<AgentRun> {
        let messages: String = row.get(7)?;
        let created_at: String = row.get(9)?;
        let updated_at: String = row.get(10)?;
        Ok(AgentRun {
            id: row.get(0)?,
            session_id: row.get(1)?,
            user_id: row.get(2)?,
            run_name: row.get(3)?,
            run_data: from_json_text(row.get(4)?)?,
            user_message: row.get(5)?,
            agent_message: row.get(6)?,
            messages: messages_from_text(&messages)?,
            metrics: from_json_text(row.get(8)?)?,
            created_at: parse_rfc3339(&created_at)?,
            updated_at: parse_rfc3339(&updated_at)?,
        })
    }

    fn row_to_knowledge(row: &rusqlite::Row<'_>) -> StoreResult<KnowledgeRow> {
        let status: String = row.get(8)?;
        Ok(KnowledgeRow {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            metadata: from_json_text(row.get(3)?)?,
            doc_type: row.get(4)?,
            size: row.get(5)?,
            linked_to: row.get(6)?,
            access_count: row.get(7)?,
            status: KnowledgeStatus::parse(&status),
            status_message: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
            external_id: row.get(12)?,
        })
    }
}

fn opt_text(value: Option<String>) -> SqlValue {
    value.map_or(SqlValue::Null, SqlValue::Text)
}

fn opt_json(value: &Option<serde_json::Value>) -> StoreResult<SqlValue> {
    Ok(to_json_text(value)?.map_or(SqlValue::Null, SqlValue::Text))
}

fn parse_rfc3339(text: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Serialization(format!("bad timestamp '{text}': {e}")))
}

const KNOWLEDGE_COLUMNS: &str = "id, name, description, metadata, type, size, linked_to, \
     access_count, status, status_message, created_at, updated_at, external_id";

#[async_trait]
impl SessionStore for SqliteStore {
    fn mode(&self) -> StoreMode {
        self.mode
    }

    async fn create_session(&self, session: &SessionRecord) -> StoreResult<()> {
        let sql = self.insert_sql(false);
        let values = Self::session_values(session, self.mode)?;
        self.blocking(move |conn| {
            conn.execute(&sql, params_from_iter(values))?;
            Ok(())
        })
        .await
    }

    async fn read_session(&self, session_id: &str) -> StoreResult<SessionRecord> {
        let sql = format!("{} WHERE session_id = ?1", self.select_session_sql());
        let id = session_id.to_owned();
        let mode = self.mode;
        self.blocking(move |conn| {
            conn.query_row(&sql, params![id], |row| {
                Ok(Self::row_to_session(row, mode))
            })
            .optional()?
            .ok_or(StoreError::SessionNotFound(id))?
        })
        .await
    }

    async fn update_session(&self, session: &SessionRecord) -> StoreResult<SessionRecord> {
        let sql = self.insert_sql(true);
        let mut stamped = session.clone();
        stamped.updated_at = stamped.updated_at.max(super::now_epoch());
        let values = Self::session_values(&stamped, self.mode)?;
        let read_sql = format!("{} WHERE session_id = ?1", self.select_session_sql());
        let id = stamped.session_id.clone();
        let mode = self.mode;
        self.blocking(move |conn| {
            conn.execute(&sql, params_from_iter(values))?;
            conn.query_row(&read_sql, params![id], |row| {
                Ok(Self::row_to_session(row, mode))
            })
            .optional()?
            .ok_or(StoreError::SessionNotFound(id))?
        })
        .await
    }

    async fn delete_session(&self, session_id: &str) -> StoreResult<()> {
        let sql = format!("DELETE FROM {} WHERE session_id = ?1", self.sessions);
        let id = session_id.to_owned();
        let affected = self
            .blocking(move |conn| Ok(conn.execute(&sql, params![id])?))
            .await?;
        debug!(session_id, affected, "session deleted");
        Ok(())
    }

    async fn get_all_session_ids(&self, user_id: &str) -> StoreResult<Vec<String>> {
        let sql = format!(
            "SELECT session_id FROM {} WHERE user_id = ?1 ORDER BY created_at DESC",
            self.sessions,
        );
        let user = user_id.to_owned();
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let ids = stmt
                .query_map(params![user], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ids)
        })
        .await
    }

    async fn get_all_sessions(&self, user_id: &str) -> StoreResult<Vec<SessionRecord>> {
        let sql = format!(
            "{} WHERE user_id = ?1 ORDER BY created_at DESC",
            self.select_session_sql(),
        );
        let user = user_id.to_owned();
        let mode = self.mode;
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![user], |row| Ok(Self::row_to_session(row, mode)))?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().collect()
        })
        .await
    }

    async fn create_run(&self, run: &AgentRun) -> StoreResult<()> {
        let sql = format!(
            "INSERT INTO {} (id, session_id, user_id, run_name, run_data, user_message, \
             agent_message, messages, metrics, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            self.runs,
        );
        let values = (
            run.id.clone(),
            run.session_id.clone(),
            run.user_id.clone(),
            run.run_name.clone(),
            to_json_text(&run.run_data)?,
            run.user_message.clone(),
            run.agent_message.clone(),
            messages_to_text(&run.messages)?,
            to_json_text(&run.metrics)?,
            run.created_at.to_rfc3339(),
            run.updated_at.to_rfc3339(),
        );
        self.blocking(move |conn| {
            conn.execute(
                &sql,
                params![
                    values.0, values.1, values.2, values.3, values.4, values.5, values.6,
                    values.7, values.8, values.9, values.10,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn read_run(&self, run_id: &str) -> StoreResult<AgentRun> {
        let sql = format!(
            "SELECT id, session_id, user_id, run_name, run_data, user_message, agent_message, \
             messages, metrics, created_at, updated_at FROM {} WHERE id = ?1",
            self.runs,
        );
        let id = run_id.to_owned();
        self.blocking(move |conn| {
            conn.query_row(&sql, params![id], |row| Ok(Self::row_to_run(row)))
                .optional()?
                .ok_or(StoreError::RunNotFound(id))?
        })
        .await
    }

    async fn update_run(&self, run: &AgentRun) -> StoreResult<()> {
        let sql = format!(
            "UPDATE {} SET run_name = ?2, run_data = ?3, metrics = ?4, updated_at = ?5 \
             WHERE id = ?1",
            self.runs,
        );
        let values = (
            run.id.clone(),
            run.run_name.clone(),
            to_json_text(&run.run_data)?,
            to_json_text(&run.metrics)?,
            Utc::now().to_rfc3339(),
        );
        let id = run.id.clone();
        self.blocking(move |conn| {
            let affected = conn.execute(
                &sql,
                params![values.0, values.1, values.2, values.3, values.4],
            )?;
            if affected == 0 {
                return Err(StoreError::RunNotFound(id));
            }
            Ok(())
        })
        .await
    }

    async fn delete_run(&self, run_id: &str) -> StoreResult<()> {
        let sql = format!("DELETE FROM {} WHERE id = ?1", self.runs);
        let id = run_id.to_owned();
        self.blocking(move |conn| {
            conn.execute(&sql, params![id])?;
            Ok(())
        })
        .await
    }

    async fn get_runs_for_session(&self, session_id: &str) -> StoreResult<Vec<AgentRun>> {
        let sql = format!(
            "SELECT id, session_id, user_id, run_name, run_data, user_message, agent_message, \
             messages, metrics, created_at, updated_at FROM {} \
             WHERE session_id = ?1 ORDER BY created_at ASC",
            self.runs,
        );
        let id = session_id.to_owned();
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![id], |row| Ok(Self::row_to_run(row)))?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().collect()
        })
        .await
    }

    async fn get_knowledge(&self, id: &str) -> StoreResult<KnowledgeRow> {
        let sql = format!(
            "SELECT {KNOWLEDGE_COLUMNS} FROM {} WHERE id = ?1",
            self.knowledge,
        );
        let key = id.to_owned();
        self.blocking(move |conn| {
            conn.query_row(&sql, params![key], |row| Ok(Self::row_to_knowledge(row)))
                .optional()?
                .ok_or(StoreError::KnowledgeNotFound(key))?
        })
        .await
    }

    async fn get_all_knowledge(&self, page: KnowledgePage) -> StoreResult<Vec<KnowledgeRow>> {
        let sort = page.sort_by.unwrap_or(KnowledgeSort::CreatedAt).as_column();
        let order = page.sort_order.as_sql();
        let limit = page
            .limit
            .map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX));
        let offset = page.page.map_or(0, |p| {
            i64::try_from(p.saturating_sub(1)).unwrap_or(0) * limit.max(0)
        });
        let sql = format!(
            "SELECT {KNOWLEDGE_COLUMNS} FROM {} ORDER BY {sort} {order} LIMIT ?1 OFFSET ?2",
            self.knowledge,
        );
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![limit, offset], |row| {
                    Ok(Self::row_to_knowledge(row))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().collect()
        })
        .await
    }

    async fn upsert_knowledge(&self, row: &KnowledgeRow) -> StoreResult<()> {
        let sql = format!(
            "INSERT INTO {table} ({KNOWLEDGE_COLUMNS}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13) \
             ON CONFLICT(id) DO UPDATE SET \
             name = excluded.name, description = excluded.description, \
             metadata = excluded.metadata, type = excluded.type, size = excluded.size, \
             linked_to = excluded.linked_to, access_count = excluded.access_count, \
             status = excluded.status, status_message = excluded.status_message, \
             created_at = COALESCE({table}.created_at, excluded.created_at), \
             updated_at = MAX({table}.updated_at, excluded.updated_at), \
             external_id = excluded.external_id",
            table = self.knowledge,
        );
        let mut stamped = row.clone();
        stamped.updated_at = stamped.updated_at.max(super::now_epoch());
        let metadata = to_json_text(&stamped.metadata)?;
        self.blocking(move |conn| {
            conn.execute(
                &sql,
                params![
                    stamped.id,
                    stamped.name,
                    stamped.description,
                    metadata,
                    stamped.doc_type,
                    stamped.size,
                    stamped.linked_to,
                    stamped.access_count,
                    stamped.status.as_str(),
                    stamped.status_message,
                    stamped.created_at,
                    stamped.updated_at,
                    stamped.external_id,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn delete_knowledge(&self, id: &str) -> StoreResult<()> {
        let sql = format!("DELETE FROM {} WHERE id = ?1", self.knowledge);
        let key = id.to_owned();
        self.blocking(move |conn| {
            conn.execute(&sql, params![key])?;
            Ok(())
        })
        .await
    }

    async fn create_tables(&self) -> StoreResult<()> {
        let sql = self.schema_sql();
        self.blocking(move |conn| {
            conn.execute_batch(&sql)?;
            Ok(())
        })
        .await
    }

    async fn upgrade_schema(&self) -> StoreResult<()> {
        let table = self.sessions.clone();
        let expected: Vec<&'static str> = mode_columns(self.mode).to_vec();
        let schema_sql = self.schema_sql();
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
            let existing: Vec<String> = stmt
                .query_map([], |row| row.get::<_, String>(1))?
                .collect::<Result<Vec<_>, _>>()?;

            for column in expected {
                if !existing.iter().any(|c| c == column) {
                    debug!(table = %table, column, "adding missing column");
                    conn.execute_batch(&format!(
                        "ALTER TABLE {table} ADD COLUMN {column} TEXT;",
                    ))?;
                }
            }

            // Indices and new tables are additive too.
            conn.execute_batch(&schema_sql)?;
            Ok(())
        })
        .await
    }

    async fn drop_tables(&self) -> StoreResult<()> {
        let sql = format!(
            "DROP TABLE IF EXISTS {runs};\
             DROP TABLE IF EXISTS {sessions};\
             DROP TABLE IF EXISTS {knowledge};",
            runs = self.runs,
            sessions = self.sessions,
            knowledge = self.knowledge,
        );
        self.blocking(move |conn| {
            conn.execute_batch(&sql)?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> SqliteStore {
        SqliteStore::in_memory(StoreMode::Agent).unwrap()
    }

    #[tokio::test]
    async fn session_crud_roundtrip() {
        let store = store();
        let mut session = SessionRecord::new("s-1", Some("u-1".into()));
        session.agent_id = Some("helper".into());
        session.memory = Some(json!({"notes": []}));

        store.create_session(&session).await.unwrap();
        let read = store.read_session("s-1").await.unwrap();
        assert_eq!(read.agent_id.as_deref(), Some("helper"));
        assert_eq!(read.memory, Some(json!({"notes": []})));

        store.delete_session("s-1").await.unwrap();
        assert!(matches!(
            store.read_session("s-1").await,
            Err(StoreError::SessionNotFound(_)),
        ));
    }

    #[tokio::test]
    async fn missing_session_is_distinguished() {
        let err = store().read_session("ghost").await.unwrap_err();
        assert!(matches!(err, StoreError::SessionNotFound(ref id) if id == "ghost"));
    }

    #[tokio::test]
    async fn upsert_preserves_created_at() {
        let store = store();
        let mut session = SessionRecord::new("s-1", Some("u-1".into()));
        session.created_at = 1_000;
        session.updated_at = 1_000;
        store.create_session(&session).await.unwrap();

        session.extra_data = Some(json!({"seen": true}));
        let updated = store.update_session(&session).await.unwrap();
        assert_eq!(updated.created_at, 1_000);
        assert!(updated.updated_at >= 1_000);
        assert_eq!(updated.extra_data, Some(json!({"seen": true})));
    }

    #[tokio::test]
    async fn upsert_creates_when_absent() {
        let store = store();
        let session = SessionRecord::new("fresh", None);
        let updated = store.update_session(&session).await.unwrap();
        assert_eq!(updated.session_id, "fresh");
    }

    #[tokio::test]
    async fn updated_at_is_monotonic() {
        let store = store();
        let mut session = SessionRecord::new("s-1", None);
        store.create_session(&session).await.unwrap();

        let first = store.update_session(&session).await.unwrap();
        session.updated_at = 0;
        let second = store.update_session(&session).await.unwrap();
        assert!(second.updated_at >= first.updated_at);
    }

    #[tokio::test]
    async fn listing_is_per_user_newest_first() {
        let store = store();
        for (id, ts) in [("a", 10), ("b", 20)] {
            let mut session = SessionRecord::new(id, Some("u-1".into()));
            session.created_at = ts;
            store.create_session(&session).await.unwrap();
        }
        let other = SessionRecord::new("c", Some("u-2".into()));
        store.create_session(&other).await.unwrap();

        let ids = store.get_all_session_ids("u-1").await.unwrap();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(store.get_all_sessions("u-1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn run_crud_and_session_cascade() {
        let store = store();
        let session = SessionRecord::new("s-1", None);
        store.create_session(&session).await.unwrap();

        let mut run = AgentRun::new("r-1", "s-1", "What is 2+2?", "4");
        run.messages = vec![
            crate::message::Message::user("What is 2+2?"),
            crate::message::Message::assistant("4"),
        ];
        run.metrics = Some(json!({"total_tokens": 12}));
        store.create_run(&run).await.unwrap();

        let read = store.read_run("r-1").await.unwrap();
        assert_eq!(read.user_message, "What is 2+2?");
        assert_eq!(read.messages.len(), 2);
        assert_eq!(read.created_at.timestamp(), run.created_at.timestamp());

        store.delete_session("s-1").await.unwrap();
        assert!(matches!(
            store.read_run("r-1").await,
            Err(StoreError::RunNotFound(_)),
        ));
    }

    #[tokio::test]
    async fn runs_ordered_by_created_at() {
        let store = store();
        store
            .create_session(&SessionRecord::new("s-1", None))
            .await
            .unwrap();

        let mut early = AgentRun::new("r-1", "s-1", "first", "one");
        early.created_at = Utc::now() - chrono::Duration::seconds(60);
        early.updated_at = early.created_at;
        let late = AgentRun::new("r-2", "s-1", "second", "two");

        store.create_run(&late).await.unwrap();
        store.create_run(&early).await.unwrap();

        let runs = store.get_runs_for_session("s-1").await.unwrap();
        assert_eq!(runs[0].id, "r-1");
        assert_eq!(runs[1].id, "r-2");
    }

    #[tokio::test]
    async fn knowledge_upsert_and_listing() {
        let store = store();
        let mut row = KnowledgeRow::new("k-1", "handbook");
        row.status = KnowledgeStatus::Ready;
        row.created_at = 5;
        row.updated_at = 5;
        store.upsert_knowledge(&row).await.unwrap();

        row.access_count = 3;
        store.upsert_knowledge(&row).await.unwrap();

        let read = store.get_knowledge("k-1").await.unwrap();
        assert_eq!(read.created_at, 5);
        assert_eq!(read.access_count, 3);
        assert_eq!(read.status, KnowledgeStatus::Ready);

        let mut other = KnowledgeRow::new("k-2", "faq");
        other.access_count = 9;
        store.upsert_knowledge(&other).await.unwrap();

        let listed = store
            .get_all_knowledge(KnowledgePage {
                limit: Some(10),
                page: Some(1),
                sort_by: Some(KnowledgeSort::AccessCount),
                sort_order: super::super::SortOrder::Desc,
            })
            .await
            .unwrap();
        assert_eq!(listed[0].id, "k-2");

        store.delete_knowledge("k-1").await.unwrap();
        assert!(store.get_knowledge("k-1").await.is_err());
    }

    #[tokio::test]
    async fn upgrade_schema_backfills_columns() {
        // Simulate an older deployment without team_session_id.
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE agent_sessions (
                session_id TEXT PRIMARY KEY,
                user_id TEXT, memory TEXT, session_data TEXT, extra_data TEXT,
                agent_id TEXT, agent_data TEXT,
                created_at INTEGER NOT NULL, updated_at INTEGER NOT NULL
            );",
        )
        .unwrap();

        let store = SqliteStore::from_connection(conn, StoreMode::Agent).unwrap();
        store.upgrade_schema().await.unwrap();

        let session = SessionRecord {
            team_session_id: Some("ts-1".into()),
            ..SessionRecord::new("s-1", None)
        };
        store.create_session(&session).await.unwrap();
        let read = store.read_session("s-1").await.unwrap();
        assert_eq!(read.team_session_id.as_deref(), Some("ts-1"));
    }

    #[tokio::test]
    async fn drop_tables_removes_everything() {
        let store = store();
        store
            .create_session(&SessionRecord::new("s-1", None))
            .await
            .unwrap();
        store.drop_tables().await.unwrap();
        assert!(store.read_session("s-1").await.is_err());

        // Tables can be recreated afterwards.
        store.create_tables().await.unwrap();
        store
            .create_session(&SessionRecord::new("s-2", None))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn workflow_v2_columns_roundtrip() {
        let store = SqliteStore::in_memory(StoreMode::WorkflowV2).unwrap();
        let session = SessionRecord {
            workflow_id: Some("wf-1".into()),
            workflow_name: Some("ingest".into()),
            workflow_data: Some(json!({"step": 2})),
            runs: Some(json!([{"id": "r-1"}])),
            ..SessionRecord::new("s-1", None)
        };
        store.create_session(&session).await.unwrap();

        let read = store.read_session("s-1").await.unwrap();
        assert_eq!(read.workflow_name.as_deref(), Some("ingest"));
        assert_eq!(read.runs, Some(json!([{"id": "r-1"}])));
    }
}
