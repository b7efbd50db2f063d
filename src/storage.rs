//! SQLite-backed persistence
//!
//! Call rows, the append-only conversation log, resolved assistant configs,
//! inbound phone-number routing, and encrypted provider credentials. The
//! control surface owns CRUD for assistants and numbers; the engine only
//! reads them and writes call state.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::{EngineError, EngineResult};
use crate::types::{
    Assistant, Call, CallKind, CallMessage, CallStatus, CostBreakdown, Role, TurnLatencies,
};

/// Process-wide, concurrency-safe call store
#[derive(Clone)]
pub struct CallStore {
    conn: Arc<Mutex<Connection>>,
}

impl CallStore {
    /// Open (or create) the store at the given path
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let conn = Connection::open(&path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory store for tests
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS assistants (
                id TEXT PRIMARY KEY,
                config TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS phone_numbers (
                number TEXT PRIMARY KEY,
                assistant_id TEXT NOT NULL,
                FOREIGN KEY (assistant_id) REFERENCES assistants(id)
            );

            CREATE TABLE IF NOT EXISTS calls (
                id TEXT PRIMARY KEY,
                org_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                status TEXT NOT NULL,
                from_number TEXT,
                to_number TEXT,
                assistant_id TEXT NOT NULL,
                carrier_metadata TEXT NOT NULL DEFAULT 'null',
                started_at TEXT,
                ended_at TEXT,
                duration_seconds INTEGER,
                ended_reason TEXT,
                cost_stt INTEGER NOT NULL DEFAULT 0,
                cost_llm INTEGER NOT NULL DEFAULT 0,
                cost_tts INTEGER NOT NULL DEFAULT 0,
                cost_total INTEGER NOT NULL DEFAULT 0,
                user_recording_uri TEXT,
                assistant_recording_uri TEXT
            );

            CREATE TABLE IF NOT EXISTS call_messages (
                id TEXT PRIMARY KEY,
                call_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                tool_name TEXT,
                tool_arguments TEXT,
                tool_result TEXT,
                timestamp_ms INTEGER NOT NULL,
                stt_latency_ms INTEGER,
                llm_latency_ms INTEGER,
                tts_latency_ms INTEGER,
                FOREIGN KEY (call_id) REFERENCES calls(id)
            );

            CREATE TABLE IF NOT EXISTS provider_credentials (
                org_id TEXT NOT NULL,
                provider TEXT NOT NULL,
                blob TEXT NOT NULL,
                PRIMARY KEY (org_id, provider)
            );

            CREATE INDEX IF NOT EXISTS idx_calls_status ON calls(status);
            CREATE INDEX IF NOT EXISTS idx_call_messages_call ON call_messages(call_id, timestamp_ms);
            "#,
        )?;
        Ok(())
    }

    // ─── Assistants & numbers (read side of the control-surface contract) ───

    pub async fn upsert_assistant(&self, assistant: &Assistant) -> EngineResult<()> {
        let conn = self.conn.lock().await;
        let config = serde_json::to_string(assistant)?;
        conn.execute(
            "INSERT INTO assistants (id, config) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET config = excluded.config",
            params![assistant.id, config],
        )?;
        Ok(())
    }

    pub async fn get_assistant(&self, id: &str) -> EngineResult<Option<Assistant>> {
        let conn = self.conn.lock().await;
        let config: Option<String> = conn
            .query_row(
                "SELECT config FROM assistants WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        match config {
            Some(c) => Ok(Some(serde_json::from_str(&c)?)),
            None => Ok(None),
        }
    }

    pub async fn set_phone_number(&self, number: &str, assistant_id: &str) -> EngineResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO phone_numbers (number, assistant_id) VALUES (?1, ?2)
             ON CONFLICT(number) DO UPDATE SET assistant_id = excluded.assistant_id",
            params![number, assistant_id],
        )?;
        Ok(())
    }

    /// Resolve the assistant configured for a dialled number
    pub async fn assistant_for_number(&self, number: &str) -> EngineResult<Option<Assistant>> {
        let assistant_id: Option<String> = {
            let conn = self.conn.lock().await;
            conn.query_row(
                "SELECT assistant_id FROM phone_numbers WHERE number = ?1",
                params![number],
                |row| row.get(0),
            )
            .optional()?
        };
        match assistant_id {
            Some(id) => self.get_assistant(&id).await,
            None => Ok(None),
        }
    }

    // ─── Calls ───────────────────────────────────────────────

    pub async fn create_call(&self, call: &Call) -> EngineResult<()> {
        let conn = self.conn.lock().await;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO calls
             (id, org_id, kind, status, from_number, to_number, assistant_id, carrier_metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                call.id,
                call.org_id,
                call.kind.as_str(),
                call.status.as_str(),
                call.from_number,
                call.to_number,
                call.assistant_id,
                call.carrier_metadata.to_string(),
            ],
        )?;
        if inserted == 0 {
            return Err(EngineError::Conflict(format!(
                "call {} already exists",
                call.id
            )));
        }
        Ok(())
    }

    pub async fn get_call(&self, id: &str) -> EngineResult<Option<Call>> {
        let conn = self.conn.lock().await;
        let call = conn
            .query_row("SELECT * FROM calls WHERE id = ?1", params![id], call_from_row)
            .optional()?;
        Ok(call)
    }

    /// Look up a call by the carrier's own call id stored in its metadata
    pub async fn find_call_by_carrier_sid(&self, sid: &str) -> EngineResult<Option<Call>> {
        let conn = self.conn.lock().await;
        let call = conn
            .query_row(
                "SELECT * FROM calls WHERE json_extract(carrier_metadata, '$.call_sid') = ?1",
                params![sid],
                call_from_row,
            )
            .optional()?;
        Ok(call)
    }

    pub async fn update_call_status(&self, id: &str, status: CallStatus) -> EngineResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE calls SET status = ?2 WHERE id = ?1",
            params![id, status.as_str()],
        )?;
        Ok(())
    }

    /// Transition to in-progress and stamp the start time
    pub async fn mark_in_progress(&self, id: &str, started_at: DateTime<Utc>) -> EngineResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE calls SET status = 'in-progress', started_at = ?2 WHERE id = ?1",
            params![id, started_at.to_rfc3339()],
        )?;
        Ok(())
    }

    pub async fn set_carrier_metadata(
        &self,
        id: &str,
        metadata: &serde_json::Value,
    ) -> EngineResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE calls SET carrier_metadata = ?2 WHERE id = ?1",
            params![id, metadata.to_string()],
        )?;
        Ok(())
    }

    /// Finalise a call row at session end
    pub async fn complete_call(
        &self,
        id: &str,
        ended_reason: &str,
        ended_at: DateTime<Utc>,
        duration_seconds: u64,
        cost: CostBreakdown,
    ) -> EngineResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE calls SET status = 'completed', ended_reason = ?2, ended_at = ?3,
             duration_seconds = ?4, cost_stt = ?5, cost_llm = ?6, cost_tts = ?7, cost_total = ?8
             WHERE id = ?1",
            params![
                id,
                ended_reason,
                ended_at.to_rfc3339(),
                duration_seconds as i64,
                cost.stt as i64,
                cost.llm as i64,
                cost.tts as i64,
                cost.total as i64,
            ],
        )?;
        Ok(())
    }

    pub async fn set_recording_uris(
        &self,
        id: &str,
        user_uri: &str,
        assistant_uri: &str,
    ) -> EngineResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE calls SET user_recording_uri = ?2, assistant_recording_uri = ?3 WHERE id = ?1",
            params![id, user_uri, assistant_uri],
        )?;
        Ok(())
    }

    // ─── Conversation log ────────────────────────────────────

    pub async fn insert_message(&self, message: &CallMessage) -> EngineResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO call_messages
             (id, call_id, role, content, tool_name, tool_arguments, tool_result,
              timestamp_ms, stt_latency_ms, llm_latency_ms, tts_latency_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                message.id,
                message.call_id,
                message.role.as_str(),
                message.content,
                message.tool_name,
                message.tool_arguments.as_ref().map(|v| v.to_string()),
                message.tool_result.as_ref().map(|v| v.to_string()),
                message.timestamp_ms as i64,
                message.latencies.stt_ms.map(|v| v as i64),
                message.latencies.llm_ms.map(|v| v as i64),
                message.latencies.tts_ms.map(|v| v as i64),
            ],
        )?;
        Ok(())
    }

    pub async fn messages_for_call(&self, call_id: &str) -> EngineResult<Vec<CallMessage>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT * FROM call_messages WHERE call_id = ?1 ORDER BY timestamp_ms, rowid",
        )?;
        let rows = stmt.query_map(params![call_id], |row| {
            Ok(CallMessage {
                id: row.get("id")?,
                call_id: row.get("call_id")?,
                role: Role::parse(&row.get::<_, String>("role")?).unwrap_or(Role::User),
                content: row.get("content")?,
                tool_name: row.get("tool_name")?,
                tool_arguments: row
                    .get::<_, Option<String>>("tool_arguments")?
                    .and_then(|s| serde_json::from_str(&s).ok()),
                tool_result: row
                    .get::<_, Option<String>>("tool_result")?
                    .and_then(|s| serde_json::from_str(&s).ok()),
                timestamp_ms: row.get::<_, i64>("timestamp_ms")? as u64,
                latencies: TurnLatencies {
                    stt_ms: row.get::<_, Option<i64>>("stt_latency_ms")?.map(|v| v as u64),
                    llm_ms: row.get::<_, Option<i64>>("llm_latency_ms")?.map(|v| v as u64),
                    tts_ms: row.get::<_, Option<i64>>("tts_latency_ms")?.map(|v| v as u64),
                },
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // ─── Provider credentials ────────────────────────────────

    /// Store an encrypted credential blob (see `security::credentials`)
    pub async fn store_credential(
        &self,
        org_id: &str,
        provider: &str,
        blob: &str,
    ) -> EngineResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO provider_credentials (org_id, provider, blob) VALUES (?1, ?2, ?3)
             ON CONFLICT(org_id, provider) DO UPDATE SET blob = excluded.blob",
            params![org_id, provider, blob],
        )?;
        Ok(())
    }

    pub async fn get_credential(
        &self,
        org_id: &str,
        provider: &str,
    ) -> EngineResult<Option<String>> {
        let conn = self.conn.lock().await;
        Ok(conn
            .query_row(
                "SELECT blob FROM provider_credentials WHERE org_id = ?1 AND provider = ?2",
                params![org_id, provider],
                |row| row.get(0),
            )
            .optional()?)
    }
}

fn call_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Call> {
    Ok(Call {
        id: row.get("id")?,
        org_id: row.get("org_id")?,
        kind: CallKind::parse(&row.get::<_, String>("kind")?).unwrap_or(CallKind::Web),
        status: CallStatus::parse(&row.get::<_, String>("status")?).unwrap_or(CallStatus::Queued),
        from_number: row.get("from_number")?,
        to_number: row.get("to_number")?,
        assistant_id: row.get("assistant_id")?,
        carrier_metadata: serde_json::from_str(&row.get::<_, String>("carrier_metadata")?)
            .unwrap_or(serde_json::Value::Null),
        started_at: parse_timestamp(row.get::<_, Option<String>>("started_at")?),
        ended_at: parse_timestamp(row.get::<_, Option<String>>("ended_at")?),
        duration_seconds: row
            .get::<_, Option<i64>>("duration_seconds")?
            .map(|d| d.max(0) as u64),
        ended_reason: row.get("ended_reason")?,
        cost: CostBreakdown {
            stt: row.get::<_, i64>("cost_stt")? as u32,
            llm: row.get::<_, i64>("cost_llm")? as u32,
            tts: row.get::<_, i64>("cost_tts")? as u32,
            total: row.get::<_, i64>("cost_total")? as u32,
        },
        user_recording_uri: row.get("user_recording_uri")?,
        assistant_recording_uri: row.get("assistant_recording_uri")?,
    })
}

fn parse_timestamp(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store_with_call() -> (CallStore, Call) {
        let store = CallStore::open_in_memory().unwrap();
        let call = Call::new(
            "call_1".into(),
            "org_1".into(),
            CallKind::Web,
            "asst_1".into(),
        );
        store.create_call(&call).await.unwrap();
        (store, call)
    }

    #[tokio::test]
    async fn test_call_round_trip() {
        let (store, call) = store_with_call().await;
        let loaded = store.get_call(&call.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, CallStatus::Queued);
        assert_eq!(loaded.kind, CallKind::Web);
        assert!(store.get_call("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_call_is_conflict() {
        let (store, call) = store_with_call().await;
        assert!(matches!(
            store.create_call(&call).await,
            Err(EngineError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_complete_call() {
        let (store, call) = store_with_call().await;
        let started = Utc::now();
        store.mark_in_progress(&call.id, started).await.unwrap();
        let cost = CostBreakdown {
            stt: 1,
            llm: 2,
            tts: 2,
            total: 5,
        };
        store
            .complete_call(&call.id, "assistant-ended", started, 61, cost)
            .await
            .unwrap();
        let loaded = store.get_call(&call.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, CallStatus::Completed);
        assert_eq!(loaded.ended_reason.as_deref(), Some("assistant-ended"));
        assert_eq!(loaded.duration_seconds, Some(61));
        assert_eq!(loaded.cost.total, 5);
        assert!(loaded.started_at.is_some());
    }

    #[tokio::test]
    async fn test_find_by_carrier_sid() {
        let (store, call) = store_with_call().await;
        store
            .set_carrier_metadata(&call.id, &serde_json::json!({ "call_sid": "CA99" }))
            .await
            .unwrap();
        let found = store.find_call_by_carrier_sid("CA99").await.unwrap();
        assert_eq!(found.unwrap().id, call.id);
        assert!(store.find_call_by_carrier_sid("CA00").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_number_routing() {
        let store = CallStore::open_in_memory().unwrap();
        let assistant = Assistant {
            id: "asst_1".into(),
            ..Default::default()
        };
        store.upsert_assistant(&assistant).await.unwrap();
        store.set_phone_number("+15550001", "asst_1").await.unwrap();

        let found = store.assistant_for_number("+15550001").await.unwrap();
        assert_eq!(found.unwrap().id, "asst_1");
        assert!(store
            .assistant_for_number("+15559999")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_messages_ordered() {
        let (store, call) = store_with_call().await;
        let mut first = CallMessage::new(&call.id, Role::Assistant, "Hi.", 0);
        first.latencies.tts_ms = Some(120);
        let second = CallMessage::new(&call.id, Role::User, "what time is it", 900);
        store.insert_message(&second).await.unwrap();
        store.insert_message(&first).await.unwrap();

        let messages = store.messages_for_call(&call.id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "Hi.");
        assert_eq!(messages[0].latencies.tts_ms, Some(120));
        assert_eq!(messages[1].role, Role::User);
    }

    #[tokio::test]
    async fn test_credential_round_trip() {
        let store = CallStore::open_in_memory().unwrap();
        store
            .store_credential("org_1", "elevenlabs", "blob-a")
            .await
            .unwrap();
        store
            .store_credential("org_1", "elevenlabs", "blob-b")
            .await
            .unwrap();
        assert_eq!(
            store.get_credential("org_1", "elevenlabs").await.unwrap(),
            Some("blob-b".into())
        );
    }
}
