use anyhow::{anyhow, Context, Result};
use rand::RngCore;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::sync::Mutex;

use super::push_id::PushIdGenerator;
use super::{ensure_mutable, DetectionRecord, RecordId, RecordStore};
use crate::now_ms;

/// URI for a private in-memory database that several connections can share.
pub fn shared_memory_uri() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!(
        "file:roadscan_records_{:x}?mode=memory&cache=shared",
        u64::from_le_bytes(bytes)
    )
}

pub(crate) fn open_db_connection(db_path: &str) -> Result<Connection> {
    if db_path.starts_with("file:") {
        return Ok(Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )?);
    }
    Ok(Connection::open(db_path)?)
}

/// Local record store. Records are kept as JSON payloads keyed by push id.
pub struct SqliteRecordStore {
    conn: Mutex<Connection>,
    ids: PushIdGenerator,
}

impl SqliteRecordStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = open_db_connection(db_path)
            .with_context(|| format!("open record store {}", db_path))?;
        let store = Self {
            conn: Mutex::new(conn),
            ids: PushIdGenerator::new(),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        Self::open(&shared_memory_uri())
    }

    fn ensure_schema(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS images (
              id TEXT PRIMARY KEY,
              created_at INTEGER NOT NULL,
              payload_json TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_images_created ON images(created_at);
            "#,
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("record store lock poisoned"))
    }
}

fn decode(id: &str, payload: &str) -> Result<DetectionRecord> {
    serde_json::from_str(payload).with_context(|| format!("corrupt record {}", id))
}

impl RecordStore for SqliteRecordStore {
    fn push(&self, record: &DetectionRecord) -> Result<RecordId> {
        let created_at = now_ms()?;
        let id = self.ids.next_id(created_at)?;
        let payload_json = serde_json::to_string(record)?;
        let created_at =
            i64::try_from(created_at).map_err(|_| anyhow!("timestamp exceeds i64 range"))?;
        self.lock()?.execute(
            "INSERT INTO images(id, created_at, payload_json) VALUES (?1, ?2, ?3)",
            params![id, created_at, payload_json],
        )?;
        Ok(RecordId::new(id))
    }

    fn set_field(&self, id: &RecordId, field: &str, value: &str) -> Result<()> {
        ensure_mutable(field)?;
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let payload: Option<String> = tx
            .query_row(
                "SELECT payload_json FROM images WHERE id = ?1",
                params![id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        let payload = payload.ok_or_else(|| anyhow!("record {} not found", id))?;
        let mut record = decode(id.as_str(), &payload)?;
        record.status = value.to_string();
        tx.execute(
            "UPDATE images SET payload_json = ?1 WHERE id = ?2",
            params![serde_json::to_string(&record)?, id.as_str()],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn get(&self, id: &RecordId) -> Result<Option<DetectionRecord>> {
        let payload: Option<String> = self
            .lock()?
            .query_row(
                "SELECT payload_json FROM images WHERE id = ?1",
                params![id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        payload.map(|p| decode(id.as_str(), &p)).transpose()
    }

    fn list(&self) -> Result<Vec<(RecordId, DetectionRecord)>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT id, payload_json FROM images ORDER BY id ASC")?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let id: String = row.get(0)?;
            let payload: String = row.get(1)?;
            let record = decode(&id, &payload)?;
            out.push((RecordId::new(id), record));
        }
        Ok(out)
    }
}
