//! SQLite-backed append-only record journal.

use std::{path::Path, sync::Arc};

use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    config::DocumentConfig,
    core::{Document, DocumentSnapshot},
    record::{RECORD_FORMAT_VERSION, StoredRecord, StoredRecordEnvelope, now_ms},
    types::RecordSeq,
    wrapper::TypeRegistry,
};

use super::{PersistError, PersistResult, RecordSink};

const SNAPSHOT_FORMAT_VERSION: u16 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SnapshotEnvelope {
    format_version: u16,
    snapshot: DocumentSnapshot,
}

/// SQLite implementation of [`crate::persist::RecordSink`].
pub struct SqliteRecordSink {
    conn: Connection,
}

impl SqliteRecordSink {
    /// Opens or creates a journal at `path`.
    ///
    /// Enables WAL mode and sets `synchronous=NORMAL`.
    pub fn open(path: impl AsRef<Path>) -> PersistResult<Self> {
        let conn = Connection::open(path)?;
        Self::init_connection(conn)
    }

    pub fn open_in_memory() -> PersistResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_connection(conn)
    }

    fn init_connection(conn: Connection) -> PersistResult<Self> {
        conn.execute_batch(include_str!("schema.sql"))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Ok(Self { conn })
    }

    /// Rebuilds a document from the latest snapshot plus the records journaled after it.
    pub fn load_document(
        &self,
        config: DocumentConfig,
        registry: Arc<TypeRegistry>,
    ) -> PersistResult<Document> {
        let mut document = match self.load_latest_snapshot()? {
            Some(snapshot) => Document::from_snapshot(snapshot, config, registry)?,
            None => Document::with_registry(config, registry),
        };

        let records = self.load_records_after(document.latest_record_seq())?;
        let replayed = records.len();
        for stored in records {
            document.apply_replayed_record(stored)?;
        }
        info!(
            replayed,
            latest_seq = document.latest_record_seq(),
            "document loaded from journal"
        );
        Ok(document)
    }

    /// Records strictly after `seq`, in order.
    pub fn load_records_after(&self, seq: RecordSeq) -> PersistResult<Vec<StoredRecord>> {
        let mut stmt = self
            .conn
            .prepare("SELECT seq, payload FROM records WHERE seq > ?1 ORDER BY seq ASC")?;

        let rows = stmt.query_map(params![seq as i64], |row| {
            let seq: i64 = row.get(0)?;
            let payload: Vec<u8> = row.get(1)?;
            Ok((seq as RecordSeq, payload))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (seq, payload) = row?;
            let envelope: StoredRecordEnvelope = serde_json::from_slice(&payload)?;
            if envelope.format_version != RECORD_FORMAT_VERSION {
                return Err(PersistError::UnsupportedFormat {
                    what: "record",
                    version: envelope.format_version,
                });
            }
            let mut stored = envelope.stored;
            stored.seq = seq;
            out.push(stored);
        }
        Ok(out)
    }

    /// Writes a snapshot covering every record up to `last_seq`.
    pub fn write_snapshot(&mut self, snapshot: &DocumentSnapshot, last_seq: RecordSeq) -> PersistResult<()> {
        let env = SnapshotEnvelope {
            format_version: SNAPSHOT_FORMAT_VERSION,
            snapshot: snapshot.clone(),
        };
        let payload = serde_json::to_vec(&env)?;
        self.conn.execute(
            "INSERT INTO snapshots(last_seq, ts_ms, payload) VALUES (?1, ?2, ?3)",
            params![last_seq as i64, now_ms() as i64, payload],
        )?;
        debug!(last_seq, "snapshot written");
        Ok(())
    }

    /// Deletes records up to and including `seq`.
    pub fn compact_through(&mut self, seq: RecordSeq) -> PersistResult<usize> {
        let count = self
            .conn
            .execute("DELETE FROM records WHERE seq <= ?1", params![seq as i64])?;
        Ok(count)
    }

    /// Highest sequence in the records table, or 0.
    pub fn latest_seq(&self) -> PersistResult<RecordSeq> {
        let seq: Option<i64> = self
            .conn
            .query_row("SELECT MAX(seq) FROM records", [], |row| row.get(0))
            .optional()?
            .flatten();
        Ok(seq.unwrap_or(0) as RecordSeq)
    }

    /// Origins of the journaled records, in sequence order.
    pub fn origins(&self) -> PersistResult<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT origin FROM records ORDER BY seq ASC")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn load_latest_snapshot(&self) -> PersistResult<Option<DocumentSnapshot>> {
        let payload: Option<Vec<u8>> = self
            .conn
            .query_row(
                "SELECT payload FROM snapshots ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;

        let Some(payload) = payload else {
            return Ok(None);
        };

        let env: SnapshotEnvelope = serde_json::from_slice(&payload)?;
        if env.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(PersistError::UnsupportedFormat {
                what: "snapshot",
                version: env.format_version,
            });
        }
        Ok(Some(env.snapshot))
    }
}

impl RecordSink for SqliteRecordSink {
    fn append_records(&mut self, records: &[StoredRecord]) -> PersistResult<RecordSeq> {
        if records.is_empty() {
            return self.latest_seq();
        }

        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO records(seq, ts_ms, origin, total_hash, payload) VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for stored in records {
                let payload = serde_json::to_vec(&StoredRecordEnvelope::new(stored.clone()))?;
                stmt.execute(params![
                    stored.seq as i64,
                    stored.record.timestamp_ms as i64,
                    stored.record.origin_user_id,
                    stored.record.total_hash as i64,
                    payload,
                ])?;
            }
        }
        tx.commit()?;

        Ok(records.last().map(|r| r.seq).unwrap_or(0))
    }

    fn flush(&mut self) -> PersistResult<()> {
        self.conn.execute_batch("PRAGMA wal_checkpoint(PASSIVE);")?;
        Ok(())
    }

    fn write_snapshot(&mut self, snapshot: &DocumentSnapshot, last_seq: RecordSeq) -> PersistResult<()> {
        SqliteRecordSink::write_snapshot(self, snapshot, last_seq)
    }

    fn compact_through(&mut self, seq: RecordSeq) -> PersistResult<usize> {
        SqliteRecordSink::compact_through(self, seq)
    }
}
