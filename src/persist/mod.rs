//! Durable journal of committed records, with snapshots and compaction.

pub mod sqlite;

use thiserror::Error;

use crate::{
    core::{DocumentError, DocumentSnapshot},
    record::StoredRecord,
    types::RecordSeq,
};

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("payload encoding: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("replay failed: {0}")]
    Document(#[from] DocumentError),
    #[error("persistence task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("unsupported {what} format version {version}")]
    UnsupportedFormat { what: &'static str, version: u16 },
}

pub type PersistResult<T> = Result<T, PersistError>;

/// Destination for committed records. Implementations must keep records in `seq` order.
pub trait RecordSink: Send {
    /// Appends `records` and returns the highest sequence now durable.
    fn append_records(&mut self, records: &[StoredRecord]) -> PersistResult<RecordSeq>;
    fn flush(&mut self) -> PersistResult<()> {
        Ok(())
    }
    fn write_snapshot(&mut self, _snapshot: &DocumentSnapshot, _last_seq: RecordSeq) -> PersistResult<()> {
        Ok(())
    }
    fn compact_through(&mut self, _seq: RecordSeq) -> PersistResult<usize> {
        Ok(0)
    }
}
