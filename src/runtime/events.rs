//! Runtime event stream payloads.

use crate::{
    core::RejectReason,
    types::{DocHash, RecordSeq, UserId},
};

/// Events emitted from the single-writer runtime loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentEvent {
    /// A local transaction was committed.
    Committed { total_hash: DocHash, origin: UserId },
    /// A remote record was applied, re-hashed first when `rebased`.
    RemoteApplied { total_hash: DocHash, rebased: bool },
    RemoteRejected { reason: RejectReason },
    UndoApplied,
    RedoApplied,
    /// Persistence has reached at least this record sequence.
    DurableUpTo { seq: RecordSeq },
}
