//! In-memory authoritative document, its object arena and the read-only view the
//! Symbol engine works against.

/// Object table with parent/child and retired-object indices.
pub mod arena;
/// Authoritative document and transaction pipeline.
pub mod document;
/// Read-only queries shared by the document and the Symbol engine.
pub mod view;

pub use document::{
    Document, DocumentError, DocumentSnapshot, ROOT_GRAPH_ID, Reconciliation, RejectReason,
};
pub use view::DocumentView;
