//! Transactional BIM document model with Symbol propagation and an append-only SQLite journal.
//!
//! # Examples
//!
//! Turning a group into a Symbol and placing a second instance of it:
//! ```
//! use bimdelta::{
//!     config::DocumentConfig,
//!     core::{Document, ROOT_GRAPH_ID},
//!     delta::MoiDelta,
//!     math::Transform,
//!     state::{FfeData, MetaGraphData, MoiState},
//!     types::{DeltaKind, ObjectType},
//! };
//! use glam::DVec3;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut doc = Document::new(DocumentConfig::default());
//! let registry = doc.registry().clone();
//!
//! let group = MoiState::new(10, ObjectType::MetaGraph, ROOT_GRAPH_ID)
//!     .with_custom_data(&registry, &MetaGraphData::default())?;
//! let chair = MoiState::new(11, ObjectType::Furniture, 10)
//!     .with_custom_data(&registry, &FfeData::at(DVec3::new(1.0, 0.0, 0.0)))?;
//! let mut create = MoiDelta::new();
//! create.add_create_destroy(group, DeltaKind::Create);
//! create.add_create_destroy(chair, DeltaKind::Create);
//! doc.apply_deltas(vec![create.into()])?;
//!
//! let guid = doc.create_symbol(10)?;
//! let copy = doc.place_symbol_instance(
//!     guid,
//!     ROOT_GRAPH_ID,
//!     &Transform::from_translation(DVec3::new(100.0, 0.0, 0.0)),
//! )?;
//! assert_eq!(doc.object(copy).and_then(|g| g.assembly_guid), Some(guid));
//! # Ok(())
//! # }
//! ```
//!
//! Runtime usage with the SQLite journal:
//! ```no_run
//! use bimdelta::{
//!     config::DocumentConfig,
//!     core::Document,
//!     persist::sqlite::SqliteRecordSink,
//!     runtime::{RuntimeConfig, spawn_document},
//! };
//!
//! # #[tokio::main]
//! # async fn main() {
//! let sink = SqliteRecordSink::open("model.db").expect("open sqlite");
//! let document = Document::new(DocumentConfig::default().with_user("alice"));
//! let handle = spawn_document(document, Some(Box::new(sink)), RuntimeConfig::default());
//! let _hash = handle.latest_hash().await.expect("hash");
//! handle.shutdown().await.expect("shutdown");
//! # }
//! ```

/// Document configuration.
pub mod config;
/// Authoritative document, its object arena and the read-only view trait.
pub mod core;
/// Object, preset and graph deltas.
pub mod delta;
/// Vertex/edge/face graphs.
pub mod graph;
/// Rigid transforms and bounds.
pub mod math;
/// Journal abstraction and SQLite implementation.
pub mod persist;
/// Catalog presets and Symbol canonical data.
pub mod preset;
/// Transaction records, hashing and conflict checks.
pub mod record;
/// Single-writer runtime handle and events.
pub mod runtime;
/// Object states and built-in custom-data payloads.
pub mod state;
/// Symbol side-effect derivation and propagation.
pub mod symbol;
/// Shared primitive types and enums.
pub mod types;
/// Type-tagged binary payloads.
pub mod wrapper;

pub use crate::{
    config::DocumentConfig,
    core::{Document, DocumentError},
    delta::Delta,
    record::DeltasRecord,
};
