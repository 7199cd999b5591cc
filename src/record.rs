//! Hashed, timestamped transaction records and their conflict bookkeeping.

use std::{
    collections::BTreeSet,
    hash::{Hash, Hasher},
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};

use crate::{
    delta::{Delta, bounds_of},
    math::{Aabb, union_bounds},
    types::{DeltaKind, DocHash, Guid, ObjId, RecordSeq, UserId},
    wrapper::{StructDataWrapper, TypeRegistry, WrapperError, truncate_digest},
};

/// What one or more applied transactions touched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AffectedResults {
    pub added: BTreeSet<ObjId>,
    pub modified: BTreeSet<ObjId>,
    pub deleted: BTreeSet<ObjId>,
    pub dirtied: BTreeSet<ObjId>,
    pub presets: BTreeSet<Guid>,
    pub bounds: Option<Aabb>,
}

impl AffectedResults {
    /// Objects, presets and bounds named directly by `deltas`.
    pub fn from_deltas(deltas: &[Delta]) -> Self {
        let mut results = Self::default();
        for delta in deltas {
            for (id, kind) in delta.affected_objects() {
                match kind {
                    DeltaKind::Create => results.added.insert(id),
                    DeltaKind::Destroy => results.deleted.insert(id),
                    DeltaKind::Mutate => results.modified.insert(id),
                };
            }
            results.presets.extend(delta.affected_presets());
        }
        results.bounds = bounds_of(deltas);
        results
    }

    pub fn merge(&mut self, other: &AffectedResults) {
        self.added.extend(&other.added);
        self.modified.extend(&other.modified);
        self.deleted.extend(&other.deleted);
        self.dirtied.extend(&other.dirtied);
        self.presets.extend(&other.presets);
        self.bounds = union_bounds(self.bounds, other.bounds);
    }

    pub fn touches_object(&self, id: ObjId) -> bool {
        self.added.contains(&id)
            || self.modified.contains(&id)
            || self.deleted.contains(&id)
            || self.dirtied.contains(&id)
    }

    pub fn objects(&self) -> impl Iterator<Item = ObjId> + '_ {
        self.added
            .iter()
            .chain(&self.modified)
            .chain(&self.deleted)
            .chain(&self.dirtied)
            .copied()
    }

    pub fn is_empty(&self) -> bool {
        self.objects().next().is_none() && self.presets.is_empty() && self.bounds.is_none()
    }
}

/// One atomic transaction.
///
/// Identity (equality and hashing) is the ordered list of wrapped deltas.
/// `total_hash` depends only on `prev_doc_hash`, the delta bytes and the origin user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeltasRecord {
    pub deltas: Vec<StructDataWrapper>,
    pub origin_user_id: UserId,
    pub self_hash: DocHash,
    pub prev_doc_hash: DocHash,
    pub total_hash: DocHash,
    pub timestamp_ms: u64,
    pub results: AffectedResults,
}

impl DeltasRecord {
    /// Serializes `deltas` and hashes them on top of `prev_doc_hash`.
    pub fn new(
        registry: &TypeRegistry,
        deltas: &[Delta],
        origin_user_id: impl Into<UserId>,
        prev_doc_hash: DocHash,
        save_json: bool,
    ) -> Result<Self, WrapperError> {
        let wrappers = deltas
            .iter()
            .map(|delta| delta.serialize_struct(registry, save_json))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_wrappers(wrappers, origin_user_id, prev_doc_hash))
    }

    pub fn from_wrappers(
        deltas: Vec<StructDataWrapper>,
        origin_user_id: impl Into<UserId>,
        prev_doc_hash: DocHash,
    ) -> Self {
        let origin_user_id = origin_user_id.into();
        let self_hash = self_hash_of(&deltas, &origin_user_id);
        Self {
            deltas,
            origin_user_id,
            self_hash,
            prev_doc_hash,
            total_hash: combine_hashes(prev_doc_hash, self_hash),
            timestamp_ms: now_ms(),
            results: AffectedResults::default(),
        }
    }

    /// Same deltas and origin, re-hashed on top of `prev_doc_hash`.
    pub fn rebased_onto(&self, prev_doc_hash: DocHash) -> Self {
        let mut rebased = Self::from_wrappers(
            self.deltas.clone(),
            self.origin_user_id.clone(),
            prev_doc_hash,
        );
        rebased.results = self.results.clone();
        rebased
    }

    pub fn decode_deltas(&self, registry: &TypeRegistry) -> Result<Vec<Delta>, WrapperError> {
        self.deltas
            .iter()
            .map(|wrapper| Delta::from_struct(wrapper, registry))
            .collect()
    }

    pub fn set_results(&mut self, results: AffectedResults) {
        self.results = results;
    }

    /// Adds this record's results to `into`.
    pub fn gather_results(&self, into: &mut AffectedResults) {
        into.merge(&self.results);
    }

    /// Shared object (in any role), shared preset, or bounds overlapping after
    /// growing both boxes by `epsilon`.
    pub fn conflicts_with_results(&self, other: &AffectedResults, epsilon: f64) -> bool {
        if self.results.objects().any(|id| other.touches_object(id)) {
            return true;
        }
        if !self.results.presets.is_disjoint(&other.presets) {
            return true;
        }
        match (self.results.bounds, other.bounds) {
            (Some(a), Some(b)) => a.expanded(epsilon).intersects(&b.expanded(epsilon)),
            _ => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }
}

impl PartialEq for DeltasRecord {
    fn eq(&self, other: &Self) -> bool {
        self.deltas == other.deltas
    }
}

impl Eq for DeltasRecord {}

impl Hash for DeltasRecord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.deltas.hash(state);
    }
}

/// Version stamped into every journaled record.
pub const RECORD_FORMAT_VERSION: u16 = 1;

/// A record together with its position in the local journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub seq: RecordSeq,
    pub record: DeltasRecord,
}

/// Versioned journal payload for one [`StoredRecord`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRecordEnvelope {
    pub format_version: u16,
    pub stored: StoredRecord,
}

impl StoredRecordEnvelope {
    pub fn new(stored: StoredRecord) -> Self {
        Self {
            format_version: RECORD_FORMAT_VERSION,
            stored,
        }
    }
}

fn self_hash_of(deltas: &[StructDataWrapper], origin_user_id: &str) -> DocHash {
    let mut hasher = blake3::Hasher::new();
    for wrapper in deltas {
        hasher.update(&wrapper.content_hash().to_le_bytes());
    }
    let origin = truncate_digest(&blake3::hash(origin_user_id.as_bytes()));
    hasher.update(&origin.to_le_bytes());
    truncate_digest(&hasher.finalize())
}

pub fn combine_hashes(prev: DocHash, next: DocHash) -> DocHash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&prev.to_le_bytes());
    hasher.update(&next.to_le_bytes());
    truncate_digest(&hasher.finalize())
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
