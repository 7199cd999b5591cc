use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::{
    config::{DirtyFlush, DocumentConfig},
    core::{arena::ObjectArena, view::DocumentView},
    delta::{Delta, Graph2dDelta, Graph3dDelta, GraphDelta, MoiDelta, MoiDeltaState, PresetDelta},
    graph::{Graph, Graph2d, Graph3d, GraphError, GraphPosition},
    math::Transform,
    preset::{Preset, PresetCollection, PresetError},
    record::{AffectedResults, DeltasRecord, StoredRecord},
    state::{MetaGraphData, MoiState},
    symbol::{self, DirtyMark, SymbolError},
    types::{DeltaKind, DocHash, Guid, ID_NONE, ObjId, ObjectType, RecordSeq, UserId},
    wrapper::{TypeRegistry, WrapperError},
};

/// ID of the document's top-level group.
pub const ROOT_GRAPH_ID: ObjId = 1;

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("object {0} does not exist")]
    MissingObject(ObjId),
    #[error("object {0} already exists")]
    ObjectExists(ObjId),
    #[error("graph {0} does not exist")]
    MissingGraph(ObjId),
    #[error("graph {0} still has elements")]
    GraphNotEmpty(ObjId),
    #[error("the root graph cannot be destroyed")]
    RootGraph,
    #[error("object {0} mirrors a graph element and changes only through graph deltas")]
    GraphOwned(ObjId),
    #[error("mutation changes object id from {old} to {new}")]
    IdChanged { old: ObjId, new: ObjId },
    #[error("mutation changes the type of object {0}")]
    TypeChanged(ObjId),
    #[error("nothing to undo")]
    NothingToUndo,
    #[error("nothing to redo")]
    NothingToRedo,
    #[error("record expects document hash {expected:#018x}, document is at {actual:#018x}")]
    HashMismatch { expected: DocHash, actual: DocHash },
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Preset(#[from] PresetError),
    #[error(transparent)]
    Symbol(#[from] SymbolError),
    #[error(transparent)]
    Wrapper(#[from] WrapperError),
}

/// Outcome of checking a remote record against the verified history.
#[derive(Debug, Clone, PartialEq)]
pub enum Reconciliation {
    /// Based on the latest verified hash; apply as is.
    Accepted(DeltasRecord),
    /// Based on an older verified hash and free of conflicts with everything since;
    /// re-hashed on top of the latest one.
    Rebased(DeltasRecord),
    Rejected(RejectReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// No verified record ends at the record's predecessor hash.
    UnknownPredecessor(DocHash),
    /// Touches what a later verified record touched.
    Conflict,
}

/// Full document state, independent of undo history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSnapshot {
    pub next_id: ObjId,
    pub next_record_seq: RecordSeq,
    pub latest_hash: DocHash,
    pub objects: Vec<MoiState>,
    pub retired: Vec<MoiState>,
    pub volume_graphs: BTreeMap<ObjId, Graph3d>,
    pub surface_graphs: BTreeMap<ObjId, Graph2d>,
    pub presets: Vec<Preset>,
    pub dirty_groups: BTreeSet<ObjId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SideEffects {
    Derive,
    Skip,
}

/// State that inverse deltas do not restore on their own.
#[derive(Debug, Clone)]
struct Checkpoint {
    next_id: ObjId,
    dirty_groups: BTreeSet<ObjId>,
}

/// The authoritative in-memory document.
///
/// Every change goes through a transaction: the caller's deltas, the Symbol side effects
/// derived from them and, depending on [`DirtyFlush`], the re-sync of dirtied Symbol
/// groups are applied all together or not at all, then sealed into a [`DeltasRecord`].
#[derive(Debug)]
pub struct Document {
    config: DocumentConfig,
    registry: Arc<TypeRegistry>,
    arena: ObjectArena,
    volume_graphs: HashMap<ObjId, Graph3d>,
    surface_graphs: HashMap<ObjId, Graph2d>,
    presets: PresetCollection,
    dirty_groups: BTreeSet<ObjId>,
    undo: Vec<Vec<Delta>>,
    redo: Vec<Vec<Delta>>,
    verified: Vec<DeltasRecord>,
    base_hash: DocHash,
    pending_records: Vec<StoredRecord>,
    next_record_seq: RecordSeq,
    preview: Option<(Vec<Delta>, Checkpoint)>,
}

impl Document {
    pub fn new(config: DocumentConfig) -> Self {
        Self::with_registry(config, Arc::new(TypeRegistry::with_builtin_types()))
    }

    pub fn with_registry(config: DocumentConfig, registry: Arc<TypeRegistry>) -> Self {
        let root = MoiState::new(ROOT_GRAPH_ID, ObjectType::MetaGraph, ID_NONE);
        let root = root
            .clone()
            .with_custom_data(&registry, &MetaGraphData::default())
            .unwrap_or(root);
        let mut arena = ObjectArena::new(ROOT_GRAPH_ID + 1);
        arena.insert(root);
        let mut volume_graphs = HashMap::new();
        volume_graphs.insert(ROOT_GRAPH_ID, Graph3d::new());

        Self {
            config,
            registry,
            arena,
            volume_graphs,
            surface_graphs: HashMap::new(),
            presets: PresetCollection::new(),
            dirty_groups: BTreeSet::new(),
            undo: Vec::new(),
            redo: Vec::new(),
            verified: Vec::new(),
            base_hash: 0,
            pending_records: Vec::new(),
            next_record_seq: 1,
            preview: None,
        }
    }

    pub fn from_snapshot(
        snapshot: DocumentSnapshot,
        config: DocumentConfig,
        registry: Arc<TypeRegistry>,
    ) -> Result<Self, DocumentError> {
        let mut arena = ObjectArena::new(snapshot.next_id);
        for object in snapshot.objects {
            if arena.contains(object.id) {
                return Err(DocumentError::ObjectExists(object.id));
            }
            arena.insert(object);
        }
        for object in snapshot.retired {
            arena.restore_retired(object);
        }
        arena.set_next_id(arena.next_id().max(snapshot.next_id));

        Ok(Self {
            config,
            registry,
            arena,
            volume_graphs: snapshot.volume_graphs.into_iter().collect(),
            surface_graphs: snapshot.surface_graphs.into_iter().collect(),
            presets: PresetCollection::from_presets(snapshot.presets),
            dirty_groups: snapshot.dirty_groups,
            undo: Vec::new(),
            redo: Vec::new(),
            verified: Vec::new(),
            base_hash: snapshot.latest_hash,
            pending_records: Vec::new(),
            next_record_seq: snapshot.next_record_seq,
            preview: None,
        })
    }

    pub fn export_snapshot(&self) -> DocumentSnapshot {
        let mut objects: Vec<MoiState> = self.arena.objects().cloned().collect();
        objects.sort_by_key(|object| object.id);
        let mut retired: Vec<MoiState> = self.arena.retired_objects().cloned().collect();
        retired.sort_by_key(|object| object.id);

        DocumentSnapshot {
            next_id: self.arena.next_id(),
            next_record_seq: self.next_record_seq,
            latest_hash: self.latest_verified_doc_hash(),
            objects,
            retired,
            volume_graphs: self.volume_graphs.iter().map(|(id, g)| (*id, g.clone())).collect(),
            surface_graphs: self.surface_graphs.iter().map(|(id, g)| (*id, g.clone())).collect(),
            presets: self.presets.presets().into_iter().cloned().collect(),
            dirty_groups: self.dirty_groups.clone(),
        }
    }

    pub fn config(&self) -> &DocumentConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    pub fn object(&self, id: ObjId) -> Option<&MoiState> {
        self.arena.get(id)
    }

    pub fn object_count(&self) -> usize {
        self.arena.len()
    }

    pub fn presets(&self) -> &PresetCollection {
        &self.presets
    }

    pub fn volume_graph(&self, group_id: ObjId) -> Option<&Graph3d> {
        self.volume_graphs.get(&group_id)
    }

    pub fn surface_graph(&self, id: ObjId) -> Option<&Graph2d> {
        self.surface_graphs.get(&id)
    }

    pub fn dirty_symbol_groups(&self) -> &BTreeSet<ObjId> {
        &self.dirty_groups
    }

    pub fn dirty_symbol_group(&mut self, group_id: ObjId) {
        self.dirty_groups.insert(group_id);
    }

    pub fn clear_dirty_symbol_group(&mut self, group_id: ObjId) {
        self.dirty_groups.remove(&group_id);
    }

    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }

    pub fn redo_len(&self) -> usize {
        self.redo.len()
    }

    pub fn has_preview(&self) -> bool {
        self.preview.is_some()
    }

    pub fn verified_records(&self) -> &[DeltasRecord] {
        &self.verified
    }

    pub fn latest_verified_doc_hash(&self) -> DocHash {
        self.verified
            .last()
            .map(|record| record.total_hash)
            .unwrap_or(self.base_hash)
    }

    pub fn latest_record_seq(&self) -> RecordSeq {
        self.next_record_seq.saturating_sub(1)
    }

    pub fn drain_pending_records(&mut self) -> Vec<StoredRecord> {
        std::mem::take(&mut self.pending_records)
    }

    /// Puts records that could not be shipped back ahead of any newer pending records.
    pub fn requeue_pending_records(&mut self, mut records: Vec<StoredRecord>) {
        records.append(&mut self.pending_records);
        self.pending_records = records;
    }

    /// Runs `deltas` as one undoable transaction with Symbol side effects.
    ///
    /// Returns `None` when every delta is empty.
    pub fn apply_deltas(
        &mut self,
        deltas: Vec<Delta>,
    ) -> Result<Option<DeltasRecord>, DocumentError> {
        self.commit(deltas, SideEffects::Derive)
    }

    /// Re-syncs every dirty Symbol group in one transaction.
    pub fn propagate_dirty_symbols(&mut self) -> Result<Option<DeltasRecord>, DocumentError> {
        self.clear_preview_deltas();
        if self.dirty_groups.is_empty() {
            return Ok(None);
        }
        let checkpoint = self.checkpoint();
        let mut applied = Vec::new();
        if let Err(err) = self.flush_dirty_into(&mut applied) {
            self.roll_back(&applied, checkpoint);
            warn!(%err, "dirty symbol propagation rolled back");
            return Err(err);
        }
        if applied.is_empty() {
            return Ok(None);
        }
        match self.seal(&applied, BTreeSet::new()) {
            Ok(record) => Ok(Some(self.finish_transaction(applied, record))),
            Err(err) => {
                self.roll_back(&applied, checkpoint);
                warn!(%err, "dirty symbol propagation rolled back");
                Err(err)
            }
        }
    }

    /// Turns the non-symbol group `group_id` into the first instance of a new Symbol.
    pub fn create_symbol(&mut self, group_id: ObjId) -> Result<Guid, DocumentError> {
        let (guid, deltas) = symbol::create_deltas_for_new_symbol(self, group_id)?;
        self.commit(deltas, SideEffects::Derive)?;
        Ok(guid)
    }

    /// Stops `group_id` from instancing its Symbol; its content stays as plain objects.
    pub fn detach_symbol(&mut self, group_id: ObjId) -> Result<(), DocumentError> {
        let deltas = symbol::detach_symbol(self, group_id)?;
        self.commit(deltas, SideEffects::Derive)?;
        Ok(())
    }

    /// Creates a new instance of `guid` under `parent_group`, placed at `placement`.
    pub fn place_symbol_instance(
        &mut self,
        guid: Guid,
        parent_group: ObjId,
        placement: &Transform,
    ) -> Result<ObjId, DocumentError> {
        let (group_id, deltas) =
            symbol::create_deltas_for_symbol_instance(self, guid, parent_group, placement)?;
        self.commit(deltas, SideEffects::Skip)?;
        Ok(group_id)
    }

    /// Deletes `group_id` with everything it contains, nested groups included.
    pub fn delete_group(&mut self, group_id: ObjId) -> Result<Option<DeltasRecord>, DocumentError> {
        if group_id == ROOT_GRAPH_ID {
            return Err(DocumentError::RootGraph);
        }
        let deltas = symbol::graph_delete_recursive(self, group_id, true)?;
        self.commit(deltas, SideEffects::Derive)
    }

    pub fn undo(&mut self) -> Result<DeltasRecord, DocumentError> {
        self.clear_preview_deltas();
        let entry = self.undo.pop().ok_or(DocumentError::NothingToUndo)?;
        let inverse: Vec<Delta> = entry.iter().rev().map(Delta::make_inverse).collect();
        match self.replay_local(inverse) {
            Ok(record) => {
                self.redo.push(entry);
                Ok(record)
            }
            Err(err) => {
                self.undo.push(entry);
                Err(err)
            }
        }
    }

    pub fn redo(&mut self) -> Result<DeltasRecord, DocumentError> {
        self.clear_preview_deltas();
        let entry = self.redo.pop().ok_or(DocumentError::NothingToRedo)?;
        match self.replay_local(entry.clone()) {
            Ok(record) => {
                self.undo.push(entry);
                Ok(record)
            }
            Err(err) => {
                self.redo.push(entry);
                Err(err)
            }
        }
    }

    /// Applies `deltas` provisionally, replacing any earlier preview.
    ///
    /// No record is produced and nothing is derived; the next transaction, undo or
    /// [`Self::clear_preview_deltas`] reverts them.
    pub fn apply_preview_deltas(&mut self, deltas: Vec<Delta>) -> Result<(), DocumentError> {
        self.clear_preview_deltas();
        let checkpoint = self.checkpoint();
        let mut applied = Vec::new();
        if let Err(err) = self.apply_all(deltas, &mut applied) {
            self.roll_back(&applied, checkpoint);
            return Err(err);
        }
        self.preview = Some((applied, checkpoint));
        Ok(())
    }

    pub fn clear_preview_deltas(&mut self) {
        if let Some((applied, checkpoint)) = self.preview.take() {
            self.roll_back(&applied, checkpoint);
        }
    }

    /// Decides whether a record authored elsewhere can be applied here.
    pub fn reconcile_remote_record(&self, record: &DeltasRecord) -> Reconciliation {
        let latest = self.latest_verified_doc_hash();
        if record.prev_doc_hash == latest {
            return Reconciliation::Accepted(record.clone());
        }

        let start = if record.prev_doc_hash == self.base_hash {
            0
        } else {
            match self
                .verified
                .iter()
                .rposition(|verified| verified.total_hash == record.prev_doc_hash)
            {
                Some(pos) => pos + 1,
                None => {
                    return Reconciliation::Rejected(RejectReason::UnknownPredecessor(
                        record.prev_doc_hash,
                    ));
                }
            }
        };

        let mut since = AffectedResults::default();
        for verified in &self.verified[start..] {
            verified.gather_results(&mut since);
        }
        if record.conflicts_with_results(&since, self.config.conflict_bounds_epsilon) {
            debug!(origin = %record.origin_user_id, "remote record conflicts with verified history");
            Reconciliation::Rejected(RejectReason::Conflict)
        } else {
            Reconciliation::Rebased(record.rebased_onto(latest))
        }
    }

    /// Applies a remote record whose predecessor is the latest verified hash.
    ///
    /// The record is applied verbatim, without deriving side effects, and appended to
    /// the verified history. Local undo history is untouched.
    pub fn apply_remote_record(
        &mut self,
        record: DeltasRecord,
    ) -> Result<DeltasRecord, DocumentError> {
        let actual = self.latest_verified_doc_hash();
        if record.prev_doc_hash != actual {
            return Err(DocumentError::HashMismatch {
                expected: record.prev_doc_hash,
                actual,
            });
        }
        self.clear_preview_deltas();
        let deltas = record.decode_deltas(&self.registry)?;
        let results = self.apply_verbatim(deltas)?;
        let mut record = record;
        record.set_results(results);
        self.push_verified(record.clone());
        Ok(record)
    }

    /// Records that revert the latest verified record authored by `user`, newest first.
    ///
    /// The chain also reverts every later record that conflicts with one already in it,
    /// so that the inverses apply cleanly. Each returned record is hashed on top of the
    /// previous one, starting from the latest verified hash.
    pub fn undo_records_for_user(&self, user: &str) -> Result<Vec<DeltasRecord>, DocumentError> {
        let Some(start) = self
            .verified
            .iter()
            .rposition(|record| record.origin_user_id == user)
        else {
            return Ok(Vec::new());
        };

        let mut chained = AffectedResults::default();
        let mut picked = Vec::new();
        for (index, record) in self.verified.iter().enumerate().skip(start) {
            if index == start
                || record.conflicts_with_results(&chained, self.config.conflict_bounds_epsilon)
            {
                record.gather_results(&mut chained);
                picked.push(record);
            }
        }

        let mut prev = self.latest_verified_doc_hash();
        let mut inverses = Vec::with_capacity(picked.len());
        for record in picked.into_iter().rev() {
            let deltas = record.decode_deltas(&self.registry)?;
            let inverse: Vec<Delta> = deltas.iter().rev().map(Delta::make_inverse).collect();
            let mut undo = DeltasRecord::new(
                &self.registry,
                &inverse,
                UserId::from(user),
                prev,
                self.config.track_human_readable,
            )?;
            undo.set_results(record.results.clone());
            prev = undo.total_hash;
            inverses.push(undo);
        }
        Ok(inverses)
    }

    /// Re-applies a journaled record during recovery. Clears undo and redo history.
    pub fn apply_replayed_record(&mut self, stored: StoredRecord) -> Result<(), DocumentError> {
        let deltas = stored.record.decode_deltas(&self.registry)?;
        self.apply_verbatim(deltas)?;
        self.verified.push(stored.record);
        self.next_record_seq = self.next_record_seq.max(stored.seq.saturating_add(1));
        self.undo.clear();
        self.redo.clear();
        Ok(())
    }

    pub fn apply_mutation_delta(&mut self, delta: &MoiDelta) -> Result<(), DocumentError> {
        for (index, state) in delta.states.iter().enumerate() {
            if let Err(err) = self.apply_object_state(state) {
                for done in delta.states[..index].iter().rev() {
                    let inverse = MoiDeltaState {
                        old: done.new.clone(),
                        new: done.old.clone(),
                        kind: done.kind.inverse(),
                    };
                    if let Err(undo_err) = self.apply_object_state(&inverse) {
                        error!(id = done.old.id, %undo_err, "failed to roll back object change");
                    }
                }
                return Err(err);
            }
        }
        Ok(())
    }

    pub fn apply_preset_delta(&mut self, delta: &PresetDelta) -> Result<(), DocumentError> {
        Ok(self.presets.apply_delta(delta)?)
    }

    pub fn apply_graph3d_delta(&mut self, delta: &Graph3dDelta) -> Result<(), DocumentError> {
        apply_graph_delta(&mut self.volume_graphs, &mut self.arena, &self.registry, delta)
    }

    pub fn apply_graph2d_delta(&mut self, delta: &Graph2dDelta) -> Result<(), DocumentError> {
        apply_graph_delta(&mut self.surface_graphs, &mut self.arena, &self.registry, delta)
    }

    fn commit(
        &mut self,
        deltas: Vec<Delta>,
        side_effects: SideEffects,
    ) -> Result<Option<DeltasRecord>, DocumentError> {
        self.clear_preview_deltas();
        let originals: Vec<Delta> = deltas.into_iter().filter(|delta| !delta.is_empty()).collect();
        if originals.is_empty() {
            return Ok(None);
        }

        let derived = match side_effects {
            SideEffects::Derive => symbol::derive_deltas(self, &originals)?,
            SideEffects::Skip => symbol::DerivedDeltas::default(),
        };

        let checkpoint = self.checkpoint();
        let mut applied = Vec::with_capacity(originals.len() + derived.deltas.len());
        let outcome = self
            .apply_all(originals.into_iter().chain(derived.deltas), &mut applied)
            .and_then(|()| {
                let mut dirtied = BTreeSet::new();
                for mark in &derived.dirty_marks {
                    match *mark {
                        DirtyMark::Dirty(group) => {
                            self.dirty_groups.insert(group);
                            dirtied.insert(group);
                        }
                        DirtyMark::Clean(group) => {
                            self.dirty_groups.remove(&group);
                        }
                    }
                }
                if side_effects == SideEffects::Derive
                    && self.config.dirty_flush == DirtyFlush::EndOfTransaction
                    && !self.dirty_groups.is_empty()
                {
                    self.flush_dirty_into(&mut applied)?;
                }
                self.seal(&applied, dirtied)
            });

        match outcome {
            Ok(record) => {
                self.redo.clear();
                let record = self.finish_transaction(applied, record);
                debug!(
                    total_hash = record.total_hash,
                    deltas = record.deltas.len(),
                    "transaction committed"
                );
                Ok(Some(record))
            }
            Err(err) => {
                self.roll_back(&applied, checkpoint);
                warn!(%err, "transaction rolled back");
                Err(err)
            }
        }
    }

    /// Applies undo or redo deltas as their own record, without side effects.
    fn replay_local(&mut self, deltas: Vec<Delta>) -> Result<DeltasRecord, DocumentError> {
        let checkpoint = self.checkpoint();
        let mut applied = Vec::with_capacity(deltas.len());
        let outcome = self
            .apply_all(deltas, &mut applied)
            .and_then(|()| self.seal(&applied, BTreeSet::new()));
        match outcome {
            Ok(record) => {
                self.push_verified(record.clone());
                Ok(record)
            }
            Err(err) => {
                self.roll_back(&applied, checkpoint);
                warn!(%err, "undo/redo rolled back");
                Err(err)
            }
        }
    }

    fn apply_verbatim(&mut self, deltas: Vec<Delta>) -> Result<AffectedResults, DocumentError> {
        let checkpoint = self.checkpoint();
        let mut applied = Vec::with_capacity(deltas.len());
        if let Err(err) = self.apply_all(deltas, &mut applied) {
            self.roll_back(&applied, checkpoint);
            return Err(err);
        }
        Ok(self.results_for(&applied, BTreeSet::new()))
    }

    fn flush_dirty_into(&mut self, applied: &mut Vec<Delta>) -> Result<(), DocumentError> {
        let dirty = self.dirty_groups.clone();
        let deltas = symbol::propagate_all_dirty(self, &dirty)?;
        self.apply_all(deltas, applied)?;
        self.dirty_groups.clear();
        Ok(())
    }

    fn apply_all(
        &mut self,
        deltas: impl IntoIterator<Item = Delta>,
        applied: &mut Vec<Delta>,
    ) -> Result<(), DocumentError> {
        for delta in deltas {
            if delta.is_empty() {
                continue;
            }
            delta.apply_to(self)?;
            applied.push(delta);
        }
        Ok(())
    }

    fn roll_back(&mut self, applied: &[Delta], checkpoint: Checkpoint) {
        for delta in applied.iter().rev() {
            if let Err(err) = delta.make_inverse().apply_to(self) {
                error!(%err, "failed to revert applied delta");
            }
        }
        self.arena.set_next_id(checkpoint.next_id);
        self.dirty_groups = checkpoint.dirty_groups;
    }

    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            next_id: self.arena.next_id(),
            dirty_groups: self.dirty_groups.clone(),
        }
    }

    fn seal(
        &self,
        applied: &[Delta],
        dirtied: BTreeSet<ObjId>,
    ) -> Result<DeltasRecord, DocumentError> {
        let mut record = DeltasRecord::new(
            &self.registry,
            applied,
            self.config.local_user_id.clone(),
            self.latest_verified_doc_hash(),
            self.config.track_human_readable,
        )?;
        record.set_results(self.results_for(applied, dirtied));
        Ok(record)
    }

    fn results_for(&self, applied: &[Delta], dirtied: BTreeSet<ObjId>) -> AffectedResults {
        let mut results = AffectedResults::from_deltas(applied);
        results.dirtied = dirtied;
        for delta in applied {
            match delta {
                Delta::Graph3d(delta) => {
                    touching_moved(self.volume_graphs.get(&delta.graph_id), delta, &mut results.modified)
                }
                Delta::Graph2d(delta) => {
                    touching_moved(self.surface_graphs.get(&delta.graph_id), delta, &mut results.modified)
                }
                _ => {}
            }
        }
        results
    }

    fn finish_transaction(&mut self, applied: Vec<Delta>, record: DeltasRecord) -> DeltasRecord {
        self.push_verified(record.clone());
        self.undo.push(applied);
        let depth = self.config.max_undo_depth;
        if depth > 0 && self.undo.len() > depth {
            let excess = self.undo.len() - depth;
            self.undo.drain(..excess);
        }
        record
    }

    fn push_verified(&mut self, record: DeltasRecord) {
        let seq = self.next_record_seq;
        self.next_record_seq += 1;
        self.verified.push(record.clone());
        self.pending_records.push(StoredRecord { seq, record });
    }

    fn apply_object_state(&mut self, state: &MoiDeltaState) -> Result<(), DocumentError> {
        match state.kind {
            DeltaKind::Create => self.create_object(state.new.clone()),
            DeltaKind::Destroy => self.destroy_object(state.old.id),
            DeltaKind::Mutate => self.mutate_object(&state.old, state.new.clone()),
        }
    }

    fn create_object(&mut self, state: MoiState) -> Result<(), DocumentError> {
        if self.arena.contains(state.id) {
            return Err(DocumentError::ObjectExists(state.id));
        }
        if state.object_type.is_graph_element() {
            return Err(DocumentError::GraphOwned(state.id));
        }
        match state.object_type {
            ObjectType::MetaGraph => {
                self.volume_graphs.entry(state.id).or_default();
            }
            ObjectType::SurfaceGraph => {
                self.surface_graphs.entry(state.id).or_default();
            }
            _ => {}
        }
        self.arena.insert(state);
        Ok(())
    }

    fn destroy_object(&mut self, id: ObjId) -> Result<(), DocumentError> {
        if id == ROOT_GRAPH_ID {
            return Err(DocumentError::RootGraph);
        }
        let object_type = self
            .arena
            .get(id)
            .ok_or(DocumentError::MissingObject(id))?
            .object_type;
        match object_type {
            t if t.is_graph_element() => return Err(DocumentError::GraphOwned(id)),
            ObjectType::MetaGraph => {
                if self.volume_graphs.get(&id).is_some_and(|g| !g.is_empty()) {
                    return Err(DocumentError::GraphNotEmpty(id));
                }
                self.volume_graphs.remove(&id);
            }
            ObjectType::SurfaceGraph => {
                if self.surface_graphs.get(&id).is_some_and(|g| !g.is_empty()) {
                    return Err(DocumentError::GraphNotEmpty(id));
                }
                self.surface_graphs.remove(&id);
            }
            _ => {}
        }
        self.arena.remove(id);
        Ok(())
    }

    fn mutate_object(&mut self, old: &MoiState, new: MoiState) -> Result<(), DocumentError> {
        if old.id != new.id {
            return Err(DocumentError::IdChanged {
                old: old.id,
                new: new.id,
            });
        }
        let current = self
            .arena
            .get(new.id)
            .ok_or(DocumentError::MissingObject(new.id))?;
        if current.object_type != new.object_type {
            return Err(DocumentError::TypeChanged(new.id));
        }
        self.arena.replace(new);
        Ok(())
    }
}

impl DocumentView for Document {
    fn object_by_id(&self, id: ObjId) -> Option<&MoiState> {
        self.arena.get(id)
    }

    fn child_ids(&self, id: ObjId) -> Vec<ObjId> {
        let mut ids = self.arena.children_of(id).to_vec();
        ids.sort_unstable();
        ids
    }

    fn objects_of_type(&self, object_type: ObjectType) -> Vec<ObjId> {
        self.arena.of_type(object_type)
    }

    fn preset_collection(&self) -> &PresetCollection {
        &self.presets
    }

    fn find_volume_graph(&self, group_id: ObjId) -> Option<&Graph3d> {
        self.volume_graphs.get(&group_id)
    }

    fn find_surface_graph(&self, surface_graph_id: ObjId) -> Option<&Graph2d> {
        self.surface_graphs.get(&surface_graph_id)
    }

    fn root_volume_graph_id(&self) -> ObjId {
        ROOT_GRAPH_ID
    }

    fn next_available_id(&self) -> ObjId {
        self.arena.next_id()
    }

    fn type_registry(&self) -> &TypeRegistry {
        &self.registry
    }
}

/// Applies `delta` to its graph and keeps the element mirror objects in step.
fn apply_graph_delta<P: GraphPosition>(
    graphs: &mut HashMap<ObjId, Graph<P>>,
    arena: &mut ObjectArena,
    registry: &TypeRegistry,
    delta: &GraphDelta<P>,
) -> Result<(), DocumentError> {
    let graph = graphs
        .get_mut(&delta.graph_id)
        .ok_or(DocumentError::MissingGraph(delta.graph_id))?;

    let additions = delta
        .vertex_additions
        .keys()
        .map(|id| (*id, P::VERTEX_TYPE))
        .chain(delta.edge_additions.keys().map(|id| (*id, P::EDGE_TYPE)))
        .chain(delta.face_additions.keys().map(|id| (*id, P::FACE_TYPE)));
    let mut mirrors = Vec::new();
    for (id, object_type) in additions {
        if arena.contains(id) {
            return Err(DocumentError::ObjectExists(id));
        }
        let mirror = match arena.retired(id) {
            Some(state) if state.object_type == object_type && state.parent_id == delta.graph_id => {
                state.clone()
            }
            _ => MoiState::graph_element(registry, id, object_type, delta.graph_id)?,
        };
        mirrors.push(mirror);
    }

    graph.apply(delta)?;

    for mirror in mirrors {
        arena.forget_retired(mirror.id);
        arena.insert(mirror);
    }
    let deletions = delta
        .vertex_deletions
        .keys()
        .chain(delta.edge_deletions.keys())
        .chain(delta.face_deletions.keys());
    for id in deletions {
        arena.retire(*id);
    }
    Ok(())
}

fn touching_moved<P: GraphPosition>(
    graph: Option<&Graph<P>>,
    delta: &GraphDelta<P>,
    into: &mut BTreeSet<ObjId>,
) {
    let Some(graph) = graph else {
        return;
    };
    for vertex in delta.vertex_movements.keys() {
        into.extend(graph.elements_touching(*vertex));
    }
}
