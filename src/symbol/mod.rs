//! Symbols: groups whose content is shared by every instance through a catalog preset.
//!
//! Edits to one instance are turned into extra deltas that replay the edit on every
//! equivalent object and keep the Symbol's canonical data current. Structural edits that
//! cannot be replayed element by element mark the instance dirty instead; dirty instances
//! are later copied over every other instance wholesale.

mod create;
mod derive;
mod instance;
mod propagate;

use std::collections::BTreeSet;

use thiserror::Error;
use tracing::error;

pub use create::{create_deltas_for_new_symbol, create_preset_data_for_symbol};
pub(crate) use derive::{derive_for_graph2d, derive_for_graph3d, derive_for_moi, derive_for_preset};
pub use instance::create_deltas_for_symbol_instance;
pub use propagate::{
    all_root_groups_for_symbol, detach_symbol, graph_delete_recursive, propagate_all_dirty,
    walk_group, GroupContents,
};

use crate::{
    core::DocumentView,
    delta::Delta,
    math::Transform,
    preset::{PresetCollectionProxy, SymbolPresetData},
    state::MoiState,
    types::{DeltaKind, Guid, ObjId},
    wrapper::{TypeRegistry, WrapperError},
};

#[derive(Debug, Error)]
pub enum SymbolError {
    #[error("symbol preset {0} does not exist")]
    MissingPreset(Guid),
    #[error("preset {0} carries no symbol data")]
    NotASymbol(Guid),
    #[error("symbol {guid} has no member record for {id}")]
    MissingMember { guid: Guid, id: ObjId },
    #[error("symbol {guid} has no graph record for {graph}")]
    MissingGraph { guid: Guid, graph: ObjId },
    #[error("symbol {guid} has no equivalence entry for {id}")]
    MissingEquivalence { guid: Guid, id: ObjId },
    #[error("object {0} is not a group")]
    NotAGroup(ObjId),
    #[error("group {0} already instances a symbol")]
    AlreadySymbol(ObjId),
    #[error("group {0} does not instance a symbol")]
    NotSymbolInstance(ObjId),
    #[error("the root graph cannot be part of a symbol operation")]
    RootGroup,
    #[error("group {0} has no volume graph")]
    MissingVolumeGraph(ObjId),
    #[error("surface graph {0} does not exist")]
    MissingSurfaceGraph(ObjId),
    #[error("symbol content references {0}, which the instance does not map")]
    UnmappedReference(ObjId),
    #[error(transparent)]
    Wrapper(#[from] WrapperError),
}

/// Change to a group's dirty flag requested by a derivation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirtyMark {
    Dirty(ObjId),
    Clean(ObjId),
}

/// Deltas and dirty-flag changes produced for one transaction.
#[derive(Debug, Default)]
pub struct DerivedDeltas {
    pub deltas: Vec<Delta>,
    pub dirty_marks: Vec<DirtyMark>,
}

/// Symbol data read through, and written back into, a preset proxy.
///
/// Several edits in one pass see each other's updates; the base catalog stays untouched
/// until the resulting preset deltas are applied.
#[derive(Debug)]
pub(crate) struct SymbolCatalog<'a> {
    registry: &'a TypeRegistry,
    proxy: PresetCollectionProxy<'a>,
}

impl<'a> SymbolCatalog<'a> {
    pub(crate) fn new<V: DocumentView + ?Sized>(view: &'a V) -> Self {
        Self {
            registry: view.type_registry(),
            proxy: PresetCollectionProxy::new(view.preset_collection()),
        }
    }

    pub(crate) fn registry(&self) -> &'a TypeRegistry {
        self.registry
    }

    pub(crate) fn symbol_data(&self, guid: Guid) -> Result<SymbolPresetData, SymbolError> {
        self.proxy
            .preset_from_guid(&guid)
            .ok_or(SymbolError::MissingPreset(guid))?
            .try_get_custom_data::<SymbolPresetData>()
            .ok_or(SymbolError::NotASymbol(guid))
    }

    pub(crate) fn store_symbol_data(
        &mut self,
        guid: Guid,
        data: &SymbolPresetData,
    ) -> Result<(), SymbolError> {
        let mut preset = self
            .proxy
            .preset_from_guid(&guid)
            .cloned()
            .ok_or(SymbolError::MissingPreset(guid))?;
        preset.set_custom_data(self.registry, data)?;
        self.proxy.set_preset(preset);
        Ok(())
    }

    pub(crate) fn into_deltas(self) -> impl Iterator<Item = Delta> {
        self.proxy.into_deltas().into_iter().map(Delta::from)
    }
}

/// Accumulates the side effects of one transaction.
#[derive(Debug)]
pub struct Derivation<'a> {
    catalog: SymbolCatalog<'a>,
    deltas: Vec<Delta>,
    dirty_marks: Vec<DirtyMark>,
    destroyed: BTreeSet<ObjId>,
}

impl<'a> Derivation<'a> {
    pub fn new<V: DocumentView + ?Sized>(view: &'a V) -> Self {
        Self {
            catalog: SymbolCatalog::new(view),
            deltas: Vec::new(),
            dirty_marks: Vec::new(),
            destroyed: BTreeSet::new(),
        }
    }

    /// Objects destroyed by `originals` are never the target of a derived mutation.
    pub fn excluding_destroyed(mut self, originals: &[Delta]) -> Self {
        self.destroyed = originals
            .iter()
            .flat_map(Delta::affected_objects)
            .filter(|(_, kind)| *kind == DeltaKind::Destroy)
            .map(|(id, _)| id)
            .collect();
        self
    }

    pub(crate) fn is_destroyed(&self, id: ObjId) -> bool {
        self.destroyed.contains(&id)
    }

    pub(crate) fn catalog(&mut self) -> &mut SymbolCatalog<'a> {
        &mut self.catalog
    }

    pub(crate) fn registry(&self) -> &'a TypeRegistry {
        self.catalog.registry()
    }

    pub(crate) fn push(&mut self, delta: impl Into<Delta>) {
        let delta = delta.into();
        if !delta.is_empty() {
            self.deltas.push(delta);
        }
    }

    pub(crate) fn dirty(&mut self, group_id: ObjId) {
        self.dirty_marks.push(DirtyMark::Dirty(group_id));
    }

    pub(crate) fn clean(&mut self, group_id: ObjId) {
        self.dirty_marks.push(DirtyMark::Clean(group_id));
    }

    /// Object deltas in derivation order, then one update per touched Symbol preset.
    pub fn finish(self) -> DerivedDeltas {
        let mut deltas = self.deltas;
        deltas.extend(self.catalog.into_deltas());
        DerivedDeltas {
            deltas,
            dirty_marks: self.dirty_marks,
        }
    }
}

/// Side effects of `originals`, computed against the state before any of them applies.
///
/// Destructions are handled first, then mutations, then creations.
pub fn derive_deltas<V: DocumentView + ?Sized>(
    view: &V,
    originals: &[Delta],
) -> Result<DerivedDeltas, SymbolError> {
    let mut out = Derivation::new(view).excluding_destroyed(originals);
    for kind in [DeltaKind::Destroy, DeltaKind::Mutate, DeltaKind::Create] {
        for delta in originals {
            delta
                .derived_deltas(view, Some(kind), &mut out)
                .inspect_err(|err| error!(%err, "symbol side effects could not be derived"))?;
        }
    }
    Ok(out.finish())
}

/// Composes the placement of `state`, if it has one, with `transform`.
///
/// A transform within tolerance of the identity leaves the payload bytes untouched.
pub(crate) fn reposition(
    registry: &TypeRegistry,
    state: &mut MoiState,
    transform: &Transform,
) -> Result<(), SymbolError> {
    if transform.is_identity() {
        return Ok(());
    }
    if let Some(placement) = state.placement() {
        state.set_placement(registry, &placement.then(transform))?;
    }
    Ok(())
}

/// IDs equivalent to `id`, excluding `id` itself.
pub(crate) fn equivalents_of(data: &SymbolPresetData, primary: ObjId, id: ObjId) -> Vec<ObjId> {
    data.equivalent_ids
        .get(&primary)
        .into_iter()
        .flatten()
        .copied()
        .filter(|other| *other != id)
        .collect()
}
