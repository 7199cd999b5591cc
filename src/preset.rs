//! Catalog entries, the catalog itself, and the canonical content of Symbols.

use std::collections::{BTreeMap, BTreeSet};

use glam::DVec3;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    delta::PresetDelta,
    graph::{Graph2d, Graph3d},
    state::MoiState,
    types::{Guid, ObjId, ObjectType},
    wrapper::{StructDataWrapper, TypeRegistry, WrappedStruct, WrapperError},
};

/// Tag path under which Symbol presets are filed.
pub const SYMBOL_NCP: &str = "Symbol";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PresetError {
    #[error("preset {0} does not exist")]
    Missing(Guid),
    #[error("preset {0} already exists")]
    Exists(Guid),
    #[error("preset delta changes guid from {old} to {new}")]
    GuidChanged { old: Guid, new: Guid },
    #[error("preset delta has neither an old nor a new value")]
    Empty,
}

/// One versioned catalog entry. Custom data is keyed by wrapped type name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preset {
    pub guid: Guid,
    pub display_name: String,
    pub tag_path: String,
    pub object_type: ObjectType,
    pub version: u32,
    pub custom_data: BTreeMap<String, StructDataWrapper>,
}

impl Preset {
    pub fn new(
        guid: Guid,
        display_name: impl Into<String>,
        tag_path: impl Into<String>,
        object_type: ObjectType,
    ) -> Self {
        Self {
            guid,
            display_name: display_name.into(),
            tag_path: tag_path.into(),
            object_type,
            version: 1,
            custom_data: BTreeMap::new(),
        }
    }

    /// Decoded custom data of type `T`, if present and well-formed.
    pub fn try_get_custom_data<T: WrappedStruct>(&self) -> Option<T> {
        self.custom_data
            .get(T::TYPE_NAME)
            .and_then(|wrapper| wrapper.load().ok())
    }

    pub fn set_custom_data<T: WrappedStruct>(
        &mut self,
        registry: &TypeRegistry,
        data: &T,
    ) -> Result<(), WrapperError> {
        let wrapper = StructDataWrapper::new(registry, data)?;
        self.custom_data.insert(T::TYPE_NAME.to_string(), wrapper);
        Ok(())
    }

    fn is_under_ncp(&self, tag_path: &str) -> bool {
        self.tag_path == tag_path
            || self
                .tag_path
                .strip_prefix(tag_path)
                .is_some_and(|rest| rest.starts_with('_'))
    }
}

/// GUID-keyed catalog. Mutated only through [`PresetDelta`]s.
#[derive(Debug, Clone, Default)]
pub struct PresetCollection {
    presets: HashMap<Guid, Preset>,
}

impl PresetCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_presets(presets: impl IntoIterator<Item = Preset>) -> Self {
        Self {
            presets: presets.into_iter().map(|p| (p.guid, p)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.presets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }

    pub fn preset_from_guid(&self, guid: &Guid) -> Option<&Preset> {
        self.presets.get(guid)
    }

    /// All presets ordered by GUID.
    pub fn presets(&self) -> Vec<&Preset> {
        let mut out: Vec<&Preset> = self.presets.values().collect();
        out.sort_by_key(|p| p.guid);
        out
    }

    /// Delta replacing the stored preset with `updated`.
    pub fn make_update_delta(&self, updated: Preset) -> PresetDelta {
        PresetDelta {
            old: self.presets.get(&updated.guid).cloned(),
            new: Some(updated),
        }
    }

    /// Delta adding `preset`, assigning a fresh GUID when it has none.
    pub fn make_create_new_delta(&self, mut preset: Preset) -> PresetDelta {
        if preset.guid.is_nil() {
            preset.guid = Guid::new_v4();
        }
        PresetDelta {
            old: None,
            new: Some(preset),
        }
    }

    pub fn make_delete_delta(&self, guid: &Guid) -> Option<PresetDelta> {
        self.presets.get(guid).map(|old| PresetDelta {
            old: Some(old.clone()),
            new: None,
        })
    }

    /// GUIDs of presets filed at `tag_path` or below it, in GUID order.
    pub fn presets_for_ncp(&self, tag_path: &str) -> Vec<Guid> {
        let mut out: Vec<Guid> = self
            .presets
            .values()
            .filter(|p| p.is_under_ncp(tag_path))
            .map(|p| p.guid)
            .collect();
        out.sort();
        out
    }

    pub fn apply_delta(&mut self, delta: &PresetDelta) -> Result<(), PresetError> {
        match (&delta.old, &delta.new) {
            (None, None) => Err(PresetError::Empty),
            (None, Some(new)) => {
                if self.presets.contains_key(&new.guid) {
                    return Err(PresetError::Exists(new.guid));
                }
                self.presets.insert(new.guid, new.clone());
                Ok(())
            }
            (Some(old), None) => self
                .presets
                .remove(&old.guid)
                .map(|_| ())
                .ok_or(PresetError::Missing(old.guid)),
            (Some(old), Some(new)) => {
                if old.guid != new.guid {
                    return Err(PresetError::GuidChanged {
                        old: old.guid,
                        new: new.guid,
                    });
                }
                let slot = self
                    .presets
                    .get_mut(&new.guid)
                    .ok_or(PresetError::Missing(new.guid))?;
                *slot = new.clone();
                Ok(())
            }
        }
    }
}

/// Read-through, write-buffered view over a [`PresetCollection`].
///
/// Writes never reach the base collection; [`Self::into_deltas`] turns them into deltas.
#[derive(Debug)]
pub struct PresetCollectionProxy<'a> {
    base: &'a PresetCollection,
    overrides: BTreeMap<Guid, Preset>,
}

impl<'a> PresetCollectionProxy<'a> {
    pub fn new(base: &'a PresetCollection) -> Self {
        Self {
            base,
            overrides: BTreeMap::new(),
        }
    }

    pub fn preset_from_guid(&self, guid: &Guid) -> Option<&Preset> {
        self.overrides
            .get(guid)
            .or_else(|| self.base.preset_from_guid(guid))
    }

    pub fn set_preset(&mut self, preset: Preset) {
        self.overrides.insert(preset.guid, preset);
    }

    pub fn is_modified(&self, guid: &Guid) -> bool {
        self.overrides.contains_key(guid)
    }

    /// One update delta per buffered preset that differs from the base collection.
    pub fn into_deltas(self) -> Vec<PresetDelta> {
        let base = self.base;
        self.overrides
            .into_values()
            .filter(|preset| base.preset_from_guid(&preset.guid) != Some(preset))
            .map(|preset| base.make_update_delta(preset))
            .collect()
    }
}

/// Canonical content of one Symbol.
///
/// `members` holds the primary copy of every non-graph member object; `equivalent_ids`
/// maps each primary ID to the IDs standing for the same element in every instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SymbolPresetData {
    pub members: BTreeMap<ObjId, MoiState>,
    pub graphs: BTreeMap<ObjId, Graph3d>,
    pub surface_graphs: BTreeMap<ObjId, Graph2d>,
    pub equivalent_ids: BTreeMap<ObjId, BTreeSet<ObjId>>,
    pub anchor: DVec3,
    pub root_graph: ObjId,
}

impl WrappedStruct for SymbolPresetData {
    const TYPE_NAME: &'static str = "SymbolPresetData";
}

impl SymbolPresetData {
    /// Primary ID of the equivalence set containing `id`.
    pub fn primary_for(&self, id: ObjId) -> Option<ObjId> {
        self.equivalent_ids
            .iter()
            .find(|(_, ids)| ids.contains(&id))
            .map(|(primary, _)| *primary)
    }

    /// Drops every ID in `removed` from the equivalence sets. Returns whether anything changed.
    pub fn remove_group_members(&mut self, removed: &BTreeSet<ObjId>) -> bool {
        let mut changed = false;
        for ids in self.equivalent_ids.values_mut() {
            let before = ids.len();
            ids.retain(|id| !removed.contains(id));
            changed |= ids.len() != before;
        }
        changed
    }

    /// Lowest-x, then highest-y, then lowest-z vertex over all graphs.
    pub fn compute_anchor(&self) -> DVec3 {
        let mut anchor: Option<DVec3> = None;
        for position in self.graphs.values().flat_map(|g| g.vertices.values()) {
            let better = match anchor {
                None => true,
                Some(a) => {
                    position.x < a.x
                        || (position.x == a.x && position.y > a.y)
                        || (position.x == a.x && position.y == a.y && position.z < a.z)
                }
            };
            if better {
                anchor = Some(*position);
            }
        }
        anchor.unwrap_or(DVec3::ZERO)
    }
}
