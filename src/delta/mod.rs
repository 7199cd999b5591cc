//! The closed set of invertible, serializable document changes.

mod graph;
mod moi;
mod preset;

pub use graph::{Graph2dDelta, Graph3dDelta, GraphDelta};
pub use moi::{MoiDelta, MoiDeltaState};
pub use preset::PresetDelta;

use crate::{
    core::{Document, DocumentError, DocumentView},
    math::{Aabb, union_bounds},
    symbol::{self, Derivation, SymbolError},
    types::{DeltaKind, Guid, ObjId},
    wrapper::{StructDataWrapper, TypeRegistry, WrappedStruct, WrapperError},
};

#[derive(Debug, Clone, PartialEq)]
pub enum Delta {
    Moi(MoiDelta),
    Preset(PresetDelta),
    Graph3d(Graph3dDelta),
    Graph2d(Graph2dDelta),
}

impl From<MoiDelta> for Delta {
    fn from(value: MoiDelta) -> Self {
        Self::Moi(value)
    }
}

impl From<PresetDelta> for Delta {
    fn from(value: PresetDelta) -> Self {
        Self::Preset(value)
    }
}

impl From<Graph3dDelta> for Delta {
    fn from(value: Graph3dDelta) -> Self {
        Self::Graph3d(value)
    }
}

impl From<Graph2dDelta> for Delta {
    fn from(value: Graph2dDelta) -> Self {
        Self::Graph2d(value)
    }
}

impl Delta {
    /// Applies this delta in full or leaves `document` untouched.
    pub fn apply_to(&self, document: &mut Document) -> Result<(), DocumentError> {
        match self {
            Self::Moi(delta) => document.apply_mutation_delta(delta),
            Self::Preset(delta) => document.apply_preset_delta(delta),
            Self::Graph3d(delta) => document.apply_graph3d_delta(delta),
            Self::Graph2d(delta) => document.apply_graph2d_delta(delta),
        }
    }

    pub fn make_inverse(&self) -> Self {
        match self {
            Self::Moi(delta) => Self::Moi(delta.make_inverse()),
            Self::Preset(delta) => Self::Preset(delta.make_inverse()),
            Self::Graph3d(delta) => Self::Graph3d(delta.make_inverse()),
            Self::Graph2d(delta) => Self::Graph2d(delta.make_inverse()),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Moi(delta) => delta.is_empty(),
            Self::Preset(delta) => delta.is_empty(),
            Self::Graph3d(delta) => delta.is_empty(),
            Self::Graph2d(delta) => delta.is_empty(),
        }
    }

    /// Wraps the concrete delta, tagged with its type name.
    pub fn serialize_struct(
        &self,
        registry: &TypeRegistry,
        save_json: bool,
    ) -> Result<StructDataWrapper, WrapperError> {
        let mut wrapper = StructDataWrapper::default();
        match self {
            Self::Moi(delta) => wrapper.save(registry, delta, save_json)?,
            Self::Preset(delta) => wrapper.save(registry, delta, save_json)?,
            Self::Graph3d(delta) => wrapper.save(registry, delta, save_json)?,
            Self::Graph2d(delta) => wrapper.save(registry, delta, save_json)?,
        }
        Ok(wrapper)
    }

    /// Inverse of [`Self::serialize_struct`]. Accepts wrappers that only carry the JSON form.
    pub fn from_struct(
        wrapper: &StructDataWrapper,
        registry: &TypeRegistry,
    ) -> Result<Self, WrapperError> {
        let mut owned: StructDataWrapper;
        let wrapper = if wrapper.is_valid() {
            wrapper
        } else {
            owned = wrapper.clone();
            owned.ensure_binary(registry)?;
            &owned
        };

        let name = wrapper.struct_name();
        if name == MoiDelta::TYPE_NAME {
            Ok(Self::Moi(wrapper.load()?))
        } else if name == PresetDelta::TYPE_NAME {
            Ok(Self::Preset(wrapper.load()?))
        } else if name == Graph3dDelta::TYPE_NAME {
            Ok(Self::Graph3d(wrapper.load()?))
        } else if name == Graph2dDelta::TYPE_NAME {
            Ok(Self::Graph2d(wrapper.load()?))
        } else {
            Err(WrapperError::Unregistered(name.to_string()))
        }
    }

    /// Every object this delta creates, destroys or mutates.
    pub fn affected_objects(&self) -> Vec<(ObjId, DeltaKind)> {
        match self {
            Self::Moi(delta) => delta.affected_objects(),
            Self::Preset(_) => Vec::new(),
            Self::Graph3d(delta) => delta.affected_objects(),
            Self::Graph2d(delta) => delta.affected_objects(),
        }
    }

    pub fn affected_presets(&self) -> Vec<Guid> {
        match self {
            Self::Preset(delta) => delta.guid().into_iter().collect(),
            _ => Vec::new(),
        }
    }

    pub fn affected_bounds(&self) -> Option<Aabb> {
        match self {
            Self::Moi(delta) => delta.affected_bounds(),
            Self::Preset(_) => None,
            Self::Graph3d(delta) => delta.affected_bounds(),
            Self::Graph2d(delta) => delta.affected_bounds(),
        }
    }

    /// Feeds Symbol side effects of this delta into `out`.
    ///
    /// Object triples are filtered by `kind`; `None` processes all of them. Graph deltas
    /// take part in the mutate pass and preset deletions in the destroy pass.
    pub fn derived_deltas<V: DocumentView + ?Sized>(
        &self,
        view: &V,
        kind: Option<DeltaKind>,
        out: &mut Derivation<'_>,
    ) -> Result<(), SymbolError> {
        let wants = |k: DeltaKind| kind.is_none_or(|requested| requested == k);
        match self {
            Self::Moi(delta) => {
                for state in delta.states.iter().filter(|s| wants(s.kind)) {
                    symbol::derive_for_moi(view, state, out)?;
                }
            }
            Self::Graph3d(delta) if wants(DeltaKind::Mutate) => {
                symbol::derive_for_graph3d(view, delta, out)?;
            }
            Self::Graph2d(delta) if wants(DeltaKind::Mutate) => {
                symbol::derive_for_graph2d(view, delta, out)?;
            }
            Self::Preset(delta) if wants(DeltaKind::Destroy) => {
                symbol::derive_for_preset(view, delta, out)?;
            }
            _ => {}
        }
        Ok(())
    }
}

/// Bounds over a whole delta list.
pub fn bounds_of(deltas: &[Delta]) -> Option<Aabb> {
    deltas
        .iter()
        .fold(None, |acc, delta| union_bounds(acc, delta.affected_bounds()))
}
