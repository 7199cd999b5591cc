use serde::{Deserialize, Serialize};

use crate::{
    math::Aabb,
    state::MoiState,
    types::{DeltaKind, ObjId},
    wrapper::WrappedStruct,
};

/// One object change. For Create and Destroy `old == new`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoiDeltaState {
    pub old: MoiState,
    pub new: MoiState,
    pub kind: DeltaKind,
}

/// Ordered list of object creations, destructions and mutations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoiDelta {
    pub states: Vec<MoiDeltaState>,
}

impl WrappedStruct for MoiDelta {
    const TYPE_NAME: &'static str = "MoiDelta";
}

impl MoiDelta {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the creation or destruction of `state`.
    ///
    /// # Panics
    ///
    /// If `kind` is [`DeltaKind::Mutate`] or `state` carries no valid custom data.
    pub fn add_create_destroy(&mut self, state: MoiState, kind: DeltaKind) -> &mut Self {
        assert!(kind != DeltaKind::Mutate, "use add_mutation for mutations");
        assert!(
            state.custom_data.is_valid(),
            "object {} has no custom data",
            state.id
        );
        self.states.push(MoiDeltaState {
            old: state.clone(),
            new: state,
            kind,
        });
        self
    }

    /// Records `old -> new` unless they are equal. Returns whether a triple was appended.
    ///
    /// # Panics
    ///
    /// If the two states have different IDs.
    pub fn add_mutation(&mut self, old: MoiState, new: MoiState) -> bool {
        assert_eq!(old.id, new.id, "a mutation cannot change the object id");
        if old == new {
            return false;
        }
        self.states.push(MoiDeltaState {
            old,
            new,
            kind: DeltaKind::Mutate,
        });
        true
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn make_inverse(&self) -> Self {
        let states = self
            .states
            .iter()
            .rev()
            .map(|s| MoiDeltaState {
                old: s.new.clone(),
                new: s.old.clone(),
                kind: s.kind.inverse(),
            })
            .collect();
        Self { states }
    }

    pub fn affected_objects(&self) -> Vec<(ObjId, DeltaKind)> {
        self.states.iter().map(|s| (s.old.id, s.kind)).collect()
    }

    /// Bounds of every placement touched, before and after.
    pub fn affected_bounds(&self) -> Option<Aabb> {
        Aabb::from_points(
            self.states
                .iter()
                .flat_map(|s| [s.old.placement(), s.new.placement()])
                .flatten()
                .map(|t| t.translation),
        )
    }
}
