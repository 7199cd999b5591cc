use hashbrown::HashMap;

use crate::{
    state::MoiState,
    types::{ObjId, ObjectType},
};

pub type ChildIndex = HashMap<ObjId, Vec<ObjId>>;

/// Live objects keyed by ID, plus the mirror objects of graph elements that have been
/// removed from their graph and may come back through an inverse delta.
#[derive(Debug, Clone, Default)]
pub struct ObjectArena {
    objects: HashMap<ObjId, MoiState>,
    children: ChildIndex,
    retired: HashMap<ObjId, MoiState>,
    next_id: ObjId,
}

impl ObjectArena {
    pub fn new(next_id: ObjId) -> Self {
        Self {
            next_id,
            ..Self::default()
        }
    }

    pub fn get(&self, id: ObjId) -> Option<&MoiState> {
        self.objects.get(&id)
    }

    pub fn contains(&self, id: ObjId) -> bool {
        self.objects.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn next_id(&self) -> ObjId {
        self.next_id
    }

    pub fn set_next_id(&mut self, next_id: ObjId) {
        self.next_id = next_id;
    }

    /// Adds `state`; the caller has checked that its ID is free.
    pub fn insert(&mut self, state: MoiState) {
        let id = state.id;
        self.next_id = self.next_id.max(id.saturating_add(1));
        self.children.entry(state.parent_id).or_default().push(id);
        self.objects.insert(id, state);
    }

    pub fn remove(&mut self, id: ObjId) -> Option<MoiState> {
        let state = self.objects.remove(&id)?;
        if let Some(siblings) = self.children.get_mut(&state.parent_id) {
            Self::remove_from_vec_index(siblings, id);
        }
        Some(state)
    }

    /// Swaps in `state` for the live object with the same ID, keeping the child index current.
    pub fn replace(&mut self, state: MoiState) -> Option<MoiState> {
        let previous = self.objects.get_mut(&state.id)?;
        let old = std::mem::replace(previous, state);
        let new_parent = self.objects[&old.id].parent_id;
        if old.parent_id != new_parent {
            if let Some(siblings) = self.children.get_mut(&old.parent_id) {
                Self::remove_from_vec_index(siblings, old.id);
            }
            self.children.entry(new_parent).or_default().push(old.id);
        }
        Some(old)
    }

    /// Moves a live object into the retired table.
    pub fn retire(&mut self, id: ObjId) -> bool {
        match self.remove(id) {
            Some(state) => {
                self.retired.insert(id, state);
                true
            }
            None => false,
        }
    }

    pub fn retired(&self, id: ObjId) -> Option<&MoiState> {
        self.retired.get(&id)
    }

    pub fn forget_retired(&mut self, id: ObjId) {
        self.retired.remove(&id);
    }

    pub fn children_of(&self, id: ObjId) -> &[ObjId] {
        self.children.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn of_type(&self, object_type: ObjectType) -> Vec<ObjId> {
        let mut ids: Vec<ObjId> = self
            .objects
            .values()
            .filter(|state| state.object_type == object_type)
            .map(|state| state.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn objects(&self) -> impl Iterator<Item = &MoiState> {
        self.objects.values()
    }

    pub fn retired_objects(&self) -> impl Iterator<Item = &MoiState> {
        self.retired.values()
    }

    pub fn restore_retired(&mut self, state: MoiState) {
        self.retired.insert(state.id, state);
    }

    fn remove_from_vec_index(v: &mut Vec<ObjId>, id: ObjId) {
        if let Some(pos) = v.iter().position(|x| *x == id) {
            v.remove(pos);
        }
    }
}

