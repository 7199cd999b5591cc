use crate::{
    graph::{Graph2d, Graph3d},
    math::Transform,
    preset::PresetCollection,
    state::MoiState,
    types::{Guid, ObjId, ObjectType},
    wrapper::TypeRegistry,
};

/// Parent links are assumed acyclic; walks give up after this many hops.
const MAX_PARENT_DEPTH: usize = 4096;

/// Read-only document queries.
///
/// Side-effect derivation only ever sees the document through this trait, so it can be
/// exercised against any state that answers these questions.
pub trait DocumentView {
    fn object_by_id(&self, id: ObjId) -> Option<&MoiState>;
    /// Direct children of `id`, sorted.
    fn child_ids(&self, id: ObjId) -> Vec<ObjId>;
    /// Every live object of `object_type`, sorted.
    fn objects_of_type(&self, object_type: ObjectType) -> Vec<ObjId>;
    fn preset_collection(&self) -> &PresetCollection;
    fn find_volume_graph(&self, group_id: ObjId) -> Option<&Graph3d>;
    fn find_surface_graph(&self, surface_graph_id: ObjId) -> Option<&Graph2d>;
    fn root_volume_graph_id(&self) -> ObjId;
    /// Lowest ID never handed out.
    fn next_available_id(&self) -> ObjId;
    fn type_registry(&self) -> &TypeRegistry;

    /// Nearest group at or above `id`. A group owns itself.
    fn group_id_for_object(&self, id: ObjId) -> Option<ObjId> {
        self.ancestors(id)
            .find(|object| object.object_type == ObjectType::MetaGraph)
            .map(|object| object.id)
    }

    /// Graph owning the vertex, edge, face or polygon `id`.
    fn graph_id_for_element(&self, id: ObjId) -> Option<ObjId> {
        self.object_by_id(id)
            .filter(|object| object.object_type.is_graph_element())
            .map(|object| object.parent_id)
    }

    /// Nearest group at or above `id` that instances a Symbol, with that Symbol's GUID.
    fn symbol_group_for(&self, id: ObjId) -> Option<(ObjId, Guid)> {
        self.ancestors(id).find_map(|object| match (object.object_type, object.assembly_guid) {
            (ObjectType::MetaGraph, Some(guid)) => Some((object.id, guid)),
            _ => None,
        })
    }

    /// World placement of a group. The root graph sits at the identity.
    fn group_world_transform(&self, group_id: ObjId) -> Transform {
        if group_id == self.root_volume_graph_id() {
            return Transform::IDENTITY;
        }
        self.object_by_id(group_id)
            .and_then(MoiState::placement)
            .unwrap_or(Transform::IDENTITY)
    }

    /// `id` itself followed by each of its parents.
    fn ancestors(&self, id: ObjId) -> Ancestors<'_, Self> {
        Ancestors {
            view: self,
            next: Some(id),
            hops: 0,
        }
    }
}

pub struct Ancestors<'a, V: ?Sized> {
    view: &'a V,
    next: Option<ObjId>,
    hops: usize,
}

impl<'a, V: DocumentView + ?Sized> Iterator for Ancestors<'a, V> {
    type Item = &'a MoiState;

    fn next(&mut self) -> Option<Self::Item> {
        if self.hops >= MAX_PARENT_DEPTH {
            return None;
        }
        let object = self.view.object_by_id(self.next?)?;
        self.hops += 1;
        self.next = Some(object.parent_id);
        Some(object)
    }
}
