use std::collections::{BTreeMap, BTreeSet};

use tracing::warn;

use super::{SymbolCatalog, SymbolError, reposition};
use crate::{
    core::DocumentView,
    delta::{Delta, GraphDelta, MoiDelta},
    graph::{Graph, GraphEdge, GraphFace, GraphPosition},
    math::Transform,
    preset::SymbolPresetData,
    state::{MetaGraphData, MoiState, SpanData, SurfaceGraphData},
    types::{DeltaKind, Guid, ID_NONE, ObjId, ObjectType},
    wrapper::TypeRegistry,
};

type IdMap = BTreeMap<ObjId, ObjId>;

fn mapped(ids: &IdMap, id: ObjId) -> Result<ObjId, SymbolError> {
    ids.get(&id)
        .copied()
        .ok_or(SymbolError::UnmappedReference(id))
}

fn remapped(member: &MoiState, ids: &IdMap) -> Result<MoiState, SymbolError> {
    let mut state = member.clone();
    state.id = mapped(ids, member.id)?;
    state.parent_id = mapped(ids, member.parent_id)?;
    Ok(state)
}

/// Builds the deltas that materialize Symbol content into groups.
///
/// New IDs are handed out from the view's next available ID onwards, so the deltas of
/// several instantiations can be applied one after another in the same transaction.
pub(crate) struct Instancer<'a> {
    registry: &'a TypeRegistry,
    pub(crate) catalog: SymbolCatalog<'a>,
    next_id: ObjId,
    deltas: Vec<Delta>,
}

impl<'a> Instancer<'a> {
    pub(crate) fn new<V: DocumentView + ?Sized>(view: &'a V) -> Self {
        Self {
            registry: view.type_registry(),
            catalog: SymbolCatalog::new(view),
            next_id: view.next_available_id(),
            deltas: Vec::new(),
        }
    }

    pub(crate) fn allocate(&mut self) -> ObjId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub(crate) fn push(&mut self, delta: impl Into<Delta>) {
        let delta = delta.into();
        if !delta.is_empty() {
            self.deltas.push(delta);
        }
    }

    pub(crate) fn extend(&mut self, deltas: impl IntoIterator<Item = Delta>) {
        for delta in deltas {
            self.push(delta);
        }
    }

    /// Object and graph deltas in order, then one update per touched Symbol preset.
    pub(crate) fn finish(self) -> Vec<Delta> {
        let mut deltas = self.deltas;
        deltas.extend(self.catalog.into_deltas());
        deltas
    }

    /// Fills the existing, empty group `group_id` with the content of `data`, placed by
    /// `placement`, and records every new ID in the equivalence sets of `data`.
    ///
    /// `visiting` holds the Symbols already being instantiated further up; a nested
    /// instance of one of them is skipped.
    pub(crate) fn instantiate(
        &mut self,
        group_id: ObjId,
        guid: Guid,
        data: &mut SymbolPresetData,
        placement: &Transform,
        visiting: &BTreeSet<Guid>,
    ) -> Result<(), SymbolError> {
        let root = data.root_graph;
        if !data.graphs.contains_key(&root) {
            return Err(SymbolError::MissingGraph { guid, graph: root });
        }

        let mut ids = IdMap::from([(ID_NONE, ID_NONE)]);
        for member in data.members.keys() {
            let id = self.allocate();
            ids.insert(*member, id);
        }
        ids.insert(root, group_id);
        for graph in data.graphs.values() {
            self.allocate_graph_ids(graph, &mut ids);
        }
        for graph in data.surface_graphs.values() {
            self.allocate_graph_ids(graph, &mut ids);
        }

        let mut groups = MoiDelta::new();
        for member in data.members.values().filter(|m| m.object_type == ObjectType::MetaGraph) {
            let mut state = remapped(member, &ids)?;
            reposition(self.registry, &mut state, placement)?;
            groups.add_create_destroy(state, DeltaKind::Create);
        }
        self.push(groups);

        for (graph_id, graph) in &data.graphs {
            let target = mapped(&ids, *graph_id)?;
            let delta = graph_additions(target, graph, &ids, |p| placement.transform_point(p))?;
            self.push(delta);
        }

        let mut surfaces = MoiDelta::new();
        for member in data.members.values().filter(|m| m.object_type == ObjectType::SurfaceGraph) {
            surfaces.add_create_destroy(self.remapped_surface(member, &ids)?, DeltaKind::Create);
        }
        self.push(surfaces);

        for (graph_id, graph) in &data.surface_graphs {
            let target = mapped(&ids, *graph_id)?;
            let delta = graph_additions(target, graph, &ids, |p| p)?;
            self.push(delta);
        }

        let mut others = MoiDelta::new();
        let leaves = data.members.values().filter(|m| {
            !matches!(m.object_type, ObjectType::MetaGraph | ObjectType::SurfaceGraph)
                && !m.object_type.is_graph_element()
        });
        for member in leaves {
            let mut state = remapped(member, &ids)?;
            if state.object_type.is_span() {
                let mut span: SpanData = state.custom_data.load()?;
                span.graph_members = span
                    .graph_members
                    .iter()
                    .map(|id| mapped(&ids, *id))
                    .collect::<Result<_, _>>()?;
                state.custom_data.save(self.registry, &span, false)?;
            } else {
                reposition(self.registry, &mut state, placement)?;
            }
            others.add_create_destroy(state, DeltaKind::Create);
        }
        self.push(others);

        let nested: Vec<(ObjId, Guid, Transform)> = data
            .members
            .values()
            .filter(|m| m.object_type == ObjectType::MetaGraph)
            .filter_map(|m| {
                let sub_guid = m.assembly_guid?;
                let own = m.placement().unwrap_or_default();
                let sub_placement = if placement.is_identity() { own } else { own.then(placement) };
                Some((m.id, sub_guid, sub_placement))
            })
            .collect();
        for (member, sub_guid, sub_placement) in nested {
            if visiting.contains(&sub_guid) {
                warn!(symbol = %sub_guid, "symbol contains an instance of itself; nested copy skipped");
                continue;
            }
            let mut sub_data = self.catalog.symbol_data(sub_guid)?;
            let mut sub_visiting = visiting.clone();
            sub_visiting.insert(sub_guid);
            self.instantiate(mapped(&ids, member)?, sub_guid, &mut sub_data, &sub_placement, &sub_visiting)?;
            self.catalog.store_symbol_data(sub_guid, &sub_data)?;
        }

        for (old, new) in &ids {
            if *old == ID_NONE || *old == root {
                continue;
            }
            data.equivalent_ids
                .get_mut(old)
                .ok_or(SymbolError::MissingEquivalence { guid, id: *old })?
                .insert(*new);
        }
        Ok(())
    }

    fn allocate_graph_ids<P>(&mut self, graph: &Graph<P>, ids: &mut IdMap) {
        let elements = graph
            .vertices
            .keys()
            .chain(graph.edges.keys())
            .chain(graph.faces.keys());
        for old in elements {
            let id = self.allocate();
            ids.insert(*old, id);
        }
    }

    fn remapped_surface(&self, member: &MoiState, ids: &IdMap) -> Result<MoiState, SymbolError> {
        let mut state = remapped(member, ids)?;
        if let Ok(mut surface) = state.custom_data.load::<SurfaceGraphData>() {
            surface.host_face = mapped(ids, surface.host_face)?;
            state.custom_data.save(self.registry, &surface, false)?;
        }
        Ok(state)
    }
}

/// Additions recreating `graph` inside `target` under the IDs already allocated in `ids`.
fn graph_additions<P: GraphPosition>(
    target: ObjId,
    graph: &Graph<P>,
    ids: &IdMap,
    place: impl Fn(P) -> P,
) -> Result<GraphDelta<P>, SymbolError> {
    let mut delta = GraphDelta::new(target);
    for (old, position) in &graph.vertices {
        delta.vertex_additions.insert(mapped(ids, *old)?, place(*position));
    }
    for (old, edge) in &graph.edges {
        let edge = GraphEdge {
            start: mapped(ids, edge.start)?,
            end: mapped(ids, edge.end)?,
        };
        delta.edge_additions.insert(mapped(ids, *old)?, edge);
    }
    for (old, face) in &graph.faces {
        let vertices = face
            .vertices
            .iter()
            .map(|v| mapped(ids, *v))
            .collect::<Result<_, _>>()?;
        delta.face_additions.insert(mapped(ids, *old)?, GraphFace { vertices });
    }
    Ok(delta)
}

/// Deltas creating a new instance of `guid` under `parent_group`, placed by `placement`.
///
/// Returns the new group's ID alongside the deltas.
pub fn create_deltas_for_symbol_instance<V: DocumentView + ?Sized>(
    view: &V,
    guid: Guid,
    parent_group: ObjId,
    placement: &Transform,
) -> Result<(ObjId, Vec<Delta>), SymbolError> {
    let mut instancer = Instancer::new(view);
    let mut data = instancer.catalog.symbol_data(guid)?;

    let group_id = instancer.allocate();
    let mut group = MoiState::new(group_id, ObjectType::MetaGraph, parent_group)
        .with_custom_data(view.type_registry(), &MetaGraphData::from_transform(placement))?;
    group.assembly_guid = Some(guid);
    let mut create = MoiDelta::new();
    create.add_create_destroy(group, DeltaKind::Create);
    instancer.push(create);

    instancer.instantiate(group_id, guid, &mut data, placement, &BTreeSet::from([guid]))?;
    instancer.catalog.store_symbol_data(guid, &data)?;
    Ok((group_id, instancer.finish()))
}
