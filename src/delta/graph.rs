use std::collections::BTreeMap;

use glam::{DVec2, DVec3};
use serde::{Deserialize, Serialize};

use crate::{
    graph::{Graph, GraphEdge, GraphFace, GraphPosition},
    math::Aabb,
    types::{DeltaKind, ObjId},
    wrapper::WrappedStruct,
};

/// Structural edit of one graph. Applied as additions, then movements, then deletions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphDelta<P> {
    pub graph_id: ObjId,
    pub vertex_additions: BTreeMap<ObjId, P>,
    pub vertex_deletions: BTreeMap<ObjId, P>,
    /// `(from, to)` per moved vertex.
    pub vertex_movements: BTreeMap<ObjId, (P, P)>,
    pub edge_additions: BTreeMap<ObjId, GraphEdge>,
    pub edge_deletions: BTreeMap<ObjId, GraphEdge>,
    pub face_additions: BTreeMap<ObjId, GraphFace>,
    pub face_deletions: BTreeMap<ObjId, GraphFace>,
}

pub type Graph3dDelta = GraphDelta<DVec3>;
pub type Graph2dDelta = GraphDelta<DVec2>;

impl WrappedStruct for Graph3dDelta {
    const TYPE_NAME: &'static str = "Graph3dDelta";
}

impl WrappedStruct for Graph2dDelta {
    const TYPE_NAME: &'static str = "Graph2dDelta";
}

impl<P: GraphPosition> GraphDelta<P> {
    pub fn new(graph_id: ObjId) -> Self {
        Self {
            graph_id,
            vertex_additions: BTreeMap::new(),
            vertex_deletions: BTreeMap::new(),
            vertex_movements: BTreeMap::new(),
            edge_additions: BTreeMap::new(),
            edge_deletions: BTreeMap::new(),
            face_additions: BTreeMap::new(),
            face_deletions: BTreeMap::new(),
        }
    }

    /// Delta that removes every element of `graph`.
    pub fn removing_all(graph_id: ObjId, graph: &Graph<P>) -> Self {
        Self {
            vertex_deletions: graph.vertices.clone(),
            edge_deletions: graph.edges.clone(),
            face_deletions: graph.faces.clone(),
            ..Self::new(graph_id)
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.has_structural_changes() && self.vertex_movements.is_empty()
    }

    /// Anything other than pure vertex movement.
    pub fn has_structural_changes(&self) -> bool {
        !(self.vertex_additions.is_empty()
            && self.vertex_deletions.is_empty()
            && self.edge_additions.is_empty()
            && self.edge_deletions.is_empty()
            && self.face_additions.is_empty()
            && self.face_deletions.is_empty())
    }

    pub fn make_inverse(&self) -> Self {
        Self {
            graph_id: self.graph_id,
            vertex_additions: self.vertex_deletions.clone(),
            vertex_deletions: self.vertex_additions.clone(),
            vertex_movements: self
                .vertex_movements
                .iter()
                .map(|(id, (from, to))| (*id, (*to, *from)))
                .collect(),
            edge_additions: self.edge_deletions.clone(),
            edge_deletions: self.edge_additions.clone(),
            face_additions: self.face_deletions.clone(),
            face_deletions: self.face_additions.clone(),
        }
    }

    pub fn affected_objects(&self) -> Vec<(ObjId, DeltaKind)> {
        let created = self
            .vertex_additions
            .keys()
            .chain(self.edge_additions.keys())
            .chain(self.face_additions.keys())
            .map(|id| (*id, DeltaKind::Create));
        let destroyed = self
            .vertex_deletions
            .keys()
            .chain(self.edge_deletions.keys())
            .chain(self.face_deletions.keys())
            .map(|id| (*id, DeltaKind::Destroy));
        let moved = self
            .vertex_movements
            .keys()
            .map(|id| (*id, DeltaKind::Mutate));
        created.chain(destroyed).chain(moved).collect()
    }

    /// Bounds of every world-space point added, removed or moved.
    pub fn affected_bounds(&self) -> Option<Aabb> {
        let points = self
            .vertex_additions
            .values()
            .chain(self.vertex_deletions.values())
            .copied()
            .chain(
                self.vertex_movements
                    .values()
                    .flat_map(|(from, to)| [*from, *to]),
            )
            .filter_map(P::world_point);
        Aabb::from_points(points)
    }
}
