//! Vertex/edge/face graphs. Volume graphs hold world-space points; surface graphs hold
//! coordinates local to their host face.

use std::{collections::BTreeMap, fmt::Debug};

use glam::{DVec2, DVec3};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;

use crate::{
    delta::GraphDelta,
    math::Transform,
    types::{ObjId, ObjectType},
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("graph element {0} already exists")]
    ElementExists(ObjId),
    #[error("graph element {0} does not exist")]
    MissingElement(ObjId),
    #[error("element {element} references missing vertex {vertex}")]
    DanglingVertex { element: ObjId, vertex: ObjId },
    #[error("vertex {vertex} is still used by element {user}")]
    VertexInUse { vertex: ObjId, user: ObjId },
}

/// Coordinate type stored at graph vertices.
pub trait GraphPosition: Copy + PartialEq + Debug + Serialize + DeserializeOwned + 'static {
    const VERTEX_TYPE: ObjectType;
    const EDGE_TYPE: ObjectType;
    const FACE_TYPE: ObjectType;

    /// The point in world space, when this coordinate type is world-space.
    fn world_point(self) -> Option<DVec3>;
}

impl GraphPosition for DVec3 {
    const VERTEX_TYPE: ObjectType = ObjectType::MetaVertex;
    const EDGE_TYPE: ObjectType = ObjectType::MetaEdge;
    const FACE_TYPE: ObjectType = ObjectType::MetaPlane;

    fn world_point(self) -> Option<DVec3> {
        Some(self)
    }
}

impl GraphPosition for DVec2 {
    const VERTEX_TYPE: ObjectType = ObjectType::SurfaceVertex;
    const EDGE_TYPE: ObjectType = ObjectType::SurfaceEdge;
    const FACE_TYPE: ObjectType = ObjectType::SurfacePolygon;

    fn world_point(self) -> Option<DVec3> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GraphEdge {
    pub start: ObjId,
    pub end: ObjId,
}

/// Closed vertex loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphFace {
    pub vertices: Vec<ObjId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Graph<P> {
    pub vertices: BTreeMap<ObjId, P>,
    pub edges: BTreeMap<ObjId, GraphEdge>,
    pub faces: BTreeMap<ObjId, GraphFace>,
}

pub type Graph3d = Graph<DVec3>;
pub type Graph2d = Graph<DVec2>;

impl<P> Default for Graph<P> {
    fn default() -> Self {
        Self {
            vertices: BTreeMap::new(),
            edges: BTreeMap::new(),
            faces: BTreeMap::new(),
        }
    }
}

impl<P: GraphPosition> Graph<P> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty() && self.edges.is_empty() && self.faces.is_empty()
    }

    pub fn contains(&self, id: ObjId) -> bool {
        self.element_type(id).is_some()
    }

    /// Mirror object type for the element `id`.
    pub fn element_type(&self, id: ObjId) -> Option<ObjectType> {
        if self.vertices.contains_key(&id) {
            Some(P::VERTEX_TYPE)
        } else if self.edges.contains_key(&id) {
            Some(P::EDGE_TYPE)
        } else if self.faces.contains_key(&id) {
            Some(P::FACE_TYPE)
        } else {
            None
        }
    }

    pub fn element_ids(&self) -> impl Iterator<Item = ObjId> + '_ {
        self.vertices
            .keys()
            .chain(self.edges.keys())
            .chain(self.faces.keys())
            .copied()
    }

    /// Edges and faces whose shape depends on `vertex`.
    pub fn elements_touching(&self, vertex: ObjId) -> Vec<ObjId> {
        let edges = self
            .edges
            .iter()
            .filter(|(_, e)| e.start == vertex || e.end == vertex)
            .map(|(id, _)| *id);
        let faces = self
            .faces
            .iter()
            .filter(|(_, f)| f.vertices.contains(&vertex))
            .map(|(id, _)| *id);
        edges.chain(faces).collect()
    }

    /// Applies `delta` in full or not at all.
    pub fn apply(&mut self, delta: &GraphDelta<P>) -> Result<(), GraphError> {
        let mut next = self.clone();
        next.apply_in_place(delta)?;
        *self = next;
        Ok(())
    }

    fn apply_in_place(&mut self, delta: &GraphDelta<P>) -> Result<(), GraphError> {
        for (id, position) in &delta.vertex_additions {
            self.ensure_free(*id)?;
            self.vertices.insert(*id, *position);
        }
        for (id, edge) in &delta.edge_additions {
            self.ensure_free(*id)?;
            for vertex in [edge.start, edge.end] {
                self.ensure_vertex(*id, vertex)?;
            }
            self.edges.insert(*id, *edge);
        }
        for (id, face) in &delta.face_additions {
            self.ensure_free(*id)?;
            for vertex in &face.vertices {
                self.ensure_vertex(*id, *vertex)?;
            }
            self.faces.insert(*id, face.clone());
        }
        for (id, (_, to)) in &delta.vertex_movements {
            let position = self
                .vertices
                .get_mut(id)
                .ok_or(GraphError::MissingElement(*id))?;
            *position = *to;
        }
        for id in delta.face_deletions.keys() {
            self.faces.remove(id).ok_or(GraphError::MissingElement(*id))?;
        }
        for id in delta.edge_deletions.keys() {
            self.edges.remove(id).ok_or(GraphError::MissingElement(*id))?;
        }
        for id in delta.vertex_deletions.keys() {
            if let Some(user) = self.elements_touching(*id).first() {
                return Err(GraphError::VertexInUse {
                    vertex: *id,
                    user: *user,
                });
            }
            self.vertices
                .remove(id)
                .ok_or(GraphError::MissingElement(*id))?;
        }
        Ok(())
    }

    fn ensure_free(&self, id: ObjId) -> Result<(), GraphError> {
        if self.contains(id) {
            return Err(GraphError::ElementExists(id));
        }
        Ok(())
    }

    fn ensure_vertex(&self, element: ObjId, vertex: ObjId) -> Result<(), GraphError> {
        if !self.vertices.contains_key(&vertex) {
            return Err(GraphError::DanglingVertex { element, vertex });
        }
        Ok(())
    }
}

impl Graph3d {
    /// Copy with every vertex mapped through `transform`.
    pub fn transformed(&self, transform: &Transform) -> Self {
        let vertices = self
            .vertices
            .iter()
            .map(|(id, p)| (*id, transform.transform_point(*p)))
            .collect();
        Self {
            vertices,
            edges: self.edges.clone(),
            faces: self.faces.clone(),
        }
    }
}
