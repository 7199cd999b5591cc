//! Shared primitive IDs and object-model enums.

use serde::{Deserialize, Serialize};

/// Document-unique object identifier.
pub type ObjId = u32;
/// Catalog entry identifier.
pub type Guid = uuid::Uuid;
/// Transaction and document-state hash.
pub type DocHash = u64;
/// Identifier of the client that authored a transaction.
pub type UserId = String;
/// Monotonic journal sequence number.
pub type RecordSeq = u64;

/// Sentinel for an unset object reference.
pub const ID_NONE: ObjId = 0;

/// Kind of change recorded for one object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DeltaKind {
    /// Object comes into existence.
    Create,
    /// Object is removed.
    Destroy,
    /// Object state is replaced.
    Mutate,
}

impl DeltaKind {
    /// Kind that undoes this one.
    pub fn inverse(self) -> Self {
        match self {
            Self::Create => Self::Destroy,
            Self::Destroy => Self::Create,
            Self::Mutate => Self::Mutate,
        }
    }
}

/// Model object category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ObjectType {
    /// Unknown or unset.
    None,
    /// Vertex of a volume graph.
    MetaVertex,
    /// Edge of a volume graph.
    MetaEdge,
    /// Face of a volume graph.
    MetaPlane,
    /// Group root owning a volume graph.
    MetaGraph,
    /// View over a run of volume-graph edges.
    MetaEdgeSpan,
    /// View over a set of volume-graph faces.
    MetaPlaneSpan,
    /// Surface graph hosted on a face.
    SurfaceGraph,
    /// Vertex of a surface graph.
    SurfaceVertex,
    /// Edge of a surface graph.
    SurfaceEdge,
    /// Polygon of a surface graph.
    SurfacePolygon,
    /// Plane-hosted wall layer.
    Wall,
    /// Plane-hosted floor layer.
    Floor,
    /// Free-standing furniture, fixture or equipment.
    Furniture,
}

impl ObjectType {
    /// Span objects are views over other elements, never primary ones.
    pub fn is_span(self) -> bool {
        matches!(self, Self::MetaEdgeSpan | Self::MetaPlaneSpan)
    }

    /// Whether objects of this type mirror a volume-graph element.
    pub fn is_volume_element(self) -> bool {
        matches!(self, Self::MetaVertex | Self::MetaEdge | Self::MetaPlane)
    }

    /// Whether objects of this type mirror a surface-graph element.
    pub fn is_surface_element(self) -> bool {
        matches!(
            self,
            Self::SurfaceVertex | Self::SurfaceEdge | Self::SurfacePolygon
        )
    }

    /// Whether objects of this type are owned by a graph rather than created directly.
    pub fn is_graph_element(self) -> bool {
        self.is_volume_element() || self.is_surface_element()
    }
}
