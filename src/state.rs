//! Object state records and the built-in custom-data payloads they carry.

use glam::{DQuat, DVec3};
use serde::{Deserialize, Serialize};

use crate::{
    math::Transform,
    types::{Guid, ObjId, ObjectType},
    wrapper::{StructDataWrapper, TypeRegistry, WrappedStruct, WrapperError},
};

/// Reference to one plane of a preset zone, used by alignment constraints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PresetZonePlane {
    pub preset: Option<Guid>,
    pub zone: String,
    pub plane_index: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AlignmentData {
    pub subject: PresetZonePlane,
    pub target: PresetZonePlane,
}

/// Snapshot of one model object. Deltas carry these by value; the document keeps the current one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoiState {
    pub id: ObjId,
    pub object_type: ObjectType,
    pub parent_id: ObjId,
    pub assembly_guid: Option<Guid>,
    pub display_name: String,
    pub custom_data: StructDataWrapper,
    pub alignment: AlignmentData,
}

impl MoiState {
    /// State with no custom data; attach some with [`Self::with_custom_data`] before creating it.
    pub fn new(id: ObjId, object_type: ObjectType, parent_id: ObjId) -> Self {
        Self {
            id,
            object_type,
            parent_id,
            assembly_guid: None,
            display_name: String::new(),
            custom_data: StructDataWrapper::default(),
            alignment: AlignmentData::default(),
        }
    }

    pub fn with_custom_data<T: WrappedStruct>(
        mut self,
        registry: &TypeRegistry,
        data: &T,
    ) -> Result<Self, WrapperError> {
        self.custom_data.save(registry, data, false)?;
        Ok(self)
    }

    /// Mirror object for a graph vertex, edge, face or polygon.
    pub fn graph_element(
        registry: &TypeRegistry,
        id: ObjId,
        object_type: ObjectType,
        graph_id: ObjId,
    ) -> Result<Self, WrapperError> {
        Self::new(id, object_type, graph_id).with_custom_data(registry, &GraphElementData { graph_id })
    }

    /// World placement for groups and furniture; `None` for every other type.
    pub fn placement(&self) -> Option<Transform> {
        match self.object_type {
            ObjectType::MetaGraph => self.custom_data.load::<MetaGraphData>().ok().map(|d| d.transform()),
            ObjectType::Furniture => self.custom_data.load::<FfeData>().ok().map(|d| d.transform()),
            _ => None,
        }
    }

    /// Rewrites the placement in the custom data. Returns `false` for types without one.
    pub fn set_placement(
        &mut self,
        registry: &TypeRegistry,
        transform: &Transform,
    ) -> Result<bool, WrapperError> {
        match self.object_type {
            ObjectType::MetaGraph => {
                replace_placement::<MetaGraphData>(&mut self.custom_data, registry, transform)?;
                Ok(true)
            }
            ObjectType::Furniture => {
                replace_placement::<FfeData>(&mut self.custom_data, registry, transform)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// Payloads with a world placement.
pub trait Placed {
    fn transform(&self) -> Transform;
    fn set_transform(&mut self, transform: &Transform);
}

fn replace_placement<T: WrappedStruct + Placed>(
    wrapper: &mut StructDataWrapper,
    registry: &TypeRegistry,
    transform: &Transform,
) -> Result<(), WrapperError> {
    let mut data: T = wrapper.load()?;
    data.set_transform(transform);
    let keep_json = wrapper.human_readable().is_some();
    wrapper.save(registry, &data, keep_json)
}

/// Group placement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetaGraphData {
    pub location: DVec3,
    pub rotation: DQuat,
}

impl Default for MetaGraphData {
    fn default() -> Self {
        Self::from_transform(&Transform::IDENTITY)
    }
}

impl MetaGraphData {
    pub fn from_transform(transform: &Transform) -> Self {
        Self {
            location: transform.translation,
            rotation: transform.rotation,
        }
    }
}

impl Placed for MetaGraphData {
    fn transform(&self) -> Transform {
        Transform::new(self.rotation, self.location)
    }

    fn set_transform(&mut self, transform: &Transform) {
        self.location = transform.translation;
        self.rotation = transform.rotation;
    }
}

impl WrappedStruct for MetaGraphData {
    const TYPE_NAME: &'static str = "MetaGraphData";
}

/// Furniture, fixture and equipment placement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FfeData {
    pub location: DVec3,
    pub rotation: DQuat,
    pub flip_x: bool,
}

impl FfeData {
    pub fn at(location: DVec3) -> Self {
        Self {
            location,
            rotation: DQuat::IDENTITY,
            flip_x: false,
        }
    }
}

impl Placed for FfeData {
    fn transform(&self) -> Transform {
        Transform::new(self.rotation, self.location)
    }

    fn set_transform(&mut self, transform: &Transform) {
        self.location = transform.translation;
        self.rotation = transform.rotation;
    }
}

impl WrappedStruct for FfeData {
    const TYPE_NAME: &'static str = "FfeData";
}

/// Edge or face run that a span object presents as one element.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanData {
    pub graph_members: Vec<ObjId>,
}

impl WrappedStruct for SpanData {
    const TYPE_NAME: &'static str = "SpanData";
}

/// Layer hosted on a face or span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaneHostedData {
    pub thickness: f64,
    pub offset: f64,
    pub flipped: bool,
}

impl WrappedStruct for PlaneHostedData {
    const TYPE_NAME: &'static str = "PlaneHostedData";
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphElementData {
    pub graph_id: ObjId,
}

impl WrappedStruct for GraphElementData {
    const TYPE_NAME: &'static str = "GraphElementData";
}

/// Surface graph hosted on a volume-graph face.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurfaceGraphData {
    pub host_face: ObjId,
}

impl WrappedStruct for SurfaceGraphData {
    const TYPE_NAME: &'static str = "SurfaceGraphData";
}
