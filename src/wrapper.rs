//! Type-tagged payload container with a canonical binary form and an on-demand JSON form.
//!
//! Type descriptors live in an explicit [`TypeRegistry`] that callers build once and pass
//! to the routines that need to resolve a type by name.

use std::{
    any::TypeId,
    hash::{Hash, Hasher},
};

use hashbrown::HashMap;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;

use crate::{
    delta::{Graph2dDelta, Graph3dDelta, MoiDelta, PresetDelta},
    preset::SymbolPresetData,
    state::{
        FfeData, GraphElementData, MetaGraphData, PlaneHostedData, SpanData, SurfaceGraphData,
    },
    types::DocHash,
};

#[derive(Debug, Error)]
pub enum WrapperError {
    #[error("type `{0}` is not registered")]
    Unregistered(String),
    #[error("requested type `{requested}` does not match stored type `{stored}`")]
    TypeMismatch {
        requested: &'static str,
        stored: String,
    },
    #[error("wrapper holds no data")]
    Invalid,
    #[error("binary encoding failed: {0}")]
    Binary(#[from] bincode::Error),
    #[error("human-readable encoding failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// A record that can be carried inside a [`StructDataWrapper`].
pub trait WrappedStruct: Serialize + DeserializeOwned + 'static {
    /// Stable tag stored alongside the payload.
    const TYPE_NAME: &'static str;
}

type ToJsonFn = fn(&[u8]) -> Result<serde_json::Value, WrapperError>;
type ToBinaryFn = fn(&serde_json::Value) -> Result<Vec<u8>, WrapperError>;

/// Resolved type information for one wrapped record type.
#[derive(Debug, Clone, Copy)]
pub struct TypeDescriptor {
    name: &'static str,
    type_id: TypeId,
    binary_to_json: ToJsonFn,
    json_to_binary: ToBinaryFn,
}

impl TypeDescriptor {
    pub fn of<T: WrappedStruct>() -> Self {
        Self {
            name: T::TYPE_NAME,
            type_id: TypeId::of::<T>(),
            binary_to_json: binary_to_json::<T>,
            json_to_binary: json_to_binary::<T>,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }
}

fn binary_to_json<T: WrappedStruct>(bytes: &[u8]) -> Result<serde_json::Value, WrapperError> {
    let value: T = bincode::deserialize(bytes)?;
    Ok(serde_json::to_value(&value)?)
}

fn json_to_binary<T: WrappedStruct>(json: &serde_json::Value) -> Result<Vec<u8>, WrapperError> {
    let value: T = serde_json::from_value(json.clone())?;
    Ok(bincode::serialize(&value)?)
}

/// Name-to-descriptor table consulted when wrapping values or converting between forms.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    types: HashMap<&'static str, TypeDescriptor>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with every record type this crate wraps.
    pub fn with_builtin_types() -> Self {
        let mut registry = Self::new();
        registry
            .register::<MoiDelta>()
            .register::<PresetDelta>()
            .register::<Graph3dDelta>()
            .register::<Graph2dDelta>()
            .register::<SymbolPresetData>()
            .register::<MetaGraphData>()
            .register::<FfeData>()
            .register::<SpanData>()
            .register::<PlaneHostedData>()
            .register::<GraphElementData>()
            .register::<SurfaceGraphData>();
        registry
    }

    pub fn register<T: WrappedStruct>(&mut self) -> &mut Self {
        self.types.insert(T::TYPE_NAME, TypeDescriptor::of::<T>());
        self
    }

    pub fn resolve(&self, name: &str) -> Option<&TypeDescriptor> {
        self.types.get(name)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    fn descriptor_for<T: WrappedStruct>(&self) -> Result<&TypeDescriptor, WrapperError> {
        let descriptor = self
            .resolve(T::TYPE_NAME)
            .ok_or_else(|| WrapperError::Unregistered(T::TYPE_NAME.to_string()))?;
        if descriptor.type_id != TypeId::of::<T>() {
            return Err(WrapperError::TypeMismatch {
                requested: T::TYPE_NAME,
                stored: descriptor.name.to_string(),
            });
        }
        Ok(descriptor)
    }
}

/// Opaque typed payload. The binary buffer is authoritative; the JSON form is a cache.
///
/// Equality compares the type tag and the canonical binary bytes only. The resolved type
/// and the JSON form are caches and never take part.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StructDataWrapper {
    struct_name: String,
    #[serde(skip)]
    type_id: Option<TypeId>,
    binary: Vec<u8>,
    #[serde(skip)]
    human_readable: Option<serde_json::Value>,
}

impl StructDataWrapper {
    /// Wraps `value`, failing if its type is not registered.
    pub fn new<T: WrappedStruct>(registry: &TypeRegistry, value: &T) -> Result<Self, WrapperError> {
        let mut wrapper = Self::default();
        wrapper.save(registry, value, false)?;
        Ok(wrapper)
    }

    /// Wrapper holding only the human-readable form; call [`Self::ensure_binary`] before loading.
    pub fn from_human_readable(struct_name: impl Into<String>, json: serde_json::Value) -> Self {
        Self {
            struct_name: struct_name.into(),
            type_id: None,
            binary: Vec::new(),
            human_readable: Some(json),
        }
    }

    /// Replaces the contents with `value`. On failure the wrapper is left untouched.
    pub fn save<T: WrappedStruct>(
        &mut self,
        registry: &TypeRegistry,
        value: &T,
        save_json: bool,
    ) -> Result<(), WrapperError> {
        let descriptor = registry.descriptor_for::<T>()?;
        let binary = bincode::serialize(value)?;
        let human_readable = if save_json {
            Some(serde_json::to_value(value)?)
        } else {
            None
        };

        self.struct_name = descriptor.name.to_string();
        self.type_id = Some(descriptor.type_id);
        self.binary = binary;
        self.human_readable = human_readable;
        Ok(())
    }

    /// Decodes the binary form into a fresh `T`.
    pub fn load<T: WrappedStruct>(&self) -> Result<T, WrapperError> {
        if !self.is_valid() {
            return Err(WrapperError::Invalid);
        }
        let id_matches = self.type_id.is_none_or(|id| id == TypeId::of::<T>());
        if self.struct_name != T::TYPE_NAME || !id_matches {
            return Err(WrapperError::TypeMismatch {
                requested: T::TYPE_NAME,
                stored: self.struct_name.clone(),
            });
        }
        Ok(bincode::deserialize(&self.binary)?)
    }

    pub fn is_valid(&self) -> bool {
        !self.struct_name.is_empty() && !self.binary.is_empty()
    }

    pub fn struct_name(&self) -> &str {
        &self.struct_name
    }

    pub fn binary(&self) -> &[u8] {
        &self.binary
    }

    pub fn human_readable(&self) -> Option<&serde_json::Value> {
        self.human_readable.as_ref()
    }

    /// Materializes the JSON form from the binary form if it is missing.
    pub fn ensure_human_readable(&mut self, registry: &TypeRegistry) -> Result<(), WrapperError> {
        if self.human_readable.is_some() {
            return Ok(());
        }
        if self.binary.is_empty() {
            return Err(WrapperError::Invalid);
        }
        let descriptor = self.resolve(registry)?;
        self.human_readable = Some((descriptor.binary_to_json)(&self.binary)?);
        Ok(())
    }

    /// Materializes the binary form from the JSON form if it is missing.
    pub fn ensure_binary(&mut self, registry: &TypeRegistry) -> Result<(), WrapperError> {
        if !self.binary.is_empty() {
            return Ok(());
        }
        let descriptor = self.resolve(registry)?;
        let json = self.human_readable.as_ref().ok_or(WrapperError::Invalid)?;
        self.binary = (descriptor.json_to_binary)(json)?;
        Ok(())
    }

    /// Content hash over the type tag and binary bytes.
    pub fn content_hash(&self) -> DocHash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.struct_name.as_bytes());
        hasher.update(&[0]);
        hasher.update(&self.binary);
        truncate_digest(&hasher.finalize())
    }

    fn resolve(&mut self, registry: &TypeRegistry) -> Result<TypeDescriptor, WrapperError> {
        let descriptor = *registry
            .resolve(&self.struct_name)
            .ok_or_else(|| WrapperError::Unregistered(self.struct_name.clone()))?;
        self.type_id = Some(descriptor.type_id);
        Ok(descriptor)
    }
}

impl PartialEq for StructDataWrapper {
    fn eq(&self, other: &Self) -> bool {
        self.struct_name == other.struct_name && self.binary == other.binary
    }
}

impl Eq for StructDataWrapper {}

impl Hash for StructDataWrapper {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.struct_name.hash(state);
        self.binary.hash(state);
    }
}

pub(crate) fn truncate_digest(hash: &blake3::Hash) -> DocHash {
    let mut head = [0u8; 8];
    head.copy_from_slice(&hash.as_bytes()[..8]);
    u64::from_le_bytes(head)
}
