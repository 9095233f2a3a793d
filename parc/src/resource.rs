use std::fmt;

use bytes::Bytes;

use pcore::data::SerializedData;
use pcore::primitive_enum;

use crate::backend::BackendKind;
use crate::error::{ArchiveError, Result};

primitive_enum! {
    #[derive(Default, PartialOrd, Ord)]
    pub enum ResourceKind: u32 {
        #[default]
        StandaloneShader = 1,
        ResourceSignature = 2,
        GraphicsPipeline = 3,
        ComputePipeline = 4,
        RayTracingPipeline = 5,
        TilePipeline = 6,
        RenderPass = 7,
    }
}

impl ResourceKind {
    pub const COUNT: usize = 7;

    pub const ALL: [ResourceKind; ResourceKind::COUNT] = [
        ResourceKind::StandaloneShader,
        ResourceKind::ResourceSignature,
        ResourceKind::GraphicsPipeline,
        ResourceKind::ComputePipeline,
        ResourceKind::RayTracingPipeline,
        ResourceKind::TilePipeline,
        ResourceKind::RenderPass,
    ];

    pub fn index(self) -> usize {
        self as usize - 1
    }

    pub fn from_u32(value: u32) -> Option<ResourceKind> {
        ResourceKind::ALL.iter().copied().find(|k| *k as u32 == value)
    }

    pub fn is_pipeline(self) -> bool {
        matches!(
            self,
            ResourceKind::GraphicsPipeline
                | ResourceKind::ComputePipeline
                | ResourceKind::RayTracingPipeline
                | ResourceKind::TilePipeline
        )
    }

    /// Kinds whose per backend data indexes into the shader pools.
    pub fn references_shaders(self) -> bool {
        self.is_pipeline() || self == ResourceKind::StandaloneShader
    }

    pub fn name(self) -> &'static str {
        match self {
            ResourceKind::StandaloneShader => "Shader",
            ResourceKind::ResourceSignature => "Resource Signature",
            ResourceKind::GraphicsPipeline => "Graphics Pipeline",
            ResourceKind::ComputePipeline => "Compute Pipeline",
            ResourceKind::RayTracingPipeline => "Ray Tracing Pipeline",
            ResourceKind::TilePipeline => "Tile Pipeline",
            ResourceKind::RenderPass => "Render Pass",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Non-empty UTF-8 resource name.
///
/// Names decoded from an archive share the archive buffer, names that must
/// outlive it are detached with [`ResourceName::make_copy`].
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceName(Bytes);

impl ResourceName {
    pub fn new(name: &str) -> Result<Self> {
        if name.is_empty() {
            return Err(ArchiveError::InvalidName(name.to_string()));
        }
        Ok(ResourceName(Bytes::copy_from_slice(name.as_bytes())))
    }

    /// Zero-copy name over `name`, which must be a slice of `owner`.
    pub fn from_shared(owner: &Bytes, name: &str) -> Result<Self> {
        if name.is_empty() {
            return Err(ArchiveError::InvalidName(name.to_string()));
        }
        Ok(ResourceName(owner.slice_ref(name.as_bytes())))
    }

    pub fn from_utf8(name: Bytes) -> Result<Self> {
        match std::str::from_utf8(&name) {
            Ok(s) if !s.is_empty() => Ok(ResourceName(name)),
            _ => Err(ArchiveError::InvalidName(String::from_utf8_lossy(&name).into_owned())),
        }
    }

    pub fn as_str(&self) -> &str {
        // Validated on construction
        std::str::from_utf8(&self.0).unwrap_or_default()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn make_copy(&self) -> Self {
        ResourceName(Bytes::copy_from_slice(&self.0))
    }
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceKey {
    pub kind: ResourceKind,
    pub name: ResourceName,
}

impl ResourceKey {
    pub fn new(kind: ResourceKind, name: ResourceName) -> Self {
        ResourceKey { kind, name }
    }

    pub fn named(kind: ResourceKind, name: &str) -> Result<Self> {
        Ok(ResourceKey::new(kind, ResourceName::new(name)?))
    }

    pub fn make_copy(&self) -> Self {
        ResourceKey::new(self.kind, self.name.make_copy())
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}'", self.kind, self.name)
    }
}

/// Common data plus one slot per backend, empty slots mean no data.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResourceData {
    pub common: SerializedData,
    pub per_backend: [SerializedData; BackendKind::COUNT],
}

impl ResourceData {
    pub fn new(common: SerializedData) -> Self {
        ResourceData {
            common,
            ..Default::default()
        }
    }

    pub fn backend(&self, backend: BackendKind) -> &SerializedData {
        &self.per_backend[backend.index()]
    }

    pub fn set_backend(&mut self, backend: BackendKind, data: SerializedData) {
        self.per_backend[backend.index()] = data;
    }

    pub fn has_backend(&self, backend: BackendKind) -> bool {
        !self.per_backend[backend.index()].is_empty()
    }

    pub fn clear_backend(&mut self, backend: BackendKind) {
        self.per_backend[backend.index()] = SerializedData::default();
    }

    pub fn make_copy(&self) -> Self {
        ResourceData {
            common: self.common.make_copy(),
            per_backend: std::array::from_fn(|i| self.per_backend[i].make_copy()),
        }
    }
}
