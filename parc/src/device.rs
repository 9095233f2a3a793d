//! Producer side serialization of descriptions into archiver handles.
//!
//! The device does not compile anything. Callers bring already compiled
//! bytecode and native binding layouts tagged by backend, the device
//! serializes the descriptions next to them and stamps each handle with its
//! id so the archiver can refuse handles from another device.
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::debug;

use pcore::data::SerializedData;
use pcore::serializer::to_vec;

use crate::backend::{BackendFlags, BackendKind};
use crate::desc::{PipelineDesc, PipelineExtra, RenderPassDesc, ResourceSignatureDesc, ShaderCreateInfo};
use crate::error::{ArchiveError, Result};
use crate::resource::{ResourceKey, ResourceKind, ResourceName};

static NEXT_DEVICE_ID: AtomicU64 = AtomicU64::new(1);

/// Implemented by every handle a [`SerializationDevice`] creates.
pub trait DeviceObject {
    fn device_id(&self) -> u64;
    fn key(&self) -> &ResourceKey;
}

#[derive(Debug)]
pub struct SerializationDevice {
    id: u64,
    backends: BackendFlags,
}

#[derive(Debug)]
pub struct SerializedShader {
    device_id: u64,
    key: ResourceKey,
    pub(crate) common: SerializedData,
    /// Full create info, bytecode included
    pub(crate) per_backend: [SerializedData; BackendKind::COUNT],
}

#[derive(Debug)]
pub struct SerializedSignature {
    device_id: u64,
    key: ResourceKey,
    pub(crate) common: SerializedData,
    pub(crate) per_backend: [SerializedData; BackendKind::COUNT],
}

#[derive(Debug)]
pub struct SerializedRenderPass {
    device_id: u64,
    key: ResourceKey,
    pub(crate) common: SerializedData,
}

#[derive(Debug)]
pub struct SerializedPipeline {
    device_id: u64,
    key: ResourceKey,
    pub(crate) common: SerializedData,
    /// Full shader create infos in pipeline shader order
    pub(crate) shaders: [Vec<SerializedData>; BackendKind::COUNT],
    pub(crate) render_pass: Option<Arc<SerializedRenderPass>>,
    pub(crate) signatures: Vec<Arc<SerializedSignature>>,
}

/// One pipeline shader, the create info carries no bytecode.
#[derive(Clone, Debug, Default)]
pub struct PipelineShaderSource<'a> {
    pub info: ShaderCreateInfo<'a>,
    pub bytecode: Vec<(BackendKind, &'a [u8])>,
}

macro_rules! device_object {
    ($($ty:ident),*) => {
        $(
            impl DeviceObject for $ty {
                fn device_id(&self) -> u64 {
                    self.device_id
                }

                fn key(&self) -> &ResourceKey {
                    &self.key
                }
            }

            impl $ty {
                pub fn name(&self) -> &str {
                    self.key.name.as_str()
                }
            }
        )*
    };
}

device_object!(SerializedShader, SerializedSignature, SerializedRenderPass, SerializedPipeline);

impl SerializedPipeline {
    pub fn kind(&self) -> ResourceKind {
        self.key.kind
    }
}

fn required_name(kind: ResourceKind, name: Option<&str>) -> Result<ResourceKey> {
    let name = name.ok_or_else(|| ArchiveError::InvalidName(format!("unnamed {}", kind)))?;
    Ok(ResourceKey::new(kind, ResourceName::new(name)?))
}

impl SerializationDevice {
    pub fn new(backends: BackendFlags) -> Self {
        SerializationDevice {
            id: NEXT_DEVICE_ID.fetch_add(1, Ordering::Relaxed),
            backends,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn backends(&self) -> BackendFlags {
        self.backends
    }

    fn check_backend(&self, backend: BackendKind) -> Result<()> {
        if self.backends.contains(backend) {
            Ok(())
        } else {
            Err(ArchiveError::BackendNotEnabled(backend))
        }
    }

    fn check_handle<T: DeviceObject>(&self, handle: &T) -> Result<()> {
        if handle.device_id() != self.id {
            return Err(ArchiveError::ForeignHandle {
                key: handle.key().clone(),
            });
        }
        Ok(())
    }

    /// Serializes a standalone shader compiled for the listed backends.
    pub fn create_shader(&self, info: &ShaderCreateInfo<'_>, bytecode: &[(BackendKind, &[u8])]) -> Result<SerializedShader> {
        let key = required_name(ResourceKind::StandaloneShader, info.name)?;
        let common = SerializedData::new(to_vec(&info.common())?);

        let mut per_backend: [SerializedData; BackendKind::COUNT] = Default::default();
        for &(backend, code) in bytecode {
            self.check_backend(backend)?;
            let full = ShaderCreateInfo { bytecode: code, ..*info };
            per_backend[backend.index()] = SerializedData::new(to_vec(&full)?);
        }

        Ok(SerializedShader {
            device_id: self.id,
            key,
            common,
            per_backend,
        })
    }

    /// Serializes a resource signature with its native binding layout per
    /// backend. Every enabled backend needs a layout.
    pub fn create_resource_signature(
        &self,
        desc: &ResourceSignatureDesc<'_>,
        layouts: &[(BackendKind, &[u8])],
    ) -> Result<SerializedSignature> {
        let key = required_name(ResourceKind::ResourceSignature, desc.name)?;
        let common = SerializedData::new(to_vec(desc)?);

        let mut per_backend: [SerializedData; BackendKind::COUNT] = Default::default();
        for &(backend, layout) in layouts {
            self.check_backend(backend)?;
            per_backend[backend.index()] = SerializedData::copy_from_slice(layout);
        }
        for backend in self.backends.iter() {
            if per_backend[backend.index()].is_empty() {
                return Err(ArchiveError::BackendDataMissing { key, backend });
            }
        }

        Ok(SerializedSignature {
            device_id: self.id,
            key,
            common,
            per_backend,
        })
    }

    pub fn create_render_pass(&self, desc: &RenderPassDesc<'_>) -> Result<SerializedRenderPass> {
        let key = required_name(ResourceKind::RenderPass, desc.name)?;
        let common = SerializedData::new(to_vec(desc)?);

        Ok(SerializedRenderPass {
            device_id: self.id,
            key,
            common,
        })
    }

    /// Serializes a pipeline.
    ///
    /// Signature and render pass names in `desc` are replaced by the names of
    /// the given handles. A backend is recorded when every shader has
    /// bytecode for it.
    pub fn create_pipeline_state(
        &self,
        desc: &PipelineDesc<'_>,
        render_pass: Option<Arc<SerializedRenderPass>>,
        signatures: Vec<Arc<SerializedSignature>>,
        shaders: &[PipelineShaderSource<'_>],
    ) -> Result<SerializedPipeline> {
        let kind = desc.state.pipeline_type.resource_kind();
        let key = required_name(kind, desc.state.name)?;

        if !desc.is_consistent() {
            return Err(ArchiveError::InvalidDescription {
                key,
                reason: format!("{:?} pipeline with mismatching type specific state", desc.state.pipeline_type),
            });
        }
        if let Some(rt) = desc.ray_tracing() {
            if let Some(idx) = rt.referenced_shaders().find(|idx| *idx as usize >= shaders.len()) {
                return Err(ArchiveError::InvalidDescription {
                    key,
                    reason: format!("shader group references shader {} of {}", idx, shaders.len()),
                });
            }
        }

        let mut desc = *desc;
        let signature_names: Vec<Option<&str>> = signatures.iter().map(|s| Some(s.name())).collect();
        desc.state.resource_signatures = &signature_names;
        for signature in signatures.iter() {
            self.check_handle(signature.as_ref())?;
        }

        if let Some(rp) = render_pass.as_ref() {
            self.check_handle(rp.as_ref())?;
        }
        match (&mut desc.extra, render_pass.as_ref()) {
            (PipelineExtra::Graphics(graphics), rp) => {
                graphics.render_pass = rp.map(|rp| rp.name());
            }
            (_, Some(_)) => {
                return Err(ArchiveError::InvalidDescription {
                    key,
                    reason: "only graphics pipelines use a render pass".to_string(),
                });
            }
            (_, None) => {}
        }
        let common = SerializedData::new(to_vec(&desc)?);

        let mut per_backend: [Vec<SerializedData>; BackendKind::COUNT] = Default::default();
        for shader in shaders {
            for (backend, _) in shader.bytecode.iter() {
                self.check_backend(*backend)?;
            }
        }
        for backend in self.backends.iter() {
            let code: Vec<&[u8]> = shaders
                .iter()
                .filter_map(|s| s.bytecode.iter().find(|(b, _)| *b == backend).map(|(_, code)| *code))
                .collect();
            if code.is_empty() || shaders.is_empty() {
                continue;
            }
            if code.len() != shaders.len() {
                return Err(ArchiveError::IncompleteShaders { key, backend });
            }

            for (shader, code) in shaders.iter().zip(code) {
                let full = ShaderCreateInfo {
                    bytecode: code,
                    ..shader.info
                };
                per_backend[backend.index()].push(SerializedData::new(to_vec(&full)?));
            }
        }
        debug!("{}: {} shaders", key, shaders.len());

        Ok(SerializedPipeline {
            device_id: self.id,
            key,
            common,
            shaders: per_backend,
            render_pass,
            signatures,
        })
    }
}

#[cfg(test)]
mod test_device {
    use super::*;
    use crate::desc::{PipelineStateDesc, PipelineType, ShaderStage};
    use pcore::arena::Arena;
    use pcore::serializer::from_bytes;

    fn compute(name: &'static str) -> PipelineDesc<'static> {
        PipelineDesc {
            state: PipelineStateDesc {
                name: Some(name),
                pipeline_type: PipelineType::Compute,
                resource_signatures: &[Some("ignored")],
                ..Default::default()
            },
            extra: PipelineExtra::Compute,
        }
    }

    fn cs() -> ShaderCreateInfo<'static> {
        ShaderCreateInfo {
            name: Some("CS"),
            stage: ShaderStage::Compute,
            entry_point: Some("main"),
            ..Default::default()
        }
    }

    #[test]
    fn shader_common_has_no_bytecode() {
        let device = SerializationDevice::new(BackendKind::Vulkan.into());
        let shader = device.create_shader(&cs(), &[(BackendKind::Vulkan, &[1, 2, 3])]).unwrap();
        let arena = Arena::new();

        let common: ShaderCreateInfo = from_bytes(shader.common.as_slice(), &arena).unwrap();
        assert!(common.bytecode.is_empty());
        assert_eq!(common.name, None);

        let full: ShaderCreateInfo = from_bytes(shader.per_backend[BackendKind::Vulkan.index()].as_slice(), &arena).unwrap();
        assert_eq!(full.bytecode, &[1, 2, 3]);
        assert_eq!(shader.name(), "CS");
    }

    #[test]
    fn backend_must_be_enabled() {
        let device = SerializationDevice::new(BackendKind::Vulkan.into());

        assert!(matches!(
            device.create_shader(&cs(), &[(BackendKind::D3D12, &[1])]),
            Err(ArchiveError::BackendNotEnabled(BackendKind::D3D12))
        ));
    }

    #[test]
    fn signature_names_come_from_handles() {
        let device = SerializationDevice::new(BackendKind::Vulkan.into());
        let prs = device
            .create_resource_signature(
                &ResourceSignatureDesc {
                    name: Some("PRS"),
                    ..Default::default()
                },
                &[(BackendKind::Vulkan, &[7])],
            )
            .unwrap();
        let source = PipelineShaderSource {
            info: cs(),
            bytecode: vec![(BackendKind::Vulkan, &[0x10, 0x20, 0x30])],
        };
        let pso = device
            .create_pipeline_state(&compute("P"), None, vec![Arc::new(prs)], &[source])
            .unwrap();

        let arena = Arena::new();
        let desc: PipelineDesc = from_bytes(pso.common.as_slice(), &arena).unwrap();
        assert_eq!(desc.state.resource_signatures, &[Some("PRS")]);
        assert_eq!(pso.kind(), ResourceKind::ComputePipeline);
        assert_eq!(pso.shaders[BackendKind::Vulkan.index()].len(), 1);
    }

    #[test]
    fn missing_signature_layout() {
        let device = SerializationDevice::new([BackendKind::Vulkan, BackendKind::D3D12].into_iter().collect());
        let err = device
            .create_resource_signature(
                &ResourceSignatureDesc {
                    name: Some("PRS"),
                    ..Default::default()
                },
                &[(BackendKind::Vulkan, &[7])],
            )
            .unwrap_err();

        assert!(matches!(err, ArchiveError::BackendDataMissing { backend: BackendKind::D3D12, .. }));
    }

    #[test]
    fn incomplete_shaders() {
        let device = SerializationDevice::new([BackendKind::Vulkan, BackendKind::D3D12].into_iter().collect());
        let shaders = [
            PipelineShaderSource {
                info: cs(),
                bytecode: vec![(BackendKind::Vulkan, &[1]), (BackendKind::D3D12, &[2])],
            },
            PipelineShaderSource {
                info: cs(),
                bytecode: vec![(BackendKind::Vulkan, &[3])],
            },
        ];

        assert!(matches!(
            device.create_pipeline_state(&compute("P"), None, Vec::new(), &shaders),
            Err(ArchiveError::IncompleteShaders { backend: BackendKind::D3D12, .. })
        ));
    }

    #[test]
    fn foreign_render_pass() {
        let a = SerializationDevice::new(BackendKind::Vulkan.into());
        let b = SerializationDevice::new(BackendKind::Vulkan.into());
        let rp = b
            .create_render_pass(&RenderPassDesc {
                name: Some("RP"),
                ..Default::default()
            })
            .unwrap();
        let desc = PipelineDesc {
            state: PipelineStateDesc {
                name: Some("G"),
                pipeline_type: PipelineType::Graphics,
                ..Default::default()
            },
            extra: PipelineExtra::Graphics(Default::default()),
        };

        assert!(matches!(
            a.create_pipeline_state(&desc, Some(Arc::new(rp)), Vec::new(), &[]),
            Err(ArchiveError::ForeignHandle { .. })
        ));
    }
}
