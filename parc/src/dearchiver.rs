//! Consumer side loading and lazy object creation.
//!
//! Archives are decoded once on load, the resources themselves are only
//! deserialized when a caller asks for them. Live objects are created by a
//! [`BackendFactory`] and cached by name with weak references, the cache never
//! keeps an object alive on its own.
//!
//! Cache locks are only held for a lookup or an insert, never across a
//! factory call. Two threads unpacking the same name may both create an
//! object, the last one to finish owns the cache slot.
use std::collections::HashMap;
use std::hash::Hash;
use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

use bytes::Bytes;
use log::{debug, info, warn};
use thiserror::Error;

use pcore::arena::Arena;
use pcore::data::SerializedData;
use pcore::serializer::from_bytes;
use pcore::source::{read_all, ArchiveSource};

use crate::archive::Archive;
use crate::backend::{BackendKind, DeviceType};
use crate::desc::{PipelineDesc, RenderPassDesc, ResourceSignatureDesc, ShaderCreateInfo};
use crate::error::{ArchiveError, Result};
use crate::format::ArchiveLayout;
use crate::payload::{decode_index, decode_indices, shader_indices};
use crate::resource::{ResourceData, ResourceKey, ResourceKind};

/// Failure reported by a [`BackendFactory`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct FactoryError(pub String);

/// Creates live backend objects from deserialized descriptions.
pub trait BackendFactory {
    type Shader;
    type Signature;
    type RenderPass;
    type Pipeline;

    fn device_type(&self) -> DeviceType;

    /// Backend whose data is unpacked, GL and GLES share one.
    fn backend(&self) -> BackendKind {
        self.device_type().backend()
    }

    fn create_shader(&self, info: &ShaderCreateInfo<'_>) -> std::result::Result<Self::Shader, FactoryError>;

    fn create_resource_signature(
        &self,
        desc: &ResourceSignatureDesc<'_>,
        layout: &[u8],
    ) -> std::result::Result<Self::Signature, FactoryError>;

    fn create_render_pass(&self, desc: &RenderPassDesc<'_>) -> std::result::Result<Self::RenderPass, FactoryError>;

    /// Whether a modify hook may put `replacement` in place of `original`.
    /// Compatible signatures differ at most in their immutable sampler
    /// descriptions. Only the same object is accepted by default.
    fn is_compatible_signature(&self, _original: &Self::Signature, _replacement: &Self::Signature) -> bool {
        false
    }

    fn create_pipeline(&self, info: &PipelineCreateInfo<'_, Self>) -> std::result::Result<Self::Pipeline, FactoryError>
    where
        Self: Sized;
}

pub struct PipelineShader<'a, F: BackendFactory> {
    /// Create info as archived, bytecode included
    pub info: ShaderCreateInfo<'a>,
    pub shader: Arc<F::Shader>,
}

/// Fully resolved pipeline handed to [`BackendFactory::create_pipeline`].
pub struct PipelineCreateInfo<'a, F: BackendFactory> {
    pub name: &'a str,
    pub desc: PipelineDesc<'a>,
    pub render_pass: Option<Arc<F::RenderPass>>,
    /// In the order of `desc.state.resource_signatures`
    pub signatures: Vec<Arc<F::Signature>>,
    pub shaders: Vec<PipelineShader<'a, F>>,
}

/// Rewrites a render pass description before creation, allocations go to
/// the arena.
pub type RenderPassHook<'h> = &'h dyn for<'x> Fn(&mut RenderPassDesc<'x>, &'x Arena);

/// Rewrites a pipeline before creation. Only fixed function state and
/// immutable sampler descriptions may change.
pub type PipelineHook<'h, F> = &'h dyn for<'x> Fn(&mut PipelineCreateInfo<'x, F>, &'x Arena);

pub enum UnpackedObject<F: BackendFactory> {
    Shader(Arc<F::Shader>),
    Signature(Arc<F::Signature>),
    RenderPass(Arc<F::RenderPass>),
    Pipeline(Arc<F::Pipeline>),
}

/// Outcome of [`Dearchiver::load_archive`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub added: usize,
    /// Already loaded with identical content
    pub duplicates: usize,
    /// Already loaded with different content, the first archive wins
    pub conflicts: Vec<ResourceKey>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Name to object map holding weak references.
struct WeakCache<K, T> {
    entries: Mutex<HashMap<K, Weak<T>>>,
}

impl<K: Eq + Hash, T> WeakCache<K, T> {
    fn new() -> Self {
        WeakCache {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn get(&self, key: &K) -> Option<Arc<T>> {
        let mut entries = lock(&self.entries);
        let object = entries.get(key)?.upgrade();
        if object.is_none() {
            entries.remove(key);
        }
        object
    }

    fn insert(&self, key: K, object: &Arc<T>) {
        lock(&self.entries).insert(key, Arc::downgrade(object));
    }

    fn clear(&self) {
        lock(&self.entries).clear();
    }
}

struct LoadedArchive {
    data: Bytes,
    archive: Archive,
}

#[derive(Default)]
struct ArchiveIndex {
    archives: Vec<LoadedArchive>,
    owners: HashMap<ResourceKey, usize>,
}

impl ArchiveIndex {
    /// Backend data of a resource with shader indices resolved to blobs.
    fn resolved(&self, archive: usize, key: &ResourceKey, data: &ResourceData, backend: BackendKind) -> Result<Vec<SerializedData>> {
        let slot = data.backend(backend);
        if !key.kind.references_shaders() || slot.is_empty() {
            return Ok(vec![slot.clone()]);
        }

        let archive = &self.archives[archive].archive;
        shader_indices(key.kind, slot.as_slice())?
            .into_iter()
            .map(|idx| {
                archive
                    .shader(backend, idx)
                    .cloned()
                    .ok_or_else(|| ArchiveError::corrupt(format!("{} references missing {} shader {}", key, backend, idx)))
            })
            .collect()
    }

    /// True when both archives describe the resource identically. Shader
    /// indices are compared by the blobs they point to.
    fn same_resource(&self, a: usize, b: usize, key: &ResourceKey) -> Result<bool> {
        let (Some(data_a), Some(data_b)) = (self.archives[a].archive.get(key), self.archives[b].archive.get(key)) else {
            return Ok(false);
        };
        if data_a.common != data_b.common {
            return Ok(false);
        }
        for backend in BackendKind::ALL {
            if self.resolved(a, key, data_a, backend)? != self.resolved(b, key, data_b, backend)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

pub struct Dearchiver<F: BackendFactory> {
    factory: F,
    index: RwLock<ArchiveIndex>,
    signatures: WeakCache<ResourceKey, F::Signature>,
    render_passes: WeakCache<ResourceKey, F::RenderPass>,
    shaders: WeakCache<ResourceKey, F::Shader>,
    pipelines: [WeakCache<ResourceKey, F::Pipeline>; 4],
    /// Shader objects by `(archive, pool index)`, shared by every pipeline
    pool_shaders: Mutex<HashMap<(usize, u32), Arc<F::Shader>>>,
}

fn pipeline_slot(kind: ResourceKind) -> Result<usize> {
    match kind {
        ResourceKind::GraphicsPipeline => Ok(0),
        ResourceKind::ComputePipeline => Ok(1),
        ResourceKind::RayTracingPipeline => Ok(2),
        ResourceKind::TilePipeline => Ok(3),
        kind => Err(ArchiveError::NotAPipeline { kind }),
    }
}

// A missing dependency is reported against the resource that needs it
fn dependency<T>(key: &ResourceKey, result: Result<T>) -> Result<T> {
    result.map_err(|e| match e {
        ArchiveError::NotFound(missing) => ArchiveError::DependencyMissing {
            key: key.clone(),
            missing,
        },
        e => e,
    })
}

fn disallowed(key: &ResourceKey, reason: &str) -> ArchiveError {
    ArchiveError::DisallowedModification {
        key: key.clone(),
        reason: reason.to_string(),
    }
}

impl<F: BackendFactory> Dearchiver<F> {
    pub fn new(factory: F) -> Self {
        Dearchiver {
            factory,
            index: RwLock::new(ArchiveIndex::default()),
            signatures: WeakCache::new(),
            render_passes: WeakCache::new(),
            shaders: WeakCache::new(),
            pipelines: std::array::from_fn(|_| WeakCache::new()),
            pool_shaders: Mutex::new(HashMap::new()),
        }
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    pub fn archive_count(&self) -> usize {
        self.index.read().unwrap_or_else(PoisonError::into_inner).archives.len()
    }

    /// Loads an archive of either layout.
    ///
    /// Header problems fail the load. A name already provided by an earlier
    /// archive is kept from that archive, differing content is listed in the
    /// report. Loading the same buffer again does nothing.
    pub fn load_archive(&self, data: Bytes, expected_content_version: Option<u32>) -> Result<LoadReport> {
        {
            let index = self.index.read().unwrap_or_else(PoisonError::into_inner);
            if index
                .archives
                .iter()
                .any(|loaded| loaded.data.as_ptr() == data.as_ptr() && loaded.data.len() == data.len())
            {
                debug!("archive already loaded");
                return Ok(LoadReport::default());
            }
        }

        let archive = Archive::decode(&data, expected_content_version)?;
        let keys: Vec<ResourceKey> = archive.resources().map(|(key, _)| key.clone()).collect();

        let mut index = self.index.write().unwrap_or_else(PoisonError::into_inner);
        let idx = index.archives.len();
        index.archives.push(LoadedArchive { data, archive });

        let mut report = LoadReport::default();
        for key in keys {
            match index.owners.get(&key).copied() {
                None => {
                    index.owners.insert(key, idx);
                    report.added += 1;
                }
                Some(owner) => match index.same_resource(owner, idx, &key) {
                    Ok(true) => report.duplicates += 1,
                    Ok(false) => {
                        warn!("{} differs from the already loaded one, keeping the first", key);
                        report.conflicts.push(key);
                    }
                    Err(e) => {
                        index.archives.pop();
                        index.owners.retain(|_, owner| *owner != idx);
                        return Err(e);
                    }
                },
            }
        }
        info!(
            "loaded archive {}: {} resources, {} duplicates, {} conflicts",
            idx,
            report.added,
            report.duplicates,
            report.conflicts.len()
        );
        Ok(report)
    }

    pub fn load_archive_from(&self, source: &dyn ArchiveSource, expected_content_version: Option<u32>) -> Result<LoadReport> {
        self.load_archive(read_all(source)?, expected_content_version)
    }

    /// Owning archive and a cheap copy of the resource data.
    fn find(&self, key: &ResourceKey) -> Result<(usize, ResourceData)> {
        let index = self.index.read().unwrap_or_else(PoisonError::into_inner);
        let owner = *index
            .owners
            .get(key)
            .ok_or_else(|| ArchiveError::NotFound(key.clone()))?;
        let data = index.archives[owner]
            .archive
            .get(key)
            .cloned()
            .ok_or_else(|| ArchiveError::NotFound(key.clone()))?;
        Ok((owner, data))
    }

    fn backend_slot(&self, key: &ResourceKey, data: &ResourceData) -> Result<SerializedData> {
        let backend = self.factory.backend();
        let slot = data.backend(backend);
        if slot.is_empty() {
            return Err(ArchiveError::BackendDataMissing {
                key: key.clone(),
                backend,
            });
        }
        Ok(slot.clone())
    }

    fn pool_entry(&self, key: &ResourceKey, archive: usize, idx: u32) -> Result<SerializedData> {
        let backend = self.factory.backend();
        let index = self.index.read().unwrap_or_else(PoisonError::into_inner);
        match index.archives[archive].archive.shader(backend, idx) {
            Some(entry) => Ok(entry.clone()),
            None => Err(ArchiveError::DependencyMissing {
                key: key.clone(),
                missing: ResourceKey::named(ResourceKind::StandaloneShader, &format!("{} shader #{}", backend, idx))?,
            }),
        }
    }

    /// Shader object for one pool entry, created once per archive and index.
    fn pool_shader(&self, key: &ResourceKey, archive: usize, idx: u32, info: &ShaderCreateInfo<'_>) -> Result<Arc<F::Shader>> {
        if let Some(shader) = lock(&self.pool_shaders).get(&(archive, idx)) {
            return Ok(shader.clone());
        }

        let shader = self.factory.create_shader(info).map_err(|source| ArchiveError::Factory {
            key: key.clone(),
            source,
        })?;
        let shader = Arc::new(shader);
        lock(&self.pool_shaders).insert((archive, idx), shader.clone());
        Ok(shader)
    }

    pub fn unpack_resource_signature(&self, name: &str) -> Result<Arc<F::Signature>> {
        let key = ResourceKey::named(ResourceKind::ResourceSignature, name)?;
        if let Some(signature) = self.signatures.get(&key) {
            return Ok(signature);
        }

        let (_, data) = self.find(&key)?;
        let layout = self.backend_slot(&key, &data)?;
        let arena = Arena::new();
        let mut desc: ResourceSignatureDesc = from_bytes(data.common.as_slice(), &arena)?;
        desc.name = Some(key.name.as_str());

        let signature = self
            .factory
            .create_resource_signature(&desc, layout.as_slice())
            .map_err(|source| ArchiveError::Factory {
                key: key.clone(),
                source,
            })?;
        let signature = Arc::new(signature);
        debug!("created {}", key);
        self.signatures.insert(key, &signature);
        Ok(signature)
    }

    /// Unpacks a render pass. A modified render pass is not cached.
    pub fn unpack_render_pass(&self, name: &str, modify: Option<RenderPassHook<'_>>) -> Result<Arc<F::RenderPass>> {
        let key = ResourceKey::named(ResourceKind::RenderPass, name)?;
        if modify.is_none() {
            if let Some(render_pass) = self.render_passes.get(&key) {
                return Ok(render_pass);
            }
        }

        let (_, data) = self.find(&key)?;
        let arena = Arena::new();
        let mut desc: RenderPassDesc = from_bytes(data.common.as_slice(), &arena)?;
        desc.name = Some(key.name.as_str());
        if let Some(modify) = modify {
            modify(&mut desc, &arena);
        }

        let render_pass = self
            .factory
            .create_render_pass(&desc)
            .map_err(|source| ArchiveError::Factory {
                key: key.clone(),
                source,
            })?;
        let render_pass = Arc::new(render_pass);
        if modify.is_none() {
            self.render_passes.insert(key, &render_pass);
        }
        Ok(render_pass)
    }

    pub fn unpack_shader(&self, name: &str) -> Result<Arc<F::Shader>> {
        let key = ResourceKey::named(ResourceKind::StandaloneShader, name)?;
        if let Some(shader) = self.shaders.get(&key) {
            return Ok(shader);
        }

        let (archive, data) = self.find(&key)?;
        let idx = decode_index(self.backend_slot(&key, &data)?.as_slice())?;
        let blob = self.pool_entry(&key, archive, idx)?;
        let arena = Arena::new();
        let info: ShaderCreateInfo = from_bytes(blob.as_slice(), &arena)?;

        let shader = self.pool_shader(&key, archive, idx, &info)?;
        self.shaders.insert(key, &shader);
        Ok(shader)
    }

    /// Unpacks a pipeline with its render pass, signatures and shaders.
    ///
    /// With a hook the pipeline is neither looked up in nor added to the
    /// cache, dependencies are cached as usual.
    pub fn unpack_pipeline(
        &self,
        kind: ResourceKind,
        name: &str,
        modify: Option<PipelineHook<'_, F>>,
    ) -> Result<Arc<F::Pipeline>> {
        let cache = &self.pipelines[pipeline_slot(kind)?];
        let key = ResourceKey::named(kind, name)?;
        if modify.is_none() {
            if let Some(pipeline) = cache.get(&key) {
                return Ok(pipeline);
            }
        }

        let (archive, data) = self.find(&key)?;
        let indices = decode_indices(self.backend_slot(&key, &data)?.as_slice())?;
        let blobs = indices
            .iter()
            .map(|idx| self.pool_entry(&key, archive, *idx))
            .collect::<Result<Vec<SerializedData>>>()?;

        let arena = Arena::new();
        let mut desc: PipelineDesc = from_bytes(data.common.as_slice(), &arena)?;
        desc.state.name = Some(key.name.as_str());
        if desc.state.pipeline_type.resource_kind() != kind {
            return Err(ArchiveError::corrupt(format!(
                "{} holds a {:?} pipeline",
                key, desc.state.pipeline_type
            )));
        }

        let render_pass = match desc.render_pass() {
            Some(rp) => Some(dependency(&key, self.unpack_render_pass(rp, None))?),
            None => None,
        };
        let signatures = desc
            .state
            .resource_signatures
            .iter()
            .flatten()
            .map(|name| dependency(&key, self.unpack_resource_signature(name)))
            .collect::<Result<Vec<_>>>()?;

        let mut shaders = Vec::with_capacity(blobs.len());
        for (idx, blob) in indices.iter().zip(blobs.iter()) {
            let info: ShaderCreateInfo = from_bytes(blob.as_slice(), &arena)?;
            let shader = self.pool_shader(&key, archive, *idx, &info)?;
            shaders.push(PipelineShader { info, shader });
        }

        let mut create_info = PipelineCreateInfo {
            name: key.name.as_str(),
            desc,
            render_pass,
            signatures,
            shaders,
        };
        if let Some(modify) = modify {
            let original = Snapshot::of(&create_info);
            modify(&mut create_info, &arena);
            original.check(&self.factory, &key, &create_info)?;
        }

        let pipeline = self
            .factory
            .create_pipeline(&create_info)
            .map_err(|source| ArchiveError::Factory {
                key: key.clone(),
                source,
            })?;
        let pipeline = Arc::new(pipeline);
        debug!("created {}", key);
        if modify.is_none() {
            cache.insert(key, &pipeline);
        }
        Ok(pipeline)
    }

    pub fn unpack(&self, kind: ResourceKind, name: &str) -> Result<UnpackedObject<F>> {
        Ok(match kind {
            ResourceKind::StandaloneShader => UnpackedObject::Shader(self.unpack_shader(name)?),
            ResourceKind::ResourceSignature => UnpackedObject::Signature(self.unpack_resource_signature(name)?),
            ResourceKind::RenderPass => UnpackedObject::RenderPass(self.unpack_render_pass(name, None)?),
            kind => UnpackedObject::Pipeline(self.unpack_pipeline(kind, name, None)?),
        })
    }

    /// Every loaded archive merged into one, shader indices renumbered.
    pub fn merged(&self) -> Result<Archive> {
        let index = self.index.read().unwrap_or_else(PoisonError::into_inner);
        let mut merged = match index.archives.first() {
            Some(first) => {
                let mut archive = Archive::new(first.archive.content_version);
                archive.build_id = first.archive.build_id.clone();
                archive
            }
            None => Archive::default(),
        };

        for loaded in index.archives.iter() {
            let report = merged.merge_from(&loaded.archive)?;
            debug!(
                "merged {} resources, {} duplicates, {} conflicts",
                report.added,
                report.duplicates,
                report.conflicts.len()
            );
        }
        Ok(merged)
    }

    pub fn store<W: Write>(&self, sink: &mut W, layout: ArchiveLayout) -> Result<usize> {
        self.merged()?.write_to(sink, layout)
    }

    pub fn store_to_vec(&self, layout: ArchiveLayout) -> Result<Vec<u8>> {
        self.merged()?.encode(layout)
    }

    pub fn clear_resource_cache(&self) {
        self.signatures.clear();
        self.render_passes.clear();
        self.shaders.clear();
        for cache in self.pipelines.iter() {
            cache.clear();
        }
        lock(&self.pool_shaders).clear();
    }

    /// Drops every loaded archive and cached object.
    pub fn reset(&self) {
        self.clear_resource_cache();
        *self.index.write().unwrap_or_else(PoisonError::into_inner) = ArchiveIndex::default();
    }
}

/// The parts of a pipeline a hook must leave alone.
struct Snapshot<'a, F: BackendFactory> {
    desc: PipelineDesc<'a>,
    render_pass: Option<Arc<F::RenderPass>>,
    signatures: Vec<Arc<F::Signature>>,
    shaders: Vec<(ShaderCreateInfo<'a>, Arc<F::Shader>)>,
}

fn same_arc<T>(a: &Option<Arc<T>>, b: &Option<Arc<T>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

impl<'a, F: BackendFactory> Snapshot<'a, F> {
    fn of(info: &PipelineCreateInfo<'a, F>) -> Self {
        Snapshot {
            desc: info.desc,
            render_pass: info.render_pass.clone(),
            signatures: info.signatures.clone(),
            shaders: info.shaders.iter().map(|s| (s.info, s.shader.clone())).collect(),
        }
    }

    fn check(&self, factory: &F, key: &ResourceKey, info: &PipelineCreateInfo<'a, F>) -> Result<()> {
        let (before, after) = (&self.desc.state, &info.desc.state);
        if before.pipeline_type != after.pipeline_type {
            return Err(disallowed(key, "pipeline type changed"));
        }
        if before.resource_signatures != after.resource_signatures {
            return Err(disallowed(key, "resource signatures changed"));
        }

        let (before, after) = (&before.resource_layout, &after.resource_layout);
        if before.default_variable_type != after.default_variable_type
            || before.default_variable_merge_stages != after.default_variable_merge_stages
        {
            return Err(disallowed(key, "default variable type changed"));
        }
        if before.variables != after.variables {
            return Err(disallowed(key, "shader variables changed"));
        }
        if before.immutable_samplers.len() != after.immutable_samplers.len() {
            return Err(disallowed(key, "immutable sampler count changed"));
        }
        for (b, a) in before.immutable_samplers.iter().zip(after.immutable_samplers.iter()) {
            if b.sampler_or_texture_name != a.sampler_or_texture_name || b.shader_stages != a.shader_stages {
                return Err(disallowed(key, "immutable sampler name or stages changed"));
            }
        }

        if !same_arc(&self.render_pass, &info.render_pass) || self.desc.render_pass() != info.desc.render_pass() {
            return Err(disallowed(key, "render pass changed"));
        }
        if self.signatures.len() != info.signatures.len()
            || self
                .signatures
                .iter()
                .zip(info.signatures.iter())
                .any(|(b, a)| !Arc::ptr_eq(b, a) && !factory.is_compatible_signature(b, a))
        {
            return Err(disallowed(key, "incompatible signature object"));
        }
        if self.shaders.len() != info.shaders.len()
            || self
                .shaders
                .iter()
                .zip(info.shaders.iter())
                .any(|((b_info, b), a)| *b_info != a.info || !Arc::ptr_eq(b, &a.shader))
        {
            return Err(disallowed(key, "shaders changed"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod test_dearchiver {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::archiver::Archiver;
    use crate::backend::BackendFlags;
    use crate::desc::{
        FilterType, GraphicsPipelineDesc, ImmutableSamplerDesc, PipelineExtra, PipelineResourceLayoutDesc,
        PipelineStateDesc, PipelineType, SamplerDesc, ShaderStage,
    };
    use crate::device::{PipelineShaderSource, SerializationDevice};

    #[derive(Default)]
    struct MockFactory {
        shaders: AtomicUsize,
        signatures: AtomicUsize,
        render_passes: AtomicUsize,
        pipelines: AtomicUsize,
        bytecode: Mutex<Vec<Vec<u8>>>,
        min_filters: Mutex<Vec<FilterType>>,
    }

    #[derive(Debug)]
    struct MockPipeline {
        signatures: usize,
        has_render_pass: bool,
    }

    impl BackendFactory for MockFactory {
        type Shader = Vec<u8>;
        type Signature = String;
        type RenderPass = String;
        type Pipeline = MockPipeline;

        fn device_type(&self) -> DeviceType {
            DeviceType::Vulkan
        }

        fn create_shader(&self, info: &ShaderCreateInfo<'_>) -> std::result::Result<Vec<u8>, FactoryError> {
            self.shaders.fetch_add(1, Ordering::SeqCst);
            Ok(info.bytecode.to_vec())
        }

        fn create_resource_signature(
            &self,
            desc: &ResourceSignatureDesc<'_>,
            layout: &[u8],
        ) -> std::result::Result<String, FactoryError> {
            self.signatures.fetch_add(1, Ordering::SeqCst);
            if layout.is_empty() {
                return Err(FactoryError("empty layout".to_string()));
            }
            Ok(desc.name.unwrap_or_default().to_string())
        }

        fn create_render_pass(&self, desc: &RenderPassDesc<'_>) -> std::result::Result<String, FactoryError> {
            self.render_passes.fetch_add(1, Ordering::SeqCst);
            Ok(desc.name.unwrap_or_default().to_string())
        }

        fn is_compatible_signature(&self, original: &String, replacement: &String) -> bool {
            original == replacement
        }

        fn create_pipeline(&self, info: &PipelineCreateInfo<'_, Self>) -> std::result::Result<MockPipeline, FactoryError> {
            self.pipelines.fetch_add(1, Ordering::SeqCst);
            let mut bytecode = lock(&self.bytecode);
            bytecode.clear();
            bytecode.extend(info.shaders.iter().map(|s| s.info.bytecode.to_vec()));
            *lock(&self.min_filters) = info
                .desc
                .state
                .resource_layout
                .immutable_samplers
                .iter()
                .map(|s| s.desc.min_filter)
                .collect();

            Ok(MockPipeline {
                signatures: info.signatures.len(),
                has_render_pass: info.render_pass.is_some(),
            })
        }
    }

    fn compute_archive(bytecode: &[u8]) -> Bytes {
        let device = SerializationDevice::new(BackendKind::Vulkan.into());
        let archiver = Archiver::new(&device).with_content_version(1);
        let desc = PipelineDesc {
            state: PipelineStateDesc {
                name: Some("P"),
                pipeline_type: PipelineType::Compute,
                ..Default::default()
            },
            extra: PipelineExtra::Compute,
        };
        let shader = PipelineShaderSource {
            info: ShaderCreateInfo {
                name: Some("CS"),
                stage: ShaderStage::Compute,
                entry_point: Some("main"),
                ..Default::default()
            },
            bytecode: vec![(BackendKind::Vulkan, bytecode)],
        };
        let pso = device.create_pipeline_state(&desc, None, Vec::new(), &[shader]).unwrap();
        archiver.add_pipeline_state(&pso).unwrap();
        Bytes::from(archiver.serialize_to_vec(ArchiveLayout::Stream).unwrap())
    }

    fn graphics_archive() -> Bytes {
        let device = SerializationDevice::new(BackendFlags::from(BackendKind::Vulkan));
        let archiver = Archiver::new(&device);
        let rp = device
            .create_render_pass(&RenderPassDesc {
                name: Some("RP"),
                ..Default::default()
            })
            .unwrap();
        let prs = device
            .create_resource_signature(
                &ResourceSignatureDesc {
                    name: Some("PRS"),
                    ..Default::default()
                },
                &[(BackendKind::Vulkan, &[1, 2, 3, 4])],
            )
            .unwrap();
        let samplers = [ImmutableSamplerDesc {
            shader_stages: ShaderStage::Pixel.into(),
            sampler_or_texture_name: Some("g_Texture"),
            desc: SamplerDesc {
                min_filter: FilterType::Point,
                ..Default::default()
            },
        }];
        let desc = PipelineDesc {
            state: PipelineStateDesc {
                name: Some("G"),
                pipeline_type: PipelineType::Graphics,
                resource_layout: PipelineResourceLayoutDesc {
                    immutable_samplers: &samplers,
                    ..Default::default()
                },
                ..Default::default()
            },
            extra: PipelineExtra::Graphics(GraphicsPipelineDesc::default()),
        };
        let shaders = [
            PipelineShaderSource {
                info: ShaderCreateInfo {
                    name: Some("VS"),
                    stage: ShaderStage::Vertex,
                    ..Default::default()
                },
                bytecode: vec![(BackendKind::Vulkan, &[0xAA])],
            },
            PipelineShaderSource {
                info: ShaderCreateInfo {
                    name: Some("PS"),
                    stage: ShaderStage::Pixel,
                    ..Default::default()
                },
                bytecode: vec![(BackendKind::Vulkan, &[0xBB])],
            },
        ];
        let pso = device
            .create_pipeline_state(&desc, Some(Arc::new(rp)), vec![Arc::new(prs)], &shaders)
            .unwrap();
        archiver.add_pipeline_state(&pso).unwrap();
        Bytes::from(archiver.serialize_to_vec(ArchiveLayout::Blocks).unwrap())
    }

    #[test]
    fn compute_pipeline_end_to_end() {
        let dearchiver = Dearchiver::new(MockFactory::default());
        dearchiver.load_archive(compute_archive(&[0x10, 0x20, 0x30]), Some(1)).unwrap();

        let first = dearchiver.unpack_pipeline(ResourceKind::ComputePipeline, "P", None).unwrap();
        let factory = dearchiver.factory();
        assert_eq!(factory.pipelines.load(Ordering::SeqCst), 1);
        assert_eq!(*lock(&factory.bytecode), vec![vec![0x10, 0x20, 0x30]]);

        let second = dearchiver.unpack_pipeline(ResourceKind::ComputePipeline, "P", None).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(factory.pipelines.load(Ordering::SeqCst), 1);
        assert_eq!(factory.shaders.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn weak_cache_recreates_dropped_objects() {
        let dearchiver = Dearchiver::new(MockFactory::default());
        dearchiver.load_archive(compute_archive(&[1]), None).unwrap();

        drop(dearchiver.unpack_pipeline(ResourceKind::ComputePipeline, "P", None).unwrap());
        dearchiver.unpack_pipeline(ResourceKind::ComputePipeline, "P", None).unwrap();

        assert_eq!(dearchiver.factory().pipelines.load(Ordering::SeqCst), 2);
        // The shader object is shared, not recreated
        assert_eq!(dearchiver.factory().shaders.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn graphics_dependencies_resolved() {
        let dearchiver = Dearchiver::new(MockFactory::default());
        dearchiver.load_archive(graphics_archive(), None).unwrap();

        let pso = dearchiver.unpack_pipeline(ResourceKind::GraphicsPipeline, "G", None).unwrap();
        assert_eq!(pso.signatures, 1);
        assert!(pso.has_render_pass);
        assert_eq!(*lock(&dearchiver.factory().bytecode), vec![vec![0xAA], vec![0xBB]]);

        // Dependencies stay cached while the caller holds them
        let prs = dearchiver.unpack_resource_signature("PRS").unwrap();
        assert_eq!(prs.as_str(), "PRS");
        dearchiver.unpack_resource_signature("PRS").unwrap();
        assert_eq!(dearchiver.factory().signatures.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn wrong_kind_and_missing() {
        let dearchiver = Dearchiver::new(MockFactory::default());
        dearchiver.load_archive(compute_archive(&[1]), None).unwrap();

        assert!(matches!(
            dearchiver.unpack_pipeline(ResourceKind::RenderPass, "P", None),
            Err(ArchiveError::NotAPipeline { .. })
        ));
        assert!(matches!(
            dearchiver.unpack_pipeline(ResourceKind::GraphicsPipeline, "P", None),
            Err(ArchiveError::NotFound(_))
        ));
        assert!(matches!(dearchiver.unpack(ResourceKind::ComputePipeline, "P"), Ok(UnpackedObject::Pipeline(_))));
    }

    #[test]
    fn missing_backend_data() {
        struct D3D12Factory(MockFactory);

        impl BackendFactory for D3D12Factory {
            type Shader = Vec<u8>;
            type Signature = String;
            type RenderPass = String;
            type Pipeline = MockPipeline;

            fn device_type(&self) -> DeviceType {
                DeviceType::D3D12
            }

            fn create_shader(&self, info: &ShaderCreateInfo<'_>) -> std::result::Result<Vec<u8>, FactoryError> {
                self.0.create_shader(info)
            }

            fn create_resource_signature(
                &self,
                desc: &ResourceSignatureDesc<'_>,
                layout: &[u8],
            ) -> std::result::Result<String, FactoryError> {
                self.0.create_resource_signature(desc, layout)
            }

            fn create_render_pass(&self, desc: &RenderPassDesc<'_>) -> std::result::Result<String, FactoryError> {
                self.0.create_render_pass(desc)
            }

            fn create_pipeline(&self, _: &PipelineCreateInfo<'_, Self>) -> std::result::Result<MockPipeline, FactoryError> {
                Err(FactoryError("unreachable".to_string()))
            }
        }

        let dearchiver = Dearchiver::new(D3D12Factory(MockFactory::default()));
        dearchiver.load_archive(compute_archive(&[1]), None).unwrap();

        assert!(matches!(
            dearchiver.unpack_pipeline(ResourceKind::ComputePipeline, "P", None),
            Err(ArchiveError::BackendDataMissing { backend: BackendKind::D3D12, .. })
        ));
    }

    fn sharper_sampler<'x>(info: &mut PipelineCreateInfo<'x, MockFactory>, arena: &'x Arena) {
        let samplers = arena
            .alloc_slice_copy(info.desc.state.resource_layout.immutable_samplers)
            .unwrap();
        for sampler in samplers.iter_mut() {
            sampler.desc.min_filter = FilterType::Anisotropic;
        }
        info.desc.state.resource_layout.immutable_samplers = samplers;
    }

    fn renamed_sampler<'x>(info: &mut PipelineCreateInfo<'x, MockFactory>, arena: &'x Arena) {
        let samplers = arena
            .alloc_slice_copy(info.desc.state.resource_layout.immutable_samplers)
            .unwrap();
        samplers[0].sampler_or_texture_name = Some("g_Other");
        info.desc.state.resource_layout.immutable_samplers = samplers;
    }

    fn dropped_signature<'x>(info: &mut PipelineCreateInfo<'x, MockFactory>, _: &'x Arena) {
        info.signatures.clear();
    }

    fn rebuilt_signature<'x>(info: &mut PipelineCreateInfo<'x, MockFactory>, _: &'x Arena) {
        info.signatures[0] = Arc::new("PRS".to_string());
    }

    fn foreign_signature<'x>(info: &mut PipelineCreateInfo<'x, MockFactory>, _: &'x Arena) {
        info.signatures[0] = Arc::new("Other".to_string());
    }

    #[test]
    fn modify_hook_whitelist() {
        let dearchiver = Dearchiver::new(MockFactory::default());
        dearchiver.load_archive(graphics_archive(), None).unwrap();

        let cached = dearchiver.unpack_pipeline(ResourceKind::GraphicsPipeline, "G", None).unwrap();
        let modified = dearchiver
            .unpack_pipeline(ResourceKind::GraphicsPipeline, "G", Some(&sharper_sampler))
            .unwrap();
        assert!(!Arc::ptr_eq(&cached, &modified));
        assert_eq!(*lock(&dearchiver.factory().min_filters), vec![FilterType::Anisotropic]);

        // The modified pipeline did not replace the cached one
        let again = dearchiver.unpack_pipeline(ResourceKind::GraphicsPipeline, "G", None).unwrap();
        assert!(Arc::ptr_eq(&cached, &again));

        let hooks: [for<'x> fn(&mut PipelineCreateInfo<'x, MockFactory>, &'x Arena); 3] =
            [renamed_sampler, dropped_signature, foreign_signature];
        for hook in hooks {
            assert!(matches!(
                dearchiver.unpack_pipeline(ResourceKind::GraphicsPipeline, "G", Some(&hook)),
                Err(ArchiveError::DisallowedModification { .. })
            ));
        }
        assert_eq!(dearchiver.factory().pipelines.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn compatible_signature_swap() {
        let dearchiver = Dearchiver::new(MockFactory::default());
        dearchiver.load_archive(graphics_archive(), None).unwrap();

        let pso = dearchiver
            .unpack_pipeline(ResourceKind::GraphicsPipeline, "G", Some(&rebuilt_signature))
            .unwrap();
        assert_eq!(pso.signatures, 1);
        assert_eq!(dearchiver.factory().pipelines.load(Ordering::SeqCst), 1);
    }

    fn without(data: &Bytes, kind: ResourceKind, name: &str) -> Bytes {
        let mut archive = Archive::decode(data, None).unwrap();
        archive.remove(&ResourceKey::named(kind, name).unwrap()).unwrap();
        Bytes::from(archive.encode(ArchiveLayout::Blocks).unwrap())
    }

    #[test]
    fn missing_signature_dependency() {
        let dearchiver = Dearchiver::new(MockFactory::default());
        dearchiver
            .load_archive(without(&graphics_archive(), ResourceKind::ResourceSignature, "PRS"), None)
            .unwrap();

        let err = dearchiver.unpack_pipeline(ResourceKind::GraphicsPipeline, "G", None).unwrap_err();
        match err {
            ArchiveError::DependencyMissing { key, missing } => {
                assert_eq!(key, ResourceKey::named(ResourceKind::GraphicsPipeline, "G").unwrap());
                assert_eq!(missing, ResourceKey::named(ResourceKind::ResourceSignature, "PRS").unwrap());
            }
            e => panic!("unexpected error {:?}", e),
        }

        // The rest of the archive is still usable
        assert_eq!(dearchiver.unpack_render_pass("RP", None).unwrap().as_str(), "RP");
        assert_eq!(dearchiver.factory().pipelines.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn missing_render_pass_dependency() {
        let dearchiver = Dearchiver::new(MockFactory::default());
        dearchiver
            .load_archive(without(&graphics_archive(), ResourceKind::RenderPass, "RP"), None)
            .unwrap();

        let err = dearchiver.unpack_pipeline(ResourceKind::GraphicsPipeline, "G", None).unwrap_err();
        match err {
            ArchiveError::DependencyMissing { key, missing } => {
                assert_eq!(key, ResourceKey::named(ResourceKind::GraphicsPipeline, "G").unwrap());
                assert_eq!(missing, ResourceKey::named(ResourceKind::RenderPass, "RP").unwrap());
            }
            e => panic!("unexpected error {:?}", e),
        }

        assert_eq!(dearchiver.unpack_resource_signature("PRS").unwrap().as_str(), "PRS");
        assert!(matches!(
            dearchiver.unpack_render_pass("RP", None),
            Err(ArchiveError::NotFound(_))
        ));
    }

    #[test]
    fn render_pass_hook_skips_cache() {
        let dearchiver = Dearchiver::new(MockFactory::default());
        dearchiver.load_archive(graphics_archive(), None).unwrap();

        let cached = dearchiver.unpack_render_pass("RP", None).unwrap();
        let modified = dearchiver
            .unpack_render_pass("RP", Some(&|desc: &mut RenderPassDesc<'_>, _: &Arena| desc.name = Some("Renamed")))
            .unwrap();

        assert_eq!(modified.as_str(), "Renamed");
        assert!(Arc::ptr_eq(&cached, &dearchiver.unpack_render_pass("RP", None).unwrap()));
    }

    #[test]
    fn load_conflicts_and_duplicates() {
        let dearchiver = Dearchiver::new(MockFactory::default());
        let data = compute_archive(&[1, 2]);

        assert_eq!(dearchiver.load_archive(data.clone(), None).unwrap().added, 1);
        assert_eq!(dearchiver.load_archive(data.clone(), None).unwrap(), LoadReport::default());
        assert_eq!(dearchiver.archive_count(), 1);

        let copy = Bytes::copy_from_slice(&data);
        assert_eq!(dearchiver.load_archive(copy, None).unwrap().duplicates, 1);

        let report = dearchiver.load_archive(compute_archive(&[3, 4]), None).unwrap();
        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(dearchiver.archive_count(), 3);

        // The first archive keeps the name
        dearchiver.unpack_pipeline(ResourceKind::ComputePipeline, "P", None).unwrap();
        assert_eq!(*lock(&dearchiver.factory().bytecode), vec![vec![1, 2]]);
    }

    #[test]
    fn content_version_checked_on_load() {
        let dearchiver = Dearchiver::new(MockFactory::default());

        assert!(matches!(
            dearchiver.load_archive(compute_archive(&[1]), Some(2)),
            Err(ArchiveError::ContentVersionMismatch { found: 1, expected: 2 })
        ));
        assert_eq!(dearchiver.archive_count(), 0);
    }

    #[test]
    fn store_merges_loaded_archives() {
        let dearchiver = Dearchiver::new(MockFactory::default());
        dearchiver.load_archive(compute_archive(&[1]), None).unwrap();
        dearchiver.load_archive(graphics_archive(), None).unwrap();

        let merged = Archive::decode(&Bytes::from(dearchiver.store_to_vec(ArchiveLayout::Stream).unwrap()), None).unwrap();
        // P, G, RP and PRS
        assert_eq!(merged.resource_count(), 4);
        assert_eq!(merged.shader_pool(BackendKind::Vulkan).len(), 3);

        let fresh = Dearchiver::new(MockFactory::default());
        fresh.load_archive(Bytes::from(merged.encode(ArchiveLayout::Blocks).unwrap()), None).unwrap();
        fresh.unpack_pipeline(ResourceKind::GraphicsPipeline, "G", None).unwrap();
        assert_eq!(*lock(&fresh.factory().bytecode), vec![vec![0xAA], vec![0xBB]]);
    }

    #[test]
    fn reset_drops_archives() {
        let dearchiver = Dearchiver::new(MockFactory::default());
        dearchiver.load_archive(compute_archive(&[1]), None).unwrap();
        dearchiver.reset();
        dearchiver.reset();

        assert_eq!(dearchiver.archive_count(), 0);
        assert!(matches!(
            dearchiver.unpack_pipeline(ResourceKind::ComputePipeline, "P", None),
            Err(ArchiveError::NotFound(_))
        ));
    }
}
