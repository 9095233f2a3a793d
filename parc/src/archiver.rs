//! Producer side aggregation.
//!
//! Resources are added from any number of threads. Every resource kind has
//! its own table lock and every backend its own shader pool lock, so adding
//! a signature never waits on a pipeline. [`Archiver::archive`] and the
//! serialize calls take a snapshot and must not race with `add_*` calls.
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::{debug, error};

use pcore::data::SerializedData;

use crate::archive::Archive;
use crate::backend::BackendKind;
use crate::device::{
    DeviceObject, SerializationDevice, SerializedPipeline, SerializedRenderPass, SerializedShader,
    SerializedSignature,
};
use crate::error::{ArchiveError, Result};
use crate::format::ArchiveLayout;
use crate::payload::{encode_index, encode_indices};
use crate::pool::ShaderPool;
use crate::resource::{ResourceData, ResourceKey, ResourceKind, ResourceName};

type ResourceTable = BTreeMap<ResourceName, ResourceData>;

pub struct Archiver {
    device_id: u64,
    content_version: u32,
    build_id: Option<String>,
    tables: [Mutex<ResourceTable>; ResourceKind::COUNT],
    pools: [Mutex<ShaderPool>; BackendKind::COUNT],
}

// A panic while holding a table leaves it consistent, every insert is a
// single map operation
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Archiver {
    pub fn new(device: &SerializationDevice) -> Self {
        Archiver {
            device_id: device.id(),
            content_version: 0,
            build_id: None,
            tables: Default::default(),
            pools: Default::default(),
        }
    }

    pub fn with_content_version(mut self, content_version: u32) -> Self {
        self.content_version = content_version;
        self
    }

    pub fn with_build_id<S: Into<String>>(mut self, build_id: S) -> Self {
        self.build_id = Some(build_id.into());
        self
    }

    fn check_device<T: DeviceObject>(&self, handle: &T) -> Result<()> {
        if handle.device_id() != self.device_id {
            return Err(ArchiveError::ForeignHandle {
                key: handle.key().clone(),
            });
        }
        Ok(())
    }

    fn insert(&self, key: &ResourceKey, data: ResourceData) -> Result<bool> {
        let mut table = lock(&self.tables[key.kind.index()]);
        match table.get(&key.name) {
            None => {
                table.insert(key.name.clone(), data);
                debug!("added {}", key);
                Ok(true)
            }
            Some(existing) if *existing == data => Ok(false),
            Some(_) => Err(ArchiveError::NameConflict { key: key.clone() }),
        }
    }

    fn add_to_pool(&self, backend: BackendKind, blob: &SerializedData) -> u32 {
        lock(&self.pools[backend.index()]).insert(blob.clone()).0
    }

    /// Adds a standalone shader. Returns false when an identical shader was
    /// already added.
    pub fn add_shader(&self, shader: &SerializedShader) -> Result<bool> {
        self.check_device(shader)?;

        let mut data = ResourceData::new(shader.common.clone());
        for backend in BackendKind::ALL {
            let blob = &shader.per_backend[backend.index()];
            if !blob.is_empty() {
                data.set_backend(backend, encode_index(self.add_to_pool(backend, blob)));
            }
        }
        self.insert(shader.key(), data)
    }

    pub fn add_resource_signature(&self, signature: &SerializedSignature) -> Result<bool> {
        self.check_device(signature)?;

        let data = ResourceData {
            common: signature.common.clone(),
            per_backend: signature.per_backend.clone(),
        };
        self.insert(signature.key(), data)
    }

    fn add_render_pass(&self, render_pass: &SerializedRenderPass) -> Result<bool> {
        self.check_device(render_pass)?;
        self.insert(render_pass.key(), ResourceData::new(render_pass.common.clone()))
    }

    /// Adds a pipeline with its render pass and signatures.
    ///
    /// Shaders go to the pools before the pipeline itself is inserted, a
    /// pipeline rejected for a name conflict may leave unreferenced shaders.
    pub fn add_pipeline_state(&self, pipeline: &SerializedPipeline) -> Result<bool> {
        self.check_device(pipeline)?;

        if let Some(rp) = pipeline.render_pass.as_deref() {
            self.add_render_pass(rp)?;
        }
        for signature in pipeline.signatures.iter() {
            self.add_resource_signature(signature)?;
        }

        let mut data = ResourceData::new(pipeline.common.clone());
        for backend in BackendKind::ALL {
            let shaders = &pipeline.shaders[backend.index()];
            if shaders.is_empty() {
                continue;
            }

            let indices: Vec<u32> = shaders.iter().map(|blob| self.add_to_pool(backend, blob)).collect();
            data.set_backend(backend, encode_indices(&indices));
        }
        self.insert(pipeline.key(), data)
    }

    /// Adds every pipeline, one result per pipeline. Failures are logged and
    /// do not stop the batch.
    pub fn add_pipeline_states<'p, I>(&self, pipelines: I) -> Vec<Result<bool>>
    where
        I: IntoIterator<Item = &'p SerializedPipeline>,
    {
        pipelines
            .into_iter()
            .map(|pipeline| {
                let result = self.add_pipeline_state(pipeline);
                if let Err(e) = &result {
                    error!("failed to add {}: {}", pipeline.key(), e);
                }
                result
            })
            .collect()
    }

    /// Snapshot of everything added so far.
    pub fn archive(&self) -> Archive {
        let mut archive = Archive::new(self.content_version);
        archive.build_id = self.build_id.clone();

        for (kind, table) in ResourceKind::ALL.into_iter().zip(self.tables.iter()) {
            for (name, data) in lock(table).iter() {
                archive.replace(ResourceKey::new(kind, name.clone()), data.clone());
            }
        }
        for backend in BackendKind::ALL {
            archive.set_shader_pool(backend, lock(&self.pools[backend.index()]).clone());
        }
        archive
    }

    pub fn serialize<W: Write>(&self, sink: &mut W, layout: ArchiveLayout) -> Result<usize> {
        self.archive().write_to(sink, layout)
    }

    pub fn serialize_to_vec(&self, layout: ArchiveLayout) -> Result<Vec<u8>> {
        self.archive().encode(layout)
    }

    pub fn reset(&self) {
        for table in self.tables.iter() {
            lock(table).clear();
        }
        for pool in self.pools.iter() {
            lock(pool).clear();
        }
    }

    pub fn resource_count(&self) -> usize {
        self.tables.iter().map(|table| lock(table).len()).sum()
    }

    pub fn shader_count(&self, backend: BackendKind) -> usize {
        lock(&self.pools[backend.index()]).len()
    }
}
