//! In-memory archive content.
//!
//! An [`Archive`] is the value both file layouts decode to. Resources are
//! kept in key order so every encoding of the same content is byte identical.
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::io::Write;

use byteorder::{ByteOrder, LittleEndian};
use bytes::Bytes;
use log::{debug, warn};

use pcore::arena::Arena;
use pcore::data::SerializedData;
use pcore::hash::{fingerprint, Fingerprint};
use pcore::serializer::from_bytes;

use crate::backend::{BackendFlags, BackendKind};
use crate::desc::ShaderCreateInfo;
use crate::error::{ArchiveError, Result};
use crate::format::{blocks, detect_layout, stream, ArchiveLayout, API_VERSION};
use crate::payload::remap_indices;
use crate::pool::ShaderPool;
use crate::resource::{ResourceData, ResourceKey, ResourceKind};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Archive {
    pub api_version: u32,
    pub content_version: u32,
    pub build_id: Option<String>,
    resources: BTreeMap<ResourceKey, ResourceData>,
    pools: [ShaderPool; BackendKind::COUNT],
}

impl Default for Archive {
    fn default() -> Self {
        Archive::new(0)
    }
}

/// Outcome of [`Archive::merge_from`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub added: usize,
    /// Keys already present with identical data
    pub duplicates: usize,
    /// Keys already present with different data, the existing data is kept
    pub conflicts: Vec<ResourceKey>,
}

impl Archive {
    pub fn new(content_version: u32) -> Self {
        Archive {
            api_version: API_VERSION,
            content_version,
            build_id: None,
            resources: BTreeMap::new(),
            pools: Default::default(),
        }
    }

    pub fn resources(&self) -> impl Iterator<Item = (&ResourceKey, &ResourceData)> {
        self.resources.iter()
    }

    pub fn resources_of(&self, kind: ResourceKind) -> impl Iterator<Item = (&ResourceKey, &ResourceData)> {
        self.resources.iter().filter(move |(key, _)| key.kind == kind)
    }

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    pub fn count_of(&self, kind: ResourceKind) -> usize {
        self.resources_of(kind).count()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty() && self.pools.iter().all(ShaderPool::is_empty)
    }

    pub fn get(&self, key: &ResourceKey) -> Option<&ResourceData> {
        self.resources.get(key)
    }

    pub fn backend_data(&self, key: &ResourceKey, backend: BackendKind) -> Option<&SerializedData> {
        self.get(key)
            .map(|data| data.backend(backend))
            .filter(|data| !data.is_empty())
    }

    /// Adds a resource. Returns false when an identical resource already
    /// exists, a different one under the same key is a [`ArchiveError::NameConflict`].
    pub fn insert(&mut self, key: ResourceKey, data: ResourceData) -> Result<bool> {
        match self.resources.entry(key) {
            Entry::Vacant(entry) => {
                entry.insert(data);
                Ok(true)
            }
            Entry::Occupied(entry) if *entry.get() == data => Ok(false),
            Entry::Occupied(entry) => Err(ArchiveError::NameConflict {
                key: entry.key().clone(),
            }),
        }
    }

    pub fn replace(&mut self, key: ResourceKey, data: ResourceData) -> Option<ResourceData> {
        self.resources.insert(key, data)
    }

    pub fn remove(&mut self, key: &ResourceKey) -> Option<ResourceData> {
        self.resources.remove(key)
    }

    pub fn shader_pool(&self, backend: BackendKind) -> &ShaderPool {
        &self.pools[backend.index()]
    }

    pub fn set_shader_pool(&mut self, backend: BackendKind, pool: ShaderPool) {
        self.pools[backend.index()] = pool;
    }

    /// Index of `data` in the backend's pool, appended when new.
    pub fn add_shader(&mut self, backend: BackendKind, data: SerializedData) -> u32 {
        self.pools[backend.index()].insert(data).0
    }

    pub fn shader(&self, backend: BackendKind, index: u32) -> Option<&SerializedData> {
        self.pools[backend.index()].get(index)
    }

    pub fn shader_count(&self) -> usize {
        self.pools.iter().map(ShaderPool::len).sum()
    }

    /// Backends with any resource data or shader.
    pub fn backends_present(&self) -> BackendFlags {
        BackendKind::ALL
            .into_iter()
            .filter(|backend| {
                !self.shader_pool(*backend).is_empty()
                    || self.resources.values().any(|data| data.has_backend(*backend))
            })
            .collect()
    }

    pub fn remove_backend(&mut self, backend: BackendKind) {
        for data in self.resources.values_mut() {
            data.clear_backend(backend);
        }
        self.pools[backend.index()].clear();
        debug!("removed {} data", backend);
    }

    /// Copies the backend data of `src` into this archive.
    ///
    /// Both archives must hold the same resources with the same common data.
    /// The whole shader pool is copied so the indices stay valid.
    pub fn append_backend(&mut self, src: &Archive, backend: BackendKind) -> Result<()> {
        if self.resources.len() != src.resources.len() {
            return Err(ArchiveError::BackendMismatch(format!(
                "{} resources in the destination, {} in the source",
                self.resources.len(),
                src.resources.len()
            )));
        }
        for ((key, data), (src_key, src_data)) in self.resources.iter().zip(src.resources.iter()) {
            if key != src_key {
                return Err(ArchiveError::BackendMismatch(format!("{} is not in the source", key)));
            }
            if data.common != src_data.common {
                return Err(ArchiveError::BackendMismatch(format!("{} has different common data", key)));
            }
        }

        for (data, src_data) in self.resources.values_mut().zip(src.resources.values()) {
            data.set_backend(backend, src_data.backend(backend).clone());
        }
        self.pools[backend.index()] = src.pools[backend.index()].clone();
        Ok(())
    }

    /// Merges the content of `src`, renumbering its shader indices.
    ///
    /// Every shader of `src` is added to the pools, a resource that turns out
    /// to conflict leaves its unique shaders in the pool. Nothing is merged
    /// when a resource references a shader `src` does not have.
    pub fn merge_from(&mut self, src: &Archive) -> Result<MergeReport> {
        let mut pools = self.pools.clone();
        let mut remaps: [Vec<u32>; BackendKind::COUNT] = Default::default();
        for backend in BackendKind::ALL {
            let pool = &mut pools[backend.index()];
            remaps[backend.index()] = src
                .shader_pool(backend)
                .entries()
                .iter()
                .map(|entry| match pool.find(entry) {
                    Some(idx) => idx,
                    None => pool.insert(entry.make_copy()).0,
                })
                .collect();
        }

        let mut incoming = Vec::with_capacity(src.resources.len());
        for (key, data) in src.resources.iter() {
            let mut merged = ResourceData::new(data.common.make_copy());
            for backend in BackendKind::ALL {
                let remap = &remaps[backend.index()];
                let slot = remap_indices(key.kind, data.backend(backend), |idx| {
                    remap.get(idx as usize).copied().ok_or_else(|| {
                        ArchiveError::corrupt(format!("{} references missing {} shader {}", key, backend, idx))
                    })
                })?;
                merged.set_backend(backend, slot.make_copy());
            }
            incoming.push((key, merged));
        }

        self.pools = pools;
        let mut report = MergeReport::default();
        for (key, merged) in incoming {
            match self.resources.get(key) {
                None => {
                    self.resources.insert(key.make_copy(), merged);
                    report.added += 1;
                }
                Some(existing) if *existing == merged => report.duplicates += 1,
                Some(_) => {
                    warn!("{} conflicts with an existing resource, keeping the first", key);
                    report.conflicts.push(key.clone());
                }
            }
        }
        Ok(report)
    }

    /// Human readable listing of the content.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Archive contents:");
        let _ = writeln!(
            out,
            "  api version {}, content version {}, build id {}",
            self.api_version,
            self.content_version,
            self.build_id.as_deref().unwrap_or("<none>")
        );

        for kind in ResourceKind::ALL {
            let count = self.count_of(kind);
            if count == 0 {
                continue;
            }
            let _ = writeln!(out, "{} ({})", kind, count);
            for (key, data) in self.resources_of(kind) {
                let _ = write!(out, "  '{}'\n    Common: {} bytes", key.name, data.common.len());
                for backend in BackendKind::ALL {
                    if data.has_backend(backend) {
                        let _ = write!(out, "\n    {}: {} bytes", backend, data.backend(backend).len());
                    }
                }
                out.push('\n');
            }
        }

        for backend in BackendKind::ALL {
            let pool = self.shader_pool(backend);
            if pool.is_empty() {
                continue;
            }
            let _ = writeln!(out, "{} shaders ({}, {} bytes)", backend, pool.len(), pool.byte_size());
            for (idx, entry) in pool.entries().iter().enumerate() {
                let arena = Arena::new();
                let name = match from_bytes::<ShaderCreateInfo>(entry.as_slice(), &arena) {
                    Ok(info) => info.name.unwrap_or("<unnamed>").to_string(),
                    Err(_) => "<invalid>".to_string(),
                };
                let _ = writeln!(out, "  [{}] '{}' {} bytes", idx, name, entry.len());
            }
        }
        out
    }

    pub fn encode(&self, layout: ArchiveLayout) -> Result<Vec<u8>> {
        match layout {
            ArchiveLayout::Stream => stream::encode(self),
            ArchiveLayout::Blocks => blocks::encode(self),
        }
    }

    /// Writes the archive to `sink`, returns the number of bytes written.
    pub fn write_to<W: Write>(&self, sink: &mut W, layout: ArchiveLayout) -> Result<usize> {
        let data = self.encode(layout)?;
        sink.write_all(&data)?;
        Ok(data.len())
    }

    /// Decodes either layout, detected from the magic number.
    pub fn decode(data: &Bytes, expected_content_version: Option<u32>) -> Result<Archive> {
        match detect_layout(data) {
            Some(ArchiveLayout::Stream) => stream::decode(data, expected_content_version),
            Some(ArchiveLayout::Blocks) => blocks::decode(data, expected_content_version),
            None => {
                let mut magic = [0; 4];
                let len = data.len().min(4);
                magic[..len].copy_from_slice(&data[..len]);
                Err(ArchiveError::BadMagic(LittleEndian::read_u32(&magic)))
            }
        }
    }

    /// Content identity, the blake3 hash of the stream encoding.
    pub fn fingerprint(&self) -> Result<Fingerprint> {
        Ok(fingerprint(&stream::encode(self)?))
    }
}
