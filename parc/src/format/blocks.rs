//! Block layout structures and codec.
//!
//! The structures here are shared with [`crate::repacker`], which edits
//! them in place instead of decoding whole archives.
use std::io::Write;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use bytes::Bytes;
use log::debug;

use pcore::data::SerializedData;

use crate::archive::Archive;
use crate::backend::BackendKind;
use crate::error::{ArchiveError, Result};
use crate::format::{BLOCK_MAGIC, BLOCK_VERSION};
use crate::pool::ShaderPool;
use crate::resource::{ResourceData, ResourceKey, ResourceKind, ResourceName};

/// Offset of data that is not present.
pub const INVALID_OFFSET: u32 = u32::MAX;

pub const BLOCK_HEADER_SIZE: usize = 16 + 4 * BackendKind::COUNT;
pub const CHUNK_HEADER_SIZE: usize = 16;
pub const DATA_HEADER_SIZE: usize = 8 + 8 * BackendKind::COUNT;
pub const SHADER_ENTRY_SIZE: usize = 8;

/// Alignment of every data record and backend block.
pub const DATA_ALIGN: usize = 8;

pub fn align_up(value: usize) -> usize {
    (value + DATA_ALIGN - 1) & !(DATA_ALIGN - 1)
}

fn pad_to_alignment(out: &mut Vec<u8>) {
    out.resize(align_up(out.len()), 0);
}

fn to_u32(value: usize, what: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| ArchiveError::corrupt(format!("{} {} does not fit in 32 bits", what, value)))
}

/// Bounds checked sub slice.
pub fn section<'a>(data: &'a [u8], offset: usize, len: usize, what: &str) -> Result<&'a [u8]> {
    offset
        .checked_add(len)
        .and_then(|end| data.get(offset..end))
        .ok_or_else(|| {
            ArchiveError::corrupt(format!(
                "{} at {}+{} is outside the {} byte block",
                what,
                offset,
                len,
                data.len()
            ))
        })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChunkType {
    DebugInfo,
    Resources(ResourceKind),
    Shaders,
}

impl ChunkType {
    pub fn to_u32(self) -> u32 {
        match self {
            ChunkType::DebugInfo => 1,
            ChunkType::Resources(kind) => 1 + kind as u32,
            ChunkType::Shaders => 9,
        }
    }

    pub fn from_u32(value: u32) -> Option<ChunkType> {
        match value {
            1 => Some(ChunkType::DebugInfo),
            9 => Some(ChunkType::Shaders),
            x => ResourceKind::from_u32(x.checked_sub(1)?).map(ChunkType::Resources),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    pub magic: u32,
    pub version: u32,
    pub content_version: u32,
    pub num_chunks: u32,
    pub base_offsets: [u32; BackendKind::COUNT],
}

impl BlockHeader {
    pub fn read(mut data: &[u8]) -> Result<Self> {
        if data.len() < BLOCK_HEADER_SIZE {
            return Err(ArchiveError::corrupt("archive is smaller than its header"));
        }

        let magic = data.read_u32::<LittleEndian>()?;
        if magic != BLOCK_MAGIC {
            return Err(ArchiveError::BadMagic(magic));
        }
        let version = data.read_u32::<LittleEndian>()?;
        if version != BLOCK_VERSION {
            return Err(ArchiveError::UnsupportedVersion {
                found: version,
                expected: BLOCK_VERSION,
            });
        }
        let content_version = data.read_u32::<LittleEndian>()?;
        let num_chunks = data.read_u32::<LittleEndian>()?;
        let mut base_offsets = [INVALID_OFFSET; BackendKind::COUNT];
        data.read_u32_into::<LittleEndian>(&mut base_offsets)?;

        Ok(BlockHeader {
            magic,
            version,
            content_version,
            num_chunks,
            base_offsets,
        })
    }

    pub fn write<W: Write>(&self, out: &mut W) -> Result<()> {
        out.write_u32::<LittleEndian>(self.magic)?;
        out.write_u32::<LittleEndian>(self.version)?;
        out.write_u32::<LittleEndian>(self.content_version)?;
        out.write_u32::<LittleEndian>(self.num_chunks)?;
        for offset in self.base_offsets {
            out.write_u32::<LittleEndian>(offset)?;
        }
        Ok(())
    }

    pub fn check_content_version(&self, expected: Option<u32>) -> Result<()> {
        match expected {
            Some(expected) if expected != self.content_version => Err(ArchiveError::ContentVersionMismatch {
                found: self.content_version,
                expected,
            }),
            _ => Ok(()),
        }
    }

    /// Size of the header plus the chunk table.
    pub fn table_size(&self) -> usize {
        BLOCK_HEADER_SIZE + self.num_chunks as usize * CHUNK_HEADER_SIZE
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkHeader {
    pub chunk_type: u32,
    pub size: u32,
    pub offset: u32,
}

impl ChunkHeader {
    pub fn read(mut data: &[u8]) -> Result<Self> {
        let chunk_type = data.read_u32::<LittleEndian>()?;
        let size = data.read_u32::<LittleEndian>()?;
        let offset = data.read_u32::<LittleEndian>()?;
        Ok(ChunkHeader {
            chunk_type,
            size,
            offset,
        })
    }

    pub fn write<W: Write>(&self, out: &mut W) -> Result<()> {
        out.write_u32::<LittleEndian>(self.chunk_type)?;
        out.write_u32::<LittleEndian>(self.size)?;
        out.write_u32::<LittleEndian>(self.offset)?;
        out.write_u32::<LittleEndian>(0)?;
        Ok(())
    }

    pub fn kind(&self) -> Option<ChunkType> {
        ChunkType::from_u32(self.chunk_type)
    }

    pub fn range(&self) -> (usize, usize) {
        (self.offset as usize, self.size as usize)
    }
}

/// Reads the chunk table that follows the block header.
pub fn read_chunks(common: &[u8], header: &BlockHeader) -> Result<Vec<ChunkHeader>> {
    let table = section(common, BLOCK_HEADER_SIZE, header.table_size() - BLOCK_HEADER_SIZE, "chunk table")?;
    table.chunks_exact(CHUNK_HEADER_SIZE).map(ChunkHeader::read).collect()
}

/// Per resource header in the common block, locates each backend's data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DataHeader {
    pub chunk_type: u32,
    pub sizes: [u32; BackendKind::COUNT],
    pub offsets: [u32; BackendKind::COUNT],
}

impl DataHeader {
    pub fn new(chunk_type: ChunkType) -> Self {
        DataHeader {
            chunk_type: chunk_type.to_u32(),
            sizes: [0; BackendKind::COUNT],
            offsets: [INVALID_OFFSET; BackendKind::COUNT],
        }
    }

    pub fn read(mut data: &[u8]) -> Result<Self> {
        if data.len() < DATA_HEADER_SIZE {
            return Err(ArchiveError::corrupt("truncated data header"));
        }

        let chunk_type = data.read_u32::<LittleEndian>()?;
        let _reserved = data.read_u32::<LittleEndian>()?;
        let mut sizes = [0; BackendKind::COUNT];
        data.read_u32_into::<LittleEndian>(&mut sizes)?;
        let mut offsets = [INVALID_OFFSET; BackendKind::COUNT];
        data.read_u32_into::<LittleEndian>(&mut offsets)?;

        Ok(DataHeader {
            chunk_type,
            sizes,
            offsets,
        })
    }

    pub fn write<W: Write>(&self, out: &mut W) -> Result<()> {
        out.write_u32::<LittleEndian>(self.chunk_type)?;
        out.write_u32::<LittleEndian>(0)?;
        for size in self.sizes {
            out.write_u32::<LittleEndian>(size)?;
        }
        for offset in self.offsets {
            out.write_u32::<LittleEndian>(offset)?;
        }
        Ok(())
    }

    /// Overwrites the header stored at `offset` of `common`.
    pub fn patch(&self, common: &mut [u8], offset: usize) -> Result<()> {
        let mut encoded = Vec::with_capacity(DATA_HEADER_SIZE);
        self.write(&mut encoded)?;

        let end = offset
            .checked_add(DATA_HEADER_SIZE)
            .filter(|end| *end <= common.len())
            .ok_or_else(|| ArchiveError::corrupt("data header outside the common block"))?;
        common[offset..end].copy_from_slice(&encoded);
        Ok(())
    }

    /// `(offset, size)` relative to the backend block, `None` when absent.
    pub fn backend(&self, backend: BackendKind) -> Option<(u32, u32)> {
        let offset = self.offsets[backend.index()];
        (offset != INVALID_OFFSET).then(|| (offset, self.sizes[backend.index()]))
    }

    pub fn set_backend(&mut self, backend: BackendKind, offset: u32, size: u32) {
        self.offsets[backend.index()] = offset;
        self.sizes[backend.index()] = size;
    }

    pub fn clear_backend(&mut self, backend: BackendKind) {
        self.offsets[backend.index()] = INVALID_OFFSET;
        self.sizes[backend.index()] = 0;
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NamedResource {
    pub name: String,
    pub data_size: u32,
    pub data_offset: u32,
}

impl NamedResource {
    /// Common bytes that follow the data header.
    pub fn common_range(&self) -> Result<(usize, usize)> {
        let size = (self.data_size as usize)
            .checked_sub(DATA_HEADER_SIZE)
            .ok_or_else(|| ArchiveError::corrupt(format!("resource '{}' is smaller than its header", self.name)))?;
        Ok((self.data_offset as usize + DATA_HEADER_SIZE, size))
    }
}

/// Name table of one resource chunk.
pub fn read_named_resources(common: &[u8], chunk: &ChunkHeader) -> Result<Vec<NamedResource>> {
    let (offset, size) = chunk.range();
    let mut data = section(common, offset, size, "named resource array")?;

    let count = data.read_u32::<LittleEndian>()? as usize;
    if count.saturating_mul(12) > data.len() {
        return Err(ArchiveError::corrupt(format!("resource count {} exceeds its chunk", count)));
    }

    let mut name_lens = vec![0; count];
    data.read_u32_into::<LittleEndian>(&mut name_lens)?;
    let mut data_sizes = vec![0; count];
    data.read_u32_into::<LittleEndian>(&mut data_sizes)?;
    let mut data_offsets = vec![0; count];
    data.read_u32_into::<LittleEndian>(&mut data_offsets)?;

    let mut resources = Vec::with_capacity(count);
    for i in 0..count {
        let name = section(data, 0, name_lens[i] as usize, "resource name")?;
        data = &data[name.len()..];

        let name = std::str::from_utf8(name)
            .map_err(|_| ArchiveError::corrupt("resource name is not UTF-8"))?
            .to_string();
        resources.push(NamedResource {
            name,
            data_size: data_sizes[i],
            data_offset: data_offsets[i],
        });
    }
    Ok(resources)
}

fn named_resources_size(names: &[&str]) -> usize {
    4 + 12 * names.len() + names.iter().map(|n| n.len()).sum::<usize>()
}

fn write_named_resources<W: Write>(out: &mut W, names: &[&str], sizes: &[u32], offsets: &[u32]) -> Result<()> {
    out.write_u32::<LittleEndian>(to_u32(names.len(), "resource count")?)?;
    for name in names {
        out.write_u32::<LittleEndian>(to_u32(name.len(), "name length")?)?;
    }
    for size in sizes {
        out.write_u32::<LittleEndian>(*size)?;
    }
    for offset in offsets {
        out.write_u32::<LittleEndian>(*offset)?;
    }
    for name in names {
        out.write_all(name.as_bytes())?;
    }
    Ok(())
}

/// Location of the common block and every backend block in a file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockBounds {
    pub common_size: u64,
    /// `(file offset, size)` of each backend block
    pub backends: [Option<(u64, u64)>; BackendKind::COUNT],
}

impl BlockBounds {
    /// Block sizes follow from the sorted base offsets, the last block runs
    /// to the end of the file.
    pub fn compute(header: &BlockHeader, file_size: u64) -> Result<Self> {
        let mut bases: Vec<(u64, usize)> = header
            .base_offsets
            .iter()
            .enumerate()
            .filter(|(_, offset)| **offset != INVALID_OFFSET)
            .map(|(idx, offset)| (*offset as u64, idx))
            .collect();
        bases.sort_unstable();

        let common_size = bases.first().map_or(file_size, |(base, _)| *base);
        if common_size < header.table_size() as u64 || common_size > file_size {
            return Err(ArchiveError::corrupt(format!(
                "first backend block at {} overlaps the header or lies past the end",
                common_size
            )));
        }

        let mut backends = [None; BackendKind::COUNT];
        for (i, (base, idx)) in bases.iter().enumerate() {
            let end = bases.get(i + 1).map_or(file_size, |(next, _)| *next);
            if end < *base || *base > file_size {
                return Err(ArchiveError::corrupt("backend block offsets are out of order"));
            }
            backends[*idx] = Some((*base, end - *base));
        }

        Ok(BlockBounds {
            common_size,
            backends,
        })
    }

    pub fn backend(&self, backend: BackendKind) -> Option<(u64, u64)> {
        self.backends[backend.index()]
    }

    /// File offset of `(offset, size)` within the backend block, checked.
    pub fn locate(&self, backend: BackendKind, offset: u32, size: u32) -> Result<u64> {
        let (base, block_size) = self
            .backend(backend)
            .ok_or_else(|| ArchiveError::corrupt(format!("data references the missing {} block", backend)))?;
        if offset as u64 + size as u64 > block_size {
            return Err(ArchiveError::corrupt(format!(
                "{} data at {}+{} exceeds the {} byte block",
                backend, offset, size, block_size
            )));
        }
        Ok(base + offset as u64)
    }
}

/// Encodes an archive in the block layout.
pub fn encode(archive: &Archive) -> Result<Vec<u8>> {
    let kinds: Vec<ResourceKind> = ResourceKind::ALL
        .into_iter()
        .filter(|kind| archive.count_of(*kind) > 0)
        .collect();
    let num_chunks = kinds.len() + 2;

    let mut out = vec![0; BLOCK_HEADER_SIZE + num_chunks * CHUNK_HEADER_SIZE];
    let mut chunks = Vec::with_capacity(num_chunks);
    let mut blocks: [Vec<u8>; BackendKind::COUNT] = Default::default();

    // Debug info
    {
        let offset = out.len();
        let build_id = archive.build_id.as_deref().unwrap_or_default();
        out.write_u32::<LittleEndian>(archive.api_version)?;
        out.write_u32::<LittleEndian>(to_u32(build_id.len(), "build id length")?)?;
        out.write_all(build_id.as_bytes())?;
        chunks.push(ChunkHeader {
            chunk_type: ChunkType::DebugInfo.to_u32(),
            size: to_u32(out.len() - offset, "chunk size")?,
            offset: to_u32(offset, "chunk offset")?,
        });
        pad_to_alignment(&mut out);
    }

    for kind in kinds {
        let chunk_type = ChunkType::Resources(kind);
        let resources: Vec<(&ResourceKey, &ResourceData)> = archive.resources_of(kind).collect();
        let names: Vec<&str> = resources.iter().map(|(key, _)| key.name.as_str()).collect();

        // Data records follow the name table, their offsets are known upfront
        let array_offset = out.len();
        let array_size = named_resources_size(&names);
        let mut sizes = Vec::with_capacity(resources.len());
        let mut offsets = Vec::with_capacity(resources.len());
        let mut pos = align_up(array_offset + array_size);
        for (_, data) in resources.iter() {
            let size = DATA_HEADER_SIZE + data.common.len();
            sizes.push(to_u32(size, "resource size")?);
            offsets.push(to_u32(pos, "resource offset")?);
            pos = align_up(pos + size);
        }

        write_named_resources(&mut out, &names, &sizes, &offsets)?;
        chunks.push(ChunkHeader {
            chunk_type: chunk_type.to_u32(),
            size: to_u32(array_size, "chunk size")?,
            offset: to_u32(array_offset, "chunk offset")?,
        });

        for (key, data) in resources {
            pad_to_alignment(&mut out);
            let mut header = DataHeader::new(chunk_type);
            for backend in BackendKind::ALL {
                let slot = data.backend(backend);
                if slot.is_empty() {
                    continue;
                }
                let block = &mut blocks[backend.index()];
                pad_to_alignment(block);
                header.set_backend(
                    backend,
                    to_u32(block.len(), "backend offset")?,
                    to_u32(slot.len(), "backend size")?,
                );
                block.extend_from_slice(slot.as_slice());
            }

            debug!("{}: data header at {}", key, out.len());
            header.write(&mut out)?;
            out.extend_from_slice(data.common.as_slice());
        }
        pad_to_alignment(&mut out);
    }

    // Shaders
    {
        let offset = out.len();
        let mut header = DataHeader::new(ChunkType::Shaders);
        for backend in BackendKind::ALL {
            let pool = archive.shader_pool(backend);
            if pool.is_empty() {
                continue;
            }

            let block = &mut blocks[backend.index()];
            pad_to_alignment(block);
            let table_offset = block.len();
            let table_size = pool.len() * SHADER_ENTRY_SIZE;
            block.resize(table_offset + table_size, 0);

            let mut table = Vec::with_capacity(table_size);
            for entry in pool.entries() {
                pad_to_alignment(block);
                table.write_u32::<LittleEndian>(to_u32(block.len(), "shader offset")?)?;
                table.write_u32::<LittleEndian>(to_u32(entry.len(), "shader size")?)?;
                block.extend_from_slice(entry.as_slice());
            }
            block[table_offset..table_offset + table_size].copy_from_slice(&table);

            header.set_backend(
                backend,
                to_u32(table_offset, "shader table offset")?,
                to_u32(table_size, "shader table size")?,
            );
        }
        header.write(&mut out)?;
        chunks.push(ChunkHeader {
            chunk_type: ChunkType::Shaders.to_u32(),
            size: DATA_HEADER_SIZE as u32,
            offset: to_u32(offset, "chunk offset")?,
        });
        pad_to_alignment(&mut out);
    }

    let mut base_offsets = [INVALID_OFFSET; BackendKind::COUNT];
    for backend in BackendKind::ALL {
        let block = &blocks[backend.index()];
        if block.is_empty() {
            continue;
        }
        pad_to_alignment(&mut out);
        base_offsets[backend.index()] = to_u32(out.len(), "backend base offset")?;
        out.extend_from_slice(block);
    }

    let header = BlockHeader {
        magic: BLOCK_MAGIC,
        version: BLOCK_VERSION,
        content_version: archive.content_version,
        num_chunks: num_chunks as u32,
        base_offsets,
    };
    let mut table = Vec::with_capacity(header.table_size());
    header.write(&mut table)?;
    for chunk in chunks.iter() {
        chunk.write(&mut table)?;
    }
    out[..table.len()].copy_from_slice(&table);

    Ok(out)
}

fn backend_view(data: &Bytes, bounds: &BlockBounds, backend: BackendKind, offset: u32, size: u32) -> Result<SerializedData> {
    let start = bounds.locate(backend, offset, size)? as usize;
    SerializedData::view_range(data, start, size as usize)
        .ok_or_else(|| ArchiveError::corrupt(format!("{} data is past the end of the archive", backend)))
}

/// Decodes a block layout archive, names and data are views of `data`.
pub fn decode(data: &Bytes, expected_content_version: Option<u32>) -> Result<Archive> {
    let header = BlockHeader::read(data)?;
    header.check_content_version(expected_content_version)?;
    let bounds = BlockBounds::compute(&header, data.len() as u64)?;
    let common = &data[..bounds.common_size as usize];
    let chunks = read_chunks(common, &header)?;

    let mut archive = Archive::new(header.content_version);
    let mut seen = Vec::with_capacity(chunks.len());
    for chunk in chunks.iter() {
        let kind = chunk
            .kind()
            .ok_or_else(|| ArchiveError::corrupt(format!("unknown chunk type {}", chunk.chunk_type)))?;
        if seen.contains(&kind) {
            return Err(ArchiveError::corrupt(format!("duplicate chunk {:?}", kind)));
        }
        seen.push(kind);

        let (offset, size) = chunk.range();
        match kind {
            ChunkType::DebugInfo => {
                let mut info = section(common, offset, size, "debug info")?;
                archive.api_version = info.read_u32::<LittleEndian>()?;
                let len = info.read_u32::<LittleEndian>()? as usize;
                let build_id = section(info, 0, len, "build id")?;
                if !build_id.is_empty() {
                    archive.build_id = Some(
                        std::str::from_utf8(build_id)
                            .map_err(|_| ArchiveError::corrupt("build id is not UTF-8"))?
                            .to_string(),
                    );
                }
            }
            ChunkType::Resources(resource_kind) => {
                for res in read_named_resources(common, chunk)? {
                    let record = section(common, res.data_offset as usize, res.data_size as usize, "resource data")?;
                    let data_header = DataHeader::read(record)?;
                    if data_header.chunk_type != chunk.chunk_type {
                        return Err(ArchiveError::corrupt(format!(
                            "resource '{}' header type {} does not match chunk type {}",
                            res.name, data_header.chunk_type, chunk.chunk_type
                        )));
                    }

                    let (common_offset, common_size) = res.common_range()?;
                    let common_data = SerializedData::view_range(data, common_offset, common_size)
                        .ok_or_else(|| ArchiveError::corrupt("resource data is past the end"))?;
                    let mut resource = ResourceData::new(common_data);
                    for backend in BackendKind::ALL {
                        if let Some((offset, size)) = data_header.backend(backend) {
                            resource.set_backend(backend, backend_view(data, &bounds, backend, offset, size)?);
                        }
                    }

                    let name = ResourceName::from_utf8(Bytes::from(res.name.into_bytes()))
                        .map_err(|e| ArchiveError::corrupt(e.to_string()))?;
                    let key = ResourceKey::new(resource_kind, name);
                    if archive.get(&key).is_some() {
                        return Err(ArchiveError::corrupt(format!("{} is stored twice", key)));
                    }
                    archive.insert(key, resource)?;
                }
            }
            ChunkType::Shaders => {
                let shaders = DataHeader::read(section(common, offset, size, "shaders header")?)?;
                for backend in BackendKind::ALL {
                    let Some((table_offset, table_size)) = shaders.backend(backend) else {
                        continue;
                    };
                    let table_start = bounds.locate(backend, table_offset, table_size)? as usize;
                    let table = section(data, table_start, table_size as usize, "shader table")?;

                    let mut entries = Vec::with_capacity(table.len() / SHADER_ENTRY_SIZE);
                    for mut entry in table.chunks_exact(SHADER_ENTRY_SIZE) {
                        let offset = entry.read_u32::<LittleEndian>()?;
                        let size = entry.read_u32::<LittleEndian>()?;
                        entries.push(backend_view(data, &bounds, backend, offset, size)?);
                    }
                    archive.set_shader_pool(backend, ShaderPool::from_entries(entries));
                }
            }
        }
    }
    Ok(archive)
}

#[cfg(test)]
mod test_block_layout {
    use super::*;
    use crate::payload::encode_indices;

    fn sample() -> Archive {
        let mut archive = Archive::new(7);
        archive.build_id = Some("deadbeef".to_string());

        for backend in [BackendKind::Vulkan, BackendKind::D3D12] {
            let shader = archive.add_shader(backend, SerializedData::new(vec![0x10, 0x20, 0x30]));
            let other = archive.add_shader(backend, SerializedData::new(vec![backend.index() as u8; 13]));
            let key = ResourceKey::named(ResourceKind::GraphicsPipeline, "PSO").unwrap();
            let mut pso = archive.get(&key).cloned().unwrap_or_else(|| ResourceData::new(SerializedData::new(vec![1; 21])));
            pso.set_backend(backend, encode_indices(&[shader, other]));
            archive.replace(key, pso);
        }

        let mut rp = ResourceData::new(SerializedData::new(vec![3; 5]));
        rp.clear_backend(BackendKind::OpenGL);
        archive
            .insert(ResourceKey::named(ResourceKind::RenderPass, "RP").unwrap(), rp)
            .unwrap();
        archive
    }

    #[test]
    fn round_trip() {
        let archive = sample();
        let data = Bytes::from(encode(&archive).unwrap());

        assert_eq!(decode(&data, Some(7)).unwrap(), archive);
    }

    #[test]
    fn header_layout() {
        let data = encode(&sample()).unwrap();
        let header = BlockHeader::read(&data).unwrap();

        // Debug info, graphics pipelines, render passes and shaders
        assert_eq!(header.num_chunks, 4);
        assert_eq!(header.base_offsets[BackendKind::OpenGL.index()], INVALID_OFFSET);
        assert_ne!(header.base_offsets[BackendKind::Vulkan.index()], INVALID_OFFSET);
        assert_eq!(header.base_offsets[BackendKind::Vulkan.index()] as usize % DATA_ALIGN, 0);

        let bounds = BlockBounds::compute(&header, data.len() as u64).unwrap();
        let (vk_base, vk_size) = bounds.backend(BackendKind::Vulkan).unwrap();
        let (dx_base, _) = bounds.backend(BackendKind::D3D12).unwrap();
        assert!(dx_base < vk_base);
        assert_eq!(vk_base + vk_size, data.len() as u64);
    }

    #[test]
    fn chunk_types() {
        for value in 1..=9 {
            assert_eq!(ChunkType::from_u32(value).unwrap().to_u32(), value);
        }
        assert_eq!(ChunkType::from_u32(0), None);
        assert_eq!(ChunkType::from_u32(10), None);
    }

    #[test]
    fn content_version_checked() {
        let data = Bytes::from(encode(&sample()).unwrap());

        assert!(matches!(
            decode(&data, Some(8)),
            Err(ArchiveError::ContentVersionMismatch { found: 7, expected: 8 })
        ));
    }

    #[test]
    fn out_of_range_offset() {
        let mut data = encode(&sample()).unwrap();
        let header = BlockHeader::read(&data).unwrap();
        let chunks = read_chunks(&data, &header).unwrap();
        let pso_chunk = chunks
            .iter()
            .find(|c| c.kind() == Some(ChunkType::Resources(ResourceKind::GraphicsPipeline)))
            .unwrap();
        let res = &read_named_resources(&data, pso_chunk).unwrap()[0];

        let mut data_header = DataHeader::read(&data[res.data_offset as usize..]).unwrap();
        data_header.set_backend(BackendKind::Vulkan, 1 << 20, 4);
        data_header.patch(&mut data, res.data_offset as usize).unwrap();

        assert!(matches!(decode(&Bytes::from(data), None), Err(ArchiveError::Corrupt(_))));
    }

    #[test]
    fn truncated() {
        let data = encode(&sample()).unwrap();

        for len in [0, 8, BLOCK_HEADER_SIZE, data.len() / 2] {
            assert!(decode(&Bytes::copy_from_slice(&data[..len]), None).is_err(), "len {}", len);
        }
    }
}
