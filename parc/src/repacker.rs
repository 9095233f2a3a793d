//! Backend surgery on block layout archives.
//!
//! The repacker keeps the common block in memory and edits the per resource
//! [`DataHeader`]s in place. Backend blocks are never parsed, they are read
//! lazily from their source when the archive is written out, so stripping a
//! backend from a large file only reads the common block.
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::io::Write;
use std::sync::{Arc, OnceLock};

use byteorder::{ByteOrder, LittleEndian};
use bytes::Bytes;
use log::{debug, info, warn};

use pcore::source::{read_range, ArchiveSource};

use crate::backend::BackendKind;
use crate::error::{ArchiveError, Result};
use crate::format::blocks::{
    align_up, read_chunks, read_named_resources, BlockBounds, BlockHeader, ChunkHeader, ChunkType, DataHeader,
    BLOCK_HEADER_SIZE, DATA_HEADER_SIZE, INVALID_OFFSET, SHADER_ENTRY_SIZE,
};
use crate::format::{detect_layout, ArchiveLayout};
use crate::resource::ResourceKind;

/// One backend block, possibly belonging to a donor archive.
#[derive(Clone)]
struct BackendBlock {
    source: Arc<dyn ArchiveSource>,
    offset: u64,
    size: u64,
    data: OnceLock<Bytes>,
}

impl BackendBlock {
    fn bytes(&self) -> Result<&Bytes> {
        if let Some(data) = self.data.get() {
            return Ok(data);
        }

        let len = usize::try_from(self.size)
            .map_err(|_| ArchiveError::corrupt(format!("{} byte backend block", self.size)))?;
        let data = read_range(self.source.as_ref(), self.offset, len)?;
        Ok(self.data.get_or_init(|| data))
    }
}

/// Location of one resource record in the common block.
#[derive(Clone, Debug)]
struct ResourceEntry {
    kind: ResourceKind,
    name: String,
    offset: usize,
    size: usize,
}

#[derive(Clone, Debug, Default)]
pub struct ValidationReport {
    pub messages: Vec<String>,
    pub errors: usize,
    /// Number of resources with data for each backend
    pub present: [usize; BackendKind::COUNT],
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.errors == 0
    }

    fn note(&mut self, message: String) {
        info!("{}", message);
        self.messages.push(message);
    }

    fn error(&mut self, message: String) {
        warn!("{}", message);
        self.messages.push(message);
        self.errors += 1;
    }
}

pub struct ArchiveRepacker {
    header: BlockHeader,
    chunks: Vec<ChunkHeader>,
    common: Vec<u8>,
    blocks: [Option<BackendBlock>; BackendKind::COUNT],
}

impl ArchiveRepacker {
    pub fn new(source: Arc<dyn ArchiveSource>) -> Result<Self> {
        let size = source.size()?;
        let head = read_range(source.as_ref(), 0, size.min(BLOCK_HEADER_SIZE as u64) as usize)?;
        if detect_layout(&head) == Some(ArchiveLayout::Stream) {
            return Err(ArchiveError::WrongLayout("blocks"));
        }

        let header = BlockHeader::read(&head)?;
        let bounds = BlockBounds::compute(&header, size)?;
        let common = read_range(source.as_ref(), 0, bounds.common_size as usize)?.to_vec();
        let chunks = read_chunks(&common, &header)?;

        let blocks = std::array::from_fn(|idx| {
            bounds.backends[idx].map(|(offset, size)| BackendBlock {
                source: source.clone(),
                offset,
                size,
                data: OnceLock::new(),
            })
        });
        debug!("repacking {} byte archive, {} byte common block", size, common.len());

        Ok(ArchiveRepacker {
            header,
            chunks,
            common,
            blocks,
        })
    }

    pub fn from_bytes(data: Bytes) -> Result<Self> {
        ArchiveRepacker::new(Arc::new(data))
    }

    pub fn content_version(&self) -> u32 {
        self.header.content_version
    }

    pub fn backend_present(&self, backend: BackendKind) -> bool {
        self.blocks[backend.index()].is_some()
    }

    fn resources(&self) -> Result<Vec<ResourceEntry>> {
        let mut entries = Vec::new();
        for chunk in self.chunks.iter() {
            let Some(ChunkType::Resources(kind)) = chunk.kind() else {
                continue;
            };
            for res in read_named_resources(&self.common, chunk)? {
                entries.push(ResourceEntry {
                    kind,
                    name: res.name,
                    offset: res.data_offset as usize,
                    size: res.data_size as usize,
                });
            }
        }
        Ok(entries)
    }

    fn shaders_offset(&self) -> Option<usize> {
        self.chunks
            .iter()
            .find(|chunk| chunk.kind() == Some(ChunkType::Shaders))
            .map(|chunk| chunk.offset as usize)
    }

    fn data_header(&self, offset: usize) -> Result<DataHeader> {
        let data = self
            .common
            .get(offset..)
            .ok_or_else(|| ArchiveError::corrupt(format!("data header at {} is outside the common block", offset)))?;
        DataHeader::read(data)
    }

    /// Common bytes of a resource, after its data header.
    fn common_data(&self, entry: &ResourceEntry) -> Result<&[u8]> {
        let size = entry
            .size
            .checked_sub(DATA_HEADER_SIZE)
            .ok_or_else(|| ArchiveError::corrupt(format!("resource '{}' is smaller than its header", entry.name)))?;
        let start = entry.offset + DATA_HEADER_SIZE;
        self.common
            .get(start..start + size)
            .ok_or_else(|| ArchiveError::corrupt(format!("resource '{}' is outside the common block", entry.name)))
    }

    /// Every data header offset, resources first then the shaders header.
    fn header_offsets(&self) -> Result<Vec<usize>> {
        let mut offsets: Vec<usize> = self.resources()?.iter().map(|entry| entry.offset).collect();
        offsets.extend(self.shaders_offset());
        Ok(offsets)
    }

    /// Drops all data of `backend`.
    pub fn remove_backend(&mut self, backend: BackendKind) -> Result<()> {
        let mut common = self.common.clone();
        for offset in self.header_offsets()? {
            let mut header = self.data_header(offset)?;
            header.clear_backend(backend);
            header.patch(&mut common, offset)?;
        }

        self.common = common;
        self.blocks[backend.index()] = None;
        self.header.base_offsets[backend.index()] = INVALID_OFFSET;
        info!("removed {} data", backend);
        Ok(())
    }

    /// Takes the `backend` data of `donor`, which must hold the same
    /// resources with the same common data. Nothing changes on error.
    pub fn append_backend(&mut self, donor: &ArchiveRepacker, backend: BackendKind) -> Result<()> {
        let block = donor.blocks[backend.index()]
            .clone()
            .ok_or_else(|| ArchiveError::BackendMismatch(format!("donor archive has no {} data", backend)))?;
        if donor.content_version() != self.content_version() {
            return Err(ArchiveError::BackendMismatch(format!(
                "content version {} does not match the donor's {}",
                self.content_version(),
                donor.content_version()
            )));
        }

        let ours: BTreeMap<(ResourceKind, String), ResourceEntry> = self
            .resources()?
            .into_iter()
            .map(|entry| ((entry.kind, entry.name.clone()), entry))
            .collect();
        let theirs: BTreeMap<(ResourceKind, String), ResourceEntry> = donor
            .resources()?
            .into_iter()
            .map(|entry| ((entry.kind, entry.name.clone()), entry))
            .collect();

        for kind in ResourceKind::ALL {
            let count = |map: &BTreeMap<(ResourceKind, String), ResourceEntry>| map.keys().filter(|(k, _)| *k == kind).count();
            if count(&ours) != count(&theirs) {
                return Err(ArchiveError::BackendMismatch(format!(
                    "{} {} resources, the donor has {}",
                    count(&ours),
                    kind,
                    count(&theirs)
                )));
            }
        }

        let mut common = self.common.clone();
        for ((kind, name), entry) in ours.iter() {
            let donor_entry = theirs
                .get(&(*kind, name.clone()))
                .ok_or_else(|| ArchiveError::BackendMismatch(format!("{} '{}' is not in the donor", kind, name)))?;
            if self.common_data(entry)? != donor.common_data(donor_entry)? {
                return Err(ArchiveError::BackendMismatch(format!(
                    "{} '{}' has different common data",
                    kind, name
                )));
            }

            let mut header = self.data_header(entry.offset)?;
            match donor.data_header(donor_entry.offset)?.backend(backend) {
                Some((offset, size)) => header.set_backend(backend, offset, size),
                None => header.clear_backend(backend),
            }
            header.patch(&mut common, entry.offset)?;
        }

        if let Some(offset) = self.shaders_offset() {
            let mut header = self.data_header(offset)?;
            let donor_shaders = match donor.shaders_offset() {
                Some(donor_offset) => donor.data_header(donor_offset)?.backend(backend),
                None => None,
            };
            match donor_shaders {
                Some((offset, size)) => header.set_backend(backend, offset, size),
                None => header.clear_backend(backend),
            }
            header.patch(&mut common, offset)?;
        }

        self.common = common;
        self.blocks[backend.index()] = Some(block);
        info!("appended {} data from the donor archive", backend);
        Ok(())
    }

    /// Checks every backend reference lies inside its block.
    pub fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport::default();

        let mut seen = Vec::new();
        for chunk in self.chunks.iter() {
            match chunk.kind() {
                Some(kind) if seen.contains(&kind) => report.error(format!("chunk {:?} appears twice", kind)),
                Some(kind) => seen.push(kind),
                None => report.error(format!("unknown chunk type {}", chunk.chunk_type)),
            }
        }

        let entries = match self.resources() {
            Ok(entries) => entries,
            Err(e) => {
                report.error(format!("resource table is unreadable: {}", e));
                return report;
            }
        };
        for entry in entries.iter() {
            let header = match self.data_header(entry.offset) {
                Ok(header) => header,
                Err(e) => {
                    report.error(format!("{} '{}': {}", entry.kind, entry.name, e));
                    continue;
                }
            };
            if header.chunk_type != ChunkType::Resources(entry.kind).to_u32() {
                report.error(format!(
                    "{} '{}': header type {} is not a resource of this kind",
                    entry.kind, entry.name, header.chunk_type
                ));
            }
            if self.common_data(entry).is_err() {
                report.error(format!("{} '{}': common data is outside the common block", entry.kind, entry.name));
            }

            for backend in BackendKind::ALL {
                if let Some((offset, size)) = header.backend(backend) {
                    match self.check_range(backend, offset, size) {
                        Ok(()) => report.present[backend.index()] += 1,
                        Err(reason) => report.error(format!("{} '{}': {}", entry.kind, entry.name, reason)),
                    }
                }
            }
        }

        if let Some(offset) = self.shaders_offset() {
            match self.data_header(offset) {
                Ok(header) => {
                    for backend in BackendKind::ALL {
                        if let Some((offset, size)) = header.backend(backend) {
                            self.validate_shaders(backend, offset, size, &mut report);
                        }
                    }
                }
                Err(e) => report.error(format!("shaders header: {}", e)),
            }
        }

        for backend in BackendKind::ALL {
            let present = report.present[backend.index()];
            if present == 0 {
                report.note(format!("{}: absent", backend));
            } else {
                report.note(format!("{}: present in {} resources", backend, present));
            }
        }
        report.note(format!(
            "validation {} with {} errors",
            if report.is_ok() { "passed" } else { "failed" },
            report.errors
        ));
        report
    }

    fn check_range(&self, backend: BackendKind, offset: u32, size: u32) -> std::result::Result<(), String> {
        let block = self.blocks[backend.index()]
            .as_ref()
            .ok_or_else(|| format!("references the missing {} block", backend))?;
        if offset as u64 + size as u64 > block.size {
            return Err(format!(
                "{} data at {}+{} exceeds the {} byte block",
                backend, offset, size, block.size
            ));
        }
        Ok(())
    }

    fn validate_shaders(&self, backend: BackendKind, offset: u32, size: u32, report: &mut ValidationReport) {
        if let Err(reason) = self.check_range(backend, offset, size) {
            report.error(format!("{} shader table: {}", backend, reason));
            return;
        }
        let Some(block) = self.blocks[backend.index()].as_ref() else {
            return;
        };
        let data = match block.bytes() {
            Ok(data) => data,
            Err(e) => {
                report.error(format!("{} block is unreadable: {}", backend, e));
                return;
            }
        };

        let start = offset as usize;
        let Some(table) = data.get(start..start + size as usize) else {
            report.error(format!("{} shader table is past the end of the block", backend));
            return;
        };
        for (idx, entry) in table.chunks_exact(SHADER_ENTRY_SIZE).enumerate() {
            let shader_offset = LittleEndian::read_u32(&entry[..4]);
            let shader_size = LittleEndian::read_u32(&entry[4..]);
            if let Err(reason) = self.check_range(backend, shader_offset, shader_size) {
                report.error(format!("{} shader {}: {}", backend, idx, reason));
            }
        }
    }

    /// Human readable summary of the common block.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Archive contents:");
        let _ = writeln!(out, "  content version {}", self.header.content_version);

        let entries = match self.resources() {
            Ok(entries) => entries,
            Err(e) => {
                let _ = writeln!(out, "  unreadable resource table: {}", e);
                return out;
            }
        };
        for kind in ResourceKind::ALL {
            let of_kind: Vec<&ResourceEntry> = entries.iter().filter(|entry| entry.kind == kind).collect();
            if of_kind.is_empty() {
                continue;
            }

            let _ = writeln!(out, "{} ({})", kind, of_kind.len());
            for entry in of_kind {
                let _ = write!(out, "  '{}'\n    Common: {} bytes", entry.name, entry.size.saturating_sub(DATA_HEADER_SIZE));
                if let Ok(header) = self.data_header(entry.offset) {
                    for backend in BackendKind::ALL {
                        if let Some((_, size)) = header.backend(backend) {
                            let _ = write!(out, "\n    {}: {} bytes", backend, size);
                        }
                    }
                }
                out.push('\n');
            }
        }

        let shaders = self.shaders_offset().and_then(|offset| self.data_header(offset).ok());
        for backend in BackendKind::ALL {
            let Some(block) = self.blocks[backend.index()].as_ref() else {
                continue;
            };
            let count = shaders
                .and_then(|header| header.backend(backend))
                .map_or(0, |(_, size)| size as usize / SHADER_ENTRY_SIZE);
            let _ = writeln!(out, "{} block: {} bytes, {} shaders", backend, block.size, count);
        }
        out
    }

    /// Writes the archive, backend blocks follow the common block in backend
    /// order. Returns the number of bytes written.
    pub fn serialize<W: Write>(&self, sink: &mut W) -> Result<usize> {
        let mut common = self.common.clone();
        common.resize(align_up(common.len()), 0);

        let mut header = self.header;
        let mut offset = common.len();
        for backend in BackendKind::ALL {
            header.base_offsets[backend.index()] = match self.blocks[backend.index()].as_ref() {
                Some(block) => {
                    let base = align_up(offset);
                    offset = base + block.size as usize;
                    u32::try_from(base).map_err(|_| ArchiveError::corrupt("archive exceeds 4 GiB"))?
                }
                None => INVALID_OFFSET,
            };
        }

        let mut encoded = Vec::with_capacity(BLOCK_HEADER_SIZE);
        header.write(&mut encoded)?;
        common[..BLOCK_HEADER_SIZE].copy_from_slice(&encoded);
        sink.write_all(&common)?;

        let mut written = common.len();
        // The last block is not padded
        for block in self.blocks.iter().flatten() {
            let padding = align_up(written) - written;
            sink.write_all(&[0; 8][..padding])?;
            let data = block.bytes()?;
            sink.write_all(data)?;
            written += padding + data.len();
        }
        Ok(written)
    }

    pub fn serialize_to_vec(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.serialize(&mut out)?;
        Ok(out)
    }
}
