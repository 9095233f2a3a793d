//! Archive file formats
//!
//! Two layouts carry the same [`crate::Archive`] content. Both start with a
//! `u32` magic number followed by a `u32` format version, the magic number
//! selects the layout. Unless other wise noted everything is stored in Little
//! Endian format.
//!
//! <div class="example-wrap" style="display:inline-block">
//! <pre class="compile_fail" style="white-space:normal;font:inherit;">
//!
//! **Warning**: The format version is bumped on any layout change, older
//! files are rejected rather than migrated.
//!
//! </pre>
//! </div>
//!
//! # Stream layout (`PSOA`)
//!
//! Written front to back by a single serializer pass, see [`stream`]. This is
//! what the archiver produces by default.
//!
//! | Type    | Name            | Description |
//! | ------: | --------------- | ----------- |
//! | u32     | magic           | `PSOA` |
//! | u32     | version         | Format version |
//! | u32     | api version     | Version of the producer api |
//! | u32     | content version | Caller assigned compatibility tag |
//! | string  | build id        | Free form producer identifier |
//! | u32     | count           | Number of resources |
//! | ...     | resources       | `kind u32, name string, common bytes, backend bytes * N` |
//! | ...     | shaders         | Per backend `count u32` then `bytes * count` |
//!
//! Strings and bytes are encoded by [`pcore::serializer`]. Backends are always
//! written in [`crate::BackendKind::ALL`] order, an absent slot is empty bytes.
//!
//! # Block layout (`PSOB`)
//!
//! Separates the data into one common block plus one contiguous block per
//! backend so a backend can be removed or spliced in without touching the
//! others, see [`blocks`].
//!
//! | Type     | Name         | Description |
//! | -------: | ------------ | ----------- |
//! | u32      | magic        | `PSOB` |
//! | u32      | version      | Format version |
//! | u32      | content version | Caller assigned compatibility tag |
//! | u32      | chunk count  | Number of chunk headers that follow |
//! | [u32; N] | base offsets | File offset of each backend block, `u32::MAX` when absent |
//! | ...      | chunks       | `type u32, size u32, offset u32, reserved u32` per chunk |
//!
//! ## Chunks
//!
//! | Chunk type | Content |
//! | :--------: | ------- |
//! | 1          | Debug info: api version and build id |
//! | 2..=8      | Named resource array for one [`crate::ResourceKind`] |
//! | 9          | Shaders: a data header locating each backend's shader table |
//!
//! A named resource array is `count u32, name_len[count], data_size[count],
//! data_offset[count]` followed by the name bytes. Each data offset points to
//! a [`blocks::DataHeader`] in the common block, followed by the common data.
//! The header holds a `(size, offset)` pair per backend, relative to that
//! backend's base offset. `(0, u32::MAX)` means no data.
use std::fmt;
use std::str::FromStr;

use byteorder::{ByteOrder, LittleEndian};

pub mod blocks;
pub mod stream;

pub const STREAM_MAGIC: u32 = u32::from_le_bytes(*b"PSOA");
pub const BLOCK_MAGIC: u32 = u32::from_le_bytes(*b"PSOB");

pub const STREAM_VERSION: u32 = 1;
pub const BLOCK_VERSION: u32 = 1;

/// Version of the description structures, recorded as the api version.
pub const API_VERSION: u32 = 1;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ArchiveLayout {
    #[default]
    Stream,
    Blocks,
}

impl ArchiveLayout {
    pub fn name(self) -> &'static str {
        match self {
            ArchiveLayout::Stream => "stream",
            ArchiveLayout::Blocks => "blocks",
        }
    }
}

impl fmt::Display for ArchiveLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ArchiveLayout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stream" => Ok(ArchiveLayout::Stream),
            "blocks" => Ok(ArchiveLayout::Blocks),
            _ => Err(format!("unknown archive layout {:?}", s)),
        }
    }
}

/// Detects the layout from the magic number, `None` when the data is too
/// short or the magic is unknown.
pub fn detect_layout(data: &[u8]) -> Option<ArchiveLayout> {
    match LittleEndian::read_u32(data.get(..4)?) {
        STREAM_MAGIC => Some(ArchiveLayout::Stream),
        BLOCK_MAGIC => Some(ArchiveLayout::Blocks),
        _ => None,
    }
}
