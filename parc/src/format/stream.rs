//! Stream layout codec.
use bytes::Bytes;
use log::debug;

use pcore::arena::Arena;
use pcore::data::SerializedData;
use pcore::serializer::{
    Measurer, Primitive, Reader, Serializer, SerializerError, SerializerMode, Writer,
};

use crate::archive::Archive;
use crate::backend::BackendKind;
use crate::error::{ArchiveError, Result};
use crate::format::{STREAM_MAGIC, STREAM_VERSION};
use crate::pool::ShaderPool;
use crate::resource::{ResourceData, ResourceKey, ResourceKind, ResourceName};

// Walks the archive in Measure or Write mode
fn write_archive<'a, S: Serializer<'a>>(ser: &mut S, archive: &'a Archive) -> std::result::Result<(), SerializerError> {
    debug_assert!(S::MODE != SerializerMode::Read);

    let mut magic = STREAM_MAGIC;
    let mut version = STREAM_VERSION;
    let mut api_version = archive.api_version;
    let mut content_version = archive.content_version;
    let mut build_id = archive.build_id.as_deref();
    ser.primitive(&mut magic)?;
    ser.primitive(&mut version)?;
    ser.primitive(&mut api_version)?;
    ser.primitive(&mut content_version)?;
    ser.string(&mut build_id)?;

    ser.length(archive.resource_count())?;
    for (key, data) in archive.resources() {
        let mut kind = key.kind;
        let mut name = Some(key.name.as_str());
        let mut common = data.common.as_slice();
        ser.primitive(&mut kind)?;
        ser.string(&mut name)?;
        ser.bytes(&mut common)?;

        for slot in data.per_backend.iter() {
            let mut slot = slot.as_slice();
            ser.bytes(&mut slot)?;
        }
    }

    for backend in BackendKind::ALL {
        let pool = archive.shader_pool(backend);
        ser.length(pool.len())?;
        for entry in pool.entries() {
            let mut entry = entry.as_slice();
            ser.bytes(&mut entry)?;
        }
    }
    Ok(())
}

pub fn encoded_size(archive: &Archive) -> Result<usize> {
    let mut measure = Measurer::new();
    write_archive(&mut measure, archive)?;
    Ok(Serializer::position(&measure))
}

pub fn encode(archive: &Archive) -> Result<Vec<u8>> {
    let measured = encoded_size(archive)?;

    let mut buf = vec![0; measured];
    let mut writer = Writer::new(&mut buf);
    write_archive(&mut writer, archive)?;

    let written = Serializer::position(&writer);
    if written != measured {
        return Err(SerializerError::SizeMismatch { measured, written }.into());
    }
    Ok(buf)
}

fn read<'a, P: Primitive + Default>(reader: &mut Reader<'a>) -> std::result::Result<P, SerializerError> {
    let mut value = P::default();
    reader.primitive(&mut value)?;
    Ok(value)
}

fn read_bytes<'a>(reader: &mut Reader<'a>) -> std::result::Result<&'a [u8], SerializerError> {
    let mut value: &'a [u8] = &[];
    reader.bytes(&mut value)?;
    Ok(value)
}

/// Decodes a stream layout archive, names and data are views of `data`.
pub fn decode(data: &Bytes, expected_content_version: Option<u32>) -> Result<Archive> {
    let arena = Arena::new();
    let mut reader = Reader::new(&data[..], &arena);

    let magic: u32 = read(&mut reader)?;
    if magic != STREAM_MAGIC {
        return Err(ArchiveError::BadMagic(magic));
    }
    let version: u32 = read(&mut reader)?;
    if version != STREAM_VERSION {
        return Err(ArchiveError::UnsupportedVersion {
            found: version,
            expected: STREAM_VERSION,
        });
    }
    let api_version: u32 = read(&mut reader)?;
    let content_version: u32 = read(&mut reader)?;
    if let Some(expected) = expected_content_version {
        if expected != content_version {
            return Err(ArchiveError::ContentVersionMismatch {
                found: content_version,
                expected,
            });
        }
    }
    let mut build_id = None;
    reader.string(&mut build_id)?;

    let mut archive = Archive::new(content_version);
    archive.api_version = api_version;
    archive.build_id = build_id.map(str::to_string);

    let count: u32 = read(&mut reader)?;
    for _ in 0..count {
        let kind: ResourceKind = read(&mut reader)?;
        let mut name = None;
        reader.string(&mut name)?;
        let name = name
            .filter(|n| !n.is_empty())
            .ok_or_else(|| ArchiveError::corrupt(format!("unnamed {} resource", kind)))?;
        let key = ResourceKey::new(kind, ResourceName::from_shared(data, name)?);

        let mut resource = ResourceData::new(SerializedData::view(data, read_bytes(&mut reader)?));
        for backend in BackendKind::ALL {
            resource.set_backend(backend, SerializedData::view(data, read_bytes(&mut reader)?));
        }

        debug!("decoded {} ({} common bytes)", key, resource.common.len());
        if archive.get(&key).is_some() {
            return Err(ArchiveError::corrupt(format!("{} is stored twice", key)));
        }
        archive.insert(key, resource)?;
    }

    for backend in BackendKind::ALL {
        let count: u32 = read(&mut reader)?;
        if count as usize > reader.remaining() {
            return Err(ArchiveError::corrupt(format!(
                "{} shader count {} exceeds the archive size",
                backend, count
            )));
        }

        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            entries.push(SerializedData::view(data, read_bytes(&mut reader)?));
        }
        archive.set_shader_pool(backend, ShaderPool::from_entries(entries));
    }

    if !reader.is_exhausted() {
        return Err(ArchiveError::corrupt(format!(
            "{} trailing bytes after the shader pools",
            reader.remaining()
        )));
    }
    Ok(archive)
}
