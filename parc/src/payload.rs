//! Per backend payloads of shader bearing resources.
//!
//! A standalone shader stores a single `u32` pool index, a pipeline stores
//! a `u32` array of pool indices in shader order.
use byteorder::{ByteOrder, LittleEndian};

use pcore::arena::Arena;
use pcore::data::SerializedData;
use pcore::serializer::{Reader, Serializer};

use crate::error::{ArchiveError, Result};
use crate::resource::ResourceKind;

pub fn encode_index(index: u32) -> SerializedData {
    let mut data = vec![0; 4];
    LittleEndian::write_u32(&mut data, index);
    SerializedData::new(data)
}

pub fn decode_index(data: &[u8]) -> Result<u32> {
    if data.len() != 4 {
        return Err(ArchiveError::corrupt(format!("shader index payload is {} bytes", data.len())));
    }
    Ok(LittleEndian::read_u32(data))
}

pub fn encode_indices(indices: &[u32]) -> SerializedData {
    let mut data = vec![0; 4 + indices.len() * 4];
    LittleEndian::write_u32(&mut data[..4], indices.len() as u32);
    LittleEndian::write_u32_into(indices, &mut data[4..]);
    SerializedData::new(data)
}

pub fn decode_indices(data: &[u8]) -> Result<Vec<u32>> {
    let arena = Arena::new();
    let mut reader = Reader::new(data, &arena);
    let mut indices: &[u32] = &[];
    reader.raw_array(&mut indices)?;

    if !reader.is_exhausted() {
        return Err(ArchiveError::corrupt("trailing bytes after shader indices"));
    }
    Ok(indices.to_vec())
}

/// Pool indices referenced by one backend slot of a resource.
pub fn shader_indices(kind: ResourceKind, data: &[u8]) -> Result<Vec<u32>> {
    match kind {
        ResourceKind::StandaloneShader => Ok(vec![decode_index(data)?]),
        kind if kind.is_pipeline() => decode_indices(data),
        _ => Ok(Vec::new()),
    }
}

/// Rewrites the pool indices of a backend slot through `remap`.
pub fn remap_indices<F>(kind: ResourceKind, data: &SerializedData, mut remap: F) -> Result<SerializedData>
where
    F: FnMut(u32) -> Result<u32>,
{
    if data.is_empty() || !kind.references_shaders() {
        return Ok(data.clone());
    }

    match kind {
        ResourceKind::StandaloneShader => Ok(encode_index(remap(decode_index(data.as_slice())?)?)),
        _ => {
            let indices = decode_indices(data.as_slice())?
                .into_iter()
                .map(&mut remap)
                .collect::<Result<Vec<u32>>>()?;
            Ok(encode_indices(&indices))
        }
    }
}
