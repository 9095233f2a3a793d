use std::fmt;
use std::sync::OnceLock;

use bytes::Bytes;

use crate::hash::content_hash;

/// A byte buffer with a lazily computed, cached content hash.
///
/// The buffer is a [`Bytes`] so a view into a loaded archive shares the
/// archive's allocation, [`SerializedData::make_copy`] detaches it when the
/// data has to outlive that archive.
#[derive(Clone, Default)]
pub struct SerializedData {
    bytes: Bytes,
    hash: OnceLock<u64>,
}

impl SerializedData {
    pub fn new(data: Vec<u8>) -> Self {
        SerializedData {
            bytes: Bytes::from(data),
            hash: OnceLock::new(),
        }
    }

    pub fn copy_from_slice(data: &[u8]) -> Self {
        SerializedData {
            bytes: Bytes::copy_from_slice(data),
            hash: OnceLock::new(),
        }
    }

    /// Zero-copy view of `sub`, which must be a slice of `owner`.
    ///
    /// Panics if `sub` does not point inside `owner`.
    pub fn view(owner: &Bytes, sub: &[u8]) -> Self {
        SerializedData {
            bytes: owner.slice_ref(sub),
            hash: OnceLock::new(),
        }
    }

    /// Zero-copy view of `owner[offset..offset + len]`, `None` when out of bounds.
    pub fn view_range(owner: &Bytes, offset: usize, len: usize) -> Option<Self> {
        let end = offset.checked_add(len)?;
        if end > owner.len() {
            return None;
        }
        Some(SerializedData {
            bytes: owner.slice(offset..end),
            hash: OnceLock::new(),
        })
    }

    /// Owned copy that no longer references the source allocation.
    pub fn make_copy(&self) -> Self {
        let copy = SerializedData::copy_from_slice(&self.bytes);
        if let Some(hash) = self.hash.get() {
            let _ = copy.hash.set(*hash);
        }
        copy
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn hash(&self) -> u64 {
        *self.hash.get_or_init(|| content_hash(&self.bytes))
    }
}

impl PartialEq for SerializedData {
    fn eq(&self, other: &Self) -> bool {
        if self.len() != other.len() {
            return false;
        }
        // Cheap reject when both hashes are already known
        if let (Some(a), Some(b)) = (self.hash.get(), other.hash.get()) {
            if a != b {
                return false;
            }
        }
        self.bytes == other.bytes
    }
}

impl Eq for SerializedData {}

impl AsRef<[u8]> for SerializedData {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl From<Vec<u8>> for SerializedData {
    fn from(data: Vec<u8>) -> Self {
        SerializedData::new(data)
    }
}

impl From<Bytes> for SerializedData {
    fn from(bytes: Bytes) -> Self {
        SerializedData {
            bytes,
            hash: OnceLock::new(),
        }
    }
}

impl fmt::Debug for SerializedData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerializedData")
            .field("len", &self.len())
            .field("hash", &format_args!("{:016x}", self.hash()))
            .finish()
    }
}

#[cfg(test)]
mod test_serialized_data {
    use super::*;

    #[test]
    fn equality_is_bytewise() {
        let a = SerializedData::new(vec![1, 2, 3]);
        let b = SerializedData::copy_from_slice(&[1, 2, 3]);
        let c = SerializedData::new(vec![1, 2, 4]);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.hash(), b.hash());
        assert_ne!(a.hash(), c.hash());
    }

    #[test]
    fn view_shares_owner() {
        let owner = Bytes::from(vec![0, 1, 2, 3, 4, 5]);
        let view = SerializedData::view(&owner, &owner[2..5]);

        assert_eq!(view.as_slice(), &[2, 3, 4]);
        assert_eq!(view.as_slice().as_ptr(), owner[2..].as_ptr());
    }

    #[test]
    fn view_range_bounds() {
        let owner = Bytes::from(vec![0, 1, 2, 3]);

        assert_eq!(
            SerializedData::view_range(&owner, 1, 3).unwrap().as_slice(),
            &[1, 2, 3]
        );
        assert!(SerializedData::view_range(&owner, 2, 3).is_none());
        assert!(SerializedData::view_range(&owner, usize::MAX, 2).is_none());
    }

    #[test]
    fn copy_detaches() {
        let owner = Bytes::from(vec![9, 8, 7]);
        let view = SerializedData::view(&owner, &owner[..]);
        let hash = view.hash();
        let copy = view.make_copy();

        assert_eq!(copy, view);
        assert_eq!(copy.hash(), hash);
        assert_ne!(copy.as_slice().as_ptr(), owner.as_ptr());
    }

    #[test]
    fn default_is_empty() {
        let data = SerializedData::default();

        assert!(data.is_empty());
        assert_eq!(data, SerializedData::new(Vec::new()));
    }
}
