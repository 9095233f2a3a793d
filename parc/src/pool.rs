use std::collections::HashMap;

use pcore::data::SerializedData;

/// Append-only, content addressed list of shader blobs for one backend.
#[derive(Clone, Debug, Default)]
pub struct ShaderPool {
    entries: Vec<SerializedData>,
    by_hash: HashMap<u64, Vec<u32>>,
}

impl ShaderPool {
    pub fn new() -> Self {
        ShaderPool::default()
    }

    /// Builds a pool from decoded entries, keeping their order.
    ///
    /// Entries are trusted as is, duplicates written by another producer stay
    /// addressable by their original index.
    pub fn from_entries(entries: Vec<SerializedData>) -> Self {
        let mut by_hash: HashMap<u64, Vec<u32>> = HashMap::new();
        for (idx, entry) in entries.iter().enumerate() {
            by_hash.entry(entry.hash()).or_default().push(idx as u32);
        }
        ShaderPool { entries, by_hash }
    }

    pub fn find(&self, data: &SerializedData) -> Option<u32> {
        self.by_hash
            .get(&data.hash())?
            .iter()
            .copied()
            .find(|idx| self.entries[*idx as usize] == *data)
    }

    /// Returns the index of `data`, appending it when not present yet. The
    /// flag is true when the entry was appended.
    pub fn insert(&mut self, data: SerializedData) -> (u32, bool) {
        if let Some(idx) = self.find(&data) {
            return (idx, false);
        }

        let idx = self.entries.len() as u32;
        self.by_hash.entry(data.hash()).or_default().push(idx);
        self.entries.push(data);
        (idx, true)
    }

    pub fn get(&self, idx: u32) -> Option<&SerializedData> {
        self.entries.get(idx as usize)
    }

    pub fn entries(&self) -> &[SerializedData] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn byte_size(&self) -> usize {
        self.entries.iter().map(|e| e.len()).sum()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.by_hash.clear();
    }
}

impl PartialEq for ShaderPool {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl Eq for ShaderPool {}
