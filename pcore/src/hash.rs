use std::fmt;
use std::hash::Hasher as StdHasher;

use twox_hash::XxHash64;

// Make the content hash api be similiar to blake3's
pub struct ContentHasher(XxHash64);

impl ContentHasher {
    pub fn new() -> ContentHasher {
        ContentHasher(XxHash64::with_seed(0))
    }

    pub fn update(&mut self, data: &[u8]) {
        self.0.write(data);
    }

    pub fn finalize(self) -> u64 {
        self.0.finish()
    }
}

impl Default for ContentHasher {
    fn default() -> Self {
        ContentHasher::new()
    }
}

/// 64 bit content hash used for deduplicating blobs.
pub fn content_hash(data: &[u8]) -> u64 {
    let mut hash = ContentHasher::new();
    hash.update(data);
    hash.finalize()
}

/// Strong digest of a whole archive, used to identify archive files.
#[derive(PartialEq, Eq, Clone, Copy, Hash)]
pub struct Fingerprint(blake3::Hash);

pub fn fingerprint(data: &[u8]) -> Fingerprint {
    Fingerprint(blake3::hash(data))
}

// To encapsulate the hash engine used
pub fn from_hex(hash: &str) -> Result<Fingerprint, blake3::HexError> {
    blake3::Hash::from_hex(hash).map(Fingerprint)
}

pub fn to_hex(hash: &Fingerprint) -> String {
    hash.0.to_hex().to_string()
}

impl From<[u8; 32]> for Fingerprint {
    fn from(bytes: [u8; 32]) -> Self {
        Fingerprint(blake3::Hash::from(bytes))
    }
}

impl Fingerprint {
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.0.to_hex())
    }
}
