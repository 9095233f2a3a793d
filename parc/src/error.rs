use thiserror::Error;

use pcore::serializer::SerializerError;

use crate::backend::BackendKind;
use crate::dearchiver::FactoryError;
use crate::resource::{ResourceKey, ResourceKind};

#[derive(Error, Debug)]
pub enum ArchiveError {
    // Format errors, the archive is unusable
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("archive data is corrupt: {0}")]
    Serializer(#[from] SerializerError),
    #[error("bad magic number {0:#010x}")]
    BadMagic(u32),
    #[error("unsupported archive version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },
    #[error("archive content version {found} does not match the expected {expected}")]
    ContentVersionMismatch { found: u32, expected: u32 },
    #[error("archive is corrupt: {0}")]
    Corrupt(String),
    #[error("operation needs the {0} archive layout")]
    WrongLayout(&'static str),

    // Per resource errors
    #[error("{key} already exists with different data")]
    NameConflict { key: ResourceKey },
    #[error("{key} depends on {missing} which is not in any loaded archive")]
    DependencyMissing { key: ResourceKey, missing: ResourceKey },
    #[error("{0} not found")]
    NotFound(ResourceKey),
    #[error("{kind} is not a pipeline kind")]
    NotAPipeline { kind: ResourceKind },
    #[error("{key} has no data for the {backend} backend")]
    BackendDataMissing { key: ResourceKey, backend: BackendKind },
    #[error("{key}: not every shader has {backend} bytecode")]
    IncompleteShaders { key: ResourceKey, backend: BackendKind },
    #[error("the {0} backend is not enabled on this device")]
    BackendNotEnabled(BackendKind),
    #[error("backend data cannot be combined: {0}")]
    BackendMismatch(String),
    #[error("{key}: modification not allowed, {reason}")]
    DisallowedModification { key: ResourceKey, reason: String },
    #[error("{key}: handle was created by a different serialization device")]
    ForeignHandle { key: ResourceKey },
    #[error("invalid resource name {0:?}")]
    InvalidName(String),
    #[error("{key}: {reason}")]
    InvalidDescription { key: ResourceKey, reason: String },
    #[error("{key}: backend object creation failed")]
    Factory {
        key: ResourceKey,
        #[source]
        source: FactoryError,
    },
}

pub type Result<T> = std::result::Result<T, ArchiveError>;

impl ArchiveError {
    pub(crate) fn corrupt<S: Into<String>>(reason: S) -> Self {
        ArchiveError::Corrupt(reason.into())
    }

    /// Format errors make the whole archive unusable.
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            ArchiveError::Io(_)
                | ArchiveError::Serializer(_)
                | ArchiveError::BadMagic(_)
                | ArchiveError::UnsupportedVersion { .. }
                | ArchiveError::ContentVersionMismatch { .. }
                | ArchiveError::Corrupt(_)
                | ArchiveError::WrongLayout(_)
        )
    }
}
