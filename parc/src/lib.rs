//! Device object archives.
//!
//! An archive packs already compiled, backend tagged GPU pipeline data so a
//! consumer can recreate the objects on whichever backend it runs without
//! recompiling. See [`format`] for the binary layouts.
//!
//! - [`archiver::Archiver`] collects resources produced by a
//!   [`device::SerializationDevice`] and deduplicates shader blobs.
//! - [`dearchiver::Dearchiver`] loads archives and lazily recreates objects
//!   through a [`dearchiver::BackendFactory`].
//! - [`repacker::ArchiveRepacker`] strips or splices backend data without
//!   deserializing any resource.

pub mod archive;
pub mod archiver;
pub mod backend;
pub mod dearchiver;
pub mod desc;
pub mod device;
pub mod error;
pub mod format;
pub mod payload;
pub mod pool;
pub mod repacker;
pub mod resource;

pub use crate::archive::Archive;
pub use crate::backend::{BackendFlags, BackendKind, DeviceType};
pub use crate::error::{ArchiveError, Result};
pub use crate::format::ArchiveLayout;
pub use crate::resource::{ResourceData, ResourceKey, ResourceKind, ResourceName};
