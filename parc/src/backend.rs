use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Graphics backends an archive can carry data for.
///
/// The declaration order is the fixed order backend slots are stored in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BackendKind {
    OpenGL,
    D3D11,
    D3D12,
    Vulkan,
    MetalMacOS,
    MetalIOS,
    WebGPU,
}

impl BackendKind {
    pub const COUNT: usize = 7;

    pub const ALL: [BackendKind; BackendKind::COUNT] = [
        BackendKind::OpenGL,
        BackendKind::D3D11,
        BackendKind::D3D12,
        BackendKind::Vulkan,
        BackendKind::MetalMacOS,
        BackendKind::MetalIOS,
        BackendKind::WebGPU,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<BackendKind> {
        BackendKind::ALL.get(index).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            BackendKind::OpenGL => "OpenGL",
            BackendKind::D3D11 => "Direct3D11",
            BackendKind::D3D12 => "Direct3D12",
            BackendKind::Vulkan => "Vulkan",
            BackendKind::MetalMacOS => "Metal_MacOS",
            BackendKind::MetalIOS => "Metal_iOS",
            BackendKind::WebGPU => "WebGPU",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("unknown backend {0:?}")]
pub struct ParseBackendError(String);

impl FromStr for BackendKind {
    type Err = ParseBackendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "opengl" | "gl" | "gles" => Ok(BackendKind::OpenGL),
            "d3d11" | "direct3d11" => Ok(BackendKind::D3D11),
            "d3d12" | "direct3d12" => Ok(BackendKind::D3D12),
            "vulkan" | "vk" => Ok(BackendKind::Vulkan),
            "metal_macos" | "metal-macos" | "macos" => Ok(BackendKind::MetalMacOS),
            "metal_ios" | "metal-ios" | "ios" => Ok(BackendKind::MetalIOS),
            "webgpu" | "wgpu" => Ok(BackendKind::WebGPU),
            _ => Err(ParseBackendError(s.to_string())),
        }
    }
}

/// Runtime device types. GL and GLES are aliases that share the OpenGL slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeviceType {
    D3D11,
    D3D12,
    Gl,
    Gles,
    Vulkan,
    MetalMacOS,
    MetalIOS,
    WebGPU,
}

impl DeviceType {
    pub fn backend(self) -> BackendKind {
        match self {
            DeviceType::D3D11 => BackendKind::D3D11,
            DeviceType::D3D12 => BackendKind::D3D12,
            DeviceType::Gl | DeviceType::Gles => BackendKind::OpenGL,
            DeviceType::Vulkan => BackendKind::Vulkan,
            DeviceType::MetalMacOS => BackendKind::MetalMacOS,
            DeviceType::MetalIOS => BackendKind::MetalIOS,
            DeviceType::WebGPU => BackendKind::WebGPU,
        }
    }
}

/// Set of backends.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct BackendFlags(u32);

impl BackendFlags {
    pub const NONE: BackendFlags = BackendFlags(0);
    pub const ALL: BackendFlags = BackendFlags((1 << BackendKind::COUNT) - 1);

    pub fn contains(self, backend: BackendKind) -> bool {
        self.0 & (1 << backend.index()) != 0
    }

    pub fn insert(&mut self, backend: BackendKind) {
        self.0 |= 1 << backend.index();
    }

    pub fn remove(&mut self, backend: BackendKind) {
        self.0 &= !(1 << backend.index());
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn iter(self) -> impl Iterator<Item = BackendKind> {
        BackendKind::ALL.into_iter().filter(move |b| self.contains(*b))
    }
}

impl From<BackendKind> for BackendFlags {
    fn from(backend: BackendKind) -> Self {
        BackendFlags(1 << backend.index())
    }
}

impl FromIterator<BackendKind> for BackendFlags {
    fn from_iter<I: IntoIterator<Item = BackendKind>>(iter: I) -> Self {
        let mut flags = BackendFlags::NONE;
        for backend in iter {
            flags.insert(backend);
        }
        flags
    }
}

impl fmt::Debug for BackendFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}
