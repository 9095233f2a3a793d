//! Typed descriptions stored in the common data of each resource.
//!
//! Descriptions are `Copy` values borrowing their strings and arrays, in
//! Read mode from the archive buffer or the arena of the unpack call. Names
//! are never serialized, they come from the resource key.
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use pcore::serializer::{Primitive, Serializable, Serializer, SerializerError};

pub mod pipeline;
pub mod render_pass;
pub mod shader;
pub mod signature;

pub use self::pipeline::*;
pub use self::render_pass::*;
pub use self::shader::*;
pub use self::signature::*;

/// Bitmask of [`ShaderStage`]s.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ShaderStages(pub u32);

impl ShaderStages {
    pub const NONE: ShaderStages = ShaderStages(0);
    pub const ALL_GRAPHICS: ShaderStages = ShaderStages(0x1f);

    pub fn contains(self, stage: ShaderStage) -> bool {
        self.0 & stage as u32 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl From<ShaderStage> for ShaderStages {
    fn from(stage: ShaderStage) -> Self {
        ShaderStages(stage as u32)
    }
}

impl BitOr for ShaderStages {
    type Output = ShaderStages;

    fn bitor(self, rhs: Self) -> Self {
        ShaderStages(self.0 | rhs.0)
    }
}

impl BitOr<ShaderStage> for ShaderStages {
    type Output = ShaderStages;

    fn bitor(self, rhs: ShaderStage) -> Self {
        ShaderStages(self.0 | rhs as u32)
    }
}

impl BitOrAssign<ShaderStage> for ShaderStages {
    fn bitor_assign(&mut self, rhs: ShaderStage) {
        self.0 |= rhs as u32;
    }
}

impl fmt::Debug for ShaderStages {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShaderStages({:#x})", self.0)
    }
}

impl Primitive for ShaderStages {
    const SIZE: usize = 4;

    fn encode(&self, out: &mut [u8]) {
        self.0.encode(out)
    }

    fn decode(src: &[u8]) -> Result<Self, SerializerError> {
        u32::decode(src).map(ShaderStages)
    }
}

pub(crate) fn visit_option<'a, S, T>(ser: &mut S, value: &mut Option<T>) -> Result<(), SerializerError>
where
    S: Serializer<'a>,
    T: Serializable<'a>,
{
    let mut present = value.is_some();
    ser.primitive(&mut present)?;

    let mut inner = value.unwrap_or_default();
    if present {
        inner.visit(ser)?;
        *value = Some(inner);
    } else {
        *value = None;
    }
    Ok(())
}

pub(crate) fn visit_slice<'a, S, T>(ser: &mut S, value: &mut &'a [T]) -> Result<(), SerializerError>
where
    S: Serializer<'a>,
    T: Serializable<'a> + 'a,
{
    ser.array(value, |ser, item| item.visit(ser))
}

pub(crate) fn visit_names<'a, S: Serializer<'a>>(
    ser: &mut S,
    value: &mut &'a [Option<&'a str>],
) -> Result<(), SerializerError> {
    ser.array(value, |ser, name| ser.string(name))
}
