use pcore::primitive_enum;
use pcore::serializer::{Serializable, Serializer, SerializerError};

primitive_enum! {
    #[derive(Default)]
    pub enum ShaderStage: u32 {
        #[default]
        Unknown = 0,
        Vertex = 0x0001,
        Pixel = 0x0002,
        Geometry = 0x0004,
        Hull = 0x0008,
        Domain = 0x0010,
        Compute = 0x0020,
        Amplification = 0x0040,
        Mesh = 0x0080,
        RayGen = 0x0100,
        RayMiss = 0x0200,
        RayClosestHit = 0x0400,
        RayAnyHit = 0x0800,
        RayIntersection = 0x1000,
        Callable = 0x2000,
        Tile = 0x4000,
    }
}

primitive_enum! {
    #[derive(Default)]
    pub enum ShaderLanguage: u32 {
        #[default]
        Default = 0,
        Hlsl = 1,
        Glsl = 2,
        GlslVerbatim = 3,
        Msl = 4,
        MslVerbatim = 5,
        MtlLib = 6,
        Wgsl = 7,
        Bytecode = 8,
    }
}

/// One compiled shader for one backend.
///
/// The archive keeps the backend agnostic fields (no name, empty bytecode) as
/// the common data of a standalone shader, and the full create info,
/// bytecode included, as one shader pool entry per backend.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ShaderCreateInfo<'a> {
    pub name: Option<&'a str>,
    pub stage: ShaderStage,
    pub entry_point: Option<&'a str>,
    pub language: ShaderLanguage,
    pub compile_flags: u32,
    pub bytecode: &'a [u8],
}

impl<'a> ShaderCreateInfo<'a> {
    /// The backend agnostic part.
    pub fn common(&self) -> ShaderCreateInfo<'a> {
        ShaderCreateInfo {
            name: None,
            bytecode: &[],
            ..*self
        }
    }
}

impl<'a> Serializable<'a> for ShaderCreateInfo<'a> {
    fn visit<S: Serializer<'a>>(&mut self, ser: &mut S) -> Result<(), SerializerError> {
        ser.string(&mut self.name)?;
        ser.primitive(&mut self.stage)?;
        ser.string(&mut self.entry_point)?;
        ser.primitive(&mut self.language)?;
        ser.primitive(&mut self.compile_flags)?;
        ser.bytes(&mut self.bytecode)
    }
}

#[cfg(test)]
mod test_shader_create_info {
    use super::*;
    use pcore::arena::Arena;
    use pcore::serializer::{from_bytes, to_vec};

    #[test]
    fn round_trip() {
        let info = ShaderCreateInfo {
            name: Some("CS"),
            stage: ShaderStage::Compute,
            entry_point: Some("main"),
            language: ShaderLanguage::Hlsl,
            compile_flags: 2,
            bytecode: &[0x10, 0x20, 0x30],
        };
        let data = to_vec(&info).unwrap();
        let arena = Arena::new();

        assert_eq!(from_bytes::<ShaderCreateInfo>(&data, &arena).unwrap(), info);
    }

    #[test]
    fn common_drops_backend_fields() {
        let info = ShaderCreateInfo {
            name: Some("CS"),
            stage: ShaderStage::Compute,
            bytecode: &[1, 2],
            ..Default::default()
        };

        assert_eq!(info.common().name, None);
        assert!(info.common().bytecode.is_empty());
        assert_eq!(info.common().stage, ShaderStage::Compute);
    }
}
