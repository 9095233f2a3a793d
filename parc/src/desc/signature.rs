use pcore::primitive_enum;
use pcore::serializer::{Serializable, Serializer, SerializerError};

use crate::desc::{visit_slice, ShaderStages};

primitive_enum! {
    #[derive(Default)]
    pub enum ShaderResourceType: u8 {
        #[default]
        Unknown = 0,
        ConstantBuffer = 1,
        TextureSrv = 2,
        BufferSrv = 3,
        TextureUav = 4,
        BufferUav = 5,
        Sampler = 6,
        InputAttachment = 7,
        AccelStruct = 8,
    }
}

primitive_enum! {
    #[derive(Default)]
    pub enum ResourceVariableType: u8 {
        #[default]
        Static = 0,
        Mutable = 1,
        Dynamic = 2,
    }
}

primitive_enum! {
    #[derive(Default)]
    pub enum FilterType: u8 {
        Unknown = 0,
        Point = 1,
        #[default]
        Linear = 2,
        Anisotropic = 3,
        ComparisonPoint = 4,
        ComparisonLinear = 5,
        ComparisonAnisotropic = 6,
    }
}

primitive_enum! {
    #[derive(Default)]
    pub enum TextureAddressMode: u8 {
        Unknown = 0,
        Wrap = 1,
        Mirror = 2,
        #[default]
        Clamp = 3,
        Border = 4,
        MirrorOnce = 5,
    }
}

primitive_enum! {
    #[derive(Default)]
    pub enum ComparisonFunc: u8 {
        Unknown = 0,
        #[default]
        Never = 1,
        Less = 2,
        Equal = 3,
        LessEqual = 4,
        Greater = 5,
        NotEqual = 6,
        GreaterEqual = 7,
        Always = 8,
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PipelineResourceDesc<'a> {
    pub name: Option<&'a str>,
    pub shader_stages: ShaderStages,
    pub array_size: u32,
    pub resource_type: ShaderResourceType,
    pub var_type: ResourceVariableType,
    pub flags: u32,
}

impl<'a> Serializable<'a> for PipelineResourceDesc<'a> {
    fn visit<S: Serializer<'a>>(&mut self, ser: &mut S) -> Result<(), SerializerError> {
        ser.string(&mut self.name)?;
        ser.primitive(&mut self.shader_stages)?;
        ser.primitive(&mut self.array_size)?;
        ser.primitive(&mut self.resource_type)?;
        ser.primitive(&mut self.var_type)?;
        ser.primitive(&mut self.flags)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SamplerDesc {
    pub min_filter: FilterType,
    pub mag_filter: FilterType,
    pub mip_filter: FilterType,
    pub address_u: TextureAddressMode,
    pub address_v: TextureAddressMode,
    pub address_w: TextureAddressMode,
    pub flags: u8,
    pub mip_lod_bias: f32,
    pub max_anisotropy: u32,
    pub comparison_func: ComparisonFunc,
    pub border_color: [f32; 4],
    pub min_lod: f32,
    pub max_lod: f32,
}

impl Default for SamplerDesc {
    fn default() -> Self {
        SamplerDesc {
            min_filter: FilterType::Linear,
            mag_filter: FilterType::Linear,
            mip_filter: FilterType::Linear,
            address_u: TextureAddressMode::Clamp,
            address_v: TextureAddressMode::Clamp,
            address_w: TextureAddressMode::Clamp,
            flags: 0,
            mip_lod_bias: 0.0,
            max_anisotropy: 0,
            comparison_func: ComparisonFunc::Never,
            border_color: [0.0; 4],
            min_lod: 0.0,
            max_lod: f32::MAX,
        }
    }
}

impl<'a> Serializable<'a> for SamplerDesc {
    fn visit<S: Serializer<'a>>(&mut self, ser: &mut S) -> Result<(), SerializerError> {
        ser.primitive(&mut self.min_filter)?;
        ser.primitive(&mut self.mag_filter)?;
        ser.primitive(&mut self.mip_filter)?;
        ser.primitive(&mut self.address_u)?;
        ser.primitive(&mut self.address_v)?;
        ser.primitive(&mut self.address_w)?;
        ser.primitive(&mut self.flags)?;
        ser.primitive(&mut self.mip_lod_bias)?;
        ser.primitive(&mut self.max_anisotropy)?;
        ser.primitive(&mut self.comparison_func)?;
        ser.primitive(&mut self.border_color)?;
        ser.primitive(&mut self.min_lod)?;
        ser.primitive(&mut self.max_lod)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ImmutableSamplerDesc<'a> {
    pub shader_stages: ShaderStages,
    pub sampler_or_texture_name: Option<&'a str>,
    pub desc: SamplerDesc,
}

impl<'a> Serializable<'a> for ImmutableSamplerDesc<'a> {
    fn visit<S: Serializer<'a>>(&mut self, ser: &mut S) -> Result<(), SerializerError> {
        ser.primitive(&mut self.shader_stages)?;
        ser.string(&mut self.sampler_or_texture_name)?;
        self.desc.visit(ser)
    }
}

/// Backend agnostic resource binding layout.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ResourceSignatureDesc<'a> {
    pub name: Option<&'a str>,
    pub binding_index: u8,
    pub use_combined_texture_samplers: bool,
    pub combined_sampler_suffix: Option<&'a str>,
    pub srb_allocation_granularity: u32,
    pub resources: &'a [PipelineResourceDesc<'a>],
    pub immutable_samplers: &'a [ImmutableSamplerDesc<'a>],
}

impl<'a> Serializable<'a> for ResourceSignatureDesc<'a> {
    fn visit<S: Serializer<'a>>(&mut self, ser: &mut S) -> Result<(), SerializerError> {
        ser.primitive(&mut self.binding_index)?;
        ser.primitive(&mut self.use_combined_texture_samplers)?;
        ser.string(&mut self.combined_sampler_suffix)?;
        ser.primitive(&mut self.srb_allocation_granularity)?;
        visit_slice(ser, &mut self.resources)?;
        visit_slice(ser, &mut self.immutable_samplers)
    }
}
