use pcore::primitive_enum;
use pcore::serializer::{Serializable, Serializer, SerializerError};

use crate::desc::{
    visit_names, visit_slice, ComparisonFunc, ImmutableSamplerDesc, ResourceVariableType, ShaderStages,
    TextureFormat,
};
use crate::resource::ResourceKind;

pub const MAX_RENDER_TARGETS: usize = 8;

/// Shader group slot that is not used.
pub const NO_SHADER: u32 = u32::MAX;

primitive_enum! {
    #[derive(Default)]
    pub enum PipelineType: u8 {
        #[default]
        Graphics = 0,
        Compute = 1,
        Mesh = 2,
        RayTracing = 3,
        Tile = 4,
    }
}

impl PipelineType {
    /// The resource kind pipelines of this type are archived under.
    pub fn resource_kind(self) -> ResourceKind {
        match self {
            PipelineType::Graphics | PipelineType::Mesh => ResourceKind::GraphicsPipeline,
            PipelineType::Compute => ResourceKind::ComputePipeline,
            PipelineType::RayTracing => ResourceKind::RayTracingPipeline,
            PipelineType::Tile => ResourceKind::TilePipeline,
        }
    }
}

primitive_enum! {
    #[derive(Default)]
    pub enum FillMode: u8 {
        Wireframe = 1,
        #[default]
        Solid = 2,
    }
}

primitive_enum! {
    #[derive(Default)]
    pub enum CullMode: u8 {
        None = 1,
        Front = 2,
        #[default]
        Back = 3,
    }
}

primitive_enum! {
    #[derive(Default)]
    pub enum PrimitiveTopology: u8 {
        Undefined = 0,
        #[default]
        TriangleList = 1,
        TriangleStrip = 2,
        PointList = 3,
        LineList = 4,
        LineStrip = 5,
        TriangleListAdj = 6,
        TriangleStripAdj = 7,
        LineListAdj = 8,
        LineStripAdj = 9,
        PatchList = 10,
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ShaderResourceVariableDesc<'a> {
    pub shader_stages: ShaderStages,
    pub name: Option<&'a str>,
    pub var_type: ResourceVariableType,
    pub flags: u32,
}

impl<'a> Serializable<'a> for ShaderResourceVariableDesc<'a> {
    fn visit<S: Serializer<'a>>(&mut self, ser: &mut S) -> Result<(), SerializerError> {
        ser.primitive(&mut self.shader_stages)?;
        ser.string(&mut self.name)?;
        ser.primitive(&mut self.var_type)?;
        ser.primitive(&mut self.flags)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PipelineResourceLayoutDesc<'a> {
    pub default_variable_type: ResourceVariableType,
    pub default_variable_merge_stages: ShaderStages,
    pub variables: &'a [ShaderResourceVariableDesc<'a>],
    pub immutable_samplers: &'a [ImmutableSamplerDesc<'a>],
}

impl<'a> Serializable<'a> for PipelineResourceLayoutDesc<'a> {
    fn visit<S: Serializer<'a>>(&mut self, ser: &mut S) -> Result<(), SerializerError> {
        ser.primitive(&mut self.default_variable_type)?;
        ser.primitive(&mut self.default_variable_merge_stages)?;
        visit_slice(ser, &mut self.variables)?;
        visit_slice(ser, &mut self.immutable_samplers)
    }
}

/// State shared by every pipeline type.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PipelineStateDesc<'a> {
    pub name: Option<&'a str>,
    pub pipeline_type: PipelineType,
    pub flags: u32,
    pub immediate_context_mask: u64,
    pub srb_allocation_granularity: u32,
    pub resource_layout: PipelineResourceLayoutDesc<'a>,
    /// Names of the resource signatures, resolved against the archive.
    pub resource_signatures: &'a [Option<&'a str>],
}

impl<'a> Serializable<'a> for PipelineStateDesc<'a> {
    fn visit<S: Serializer<'a>>(&mut self, ser: &mut S) -> Result<(), SerializerError> {
        ser.primitive(&mut self.pipeline_type)?;
        ser.primitive(&mut self.flags)?;
        ser.primitive(&mut self.immediate_context_mask)?;
        ser.primitive(&mut self.srb_allocation_granularity)?;
        self.resource_layout.visit(ser)?;
        visit_names(ser, &mut self.resource_signatures)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderTargetBlendDesc {
    pub blend_enable: bool,
    pub logic_operation_enable: bool,
    pub src_blend: u8,
    pub dest_blend: u8,
    pub blend_op: u8,
    pub src_blend_alpha: u8,
    pub dest_blend_alpha: u8,
    pub blend_op_alpha: u8,
    pub logic_op: u8,
    pub write_mask: u8,
}

impl<'a> Serializable<'a> for RenderTargetBlendDesc {
    fn visit<S: Serializer<'a>>(&mut self, ser: &mut S) -> Result<(), SerializerError> {
        ser.primitive(&mut self.blend_enable)?;
        ser.primitive(&mut self.logic_operation_enable)?;
        ser.primitive(&mut self.src_blend)?;
        ser.primitive(&mut self.dest_blend)?;
        ser.primitive(&mut self.blend_op)?;
        ser.primitive(&mut self.src_blend_alpha)?;
        ser.primitive(&mut self.dest_blend_alpha)?;
        ser.primitive(&mut self.blend_op_alpha)?;
        ser.primitive(&mut self.logic_op)?;
        ser.primitive(&mut self.write_mask)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlendStateDesc {
    pub alpha_to_coverage_enable: bool,
    pub independent_blend_enable: bool,
    pub render_targets: [RenderTargetBlendDesc; MAX_RENDER_TARGETS],
}

impl<'a> Serializable<'a> for BlendStateDesc {
    fn visit<S: Serializer<'a>>(&mut self, ser: &mut S) -> Result<(), SerializerError> {
        ser.primitive(&mut self.alpha_to_coverage_enable)?;
        ser.primitive(&mut self.independent_blend_enable)?;
        for rt in self.render_targets.iter_mut() {
            rt.visit(ser)?;
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RasterizerStateDesc {
    pub fill_mode: FillMode,
    pub cull_mode: CullMode,
    pub front_counter_clockwise: bool,
    pub depth_clip_enable: bool,
    pub scissor_enable: bool,
    pub antialiased_line_enable: bool,
    pub depth_bias: i32,
    pub depth_bias_clamp: f32,
    pub slope_scaled_depth_bias: f32,
}

impl<'a> Serializable<'a> for RasterizerStateDesc {
    fn visit<S: Serializer<'a>>(&mut self, ser: &mut S) -> Result<(), SerializerError> {
        ser.primitive(&mut self.fill_mode)?;
        ser.primitive(&mut self.cull_mode)?;
        ser.primitive(&mut self.front_counter_clockwise)?;
        ser.primitive(&mut self.depth_clip_enable)?;
        ser.primitive(&mut self.scissor_enable)?;
        ser.primitive(&mut self.antialiased_line_enable)?;
        ser.primitive(&mut self.depth_bias)?;
        ser.primitive(&mut self.depth_bias_clamp)?;
        ser.primitive(&mut self.slope_scaled_depth_bias)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StencilOpDesc {
    pub fail_op: u8,
    pub depth_fail_op: u8,
    pub pass_op: u8,
    pub func: ComparisonFunc,
}

impl<'a> Serializable<'a> for StencilOpDesc {
    fn visit<S: Serializer<'a>>(&mut self, ser: &mut S) -> Result<(), SerializerError> {
        ser.primitive(&mut self.fail_op)?;
        ser.primitive(&mut self.depth_fail_op)?;
        ser.primitive(&mut self.pass_op)?;
        ser.primitive(&mut self.func)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DepthStencilStateDesc {
    pub depth_enable: bool,
    pub depth_write_enable: bool,
    pub depth_func: ComparisonFunc,
    pub stencil_enable: bool,
    pub stencil_read_mask: u8,
    pub stencil_write_mask: u8,
    pub front_face: StencilOpDesc,
    pub back_face: StencilOpDesc,
}

impl<'a> Serializable<'a> for DepthStencilStateDesc {
    fn visit<S: Serializer<'a>>(&mut self, ser: &mut S) -> Result<(), SerializerError> {
        ser.primitive(&mut self.depth_enable)?;
        ser.primitive(&mut self.depth_write_enable)?;
        ser.primitive(&mut self.depth_func)?;
        ser.primitive(&mut self.stencil_enable)?;
        ser.primitive(&mut self.stencil_read_mask)?;
        ser.primitive(&mut self.stencil_write_mask)?;
        self.front_face.visit(ser)?;
        self.back_face.visit(ser)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LayoutElement<'a> {
    pub hlsl_semantic: Option<&'a str>,
    pub input_index: u32,
    pub buffer_slot: u32,
    pub num_components: u32,
    pub value_type: u8,
    pub is_normalized: bool,
    pub relative_offset: u32,
    pub stride: u32,
    pub per_instance: bool,
    pub instance_data_step_rate: u32,
}

impl<'a> Serializable<'a> for LayoutElement<'a> {
    fn visit<S: Serializer<'a>>(&mut self, ser: &mut S) -> Result<(), SerializerError> {
        ser.string(&mut self.hlsl_semantic)?;
        ser.primitive(&mut self.input_index)?;
        ser.primitive(&mut self.buffer_slot)?;
        ser.primitive(&mut self.num_components)?;
        ser.primitive(&mut self.value_type)?;
        ser.primitive(&mut self.is_normalized)?;
        ser.primitive(&mut self.relative_offset)?;
        ser.primitive(&mut self.stride)?;
        ser.primitive(&mut self.per_instance)?;
        ser.primitive(&mut self.instance_data_step_rate)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct GraphicsPipelineDesc<'a> {
    pub blend: BlendStateDesc,
    pub sample_mask: u32,
    pub rasterizer: RasterizerStateDesc,
    pub depth_stencil: DepthStencilStateDesc,
    pub input_layout: &'a [LayoutElement<'a>],
    pub primitive_topology: PrimitiveTopology,
    pub num_viewports: u8,
    pub num_render_targets: u8,
    pub subpass_index: u8,
    pub shading_rate_flags: u8,
    pub rtv_formats: [TextureFormat; MAX_RENDER_TARGETS],
    pub dsv_format: TextureFormat,
    pub sample_count: u8,
    pub sample_quality: u8,
    pub node_mask: u32,
    /// Name of the render pass, resolved against the archive.
    pub render_pass: Option<&'a str>,
}

impl<'a> Serializable<'a> for GraphicsPipelineDesc<'a> {
    fn visit<S: Serializer<'a>>(&mut self, ser: &mut S) -> Result<(), SerializerError> {
        self.blend.visit(ser)?;
        ser.primitive(&mut self.sample_mask)?;
        self.rasterizer.visit(ser)?;
        self.depth_stencil.visit(ser)?;
        visit_slice(ser, &mut self.input_layout)?;
        ser.primitive(&mut self.primitive_topology)?;
        ser.primitive(&mut self.num_viewports)?;
        ser.primitive(&mut self.num_render_targets)?;
        ser.primitive(&mut self.subpass_index)?;
        ser.primitive(&mut self.shading_rate_flags)?;
        ser.primitive(&mut self.rtv_formats)?;
        ser.primitive(&mut self.dsv_format)?;
        ser.primitive(&mut self.sample_count)?;
        ser.primitive(&mut self.sample_quality)?;
        ser.primitive(&mut self.node_mask)?;
        ser.string(&mut self.render_pass)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TilePipelineDesc {
    pub num_render_targets: u8,
    pub sample_count: u8,
    pub rtv_formats: [TextureFormat; MAX_RENDER_TARGETS],
}

impl<'a> Serializable<'a> for TilePipelineDesc {
    fn visit<S: Serializer<'a>>(&mut self, ser: &mut S) -> Result<(), SerializerError> {
        ser.primitive(&mut self.num_render_targets)?;
        ser.primitive(&mut self.sample_count)?;
        ser.primitive(&mut self.rtv_formats)
    }
}

// Ray tracing shader groups reference shaders by their position in the
// pipeline's shader list.

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RayTracingGeneralShaderGroup<'a> {
    pub name: Option<&'a str>,
    pub shader: u32,
}

impl<'a> Serializable<'a> for RayTracingGeneralShaderGroup<'a> {
    fn visit<S: Serializer<'a>>(&mut self, ser: &mut S) -> Result<(), SerializerError> {
        ser.string(&mut self.name)?;
        ser.primitive(&mut self.shader)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RayTracingTriangleHitShaderGroup<'a> {
    pub name: Option<&'a str>,
    pub closest_hit_shader: u32,
    pub any_hit_shader: u32,
}

impl Default for RayTracingTriangleHitShaderGroup<'_> {
    fn default() -> Self {
        RayTracingTriangleHitShaderGroup {
            name: None,
            closest_hit_shader: NO_SHADER,
            any_hit_shader: NO_SHADER,
        }
    }
}

impl<'a> Serializable<'a> for RayTracingTriangleHitShaderGroup<'a> {
    fn visit<S: Serializer<'a>>(&mut self, ser: &mut S) -> Result<(), SerializerError> {
        ser.string(&mut self.name)?;
        ser.primitive(&mut self.closest_hit_shader)?;
        ser.primitive(&mut self.any_hit_shader)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RayTracingProceduralHitShaderGroup<'a> {
    pub name: Option<&'a str>,
    pub intersection_shader: u32,
    pub closest_hit_shader: u32,
    pub any_hit_shader: u32,
}

impl Default for RayTracingProceduralHitShaderGroup<'_> {
    fn default() -> Self {
        RayTracingProceduralHitShaderGroup {
            name: None,
            intersection_shader: NO_SHADER,
            closest_hit_shader: NO_SHADER,
            any_hit_shader: NO_SHADER,
        }
    }
}

impl<'a> Serializable<'a> for RayTracingProceduralHitShaderGroup<'a> {
    fn visit<S: Serializer<'a>>(&mut self, ser: &mut S) -> Result<(), SerializerError> {
        ser.string(&mut self.name)?;
        ser.primitive(&mut self.intersection_shader)?;
        ser.primitive(&mut self.closest_hit_shader)?;
        ser.primitive(&mut self.any_hit_shader)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RayTracingPipelineDesc<'a> {
    pub shader_record_size: u16,
    pub max_recursion_depth: u8,
    pub general_shaders: &'a [RayTracingGeneralShaderGroup<'a>],
    pub triangle_hit_shaders: &'a [RayTracingTriangleHitShaderGroup<'a>],
    pub procedural_hit_shaders: &'a [RayTracingProceduralHitShaderGroup<'a>],
    pub shader_record_name: Option<&'a str>,
    pub max_attribute_size: u32,
    pub max_payload_size: u32,
}

impl<'a> RayTracingPipelineDesc<'a> {
    /// Every shader position referenced by a group.
    pub fn referenced_shaders(&self) -> impl Iterator<Item = u32> + 'a {
        let (general, triangle, procedural) = (
            self.general_shaders,
            self.triangle_hit_shaders,
            self.procedural_hit_shaders,
        );
        let general = general.iter().map(|g| g.shader);
        let triangle = triangle
            .iter()
            .flat_map(|g| [g.closest_hit_shader, g.any_hit_shader]);
        let procedural = procedural
            .iter()
            .flat_map(|g| [g.intersection_shader, g.closest_hit_shader, g.any_hit_shader]);

        general
            .chain(triangle)
            .chain(procedural)
            .filter(|idx| *idx != NO_SHADER)
    }
}

impl<'a> Serializable<'a> for RayTracingPipelineDesc<'a> {
    fn visit<S: Serializer<'a>>(&mut self, ser: &mut S) -> Result<(), SerializerError> {
        ser.primitive(&mut self.shader_record_size)?;
        ser.primitive(&mut self.max_recursion_depth)?;
        visit_slice(ser, &mut self.general_shaders)?;
        visit_slice(ser, &mut self.triangle_hit_shaders)?;
        visit_slice(ser, &mut self.procedural_hit_shaders)?;
        ser.string(&mut self.shader_record_name)?;
        ser.primitive(&mut self.max_attribute_size)?;
        ser.primitive(&mut self.max_payload_size)
    }
}

/// Type specific part of a pipeline description.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum PipelineExtra<'a> {
    Graphics(GraphicsPipelineDesc<'a>),
    #[default]
    Compute,
    RayTracing(RayTracingPipelineDesc<'a>),
    Tile(TilePipelineDesc),
}

/// Complete backend agnostic pipeline description.
///
/// The serialized form is the state followed by the part selected by
/// `state.pipeline_type`, a mismatching `extra` is written as defaults.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PipelineDesc<'a> {
    pub state: PipelineStateDesc<'a>,
    pub extra: PipelineExtra<'a>,
}

impl<'a> PipelineDesc<'a> {
    pub fn graphics(&self) -> Option<&GraphicsPipelineDesc<'a>> {
        match &self.extra {
            PipelineExtra::Graphics(desc) => Some(desc),
            _ => None,
        }
    }

    pub fn ray_tracing(&self) -> Option<&RayTracingPipelineDesc<'a>> {
        match &self.extra {
            PipelineExtra::RayTracing(desc) => Some(desc),
            _ => None,
        }
    }

    pub fn render_pass(&self) -> Option<&'a str> {
        self.graphics().and_then(|g| g.render_pass)
    }

    /// True when `extra` is the variant `state.pipeline_type` selects.
    pub fn is_consistent(&self) -> bool {
        matches!(
            (self.state.pipeline_type, &self.extra),
            (PipelineType::Graphics | PipelineType::Mesh, PipelineExtra::Graphics(_))
                | (PipelineType::Compute, PipelineExtra::Compute)
                | (PipelineType::RayTracing, PipelineExtra::RayTracing(_))
                | (PipelineType::Tile, PipelineExtra::Tile(_))
        )
    }
}

impl<'a> Serializable<'a> for PipelineDesc<'a> {
    fn visit<S: Serializer<'a>>(&mut self, ser: &mut S) -> Result<(), SerializerError> {
        self.state.visit(ser)?;

        match self.state.pipeline_type {
            PipelineType::Graphics | PipelineType::Mesh => {
                let mut desc = match self.extra {
                    PipelineExtra::Graphics(desc) => desc,
                    _ => GraphicsPipelineDesc::default(),
                };
                desc.visit(ser)?;
                self.extra = PipelineExtra::Graphics(desc);
            }
            PipelineType::Compute => self.extra = PipelineExtra::Compute,
            PipelineType::RayTracing => {
                let mut desc = match self.extra {
                    PipelineExtra::RayTracing(desc) => desc,
                    _ => RayTracingPipelineDesc::default(),
                };
                desc.visit(ser)?;
                self.extra = PipelineExtra::RayTracing(desc);
            }
            PipelineType::Tile => {
                let mut desc = match self.extra {
                    PipelineExtra::Tile(desc) => desc,
                    _ => TilePipelineDesc::default(),
                };
                desc.visit(ser)?;
                self.extra = PipelineExtra::Tile(desc);
            }
        }
        Ok(())
    }
}
