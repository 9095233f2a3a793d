use pcore::primitive_enum;
use pcore::serializer::{Serializable, Serializer, SerializerError};

use crate::desc::{visit_option, visit_slice};

/// Native texture format value, passed through untouched.
pub type TextureFormat = u16;

primitive_enum! {
    #[derive(Default)]
    pub enum AttachmentLoadOp: u8 {
        #[default]
        Load = 0,
        Clear = 1,
        Discard = 2,
    }
}

primitive_enum! {
    #[derive(Default)]
    pub enum AttachmentStoreOp: u8 {
        #[default]
        Store = 0,
        Discard = 1,
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderPassAttachmentDesc {
    pub format: TextureFormat,
    pub sample_count: u8,
    pub load_op: AttachmentLoadOp,
    pub store_op: AttachmentStoreOp,
    pub stencil_load_op: AttachmentLoadOp,
    pub stencil_store_op: AttachmentStoreOp,
    pub initial_state: u32,
    pub final_state: u32,
}

impl<'a> Serializable<'a> for RenderPassAttachmentDesc {
    fn visit<S: Serializer<'a>>(&mut self, ser: &mut S) -> Result<(), SerializerError> {
        ser.primitive(&mut self.format)?;
        ser.primitive(&mut self.sample_count)?;
        ser.primitive(&mut self.load_op)?;
        ser.primitive(&mut self.store_op)?;
        ser.primitive(&mut self.stencil_load_op)?;
        ser.primitive(&mut self.stencil_store_op)?;
        ser.primitive(&mut self.initial_state)?;
        ser.primitive(&mut self.final_state)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AttachmentReference {
    pub attachment_index: u32,
    pub state: u32,
}

impl<'a> Serializable<'a> for AttachmentReference {
    fn visit<S: Serializer<'a>>(&mut self, ser: &mut S) -> Result<(), SerializerError> {
        ser.primitive(&mut self.attachment_index)?;
        ser.primitive(&mut self.state)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ShadingRateAttachment {
    pub attachment: AttachmentReference,
    pub tile_size: [u32; 2],
}

impl<'a> Serializable<'a> for ShadingRateAttachment {
    fn visit<S: Serializer<'a>>(&mut self, ser: &mut S) -> Result<(), SerializerError> {
        self.attachment.visit(ser)?;
        ser.primitive(&mut self.tile_size)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SubpassDesc<'a> {
    pub input_attachments: &'a [AttachmentReference],
    pub render_target_attachments: &'a [AttachmentReference],
    pub resolve_attachments: &'a [AttachmentReference],
    pub depth_stencil_attachment: Option<AttachmentReference>,
    pub preserve_attachments: &'a [u32],
    pub shading_rate_attachment: Option<ShadingRateAttachment>,
}

impl<'a> Serializable<'a> for SubpassDesc<'a> {
    fn visit<S: Serializer<'a>>(&mut self, ser: &mut S) -> Result<(), SerializerError> {
        visit_slice(ser, &mut self.input_attachments)?;
        visit_slice(ser, &mut self.render_target_attachments)?;
        visit_slice(ser, &mut self.resolve_attachments)?;
        visit_option(ser, &mut self.depth_stencil_attachment)?;
        ser.raw_array(&mut self.preserve_attachments)?;
        visit_option(ser, &mut self.shading_rate_attachment)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SubpassDependencyDesc {
    pub src_subpass: u32,
    pub dst_subpass: u32,
    pub src_stage_mask: u32,
    pub dst_stage_mask: u32,
    pub src_access_mask: u32,
    pub dst_access_mask: u32,
}

impl<'a> Serializable<'a> for SubpassDependencyDesc {
    fn visit<S: Serializer<'a>>(&mut self, ser: &mut S) -> Result<(), SerializerError> {
        ser.primitive(&mut self.src_subpass)?;
        ser.primitive(&mut self.dst_subpass)?;
        ser.primitive(&mut self.src_stage_mask)?;
        ser.primitive(&mut self.dst_stage_mask)?;
        ser.primitive(&mut self.src_access_mask)?;
        ser.primitive(&mut self.dst_access_mask)
    }
}

/// Render passes are fully backend agnostic, they carry no per backend data.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderPassDesc<'a> {
    pub name: Option<&'a str>,
    pub attachments: &'a [RenderPassAttachmentDesc],
    pub subpasses: &'a [SubpassDesc<'a>],
    pub dependencies: &'a [SubpassDependencyDesc],
}

impl<'a> Serializable<'a> for RenderPassDesc<'a> {
    fn visit<S: Serializer<'a>>(&mut self, ser: &mut S) -> Result<(), SerializerError> {
        visit_slice(ser, &mut self.attachments)?;
        visit_slice(ser, &mut self.subpasses)?;
        visit_slice(ser, &mut self.dependencies)
    }
}

#[cfg(test)]
mod test_render_pass_desc {
    use super::*;
    use pcore::arena::Arena;
    use pcore::serializer::{from_bytes, to_vec};

    #[test]
    fn round_trip() {
        let desc = RenderPassDesc {
            name: None,
            attachments: &[
                RenderPassAttachmentDesc {
                    format: 29,
                    sample_count: 1,
                    load_op: AttachmentLoadOp::Clear,
                    ..Default::default()
                },
                RenderPassAttachmentDesc {
                    format: 45,
                    sample_count: 1,
                    stencil_load_op: AttachmentLoadOp::Discard,
                    ..Default::default()
                },
            ],
            subpasses: &[SubpassDesc {
                render_target_attachments: &[AttachmentReference { attachment_index: 0, state: 4 }],
                depth_stencil_attachment: Some(AttachmentReference { attachment_index: 1, state: 8 }),
                preserve_attachments: &[2, 3],
                ..Default::default()
            }],
            dependencies: &[SubpassDependencyDesc {
                src_subpass: 0,
                dst_subpass: 1,
                ..Default::default()
            }],
        };
        let data = to_vec(&desc).unwrap();
        let arena = Arena::new();

        assert_eq!(from_bytes::<RenderPassDesc>(&data, &arena).unwrap(), desc);
    }
}
