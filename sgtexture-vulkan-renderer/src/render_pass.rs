use crate::device::{DeviceFunctions, GpuObject};
use crate::error::RendererError;
use ash::vk;
use std::sync::Arc;
use tracing::debug;

/// The single-colour-attachment render pass shared by the texture
/// framebuffers and the pipeline.
pub struct RenderPass {
    device: Arc<dyn DeviceFunctions>,
    pub handle: vk::RenderPass,
}

impl RenderPass {
    pub fn new(device: Arc<dyn DeviceFunctions>, format: vk::Format) -> Result<Self, RendererError> {
        // Define Attachments
        let color_attachment = vk::AttachmentDescription::builder()
            .format(format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .build();

        // Define Subpasses
        let color_attachment_ref = vk::AttachmentReference::builder()
            .attachment(0)
            .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .build();

        let subpass = vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(std::slice::from_ref(&color_attachment_ref))
            .build();

        // Earlier sampling of the texture must finish before it is cleared.
        let dependency = vk::SubpassDependency::builder()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(vk::PipelineStageFlags::FRAGMENT_SHADER)
            .src_access_mask(vk::AccessFlags::SHADER_READ)
            .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
            .build();

        // Create Render Pass
        let attachments = [color_attachment];
        let subpasses = [subpass];
        let dependencies = [dependency];

        let render_pass_create_info = vk::RenderPassCreateInfo::builder()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        let handle = device
            .create_render_pass(&render_pass_create_info)
            .map_err(RendererError::vk("vkCreateRenderPass"))?;
        debug!(?format, "created render pass");

        Ok(Self { device, handle })
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        debug!("destroying render pass");
        self.device.destroy(GpuObject::RenderPass(self.handle));
    }
}
