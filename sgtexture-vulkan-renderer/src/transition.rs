//! Moves freshly uploaded textures into `SHADER_READ_ONLY_OPTIMAL`.
//!
//! An upload leaves its images `PREINITIALIZED`. The barriers that make them
//! sampleable are recorded into the first frame's command buffer after the
//! upload, and only once.

use crate::device::DeviceFunctions;
use crate::error::RendererError;
use crate::texture::{StagingTexture, Texture, UploadPath, COLOR_SUBRESOURCE_RANGE};
use ash::vk;
use tracing::trace;

/// The barrier sequence still owed to the current texture.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PendingTransition {
    #[default]
    None,
    DirectHostToShaderRead,
    StagedHostToTransferThenCopy,
}

impl PendingTransition {
    pub fn for_upload(path: &UploadPath) -> Self {
        match path {
            UploadPath::Direct(_) => Self::DirectHostToShaderRead,
            UploadPath::Staged(..) => Self::StagedHostToTransferThenCopy,
        }
    }
}

#[derive(Debug, Default)]
pub struct LayoutTransitionSequencer {
    pending: PendingTransition,
}

impl LayoutTransitionSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> PendingTransition {
        self.pending
    }

    /// Records that `path` was just created and still needs its transition.
    pub fn arm(&mut self, path: &UploadPath) {
        self.pending = PendingTransition::for_upload(path);
        trace!(pending = ?self.pending, "layout transition armed");
    }

    /// Forgets the pending transition, for when the texture is torn down
    /// before any frame ran.
    pub fn reset(&mut self) {
        self.pending = PendingTransition::None;
    }

    /// Records the owed barrier sequence into `command_buffer`.
    ///
    /// Returns `false` without recording anything when nothing is pending.
    pub fn flush(
        &mut self,
        device: &dyn DeviceFunctions,
        command_buffer: vk::CommandBuffer,
        path: &UploadPath,
    ) -> Result<bool, RendererError> {
        match (self.pending, path) {
            (PendingTransition::None, _) => return Ok(false),
            (PendingTransition::DirectHostToShaderRead, UploadPath::Direct(texture)) => {
                record_direct(device, command_buffer, texture)
            }
            (PendingTransition::StagedHostToTransferThenCopy, UploadPath::Staged(texture, staging)) => {
                record_staged(device, command_buffer, texture, staging)
            }
            (pending, _) => {
                return Err(RendererError::InvalidInput(format!(
                    "pending transition {pending:?} does not match the upload path"
                )))
            }
        }
        trace!(pending = ?self.pending, "layout transition flushed");
        self.pending = PendingTransition::None;
        Ok(true)
    }
}

fn barrier(
    image: vk::Image,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
    src_access: vk::AccessFlags,
    dst_access: vk::AccessFlags,
) -> vk::ImageMemoryBarrier {
    vk::ImageMemoryBarrier::builder()
        .image(image)
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_access_mask(src_access)
        .dst_access_mask(dst_access)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .subresource_range(COLOR_SUBRESOURCE_RANGE)
        .build()
}

fn record_direct(device: &dyn DeviceFunctions, cb: vk::CommandBuffer, texture: &Texture) {
    device.cmd_pipeline_barrier(
        cb,
        vk::PipelineStageFlags::HOST,
        vk::PipelineStageFlags::FRAGMENT_SHADER,
        &[barrier(
            texture.image,
            vk::ImageLayout::PREINITIALIZED,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::AccessFlags::HOST_WRITE,
            vk::AccessFlags::SHADER_READ,
        )],
    );
}

fn record_staged(
    device: &dyn DeviceFunctions,
    cb: vk::CommandBuffer,
    texture: &Texture,
    staging: &StagingTexture,
) {
    device.cmd_pipeline_barrier(
        cb,
        vk::PipelineStageFlags::HOST,
        vk::PipelineStageFlags::TRANSFER,
        &[barrier(
            staging.image,
            vk::ImageLayout::PREINITIALIZED,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            vk::AccessFlags::HOST_WRITE,
            vk::AccessFlags::TRANSFER_READ,
        )],
    );
    device.cmd_pipeline_barrier(
        cb,
        vk::PipelineStageFlags::TOP_OF_PIPE,
        vk::PipelineStageFlags::TRANSFER,
        &[barrier(
            texture.image,
            vk::ImageLayout::PREINITIALIZED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::AccessFlags::empty(),
            vk::AccessFlags::TRANSFER_WRITE,
        )],
    );

    let layers = vk::ImageSubresourceLayers {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        mip_level: 0,
        base_array_layer: 0,
        layer_count: 1,
    };
    let region = vk::ImageCopy {
        src_subresource: layers,
        src_offset: vk::Offset3D::default(),
        dst_subresource: layers,
        dst_offset: vk::Offset3D::default(),
        extent: vk::Extent3D {
            width: texture.extent.width,
            height: texture.extent.height,
            depth: 1,
        },
    };
    device.cmd_copy_image(
        cb,
        staging.image,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        texture.image,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        &[region],
    );

    device.cmd_pipeline_barrier(
        cb,
        vk::PipelineStageFlags::TRANSFER,
        vk::PipelineStageFlags::FRAGMENT_SHADER,
        &[barrier(
            texture.image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::AccessFlags::TRANSFER_WRITE,
            vk::AccessFlags::SHADER_READ,
        )],
    );
}
