//! Texture images and the uploader that fills them.

use crate::asset::PixelImage;
use crate::device::{DeviceFunctions, GpuObject};
use crate::error::RendererError;
use crate::memory::{select_memory_type, MemoryPolicy};
use crate::resource::OwnedObjects;
use ash::vk;
use std::sync::Arc;
use tracing::{debug, info, warn};

const BYTES_PER_PIXEL: usize = 4;

pub(crate) const COLOR_SUBRESOURCE_RANGE: vk::ImageSubresourceRange = vk::ImageSubresourceRange {
    aspect_mask: vk::ImageAspectFlags::COLOR,
    base_mip_level: 0,
    level_count: 1,
    base_array_layer: 0,
    layer_count: 1,
};

/// The sampled texture image with its view and, when the format can be
/// rendered to, a framebuffer compatible with the shared render pass.
pub struct Texture {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub view: vk::ImageView,
    pub framebuffer: Option<vk::Framebuffer>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub tiling: vk::ImageTiling,
    objects: OwnedObjects,
}

impl Texture {
    pub fn handle(&self) -> TextureHandle {
        TextureHandle {
            image: self.image,
            view: self.view,
            extent: self.extent,
            format: self.format,
            layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }
    }

    /// Destroys every handle of the texture now.
    pub fn release(mut self) {
        self.objects.release();
    }
}

impl std::fmt::Debug for Texture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Texture")
            .field("image", &self.image)
            .field("view", &self.view)
            .field("extent", &self.extent)
            .field("format", &self.format)
            .field("tiling", &self.tiling)
            .finish_non_exhaustive()
    }
}

/// Linear, host-written source of a staged upload.
pub struct StagingTexture {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    objects: OwnedObjects,
}

impl std::fmt::Debug for StagingTexture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagingTexture")
            .field("image", &self.image)
            .field("objects", &self.objects)
            .finish()
    }
}

/// What the host compositor samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureHandle {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub layout: vk::ImageLayout,
}

/// The result of an upload.
///
/// Fields drop in order, so a staged texture is destroyed before its staging
/// image, the reverse of how they were created.
#[derive(Debug)]
pub enum UploadPath {
    /// Pixels were written straight into a linear, sampleable image.
    Direct(Texture),
    /// Pixels sit in a linear staging image and still have to be copied
    /// into the optimal texture on the GPU.
    Staged(Texture, StagingTexture),
}

impl UploadPath {
    pub fn texture(&self) -> &Texture {
        match self {
            Self::Direct(texture) | Self::Staged(texture, _) => texture,
        }
    }

    pub fn staging(&self) -> Option<&StagingTexture> {
        match self {
            Self::Direct(_) => None,
            Self::Staged(_, staging) => Some(staging),
        }
    }

    pub fn is_staged(&self) -> bool {
        matches!(self, Self::Staged(..))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploaderConfig {
    /// Always go through a staging image, even when linear sampling works.
    pub force_staging: bool,
}

pub struct TextureUploader {
    device: Arc<dyn DeviceFunctions>,
    config: UploaderConfig,
    render_pass: vk::RenderPass,
}

impl TextureUploader {
    pub fn new(
        device: Arc<dyn DeviceFunctions>,
        config: UploaderConfig,
        render_pass: vk::RenderPass,
    ) -> Self {
        if config.force_staging {
            info!("texture uploads forced through a staging image");
        }
        Self {
            device,
            config,
            render_pass,
        }
    }

    /// Creates a texture holding `image` using the fastest path the device
    /// supports for `format`.
    ///
    /// The returned images are still in `PREINITIALIZED` layout; the caller
    /// must run the matching layout transition before sampling.
    pub fn upload(&self, image: &PixelImage, format: vk::Format) -> Result<UploadPath, RendererError> {
        let props = self.device.format_properties(format);
        let sampled = vk::FormatFeatureFlags::SAMPLED_IMAGE;
        let can_sample_linear = props.linear_tiling_features.contains(sampled);
        let can_sample_optimal = props.optimal_tiling_features.contains(sampled);
        if !can_sample_linear && !can_sample_optimal {
            return Err(RendererError::UnsupportedFormat(format));
        }

        if self.config.force_staging && !can_sample_optimal {
            warn!(?format, "staging forced but optimal tiling cannot sample, uploading directly");
        }

        let extent = image.extent();
        if can_sample_linear && (!self.config.force_staging || !can_sample_optimal) {
            debug!(width = extent.width, height = extent.height, "direct linear upload");
            let mut objects = OwnedObjects::new(self.device.clone(), "texture");
            let usage = attachable(
                vk::ImageUsageFlags::SAMPLED,
                props.linear_tiling_features,
            );
            let (tex_image, memory) = create_image(
                &mut objects,
                extent,
                format,
                vk::ImageTiling::LINEAR,
                usage,
                vk::ImageLayout::PREINITIALIZED,
                MemoryPolicy::FirstMatch(host_visible()),
            )?;
            write_linear_image(&*self.device, tex_image, memory, image)?;
            let texture = finish_texture(
                objects,
                tex_image,
                memory,
                format,
                extent,
                vk::ImageTiling::LINEAR,
                usage,
                self.render_pass,
            )?;
            return Ok(UploadPath::Direct(texture));
        }

        debug!(
            width = extent.width,
            height = extent.height,
            forced = self.config.force_staging,
            "staged upload"
        );
        let mut staging_objects = OwnedObjects::new(self.device.clone(), "staging texture");
        let (staging_image, staging_memory) = create_image(
            &mut staging_objects,
            extent,
            format,
            vk::ImageTiling::LINEAR,
            vk::ImageUsageFlags::TRANSFER_SRC,
            vk::ImageLayout::PREINITIALIZED,
            MemoryPolicy::FirstMatch(host_visible()),
        )?;

        let mut objects = OwnedObjects::new(self.device.clone(), "texture");
        let usage = attachable(
            vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
            props.optimal_tiling_features,
        );
        let (tex_image, memory) = create_image(
            &mut objects,
            extent,
            format,
            vk::ImageTiling::OPTIMAL,
            usage,
            vk::ImageLayout::PREINITIALIZED,
            MemoryPolicy::FirstMatch(vk::MemoryPropertyFlags::DEVICE_LOCAL),
        )?;
        write_linear_image(&*self.device, staging_image, staging_memory, image)?;

        let texture = finish_texture(
            objects,
            tex_image,
            memory,
            format,
            extent,
            vk::ImageTiling::OPTIMAL,
            usage,
            self.render_pass,
        )?;
        let staging = StagingTexture {
            image: staging_image,
            memory: staging_memory,
            objects: staging_objects,
        };
        Ok(UploadPath::Staged(texture, staging))
    }
}

/// Creates the optimal colour-attachment texture the plain variant renders
/// into every frame.
pub fn create_render_target(
    device: Arc<dyn DeviceFunctions>,
    extent: vk::Extent2D,
    format: vk::Format,
    render_pass: vk::RenderPass,
) -> Result<Texture, RendererError> {
    if extent.width == 0 || extent.height == 0 {
        return Err(RendererError::InvalidInput(format!(
            "render target size {}x{} is empty",
            extent.width, extent.height
        )));
    }
    let mut objects = OwnedObjects::new(device, "render target");
    let usage = vk::ImageUsageFlags::SAMPLED
        | vk::ImageUsageFlags::TRANSFER_DST
        | vk::ImageUsageFlags::COLOR_ATTACHMENT;
    let (image, memory) = create_image(
        &mut objects,
        extent,
        format,
        vk::ImageTiling::OPTIMAL,
        usage,
        vk::ImageLayout::UNDEFINED,
        MemoryPolicy::LastCandidate,
    )?;
    finish_texture(
        objects,
        image,
        memory,
        format,
        extent,
        vk::ImageTiling::OPTIMAL,
        usage,
        render_pass,
    )
}

fn host_visible() -> vk::MemoryPropertyFlags {
    vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
}

/// Adds colour-attachment usage when the tiling supports it, so the texture
/// can back a framebuffer.
fn attachable(usage: vk::ImageUsageFlags, features: vk::FormatFeatureFlags) -> vk::ImageUsageFlags {
    if features.contains(vk::FormatFeatureFlags::COLOR_ATTACHMENT) {
        usage | vk::ImageUsageFlags::COLOR_ATTACHMENT
    } else {
        usage
    }
}

fn create_image(
    objects: &mut OwnedObjects,
    extent: vk::Extent2D,
    format: vk::Format,
    tiling: vk::ImageTiling,
    usage: vk::ImageUsageFlags,
    initial_layout: vk::ImageLayout,
    policy: MemoryPolicy,
) -> Result<(vk::Image, vk::DeviceMemory), RendererError> {
    let device = objects.device().clone();
    let image_info = vk::ImageCreateInfo::builder()
        .image_type(vk::ImageType::TYPE_2D)
        .format(format)
        .extent(vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        })
        .mip_levels(1)
        .array_layers(1)
        .samples(vk::SampleCountFlags::TYPE_1)
        .tiling(tiling)
        .usage(usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .initial_layout(initial_layout);
    let image = device
        .create_image(&image_info)
        .map_err(RendererError::vk("vkCreateImage"))?;
    objects.push(GpuObject::Image(image));

    let requirements = device.image_memory_requirements(image);
    let memory_type_index = select_memory_type(
        requirements.memory_type_bits,
        policy,
        &device.memory_properties(),
    )?;
    debug!(
        bytes = requirements.size,
        memory_type_index,
        ?tiling,
        "allocating texture image memory"
    );
    let alloc_info = vk::MemoryAllocateInfo::builder()
        .allocation_size(requirements.size)
        .memory_type_index(memory_type_index);
    let memory = device
        .allocate_memory(&alloc_info)
        .map_err(RendererError::vk("vkAllocateMemory"))?;
    objects.push(GpuObject::Memory(memory));

    device
        .bind_image_memory(image, memory, 0)
        .map_err(RendererError::vk("vkBindImageMemory"))?;
    Ok((image, memory))
}

/// Copies `pixels` row by row into a mapped linear image, advancing the
/// destination by the device-reported row pitch.
fn write_linear_image(
    device: &dyn DeviceFunctions,
    image: vk::Image,
    memory: vk::DeviceMemory,
    pixels: &PixelImage,
) -> Result<(), RendererError> {
    let subresource = vk::ImageSubresource {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        mip_level: 0,
        array_layer: 0,
    };
    let layout = device.image_subresource_layout(image, subresource);
    let row_bytes = pixels.width() as usize * BYTES_PER_PIXEL;
    let row_pitch = layout.row_pitch as usize;
    let needed = row_pitch
        .checked_mul(pixels.height() as usize - 1)
        .and_then(|rows| rows.checked_add(row_bytes));
    if row_pitch < row_bytes || needed.map_or(true, |n| n as u64 > layout.size) {
        return Err(RendererError::InvalidInput(format!(
            "linear image layout (pitch {}, size {}) cannot hold {}x{} pixels",
            layout.row_pitch,
            layout.size,
            pixels.width(),
            pixels.height()
        )));
    }

    let dst = device
        .map_memory(memory, layout.offset, layout.size)
        .map_err(RendererError::vk("vkMapMemory"))?;
    for y in 0..pixels.height() {
        let Some(src) = pixels.row(y) else {
            device.unmap_memory(memory);
            return Err(RendererError::InvalidInput(format!("pixel row {y} out of range")));
        };
        // SAFETY: the mapping covers `layout.size` bytes and the bound check
        // above keeps every row inside it.
        unsafe {
            std::ptr::copy_nonoverlapping(src.as_ptr(), dst.add(y as usize * row_pitch), row_bytes);
        }
    }
    device.unmap_memory(memory);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn finish_texture(
    mut objects: OwnedObjects,
    image: vk::Image,
    memory: vk::DeviceMemory,
    format: vk::Format,
    extent: vk::Extent2D,
    tiling: vk::ImageTiling,
    usage: vk::ImageUsageFlags,
    render_pass: vk::RenderPass,
) -> Result<Texture, RendererError> {
    let device = objects.device().clone();
    let view_info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping {
            r: vk::ComponentSwizzle::R,
            g: vk::ComponentSwizzle::G,
            b: vk::ComponentSwizzle::B,
            a: vk::ComponentSwizzle::A,
        })
        .subresource_range(COLOR_SUBRESOURCE_RANGE);
    let view = device
        .create_image_view(&view_info)
        .map_err(RendererError::vk("vkCreateImageView"))?;
    objects.push(GpuObject::ImageView(view));

    let framebuffer = if usage.contains(vk::ImageUsageFlags::COLOR_ATTACHMENT) {
        let attachments = [view];
        let framebuffer_info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass)
            .attachments(&attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);
        let framebuffer = device
            .create_framebuffer(&framebuffer_info)
            .map_err(RendererError::vk("vkCreateFramebuffer"))?;
        objects.push(GpuObject::Framebuffer(framebuffer));
        Some(framebuffer)
    } else {
        debug!(?tiling, "format cannot be a colour attachment, no framebuffer");
        None
    };

    Ok(Texture {
        image,
        memory,
        view,
        framebuffer,
        format,
        extent,
        tiling,
        objects,
    })
}
