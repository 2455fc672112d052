//! The texture node: owns one texture, its pipeline and the frame ring, and
//! is driven by the host's sync and per-frame callbacks.
//!
//! # Lifecycle
//!
//! The first [`TextureNode::sync`] builds the render pass, pipeline and frame
//! ring; they live until the node is dropped. Every sync whose pixel size
//! differs from the previous one replaces the texture. The replaced texture
//! may still be referenced by frames in flight, so it is handed to a
//! [`ReleaseQueue`] and destroyed `frames_in_flight` frame callbacks later.
//!
//! Each [`TextureNode::render_frame`] first counts the release queue down,
//! then records whatever the current texture still owes: the upload layout
//! transition for the image variant, or the offscreen draw for the plain
//! variant.

use crate::asset::{ImageSource, SourceImage};
use crate::config::RendererConfig;
use crate::device::DeviceFunctions;
use crate::error::RendererError;
use crate::frame_ring::{FrameRing, FrameRingDesc, TEXTURE_BINDING, UNIFORM_BINDING};
use crate::host::{FrameContext, ShaderSet, SyncInfo};
use crate::pipeline::{
    BlendMode, DescriptorBinding, Pipeline, PipelineBuilder, PipelineDesc, VertexLayout,
};
use crate::release::ReleaseQueue;
use crate::render_pass::RenderPass;
use crate::texture::{
    create_render_target, Texture, TextureHandle, TextureUploader, UploadPath, UploaderConfig,
    COLOR_SUBRESOURCE_RANGE,
};
use crate::transition::{LayoutTransitionSequencer, PendingTransition};
use ash::vk;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

const QUAD_VERTEX_COUNT: u32 = 4;

// Triangle strip, x y z u v.
const TEXTURED_QUAD: [f32; 20] = [
    -1.0, -1.0, 0.0, 0.0, 1.0, //
    -1.0, 1.0, 0.0, 0.0, 0.0, //
    1.0, -1.0, 0.0, 1.0, 1.0, //
    1.0, 1.0, 0.0, 1.0, 0.0,
];

// Triangle strip, x y.
const PLAIN_QUAD: [f32; 8] = [-1.0, -1.0, 1.0, -1.0, -1.0, 1.0, 1.0, 1.0];

const IDENTITY: [f32; 16] = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

/// Which texture the node produces.
pub enum NodeVariant {
    /// Uploads an image, resampled to the node's pixel size on every resize.
    Image(Box<dyn ImageSource>),
    /// Renders into an offscreen colour attachment every frame.
    Plain,
}

impl NodeVariant {
    /// The image variant showing `config.image_path`, or the plain variant
    /// when no image is configured.
    pub fn from_config(config: &RendererConfig) -> Result<Self, RendererError> {
        match &config.image_path {
            Some(path) => {
                info!(path = %path.display(), "image variant selected");
                Ok(Self::Image(Box::new(SourceImage::open(path)?)))
            }
            None => Ok(Self::Plain),
        }
    }
}

impl std::fmt::Debug for NodeVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Image(_) => f.write_str("Image"),
            Self::Plain => f.write_str("Plain"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Uninitialized,
    Initialized,
}

/// Where the current texture generation stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureStage {
    /// No usable texture, either before the first sync or after a failed one.
    Stale,
    /// Created, but the first frame callback has not prepared it yet.
    PendingTransition,
    Ready,
}

#[derive(Debug)]
enum NodeTexture {
    Uploaded(UploadPath),
    RenderTarget(Texture),
}

impl NodeTexture {
    fn texture(&self) -> &Texture {
        match self {
            Self::Uploaded(path) => path.texture(),
            Self::RenderTarget(texture) => texture,
        }
    }
}

/// Objects created on first sync that survive every resize.
struct GpuState {
    pipeline: Pipeline,
    ring: FrameRing,
    uploader: TextureUploader,
}

pub struct TextureNode {
    device: Arc<dyn DeviceFunctions>,
    variant: NodeVariant,
    shaders: ShaderSet,
    format: vk::Format,
    uploader_config: UploaderConfig,
    gpu: Option<GpuState>,
    texture: Option<NodeTexture>,
    generation: u64,
    size: Option<vk::Extent2D>,
    stage: TextureStage,
    sequencer: LayoutTransitionSequencer,
    release: ReleaseQueue<NodeTexture>,
    // Last frames-in-flight count reported by the host.
    host_frames_in_flight: u32,
    transform: [f32; 16],
    t: f32,
}

impl TextureNode {
    pub fn new(
        device: Arc<dyn DeviceFunctions>,
        config: &RendererConfig,
        variant: NodeVariant,
        shaders: ShaderSet,
    ) -> Self {
        let format = config.texture_format();
        info!(
            ?variant,
            ?format,
            force_staging = config.force_staging,
            srgb = config.srgb,
            "texture node created"
        );
        Self {
            device,
            variant,
            shaders,
            format,
            uploader_config: config.uploader(),
            gpu: None,
            texture: None,
            generation: 0,
            size: None,
            stage: TextureStage::Stale,
            sequencer: LayoutTransitionSequencer::new(),
            release: ReleaseQueue::new(),
            host_frames_in_flight: 0,
            transform: IDENTITY,
            t: 0.0,
        }
    }

    pub fn state(&self) -> NodeState {
        if self.gpu.is_some() {
            NodeState::Initialized
        } else {
            NodeState::Uninitialized
        }
    }

    pub fn texture_stage(&self) -> TextureStage {
        self.stage
    }

    pub fn pending_transition(&self) -> PendingTransition {
        self.sequencer.pending()
    }

    /// The texture for the host to sample, once it is ready.
    pub fn texture(&self) -> Option<TextureHandle> {
        match self.stage {
            TextureStage::Ready => self.texture.as_ref().map(|t| t.texture().handle()),
            _ => None,
        }
    }

    /// Render pass a [`DrawTarget`](crate::host::DrawTarget) framebuffer must
    /// be compatible with.
    pub fn render_pass(&self) -> Option<vk::RenderPass> {
        self.gpu.as_ref().map(|gpu| gpu.pipeline.render_pass.handle)
    }

    pub fn pipeline(&self) -> Option<&Pipeline> {
        self.gpu.as_ref().map(|gpu| &gpu.pipeline)
    }

    pub fn frame_ring(&self) -> Option<&FrameRing> {
        self.gpu.as_ref().map(|gpu| &gpu.ring)
    }

    pub fn retired_textures(&self) -> usize {
        self.release.len()
    }

    /// Column-major matrix applied to the quad by the image variant.
    pub fn set_transform(&mut self, transform: [f32; 16]) {
        self.transform = transform;
    }

    /// Animation parameter of the plain variant.
    pub fn set_t(&mut self, t: f32) {
        self.t = t;
    }

    /// Brings GPU state in line with `info`.
    ///
    /// On failure the node is left without a texture and draws nothing until
    /// a later sync succeeds.
    pub fn sync(&mut self, info: &SyncInfo) -> Result<(), RendererError> {
        if info.is_empty() {
            trace!(size = ?info.size, "empty item size, nothing to sync");
            return Ok(());
        }
        match &self.gpu {
            None => self.gpu = Some(self.initialize(info.frames_in_flight)?),
            Some(gpu) => {
                let ring = gpu.ring.slot_count();
                // Logged once per change, the ring keeps its size.
                if info.frames_in_flight != self.host_frames_in_flight
                    && info.frames_in_flight != ring
                {
                    warn!(
                        host = info.frames_in_flight,
                        ring,
                        "frames in flight changed after initialization"
                    );
                }
            }
        }
        self.host_frames_in_flight = info.frames_in_flight;
        if self.size == Some(info.size) && self.texture.is_some() {
            return Ok(());
        }

        if let Some(old) = self.texture.take() {
            self.release.retire(old, self.generation, info.frames_in_flight);
        }
        self.sequencer.reset();
        self.stage = TextureStage::Stale;
        self.size = Some(info.size);

        let texture = self.build_texture(info.size)?;
        self.generation += 1;
        debug!(
            generation = self.generation,
            width = info.size.width,
            height = info.size.height,
            "texture rebuilt"
        );
        if let NodeTexture::Uploaded(path) = &texture {
            self.sequencer.arm(path);
        }
        self.texture = Some(texture);
        self.stage = TextureStage::PendingTransition;
        Ok(())
    }

    fn initialize(&self, frames_in_flight: u32) -> Result<GpuState, RendererError> {
        let render_pass = RenderPass::new(self.device.clone(), self.format)?;
        let render_pass_handle = render_pass.handle;

        let (vertex_layout, blend, bindings) = match self.variant {
            NodeVariant::Image(_) => (
                VertexLayout::PositionTexCoord,
                BlendMode::PremultipliedOver,
                vec![
                    DescriptorBinding {
                        binding: UNIFORM_BINDING,
                        descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                        stages: vk::ShaderStageFlags::VERTEX,
                    },
                    DescriptorBinding {
                        binding: TEXTURE_BINDING,
                        descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                        stages: vk::ShaderStageFlags::FRAGMENT,
                    },
                ],
            ),
            NodeVariant::Plain => (
                VertexLayout::PositionOnly2D,
                BlendMode::StraightAlpha,
                vec![DescriptorBinding {
                    binding: UNIFORM_BINDING,
                    descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                    stages: vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                }],
            ),
        };
        let desc = PipelineDesc {
            vertex_shader: &self.shaders.vertex,
            fragment_shader: &self.shaders.fragment,
            vertex_layout,
            blend,
            bindings,
        };
        let pipeline = PipelineBuilder::new(self.device.clone()).build(&desc, render_pass)?;

        let (vertex_data, initial_uniform) = self.static_contents();
        let ring = FrameRing::initialize(
            self.device.clone(),
            pipeline.descriptor_set_layout,
            &FrameRingDesc {
                slot_count: frames_in_flight,
                vertex_data: &vertex_data,
                initial_uniform: &initial_uniform,
                with_sampler: matches!(self.variant, NodeVariant::Image(_)),
            },
        )?;
        let uploader =
            TextureUploader::new(self.device.clone(), self.uploader_config, render_pass_handle);
        info!(frames_in_flight, "texture node initialized");
        Ok(GpuState {
            pipeline,
            ring,
            uploader,
        })
    }

    fn static_contents(&self) -> (Vec<u8>, Vec<u8>) {
        let vertices = match self.variant {
            NodeVariant::Image(_) => floats_to_bytes(&TEXTURED_QUAD),
            NodeVariant::Plain => floats_to_bytes(&PLAIN_QUAD),
        };
        (vertices, self.uniform_bytes())
    }

    fn uniform_bytes(&self) -> Vec<u8> {
        match self.variant {
            NodeVariant::Image(_) => floats_to_bytes(&self.transform),
            NodeVariant::Plain => floats_to_bytes(&[self.t]),
        }
    }

    fn build_texture(&mut self, size: vk::Extent2D) -> Result<NodeTexture, RendererError> {
        let Some(gpu) = self.gpu.as_ref() else {
            return Err(RendererError::InvalidInput("texture node is not initialized".into()));
        };
        match &mut self.variant {
            NodeVariant::Image(source) => {
                let image = source.image_for(size)?;
                let path = gpu.uploader.upload(&image, self.format)?;
                Ok(NodeTexture::Uploaded(path))
            }
            NodeVariant::Plain => Ok(NodeTexture::RenderTarget(create_render_target(
                self.device.clone(),
                size,
                self.format,
                gpu.pipeline.render_pass.handle,
            )?)),
        }
    }

    /// Records this frame's work into `frame.command_buffer`.
    ///
    /// Only `frame.current_slot` of the frame ring is written.
    pub fn render_frame(&mut self, frame: &FrameContext) -> Result<(), RendererError> {
        let uniform = self.uniform_bytes();
        let Some(gpu) = self.gpu.as_mut() else {
            trace!("frame before first sync, skipping");
            return Ok(());
        };
        gpu.ring.slot(frame.current_slot)?;
        let released = self.release.advance();
        if released > 0 {
            debug!(released, "retired textures destroyed");
        }

        let Some(texture) = self.texture.as_ref() else {
            trace!("no texture, skipping frame");
            return Ok(());
        };
        let device = &*self.device;
        let cb = frame.command_buffer;

        match texture {
            NodeTexture::Uploaded(path) => {
                if self.sequencer.flush(device, cb, path)? {
                    self.stage = TextureStage::Ready;
                }
                gpu.ring.update(frame.current_slot, &uniform)?;
                gpu.ring
                    .bind_texture(frame.current_slot, path.texture().view, self.generation)?;
                if let Some(target) = frame.target {
                    record_quad(
                        device,
                        cb,
                        gpu,
                        frame.current_slot,
                        target.framebuffer,
                        target.extent,
                    )?;
                }
            }
            NodeTexture::RenderTarget(texture) => {
                let framebuffer = texture.framebuffer.ok_or_else(|| {
                    RendererError::InvalidInput("render target has no framebuffer".into())
                })?;
                gpu.ring.update(frame.current_slot, &uniform)?;
                record_quad(device, cb, gpu, frame.current_slot, framebuffer, texture.extent)?;
                let barrier = vk::ImageMemoryBarrier::builder()
                    .image(texture.image)
                    .old_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                    .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                    .src_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
                    .dst_access_mask(vk::AccessFlags::SHADER_READ)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .subresource_range(COLOR_SUBRESOURCE_RANGE)
                    .build();
                device.cmd_pipeline_barrier(
                    cb,
                    vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                    vk::PipelineStageFlags::FRAGMENT_SHADER,
                    &[barrier],
                );
                self.stage = TextureStage::Ready;
            }
        }
        Ok(())
    }
}

fn record_quad(
    device: &dyn DeviceFunctions,
    cb: vk::CommandBuffer,
    gpu: &GpuState,
    slot: u32,
    framebuffer: vk::Framebuffer,
    extent: vk::Extent2D,
) -> Result<(), RendererError> {
    let descriptor_set = gpu.ring.slot(slot)?.descriptor_set;
    let clear_values = [vk::ClearValue {
        color: vk::ClearColorValue {
            float32: [0.0, 0.0, 0.0, 0.0],
        },
    }];
    let render_area = vk::Rect2D {
        offset: vk::Offset2D::default(),
        extent,
    };
    let begin_info = vk::RenderPassBeginInfo::builder()
        .render_pass(gpu.pipeline.render_pass.handle)
        .framebuffer(framebuffer)
        .render_area(render_area)
        .clear_values(&clear_values);
    device.cmd_begin_render_pass(cb, &begin_info);
    device.cmd_bind_pipeline(cb, gpu.pipeline.handle);
    device.cmd_bind_vertex_buffer(cb, gpu.ring.buffer(), 0);
    device.cmd_bind_descriptor_set(cb, gpu.pipeline.layout, descriptor_set);
    device.cmd_set_viewport(
        cb,
        vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        },
    );
    device.cmd_set_scissor(cb, render_area);
    device.cmd_draw(cb, QUAD_VERTEX_COUNT);
    device.cmd_end_render_pass(cb);
    Ok(())
}

fn floats_to_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_ne_bytes()).collect()
}

impl Drop for TextureNode {
    fn drop(&mut self) {
        if self.gpu.is_none() && self.texture.is_none() && self.release.is_empty() {
            return;
        }
        if let Err(result) = self.device.wait_idle() {
            warn!(?result, "vkDeviceWaitIdle failed during node teardown");
        }
        debug!("tearing down texture node");
        self.sequencer.reset();
        drop(self.texture.take());
        self.release.drain();
        if let Some(gpu) = self.gpu.take() {
            let GpuState { pipeline, ring, .. } = gpu;
            ring.release();
            pipeline.release();
        }
    }
}
