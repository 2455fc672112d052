//! Vulkan texture node for a host compositor.
//!
//! The host owns the instance, device, command buffers and frame pacing.
//! This crate owns one texture and everything needed to fill and draw it:
//! the upload path (direct linear mapping or staging copy), the exactly-once
//! layout transition, an immutable graphics pipeline and a ring of
//! per-frame-in-flight uniform slots. [`TextureNode`] ties them together and
//! is driven through [`TextureNode::sync`] and [`TextureNode::render_frame`].

mod asset;
mod config;
mod device;
mod error;
mod frame_ring;
mod host;
mod logging;
mod memory;
mod node;
mod pipeline;
mod release;
mod render_pass;
mod resource;
mod ring;
mod texture;
mod transition;
mod utils;

#[cfg(test)]
mod testing;

pub use asset::{ImageSource, PixelImage, SourceImage};
pub use config::{LoggingConfig, RendererConfig, FORCE_STAGE_ENV, SRGB_ENV, SRGB_FLAG};
pub use device::{AshDevice, DeviceFunctions, GpuObject};
pub use error::{exit_on_fatal, ConfigError, RendererError};
pub use frame_ring::{FrameRing, FrameRingDesc, FrameSlot, TEXTURE_BINDING, UNIFORM_BINDING};
pub use host::{DrawTarget, FrameContext, ShaderSet, SyncInfo};
pub use logging::{init_logging, init_minimal_logging};
pub use memory::{select_memory_type, MemoryPolicy};
pub use node::{NodeState, NodeVariant, TextureNode, TextureStage};
pub use pipeline::{
    BlendMode, DescriptorBinding, Pipeline, PipelineBuilder, PipelineDesc, VertexLayout,
};
pub use release::ReleaseQueue;
pub use render_pass::RenderPass;
pub use resource::OwnedObjects;
pub use ring::{align_up, RingLayout};
pub use texture::{
    create_render_target, StagingTexture, Texture, TextureHandle, TextureUploader, UploadPath,
    UploaderConfig,
};
pub use transition::{LayoutTransitionSequencer, PendingTransition};
pub use utils::load_shader_module;
