//! What the host render loop hands the node.

use ash::vk;

/// Per-sync information: the item's pixel size and how many frames the host
/// keeps in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncInfo {
    pub size: vk::Extent2D,
    pub frames_in_flight: u32,
}

impl SyncInfo {
    /// Converts a logical item size to pixels using the device pixel ratio.
    pub fn from_logical(width: f64, height: f64, device_pixel_ratio: f64, frames_in_flight: u32) -> Self {
        let to_pixels = |logical: f64| (logical * device_pixel_ratio).round().max(0.0) as u32;
        Self {
            size: vk::Extent2D {
                width: to_pixels(width),
                height: to_pixels(height),
            },
            frames_in_flight,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.size.width == 0 || self.size.height == 0
    }
}

/// A framebuffer, compatible with the node's render pass, that receives the
/// textured quad.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawTarget {
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
}

/// Everything the host supplies for one frame callback.
///
/// `current_slot` is the frame-in-flight slot whose previous GPU work the host
/// has already fenced; only that slot's resources may be written.
#[derive(Debug, Clone, Copy)]
pub struct FrameContext {
    pub command_buffer: vk::CommandBuffer,
    pub current_slot: u32,
    pub frames_in_flight: u32,
    pub target: Option<DrawTarget>,
}

/// Precompiled SPIR-V for the node's pipeline.
#[derive(Debug, Clone, Default)]
pub struct ShaderSet {
    pub vertex: Vec<u8>,
    pub fragment: Vec<u8>,
}
