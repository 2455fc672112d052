//! Memory-type selection.

use crate::error::RendererError;
use ash::vk;
use tracing::debug;

/// How a memory type is picked from the candidate mask of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryPolicy {
    /// Lowest-indexed candidate whose property flags contain all requested flags.
    FirstMatch(vk::MemoryPropertyFlags),
    /// Highest-indexed candidate regardless of its flags. Used for the
    /// render-target texture, which is only ever touched by the GPU.
    LastCandidate,
}

/// Picks a memory type index for a resource whose memory requirements report
/// `type_bits` as acceptable.
pub fn select_memory_type(
    type_bits: u32,
    policy: MemoryPolicy,
    properties: &vk::PhysicalDeviceMemoryProperties,
) -> Result<u32, RendererError> {
    let count = properties.memory_type_count.min(vk::MAX_MEMORY_TYPES as u32);
    let mut candidates = (0..count).filter(|index| type_bits & (1 << index) != 0);

    let found = match policy {
        MemoryPolicy::FirstMatch(required) => candidates.find(|&index| {
            properties.memory_types[index as usize]
                .property_flags
                .contains(required)
        }),
        MemoryPolicy::LastCandidate => candidates.last(),
    };

    match found {
        Some(index) => {
            debug!(index, ?policy, "selected memory type");
            Ok(index)
        }
        None => Err(RendererError::NoSuitableMemoryType {
            type_bits,
            required: match policy {
                MemoryPolicy::FirstMatch(required) => required,
                MemoryPolicy::LastCandidate => vk::MemoryPropertyFlags::empty(),
            },
        }),
    }
}
