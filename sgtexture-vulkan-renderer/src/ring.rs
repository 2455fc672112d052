//! Layout of the per-frame ring buffer.
//!
//! One buffer holds the static vertex data at offset 0, followed by one
//! uniform slot per frame in flight. Every region starts on a multiple of the
//! device's minimum uniform-buffer offset alignment.

use crate::error::RendererError;
use ash::vk;

/// Rounds `value` up to the next multiple of `alignment`. An alignment of 0
/// is treated as 1.
pub fn align_up(value: vk::DeviceSize, alignment: vk::DeviceSize) -> Option<vk::DeviceSize> {
    let alignment = alignment.max(1);
    value.checked_add(alignment - 1).map(|v| v / alignment * alignment)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingLayout {
    /// Aligned size of the vertex region at the start of the buffer.
    pub vertex_region_size: vk::DeviceSize,
    /// Distance between two consecutive uniform slots.
    pub slot_stride: vk::DeviceSize,
    /// Bytes of uniform data actually used in a slot.
    pub slot_bytes: vk::DeviceSize,
    pub slot_count: u32,
    pub total_size: vk::DeviceSize,
}

impl RingLayout {
    pub fn new(
        vertex_bytes: vk::DeviceSize,
        per_slot_bytes: vk::DeviceSize,
        alignment: vk::DeviceSize,
        slot_count: u32,
    ) -> Result<Self, RendererError> {
        if slot_count == 0 {
            return Err(RendererError::InvalidInput(
                "ring needs at least one frame slot".into(),
            ));
        }
        let vertex_region_size =
            align_up(vertex_bytes, alignment).ok_or(RendererError::LayoutOverflow)?;
        let slot_stride = align_up(per_slot_bytes, alignment).ok_or(RendererError::LayoutOverflow)?;
        let total_size = slot_stride
            .checked_mul(slot_count as vk::DeviceSize)
            .and_then(|slots| slots.checked_add(vertex_region_size))
            .ok_or(RendererError::LayoutOverflow)?;
        Ok(Self {
            vertex_region_size,
            slot_stride,
            slot_bytes: per_slot_bytes,
            slot_count,
            total_size,
        })
    }

    /// Byte offset of uniform slot `slot`.
    pub fn offset_of(&self, slot: u32) -> Result<vk::DeviceSize, RendererError> {
        if slot >= self.slot_count {
            return Err(RendererError::InvalidFrameSlot {
                slot,
                slot_count: self.slot_count,
            });
        }
        Ok(self.vertex_region_size + slot as vk::DeviceSize * self.slot_stride)
    }
}
