//! Per-frame-in-flight uniform slots and their descriptor sets.
//!
//! A slot may only be written while the host reports it as the active slot
//! of the current frame callback; that report is what guarantees the GPU has
//! finished reading the slot's previous contents.

use crate::device::{DeviceFunctions, GpuObject};
use crate::error::RendererError;
use crate::memory::{select_memory_type, MemoryPolicy};
use crate::resource::OwnedObjects;
use crate::ring::RingLayout;
use ash::vk;
use std::sync::Arc;
use tracing::{debug, trace};

/// Binding of the uniform buffer in every slot's descriptor set.
pub const UNIFORM_BINDING: u32 = 0;
/// Binding of the combined image sampler, when the ring has a sampler.
pub const TEXTURE_BINDING: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSlot {
    pub offset: vk::DeviceSize,
    pub range: vk::DeviceSize,
    pub descriptor_set: vk::DescriptorSet,
    /// Texture generation the slot's sampler binding points at.
    texture_generation: Option<u64>,
}

impl FrameSlot {
    pub fn texture_generation(&self) -> Option<u64> {
        self.texture_generation
    }
}

/// What to put in the ring when it is created.
#[derive(Debug, Clone, Copy)]
pub struct FrameRingDesc<'a> {
    pub slot_count: u32,
    /// Static vertex data stored at offset 0.
    pub vertex_data: &'a [u8],
    /// Initial contents of every uniform slot; its length is the slot size.
    pub initial_uniform: &'a [u8],
    /// Whether slots also carry a combined image sampler at [`TEXTURE_BINDING`].
    pub with_sampler: bool,
}

pub struct FrameRing {
    device: Arc<dyn DeviceFunctions>,
    layout: RingLayout,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    sampler: Option<vk::Sampler>,
    slots: Vec<FrameSlot>,
    objects: OwnedObjects,
}

impl FrameRing {
    pub fn initialize(
        device: Arc<dyn DeviceFunctions>,
        set_layout: vk::DescriptorSetLayout,
        desc: &FrameRingDesc<'_>,
    ) -> Result<Self, RendererError> {
        let alignment = device.limits().min_uniform_buffer_offset_alignment;
        let layout = RingLayout::new(
            desc.vertex_data.len() as vk::DeviceSize,
            desc.initial_uniform.len() as vk::DeviceSize,
            alignment,
            desc.slot_count,
        )?;
        let mut objects = OwnedObjects::new(device.clone(), "frame ring");

        let buffer_info = vk::BufferCreateInfo::builder()
            .size(layout.total_size)
            .usage(vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::UNIFORM_BUFFER)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = device
            .create_buffer(&buffer_info)
            .map_err(RendererError::vk("vkCreateBuffer"))?;
        objects.push(GpuObject::Buffer(buffer));

        let requirements = device.buffer_memory_requirements(buffer);
        let memory_type_index = select_memory_type(
            requirements.memory_type_bits,
            MemoryPolicy::FirstMatch(
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            ),
            &device.memory_properties(),
        )?;
        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);
        let memory = device
            .allocate_memory(&alloc_info)
            .map_err(RendererError::vk("vkAllocateMemory"))?;
        objects.push(GpuObject::Memory(memory));
        device
            .bind_buffer_memory(buffer, memory, 0)
            .map_err(RendererError::vk("vkBindBufferMemory"))?;
        debug!(
            total = layout.total_size,
            vertex_region = layout.vertex_region_size,
            slot_stride = layout.slot_stride,
            slots = layout.slot_count,
            "allocated frame ring buffer"
        );

        // Fill the vertex region and seed every slot in one mapping.
        let dst = device
            .map_memory(memory, 0, layout.total_size)
            .map_err(RendererError::vk("vkMapMemory"))?;
        // SAFETY: the mapping spans `total_size` bytes, and the layout
        // places the vertex data and every slot inside it.
        unsafe {
            std::ptr::copy_nonoverlapping(desc.vertex_data.as_ptr(), dst, desc.vertex_data.len());
            for slot in 0..layout.slot_count {
                let offset = layout.offset_of(slot)? as usize;
                std::ptr::copy_nonoverlapping(
                    desc.initial_uniform.as_ptr(),
                    dst.add(offset),
                    desc.initial_uniform.len(),
                );
            }
        }
        device.unmap_memory(memory);

        let mut pool_sizes = vec![vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: layout.slot_count,
        }];
        if desc.with_sampler {
            pool_sizes.push(vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: layout.slot_count,
            });
        }
        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .max_sets(layout.slot_count)
            .pool_sizes(&pool_sizes);
        let pool = device
            .create_descriptor_pool(&pool_info)
            .map_err(RendererError::vk("vkCreateDescriptorPool"))?;
        objects.push(GpuObject::DescriptorPool(pool));

        let set_layouts = vec![set_layout; layout.slot_count as usize];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool)
            .set_layouts(&set_layouts);
        let sets = device
            .allocate_descriptor_sets(&alloc_info)
            .map_err(RendererError::vk("vkAllocateDescriptorSets"))?;

        // Each set points at its own slot forever; only the bytes behind it change.
        let mut slots = Vec::with_capacity(sets.len());
        for (index, descriptor_set) in sets.into_iter().enumerate() {
            let offset = layout.offset_of(index as u32)?;
            let buffer_info = [vk::DescriptorBufferInfo {
                buffer,
                offset,
                range: layout.slot_bytes,
            }];
            let write = vk::WriteDescriptorSet::builder()
                .dst_set(descriptor_set)
                .dst_binding(UNIFORM_BINDING)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .buffer_info(&buffer_info)
                .build();
            device.update_descriptor_sets(&[write]);
            slots.push(FrameSlot {
                offset,
                range: layout.slot_bytes,
                descriptor_set,
                texture_generation: None,
            });
        }

        let sampler = if desc.with_sampler {
            let sampler_info = vk::SamplerCreateInfo::builder()
                .mag_filter(vk::Filter::NEAREST)
                .min_filter(vk::Filter::NEAREST)
                .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
                .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
                .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
                .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE)
                .max_anisotropy(1.0);
            let sampler = device
                .create_sampler(&sampler_info)
                .map_err(RendererError::vk("vkCreateSampler"))?;
            objects.push(GpuObject::Sampler(sampler));
            Some(sampler)
        } else {
            None
        };

        Ok(Self {
            device,
            layout,
            buffer,
            memory,
            sampler,
            slots,
            objects,
        })
    }

    pub fn layout(&self) -> &RingLayout {
        &self.layout
    }

    pub fn buffer(&self) -> vk::Buffer {
        self.buffer
    }

    pub fn slot_count(&self) -> u32 {
        self.layout.slot_count
    }

    pub fn slot(&self, slot: u32) -> Result<&FrameSlot, RendererError> {
        self.slots
            .get(slot as usize)
            .ok_or(RendererError::InvalidFrameSlot {
                slot,
                slot_count: self.layout.slot_count,
            })
    }

    /// Rewrites the uniform contents of `slot`.
    ///
    /// Only the slot's own byte range is mapped, and nothing is mapped for an
    /// empty update. The caller must hold the host's guarantee that `slot` is
    /// no longer read by the GPU.
    pub fn update(&self, slot: u32, bytes: &[u8]) -> Result<(), RendererError> {
        let frame_slot = self.slot(slot)?;
        if bytes.len() as vk::DeviceSize > frame_slot.range {
            return Err(RendererError::InvalidInput(format!(
                "{} uniform bytes do not fit a {} byte slot",
                bytes.len(),
                frame_slot.range
            )));
        }
        if bytes.is_empty() {
            return Ok(());
        }
        let dst = self
            .device
            .map_memory(self.memory, frame_slot.offset, bytes.len() as vk::DeviceSize)
            .map_err(RendererError::vk("vkMapMemory"))?;
        // SAFETY: the mapping is exactly `bytes.len()` bytes long.
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), dst, bytes.len()) };
        self.device.unmap_memory(self.memory);
        trace!(slot, offset = frame_slot.offset, "uniform slot updated");
        Ok(())
    }

    /// Points the sampler binding of `slot` at `view`, unless it already
    /// points at texture `generation`. Returns whether a write happened.
    pub fn bind_texture(
        &mut self,
        slot: u32,
        view: vk::ImageView,
        generation: u64,
    ) -> Result<bool, RendererError> {
        let sampler = self.sampler.ok_or_else(|| {
            RendererError::InvalidInput("frame ring was created without a sampler".into())
        })?;
        let slot_count = self.layout.slot_count;
        let frame_slot = self
            .slots
            .get_mut(slot as usize)
            .ok_or(RendererError::InvalidFrameSlot { slot, slot_count })?;
        if frame_slot.texture_generation == Some(generation) {
            return Ok(false);
        }
        let image_info = [vk::DescriptorImageInfo {
            sampler,
            image_view: view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }];
        let write = vk::WriteDescriptorSet::builder()
            .dst_set(frame_slot.descriptor_set)
            .dst_binding(TEXTURE_BINDING)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .image_info(&image_info)
            .build();
        self.device.update_descriptor_sets(&[write]);
        frame_slot.texture_generation = Some(generation);
        debug!(slot, generation, "texture binding refreshed");
        Ok(true)
    }

    /// Destroys the buffer, its memory, the descriptor pool and the sampler.
    pub fn release(mut self) {
        self.objects.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockDevice;
    use ash::vk::Handle;

    const VERTICES: [u8; 32] = [7; 32];

    fn ring(mock: &Arc<MockDevice>, slots: u32, with_sampler: bool) -> FrameRing {
        FrameRing::initialize(
            mock.clone(),
            vk::DescriptorSetLayout::from_raw(0x5e7),
            &FrameRingDesc {
                slot_count: slots,
                vertex_data: &VERTICES,
                initial_uniform: &[1, 1, 1, 1],
                with_sampler,
            },
        )
        .unwrap()
    }

    #[test]
    fn slots_sit_at_fixed_aligned_offsets() {
        let mock = MockDevice::new();
        let ring = ring(&mock, 3, false);
        assert_eq!(ring.layout().total_size, 256 * 4);
        let writes = mock.descriptor_writes();
        assert_eq!(writes.len(), 3);
        for slot in 0..3 {
            let frame_slot = ring.slot(slot).unwrap();
            assert_eq!(frame_slot.offset, 256 * (slot as u64 + 1));
            assert_eq!(frame_slot.range, 4);
            let write = &writes[slot as usize];
            assert_eq!(write.set, frame_slot.descriptor_set);
            assert_eq!(write.binding, UNIFORM_BINDING);
            assert_eq!(write.buffer, Some((ring.buffer(), frame_slot.offset, 4)));
        }
    }

    #[test]
    fn initial_contents_are_seeded() {
        let mock = MockDevice::new();
        let ring = ring(&mock, 2, false);
        let bytes = mock.memory_bytes(mock.buffer_memory(ring.buffer()));
        assert_eq!(&bytes[..32], &VERTICES);
        assert_eq!(&bytes[256..260], &[1, 1, 1, 1]);
        assert_eq!(&bytes[512..516], &[1, 1, 1, 1]);
    }

    #[test]
    fn update_maps_only_the_slot() {
        let mock = MockDevice::new();
        let ring = ring(&mock, 3, false);
        ring.update(1, &[9, 8, 7, 6]).unwrap();
        let memory = mock.buffer_memory(ring.buffer());
        assert_eq!(mock.maps().last(), Some(&(memory, 512, 4)));
        let bytes = mock.memory_bytes(memory);
        assert_eq!(&bytes[512..516], &[9, 8, 7, 6]);
        assert_eq!(&bytes[256..260], &[1, 1, 1, 1]);
        assert_eq!(&bytes[768..772], &[1, 1, 1, 1]);
        // No descriptor set was touched.
        assert_eq!(mock.descriptor_writes().len(), 3);
    }

    #[test]
    fn update_rejects_bad_slot_and_oversized_data() {
        let mock = MockDevice::new();
        let ring = ring(&mock, 2, false);
        assert!(matches!(
            ring.update(2, &[0; 4]),
            Err(RendererError::InvalidFrameSlot { slot: 2, slot_count: 2 })
        ));
        assert!(matches!(ring.update(0, &[0; 5]), Err(RendererError::InvalidInput(_))));
    }

    #[test]
    fn empty_update_maps_nothing() {
        let mock = MockDevice::new();
        let ring = ring(&mock, 2, false);
        let maps_before = mock.maps().len();
        ring.update(1, &[]).unwrap();
        assert_eq!(mock.maps().len(), maps_before);
        // The slot index is still checked.
        assert!(ring.update(2, &[]).is_err());
    }

    #[test]
    fn texture_binding_written_once_per_generation() {
        let mock = MockDevice::new();
        let mut ring = ring(&mock, 2, true);
        let view = vk::ImageView::from_raw(0x77);
        assert!(ring.bind_texture(0, view, 1).unwrap());
        assert!(!ring.bind_texture(0, view, 1).unwrap());
        assert_eq!(ring.slot(0).unwrap().texture_generation(), Some(1));
        assert_eq!(ring.slot(1).unwrap().texture_generation(), None);

        let other = vk::ImageView::from_raw(0x78);
        assert!(ring.bind_texture(0, other, 2).unwrap());
        let writes = mock.descriptor_writes();
        let last = writes.last().unwrap();
        assert_eq!(last.binding, TEXTURE_BINDING);
        assert_eq!(last.image_view, Some(other));
        assert_eq!(writes.len(), 2 + 2);
    }

    #[test]
    fn bind_texture_requires_sampler() {
        let mock = MockDevice::new();
        let mut ring = ring(&mock, 1, false);
        assert!(ring
            .bind_texture(0, vk::ImageView::from_raw(1), 1)
            .is_err());
    }

    #[test]
    fn release_frees_everything() {
        let mock = MockDevice::new();
        let ring = ring(&mock, 2, true);
        assert_eq!(mock.live().len(), 4);
        ring.release();
        assert!(mock.live().is_empty());
        assert!(matches!(mock.destroyed()[0], GpuObject::Sampler(_)));
    }
}
