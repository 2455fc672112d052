//! A recording [`DeviceFunctions`] implementation for unit tests.
//!
//! Handles are plain counters, device memory is a byte vector per
//! allocation, and every recorded command is kept for inspection. Image
//! layouts are tracked so that a barrier whose `old_layout` does not match
//! the image's current layout panics the test.

use crate::device::{DeviceFunctions, GpuObject};
use ash::prelude::VkResult;
use ash::vk::{self, Handle};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone)]
pub(crate) struct MockConfig {
    pub linear_features: vk::FormatFeatureFlags,
    pub optimal_features: vk::FormatFeatureFlags,
    /// Extra bytes appended to every row of a linear image.
    pub linear_row_padding: u64,
    pub min_uniform_alignment: u64,
    pub memory_types: Vec<vk::MemoryPropertyFlags>,
    /// Name of a `DeviceFunctions` method that fails with
    /// `ERROR_OUT_OF_DEVICE_MEMORY`.
    pub fail_op: Option<&'static str>,
}

impl Default for MockConfig {
    fn default() -> Self {
        let all = vk::FormatFeatureFlags::SAMPLED_IMAGE
            | vk::FormatFeatureFlags::COLOR_ATTACHMENT
            | vk::FormatFeatureFlags::TRANSFER_SRC
            | vk::FormatFeatureFlags::TRANSFER_DST;
        Self {
            linear_features: all,
            optimal_features: all,
            linear_row_padding: 0,
            min_uniform_alignment: 256,
            memory_types: vec![
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            ],
            fail_op: None,
        }
    }
}

/// A command recorded into any command buffer.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Command {
    Barrier {
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        image: vk::Image,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
        src_access: vk::AccessFlags,
        dst_access: vk::AccessFlags,
    },
    CopyImage {
        src: vk::Image,
        dst: vk::Image,
        width: u32,
        height: u32,
    },
    BeginRenderPass {
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        width: u32,
        height: u32,
    },
    EndRenderPass,
    BindPipeline(vk::Pipeline),
    BindVertexBuffer {
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
    },
    BindDescriptorSet(vk::DescriptorSet),
    SetViewport {
        width: f32,
        height: f32,
    },
    SetScissor {
        width: u32,
        height: u32,
    },
    Draw(u32),
}

#[derive(Debug, Clone)]
pub(crate) struct MockImage {
    pub extent: vk::Extent3D,
    pub tiling: vk::ImageTiling,
    pub usage: vk::ImageUsageFlags,
    pub format: vk::Format,
    pub layout: vk::ImageLayout,
    pub row_pitch: u64,
    pub binding: Option<(vk::DeviceMemory, u64)>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct DescriptorWrite {
    pub set: vk::DescriptorSet,
    pub binding: u32,
    pub buffer: Option<(vk::Buffer, vk::DeviceSize, vk::DeviceSize)>,
    pub image_view: Option<vk::ImageView>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PipelineRecord {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub render_pass: vk::RenderPass,
    pub vertex_stride: u32,
    pub attribute_formats: Vec<vk::Format>,
    pub topology: vk::PrimitiveTopology,
    pub src_color_blend: vk::BlendFactor,
    pub dst_color_blend: vk::BlendFactor,
    pub dynamic_states: Vec<vk::DynamicState>,
}

#[derive(Default)]
struct MockState {
    next_handle: u64,
    live: HashSet<GpuObject>,
    destroyed: Vec<GpuObject>,
    memory: HashMap<vk::DeviceMemory, (u32, Box<[u8]>)>,
    images: HashMap<vk::Image, MockImage>,
    buffers: HashMap<vk::Buffer, (u64, Option<(vk::DeviceMemory, u64)>)>,
    views: HashMap<vk::ImageView, vk::Image>,
    framebuffers: HashMap<vk::Framebuffer, vk::ImageView>,
    render_passes: HashMap<vk::RenderPass, vk::ImageLayout>,
    active_pass: Option<(vk::Image, vk::ImageLayout)>,
    maps: Vec<(vk::DeviceMemory, u64, u64)>,
    commands: Vec<Command>,
    descriptor_writes: Vec<DescriptorWrite>,
    pipelines: Vec<PipelineRecord>,
    wait_idle_calls: usize,
    fail_op: Option<&'static str>,
}

impl MockState {
    fn handle(&mut self) -> u64 {
        self.next_handle += 1;
        0x1000 + self.next_handle
    }
}

pub(crate) struct MockDevice {
    config: MockConfig,
    state: Mutex<MockState>,
}

impl MockDevice {
    pub fn new() -> Arc<Self> {
        Self::with_config(MockConfig::default())
    }

    pub fn with_config(config: MockConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            state: Mutex::new(MockState::default()),
        })
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    /// Makes `op` fail from now on, on top of `MockConfig::fail_op`.
    /// `None` clears it.
    pub fn set_fail_op(&self, op: Option<&'static str>) {
        self.state().fail_op = op;
    }

    fn check(&self, op: &'static str) -> VkResult<()> {
        if self.config.fail_op == Some(op) || self.state().fail_op == Some(op) {
            Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY)
        } else {
            Ok(())
        }
    }

    fn create<T: Handle + Copy>(&self, op: &'static str, wrap: fn(T) -> GpuObject) -> VkResult<T> {
        self.check(op)?;
        let mut state = self.state();
        let handle = T::from_raw(state.handle());
        state.live.insert(wrap(handle));
        Ok(handle)
    }

    fn type_bits(&self) -> u32 {
        (1u32 << self.config.memory_types.len()) - 1
    }

    pub fn destroyed(&self) -> Vec<GpuObject> {
        self.state().destroyed.clone()
    }

    pub fn live(&self) -> Vec<GpuObject> {
        self.state().live.iter().copied().collect()
    }

    pub fn live_images(&self) -> usize {
        self.state()
            .live
            .iter()
            .filter(|object| matches!(object, GpuObject::Image(_)))
            .count()
    }

    pub fn is_live(&self, object: GpuObject) -> bool {
        self.state().live.contains(&object)
    }

    pub fn commands(&self) -> Vec<Command> {
        self.state().commands.clone()
    }

    pub fn clear_commands(&self) {
        self.state().commands.clear();
    }

    pub fn image(&self, image: vk::Image) -> MockImage {
        self.state().images[&image].clone()
    }

    pub fn image_layout(&self, image: vk::Image) -> vk::ImageLayout {
        self.image(image).layout
    }

    /// Reads an image back as tightly packed RGBA8 rows.
    pub fn read_image(&self, image: vk::Image) -> Vec<u8> {
        let state = self.state();
        let info = &state.images[&image];
        let (memory, offset) = info.binding.expect("image has no memory bound");
        let bytes = &state.memory[&memory].1;
        let row = info.extent.width as usize * 4;
        let mut out = Vec::with_capacity(row * info.extent.height as usize);
        for y in 0..info.extent.height as usize {
            let start = offset as usize + y * info.row_pitch as usize;
            out.extend_from_slice(&bytes[start..start + row]);
        }
        out
    }

    pub fn memory_bytes(&self, memory: vk::DeviceMemory) -> Vec<u8> {
        self.state().memory[&memory].1.to_vec()
    }

    pub fn memory_type_of(&self, memory: vk::DeviceMemory) -> u32 {
        self.state().memory[&memory].0
    }

    pub fn buffer_memory(&self, buffer: vk::Buffer) -> vk::DeviceMemory {
        self.state().buffers[&buffer].1.expect("buffer has no memory bound").0
    }

    pub fn maps(&self) -> Vec<(vk::DeviceMemory, u64, u64)> {
        self.state().maps.clone()
    }

    pub fn descriptor_writes(&self) -> Vec<DescriptorWrite> {
        self.state().descriptor_writes.clone()
    }

    pub fn pipelines(&self) -> Vec<PipelineRecord> {
        self.state().pipelines.clone()
    }

    pub fn wait_idle_calls(&self) -> usize {
        self.state().wait_idle_calls
    }
}

impl DeviceFunctions for MockDevice {
    fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: self.config.memory_types.len() as u32,
            ..Default::default()
        };
        for (slot, flags) in props.memory_types.iter_mut().zip(&self.config.memory_types) {
            slot.property_flags = *flags;
        }
        props
    }

    fn limits(&self) -> vk::PhysicalDeviceLimits {
        vk::PhysicalDeviceLimits {
            min_uniform_buffer_offset_alignment: self.config.min_uniform_alignment,
            ..Default::default()
        }
    }

    fn format_properties(&self, _format: vk::Format) -> vk::FormatProperties {
        vk::FormatProperties {
            linear_tiling_features: self.config.linear_features,
            optimal_tiling_features: self.config.optimal_features,
            ..Default::default()
        }
    }

    fn create_buffer(&self, info: &vk::BufferCreateInfo) -> VkResult<vk::Buffer> {
        let buffer = self.create("create_buffer", GpuObject::Buffer)?;
        self.state().buffers.insert(buffer, (info.size, None));
        Ok(buffer)
    }

    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements {
        vk::MemoryRequirements {
            size: self.state().buffers[&buffer].0,
            alignment: 256,
            memory_type_bits: self.type_bits(),
        }
    }

    fn bind_buffer_memory(
        &self,
        buffer: vk::Buffer,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> VkResult<()> {
        self.check("bind_buffer_memory")?;
        let mut state = self.state();
        let entry = state.buffers.get_mut(&buffer).expect("unknown buffer");
        assert!(entry.1.is_none(), "buffer bound twice");
        entry.1 = Some((memory, offset));
        Ok(())
    }

    fn create_image(&self, info: &vk::ImageCreateInfo) -> VkResult<vk::Image> {
        assert_eq!(info.mip_levels, 1);
        let image = self.create("create_image", GpuObject::Image)?;
        let tight = info.extent.width as u64 * 4;
        let row_pitch = if info.tiling == vk::ImageTiling::LINEAR {
            tight + self.config.linear_row_padding
        } else {
            tight
        };
        self.state().images.insert(
            image,
            MockImage {
                extent: info.extent,
                tiling: info.tiling,
                usage: info.usage,
                format: info.format,
                layout: info.initial_layout,
                row_pitch,
                binding: None,
            },
        );
        Ok(image)
    }

    fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements {
        let info = self.image(image);
        vk::MemoryRequirements {
            size: info.row_pitch * info.extent.height as u64,
            alignment: 64,
            memory_type_bits: self.type_bits(),
        }
    }

    fn bind_image_memory(
        &self,
        image: vk::Image,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> VkResult<()> {
        self.check("bind_image_memory")?;
        let mut state = self.state();
        let entry = state.images.get_mut(&image).expect("unknown image");
        assert!(entry.binding.is_none(), "image bound twice");
        entry.binding = Some((memory, offset));
        Ok(())
    }

    fn image_subresource_layout(
        &self,
        image: vk::Image,
        subresource: vk::ImageSubresource,
    ) -> vk::SubresourceLayout {
        assert_eq!(subresource.aspect_mask, vk::ImageAspectFlags::COLOR);
        let info = self.image(image);
        assert_eq!(info.tiling, vk::ImageTiling::LINEAR, "layout of optimal image queried");
        vk::SubresourceLayout {
            offset: 0,
            size: info.row_pitch * info.extent.height as u64,
            row_pitch: info.row_pitch,
            array_pitch: 0,
            depth_pitch: 0,
        }
    }

    fn allocate_memory(&self, info: &vk::MemoryAllocateInfo) -> VkResult<vk::DeviceMemory> {
        assert!((info.memory_type_index as usize) < self.config.memory_types.len());
        let memory = self.create("allocate_memory", GpuObject::Memory)?;
        let bytes = vec![0u8; info.allocation_size as usize].into_boxed_slice();
        self.state()
            .memory
            .insert(memory, (info.memory_type_index, bytes));
        Ok(memory)
    }

    fn map_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) -> VkResult<*mut u8> {
        self.check("map_memory")?;
        let mut state = self.state();
        let (type_index, bytes) = state.memory.get_mut(&memory).expect("unknown memory");
        assert!(
            self.config.memory_types[*type_index as usize]
                .contains(vk::MemoryPropertyFlags::HOST_VISIBLE),
            "mapping memory that is not host visible"
        );
        let len = bytes.len() as u64;
        let size = if size == vk::WHOLE_SIZE { len - offset } else { size };
        assert!(offset + size <= len, "map range outside allocation");
        let ptr = unsafe { bytes.as_mut_ptr().add(offset as usize) };
        state.maps.push((memory, offset, size));
        Ok(ptr)
    }

    fn unmap_memory(&self, _memory: vk::DeviceMemory) {}

    fn create_image_view(&self, info: &vk::ImageViewCreateInfo) -> VkResult<vk::ImageView> {
        let view = self.create("create_image_view", GpuObject::ImageView)?;
        self.state().views.insert(view, info.image);
        Ok(view)
    }

    fn create_framebuffer(&self, info: &vk::FramebufferCreateInfo) -> VkResult<vk::Framebuffer> {
        assert_eq!(info.attachment_count, 1);
        let framebuffer = self.create("create_framebuffer", GpuObject::Framebuffer)?;
        let view = unsafe { *info.p_attachments };
        self.state().framebuffers.insert(framebuffer, view);
        Ok(framebuffer)
    }

    fn create_render_pass(&self, info: &vk::RenderPassCreateInfo) -> VkResult<vk::RenderPass> {
        let render_pass = self.create("create_render_pass", GpuObject::RenderPass)?;
        let final_layout = unsafe { (*info.p_attachments).final_layout };
        self.state().render_passes.insert(render_pass, final_layout);
        Ok(render_pass)
    }

    fn create_sampler(&self, _info: &vk::SamplerCreateInfo) -> VkResult<vk::Sampler> {
        self.create("create_sampler", GpuObject::Sampler)
    }

    fn create_shader_module(&self, code: &[u32]) -> VkResult<vk::ShaderModule> {
        assert_eq!(code.first(), Some(&0x0723_0203));
        self.create("create_shader_module", GpuObject::ShaderModule)
    }

    fn create_pipeline_cache(&self) -> VkResult<vk::PipelineCache> {
        self.create("create_pipeline_cache", GpuObject::PipelineCache)
    }

    fn create_pipeline_layout(
        &self,
        _info: &vk::PipelineLayoutCreateInfo,
    ) -> VkResult<vk::PipelineLayout> {
        self.create("create_pipeline_layout", GpuObject::PipelineLayout)
    }

    fn create_graphics_pipeline(
        &self,
        _cache: vk::PipelineCache,
        info: &vk::GraphicsPipelineCreateInfo,
    ) -> VkResult<vk::Pipeline> {
        let pipeline = self.create("create_graphics_pipeline", GpuObject::Pipeline)?;
        let record = unsafe {
            let vertex_input = &*info.p_vertex_input_state;
            let bindings = std::slice::from_raw_parts(
                vertex_input.p_vertex_binding_descriptions,
                vertex_input.vertex_binding_description_count as usize,
            );
            let attributes = std::slice::from_raw_parts(
                vertex_input.p_vertex_attribute_descriptions,
                vertex_input.vertex_attribute_description_count as usize,
            );
            let blend = &*(*info.p_color_blend_state).p_attachments;
            let dynamic = &*info.p_dynamic_state;
            PipelineRecord {
                pipeline,
                layout: info.layout,
                render_pass: info.render_pass,
                vertex_stride: bindings[0].stride,
                attribute_formats: attributes.iter().map(|a| a.format).collect(),
                topology: (*info.p_input_assembly_state).topology,
                src_color_blend: blend.src_color_blend_factor,
                dst_color_blend: blend.dst_color_blend_factor,
                dynamic_states: std::slice::from_raw_parts(
                    dynamic.p_dynamic_states,
                    dynamic.dynamic_state_count as usize,
                )
                .to_vec(),
            }
        };
        self.state().pipelines.push(record);
        Ok(pipeline)
    }

    fn create_descriptor_set_layout(
        &self,
        _info: &vk::DescriptorSetLayoutCreateInfo,
    ) -> VkResult<vk::DescriptorSetLayout> {
        self.create("create_descriptor_set_layout", GpuObject::DescriptorSetLayout)
    }

    fn create_descriptor_pool(
        &self,
        _info: &vk::DescriptorPoolCreateInfo,
    ) -> VkResult<vk::DescriptorPool> {
        self.create("create_descriptor_pool", GpuObject::DescriptorPool)
    }

    fn allocate_descriptor_sets(
        &self,
        info: &vk::DescriptorSetAllocateInfo,
    ) -> VkResult<Vec<vk::DescriptorSet>> {
        self.check("allocate_descriptor_sets")?;
        let mut state = self.state();
        Ok((0..info.descriptor_set_count)
            .map(|_| vk::DescriptorSet::from_raw(state.handle()))
            .collect())
    }

    fn update_descriptor_sets(&self, writes: &[vk::WriteDescriptorSet]) {
        let mut state = self.state();
        for write in writes {
            let buffer = if write.p_buffer_info.is_null() {
                None
            } else {
                let info = unsafe { &*write.p_buffer_info };
                Some((info.buffer, info.offset, info.range))
            };
            let image_view = if write.p_image_info.is_null() {
                None
            } else {
                Some(unsafe { (*write.p_image_info).image_view })
            };
            state.descriptor_writes.push(DescriptorWrite {
                set: write.dst_set,
                binding: write.dst_binding,
                buffer,
                image_view,
            });
        }
    }

    fn destroy(&self, object: GpuObject) {
        let mut state = self.state();
        assert!(state.live.remove(&object), "destroying {object:?} twice or never created");
        state.destroyed.push(object);
    }

    fn wait_idle(&self) -> VkResult<()> {
        self.state().wait_idle_calls += 1;
        Ok(())
    }

    fn cmd_pipeline_barrier(
        &self,
        _command_buffer: vk::CommandBuffer,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        barriers: &[vk::ImageMemoryBarrier],
    ) {
        let mut state = self.state();
        for barrier in barriers {
            let image = state.images.get_mut(&barrier.image).expect("barrier on unknown image");
            if barrier.old_layout != vk::ImageLayout::UNDEFINED {
                assert_eq!(barrier.old_layout, image.layout, "barrier old layout mismatch");
            }
            image.layout = barrier.new_layout;
            state.commands.push(Command::Barrier {
                src_stage,
                dst_stage,
                image: barrier.image,
                old_layout: barrier.old_layout,
                new_layout: barrier.new_layout,
                src_access: barrier.src_access_mask,
                dst_access: barrier.dst_access_mask,
            });
        }
    }

    fn cmd_copy_image(
        &self,
        _command_buffer: vk::CommandBuffer,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::ImageCopy],
    ) {
        let mut state = self.state();
        let src_info = state.images[&src].clone();
        let dst_info = state.images[&dst].clone();
        assert_eq!(src_info.layout, src_layout);
        assert_eq!(dst_info.layout, dst_layout);
        assert_eq!(src_layout, vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
        assert_eq!(dst_layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        let (src_mem, src_off) = src_info.binding.expect("copy from unbound image");
        let (dst_mem, dst_off) = dst_info.binding.expect("copy into unbound image");
        for region in regions {
            let row = region.extent.width as usize * 4;
            for y in 0..region.extent.height as usize {
                let from = src_off as usize + y * src_info.row_pitch as usize;
                let row_bytes = state.memory[&src_mem].1[from..from + row].to_vec();
                let to = dst_off as usize + y * dst_info.row_pitch as usize;
                state.memory.get_mut(&dst_mem).expect("unknown memory").1[to..to + row]
                    .copy_from_slice(&row_bytes);
            }
            state.commands.push(Command::CopyImage {
                src,
                dst,
                width: region.extent.width,
                height: region.extent.height,
            });
        }
    }

    fn cmd_begin_render_pass(
        &self,
        _command_buffer: vk::CommandBuffer,
        info: &vk::RenderPassBeginInfo,
    ) {
        let mut state = self.state();
        assert!(state.active_pass.is_none(), "render pass already active");
        let attachment = state
            .framebuffers
            .get(&info.framebuffer)
            .and_then(|view| state.views.get(view))
            .copied();
        if let (Some(image), Some(final_layout)) =
            (attachment, state.render_passes.get(&info.render_pass).copied())
        {
            state.active_pass = Some((image, final_layout));
        }
        state.commands.push(Command::BeginRenderPass {
            render_pass: info.render_pass,
            framebuffer: info.framebuffer,
            width: info.render_area.extent.width,
            height: info.render_area.extent.height,
        });
    }

    fn cmd_end_render_pass(&self, _command_buffer: vk::CommandBuffer) {
        let mut state = self.state();
        if let Some((image, final_layout)) = state.active_pass.take() {
            if let Some(info) = state.images.get_mut(&image) {
                info.layout = final_layout;
            }
        }
        state.commands.push(Command::EndRenderPass);
    }

    fn cmd_bind_pipeline(&self, _command_buffer: vk::CommandBuffer, pipeline: vk::Pipeline) {
        self.state().commands.push(Command::BindPipeline(pipeline));
    }

    fn cmd_bind_vertex_buffer(
        &self,
        _command_buffer: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
    ) {
        self.state()
            .commands
            .push(Command::BindVertexBuffer { buffer, offset });
    }

    fn cmd_bind_descriptor_set(
        &self,
        _command_buffer: vk::CommandBuffer,
        _layout: vk::PipelineLayout,
        set: vk::DescriptorSet,
    ) {
        self.state().commands.push(Command::BindDescriptorSet(set));
    }

    fn cmd_set_viewport(&self, _command_buffer: vk::CommandBuffer, viewport: vk::Viewport) {
        self.state().commands.push(Command::SetViewport {
            width: viewport.width,
            height: viewport.height,
        });
    }

    fn cmd_set_scissor(&self, _command_buffer: vk::CommandBuffer, scissor: vk::Rect2D) {
        self.state().commands.push(Command::SetScissor {
            width: scissor.extent.width,
            height: scissor.extent.height,
        });
    }

    fn cmd_draw(&self, _command_buffer: vk::CommandBuffer, vertex_count: u32) {
        self.state().commands.push(Command::Draw(vertex_count));
    }
}

/// A minimal valid SPIR-V header, enough for `read_spv` and the mock.
pub(crate) fn spirv_stub() -> Vec<u8> {
    [0x0723_0203u32, 0x0001_0000, 0, 1, 0]
        .iter()
        .flat_map(|word| word.to_le_bytes())
        .collect()
}
