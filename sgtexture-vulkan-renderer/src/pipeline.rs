use crate::device::{DeviceFunctions, GpuObject};
use crate::error::RendererError;
use crate::render_pass::RenderPass;
use crate::resource::OwnedObjects;
use crate::utils;
use ash::vk;
use std::ffi::CStr;
use std::mem::size_of;
use std::sync::Arc;
use tracing::{debug, info};

// SAFETY: the literal is NUL-terminated and has no interior NUL.
const ENTRY_POINT: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"main\0") };

/// Per-vertex data fed to the vertex shader from binding 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexLayout {
    /// `vec2` position.
    PositionOnly2D,
    /// `vec3` position followed by `vec2` texture coordinate.
    PositionTexCoord,
}

impl VertexLayout {
    pub fn stride(self) -> u32 {
        match self {
            Self::PositionOnly2D => 2 * size_of::<f32>() as u32,
            Self::PositionTexCoord => 5 * size_of::<f32>() as u32,
        }
    }

    fn attributes(self) -> Vec<vk::VertexInputAttributeDescription> {
        let attribute = |location, format, offset| vk::VertexInputAttributeDescription {
            location,
            binding: 0,
            format,
            offset,
        };
        match self {
            Self::PositionOnly2D => vec![attribute(0, vk::Format::R32G32_SFLOAT, 0)],
            Self::PositionTexCoord => vec![
                attribute(0, vk::Format::R32G32B32_SFLOAT, 0),
                attribute(1, vk::Format::R32G32_SFLOAT, 3 * size_of::<f32>() as u32),
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendMode {
    /// `src * 1 + dst * (1 - src.a)`, for premultiplied sources.
    PremultipliedOver,
    /// `src * src.a + dst`.
    StraightAlpha,
}

impl BlendMode {
    fn factors(self) -> (vk::BlendFactor, vk::BlendFactor) {
        match self {
            Self::PremultipliedOver => (vk::BlendFactor::ONE, vk::BlendFactor::ONE_MINUS_SRC_ALPHA),
            Self::StraightAlpha => (vk::BlendFactor::SRC_ALPHA, vk::BlendFactor::ONE),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorBinding {
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub stages: vk::ShaderStageFlags,
}

/// Everything that varies between the pipelines this crate builds.
#[derive(Debug, Clone)]
pub struct PipelineDesc<'a> {
    pub vertex_shader: &'a [u8],
    pub fragment_shader: &'a [u8],
    pub vertex_layout: VertexLayout,
    pub blend: BlendMode,
    pub bindings: Vec<DescriptorBinding>,
}

/// Immutable pipeline bundle. Lives as long as the node; resizes never
/// touch it because viewport and scissor are dynamic.
pub struct Pipeline {
    pub handle: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub descriptor_set_layout: vk::DescriptorSetLayout,
    pub cache: vk::PipelineCache,
    // Declared before `render_pass` so the pipeline objects go first.
    objects: OwnedObjects,
    pub render_pass: RenderPass,
}

impl Pipeline {
    /// Destroys the pipeline objects and then the render pass.
    pub fn release(mut self) {
        self.objects.release();
    }
}

pub struct PipelineBuilder {
    device: Arc<dyn DeviceFunctions>,
}

impl PipelineBuilder {
    pub fn new(device: Arc<dyn DeviceFunctions>) -> Self {
        Self { device }
    }

    pub fn build(&self, desc: &PipelineDesc<'_>, render_pass: RenderPass) -> Result<Pipeline, RendererError> {
        let device = &self.device;
        let mut objects = OwnedObjects::new(device.clone(), "pipeline");

        // 1. Pipeline cache
        let cache = device
            .create_pipeline_cache()
            .map_err(RendererError::vk("vkCreatePipelineCache"))?;
        objects.push(GpuObject::PipelineCache(cache));

        // 2. Descriptor set layout and pipeline layout
        let layout_bindings: Vec<_> = desc
            .bindings
            .iter()
            .map(|b| {
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(b.binding)
                    .descriptor_type(b.descriptor_type)
                    .descriptor_count(1)
                    .stage_flags(b.stages)
                    .build()
            })
            .collect();
        let set_layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&layout_bindings);
        let descriptor_set_layout = device
            .create_descriptor_set_layout(&set_layout_info)
            .map_err(RendererError::vk("vkCreateDescriptorSetLayout"))?;
        objects.push(GpuObject::DescriptorSetLayout(descriptor_set_layout));

        let set_layouts = [descriptor_set_layout];
        let pipeline_layout_info = vk::PipelineLayoutCreateInfo::builder().set_layouts(&set_layouts);
        let layout = device
            .create_pipeline_layout(&pipeline_layout_info)
            .map_err(RendererError::vk("vkCreatePipelineLayout"))?;
        objects.push(GpuObject::PipelineLayout(layout));

        // 3. Shader modules, only needed until the pipeline exists
        let mut shaders = OwnedObjects::new(device.clone(), "shader modules");
        let vert_shader_module = utils::load_shader_module(&**device, desc.vertex_shader)?;
        shaders.push(GpuObject::ShaderModule(vert_shader_module));
        let frag_shader_module = utils::load_shader_module(&**device, desc.fragment_shader)?;
        shaders.push(GpuObject::ShaderModule(frag_shader_module));

        let shader_stages = [
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vert_shader_module)
                .name(ENTRY_POINT)
                .build(),
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(frag_shader_module)
                .name(ENTRY_POINT)
                .build(),
        ];

        // 4. Vertex input: one interleaved binding
        let vertex_bindings = [vk::VertexInputBindingDescription {
            binding: 0,
            stride: desc.vertex_layout.stride(),
            input_rate: vk::VertexInputRate::VERTEX,
        }];
        let vertex_attributes = desc.vertex_layout.attributes();
        let vertex_input_state_info = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&vertex_bindings)
            .vertex_attribute_descriptions(&vertex_attributes);

        // 5. Input assembly: the quad is a 4-vertex strip
        let input_assembly_state_info = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_STRIP)
            .primitive_restart_enable(false);

        // 6. Viewport and scissor are set per frame
        let viewport_state_info = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);
        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state_info =
            vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        // 7. Rasterization and multisampling
        let rasterization_state_info = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::CLOCKWISE)
            .depth_bias_enable(false)
            .line_width(1.0);
        let multisample_state_info = vk::PipelineMultisampleStateCreateInfo::builder()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1)
            .sample_shading_enable(false);

        // 8. Blending
        let (src_factor, dst_factor) = desc.blend.factors();
        let color_blend_attachment_state = vk::PipelineColorBlendAttachmentState::builder()
            .blend_enable(true)
            .src_color_blend_factor(src_factor)
            .dst_color_blend_factor(dst_factor)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(src_factor)
            .dst_alpha_blend_factor(dst_factor)
            .alpha_blend_op(vk::BlendOp::ADD)
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .build();
        let color_blend_attachments = [color_blend_attachment_state];
        let color_blend_state_info = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        // 9. No depth or stencil
        let depth_stencil_state_info = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(false)
            .depth_write_enable(false)
            .depth_compare_op(vk::CompareOp::LESS_OR_EQUAL)
            .stencil_test_enable(false);

        // 10. Create Graphics Pipeline
        let graphics_pipeline_create_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_state_info)
            .input_assembly_state(&input_assembly_state_info)
            .viewport_state(&viewport_state_info)
            .rasterization_state(&rasterization_state_info)
            .multisample_state(&multisample_state_info)
            .color_blend_state(&color_blend_state_info)
            .depth_stencil_state(&depth_stencil_state_info)
            .dynamic_state(&dynamic_state_info)
            .layout(layout)
            .render_pass(render_pass.handle)
            .subpass(0);
        let handle = device
            .create_graphics_pipeline(cache, &graphics_pipeline_create_info)
            .map_err(RendererError::vk("vkCreateGraphicsPipelines"))?;
        objects.push(GpuObject::Pipeline(handle));
        drop(shaders);

        info!(
            vertex_layout = ?desc.vertex_layout,
            blend = ?desc.blend,
            "graphics pipeline created"
        );
        debug!(stride = desc.vertex_layout.stride(), bindings = desc.bindings.len(), "pipeline state");

        Ok(Pipeline {
            handle,
            layout,
            descriptor_set_layout,
            cache,
            objects,
            render_pass,
        })
    }
}
