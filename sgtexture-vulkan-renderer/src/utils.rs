use crate::device::DeviceFunctions;
use crate::error::RendererError;
use ash::{util::read_spv, vk};
use std::io::Cursor;

/// Loads a SPIR-V shader module from a byte slice.
///
/// The bytes are opaque to the renderer; `read_spv` only checks the length
/// and the magic number before the driver sees them.
pub fn load_shader_module(
    device: &dyn DeviceFunctions,
    spirv_bytes: &[u8],
) -> Result<vk::ShaderModule, RendererError> {
    let code = read_spv(&mut Cursor::new(spirv_bytes)).map_err(RendererError::InvalidShader)?;
    device
        .create_shader_module(&code)
        .map_err(RendererError::vk("vkCreateShaderModule"))
}
