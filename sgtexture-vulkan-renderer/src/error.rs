//! Error handling for the texture renderer.
//!
//! Every fallible operation in this crate returns [`RendererError`]. The
//! variants follow the failure taxonomy of the renderer: almost everything
//! that can go wrong while talking to the device is fatal, while a device that
//! cannot sample the requested format at all is reported so the caller can
//! skip frames instead of crashing.

use ash::vk;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type of the renderer.
#[derive(Debug, Error)]
pub enum RendererError {
    /// No memory type satisfied both the candidate mask and the required properties.
    #[error("no suitable memory type (candidates {type_bits:#b}, required {required:?})")]
    NoSuitableMemoryType {
        type_bits: u32,
        required: vk::MemoryPropertyFlags,
    },

    /// Neither linear nor optimal tiling supports sampling the format.
    #[error("neither linear nor optimal tiling can sample {0:?}")]
    UnsupportedFormat(vk::Format),

    /// A Vulkan call returned an error code.
    #[error("{op} failed: {result}")]
    Vulkan {
        op: &'static str,
        result: vk::Result,
    },

    /// Shader bytes were not a SPIR-V binary.
    #[error("invalid SPIR-V binary: {0}")]
    InvalidShader(#[source] io::Error),

    /// Caller supplied data that does not match what the operation expects.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Ring layout arithmetic overflowed `vk::DeviceSize`.
    #[error("ring buffer layout overflows the device size range")]
    LayoutOverflow,

    /// The host reported a frame slot outside `[0, slot_count)`.
    #[error("frame slot {slot} out of range (ring has {slot_count} slots)")]
    InvalidFrameSlot { slot: u32, slot_count: u32 },

    /// The source image could not be decoded.
    #[error("failed to decode image: {0}")]
    ImageDecode(#[from] png::DecodingError),

    /// The source image file could not be read.
    #[error("failed to read {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Configuration could not be loaded or validated.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {path:?}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl RendererError {
    /// Wraps a failed Vulkan call.
    pub(crate) fn vk(op: &'static str) -> impl FnOnce(vk::Result) -> Self {
        move |result| Self::Vulkan { op, result }
    }

    /// Whether the error must terminate the process.
    ///
    /// An unsupported format is a legitimate device capability outcome and an
    /// out-of-range slot only invalidates the current frame; everything else
    /// indicates an unusable device or asset.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::UnsupportedFormat(_) | Self::InvalidFrameSlot { .. }
        )
    }
}

/// Surfaces a renderer result the way the host expects.
///
/// Fatal errors are logged and terminate the process with status 1.
/// Recoverable errors are logged as warnings and yield `None`.
pub fn exit_on_fatal<T>(result: Result<T, RendererError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) if err.is_fatal() => {
            tracing::error!(error = %err, "fatal renderer error");
            std::process::exit(1);
        }
        Err(err) => {
            tracing::warn!(error = %err, "renderer error, skipping");
            None
        }
    }
}
