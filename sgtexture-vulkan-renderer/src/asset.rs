//! Source images for the image-sampling variant.
//!
//! The uploader only ever sees a [`PixelImage`]: tightly packed RGBA8 with
//! premultiplied alpha, already at the exact texture size. Decoding and
//! resampling happen here, before the GPU is involved.

use crate::error::RendererError;
use ash::vk;
use png::ColorType;
use std::fs;
use std::io::Cursor;
use std::path::Path;
use tracing::{debug, warn};

/// Tightly packed premultiplied RGBA8 pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelImage {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl PixelImage {
    /// Wraps `pixels`, which must hold exactly `width * height * 4` bytes.
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self, RendererError> {
        if width == 0 || height == 0 {
            return Err(RendererError::InvalidInput(format!(
                "image size {width}x{height} is empty"
            )));
        }
        let expected = width as usize * height as usize * 4;
        if pixels.len() != expected {
            return Err(RendererError::InvalidInput(format!(
                "{width}x{height} image needs {expected} bytes, got {}",
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// An image filled with one premultiplied RGBA colour.
    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Result<Self, RendererError> {
        let pixels = rgba
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 4)
            .collect();
        Self::new(width, height, pixels)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.width,
            height: self.height,
        }
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Bytes of row `y`, or `None` past the last row.
    pub fn row(&self, y: u32) -> Option<&[u8]> {
        if y >= self.height {
            return None;
        }
        let stride = self.width as usize * 4;
        let start = y as usize * stride;
        self.pixels.get(start..start + stride)
    }
}

/// Supplies the pixels to upload for a given texture size.
pub trait ImageSource {
    fn image_for(&mut self, extent: vk::Extent2D) -> Result<PixelImage, RendererError>;
}

/// A decoded PNG kept at its native size.
#[derive(Debug, Clone)]
pub struct SourceImage {
    image: PixelImage,
}

impl SourceImage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RendererError> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|source| RendererError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), bytes = bytes.len(), "read source image");
        Self::from_png_bytes(&bytes)
    }

    /// Decodes a PNG of any colour type into premultiplied RGBA8.
    pub fn from_png_bytes(bytes: &[u8]) -> Result<Self, RendererError> {
        let mut decoder = png::Decoder::new(Cursor::new(bytes));
        decoder.set_transformations(png::Transformations::EXPAND | png::Transformations::STRIP_16);
        let mut reader = decoder.read_info()?;
        if let Some(animation) = &reader.info().animation_control {
            if animation.num_frames != 1 {
                warn!(frames = animation.num_frames, "animated PNG, using the first frame");
            }
        }
        let mut buf = vec![0; reader.output_buffer_size()];
        let frame = reader.next_frame(&mut buf)?;
        let (width, height) = (frame.width, frame.height);

        let mut rgba = Vec::with_capacity(width as usize * height as usize * 4);
        for line in buf.chunks_exact(frame.line_size).take(height as usize) {
            match frame.color_type {
                ColorType::Rgba => rgba.extend_from_slice(&line[..width as usize * 4]),
                ColorType::Rgb => {
                    for px in line.chunks_exact(3).take(width as usize) {
                        rgba.extend_from_slice(&[px[0], px[1], px[2], 255]);
                    }
                }
                ColorType::GrayscaleAlpha => {
                    for px in line.chunks_exact(2).take(width as usize) {
                        rgba.extend_from_slice(&[px[0], px[0], px[0], px[1]]);
                    }
                }
                ColorType::Grayscale => {
                    for &g in line.iter().take(width as usize) {
                        rgba.extend_from_slice(&[g, g, g, 255]);
                    }
                }
                ColorType::Indexed => {
                    return Err(RendererError::InvalidInput(
                        "indexed PNG was not expanded".into(),
                    ))
                }
            }
        }
        premultiply(&mut rgba);
        debug!(width, height, color = ?frame.color_type, "decoded PNG");
        Ok(Self {
            image: PixelImage::new(width, height, rgba)?,
        })
    }

    pub fn image(&self) -> &PixelImage {
        &self.image
    }

    /// Nearest-neighbour scale to exactly `extent`.
    pub fn resample(&self, extent: vk::Extent2D) -> Result<PixelImage, RendererError> {
        if extent == self.image.extent() {
            return Ok(self.image.clone());
        }
        if extent.width == 0 || extent.height == 0 {
            return Err(RendererError::InvalidInput(format!(
                "cannot resample to {}x{}",
                extent.width, extent.height
            )));
        }
        let (src_w, src_h) = (self.image.width as u64, self.image.height as u64);
        let mut pixels = Vec::with_capacity(extent.width as usize * extent.height as usize * 4);
        for y in 0..extent.height as u64 {
            let sy = (y * src_h / extent.height as u64) as u32;
            let row = self.image.row(sy).ok_or_else(|| {
                RendererError::InvalidInput(format!("source row {sy} out of range"))
            })?;
            for x in 0..extent.width as u64 {
                let sx = (x * src_w / extent.width as u64) as usize * 4;
                pixels.extend_from_slice(&row[sx..sx + 4]);
            }
        }
        PixelImage::new(extent.width, extent.height, pixels)
    }
}

impl ImageSource for SourceImage {
    fn image_for(&mut self, extent: vk::Extent2D) -> Result<PixelImage, RendererError> {
        self.resample(extent)
    }
}

fn premultiply(rgba: &mut [u8]) {
    for px in rgba.chunks_exact_mut(4) {
        let a = px[3] as u16;
        if a == 255 {
            continue;
        }
        for c in &mut px[..3] {
            *c = ((*c as u16 * a + 127) / 255) as u8;
        }
    }
}
