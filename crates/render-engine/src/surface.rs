//! Writable pixel surfaces that render engines draw into.

use serde::{Deserialize, Serialize};

/// Pixel layouts understood by the render and export pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 32-bit interleaved blue, green, red, alpha; 8 bits per channel.
    Bgra8,
}

impl PixelFormat {
    /// Bytes per pixel.
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Bgra8 => 4,
        }
    }

    /// Name ffmpeg uses for this layout.
    pub fn ffmpeg_name(self) -> &'static str {
        match self {
            Self::Bgra8 => "bgra",
        }
    }
}

/// A mutable, tightly described view over BGRA8 pixel memory.
///
/// The view may cover a pooled frame buffer directly or a staging copy;
/// engines cannot tell the difference.
#[derive(Debug)]
pub struct RenderSurface<'a> {
    width: u32,
    height: u32,
    stride: usize,
    data: &'a mut [u8],
}

impl<'a> RenderSurface<'a> {
    /// Wrap `data` as a `width` x `height` surface with `stride` bytes per row.
    ///
    /// Returns `None` if the memory is too small for the described layout.
    pub fn new(width: u32, height: u32, stride: usize, data: &'a mut [u8]) -> Option<Self> {
        let row_bytes = width as usize * PixelFormat::Bgra8.bytes_per_pixel();
        if stride < row_bytes {
            return None;
        }
        let needed = stride.checked_mul(height as usize)?;
        if data.len() < needed {
            return None;
        }
        Some(Self {
            width,
            height,
            stride,
            data,
        })
    }

    /// Wrap tightly packed memory (`stride == width * 4`).
    pub fn packed(width: u32, height: u32, data: &'a mut [u8]) -> Option<Self> {
        Self::new(width, height, width as usize * 4, data)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Bytes per row.
    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn format(&self) -> PixelFormat {
        PixelFormat::Bgra8
    }

    /// Visible bytes of row `y`.
    pub fn row_mut(&mut self, y: u32) -> &mut [u8] {
        let start = y as usize * self.stride;
        let end = start + self.width as usize * 4;
        &mut self.data[start..end]
    }

    /// Write one pixel from RGBA components.
    pub fn put_pixel(&mut self, x: u32, y: u32, rgba: [u8; 4]) {
        let offset = y as usize * self.stride + x as usize * 4;
        self.data[offset..offset + 4].copy_from_slice(&[rgba[2], rgba[1], rgba[0], rgba[3]]);
    }

    /// Read one pixel back as RGBA components.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let offset = y as usize * self.stride + x as usize * 4;
        let px = &self.data[offset..offset + 4];
        [px[2], px[1], px[0], px[3]]
    }

    /// Fill every pixel with one RGBA colour.
    pub fn clear(&mut self, rgba: [u8; 4]) {
        let bgra = [rgba[2], rgba[1], rgba[0], rgba[3]];
        for y in 0..self.height {
            for px in self.row_mut(y).chunks_exact_mut(4) {
                px.copy_from_slice(&bgra);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_short_memory() {
        let mut data = vec![0u8; 15];
        assert!(RenderSurface::packed(2, 2, &mut data).is_none());
        let mut data = vec![0u8; 16];
        assert!(RenderSurface::packed(2, 2, &mut data).is_some());
    }

    #[test]
    fn test_rejects_narrow_stride() {
        let mut data = vec![0u8; 64];
        assert!(RenderSurface::new(4, 2, 12, &mut data).is_none());
    }

    #[test]
    fn test_put_pixel_stores_bgra() {
        let mut data = vec![0u8; 16];
        let mut surface = RenderSurface::packed(2, 2, &mut data).unwrap();
        surface.put_pixel(1, 1, [10, 20, 30, 255]);
        assert_eq!(surface.pixel(1, 1), [10, 20, 30, 255]);
        assert_eq!(&data[12..16], &[30, 20, 10, 255]);
    }

    #[test]
    fn test_clear_respects_stride_padding() {
        let mut data = vec![7u8; 2 * 12];
        let mut surface = RenderSurface::new(2, 2, 12, &mut data).unwrap();
        surface.clear([1, 2, 3, 4]);
        assert_eq!(&data[0..8], &[3, 2, 1, 4, 3, 2, 1, 4]);
        // Row padding is untouched.
        assert_eq!(&data[8..12], &[7, 7, 7, 7]);
    }
}
