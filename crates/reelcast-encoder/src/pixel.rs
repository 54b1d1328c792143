//! Conversion from captured RGBA rasters to the encoder's native I420 layout

use image::RgbaImage;
use reelcast_core::{Error, PixelSize, Result};

/// Planar YUV 4:2:0 picture: a full-size Y plane followed by quarter-size U and V planes
#[derive(Clone)]
pub struct I420Buffer {
    size: PixelSize,
    data: Vec<u8>,
}

impl I420Buffer {
    /// Populate a pixel buffer from an RGBA raster using BT.601 coefficients.
    ///
    /// Chroma is taken from the top-left pixel of each 2x2 block, so both
    /// dimensions must be even.
    pub fn from_rgba(image: &RgbaImage) -> Result<Self> {
        let size = PixelSize::new(image.width(), image.height());
        if size.is_degenerate() || size.width % 2 != 0 || size.height % 2 != 0 {
            return Err(Error::DrawingContext(format!(
                "cannot create a {} 4:2:0 pixel buffer",
                size
            )));
        }

        let width = size.width as usize;
        let height = size.height as usize;
        let y_size = width * height;
        let uv_size = y_size / 4;
        let mut data = vec![0u8; y_size + 2 * uv_size];

        let rgba = image.as_raw();
        let (y_plane, uv_planes) = data.split_at_mut(y_size);
        let (u_plane, v_plane) = uv_planes.split_at_mut(uv_size);

        for y in 0..height {
            for x in 0..width {
                let idx = (y * width + x) * 4;
                let r = rgba[idx] as i32;
                let g = rgba[idx + 1] as i32;
                let b = rgba[idx + 2] as i32;

                let y_val = ((66 * r + 129 * g + 25 * b + 128) >> 8) + 16;
                y_plane[y * width + x] = y_val.clamp(0, 255) as u8;

                if y % 2 == 0 && x % 2 == 0 {
                    let uv_idx = (y / 2) * (width / 2) + (x / 2);
                    let u_val = ((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128;
                    let v_val = ((112 * r - 94 * g - 18 * b + 128) >> 8) + 128;
                    u_plane[uv_idx] = u_val.clamp(0, 255) as u8;
                    v_plane[uv_idx] = v_val.clamp(0, 255) as u8;
                }
            }
        }

        Ok(Self { size, data })
    }

    pub fn size(&self) -> PixelSize {
        self.size
    }

    pub fn y_plane(&self) -> &[u8] {
        &self.data[..self.luma_len()]
    }

    pub fn u_plane(&self) -> &[u8] {
        let start = self.luma_len();
        &self.data[start..start + self.luma_len() / 4]
    }

    pub fn v_plane(&self) -> &[u8] {
        let start = self.luma_len() + self.luma_len() / 4;
        &self.data[start..]
    }

    /// Give up the contiguous Y, U, V bytes
    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    fn luma_len(&self) -> usize {
        self.size.width as usize * self.size.height as usize
    }
}

impl std::fmt::Debug for I420Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("I420Buffer")
            .field("size", &self.size)
            .field("bytes", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn test_plane_layout() {
        let image = RgbaImage::from_pixel(16, 8, Rgba([0, 0, 0, 255]));
        let buffer = I420Buffer::from_rgba(&image).unwrap();
        assert_eq!(buffer.y_plane().len(), 128);
        assert_eq!(buffer.u_plane().len(), 32);
        assert_eq!(buffer.v_plane().len(), 32);
        assert_eq!(buffer.into_vec().len(), 16 * 8 * 3 / 2);
    }

    #[test]
    fn test_studio_range_extremes() {
        let black = I420Buffer::from_rgba(&RgbaImage::from_pixel(2, 2, Rgba([0, 0, 0, 255]))).unwrap();
        assert_eq!(black.y_plane(), &[16, 16, 16, 16]);
        assert_eq!(black.u_plane(), &[128]);
        assert_eq!(black.v_plane(), &[128]);

        let white =
            I420Buffer::from_rgba(&RgbaImage::from_pixel(2, 2, Rgba([255, 255, 255, 255]))).unwrap();
        assert_eq!(white.y_plane(), &[235, 235, 235, 235]);
    }

    #[test]
    fn test_red_has_high_v() {
        let red = I420Buffer::from_rgba(&RgbaImage::from_pixel(2, 2, Rgba([255, 0, 0, 255]))).unwrap();
        assert!(red.v_plane()[0] > 200);
        assert!(red.u_plane()[0] < 128);
    }

    #[test]
    fn test_odd_dimensions_rejected() {
        let image = RgbaImage::new(3, 2);
        assert!(matches!(
            I420Buffer::from_rgba(&image),
            Err(Error::DrawingContext(_))
        ));
    }
}
