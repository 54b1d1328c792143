//! Centered cropping to the encoded frame size

use image::{imageops, RgbaImage};
use reelcast_core::{Error, PixelSize, Result};

/// Extract the centered `target`-sized rectangle of `source`.
///
/// The origin is `((source - target) / 2)` on each axis; nothing is scaled.
/// Failing to produce the output raster is a [`Error::DrawingContext`]
/// failure, which aborts the recording.
pub fn crop_centered(source: &RgbaImage, target: PixelSize) -> Result<RgbaImage> {
    if target.is_degenerate() {
        return Err(Error::DrawingContext(format!(
            "cannot create a {} raster",
            target
        )));
    }

    let (source_width, source_height) = source.dimensions();
    if target.width > source_width || target.height > source_height {
        return Err(Error::DrawingContext(format!(
            "crop {} exceeds source {}x{}",
            target, source_width, source_height
        )));
    }

    if target.width == source_width && target.height == source_height {
        return Ok(source.clone());
    }

    let origin_x = (source_width - target.width) / 2;
    let origin_y = (source_height - target.height) / 2;

    Ok(imageops::crop_imm(source, origin_x, origin_y, target.width, target.height).to_image())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn coordinates(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| Rgba([x as u8, y as u8, 0, 255]))
    }

    #[test]
    fn test_crop_is_centered() {
        let source = coordinates(200, 100);
        let cropped = crop_centered(&source, PixelSize::new(192, 96)).unwrap();
        assert_eq!(cropped.dimensions(), (192, 96));
        // (200 - 192) / 2 = 4, (100 - 96) / 2 = 2
        assert_eq!(cropped.get_pixel(0, 0), &Rgba([4, 2, 0, 255]));
        assert_eq!(cropped.get_pixel(191, 95), &Rgba([195, 97, 0, 255]));
    }

    #[test]
    fn test_odd_margin_rounds_down() {
        let source = coordinates(35, 17);
        let cropped = crop_centered(&source, PixelSize::new(32, 16)).unwrap();
        assert_eq!(cropped.get_pixel(0, 0), &Rgba([1, 0, 0, 255]));
    }

    #[test]
    fn test_same_size_is_copied() {
        let source = coordinates(32, 32);
        let cropped = crop_centered(&source, PixelSize::new(32, 32)).unwrap();
        assert_eq!(cropped.as_raw(), source.as_raw());
    }

    #[test]
    fn test_invalid_targets() {
        let source = coordinates(32, 32);
        assert!(matches!(
            crop_centered(&source, PixelSize::new(48, 16)),
            Err(Error::DrawingContext(_))
        ));
        assert!(matches!(
            crop_centered(&source, PixelSize::new(0, 16)),
            Err(Error::DrawingContext(_))
        ));
    }
}
