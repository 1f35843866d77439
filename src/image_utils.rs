use image::{GrayImage, Rgb, RgbImage};
use imageproc::drawing::draw_cross_mut;

use crate::centroids::CentroidRecord;

/// Target width of the processing image in pixels
pub const PROC_TARGET_WIDTH: u32 = 640;

/// Working copy of an image at processing resolution.
///
/// `scale_proc_to_full` is the full/processing width ratio, so a full-resolution
/// coordinate divided by it gives the processing coordinate.
#[derive(Debug, Clone)]
pub struct ProcessingImage {
    pub image: RgbImage,
    pub scale_proc_to_full: f64,
    pub full_dimensions: (u32, u32),
}

impl ProcessingImage {
    /// Convert a full-resolution pixel position to processing coordinates
    pub fn full_to_processing(&self, x: f64, y: f64) -> (f64, f64) {
        (x / self.scale_proc_to_full, y / self.scale_proc_to_full)
    }
}

/// Downscale a full image so its width does not exceed `target_width`.
///
/// Images already narrow enough are copied unchanged with a scale of 1.0.
pub fn build_processing_image(full: &RgbImage, target_width: u32) -> ProcessingImage {
    let (width, height) = full.dimensions();
    let target_width = target_width.max(1);

    if width <= target_width {
        return ProcessingImage {
            image: full.clone(),
            scale_proc_to_full: 1.0,
            full_dimensions: (width, height),
        };
    }

    let scale = target_width as f64 / width as f64;
    let new_height = ((height as f64 * scale).round() as u32).max(1);
    let image = image::imageops::resize(
        full,
        target_width,
        new_height,
        image::imageops::FilterType::Triangle,
    );

    ProcessingImage {
        image,
        scale_proc_to_full: 1.0 / scale,
        full_dimensions: (width, height),
    }
}

/// Build an RGB image from a tightly packed B,G,R byte buffer.
///
/// Returns `None` when the buffer length does not match the dimensions.
pub fn rgb_from_bgr_bytes(width: u32, height: u32, bgr: &[u8]) -> Option<RgbImage> {
    let expected = width as usize * height as usize * 3;
    if bgr.len() != expected {
        return None;
    }
    let mut rgb = Vec::with_capacity(expected);
    for px in bgr.chunks_exact(3) {
        rgb.extend_from_slice(&[px[2], px[1], px[0]]);
    }
    RgbImage::from_raw(width, height, rgb)
}

/// Pack an RGB color into an integer key ordered like the (B, G, R) tuple
#[inline]
pub fn color_key(rgb: [u8; 3]) -> u32 {
    (rgb[2] as u32) << 16 | (rgb[1] as u32) << 8 | rgb[0] as u32
}

/// Inverse of [`color_key`]
#[inline]
pub fn color_from_key(key: u32) -> [u8; 3] {
    [(key & 0xFF) as u8, ((key >> 8) & 0xFF) as u8, ((key >> 16) & 0xFF) as u8]
}

/// Check if a point is inside the image bounds
#[inline]
pub fn in_bounds(x: i32, y: i32, width: u32, height: u32) -> bool {
    x >= 0 && y >= 0 && (x as u32) < width && (y as u32) < height
}

/// Create a debug overlay: boundary pixels painted in `boundary_color`,
/// a cross drawn at every centroid in `marker_color`
pub fn create_debug_image(
    image: &RgbImage,
    boundary: &GrayImage,
    centroids: &[CentroidRecord],
    boundary_color: [u8; 3],
    marker_color: [u8; 3],
) -> RgbImage {
    let mut debug_image = image.clone();
    let (width, height) = debug_image.dimensions();

    for (x, y, value) in boundary.enumerate_pixels() {
        if value[0] > 0 && x < width && y < height {
            debug_image.put_pixel(x, y, Rgb(boundary_color));
        }
    }

    for record in centroids {
        draw_cross_mut(
            &mut debug_image,
            Rgb(marker_color),
            record.x.round() as i32,
            record.y.round() as i32,
        );
    }

    debug_image
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn narrow_image_is_not_resized() {
        let full = RgbImage::new(320, 200);
        let proc = build_processing_image(&full, PROC_TARGET_WIDTH);
        assert_eq!(proc.image.dimensions(), (320, 200));
        assert_eq!(proc.scale_proc_to_full, 1.0);
    }

    #[test]
    fn wide_image_is_downscaled_to_target_width() {
        let full = RgbImage::new(1280, 963);
        let proc = build_processing_image(&full, 640);
        assert_eq!(proc.image.dimensions(), (640, 482));
        assert!((proc.scale_proc_to_full - 2.0).abs() < 1e-12);
        assert_eq!(proc.full_dimensions, (1280, 963));
        assert_eq!(proc.full_to_processing(20.0, 40.0), (10.0, 20.0));
    }

    #[test]
    fn color_key_orders_blue_first() {
        // Pure red sorts before pure blue in (B, G, R) order
        assert!(color_key([255, 0, 0]) < color_key([0, 0, 255]));
        assert!(color_key([0, 255, 0]) < color_key([0, 0, 1]));
        assert_eq!(color_from_key(color_key([12, 34, 56])), [12, 34, 56]);
    }

    #[test]
    fn bgr_buffer_is_swizzled() {
        let img = rgb_from_bgr_bytes(2, 1, &[1, 2, 3, 4, 5, 6]).unwrap();
        assert_eq!(img.get_pixel(0, 0).0, [3, 2, 1]);
        assert_eq!(img.get_pixel(1, 0).0, [6, 5, 4]);
        assert!(rgb_from_bgr_bytes(2, 2, &[0; 5]).is_none());
    }
}
