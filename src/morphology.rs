use image::{GrayImage, Luma};
use imageproc::contours::{find_contours, BorderType};
use imageproc::distance_transform::Norm;
use imageproc::morphology::erode;

use crate::image_utils::in_bounds;

/// Foreground value of a binary mask
pub const FOREGROUND: u8 = 255;

/// 3x3 structuring elements used by the binary morphology below
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructuringElement {
    /// Full 3x3 square (8-neighbourhood)
    Square3,
    /// 3x3 cross, the discrete 3x3 ellipse (4-neighbourhood)
    Cross3,
}

impl StructuringElement {
    /// Distance whose unit ball is this element
    fn norm(&self) -> Norm {
        match self {
            StructuringElement::Square3 => Norm::LInf,
            StructuringElement::Cross3 => Norm::L1,
        }
    }
}

/// Distances saturate at 255, so larger radii cannot be told apart
const MAX_EROSION_RADIUS: u32 = 254;

/// Check whether a mask pixel is foreground
#[inline]
pub fn is_foreground(pixel: &Luma<u8>) -> bool {
    pixel[0] > 0
}

/// Binary erosion repeated `iterations` times.
///
/// `iterations` erosions with a 3x3 element equal one erosion by the
/// distance ball of that radius. Pixels outside the image are never
/// background, so objects touching the image border are not eaten away from
/// that side.
pub fn erode_mask(mask: &GrayImage, element: StructuringElement, iterations: u32) -> GrayImage {
    if iterations == 0 {
        return mask.clone();
    }
    let radius = iterations.min(MAX_EROSION_RADIUS) as u8;
    erode(mask, element.norm(), radius)
}

/// Count foreground pixels of a mask
pub fn count_foreground(mask: &GrayImage) -> u64 {
    mask.pixels().filter(|p| is_foreground(p)).count() as u64
}

/// Draw the outer contours of `mask` into `target`, shifted by `offset`.
///
/// Hole borders are skipped; only the external outline of each blob is drawn.
pub fn draw_outer_contours(mask: &GrayImage, offset: (u32, u32), target: &mut GrayImage) {
    let (width, height) = target.dimensions();

    for contour in find_contours::<i32>(mask) {
        if contour.border_type != BorderType::Outer {
            continue;
        }
        for point in &contour.points {
            let x = point.x + offset.0 as i32;
            let y = point.y + offset.1 as i32;
            if in_bounds(x, y, width, height) {
                target.put_pixel(x as u32, y as u32, Luma([FOREGROUND]));
            }
        }
    }
}
