use std::collections::BTreeSet;

use image::{GrayImage, ImageBuffer, Luma, RgbImage};
use imageproc::region_labelling::{connected_components, Connectivity as LabelConnectivity};
use serde::{Deserialize, Serialize};

use crate::image_utils::{color_from_key, color_key};
use crate::morphology::{erode_mask, StructuringElement, FOREGROUND};

/// Pixel adjacency used when labeling connected components
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Connectivity {
    Four,
    Eight,
}

impl TryFrom<u8> for Connectivity {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            4 => Ok(Connectivity::Four),
            8 => Ok(Connectivity::Eight),
            other => Err(format!("connectivity must be 4 or 8, got {}", other)),
        }
    }
}

impl From<Connectivity> for u8 {
    fn from(value: Connectivity) -> Self {
        match value {
            Connectivity::Four => 4,
            Connectivity::Eight => 8,
        }
    }
}

impl From<Connectivity> for LabelConnectivity {
    fn from(value: Connectivity) -> Self {
        match value {
            Connectivity::Four => LabelConnectivity::Four,
            Connectivity::Eight => LabelConnectivity::Eight,
        }
    }
}

/// A distinct posterized colour and its 1-based rank
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorGroup {
    pub group_no: u32,
    pub color: [u8; 3],
}

/// One connected component of a colour mask.
///
/// The mask is local: it covers the component's bounding box plus a one
/// pixel background margin (where the image allows one), and `offset` is
/// the position of its top-left corner in processing coordinates.
#[derive(Debug, Clone)]
pub struct Region {
    pub area: u32,
    pub centroid: (f64, f64),
    pub offset: (u32, u32),
    pub mask: GrayImage,
}

impl Region {
    /// Build a region from pixel positions given in processing coordinates.
    ///
    /// `bounds` are the processing image dimensions. Returns `None` for an
    /// empty pixel list.
    pub fn from_pixels(pixels: &[(u32, u32)], bounds: (u32, u32)) -> Option<Region> {
        if pixels.is_empty() {
            return None;
        }

        let mut min_x = u32::MAX;
        let mut min_y = u32::MAX;
        let mut max_x = 0;
        let mut max_y = 0;
        let mut sum_x = 0.0f64;
        let mut sum_y = 0.0f64;

        for &(x, y) in pixels {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
            sum_x += x as f64;
            sum_y += y as f64;
        }

        let x0 = min_x.saturating_sub(1);
        let y0 = min_y.saturating_sub(1);
        let x1 = (max_x + 1).min(bounds.0.saturating_sub(1));
        let y1 = (max_y + 1).min(bounds.1.saturating_sub(1));

        let mut mask = GrayImage::new(x1 - x0 + 1, y1 - y0 + 1);
        for &(x, y) in pixels {
            mask.put_pixel(x - x0, y - y0, Luma([FOREGROUND]));
        }

        let n = pixels.len() as f64;
        Some(Region {
            area: pixels.len() as u32,
            centroid: (sum_x / n, sum_y / n),
            offset: (x0, y0),
            mask,
        })
    }

    /// Map a local mask pixel to processing coordinates
    pub fn local_to_global(&self, x: u32, y: u32) -> (u32, u32) {
        (x + self.offset.0, y + self.offset.1)
    }
}

/// Collect the unique colours of a posterized image in ascending (B, G, R)
/// order and number them from 1
pub fn extract_color_groups(poster: &RgbImage) -> Vec<ColorGroup> {
    let keys: BTreeSet<u32> = poster.pixels().map(|p| color_key(p.0)).collect();
    keys.into_iter()
        .enumerate()
        .map(|(i, key)| ColorGroup {
            group_no: i as u32 + 1,
            color: color_from_key(key),
        })
        .collect()
}

/// Binary mask (0/255) of pixels exactly equal to `color`
pub fn color_mask(poster: &RgbImage, color: [u8; 3]) -> GrayImage {
    let (width, height) = poster.dimensions();
    GrayImage::from_fn(width, height, |x, y| {
        if poster.get_pixel(x, y).0 == color {
            Luma([FOREGROUND])
        } else {
            Luma([0])
        }
    })
}

/// Convert a trim margin given in full-image pixels to processing pixels
pub fn trim_to_processing(trim_px: u32, scale_proc_to_full: f64) -> u32 {
    let scale = if scale_proc_to_full.is_finite() {
        scale_proc_to_full.max(1.0)
    } else {
        1.0
    };
    (trim_px as f64 / scale).round_ties_even() as u32
}

/// Split a label image into regions, ordered by ascending label.
///
/// `origin` is the position of the label image inside the processing image.
fn regions_from_labels(
    labels: &ImageBuffer<Luma<u32>, Vec<u32>>,
    origin: (u32, u32),
    bounds: (u32, u32),
) -> Vec<Region> {
    let mut pixels_by_label: Vec<Vec<(u32, u32)>> = Vec::new();

    for (x, y, label) in labels.enumerate_pixels() {
        let label = label[0] as usize;
        if label == 0 {
            continue; // background
        }
        if pixels_by_label.len() < label {
            pixels_by_label.resize_with(label, Vec::new);
        }
        pixels_by_label[label - 1].push((x + origin.0, y + origin.1));
    }

    pixels_by_label
        .iter()
        .filter_map(|pixels| Region::from_pixels(pixels, bounds))
        .collect()
}

/// Label the connected components of a binary mask.
///
/// `origin` places the mask inside a processing image of size `bounds`.
pub fn label_regions(
    mask: &GrayImage,
    origin: (u32, u32),
    bounds: (u32, u32),
    connectivity: Connectivity,
) -> Vec<Region> {
    let labels = connected_components(mask, connectivity.into(), Luma([0u8]));
    regions_from_labels(&labels, origin, bounds)
}

/// Extract the connected regions of one colour group.
///
/// `trim_proc` is the boundary offset in processing pixels; the colour mask
/// is eroded that many times with a 3x3 square before labeling.
pub fn extract_regions(
    poster: &RgbImage,
    color: [u8; 3],
    trim_proc: u32,
    connectivity: Connectivity,
) -> Vec<Region> {
    let mut mask = color_mask(poster, color);
    if trim_proc > 0 {
        mask = erode_mask(&mask, StructuringElement::Square3, trim_proc);
    }
    label_regions(&mask, (0, 0), poster.dimensions(), connectivity)
}
