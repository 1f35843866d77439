use image::{GrayImage, RgbImage};
use serde::{Deserialize, Serialize};

use crate::morphology::draw_outer_contours;
use crate::neck::{split_by_neck, MAX_NECK_SEPARATION};
use crate::regions::{extract_color_groups, extract_regions, trim_to_processing, Connectivity, Region};

/// Parameters of one segmentation run
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SegmentationParams {
    #[serde(default = "default_levels")]
    pub levels: u32,
    #[serde(default = "default_min_area")]
    pub min_area: u32,
    #[serde(default)]
    pub max_area: Option<u32>,
    /// Boundary offset in full-image pixels
    #[serde(default)]
    pub trim_px: u32,
    #[serde(default)]
    pub neck_separation: u32,
    #[serde(default = "default_connectivity")]
    pub connectivity: Connectivity,
}

fn default_levels() -> u32 {
    4
}

fn default_min_area() -> u32 {
    50
}

fn default_connectivity() -> Connectivity {
    Connectivity::Four
}

impl Default for SegmentationParams {
    fn default() -> Self {
        Self {
            levels: default_levels(),
            min_area: default_min_area(),
            max_area: None,
            trim_px: 0,
            neck_separation: 0,
            connectivity: default_connectivity(),
        }
    }
}

impl SegmentationParams {
    /// Connectivity actually used for labeling.
    ///
    /// Neck splitting needs 4-connectivity so diagonal contacts are not merged
    /// before the split.
    pub fn effective_connectivity(&self) -> Connectivity {
        if self.neck_separation > 0 {
            Connectivity::Four
        } else {
            self.connectivity
        }
    }
}

/// One detected region: colour group and centroid in processing pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CentroidRecord {
    pub group_no: u32,
    pub x: f64,
    pub y: f64,
}

/// Output of [`segment`]
#[derive(Debug, Clone)]
pub struct Segmentation {
    /// Kept regions in colour-group then label order
    pub centroids: Vec<CentroidRecord>,
    /// Area of every region before min/max filtering
    pub raw_areas: Vec<u32>,
    /// Outer outlines of kept regions (0/255) at processing resolution
    pub boundary: GrayImage,
    pub group_count: usize,
}

/// Inclusive area window; `max_area = None` means unbounded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AreaFilter {
    pub min_area: u32,
    pub max_area: Option<u32>,
}

impl AreaFilter {
    pub fn accepts(&self, area: u32) -> bool {
        area >= self.min_area && self.max_area.map_or(true, |max| area <= max)
    }
}

/// Accumulates raw areas and kept regions while colour groups are processed
#[derive(Debug)]
pub struct CentroidCollector {
    filter: AreaFilter,
    centroids: Vec<CentroidRecord>,
    raw_areas: Vec<u32>,
    kept: Vec<Region>,
}

impl CentroidCollector {
    pub fn new(filter: AreaFilter) -> Self {
        Self {
            filter,
            centroids: Vec::new(),
            raw_areas: Vec::new(),
            kept: Vec::new(),
        }
    }

    /// Record a region's area, then keep it if it passes the area filter
    pub fn push(&mut self, group_no: u32, region: Region) {
        self.raw_areas.push(region.area);
        if !self.filter.accepts(region.area) {
            return;
        }
        self.centroids.push(CentroidRecord {
            group_no,
            x: region.centroid.0,
            y: region.centroid.1,
        });
        self.kept.push(region);
    }

    pub fn finish(self, width: u32, height: u32, group_count: usize) -> Segmentation {
        let boundary = boundary_mask(width, height, &self.kept);
        Segmentation {
            centroids: self.centroids,
            raw_areas: self.raw_areas,
            boundary,
            group_count,
        }
    }
}

/// Draw the outer contour of every region into a blank mask
pub fn boundary_mask(width: u32, height: u32, regions: &[Region]) -> GrayImage {
    let mut mask = GrayImage::new(width, height);
    for region in regions {
        draw_outer_contours(&region.mask, region.offset, &mut mask);
    }
    mask
}

/// Turn a posterized image into an ordered centroid list.
///
/// Colour groups are visited in ascending (B, G, R) order, regions within a
/// group in label order, split regions in core order.
pub fn segment(poster: &RgbImage, scale_proc_to_full: f64, params: &SegmentationParams) -> Segmentation {
    let (width, height) = poster.dimensions();
    let filter = AreaFilter {
        min_area: params.min_area,
        max_area: params.max_area,
    };

    if let Some(max_area) = params.max_area {
        if params.min_area > max_area {
            log::warn!(
                "min_area {} exceeds max_area {}; no region can pass the filter",
                params.min_area, max_area
            );
        }
    }

    let trim_proc = trim_to_processing(params.trim_px, scale_proc_to_full);
    let neck_separation = params.neck_separation.min(MAX_NECK_SEPARATION);
    let connectivity = params.effective_connectivity();
    let groups = extract_color_groups(poster);

    let mut collector = CentroidCollector::new(filter);
    for group in &groups {
        for region in extract_regions(poster, group.color, trim_proc, connectivity) {
            if neck_separation > 0 {
                for piece in split_by_neck(region, neck_separation, (width, height)) {
                    collector.push(group.group_no, piece);
                }
            } else {
                collector.push(group.group_no, region);
            }
        }
    }

    let segmentation = collector.finish(width, height, groups.len());
    log::debug!(
        "segment: {} groups, {} raw regions, {} kept (trim {} px proc, neck {})",
        groups.len(),
        segmentation.raw_areas.len(),
        segmentation.centroids.len(),
        trim_proc,
        neck_separation
    );
    segmentation
}

/// One bin of the raw-area histogram
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HistogramBin {
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
}

/// Equal-width histogram of region areas over `[min, max]`
pub fn area_histogram(areas: &[u32], bins: usize) -> Vec<HistogramBin> {
    if areas.is_empty() || bins == 0 {
        return Vec::new();
    }

    let min = *areas.iter().min().unwrap_or(&0) as f64;
    let max = *areas.iter().max().unwrap_or(&0) as f64;

    if max <= min {
        return vec![HistogramBin {
            lower: min,
            upper: max,
            count: areas.len(),
        }];
    }

    let width = (max - min) / bins as f64;
    let mut histogram: Vec<HistogramBin> = (0..bins)
        .map(|i| HistogramBin {
            lower: min + width * i as f64,
            upper: min + width * (i + 1) as f64,
            count: 0,
        })
        .collect();

    for &area in areas {
        let idx = (((area as f64 - min) / width).floor() as usize).min(bins - 1);
        histogram[idx].count += 1;
    }
    histogram
}
