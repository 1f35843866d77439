use image::Luma;
use imageproc::region_labelling::{connected_components, Connectivity as LabelConnectivity};

use crate::morphology::{erode_mask, is_foreground, StructuringElement};
use crate::regions::{label_regions, Connectivity, Region};

/// Largest accepted neck separation strength
pub const MAX_NECK_SEPARATION: u32 = 10;

/// Raster passes of marker propagation before unresolved pixels are dropped
pub const NECK_FLOOD_PASSES: usize = 20;

/// Neighbour order used by marker propagation: up, down, left, right
const FLOOD_NEIGHBOURS: [(i32, i32); 4] = [(0, -1), (0, 1), (-1, 0), (1, 0)];

/// Split a region that is pinched by thin necks into its lobes.
///
/// The mask is eroded `neck_separation` times with a 3x3 cross. When two or
/// more cores survive, core labels are propagated back over the original
/// mask and every label becomes a sub-region (re-labeled with
/// 4-connectivity). Pixels the propagation has not reached after
/// [`NECK_FLOOD_PASSES`] passes are dropped.
///
/// Returns the region unchanged when no split happens.
pub fn split_by_neck(region: Region, neck_separation: u32, bounds: (u32, u32)) -> Vec<Region> {
    let strength = neck_separation.min(MAX_NECK_SEPARATION);
    if strength == 0 || region.area == 0 {
        return vec![region];
    }

    let eroded = erode_mask(&region.mask, StructuringElement::Cross3, strength);
    let cores = connected_components(&eroded, LabelConnectivity::Four, Luma([0u8]));
    let num_cores = cores.pixels().map(|p| p[0]).max().unwrap_or(0);

    if num_cores < 2 {
        return vec![region];
    }

    let (width, height) = region.mask.dimensions();
    let idx = |x: u32, y: u32| (y * width + x) as usize;
    let mut markers: Vec<u32> = cores.pixels().map(|p| p[0]).collect();

    let mut unmarked = count_unmarked(&region, &markers);
    let mut passes = 0;
    while unmarked > 0 && passes < NECK_FLOOD_PASSES {
        passes += 1;
        let mut changed = false;

        for y in 0..height {
            for x in 0..width {
                if markers[idx(x, y)] != 0 || !is_foreground(region.mask.get_pixel(x, y)) {
                    continue;
                }
                for &(dx, dy) in &FLOOD_NEIGHBOURS {
                    let nx = x as i32 + dx;
                    let ny = y as i32 + dy;
                    if nx < 0 || ny < 0 || nx >= width as i32 || ny >= height as i32 {
                        continue;
                    }
                    let label = markers[idx(nx as u32, ny as u32)];
                    if label > 0 {
                        markers[idx(x, y)] = label;
                        changed = true;
                        break;
                    }
                }
            }
        }

        if !changed {
            break;
        }
        unmarked = count_unmarked(&region, &markers);
    }

    if unmarked > 0 {
        log::debug!(
            "neck split: {} of {} pixels unresolved after {} passes, dropped",
            unmarked, region.area, passes
        );
    }

    let mut pixels_by_core: Vec<Vec<(u32, u32)>> = vec![Vec::new(); num_cores as usize];
    for y in 0..height {
        for x in 0..width {
            let label = markers[idx(x, y)];
            if label > 0 && is_foreground(region.mask.get_pixel(x, y)) {
                pixels_by_core[label as usize - 1].push(region.local_to_global(x, y));
            }
        }
    }

    let split: Vec<Region> = pixels_by_core
        .iter()
        .filter_map(|pixels| Region::from_pixels(pixels, bounds))
        .flat_map(|sub| label_regions(&sub.mask, sub.offset, bounds, Connectivity::Four))
        .collect();

    debug_assert!(!split.is_empty(), "every core seeds at least one pixel");

    log::debug!("neck split: {} cores -> {} regions", num_cores, split.len());
    split
}

fn count_unmarked(region: &Region, markers: &[u32]) -> usize {
    region
        .mask
        .pixels()
        .zip(markers)
        .filter(|(p, &m)| is_foreground(p) && m == 0)
        .count()
}
