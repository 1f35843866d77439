//! Colour posterization by k-means clustering.
//!
//! Every pixel is treated as a point in RGB space and replaced by the colour
//! of the cluster it is assigned to. The random generator is seeded with a
//! fixed value, so the same image and level count always produce the same
//! posterized image.

use std::collections::HashSet;

use image::{Rgb, RgbImage};
use kmeans_colors::{get_kmeans, Kmeans};
use palette::Srgb;

/// Seed of the first k-means attempt; attempt `i` uses `KMEANS_SEED + i`
pub const KMEANS_SEED: u64 = 12345;
/// Maximum iterations per attempt
pub const KMEANS_MAX_ITERATIONS: usize = 10;
/// Attempts with different seeds; the most compact one wins
pub const KMEANS_ATTEMPTS: u64 = 10;
/// Convergence threshold, one 8-bit step in normalised RGB
pub const KMEANS_CONVERGE: f32 = 1.0 / 255.0;
/// Cluster indices are stored as `u8`
pub const MAX_LEVELS: u32 = 256;

fn distinct_colours(image: &RgbImage, limit: usize) -> usize {
    let mut seen = HashSet::new();
    for p in image.pixels() {
        seen.insert(p.0);
        if seen.len() > limit {
            break;
        }
    }
    seen.len()
}

/// Cluster mean in 8-bit RGB, truncated toward zero
fn cluster_palette(image: &RgbImage, indices: &[u8], k: usize) -> Vec<Rgb<u8>> {
    let mut sums = vec![[0u64; 3]; k];
    let mut counts = vec![0u64; k];
    for (p, &label) in image.pixels().zip(indices) {
        let label = label as usize;
        for c in 0..3 {
            sums[label][c] += p[c] as u64;
        }
        counts[label] += 1;
    }

    sums.iter()
        .zip(&counts)
        .map(|(sum, &n)| {
            let n = n.max(1);
            Rgb([(sum[0] / n) as u8, (sum[1] / n) as u8, (sum[2] / n) as u8])
        })
        .collect()
}

/// Reduce `image` to at most `levels` colours.
///
/// `levels` is clamped to `1..=MAX_LEVELS`. An image that already has no
/// more than `levels` colours is returned unchanged. The output has the same
/// dimensions as the input and each pixel carries its cluster colour.
pub fn posterize(image: &RgbImage, levels: u32) -> RgbImage {
    let (width, height) = image.dimensions();
    let k = levels.clamp(1, MAX_LEVELS) as usize;
    if width == 0 || height == 0 || distinct_colours(image, k) <= k {
        return image.clone();
    }

    let points: Vec<Srgb<f32>> = image
        .pixels()
        .map(|p| Srgb::new(p[0], p[1], p[2]).into_format())
        .collect();

    let run = |seed: u64| -> Kmeans<Srgb<f32>> {
        get_kmeans(k, KMEANS_MAX_ITERATIONS, KMEANS_CONVERGE, false, &points, seed)
    };
    let best = (1..KMEANS_ATTEMPTS)
        .map(|i| run(KMEANS_SEED + i))
        .fold(run(KMEANS_SEED), |best, attempt| {
            if attempt.score < best.score {
                attempt
            } else {
                best
            }
        });
    log::debug!(
        "posterize: {}x{} px, k={}, score={:.4}",
        width, height, k, best.score
    );

    let palette = cluster_palette(image, &best.indices, k);
    let mut poster = RgbImage::new(width, height);
    for (out, &label) in poster.pixels_mut().zip(&best.indices) {
        *out = palette[label as usize];
    }
    poster
}
