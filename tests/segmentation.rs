use image::{Rgb, RgbImage};

use px2xy_lib::centroids::{area_histogram, segment, SegmentationParams};
use px2xy_lib::morphology::{count_foreground, erode_mask, StructuringElement};
use px2xy_lib::quantize::posterize;
use px2xy_lib::regions::{color_mask, extract_color_groups, trim_to_processing, Connectivity};

const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
const BLACK: Rgb<u8> = Rgb([0, 0, 0]);

fn paint_disk(img: &mut RgbImage, cx: i64, cy: i64, r: i64) -> u32 {
    let mut painted = 0;
    for (x, y, px) in img.enumerate_pixels_mut() {
        let (dx, dy) = (x as i64 - cx, y as i64 - cy);
        if dx * dx + dy * dy <= r * r {
            *px = WHITE;
            painted += 1;
        }
    }
    painted
}

fn params(neck_separation: u32) -> SegmentationParams {
    SegmentationParams {
        levels: 2,
        min_area: 50,
        max_area: Some(5000),
        trim_px: 0,
        neck_separation,
        connectivity: Connectivity::Four,
    }
}

/// Two disks of radius 15 joined by a one pixel wide horizontal bridge
fn dumbbell() -> (RgbImage, u32, u32) {
    let mut img = RgbImage::from_pixel(100, 80, BLACK);
    let disk = paint_disk(&mut img, 30, 40, 15);
    paint_disk(&mut img, 70, 40, 15);
    let mut bridge = 0;
    for x in 31..70 {
        if *img.get_pixel(x, 40) == BLACK {
            img.put_pixel(x, 40, WHITE);
            bridge += 1;
        }
    }
    (img, disk, bridge)
}

#[test]
fn single_disk_area_and_centroid() {
    let mut img = RgbImage::from_pixel(200, 200, BLACK);
    paint_disk(&mut img, 100, 100, 30);
    let poster = posterize(&img, 2);

    let seg = segment(&poster, 1.0, &params(0));
    assert_eq!(seg.centroids.len(), 1);
    let c = seg.centroids[0];
    assert_eq!(c.group_no, 2);
    assert!((c.x - 100.0).abs() <= 1.0 && (c.y - 100.0).abs() <= 1.0);

    let expected = std::f64::consts::PI * 30.0 * 30.0;
    let disk_area = *seg.raw_areas.iter().min().unwrap() as f64;
    assert!((disk_area - expected).abs() / expected < 0.02);
}

#[test]
fn bridge_is_kept_without_neck_separation() {
    let (img, disk, bridge) = dumbbell();
    let seg = segment(&posterize(&img, 2), 1.0, &params(0));
    assert_eq!(seg.centroids.len(), 1);
    assert!(seg.raw_areas.contains(&(2 * disk + bridge)));
}

#[test]
fn neck_separation_splits_dumbbell() {
    let (img, disk, _) = dumbbell();
    let poster = posterize(&img, 2);

    for strength in 1..=3 {
        let seg = segment(&poster, 1.0, &params(strength));
        assert_eq!(seg.centroids.len(), 2, "strength {}", strength);

        let lobes: Vec<u32> = seg
            .raw_areas
            .iter()
            .copied()
            .filter(|&a| a < 5000)
            .collect();
        assert_eq!(lobes.len(), 2);
        for area in lobes {
            let deviation = (area as f64 - disk as f64).abs() / disk as f64;
            assert!(deviation <= 0.05, "area {} vs disk {}", area, disk);
        }

        assert!(seg.centroids[0].x < 50.0);
        assert!(seg.centroids[1].x > 50.0);
    }
}

#[test]
fn raw_areas_cover_trimmed_foreground() {
    let mut img = RgbImage::from_pixel(60, 40, BLACK);
    for y in 5..25 {
        for x in 5..30 {
            img.put_pixel(x, y, Rgb([200, 30, 30]));
        }
    }
    for y in 10..35 {
        for x in 35..55 {
            img.put_pixel(x, y, Rgb([30, 30, 200]));
        }
    }
    paint_disk(&mut img, 20, 30, 6);

    let mut p = params(0);
    p.min_area = 0;
    p.max_area = None;
    p.trim_px = 2;
    let seg = segment(&img, 1.0, &p);

    let trim = trim_to_processing(p.trim_px, 1.0);
    let foreground: u64 = extract_color_groups(&img)
        .iter()
        .map(|g| count_foreground(&erode_mask(&color_mask(&img, g.color), StructuringElement::Square3, trim)))
        .sum();

    let total: u64 = seg.raw_areas.iter().map(|&a| a as u64).sum();
    assert_eq!(total, foreground);

    let histogram = area_histogram(&seg.raw_areas, 8);
    assert_eq!(histogram.iter().map(|b| b.count).sum::<usize>(), seg.raw_areas.len());
}

#[test]
fn trim_is_scaled_to_processing_resolution() {
    assert_eq!(trim_to_processing(4, 2.0), 2);
    assert_eq!(trim_to_processing(3, 2.0), 2);
    assert_eq!(trim_to_processing(5, 2.0), 2);
    assert_eq!(trim_to_processing(3, 0.5), 3);
}

#[test]
fn posterize_is_deterministic() {
    let img = RgbImage::from_fn(64, 48, |x, y| {
        Rgb([(x * 4) as u8, (y * 5) as u8, ((x * y) % 251) as u8])
    });
    let a = posterize(&img, 5);
    let b = posterize(&img, 5);
    assert_eq!(a, b);

    let colours = extract_color_groups(&a);
    assert!(colours.len() <= 5);

    let seg_a = segment(&a, 1.0, &params(2));
    let seg_b = segment(&b, 1.0, &params(2));
    assert_eq!(seg_a.centroids, seg_b.centroids);
}
