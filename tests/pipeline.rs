use std::fs;
use std::path::PathBuf;

use image::{Rgb, RgbImage};

use px2xy_lib::calibration::{FlipMode, StageObservation};
use px2xy_lib::config::{Config, ReferenceConfig};
use px2xy_lib::image_io::{load_image, save_image};
use px2xy_lib::output::export_text;
use px2xy_lib::pipeline::process_image;

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("px2xy_pipeline_{}_{}", name, std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

/// Dark field with a 3x2 grid of bright 8x8 grains
fn grain_grid() -> RgbImage {
    let mut img = RgbImage::from_pixel(120, 80, Rgb([10, 10, 10]));
    for row in 0..2 {
        for col in 0..3 {
            let (x0, y0) = (20 + col * 35, 20 + row * 30);
            for y in y0..y0 + 8 {
                for x in x0..x0 + 8 {
                    img.put_pixel(x, y, Rgb([240, 240, 240]));
                }
            }
        }
    }
    img
}

fn reference(u: f64, v: f64, x: &str, y: &str, z: &str) -> ReferenceConfig {
    ReferenceConfig {
        pixel: Some([u, v]),
        stage: Some(StageObservation::new(x, y, z)),
    }
}

fn session(dir: &PathBuf, image_path: &PathBuf) -> Config {
    let mut config = Config::default();
    config.input_path = image_path.to_string_lossy().into_owned();
    config.output_base_dir = dir.join("out").to_string_lossy().into_owned();
    config.use_parallel = false;
    config.segmentation.levels = 2;
    config.segmentation.min_area = 10;
    config.segmentation.max_area = Some(100);
    config
}

#[test]
fn uncalibrated_run_writes_blank_stage_columns() {
    let dir = scratch_dir("uncalibrated");
    let image_path = dir.join("grains.png");
    save_image(&grain_grid(), &image_path).unwrap();

    let config = session(&dir, &image_path);
    config.validate().unwrap();
    let report = process_image(load_image(&image_path).unwrap(), &config, false).unwrap();

    assert_eq!(report.segmentation.centroids.len(), 6);
    assert!(report.calibration.model().is_none());
    assert!(!report.summary.calibrated);

    let text = fs::read_to_string(&report.files.export).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 7);
    assert_eq!(lines[0], "No,Group,Stage X,Stage Y,Stage Z");
    assert_eq!(lines[1], "1,2,,,");
    assert_eq!(lines[6], "6,2,,,");
    assert!(report.files.residuals.is_none());

    let pixels = fs::read_to_string(&report.files.pixels).unwrap();
    assert_eq!(pixels.lines().nth(1), Some("2,24,24"));

    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn calibrated_run_exports_stage_coordinates() {
    let dir = scratch_dir("calibrated");
    let image_path = dir.join("grains.png");
    save_image(&grain_grid(), &image_path).unwrap();

    let mut config = session(&dir, &image_path);
    config.calibration.flip_mode = FlipMode::Normal;
    // Stage = pixel / 10 with Z constant
    config.calibration.references = vec![
        reference(23.5, 23.5, "2.35", "2.35", "1.0"),
        reference(93.5, 23.5, "9.35", "2.35", "1.0"),
        reference(58.5, 53.5, "5.85", "5.35", "1.0"),
    ];

    let report = process_image(load_image(&image_path).unwrap(), &config, true).unwrap();
    let model = report.calibration.model().unwrap();
    assert!((model.similarity.scale - 0.1).abs() < 1e-9);
    assert_eq!(report.summary.flipped, Some(false));

    let text = fs::read_to_string(&report.files.export).unwrap();
    assert_eq!(text, export_text(&report.segmentation.centroids, &report.calibration.stage).unwrap());
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 7);
    assert_eq!(lines[1], "1,2,2.35,2.35,1");
    assert_eq!(lines[6], "6,2,9.35,5.35,1");

    let tsv = fs::read_to_string(&report.files.clipboard).unwrap();
    assert!(tsv.starts_with("No\tCalcX\tCalcY\tCalcZ\n1\t2.35\t2.35\t1"));

    let residuals = fs::read_to_string(report.files.residuals.as_ref().unwrap()).unwrap();
    assert_eq!(residuals.lines().count(), 4);

    let summary: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&report.files.summary).unwrap()).unwrap();
    assert_eq!(summary["centroid_count"], 6);
    assert_eq!(summary["calibrated"], true);

    let debug_dir = PathBuf::from(&config.output_base_dir).join("debug");
    assert!(debug_dir.join("grains_posterized.png").exists());
    assert!(debug_dir.join("grains_overlay.png").exists());

    fs::remove_dir_all(&dir).unwrap();
}
