//! Per-image orchestration.
//!
//! [`Session`] holds one loaded image together with the intermediate results
//! that are expensive to recompute: the posterized image for the current
//! `levels`, and the segmentation for the current parameter set. Loading a
//! new image drops everything.

use std::path::PathBuf;
use image::RgbImage;

use crate::calibration::{calibrate, CalibrationReport, FlipMode, ReferenceSlot};
use crate::centroids::{area_histogram, segment, Segmentation, SegmentationParams};
use crate::config::Config;
use crate::errors::{Px2XyError, Result};
use crate::image_io::{save_gray_image, save_image, InputImage};
use crate::image_utils::{build_processing_image, create_debug_image, rgb_from_bgr_bytes, ProcessingImage};
use crate::output::{write_image_outputs, ImageSummary, WrittenFiles};
use crate::quantize::posterize;

/// Loaded image plus cached intermediate results
#[derive(Debug, Default)]
pub struct Session {
    processing: Option<ProcessingImage>,
    poster: Option<(u32, RgbImage)>,
    segmentation: Option<(SegmentationParams, Segmentation)>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current image; all cached results are discarded
    pub fn load_image(&mut self, full: &RgbImage, target_width: u32) -> &ProcessingImage {
        self.poster = None;
        self.segmentation = None;
        let processing = build_processing_image(full, target_width);
        log::debug!(
            "loaded {}x{} image, processing at {}x{} (scale {:.4})",
            full.width(),
            full.height(),
            processing.image.width(),
            processing.image.height(),
            processing.scale_proc_to_full
        );
        self.processing.insert(processing)
    }

    /// Load an image from packed B,G,R bytes
    pub fn load_bgr(&mut self, width: u32, height: u32, bgr: &[u8], target_width: u32) -> Result<&ProcessingImage> {
        let full = rgb_from_bgr_bytes(width, height, bgr).ok_or_else(|| {
            Px2XyError::InvalidParameter(format!(
                "expected {} bytes for a {}x{} BGR image, got {}",
                width as usize * height as usize * 3,
                width,
                height,
                bgr.len()
            ))
        })?;
        Ok(self.load_image(&full, target_width))
    }

    pub fn processing_image(&self) -> Option<&ProcessingImage> {
        self.processing.as_ref()
    }

    /// `levels` of the cached posterized image
    pub fn cached_levels(&self) -> Option<u32> {
        self.poster.as_ref().map(|(levels, _)| *levels)
    }

    /// Parameters of the cached segmentation
    pub fn cached_params(&self) -> Option<&SegmentationParams> {
        self.segmentation.as_ref().map(|(params, _)| params)
    }

    /// Posterized processing image, recomputed only when `levels` changes
    pub fn posterized(&mut self, levels: u32) -> Option<&RgbImage> {
        let processing = self.processing.as_ref()?;
        if self.cached_levels() != Some(levels) {
            self.poster = Some((levels, posterize(&processing.image, levels)));
        }
        self.poster.as_ref().map(|(_, image)| image)
    }

    /// Segmentation for `params`, recomputed only when any parameter changes
    pub fn segmentation(&mut self, params: &SegmentationParams) -> Option<&Segmentation> {
        if self.cached_params() != Some(params) {
            let scale = self.processing.as_ref()?.scale_proc_to_full;
            let poster = self.posterized(params.levels)?;
            let segmentation = segment(poster, scale, params);
            self.segmentation = Some((params.clone(), segmentation));
        }
        self.segmentation.as_ref().map(|(_, segmentation)| segmentation)
    }

    /// Calibrate the current centroids against the reference slots
    pub fn calibrate(
        &mut self,
        params: &SegmentationParams,
        slots: &[ReferenceSlot],
        flip_mode: FlipMode,
    ) -> Option<CalibrationReport> {
        let segmentation = self.segmentation(params)?;
        Some(calibrate(slots, &segmentation.centroids, flip_mode))
    }
}

/// Everything produced for one image
#[derive(Debug)]
pub struct ImageReport {
    pub filename: String,
    pub segmentation: Segmentation,
    pub calibration: CalibrationReport,
    pub summary: ImageSummary,
    pub files: WrittenFiles,
}

fn no_image() -> Px2XyError {
    Px2XyError::Config("no image loaded in session".to_string())
}

/// Process a single image: segment, calibrate and write all tables
pub fn process_image(input_image: InputImage, config: &Config, debug: bool) -> Result<ImageReport> {
    let InputImage { image, path, filename } = input_image;
    let params = &config.segmentation;

    let mut session = Session::new();
    let processing = session.load_image(&image, config.proc_target_width);
    let scale_proc_to_full = processing.scale_proc_to_full;
    let slots = config.calibration.reference_slots(processing);
    drop(image);

    let segmentation = session.segmentation(params).cloned().ok_or_else(no_image)?;
    let calibration = session
        .calibrate(params, &slots, config.calibration.flip_mode)
        .ok_or_else(no_image)?;

    let histogram = area_histogram(&segmentation.raw_areas, config.histogram_bins);
    let (full_width, full_height) = session
        .processing_image()
        .map(|p| p.full_dimensions)
        .ok_or_else(no_image)?;

    let summary = ImageSummary {
        filename: filename.clone(),
        full_width,
        full_height,
        scale_proc_to_full,
        group_count: segmentation.group_count,
        raw_region_count: segmentation.raw_areas.len(),
        centroid_count: segmentation.centroids.len(),
        reference_count: slots.iter().filter(|s| s.observation().is_some()).count(),
        calibrated: false,
        calibration_message: None,
        flipped: None,
        scale: None,
        rotation_deg: None,
        translation: None,
        plane: None,
        rms: None,
        histogram,
    }
    .with_calibration(&calibration);

    match calibration.model() {
        Some(model) => log::info!(
            "{}: {} centroids, calibrated (flip={}, scale={:.6}, rotation={:.3} deg, rms={:.6})",
            filename,
            summary.centroid_count,
            model.flipped,
            model.similarity.scale,
            model.similarity.angle_deg(),
            model.rms
        ),
        None => log::info!(
            "{}: {} centroids, no calibration ({})",
            filename,
            summary.centroid_count,
            summary.calibration_message.as_deref().unwrap_or("unknown")
        ),
    }

    if debug {
        for bin in &summary.histogram {
            log::debug!("  area [{:.1}, {:.1}]: {}", bin.lower, bin.upper, bin.count);
        }

        let debug_dir = PathBuf::from(&config.output_base_dir).join("debug");
        std::fs::create_dir_all(&debug_dir)?;

        if let Some(poster) = session.posterized(params.levels) {
            save_image(poster, debug_dir.join(format!("{}_posterized.png", filename)))?;
        }
        if let Some(processing) = session.processing_image() {
            let overlay = create_debug_image(
                &processing.image,
                &segmentation.boundary,
                &segmentation.centroids,
                config.boundary_color_rgb,
                config.marker_color_rgb,
            );
            save_image(&overlay, debug_dir.join(format!("{}_overlay.png", filename)))?;
        }
        save_gray_image(&segmentation.boundary, debug_dir.join(format!("{}_boundary.png", filename)))?;
    }

    let subfolder = path
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|s| s.to_str())
        .unwrap_or("root");
    let output_dir = PathBuf::from(&config.output_base_dir).join(subfolder);

    let files = write_image_outputs(
        &output_dir,
        &filename,
        &segmentation.centroids,
        &segmentation.raw_areas,
        &calibration,
        &summary,
    )?;
    log::debug!("{}: wrote {}", filename, files.export.display());

    Ok(ImageReport {
        filename,
        segmentation,
        calibration,
        summary,
        files,
    })
}
