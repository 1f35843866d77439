// src/lib.rs - Library interface for Px2XY

pub mod calibration;
pub mod centroids;
pub mod config;
pub mod errors;
pub mod image_io;
pub mod image_utils;
pub mod morphology;
pub mod neck;
pub mod output;
pub mod pipeline;
pub mod quantize;
pub mod regions;
pub mod residuals;

// Re-export commonly used types and functions
pub use errors::{CalibrationUnavailable, Px2XyError, Result};
pub use config::Config;
pub use pipeline::{process_image, ImageReport, Session};
pub use image_io::{InputImage, load_image, save_image};

// Segmentation engine
pub use quantize::posterize;
pub use regions::{extract_color_groups, extract_regions, ColorGroup, Connectivity, Region};
pub use neck::split_by_neck;
pub use centroids::{
    area_histogram,
    segment,
    AreaFilter,
    CentroidCollector,
    CentroidRecord,
    Segmentation,
    SegmentationParams,
};

// Calibration
pub use calibration::{
    calibrate,
    solve,
    CalibrationModel,
    CalibrationReport,
    FlipMode,
    ReferenceSlot,
    StageObservation,
    StageText,
};
pub use residuals::{report_residuals, Residual, ResidualReport};

// Output
pub use output::{clipboard_tsv, export_text, pixel_export_text};
