use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use crate::calibration::{FlipMode, ReferenceSlot, StageObservation, MAX_REFERENCE_SLOTS};
use crate::centroids::SegmentationParams;
use crate::errors::{Px2XyError, Result};
use crate::image_utils::{ProcessingImage, PROC_TARGET_WIDTH};
use crate::neck::MAX_NECK_SEPARATION;
use crate::quantize::MAX_LEVELS;

/// Session configuration for Px2XY
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Config {
    pub input_path: String,
    pub output_base_dir: String,

    /// Width of the processing image; wider inputs are downscaled
    #[serde(default = "default_proc_target_width")]
    pub proc_target_width: u32,

    #[serde(default = "default_parallel")]
    pub use_parallel: bool,

    /// Bins of the raw-area histogram printed in debug mode
    #[serde(default = "default_histogram_bins")]
    pub histogram_bins: usize,

    // Overlay colours for debug images
    #[serde(default = "default_boundary_color_rgb")]
    pub boundary_color_rgb: [u8; 3],

    #[serde(default = "default_marker_color_rgb")]
    pub marker_color_rgb: [u8; 3],

    #[serde(default)]
    pub segmentation: SegmentationParams,

    #[serde(default)]
    pub calibration: CalibrationConfig,
}

/// Reference points and flip handling
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct CalibrationConfig {
    #[serde(default)]
    pub flip_mode: FlipMode,

    /// Coordinate space of the reference `pixel` entries
    #[serde(default)]
    pub pixel_space: PixelSpace,

    #[serde(default)]
    pub references: Vec<ReferenceConfig>,
}

/// Resolution in which reference pixel positions are given
#[derive(Debug, Deserialize, Serialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PixelSpace {
    /// Coordinates of the original image file
    #[default]
    Full,
    /// Coordinates of the downscaled processing image
    Processing,
}

/// One reference slot as written in the session file.
///
/// Stage values are strings so their typed precision survives.
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct ReferenceConfig {
    #[serde(default)]
    pub pixel: Option<[f64; 2]>,
    #[serde(default)]
    pub stage: Option<StageObservation>,
}

fn default_proc_target_width() -> u32 {
    PROC_TARGET_WIDTH
}

fn default_parallel() -> bool {
    true
}

fn default_histogram_bins() -> usize {
    20
}

fn default_boundary_color_rgb() -> [u8; 3] {
    [0, 255, 0] // Green
}

fn default_marker_color_rgb() -> [u8; 3] {
    [255, 0, 0] // Red
}

impl CalibrationConfig {
    /// Reference slots in processing coordinates for the given image
    pub fn reference_slots(&self, processing: &ProcessingImage) -> Vec<ReferenceSlot> {
        self.references
            .iter()
            .take(MAX_REFERENCE_SLOTS)
            .map(|reference| ReferenceSlot {
                pixel: reference.pixel.map(|[x, y]| match self.pixel_space {
                    PixelSpace::Full => processing.full_to_processing(x, y),
                    PixelSpace::Processing => (x, y),
                }),
                stage: reference.stage.clone(),
            })
            .collect()
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            Px2XyError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;

        Self::from_toml_str(&content).map_err(|source| Px2XyError::ConfigLoad {
            source,
            path: path.to_path_buf(),
        })
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Create default configuration
    pub fn default() -> Self {
        Self {
            input_path: "./input".to_string(),
            output_base_dir: "./output".to_string(),
            proc_target_width: PROC_TARGET_WIDTH,
            use_parallel: true,
            histogram_bins: 20,
            boundary_color_rgb: [0, 255, 0],
            marker_color_rgb: [255, 0, 0],
            segmentation: SegmentationParams::default(),
            calibration: CalibrationConfig::default(),
        }
    }

    /// Check parameter ranges without touching the filesystem
    pub fn validate_parameters(&self) -> Result<()> {
        let seg = &self.segmentation;

        if seg.levels == 0 || seg.levels > MAX_LEVELS {
            return Err(Px2XyError::InvalidParameter(format!(
                "levels must be between 1 and {}",
                MAX_LEVELS
            )));
        }

        if seg.neck_separation > MAX_NECK_SEPARATION {
            return Err(Px2XyError::InvalidParameter(format!(
                "neck_separation must be between 0 and {}",
                MAX_NECK_SEPARATION
            )));
        }

        if let Some(max_area) = seg.max_area {
            if seg.min_area > max_area {
                return Err(Px2XyError::InvalidParameter(format!(
                    "min_area ({}) must not exceed max_area ({})",
                    seg.min_area, max_area
                )));
            }
        }

        if self.proc_target_width == 0 {
            return Err(Px2XyError::Config("proc_target_width must be > 0".to_string()));
        }

        if self.histogram_bins == 0 {
            return Err(Px2XyError::Config("histogram_bins must be > 0".to_string()));
        }

        let references = &self.calibration.references;
        if references.len() > MAX_REFERENCE_SLOTS {
            return Err(Px2XyError::InvalidReference(format!(
                "at most {} reference points are supported, {} given",
                MAX_REFERENCE_SLOTS,
                references.len()
            )));
        }

        for (i, reference) in references.iter().enumerate() {
            if let Some([x, y]) = reference.pixel {
                if !(x.is_finite() && y.is_finite()) || x < 0.0 || y < 0.0 {
                    return Err(Px2XyError::InvalidReference(format!(
                        "reference {} has an invalid pixel position ({}, {})",
                        i + 1,
                        x,
                        y
                    )));
                }
            }
        }

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        // Check input path exists
        let input_path = PathBuf::from(&self.input_path);
        if !input_path.exists() {
            return Err(Px2XyError::InvalidPath(input_path));
        }

        self.validate_parameters()?;

        // Create output directory if it doesn't exist
        let base_dir = PathBuf::from(&self.output_base_dir);
        fs::create_dir_all(&base_dir).map_err(|e| {
            Px2XyError::Io(io::Error::new(
                ErrorKind::Other,
                format!("Failed to create output directory: {}", e),
            ))
        })?;

        Ok(())
    }
}
