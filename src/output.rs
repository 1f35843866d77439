use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use csv::{Terminator, Writer, WriterBuilder};
use serde::Serialize;

use crate::calibration::{CalibrationReport, StageText};
use crate::centroids::{CentroidRecord, HistogramBin};
use crate::errors::{Px2XyError, Result};
use crate::residuals::ResidualReport;

/// Header of the calibrated export table
pub const EXPORT_HEADER: [&str; 5] = ["No", "Group", "Stage X", "Stage Y", "Stage Z"];
/// Header of the pixel-coordinate export
pub const PIXEL_EXPORT_HEADER: [&str; 3] = ["GroupNo", "X", "Y"];
/// Header line of the tab-separated clipboard text
pub const TSV_HEADER: &str = "No\tCalcX\tCalcY\tCalcZ";

fn csv_writer<W: Write>(inner: W) -> Writer<W> {
    WriterBuilder::new()
        .terminator(Terminator::Any(b'\n'))
        .from_writer(inner)
}

fn into_string(writer: Writer<Vec<u8>>) -> Result<String> {
    let bytes = writer
        .into_inner()
        .map_err(|e| Px2XyError::Io(e.into_error()))?;
    utf8(bytes)
}

fn utf8(bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes).map_err(|e| Px2XyError::Config(format!("Export is not UTF-8: {}", e)))
}

fn write_file<P: AsRef<Path>>(path: P, content: &str) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)?;
    Ok(())
}

/// Write the calibrated centroid table.
///
/// One row per centroid with a 1-based index; stage fields are blank when
/// no calibration is available for that row.
pub fn write_export<W: Write>(
    inner: W,
    centroids: &[CentroidRecord],
    stage: &[Option<StageText>],
) -> Result<()> {
    let mut writer = csv_writer(inner);
    writer.write_record(EXPORT_HEADER)?;

    for (i, record) in centroids.iter().enumerate() {
        let (x, y, z) = match stage.get(i).and_then(|s| s.as_ref()) {
            Some(s) => (s.x.as_str(), s.y.as_str(), s.z.as_str()),
            None => ("", "", ""),
        };
        writer.write_record([
            (i + 1).to_string().as_str(),
            record.group_no.to_string().as_str(),
            x,
            y,
            z,
        ])?;
    }

    writer.flush()?;
    Ok(())
}

/// Calibrated centroid table as text
pub fn export_text(centroids: &[CentroidRecord], stage: &[Option<StageText>]) -> Result<String> {
    let mut bytes = Vec::new();
    write_export(&mut bytes, centroids, stage)?;
    utf8(bytes)
}

/// Pixel export: colour group and rounded processing coordinates
pub fn pixel_export_text(centroids: &[CentroidRecord]) -> Result<String> {
    let mut writer = csv_writer(Vec::new());
    writer.write_record(PIXEL_EXPORT_HEADER)?;
    for record in centroids {
        writer.write_record([
            record.group_no.to_string(),
            (record.x.round_ties_even() as i64).to_string(),
            (record.y.round_ties_even() as i64).to_string(),
        ])?;
    }
    into_string(writer)
}

/// Tab-separated calibrated coordinates for pasting into a spreadsheet.
///
/// Lines are joined with `\n` without a trailing newline.
pub fn clipboard_tsv(stage: &[Option<StageText>]) -> String {
    let mut lines = Vec::with_capacity(stage.len() + 1);
    lines.push(TSV_HEADER.to_string());
    for (i, entry) in stage.iter().enumerate() {
        match entry {
            Some(s) => lines.push(format!("{}\t{}\t{}\t{}", i + 1, s.x, s.y, s.z)),
            None => lines.push(format!("{}\t\t\t", i + 1)),
        }
    }
    lines.join("\n")
}

/// Residual table, slots numbered from 1
pub fn residuals_text(report: &ResidualReport) -> Result<String> {
    let mut writer = csv_writer(Vec::new());
    writer.write_record(["Slot", "Res X", "Res Y", "Res Z", "Res |R|"])?;
    for row in &report.rows {
        writer.write_record([
            (row.slot + 1).to_string().as_str(),
            row.dx.as_str(),
            row.dy.as_str(),
            row.dz.as_str(),
            row.magnitude.as_str(),
        ])?;
    }
    into_string(writer)
}

/// Raw region areas before filtering
pub fn write_area_csv<P: AsRef<Path>>(areas: &[u32], path: P) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut writer = WriterBuilder::new()
        .terminator(Terminator::Any(b'\n'))
        .from_path(path)?;
    writer.write_record(["Index", "Area"])?;
    for (i, area) in areas.iter().enumerate() {
        writer.write_record([(i + 1).to_string(), area.to_string()])?;
    }
    writer.flush()?;

    Ok(())
}

/// Per-image summary written next to the tables
#[derive(Debug, Clone, Serialize)]
pub struct ImageSummary {
    pub filename: String,
    pub full_width: u32,
    pub full_height: u32,
    pub scale_proc_to_full: f64,
    pub group_count: usize,
    pub raw_region_count: usize,
    pub centroid_count: usize,
    pub reference_count: usize,
    pub calibrated: bool,
    pub calibration_message: Option<String>,
    pub flipped: Option<bool>,
    pub scale: Option<f64>,
    pub rotation_deg: Option<f64>,
    pub translation: Option<[f64; 2]>,
    pub plane: Option<[f64; 3]>,
    pub rms: Option<f64>,
    pub histogram: Vec<HistogramBin>,
}

impl ImageSummary {
    /// Fill the calibration fields from a report
    pub fn with_calibration(mut self, report: &CalibrationReport) -> Self {
        match &report.outcome {
            Ok(model) => {
                self.calibrated = true;
                self.flipped = Some(model.flipped);
                self.scale = Some(model.similarity.scale);
                self.rotation_deg = Some(model.similarity.angle_deg());
                self.translation = Some([model.similarity.translation.x, model.similarity.translation.y]);
                self.plane = Some([model.plane.a, model.plane.b, model.plane.c]);
                self.rms = Some(model.rms);
            }
            Err(reason) => {
                self.calibrated = false;
                self.calibration_message = Some(reason.to_string());
            }
        }
        self
    }
}

/// Paths of the files written for one image
#[derive(Debug, Clone, Default)]
pub struct WrittenFiles {
    pub export: PathBuf,
    pub pixels: PathBuf,
    pub clipboard: PathBuf,
    pub residuals: Option<PathBuf>,
    pub areas: PathBuf,
    pub summary: PathBuf,
}

/// Write every table for one image into `output_dir`
pub fn write_image_outputs<P: AsRef<Path>>(
    output_dir: P,
    filename: &str,
    centroids: &[CentroidRecord],
    raw_areas: &[u32],
    calibration: &CalibrationReport,
    summary: &ImageSummary,
) -> Result<WrittenFiles> {
    let dir = output_dir.as_ref();
    fs::create_dir_all(dir)?;

    let export = dir.join(format!("{}_stage.csv", filename));
    let mut file = fs::File::create(&export)?;
    write_export(&mut file, centroids, &calibration.stage)?;

    let pixels = dir.join(format!("{}_pixels.txt", filename));
    write_file(&pixels, &pixel_export_text(centroids)?)?;

    let clipboard = dir.join(format!("{}_stage.tsv", filename));
    write_file(&clipboard, &clipboard_tsv(&calibration.stage))?;

    let residuals = if calibration.residual_report.rows.is_empty() {
        None
    } else {
        let path = dir.join(format!("{}_residuals.csv", filename));
        write_file(&path, &residuals_text(&calibration.residual_report)?)?;
        Some(path)
    };

    let areas = dir.join(format!("{}_areas.csv", filename));
    write_area_csv(raw_areas, &areas)?;

    let summary_path = dir.join(format!("{}_summary.json", filename));
    write_file(&summary_path, &serde_json::to_string_pretty(summary)?)?;

    Ok(WrittenFiles {
        export,
        pixels,
        clipboard,
        residuals,
        areas,
        summary: summary_path,
    })
}
