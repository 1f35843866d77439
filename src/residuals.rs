//! Display precision for calibrated values and residuals.
//!
//! Predicted stage coordinates are printed with as many decimals as the user
//! typed for that axis. Residual columns are printed so that their largest
//! magnitude shows about two significant digits.

use serde::Serialize;

/// Significant digits shown for the largest residual in a column
pub const RESIDUAL_SIGNIFICANT_DIGITS: i32 = 2;
/// Upper bound on residual decimals
pub const RESIDUAL_MAX_DECIMALS: usize = 4;
/// Decimals used when a residual column is all zero
pub const RESIDUAL_ZERO_DECIMALS: usize = 3;
/// Decimals assumed for values typed in scientific notation
const SCIENTIFIC_DECIMALS: usize = 3;

/// Largest number of decimal digits among typed numbers
pub fn max_decimal_places<S: AsRef<str>>(values: &[S]) -> usize {
    values
        .iter()
        .map(|v| {
            let s = v.as_ref().trim();
            if s.contains(['e', 'E']) {
                SCIENTIFIC_DECIMALS
            } else {
                s.rsplit_once('.').map_or(0, |(_, frac)| frac.len())
            }
        })
        .max()
        .unwrap_or(0)
}

/// Decimals needed to show the largest |value| with `significant` digits,
/// clamped to `0..=cap`. An all-zero (or non-finite) column gets
/// [`RESIDUAL_ZERO_DECIMALS`].
pub fn decimals_for_significant(values: &[f64], significant: i32, cap: usize) -> usize {
    let max_abs = values
        .iter()
        .filter(|v| !v.is_nan())
        .fold(0.0f64, |acc, v| acc.max(v.abs()));

    if !max_abs.is_finite() || max_abs == 0.0 {
        return RESIDUAL_ZERO_DECIMALS;
    }

    let decimals = significant - 1 - max_abs.log10().floor() as i32;
    decimals.clamp(0, cap as i32) as usize
}

/// Fixed-point formatting with trailing zeros trimmed.
///
/// Zero decimals prints a rounded integer. Negative zero prints as `0`.
pub fn format_fixed(value: f64, decimals: usize) -> String {
    let mut text = format!("{:.*}", decimals, value);
    if decimals > 0 {
        let trimmed = text.trim_end_matches('0').trim_end_matches('.').len();
        text.truncate(trimmed);
    }
    if text == "-0" {
        text = "0".to_string();
    }
    text
}

/// Numeric residual of one reference point (observed minus predicted)
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Residual {
    /// Reference slot index (0-based)
    pub slot: usize,
    pub dx: f64,
    pub dy: f64,
    pub dz: f64,
    pub magnitude: f64,
}

impl Residual {
    pub fn new(slot: usize, dx: f64, dy: f64, dz: f64) -> Self {
        Self {
            slot,
            dx,
            dy,
            dz,
            magnitude: (dx * dx + dy * dy + dz * dz).sqrt(),
        }
    }
}

/// Formatted residual row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResidualText {
    pub slot: usize,
    pub dx: String,
    pub dy: String,
    pub dz: String,
    pub magnitude: String,
}

/// Formatted residual table with the decimals chosen for each column
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResidualReport {
    /// Decimals for X, Y, Z and |R|
    pub decimals: [usize; 4],
    pub rows: Vec<ResidualText>,
}

fn column_decimals(values: impl Iterator<Item = f64>) -> usize {
    let column: Vec<f64> = values.collect();
    decimals_for_significant(&column, RESIDUAL_SIGNIFICANT_DIGITS, RESIDUAL_MAX_DECIMALS)
}

/// Format residuals column by column
pub fn report_residuals(residuals: &[Residual]) -> ResidualReport {
    if residuals.is_empty() {
        return ResidualReport::default();
    }

    let decimals = [
        column_decimals(residuals.iter().map(|r| r.dx)),
        column_decimals(residuals.iter().map(|r| r.dy)),
        column_decimals(residuals.iter().map(|r| r.dz)),
        column_decimals(residuals.iter().map(|r| r.magnitude)),
    ];

    let rows = residuals
        .iter()
        .map(|r| ResidualText {
            slot: r.slot,
            dx: format_fixed(r.dx, decimals[0]),
            dy: format_fixed(r.dy, decimals[1]),
            dz: format_fixed(r.dz, decimals[2]),
            magnitude: format_fixed(r.magnitude, decimals[3]),
        })
        .collect();

    ResidualReport { decimals, rows }
}
