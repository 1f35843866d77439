//! Pixel-to-stage calibration.
//!
//! X/Y are mapped with a 2-D similarity transform (uniform scale, proper
//! rotation, translation) fitted in the least-squares sense; Z is an
//! independent plane over the pixel coordinates. Because the optical path
//! may mirror the image, the fit can be done with the pixel U axis negated,
//! and `FlipMode::Auto` keeps whichever orientation fits better.

use nalgebra::{DMatrix, DVector, Matrix2, Vector2};
use serde::{Deserialize, Serialize};

use crate::centroids::CentroidRecord;
use crate::errors::CalibrationUnavailable;
use crate::residuals::{format_fixed, max_decimal_places, report_residuals, Residual, ResidualReport};

/// Number of reference slots offered to the user
pub const MAX_REFERENCE_SLOTS: usize = 10;
/// Reference points needed before a model is fitted
pub const MIN_REFERENCE_POINTS: usize = 3;
/// Source variance (px^2) below which the similarity fit is degenerate
const MIN_SOURCE_VARIANCE: f64 = 1e-12;
/// Relative singular value below which the plane design is rank deficient
const PLANE_RANK_TOLERANCE: f64 = 1e-10;

/// Orientation handling for the pixel U axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlipMode {
    /// Fit both orientations and keep the lower RMS
    #[default]
    Auto,
    /// Use pixel coordinates as they are
    Normal,
    /// Negate pixel U before fitting
    Flip,
}

/// Stage coordinates as typed by the user, kept verbatim until parsed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageObservation {
    pub x: String,
    pub y: String,
    pub z: String,
}

impl StageObservation {
    pub fn new(x: impl Into<String>, y: impl Into<String>, z: impl Into<String>) -> Self {
        Self {
            x: x.into(),
            y: y.into(),
            z: z.into(),
        }
    }

    /// All three values as numbers, or `None` if any is blank or not a finite number
    pub fn parse(&self) -> Option<[f64; 3]> {
        let parse = |s: &str| s.trim().parse::<f64>().ok().filter(|v| v.is_finite());
        Some([parse(&self.x)?, parse(&self.y)?, parse(&self.z)?])
    }
}

/// One user-picked reference point
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReferenceSlot {
    /// Pixel position in processing coordinates
    pub pixel: Option<(f64, f64)>,
    pub stage: Option<StageObservation>,
}

impl ReferenceSlot {
    pub fn new(pixel: (f64, f64), stage: StageObservation) -> Self {
        Self {
            pixel: Some(pixel),
            stage: Some(stage),
        }
    }

    /// Pixel position and parsed stage values when the slot can be used for fitting
    pub fn observation(&self) -> Option<((f64, f64), [f64; 3])> {
        let pixel = self.pixel?;
        if !(pixel.0.is_finite() && pixel.1.is_finite()) {
            return None;
        }
        Some((pixel, self.stage.as_ref()?.parse()?))
    }
}

/// `q = scale * rotation * p + translation`
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SimilarityTransform {
    pub scale: f64,
    pub rotation: Matrix2<f64>,
    pub translation: Vector2<f64>,
}

impl SimilarityTransform {
    pub fn apply(&self, p: Vector2<f64>) -> Vector2<f64> {
        self.rotation * p * self.scale + self.translation
    }

    /// Rotation angle in degrees, counter-clockwise
    pub fn angle_deg(&self) -> f64 {
        self.rotation[(1, 0)].atan2(self.rotation[(0, 0)]).to_degrees()
    }
}

/// `z = a * u + b * v + c`
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PlaneFit {
    pub a: f64,
    pub b: f64,
    pub c: f64,
}

impl PlaneFit {
    pub fn apply(&self, u: f64, v: f64) -> f64 {
        self.a * u + self.b * v + self.c
    }
}

/// Fitted pixel-to-stage model
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CalibrationModel {
    pub similarity: SimilarityTransform,
    pub plane: PlaneFit,
    /// Pixel U was negated before fitting
    pub flipped: bool,
    /// 3-D RMS residual over the reference points
    pub rms: f64,
}

impl CalibrationModel {
    /// Predicted stage (X, Y, Z) for a processing pixel position
    pub fn predict(&self, u: f64, v: f64) -> [f64; 3] {
        let u = if self.flipped { -u } else { u };
        let xy = self.similarity.apply(Vector2::new(u, v));
        [xy.x, xy.y, self.plane.apply(u, v)]
    }
}

/// Least-squares similarity transform mapping `src` onto `dst`.
///
/// Procrustes/Umeyama: the rotation comes from the SVD of the
/// cross-covariance, with the smallest singular direction negated when
/// needed so that `det(R) = +1`.
pub fn fit_similarity(src: &[Vector2<f64>], dst: &[Vector2<f64>]) -> Option<SimilarityTransform> {
    let n = src.len();
    if n < 2 || n != dst.len() {
        return None;
    }
    let nf = n as f64;

    let mu_p = src.iter().sum::<Vector2<f64>>() / nf;
    let mu_q = dst.iter().sum::<Vector2<f64>>() / nf;

    let mut cov = Matrix2::zeros();
    let mut var_p = 0.0;
    for (p, q) in src.iter().zip(dst) {
        let dp = p - mu_p;
        let dq = q - mu_q;
        cov += dp * dq.transpose();
        var_p += dp.norm_squared();
    }
    cov /= nf;
    var_p /= nf;

    if !(var_p > MIN_SOURCE_VARIANCE) {
        return None;
    }

    let svd = cov.svd(true, true);
    let u = svd.u?;
    let v = svd.v_t?.transpose();
    let sigma = svd.singular_values;

    let mut d = Matrix2::identity();
    if (v * u.transpose()).determinant() < 0.0 {
        let smallest = if sigma[0] <= sigma[1] { 0 } else { 1 };
        d[(smallest, smallest)] = -1.0;
    }

    let rotation = v * d * u.transpose();
    let scale = (sigma[0] * d[(0, 0)] + sigma[1] * d[(1, 1)]) / var_p;
    let translation = mu_q - rotation * mu_p * scale;

    let transform = SimilarityTransform {
        scale,
        rotation,
        translation,
    };
    let finite = scale.is_finite()
        && rotation.iter().all(|x| x.is_finite())
        && translation.iter().all(|x| x.is_finite());
    finite.then_some(transform)
}

/// Least-squares plane `z = a u + b v + c`.
///
/// Coordinates are centred before solving; a rank-deficient design
/// (fewer than 3 points or collinear points) gives `None`.
pub fn fit_plane(uv: &[Vector2<f64>], z: &[f64]) -> Option<PlaneFit> {
    let n = uv.len();
    if n < MIN_REFERENCE_POINTS || n != z.len() {
        return None;
    }
    let mu = uv.iter().sum::<Vector2<f64>>() / n as f64;

    let design = DMatrix::from_fn(n, 3, |r, c| match c {
        0 => uv[r].x - mu.x,
        1 => uv[r].y - mu.y,
        _ => 1.0,
    });
    let rhs = DVector::from_column_slice(z);

    let svd = design.svd(true, true);
    let max_sv = svd.singular_values.max();
    let min_sv = svd.singular_values.min();
    if !(max_sv > 0.0) || min_sv <= max_sv * PLANE_RANK_TOLERANCE {
        return None;
    }

    let solution = svd.solve(&rhs, 0.0).ok()?;
    let (a, b, c0) = (solution[0], solution[1], solution[2]);
    let plane = PlaneFit {
        a,
        b,
        c: c0 - a * mu.x - b * mu.y,
    };
    (plane.a.is_finite() && plane.b.is_finite() && plane.c.is_finite()).then_some(plane)
}

/// Valid reference observations with their slot index
fn valid_observations(slots: &[ReferenceSlot]) -> Vec<(usize, (f64, f64), [f64; 3])> {
    slots
        .iter()
        .take(MAX_REFERENCE_SLOTS)
        .enumerate()
        .filter_map(|(i, slot)| slot.observation().map(|(pixel, stage)| (i, pixel, stage)))
        .collect()
}

fn fit_candidate(refs: &[(usize, (f64, f64), [f64; 3])], flipped: bool) -> Option<CalibrationModel> {
    let sign = if flipped { -1.0 } else { 1.0 };
    let src: Vec<Vector2<f64>> = refs
        .iter()
        .map(|(_, (u, v), _)| Vector2::new(sign * u, *v))
        .collect();
    let dst: Vec<Vector2<f64>> = refs.iter().map(|(_, _, s)| Vector2::new(s[0], s[1])).collect();
    let z: Vec<f64> = refs.iter().map(|(_, _, s)| s[2]).collect();

    let similarity = fit_similarity(&src, &dst)?;
    let plane = fit_plane(&src, &z)?;

    let mut model = CalibrationModel {
        similarity,
        plane,
        flipped,
        rms: 0.0,
    };

    let sum_sq: f64 = refs
        .iter()
        .map(|(_, (u, v), obs)| {
            let pred = model.predict(*u, *v);
            (0..3).map(|k| (obs[k] - pred[k]).powi(2)).sum::<f64>()
        })
        .sum();
    model.rms = (sum_sq / refs.len() as f64).sqrt();

    model.rms.is_finite().then_some(model)
}

/// Fit a calibration model from the reference slots.
///
/// Only the first [`MAX_REFERENCE_SLOTS`] slots are considered.
pub fn solve(slots: &[ReferenceSlot], flip_mode: FlipMode) -> Result<CalibrationModel, CalibrationUnavailable> {
    let refs = valid_observations(slots);
    if refs.len() < MIN_REFERENCE_POINTS {
        return Err(CalibrationUnavailable::InsufficientReferences { valid: refs.len() });
    }

    let model = match flip_mode {
        FlipMode::Normal => fit_candidate(&refs, false),
        FlipMode::Flip => fit_candidate(&refs, true),
        FlipMode::Auto => match (fit_candidate(&refs, false), fit_candidate(&refs, true)) {
            (Some(normal), Some(flipped)) => {
                log::debug!("calibration rms: normal={:.6}, flipped={:.6}", normal.rms, flipped.rms);
                Some(if flipped.rms < normal.rms { flipped } else { normal })
            }
            (normal, flipped) => normal.or(flipped),
        },
    };

    model.ok_or(CalibrationUnavailable::Degenerate)
}

/// Calibrated stage position rendered for display and export
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageText {
    pub x: String,
    pub y: String,
    pub z: String,
}

/// Everything the host displays after a calibration pass
#[derive(Debug, Clone)]
pub struct CalibrationReport {
    pub outcome: Result<CalibrationModel, CalibrationUnavailable>,
    /// One entry per centroid; `None` when no model is available
    pub stage: Vec<Option<StageText>>,
    /// Decimals used for the X, Y, Z columns of `stage`
    pub stage_decimals: [usize; 3],
    pub residuals: Vec<Residual>,
    pub residual_report: ResidualReport,
}

impl CalibrationReport {
    pub fn model(&self) -> Option<&CalibrationModel> {
        self.outcome.as_ref().ok()
    }

    pub fn flipped(&self) -> Option<bool> {
        self.model().map(|m| m.flipped)
    }
}

/// Fit the model and apply it to all centroids and to the reference points
pub fn calibrate(
    slots: &[ReferenceSlot],
    centroids: &[CentroidRecord],
    flip_mode: FlipMode,
) -> CalibrationReport {
    let refs = valid_observations(slots);
    let typed: Vec<&StageObservation> = refs
        .iter()
        .filter_map(|(i, _, _)| slots[*i].stage.as_ref())
        .collect();
    let stage_decimals = [
        max_decimal_places(&typed.iter().map(|s| s.x.as_str()).collect::<Vec<_>>()),
        max_decimal_places(&typed.iter().map(|s| s.y.as_str()).collect::<Vec<_>>()),
        max_decimal_places(&typed.iter().map(|s| s.z.as_str()).collect::<Vec<_>>()),
    ];

    let outcome = solve(slots, flip_mode);
    let model = match &outcome {
        Ok(model) => *model,
        Err(reason) => {
            log::debug!("calibration unavailable: {}", reason);
            return CalibrationReport {
                outcome,
                stage: vec![None; centroids.len()],
                stage_decimals,
                residuals: Vec::new(),
                residual_report: ResidualReport::default(),
            };
        }
    };

    let stage = centroids
        .iter()
        .map(|c| {
            let p = model.predict(c.x, c.y);
            Some(StageText {
                x: format_fixed(p[0], stage_decimals[0]),
                y: format_fixed(p[1], stage_decimals[1]),
                z: format_fixed(p[2], stage_decimals[2]),
            })
        })
        .collect();

    let residuals: Vec<Residual> = refs
        .iter()
        .map(|(slot, (u, v), obs)| {
            let p = model.predict(*u, *v);
            Residual::new(*slot, obs[0] - p[0], obs[1] - p[1], obs[2] - p[2])
        })
        .collect();
    let residual_report = report_residuals(&residuals);

    CalibrationReport {
        outcome,
        stage,
        stage_decimals,
        residuals,
        residual_report,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn slot(u: f64, v: f64, x: &str, y: &str, z: &str) -> ReferenceSlot {
        ReferenceSlot::new((u, v), StageObservation::new(x, y, z))
    }

    #[test]
    fn similarity_recovers_quarter_turn() {
        let src = [Vector2::new(0.0, 0.0), Vector2::new(10.0, 0.0), Vector2::new(0.0, 10.0)];
        let dst = [Vector2::new(0.0, 0.0), Vector2::new(0.0, 10.0), Vector2::new(-10.0, 0.0)];
        let t = fit_similarity(&src, &dst).unwrap();
        assert_approx_eq!(t.scale, 1.0, 1e-9);
        assert_approx_eq!(t.angle_deg(), 90.0, 1e-9);
        assert_approx_eq!(t.rotation.determinant(), 1.0, 1e-9);
        assert_approx_eq!(t.translation.norm(), 0.0, 1e-9);
    }

    #[test]
    fn similarity_rejects_coincident_points() {
        let src = [Vector2::new(3.0, 3.0); 3];
        let dst = [Vector2::new(0.0, 0.0), Vector2::new(1.0, 0.0), Vector2::new(0.0, 1.0)];
        assert!(fit_similarity(&src, &dst).is_none());
    }

    #[test]
    fn reflected_target_still_gives_proper_rotation() {
        let src = [Vector2::new(0.0, 0.0), Vector2::new(4.0, 0.0), Vector2::new(0.0, 2.0)];
        let dst: Vec<Vector2<f64>> = src.iter().map(|p| Vector2::new(-p.x, p.y)).collect();
        let t = fit_similarity(&src, &dst).unwrap();
        assert_approx_eq!(t.rotation.determinant(), 1.0, 1e-9);
    }

    #[test]
    fn plane_recovers_coefficients() {
        let uv = [
            Vector2::new(10.0, 20.0),
            Vector2::new(300.0, 40.0),
            Vector2::new(120.0, 250.0),
            Vector2::new(500.0, 400.0),
        ];
        let z: Vec<f64> = uv.iter().map(|p| 0.01 * p.x - 0.02 * p.y + 3.5).collect();
        let plane = fit_plane(&uv, &z).unwrap();
        assert_approx_eq!(plane.a, 0.01, 1e-9);
        assert_approx_eq!(plane.b, -0.02, 1e-9);
        assert_approx_eq!(plane.c, 3.5, 1e-9);
    }

    #[test]
    fn plane_rejects_collinear_points() {
        let uv = [Vector2::new(0.0, 0.0), Vector2::new(1.0, 1.0), Vector2::new(2.0, 2.0)];
        assert!(fit_plane(&uv, &[0.0, 1.0, 2.0]).is_none());
    }

    #[test]
    fn invalid_slots_are_not_counted() {
        let slots = vec![
            slot(0.0, 0.0, "0", "0", "0"),
            slot(10.0, 0.0, "0", "10", ""),
            slot(0.0, 10.0, "-10", "abc", "0"),
            ReferenceSlot {
                pixel: None,
                stage: Some(StageObservation::new("1", "2", "3")),
            },
            slot(5.0, 5.0, "1", "2", "3"),
        ];
        assert_eq!(
            solve(&slots, FlipMode::Auto),
            Err(CalibrationUnavailable::InsufficientReferences { valid: 2 })
        );
    }

    #[test]
    fn collinear_references_are_degenerate() {
        let slots = vec![
            slot(0.0, 0.0, "0", "0", "0"),
            slot(10.0, 10.0, "1", "1", "0"),
            slot(20.0, 20.0, "2", "2", "0"),
        ];
        assert_eq!(solve(&slots, FlipMode::Normal), Err(CalibrationUnavailable::Degenerate));
        let report = calibrate(&slots, &[CentroidRecord { group_no: 1, x: 1.0, y: 2.0 }], FlipMode::Auto);
        assert_eq!(report.stage, vec![None]);
        assert!(report.residuals.is_empty());
    }

    #[test]
    fn forced_flip_is_honoured() {
        let slots = vec![
            slot(0.0, 0.0, "0", "0", "0"),
            slot(10.0, 0.0, "0", "10", "0"),
            slot(0.0, 10.0, "-10", "0", "0"),
        ];
        let normal = solve(&slots, FlipMode::Normal).unwrap();
        let flipped = solve(&slots, FlipMode::Flip).unwrap();
        assert!(!normal.flipped);
        assert!(flipped.flipped);
        assert!(flipped.rms > normal.rms);
        assert!(!solve(&slots, FlipMode::Auto).unwrap().flipped);

        // Pure 90 degree rotation about the origin, flat Z
        assert_approx_eq!(normal.similarity.scale, 1.0, 1e-9);
        assert_approx_eq!(normal.similarity.angle_deg(), 90.0, 1e-9);
        assert_approx_eq!(normal.similarity.translation.norm(), 0.0, 1e-9);
        assert_approx_eq!(normal.plane.a, 0.0, 1e-9);
        assert_approx_eq!(normal.plane.b, 0.0, 1e-9);
        assert_approx_eq!(normal.plane.c, 0.0, 1e-9);

        let report = calibrate(&slots, &[], FlipMode::Normal);
        assert_eq!(report.residuals.len(), 3);
        for residual in &report.residuals {
            assert!(residual.magnitude < 1e-9, "slot {}: {}", residual.slot, residual.magnitude);
        }
    }

    #[test]
    fn predictions_use_typed_precision() {
        let slots = vec![
            slot(0.0, 0.0, "0.00", "0", "1.5"),
            slot(10.0, 0.0, "10", "0", "1.5"),
            slot(0.0, 10.0, "0", "10", "1.5"),
        ];
        let centroids = [CentroidRecord { group_no: 1, x: 2.346, y: 7.0 }];
        let report = calibrate(&slots, &centroids, FlipMode::Normal);
        assert_eq!(report.stage_decimals, [2, 0, 1]);
        let stage = report.stage[0].as_ref().unwrap();
        assert_eq!(stage.x, "2.35");
        assert_eq!(stage.y, "7");
        assert_eq!(stage.z, "1.5");
        assert_eq!(report.residuals.len(), 3);
        assert_eq!(report.residual_report.rows[0].magnitude, "0");
    }
}
