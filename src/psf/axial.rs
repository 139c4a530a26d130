//! Axial calibration curves.
//!
//! Each calibrated quantity (PSF widths and the lateral wobble offsets) is a
//! function of the emitter depth `z`, tabulated separately for every fit
//! half-width. Samples taken at the same `z` are averaged and the means are
//! joined by a weighted cubic smoothing spline with natural end conditions.
//!
//! The smoothing factor follows the usual "residual budget" convention: the
//! spline is the smoothest curve whose weighted squared residual
//! `sum(((mean_i - g(z_i)) / std_i)^2)` does not exceed `smoothing`. A factor
//! of zero interpolates the means exactly. Outside the sampled depth range the
//! curve continues linearly.

use std::collections::BTreeMap;

use crate::psf::MoleculeLoc;
use crate::refine::linalg::PentaDiagonal;
use crate::util::{SmolPhotError, SmolPhotResult};

/// Standard deviation assumed for every sample when spreads are not used.
pub const DEFAULT_SAMPLE_STD: f64 = 4e-8;

const LOG_ALPHA_MIN: f64 = -80.0;
const LOG_ALPHA_MAX: f64 = 80.0;
const ALPHA_BISECTIONS: usize = 200;

/// Natural cubic spline evaluated from knot values and second derivatives.
#[derive(Clone, Debug, PartialEq)]
pub struct SmoothingSpline {
    knots: Vec<f64>,
    values: Vec<f64>,
    second: Vec<f64>,
}

impl SmoothingSpline {
    /// Fits a smoothing spline through `(knots[i], means[i])`.
    ///
    /// `knots` must be strictly increasing and `stds` positive.
    pub fn fit(knots: &[f64], means: &[f64], stds: &[f64], smoothing: f64) -> SmolPhotResult<Self> {
        let n = knots.len();
        if n == 0 || means.len() != n || stds.len() != n {
            return Err(SmolPhotError::InvalidConfig {
                reason: "spline needs matching, non-empty knots, means and stds",
            });
        }
        if knots.windows(2).any(|w| !(w[1] > w[0])) {
            return Err(SmolPhotError::InvalidConfig {
                reason: "spline knots must be strictly increasing",
            });
        }
        if stds.iter().any(|s| !(*s > 0.0)) {
            return Err(SmolPhotError::InvalidConfig {
                reason: "spline sample stds must be positive",
            });
        }
        if !(smoothing >= 0.0) {
            return Err(SmolPhotError::InvalidConfig {
                reason: "spline smoothing must be non-negative",
            });
        }

        if n < 3 || smoothing == 0.0 {
            return Self::solve_penalized(knots, means, stds, 0.0).ok_or(SmolPhotError::InvalidConfig {
                reason: "spline system is singular",
            });
        }

        // The weighted residual grows monotonically with the penalty weight;
        // bisect on its logarithm for the largest weight within budget.
        let residual_at = |log_alpha: f64| -> Option<(f64, SmoothingSpline)> {
            let spline = Self::solve_penalized(knots, means, stds, 10f64.powf(log_alpha))?;
            let r = spline.weighted_residual(means, stds);
            Some((r, spline))
        };

        let (r_max, stiff) = residual_at(LOG_ALPHA_MAX).ok_or(SmolPhotError::InvalidConfig {
            reason: "spline system is singular",
        })?;
        if r_max <= smoothing {
            return Ok(stiff);
        }

        let mut lo = LOG_ALPHA_MIN;
        let mut hi = LOG_ALPHA_MAX;
        let mut best = Self::solve_penalized(knots, means, stds, 0.0).ok_or(SmolPhotError::InvalidConfig {
            reason: "spline system is singular",
        })?;
        for _ in 0..ALPHA_BISECTIONS {
            let mid = 0.5 * (lo + hi);
            match residual_at(mid) {
                Some((r, spline)) if r <= smoothing => {
                    best = spline;
                    lo = mid;
                }
                _ => hi = mid,
            }
            if hi - lo < 1e-9 {
                break;
            }
        }
        Ok(best)
    }

    /// Reinsch solution for penalty weight `alpha`.
    fn solve_penalized(knots: &[f64], y: &[f64], stds: &[f64], alpha: f64) -> Option<Self> {
        let n = knots.len();
        if n < 3 {
            return Some(Self {
                knots: knots.to_vec(),
                values: y.to_vec(),
                second: vec![0.0; n],
            });
        }
        let m = n - 2;
        let h: Vec<f64> = knots.windows(2).map(|w| w[1] - w[0]).collect();
        let variance: Vec<f64> = stds.iter().map(|s| s * s).collect();

        // Column k of Q (interior knot j = k + 1) has entries in rows k..=k+2.
        let q_col = |k: usize| -> [f64; 3] {
            let (h0, h1) = (h[k], h[k + 1]);
            [1.0 / h0, -1.0 / h0 - 1.0 / h1, 1.0 / h1]
        };

        let mut a = PentaDiagonal::zeros(m);
        let mut rhs = vec![0.0; m];
        for k in 0..m {
            a.add(k, k, (h[k] + h[k + 1]) / 3.0);
            if k + 1 < m {
                a.add(k, k + 1, h[k + 1] / 6.0);
            }
            rhs[k] = (y[k + 2] - y[k + 1]) / h[k + 1] - (y[k + 1] - y[k]) / h[k];
        }
        if alpha > 0.0 {
            // alpha * Q^T D Q with D = diag(variance); row i of Q touches
            // columns i-2, i-1 and i.
            for i in 0..n {
                let lo = i.saturating_sub(2);
                let hi = i.min(m - 1);
                if lo > hi {
                    continue;
                }
                for k in lo..=hi {
                    let qk = q_col(k)[i - k];
                    for l in k..=hi {
                        let ql = q_col(l)[i - l];
                        a.add(k, l, alpha * variance[i] * qk * ql);
                    }
                }
            }
        }
        let gamma = a.solve(&rhs)?;

        let mut values = y.to_vec();
        if alpha > 0.0 {
            for (k, &g) in gamma.iter().enumerate() {
                let q = q_col(k);
                for (r, &qv) in q.iter().enumerate() {
                    let i = k + r;
                    values[i] -= alpha * variance[i] * qv * g;
                }
            }
        }
        let mut second = vec![0.0; n];
        second[1..=m].copy_from_slice(&gamma);

        let spline = Self {
            knots: knots.to_vec(),
            values,
            second,
        };
        spline.values.iter().all(|v| v.is_finite()).then_some(spline)
    }

    fn weighted_residual(&self, means: &[f64], stds: &[f64]) -> f64 {
        self.values
            .iter()
            .zip(means.iter())
            .zip(stds.iter())
            .map(|((g, y), s)| {
                let r = (y - g) / s;
                r * r
            })
            .sum()
    }

    /// Depth range covered by the knots.
    pub fn domain(&self) -> (f64, f64) {
        (self.knots[0], self.knots[self.knots.len() - 1])
    }

    /// Evaluates the spline at `z`.
    pub fn value(&self, z: f64) -> f64 {
        self.value_and_derivative(z).0
    }

    /// Evaluates the spline and its first derivative at `z`.
    pub fn value_and_derivative(&self, z: f64) -> (f64, f64) {
        let n = self.knots.len();
        if n == 1 {
            return (self.values[0], 0.0);
        }
        let (first, last) = self.domain();
        if z < first {
            let (v, d) = self.segment(0, first);
            return (v + d * (z - first), d);
        }
        if z > last {
            let (v, d) = self.segment(n - 2, last);
            return (v + d * (z - last), d);
        }
        let seg = match self.knots.partition_point(|&k| k <= z) {
            0 => 0,
            p => (p - 1).min(n - 2),
        };
        self.segment(seg, z)
    }

    fn segment(&self, j: usize, z: f64) -> (f64, f64) {
        let (t0, t1) = (self.knots[j], self.knots[j + 1]);
        let h = t1 - t0;
        let (m0, m1) = (self.second[j], self.second[j + 1]);
        let (g0, g1) = (self.values[j], self.values[j + 1]);
        let a = t1 - z;
        let b = z - t0;
        let c0 = g0 / h - m0 * h / 6.0;
        let c1 = g1 / h - m1 * h / 6.0;
        let value = (a * a * a * m0 + b * b * b * m1) / (6.0 * h) + c0 * a + c1 * b;
        let deriv = (-a * a * m0 + b * b * m1) / (2.0 * h) - c0 + c1;
        (value, deriv)
    }
}

/// One calibrated quantity, with a curve per fit half-width.
#[derive(Clone, Debug, PartialEq)]
pub struct AxialCurve {
    /// Sorted by half-width; never empty.
    curves: Vec<(usize, SmoothingSpline)>,
}

impl AxialCurve {
    /// Builds the curve from `(half_width, z, value)` samples.
    ///
    /// Returns `Ok(None)` if there are no finite samples.
    pub fn from_samples(
        samples: &[(usize, f64, f64)],
        smoothing: f64,
        use_stds: bool,
    ) -> SmolPhotResult<Option<Self>> {
        let mut grouped: BTreeMap<usize, Vec<(f64, f64)>> = BTreeMap::new();
        for &(half_width, z, value) in samples {
            if z.is_finite() && value.is_finite() {
                grouped.entry(half_width).or_default().push((z, value));
            }
        }
        if grouped.is_empty() {
            return Ok(None);
        }

        let mut curves = Vec::with_capacity(grouped.len());
        for (half_width, mut points) in grouped {
            points.sort_by(|a, b| a.0.total_cmp(&b.0));
            let mut zs = Vec::new();
            let mut means = Vec::new();
            let mut stds = Vec::new();
            for group in points.chunk_by(|a, b| a.0 == b.0) {
                let count = group.len() as f64;
                let mean = group.iter().map(|p| p.1).sum::<f64>() / count;
                let var = group.iter().map(|p| (p.1 - mean) * (p.1 - mean)).sum::<f64>() / count;
                zs.push(group[0].0);
                means.push(mean);
                stds.push(if use_stds { var.sqrt() } else { DEFAULT_SAMPLE_STD });
            }
            let std_max = stds.iter().copied().fold(0.0f64, f64::max);
            let fill = if std_max == 0.0 { DEFAULT_SAMPLE_STD } else { std_max };
            for s in stds.iter_mut() {
                if *s == 0.0 {
                    *s = fill;
                }
            }
            curves.push((half_width, SmoothingSpline::fit(&zs, &means, &stds, smoothing)?));
        }
        Ok(Some(Self { curves }))
    }

    /// Curve for `half_width`, clamped into the calibrated half-width range.
    ///
    /// A half-width inside the range without its own curve uses the nearest
    /// smaller calibrated half-width.
    pub fn curve(&self, half_width: usize) -> &SmoothingSpline {
        let idx = self.curves.partition_point(|(hw, _)| *hw <= half_width);
        &self.curves[idx.saturating_sub(1)].1
    }

    /// Interpolated value at depth `z` for `half_width`.
    pub fn value(&self, z: f64, half_width: usize) -> f64 {
        self.curve(half_width).value(z)
    }

    /// Half-widths with calibration data.
    pub fn half_widths(&self) -> impl Iterator<Item = usize> + '_ {
        self.curves.iter().map(|(hw, _)| *hw)
    }
}

/// Smoothing factors for the four calibrated quantities.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct AxialSmoothing {
    pub sigma_x: f64,
    pub sigma_y: f64,
    pub dx: f64,
    pub dy: f64,
}

impl AxialSmoothing {
    /// Validates the smoothing factors.
    pub fn validate(&self) -> SmolPhotResult<()> {
        if [self.sigma_x, self.sigma_y, self.dx, self.dy]
            .iter()
            .any(|s| !(*s >= 0.0 && s.is_finite()))
        {
            return Err(SmolPhotError::InvalidConfig {
                reason: "axial smoothing factors must be finite and non-negative",
            });
        }
        Ok(())
    }
}

/// Depth-dependent PSF widths and wobble offsets.
#[derive(Clone, Debug, PartialEq)]
pub struct AxialCalibration {
    sigma_x: AxialCurve,
    sigma_y: AxialCurve,
    wobble: Option<(AxialCurve, AxialCurve)>,
}

impl AxialCalibration {
    /// Builds the calibration from fits on frames at known depths.
    ///
    /// Each entry pairs a stage depth with the emitters fitted in `Sigma`
    /// mode on that frame. Wobble curves are built from the emitters that
    /// carry a start-position offset; without any, wobble correction is a
    /// no-op. Returns `Ok(None)` when there are no samples.
    pub fn from_points(
        points: &[(f64, Vec<MoleculeLoc>)],
        smoothing: AxialSmoothing,
        use_stds: bool,
    ) -> SmolPhotResult<Option<Self>> {
        smoothing.validate()?;
        let mut sx = Vec::new();
        let mut sy = Vec::new();
        let mut dx = Vec::new();
        let mut dy = Vec::new();
        for (z, locs) in points {
            for loc in locs {
                sx.push((loc.half_width, *z, loc.params.sigma_x));
                sy.push((loc.half_width, *z, loc.params.sigma_y));
                if let Some((ox, oy)) = loc.start_position_offset {
                    dx.push((loc.half_width, *z, ox));
                    dy.push((loc.half_width, *z, oy));
                }
            }
        }

        let Some(sigma_x) = AxialCurve::from_samples(&sx, smoothing.sigma_x, use_stds)? else {
            return Ok(None);
        };
        let Some(sigma_y) = AxialCurve::from_samples(&sy, smoothing.sigma_y, use_stds)? else {
            return Ok(None);
        };
        let wobble = match (
            AxialCurve::from_samples(&dx, smoothing.dx, use_stds)?,
            AxialCurve::from_samples(&dy, smoothing.dy, use_stds)?,
        ) {
            (Some(cx), Some(cy)) => Some((cx, cy)),
            _ => None,
        };
        Ok(Some(Self {
            sigma_x,
            sigma_y,
            wobble,
        }))
    }

    /// Width curve along x.
    pub fn sigma_x(&self) -> &AxialCurve {
        &self.sigma_x
    }

    /// Width curve along y.
    pub fn sigma_y(&self) -> &AxialCurve {
        &self.sigma_y
    }

    /// Lateral wobble `(dx, dy)` at depth `z`, zero when uncalibrated.
    pub fn wobble(&self, z: f64, half_width: usize) -> (f64, f64) {
        match &self.wobble {
            Some((cx, cy)) => (cx.value(z, half_width), cy.value(z, half_width)),
            None => (0.0, 0.0),
        }
    }
}
