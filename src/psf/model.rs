//! Residual models for the Gaussian PSF fits.
//!
//! All models work in pixel units: positions and widths are divided by the
//! pixel size before fitting and scaled back afterwards.

use crate::psf::axial::SmoothingSpline;
use crate::refine::LmModel;
use crate::util::math::rotate;

/// Widths below this (in pixels) are clamped to keep the exponent finite.
pub(crate) const MIN_SIGMA_PX: f64 = 1e-3;

#[inline]
fn clamp_sigma(s: f64) -> f64 {
    s.abs().max(MIN_SIGMA_PX)
}

/// Rotated offsets and the Gaussian envelope at one sample.
#[inline]
#[allow(clippy::too_many_arguments)]
fn envelope(
    x: f64,
    y: f64,
    x0: f64,
    y0: f64,
    sx: f64,
    sy: f64,
    cos_phi: f64,
    sin_phi: f64,
) -> (f64, f64, f64) {
    let (u, v) = rotate(x - x0, y - y0, cos_phi, sin_phi);
    let e = (-(u * u) / (2.0 * sx * sx) - (v * v) / (2.0 * sy * sy)).exp();
    (e, u, v)
}

/// Free-width elliptical Gaussian: `[amp, x0, y0, sigma_x, sigma_y, offset]`.
pub(crate) struct EllipticalModel {
    pub cos_phi: f64,
    pub sin_phi: f64,
}

impl LmModel<6> for EllipticalModel {
    fn evaluate(&self, x: f64, y: f64, p: &[f64; 6]) -> f64 {
        let (e, _, _) = envelope(x, y, p[1], p[2], clamp_sigma(p[3]), clamp_sigma(p[4]), self.cos_phi, self.sin_phi);
        p[0] * e + p[5]
    }

    fn jacobian_row(&self, x: f64, y: f64, p: &[f64; 6]) -> [f64; 6] {
        let (sx, sy) = (clamp_sigma(p[3]), clamp_sigma(p[4]));
        let (c, s) = (self.cos_phi, self.sin_phi);
        let (e, u, v) = envelope(x, y, p[1], p[2], sx, sy, c, s);
        let ae = p[0] * e;
        let (ux, vy) = (u / (sx * sx), v / (sy * sy));
        [
            e,
            ae * (ux * c + vy * s),
            ae * (-ux * s + vy * c),
            ae * u * u / (sx * sx * sx),
            ae * v * v / (sy * sy * sy),
            1.0,
        ]
    }

    fn constrain(&self, p: &mut [f64; 6]) {
        p[3] = clamp_sigma(p[3]);
        p[4] = clamp_sigma(p[4]);
    }
}

/// Round Gaussian with one shared width: `[amp, x0, y0, sigma, offset]`.
pub(crate) struct SymmetricModel;

impl LmModel<5> for SymmetricModel {
    fn evaluate(&self, x: f64, y: f64, p: &[f64; 5]) -> f64 {
        let sigma = clamp_sigma(p[3]);
        let (e, _, _) = envelope(x, y, p[1], p[2], sigma, sigma, 1.0, 0.0);
        p[0] * e + p[4]
    }

    fn jacobian_row(&self, x: f64, y: f64, p: &[f64; 5]) -> [f64; 5] {
        let sigma = clamp_sigma(p[3]);
        let (e, dx, dy) = envelope(x, y, p[1], p[2], sigma, sigma, 1.0, 0.0);
        let ae = p[0] * e;
        let s2 = sigma * sigma;
        [e, ae * dx / s2, ae * dy / s2, ae * (dx * dx + dy * dy) / (s2 * sigma), 1.0]
    }

    fn constrain(&self, p: &mut [f64; 5]) {
        p[3] = clamp_sigma(p[3]);
    }
}

/// Width-from-depth Gaussian: `[amp, x0, y0, z, offset]`.
///
/// `z` is expressed in pixel units like the lateral coordinates; the widths
/// come from the calibration curves of the fit half-width.
pub(crate) struct AxialModel<'a> {
    pub cos_phi: f64,
    pub sin_phi: f64,
    pub pixel_size: f64,
    pub sigma_x: &'a SmoothingSpline,
    /// `None` for symmetric PSFs, which reuse `sigma_x` for both axes.
    pub sigma_y: Option<&'a SmoothingSpline>,
}

impl AxialModel<'_> {
    /// Widths in pixels and their derivatives with respect to `z` in pixels.
    #[inline]
    fn widths(&self, z_px: f64) -> (f64, f64, f64, f64) {
        let z = z_px * self.pixel_size;
        let (sx, dsx) = self.sigma_x.value_and_derivative(z);
        let (sy, dsy) = match self.sigma_y {
            Some(curve) => curve.value_and_derivative(z),
            None => (sx, dsx),
        };
        (
            clamp_sigma(sx / self.pixel_size),
            clamp_sigma(sy / self.pixel_size),
            dsx,
            dsy,
        )
    }

    /// Widths in pixel units at `z_px`.
    pub(crate) fn sigmas_px(&self, z_px: f64) -> (f64, f64) {
        let (sx, sy, _, _) = self.widths(z_px);
        (sx, sy)
    }
}

impl LmModel<5> for AxialModel<'_> {
    fn evaluate(&self, x: f64, y: f64, p: &[f64; 5]) -> f64 {
        let (sx, sy, _, _) = self.widths(p[3]);
        let (e, _, _) = envelope(x, y, p[1], p[2], sx, sy, self.cos_phi, self.sin_phi);
        p[0] * e + p[4]
    }

    fn jacobian_row(&self, x: f64, y: f64, p: &[f64; 5]) -> [f64; 5] {
        let (sx, sy, dsx, dsy) = self.widths(p[3]);
        let (c, s) = (self.cos_phi, self.sin_phi);
        let (e, u, v) = envelope(x, y, p[1], p[2], sx, sy, c, s);
        let ae = p[0] * e;
        let (ux, vy) = (u / (sx * sx), v / (sy * sy));
        let dz = ae * (u * u / (sx * sx * sx) * dsx + v * v / (sy * sy * sy) * dsy);
        [e, ae * (ux * c + vy * s), ae * (-ux * s + vy * c), dz, 1.0]
    }
}

#[cfg(test)]
mod tests {
    use super::{EllipticalModel, SymmetricModel};
    use crate::refine::LmModel;

    fn numeric_jacobian<const N: usize, M: LmModel<N>>(m: &M, x: f64, y: f64, p: &[f64; N]) -> [f64; N] {
        let mut out = [0.0; N];
        for i in 0..N {
            let h = 1e-6 * p[i].abs().max(1.0);
            let mut hi = *p;
            let mut lo = *p;
            hi[i] += h;
            lo[i] -= h;
            out[i] = (m.evaluate(x, y, &hi) - m.evaluate(x, y, &lo)) / (2.0 * h);
        }
        out
    }

    #[test]
    fn elliptical_jacobian_matches_finite_differences() {
        let (s, c) = 0.3f64.sin_cos();
        let model = EllipticalModel { cos_phi: c, sin_phi: s };
        let p = [120.0, 4.3, 3.8, 1.4, 2.1, 7.0];
        for &(x, y) in &[(3.5, 3.5), (5.5, 2.5), (4.5, 6.5)] {
            let a = model.jacobian_row(x, y, &p);
            let n = numeric_jacobian(&model, x, y, &p);
            for i in 0..6 {
                assert!((a[i] - n[i]).abs() < 1e-5 * (1.0 + n[i].abs()), "param {i}");
            }
        }
    }

    #[test]
    fn symmetric_jacobian_matches_finite_differences() {
        let p = [80.0, 2.2, 2.9, 1.3, -1.0];
        for &(x, y) in &[(1.5, 2.5), (3.5, 4.5)] {
            let a = SymmetricModel.jacobian_row(x, y, &p);
            let n = numeric_jacobian(&SymmetricModel, x, y, &p);
            for i in 0..5 {
                assert!((a[i] - n[i]).abs() < 1e-5 * (1.0 + n[i].abs()), "param {i}");
            }
        }
    }
}
