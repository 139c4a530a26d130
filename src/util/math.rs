//! Small geometric helpers shared by the fitter and the localizers.

/// Euclidean distance between two points in the xy plane.
#[inline]
pub(crate) fn dist_xy(a: (f64, f64), b: (f64, f64)) -> f64 {
    let dx = a.0 - b.0;
    let dy = a.1 - b.1;
    (dx * dx + dy * dy).sqrt()
}

/// Rotates `(dx, dy)` by the angle whose cosine and sine are given.
#[inline]
pub(crate) fn rotate(dx: f64, dy: f64, cos_phi: f64, sin_phi: f64) -> (f64, f64) {
    (cos_phi * dx - sin_phi * dy, sin_phi * dx + cos_phi * dy)
}

/// Returns `base^exp` for the product-of-powers rating functions.
///
/// An exponent of exactly zero always yields 1, so unused factors never
/// poison the product with NaN.
#[inline]
pub(crate) fn pow_factor(base: f64, exp: f64) -> f64 {
    if exp == 0.0 {
        1.0
    } else if exp == 1.0 {
        base
    } else {
        base.powf(exp)
    }
}
