//! Goodness and error scores for fitted emitters.
//!
//! Every score is a pure function of the scalar properties of a
//! `MoleculeLoc`. The built-in variants cover the commonly tuned formulas;
//! `PowerProduct` expresses any other product of property powers.

use crate::psf::MoleculeLoc;
use crate::util::math::pow_factor;

/// Scalar property of a fitted emitter usable in a rating formula.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum LocProperty {
    LsError,
    Photons,
    Amp,
    AbsZ,
    SigmaX,
    SigmaY,
    AbsOffset,
    FitStdAmp,
    FitStdX0,
    FitStdY0,
    FitStdZ0,
    FitStdOffset,
    MinFitDistXY,
    NrOfPixels,
    DistFitWeightedCentroid,
    Area,
}

impl LocProperty {
    /// Reads the property; unavailable values are NaN.
    pub fn value(self, loc: &MoleculeLoc) -> f64 {
        match self {
            LocProperty::LsError => loc.ls_error(),
            LocProperty::Photons => loc.photons,
            LocProperty::Amp => loc.params.amp,
            LocProperty::AbsZ => loc.z.map_or(f64::NAN, f64::abs),
            LocProperty::SigmaX => loc.params.sigma_x,
            LocProperty::SigmaY => loc.params.sigma_y,
            LocProperty::AbsOffset => loc.params.offset.abs(),
            LocProperty::FitStdAmp => loc.stds.amp,
            LocProperty::FitStdX0 => loc.stds.x0,
            LocProperty::FitStdY0 => loc.stds.y0,
            LocProperty::FitStdZ0 => loc.stds.z0.unwrap_or(f64::NAN),
            LocProperty::FitStdOffset => loc.stds.offset,
            LocProperty::MinFitDistXY => loc.min_dist_xy,
            LocProperty::NrOfPixels => loc.nr_of_pixels() as f64,
            LocProperty::DistFitWeightedCentroid => loc.dist_fit_weighted_centroid.unwrap_or(f64::NAN),
            LocProperty::Area => loc.area.map_or(f64::NAN, |a| a as f64),
        }
    }
}

fn power_product(loc: &MoleculeLoc, factors: &[(LocProperty, f64)]) -> f64 {
    factors
        .iter()
        .map(|&(prop, exp)| pow_factor(prop.value(loc), exp))
        .product()
}

/// Score used to rank candidate fits; larger is better.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum GoodnessFunction {
    /// `|amp| * nr_of_pixels / ls_error`.
    #[default]
    AmpPixelsOverLsError,
    /// `amp * fit_std_offset^-2.5`.
    AmpOverStdOffset,
    /// `amp^2 * |offset|^-0.5 * fit_std_offset^-1.5`.
    AmpOffsetOverStdOffset,
    /// `photons^0.5 * fit_std_amp^-1.5 * fit_std_y0^-2.5`.
    PhotonsOverStdAmpStdY,
    /// Product of `property^exponent` terms.
    PowerProduct(Vec<(LocProperty, f64)>),
}

impl GoodnessFunction {
    /// Evaluates the score.
    pub fn evaluate(&self, loc: &MoleculeLoc) -> f64 {
        match self {
            GoodnessFunction::AmpPixelsOverLsError => {
                loc.params.amp.abs() * loc.nr_of_pixels() as f64 / loc.ls_error()
            }
            GoodnessFunction::AmpOverStdOffset => power_product(
                loc,
                &[(LocProperty::Amp, 1.0), (LocProperty::FitStdOffset, -2.5)],
            ),
            GoodnessFunction::AmpOffsetOverStdOffset => power_product(
                loc,
                &[
                    (LocProperty::Amp, 2.0),
                    (LocProperty::AbsOffset, -0.5),
                    (LocProperty::FitStdOffset, -1.5),
                ],
            ),
            GoodnessFunction::PhotonsOverStdAmpStdY => power_product(
                loc,
                &[
                    (LocProperty::Photons, 0.5),
                    (LocProperty::FitStdAmp, -1.5),
                    (LocProperty::FitStdY0, -2.5),
                ],
            ),
            GoodnessFunction::PowerProduct(factors) => power_product(loc, factors),
        }
    }
}

/// Estimate of how likely a fit is to be spurious; larger is worse.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum ErrorFunction {
    /// `photons^0.5 * fit_std_x0^2 * min_fit_dist_xy^-1.5`.
    #[default]
    PhotonsStdXMinDist,
    /// `photons^-1.5 * fit_std_amp^1.5 * fit_std_offset^0.5`.
    PhotonsStdAmpStdOffset,
    /// Product of `property^exponent` terms.
    PowerProduct(Vec<(LocProperty, f64)>),
}

impl ErrorFunction {
    /// Evaluates the score.
    pub fn evaluate(&self, loc: &MoleculeLoc) -> f64 {
        match self {
            ErrorFunction::PhotonsStdXMinDist => power_product(
                loc,
                &[
                    (LocProperty::Photons, 0.5),
                    (LocProperty::FitStdX0, 2.0),
                    (LocProperty::MinFitDistXY, -1.5),
                ],
            ),
            ErrorFunction::PhotonsStdAmpStdOffset => power_product(
                loc,
                &[
                    (LocProperty::Photons, -1.5),
                    (LocProperty::FitStdAmp, 1.5),
                    (LocProperty::FitStdOffset, 0.5),
                ],
            ),
            ErrorFunction::PowerProduct(factors) => power_product(loc, factors),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ErrorFunction, GoodnessFunction, LocProperty};
    use crate::image::PixelCoord;
    use crate::psf::{FitStds, MoleculeLoc, PsfParams};

    fn loc() -> MoleculeLoc {
        MoleculeLoc {
            x: 1e-6,
            y: 2e-6,
            z: None,
            pixel: PixelCoord::new(9, 19),
            initial: (1e-6, 2e-6),
            frame_index: 0,
            params: PsfParams {
                amp: 200.0,
                x0: 1e-6,
                y0: 2e-6,
                sigma_x: 150e-9,
                sigma_y: 150e-9,
                offset: -4.0,
            },
            stds: FitStds {
                amp: 4.0,
                x0: 5e-9,
                y0: 5e-9,
                z0: None,
                sigma_x: Some(2e-9),
                sigma_y: Some(2e-9),
                offset: 0.5,
            },
            residual: vec![1.0, -1.0, 2.0, 0.0],
            photons: 1600.0,
            goodness: 0.0,
            error: 0.0,
            half_width: 3,
            min_dist_xy: 4e-6,
            iteration: 0,
            area: Some(9),
            dist_fit_weighted_centroid: None,
            start_position_offset: None,
        }
    }

    #[test]
    fn default_goodness_uses_ls_error() {
        let l = loc();
        let g = GoodnessFunction::default().evaluate(&l);
        assert!((g - 200.0 * 4.0 / 6.0).abs() < 1e-12);
    }

    #[test]
    fn builtin_matches_equivalent_power_product() {
        let l = loc();
        let builtin = GoodnessFunction::AmpOffsetOverStdOffset.evaluate(&l);
        let custom = GoodnessFunction::PowerProduct(vec![
            (LocProperty::Amp, 2.0),
            (LocProperty::AbsOffset, -0.5),
            (LocProperty::FitStdOffset, -1.5),
        ])
        .evaluate(&l);
        assert!((builtin - custom).abs() < 1e-9 * builtin.abs());
        assert!((builtin - 200.0f64.powi(2) * 0.5 * 0.5f64.powf(-1.5)).abs() < 1e-6);
    }

    #[test]
    fn error_function_depends_on_neighbour_distance() {
        let mut l = loc();
        let far = ErrorFunction::default().evaluate(&l);
        l.min_dist_xy = 1e-6;
        let near = ErrorFunction::default().evaluate(&l);
        assert!(near > far);
    }

    #[test]
    fn missing_property_yields_nan() {
        let l = loc();
        let g = GoodnessFunction::PowerProduct(vec![(LocProperty::DistFitWeightedCentroid, 1.0)]).evaluate(&l);
        assert!(g.is_nan());
    }
}
