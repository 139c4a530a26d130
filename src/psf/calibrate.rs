//! Axial calibration from a z-stack of frames with known emitter positions.

use crate::image::Frame;
use crate::psf::{FitMode, GaussianPsf, MoleculeLoc};
use crate::trace::trace_event;
use crate::util::{SmolPhotError, SmolPhotResult};

/// Settings for [`calibrate_from_positions`].
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CalibrationConfig {
    /// Smallest fit half-width to calibrate.
    pub min_half_width: usize,
    /// Largest fit half-width to calibrate.
    pub max_half_width: usize,
    /// Fits farther than this from the known position are dropped.
    pub initial_max_dist: f64,
    /// Weight curve samples by their spread.
    pub use_stds: bool,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            min_half_width: 3,
            max_half_width: 5,
            initial_max_dist: 300e-9,
            use_stds: true,
        }
    }
}

impl CalibrationConfig {
    /// Validates the half-width range and distance.
    pub fn validate(&self) -> SmolPhotResult<()> {
        if self.min_half_width == 0 || self.min_half_width > self.max_half_width {
            return Err(SmolPhotError::InvalidHalfWidthRange {
                min: self.min_half_width,
                max: self.max_half_width,
            });
        }
        if !(self.initial_max_dist > 0.0) {
            return Err(SmolPhotError::InvalidConfig {
                reason: "initial_max_dist must be positive",
            });
        }
        Ok(())
    }
}

/// Builds the axial calibration of `psf` from frames at known depths.
///
/// Every frame whose stage depth lies inside the PSF axial range is fitted
/// in `Sigma` mode at each known start position and each half-width of the
/// configured range. The start-position offsets of the fits become the
/// wobble samples. Frames without a depth are skipped.
///
/// Returns the number of fits that entered the calibration.
pub fn calibrate_from_positions(
    psf: &mut GaussianPsf,
    frames: &[Frame],
    start_positions: &[(f64, f64)],
    config: &CalibrationConfig,
) -> SmolPhotResult<usize> {
    config.validate()?;
    let range = psf.config().axial_range;

    let mut points: Vec<(f64, Vec<MoleculeLoc>)> = Vec::new();
    for frame in frames {
        let Some(z) = frame.z() else {
            continue;
        };
        if !range.contains(z) {
            continue;
        }
        let mut locs = Vec::new();
        for half_width in config.min_half_width..=config.max_half_width {
            for &start in start_positions {
                let Some(mut loc) = psf.fit(frame, start, half_width, FitMode::Sigma, config.initial_max_dist)
                else {
                    continue;
                };
                loc.start_position_offset = Some((start.0 - loc.x, start.1 - loc.y));
                locs.push(loc);
            }
        }
        if !locs.is_empty() {
            points.push((z, locs));
        }
    }

    let count = points.iter().map(|(_, locs)| locs.len()).sum();
    trace_event!("axial_calibration", frames = points.len(), fits = count);
    psf.set_axial_calib_points(points, config.use_stds)?;
    Ok(count)
}
