//! Fitted emitter records.

use crate::image::PixelCoord;

/// Best-fit Gaussian parameters in physical units.
///
/// Positions and widths share the unit of the frame pixel size; `amp` and
/// `offset` are photons per pixel.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PsfParams {
    pub amp: f64,
    pub x0: f64,
    pub y0: f64,
    pub sigma_x: f64,
    pub sigma_y: f64,
    pub offset: f64,
}

/// Standard errors of the fitted parameters.
///
/// Widths are `None` for axial fits (they are derived from `z`), and `z0` is
/// `None` for width fits.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct FitStds {
    pub amp: f64,
    pub x0: f64,
    pub y0: f64,
    pub z0: Option<f64>,
    pub sigma_x: Option<f64>,
    pub sigma_y: Option<f64>,
    pub offset: f64,
}

/// One localized emitter.
///
/// Created by the PSF fitter; the localizers only add the nearest-neighbour
/// distance (and the error value derived from it), the candidate area, the
/// centroid distance and the iteration number.
#[derive(Clone, Debug, PartialEq)]
pub struct MoleculeLoc {
    /// Lateral position after wobble correction.
    pub x: f64,
    pub y: f64,
    /// Fitted depth; `None` for width fits.
    pub z: Option<f64>,
    /// Pixel containing `(x, y)`.
    pub pixel: PixelCoord,
    /// Position the fit started from.
    pub initial: (f64, f64),
    pub frame_index: usize,
    pub params: PsfParams,
    pub stds: FitStds,
    /// `data - model` over the fit window.
    pub residual: Vec<f64>,
    /// Integrated signal, `2 pi amp sigma_x sigma_y / pixel_size^2`.
    pub photons: f64,
    pub goodness: f64,
    pub error: f64,
    /// Fit region half-width in pixels.
    pub half_width: usize,
    /// Distance to the nearest other emitter of the frame.
    pub min_dist_xy: f64,
    /// Localizer iteration that accepted this emitter.
    pub iteration: usize,
    /// Candidate 3x3 area above the noise level.
    pub area: Option<usize>,
    /// Distance between the fitted center and the candidate weighted centroid.
    pub dist_fit_weighted_centroid: Option<f64>,
    /// Known start position minus fitted position (calibration frames).
    pub start_position_offset: Option<(f64, f64)>,
}

impl MoleculeLoc {
    /// Lateral position.
    pub fn coord(&self) -> (f64, f64) {
        (self.x, self.y)
    }

    /// Sum of squared residuals.
    pub fn ls_error(&self) -> f64 {
        self.residual.iter().map(|r| r * r).sum()
    }

    /// Number of pixels in the fit window.
    pub fn nr_of_pixels(&self) -> usize {
        self.residual.len()
    }

    /// Combined lateral standard error.
    pub fn fit_loc_std(&self) -> f64 {
        (self.stds.x0 * self.stds.x0 + self.stds.y0 * self.stds.y0).sqrt()
    }
}
