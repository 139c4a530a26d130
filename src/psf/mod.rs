//! Gaussian PSF model and least-squares fitter.
//!
//! The PSF is a 2D Gaussian whose axes may be tilted by a fixed angle `phi`:
//!
//! ```text
//! I(x, y) = amp * exp(-x'^2 / (2 sx^2) - y'^2 / (2 sy^2)) + offset
//! x' = cos(phi) dx - sin(phi) dy,  y' = sin(phi) dx + cos(phi) dy
//! ```
//!
//! In [`FitMode::Sigma`] both widths are free parameters. In [`FitMode::Z`]
//! the widths follow the depth `z` through the axial calibration curves of
//! the fit half-width, and `z` is fitted instead.
//!
//! Fits never raise errors: a numerical failure or a failed post-fit check
//! yields `None`.

pub mod axial;
pub mod calibrate;
mod loc;
pub(crate) mod model;
pub mod rating;

use crate::image::{FitWindow, Frame, PixelCoord};
use crate::refine::lm::{covariance, optimize, residuals, Samples};
use crate::refine::{LmConfig, LmModel};
use crate::trace::trace_debug;
use crate::util::math::dist_xy;
use crate::util::{SmolPhotError, SmolPhotResult};

pub use axial::{AxialCalibration, AxialCurve, AxialSmoothing, SmoothingSpline};
pub use calibrate::{calibrate_from_positions, CalibrationConfig};
pub use loc::{FitStds, MoleculeLoc, PsfParams};
pub use rating::{ErrorFunction, GoodnessFunction, LocProperty};

use model::{AxialModel, EllipticalModel, SymmetricModel};

/// Which parameters the fit solves for.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum FitMode {
    /// Free widths; no depth.
    Sigma,
    /// Depth through the axial calibration; widths are derived.
    Z,
}

/// Calibrated depth range; fits outside it are rejected by the localizers.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct AxialRange {
    pub from: f64,
    pub to: f64,
}

impl Default for AxialRange {
    fn default() -> Self {
        Self {
            from: -1000e-9,
            to: 1000e-9,
        }
    }
}

impl AxialRange {
    /// Returns true if `z` lies within the closed range.
    pub fn contains(&self, z: f64) -> bool {
        z >= self.from && z <= self.to
    }
}

/// Warm-start parameters in physical units.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum InitialGuess {
    Sigma {
        amp: f64,
        x0: f64,
        y0: f64,
        sigma_x: f64,
        sigma_y: f64,
        offset: f64,
    },
    Axial {
        amp: f64,
        x0: f64,
        y0: f64,
        z0: f64,
        offset: f64,
    },
}

/// Configuration for [`GaussianPsf`].
#[derive(Clone, Debug, PartialEq)]
pub struct PsfConfig {
    /// Fit one shared width instead of independent x/y widths.
    pub symmetric: bool,
    /// Tilt of the PSF axes in radians.
    pub phi: f64,
    /// Starting width for `Sigma` fits.
    pub initial_sigma: f64,
    /// Starting background level.
    pub initial_offset: f64,
    /// Starting depth for `Z` fits.
    pub initial_z: f64,
    /// How many times a fit may be re-centred on the pixel holding its peak.
    pub shift_max_iterations: usize,
    /// Add the calibrated lateral wobble to `Z` fits.
    pub wobble_correction: bool,
    /// Smoothing of the axial calibration curves.
    pub smoothing: AxialSmoothing,
    /// Depth range covered by the calibration.
    pub axial_range: AxialRange,
    pub goodness: GoodnessFunction,
    pub error: ErrorFunction,
    pub solver: LmConfig,
}

impl Default for PsfConfig {
    fn default() -> Self {
        Self {
            symmetric: false,
            phi: 0.0,
            initial_sigma: 300e-9,
            initial_offset: 0.0,
            initial_z: 0.0,
            shift_max_iterations: 0,
            wobble_correction: true,
            smoothing: AxialSmoothing::default(),
            axial_range: AxialRange::default(),
            goodness: GoodnessFunction::default(),
            error: ErrorFunction::default(),
            solver: LmConfig::default(),
        }
    }
}

impl PsfConfig {
    /// Validates the configuration values.
    pub fn validate(&self) -> SmolPhotResult<()> {
        if !self.phi.is_finite() {
            return Err(SmolPhotError::InvalidConfig {
                reason: "phi must be finite",
            });
        }
        if !(self.initial_sigma > 0.0 && self.initial_sigma.is_finite()) {
            return Err(SmolPhotError::InvalidConfig {
                reason: "initial_sigma must be positive",
            });
        }
        if !self.initial_offset.is_finite() || !self.initial_z.is_finite() {
            return Err(SmolPhotError::InvalidConfig {
                reason: "initial_offset and initial_z must be finite",
            });
        }
        if !(self.axial_range.from <= self.axial_range.to) {
            return Err(SmolPhotError::InvalidConfig {
                reason: "axial_range.from must not exceed axial_range.to",
            });
        }
        self.smoothing.validate()?;
        self.solver.validate()
    }
}

/// Solver output converted back to physical units.
struct RawFit {
    params: PsfParams,
    z: Option<f64>,
    stds: FitStds,
    residual: Vec<f64>,
}

impl RawFit {
    fn as_guess(&self) -> InitialGuess {
        let p = &self.params;
        match self.z {
            Some(z0) => InitialGuess::Axial {
                amp: p.amp,
                x0: p.x0,
                y0: p.y0,
                z0,
                offset: p.offset,
            },
            None => InitialGuess::Sigma {
                amp: p.amp,
                x0: p.x0,
                y0: p.y0,
                sigma_x: p.sigma_x,
                sigma_y: p.sigma_y,
                offset: p.offset,
            },
        }
    }
}

/// Parameters, scaled standard errors and residuals in solver units.
struct Solved<const N: usize> {
    params: [f64; N],
    stds: [f64; N],
    residual: Vec<f64>,
}

/// Gaussian PSF with optional axial calibration.
#[derive(Clone, Debug)]
pub struct GaussianPsf {
    config: PsfConfig,
    cos_phi: f64,
    sin_phi: f64,
    calibration: Option<AxialCalibration>,
    calibration_points: Vec<(f64, Vec<MoleculeLoc>)>,
    calibration_use_stds: bool,
}

impl GaussianPsf {
    /// Creates a PSF without calibration data.
    pub fn new(config: PsfConfig) -> SmolPhotResult<Self> {
        config.validate()?;
        let (sin_phi, cos_phi) = config.phi.sin_cos();
        Ok(Self {
            config,
            cos_phi,
            sin_phi,
            calibration: None,
            calibration_points: Vec::new(),
            calibration_use_stds: false,
        })
    }

    /// Active configuration.
    pub fn config(&self) -> &PsfConfig {
        &self.config
    }

    /// True once axial calibration curves are available.
    pub fn has_calibration_data(&self) -> bool {
        self.calibration.is_some()
    }

    /// Current axial calibration, if any.
    pub fn calibration(&self) -> Option<&AxialCalibration> {
        self.calibration.as_ref()
    }

    /// Checks that `mode` can be used with the current calibration state.
    pub fn check_mode(&self, mode: FitMode) -> SmolPhotResult<()> {
        match mode {
            FitMode::Z if !self.has_calibration_data() => Err(SmolPhotError::MissingCalibration),
            _ => Ok(()),
        }
    }

    /// Rebuilds the axial calibration from `(z, emitters)` samples.
    ///
    /// An empty list clears the calibration.
    pub fn set_axial_calib_points(
        &mut self,
        points: Vec<(f64, Vec<MoleculeLoc>)>,
        use_stds: bool,
    ) -> SmolPhotResult<()> {
        self.calibration = AxialCalibration::from_points(&points, self.config.smoothing, use_stds)?;
        self.calibration_points = points;
        self.calibration_use_stds = use_stds;
        Ok(())
    }

    /// Changes the curve smoothing and refits the stored calibration samples.
    pub fn set_smoothing(&mut self, smoothing: AxialSmoothing) -> SmolPhotResult<()> {
        smoothing.validate()?;
        if smoothing == self.config.smoothing {
            return Ok(());
        }
        self.config.smoothing = smoothing;
        self.calibration = AxialCalibration::from_points(
            &self.calibration_points,
            smoothing,
            self.calibration_use_stds,
        )?;
        Ok(())
    }

    /// Gaussian peak (without offset) at physical position `(x, y)`.
    pub fn evaluate(&self, params: &PsfParams, x: f64, y: f64) -> f64 {
        let (u, v) = crate::util::math::rotate(x - params.x0, y - params.y0, self.cos_phi, self.sin_phi);
        let (sx, sy) = (params.sigma_x, params.sigma_y);
        params.amp * (-(u * u) / (2.0 * sx * sx) - (v * v) / (2.0 * sy * sy)).exp()
    }

    /// Recomputes goodness and error values, e.g. after annotating distances.
    pub fn rate(&self, loc: &mut MoleculeLoc) {
        loc.goodness = self.config.goodness.evaluate(loc);
        loc.error = self.config.error.evaluate(loc);
    }

    /// Fits the PSF around `initial` (physical coordinates).
    ///
    /// The fit window is the square of `half_width` pixels around the pixel
    /// nearest to `initial`, clamped to the frame. Returns `None` if the
    /// solver fails or the fitted center is farther than `initial_max_dist`
    /// from `initial`.
    pub fn fit(
        &self,
        frame: &Frame,
        initial: (f64, f64),
        half_width: usize,
        mode: FitMode,
        initial_max_dist: f64,
    ) -> Option<MoleculeLoc> {
        self.fit_with_guess(frame, initial, half_width, mode, initial_max_dist, None)
    }

    /// Like [`GaussianPsf::fit`], starting from explicit parameters.
    ///
    /// A guess that does not match `mode` is ignored.
    pub fn fit_with_guess(
        &self,
        frame: &Frame,
        initial: (f64, f64),
        half_width: usize,
        mode: FitMode,
        initial_max_dist: f64,
        guess: Option<InitialGuess>,
    ) -> Option<MoleculeLoc> {
        let center = frame.coord_to_pixel(initial);
        self.fit_at(frame, initial, center, half_width, mode, initial_max_dist, guess, 0)
    }

    #[allow(clippy::too_many_arguments)]
    fn fit_at(
        &self,
        frame: &Frame,
        initial: (f64, f64),
        center: PixelCoord,
        half_width: usize,
        mode: FitMode,
        initial_max_dist: f64,
        guess: Option<InitialGuess>,
        shift_iteration: usize,
    ) -> Option<MoleculeLoc> {
        let window = frame.window(center, half_width);
        let center_value = frame.at(center.x, center.y);
        let raw = match mode {
            FitMode::Sigma => self.solve_sigma(&window, frame.pixel_size(), center_value, initial, guess)?,
            FitMode::Z => self.solve_axial(&window, frame.pixel_size(), center_value, initial, half_width, guess)?,
        };

        let (x0, y0) = (raw.params.x0, raw.params.y0);
        if !(dist_xy((x0, y0), initial) <= initial_max_dist) {
            return None;
        }

        let fitted_pixel = frame.coord_to_pixel((x0, y0));
        if shift_iteration < self.config.shift_max_iterations && fitted_pixel != center {
            trace_debug!(
                "fit maximum in pixel ({}, {}), window centred on ({}, {})",
                fitted_pixel.x,
                fitted_pixel.y,
                center.x,
                center.y
            );
            let retry = self.fit_at(
                frame,
                initial,
                fitted_pixel,
                half_width,
                mode,
                initial_max_dist,
                Some(raw.as_guess()),
                shift_iteration + 1,
            );
            if retry.is_some() {
                return retry;
            }
        }

        let (mut x, mut y) = (x0, y0);
        if self.config.wobble_correction && mode == FitMode::Z {
            if let (Some(z), Some(calib)) = (raw.z, self.calibration.as_ref()) {
                let (dx, dy) = calib.wobble(z, half_width);
                x += dx;
                y += dy;
            }
        }

        let pixel_size = frame.pixel_size();
        let photons = 2.0 * std::f64::consts::PI * raw.params.amp * raw.params.sigma_x * raw.params.sigma_y
            / (pixel_size * pixel_size);
        let mut loc = MoleculeLoc {
            x,
            y,
            z: raw.z,
            pixel: frame.coord_to_pixel((x, y)),
            initial,
            frame_index: frame.index(),
            params: raw.params,
            stds: raw.stds,
            residual: raw.residual,
            photons,
            goodness: 0.0,
            error: 0.0,
            half_width,
            min_dist_xy: f64::INFINITY,
            iteration: 0,
            area: None,
            dist_fit_weighted_centroid: None,
            start_position_offset: None,
        };
        self.rate(&mut loc);
        Some(loc)
    }

    fn solve<const N: usize, M: LmModel<N>>(&self, model: &M, window: &FitWindow, init: [f64; N]) -> Option<Solved<N>> {
        let n = window.len();
        if n < N {
            return None;
        }
        let samples = Samples {
            xs: window.xs(),
            ys: window.ys(),
            values: window.values(),
        };
        let result = optimize(model, samples, init, &self.config.solver);
        if !result.chi2.is_finite() || result.params.iter().any(|p| !p.is_finite()) {
            return None;
        }
        let residual = residuals(model, samples, &result.params);

        let mut stds = [0.0; N];
        if n > N {
            if let Some(cov) = covariance(model, samples, &result.params) {
                let s_sq = result.chi2 / (n - N) as f64;
                for (i, s) in stds.iter_mut().enumerate() {
                    *s = (cov[i][i].abs() * s_sq).sqrt();
                }
            }
        }
        Some(Solved {
            params: result.params,
            stds,
            residual,
        })
    }

    fn solve_sigma(
        &self,
        window: &FitWindow,
        ps: f64,
        center_value: f64,
        initial: (f64, f64),
        guess: Option<InitialGuess>,
    ) -> Option<RawFit> {
        let cfg = &self.config;
        let (amp, x0, y0, sx, sy, offset) = match guess {
            Some(InitialGuess::Sigma {
                amp,
                x0,
                y0,
                sigma_x,
                sigma_y,
                offset,
            }) => (amp, x0, y0, sigma_x, sigma_y, offset),
            _ => (
                center_value,
                initial.0,
                initial.1,
                cfg.initial_sigma,
                cfg.initial_sigma,
                cfg.initial_offset,
            ),
        };

        if cfg.symmetric {
            let s = self.solve(&SymmetricModel, window, [amp, x0 / ps, y0 / ps, sx / ps, offset])?;
            let (p, e) = (s.params, s.stds);
            Some(RawFit {
                params: PsfParams {
                    amp: p[0],
                    x0: p[1] * ps,
                    y0: p[2] * ps,
                    sigma_x: p[3] * ps,
                    sigma_y: p[3] * ps,
                    offset: p[4],
                },
                z: None,
                stds: FitStds {
                    amp: e[0],
                    x0: e[1] * ps,
                    y0: e[2] * ps,
                    z0: None,
                    sigma_x: Some(e[3] * ps),
                    sigma_y: Some(e[3] * ps),
                    offset: e[4],
                },
                residual: s.residual,
            })
        } else {
            let model = EllipticalModel {
                cos_phi: self.cos_phi,
                sin_phi: self.sin_phi,
            };
            let s = self.solve(&model, window, [amp, x0 / ps, y0 / ps, sx / ps, sy / ps, offset])?;
            let (p, e) = (s.params, s.stds);
            Some(RawFit {
                params: PsfParams {
                    amp: p[0],
                    x0: p[1] * ps,
                    y0: p[2] * ps,
                    sigma_x: p[3] * ps,
                    sigma_y: p[4] * ps,
                    offset: p[5],
                },
                z: None,
                stds: FitStds {
                    amp: e[0],
                    x0: e[1] * ps,
                    y0: e[2] * ps,
                    z0: None,
                    sigma_x: Some(e[3] * ps),
                    sigma_y: Some(e[4] * ps),
                    offset: e[5],
                },
                residual: s.residual,
            })
        }
    }

    fn solve_axial(
        &self,
        window: &FitWindow,
        ps: f64,
        center_value: f64,
        initial: (f64, f64),
        half_width: usize,
        guess: Option<InitialGuess>,
    ) -> Option<RawFit> {
        let cfg = &self.config;
        let calib = self.calibration.as_ref()?;
        let (amp, x0, y0, z0, offset) = match guess {
            Some(InitialGuess::Axial {
                amp,
                x0,
                y0,
                z0,
                offset,
            }) => (amp, x0, y0, z0, offset),
            _ => (center_value, initial.0, initial.1, cfg.initial_z, cfg.initial_offset),
        };

        let model = AxialModel {
            cos_phi: self.cos_phi,
            sin_phi: self.sin_phi,
            pixel_size: ps,
            sigma_x: calib.sigma_x().curve(half_width),
            sigma_y: (!cfg.symmetric).then(|| calib.sigma_y().curve(half_width)),
        };
        let s = self.solve(&model, window, [amp, x0 / ps, y0 / ps, z0 / ps, offset])?;
        let (p, e) = (s.params, s.stds);
        let (sx, sy) = model.sigmas_px(p[3]);
        Some(RawFit {
            params: PsfParams {
                amp: p[0],
                x0: p[1] * ps,
                y0: p[2] * ps,
                sigma_x: sx * ps,
                sigma_y: sy * ps,
                offset: p[4],
            },
            z: Some(p[3] * ps),
            stds: FitStds {
                amp: e[0],
                x0: e[1] * ps,
                y0: e[2] * ps,
                z0: Some(e[3] * ps),
                sigma_x: None,
                sigma_y: None,
                offset: e[4],
            },
            residual: s.residual,
        })
    }
}
