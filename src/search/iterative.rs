//! Iterative localizer: accept the single best fit, subtract it, repeat.
//!
//! The loop is a small state machine:
//!
//! - `Searching`: ask the cache for the best fit over the current half-width
//!   range. On success the emitter is accepted, subtracted, and the range is
//!   reset to its initial value.
//! - `Loosening`: no fit cleared the gates, so the half-width range is
//!   widened according to [`HalfWidthPolicy`]. When it cannot be widened any
//!   further the frame is done.
//! - `Terminal`: either nothing is left or `max_iterations` emitters were
//!   accepted.

use crate::candidate::dedup::annotate_min_distances;
use crate::candidate::{DetectionMode, DetectionParams};
use crate::image::{Frame, PixelBox};
use crate::psf::{FitMode, GaussianPsf};
use crate::search::cache::PotentialLocCache;
use crate::search::{FrameLocalization, Termination};
use crate::trace::{trace_event, trace_span, trace_warn};
use crate::util::{SmolPhotError, SmolPhotResult};

/// How the half-width range is widened when no fit is found.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub enum HalfWidthPolicy {
    /// Start at `[max, max]`, then step both bounds down together.
    #[default]
    ReduceBoth,
    /// Start at `[max, max]`, then lower only the minimum.
    ReduceLower,
    /// Use `[min, max]` from the start and never widen.
    AllAtOnce,
}

impl HalfWidthPolicy {
    fn initial_range(self, min: usize, max: usize) -> (usize, usize) {
        match self {
            HalfWidthPolicy::AllAtOnce => (min, max),
            _ => (max, max),
        }
    }

    /// Next range after a failed search, or `None` when fully loosened.
    fn loosen(self, current: (usize, usize), min: usize) -> Option<(usize, usize)> {
        let (lo, hi) = current;
        match self {
            HalfWidthPolicy::ReduceBoth if lo > min => Some((lo - 1, lo - 1)),
            HalfWidthPolicy::ReduceLower if lo > min => Some((lo - 1, hi)),
            _ => None,
        }
    }
}

/// Where a candidate fit starts.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub enum InitialFitLoc {
    /// Center of the detected pixel.
    #[default]
    PixelCenter,
    /// Intensity-weighted centroid of its 3x3 neighbourhood.
    WeightedCentroid,
}

/// Configuration for [`IterativeLocalizer`].
#[derive(Clone, Debug, PartialEq)]
pub struct IterativeConfig {
    /// Upper bound on accepted emitters per frame.
    pub max_iterations: usize,
    pub detection_mode: DetectionMode,
    /// Candidate pixels must exceed this value.
    pub det_threshold: f64,
    /// Noise floor for the candidate area.
    pub noise_level: f64,
    pub min_area: usize,
    pub min_half_width: usize,
    pub max_half_width: usize,
    pub half_width_policy: HalfWidthPolicy,
    pub initial_max_dist: f64,
    /// Fits this close to the frame edge are rejected.
    pub border: f64,
    pub initial_fit_loc: InitialFitLoc,
    pub min_offset: f64,
    pub duplicate_min_dist: f64,
    pub min_goodness: f64,
    /// Keep one [`IterationRecord`] per accepted emitter.
    pub record_iterations: bool,
}

impl Default for IterativeConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            detection_mode: DetectionMode::LocalMaxima,
            det_threshold: 50.0,
            noise_level: 40.0,
            min_area: 4,
            min_half_width: 3,
            max_half_width: 5,
            half_width_policy: HalfWidthPolicy::ReduceBoth,
            initial_max_dist: 250e-9,
            border: 300e-9,
            initial_fit_loc: InitialFitLoc::PixelCenter,
            min_offset: -100.0,
            duplicate_min_dist: 400e-9,
            min_goodness: 0.5,
            record_iterations: false,
        }
    }
}

impl IterativeConfig {
    /// Validates ranges and thresholds.
    pub fn validate(&self) -> SmolPhotResult<()> {
        if self.min_half_width == 0 || self.min_half_width > self.max_half_width {
            return Err(SmolPhotError::InvalidHalfWidthRange {
                min: self.min_half_width,
                max: self.max_half_width,
            });
        }
        if self.max_iterations == 0 {
            return Err(SmolPhotError::InvalidConfig {
                reason: "max_iterations must be at least 1",
            });
        }
        if !(self.initial_max_dist > 0.0) {
            return Err(SmolPhotError::InvalidConfig {
                reason: "initial_max_dist must be positive",
            });
        }
        if !(self.border >= 0.0) || !(self.duplicate_min_dist >= 0.0) {
            return Err(SmolPhotError::InvalidConfig {
                reason: "border and duplicate_min_dist must be non-negative",
            });
        }
        if self.min_goodness.is_nan() || self.min_offset.is_nan() {
            return Err(SmolPhotError::InvalidConfig {
                reason: "min_goodness and min_offset must not be NaN",
            });
        }
        self.detection().validate()
    }

    pub(crate) fn detection(&self) -> DetectionParams {
        DetectionParams {
            mode: self.detection_mode,
            threshold: self.det_threshold,
            noise_level: self.noise_level,
            min_area: self.min_area,
        }
    }
}

/// Diagnostics for one accepted emitter.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct IterationRecord {
    pub iteration: usize,
    /// Half-width range the emitter was found in.
    pub half_width_range: (usize, usize),
    /// Box whose candidates were re-detected.
    pub affected: PixelBox,
    pub fresh_candidates: usize,
    /// Sum of squared residual samples after the subtraction.
    pub residual_energy: f64,
}

enum LoopState {
    Searching,
    Loosening,
    Terminal(Termination),
}

/// Cached, one-emitter-at-a-time localizer.
#[derive(Clone, Debug)]
pub struct IterativeLocalizer {
    config: IterativeConfig,
}

impl IterativeLocalizer {
    /// Creates a localizer after validating `config`.
    pub fn new(config: IterativeConfig) -> SmolPhotResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &IterativeConfig {
        &self.config
    }

    /// Localizes the emitters of one frame.
    ///
    /// Emitters are returned in acceptance order. Fails only if `mode` is
    /// unusable with `psf`; running out of iterations is reported through
    /// [`FrameLocalization::termination`].
    pub fn localize(&self, frame: &Frame, psf: &GaussianPsf, mode: FitMode) -> SmolPhotResult<FrameLocalization> {
        psf.check_mode(mode)?;
        let cfg = &self.config;
        let _span = trace_span!("iterative_localize", frame = frame.index()).entered();

        let mut cache = PotentialLocCache::new(frame, psf, mode, cfg);
        let initial = cfg.half_width_policy.initial_range(cfg.min_half_width, cfg.max_half_width);
        cache.set_fit_pixels_range(initial.0, initial.1);
        trace_event!("candidates", count = cache.live_candidates());

        let mut records = Vec::new();
        let mut state = LoopState::Searching;
        let termination = loop {
            state = match state {
                LoopState::Searching if cache.accepted().len() >= cfg.max_iterations => {
                    LoopState::Terminal(Termination::IterationCap)
                }
                LoopState::Searching => match cache.best_loc_fit() {
                    Some(mut loc) => {
                        let iteration = cache.accepted().len();
                        let range = cache.fit_pixels_range();
                        loc.iteration = iteration;
                        let update = cache.add_location_and_update(loc);
                        if cfg.record_iterations {
                            records.push(IterationRecord {
                                iteration,
                                half_width_range: range,
                                affected: update.affected,
                                fresh_candidates: update.fresh_candidates,
                                residual_energy: cache.working_frame().energy(),
                            });
                        }
                        cache.set_fit_pixels_range(initial.0, initial.1);
                        LoopState::Searching
                    }
                    None => LoopState::Loosening,
                },
                LoopState::Loosening => {
                    match cfg
                        .half_width_policy
                        .loosen(cache.fit_pixels_range(), cfg.min_half_width)
                    {
                        Some((lo, hi)) => {
                            cache.set_fit_pixels_range(lo, hi);
                            LoopState::Searching
                        }
                        None => LoopState::Terminal(Termination::Exhausted),
                    }
                }
                LoopState::Terminal(t) => break t,
            };
        };

        if termination == Termination::IterationCap {
            trace_warn!(
                "maximum number of iterations ({}) reached at frame {}",
                cfg.max_iterations,
                frame.index()
            );
        }

        let mut locs = cache.into_locs();
        annotate_min_distances(&mut locs, psf);
        trace_event!("accepted", count = locs.len());
        Ok(FrameLocalization {
            locs,
            termination,
            iterations: records,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{HalfWidthPolicy, IterativeConfig};
    use crate::util::SmolPhotError;

    #[test]
    fn policies_loosen_towards_minimum() {
        let p = HalfWidthPolicy::ReduceBoth;
        assert_eq!(p.initial_range(3, 5), (5, 5));
        assert_eq!(p.loosen((5, 5), 3), Some((4, 4)));
        assert_eq!(p.loosen((3, 3), 3), None);

        let p = HalfWidthPolicy::ReduceLower;
        assert_eq!(p.loosen((5, 5), 3), Some((4, 5)));
        assert_eq!(p.loosen((4, 5), 3), Some((3, 5)));
        assert_eq!(p.loosen((3, 5), 3), None);

        let p = HalfWidthPolicy::AllAtOnce;
        assert_eq!(p.initial_range(3, 5), (3, 5));
        assert_eq!(p.loosen((3, 5), 3), None);
    }

    #[test]
    fn validate_rejects_inverted_half_widths() {
        let cfg = IterativeConfig {
            min_half_width: 6,
            ..IterativeConfig::default()
        };
        assert_eq!(
            cfg.validate().err().unwrap(),
            SmolPhotError::InvalidHalfWidthRange { min: 6, max: 5 }
        );
    }
}
