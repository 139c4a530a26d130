//! Non-cached localizers.
//!
//! Each outer iteration detects candidates on the current residual frame,
//! fits all of them, filters duplicates and subtracts everything accepted in
//! that iteration at once.

use crate::candidate::blob::{detect_blobs, BlobParams};
use crate::candidate::dedup::{annotate_min_distances, filter_new_locs, remove_pairwise_duplicates};
use crate::candidate::labeling::{label_regions, split_regions, SplitMode};
use crate::candidate::{detect_candidates, DetectionMode, DetectionParams};
use crate::image::Frame;
use crate::psf::{FitMode, GaussianPsf, MoleculeLoc};
use crate::search::gates::AcceptanceGates;
use crate::search::iterative::InitialFitLoc;
use crate::search::{FrameLocalization, Termination};
use crate::trace::{trace_debug, trace_event, trace_span, trace_warn};
use crate::util::{SmolPhotError, SmolPhotResult};

fn check_half_widths(min: usize, start: usize) -> SmolPhotResult<()> {
    if min == 0 || min > start {
        return Err(SmolPhotError::InvalidHalfWidthRange { min, max: start });
    }
    Ok(())
}

fn check_distances(initial_max_dist: f64, border: f64, duplicate_min_dist: f64) -> SmolPhotResult<()> {
    if !(initial_max_dist > 0.0) {
        return Err(SmolPhotError::InvalidConfig {
            reason: "initial_max_dist must be positive",
        });
    }
    if !(border >= 0.0) || !(duplicate_min_dist >= 0.0) {
        return Err(SmolPhotError::InvalidConfig {
            reason: "border and duplicate_min_dist must be non-negative",
        });
    }
    Ok(())
}

fn check_optional_gates(min_goodness: Option<f64>, min_offset: Option<f64>) -> SmolPhotResult<()> {
    if min_goodness.is_some_and(f64::is_nan) || min_offset.is_some_and(f64::is_nan) {
        return Err(SmolPhotError::InvalidConfig {
            reason: "min_goodness and min_offset must not be NaN",
        });
    }
    Ok(())
}

/// Fits every start position and keeps the fits that pass the gates.
#[allow(clippy::too_many_arguments)]
fn fit_all(
    frame: &Frame,
    psf: &GaussianPsf,
    mode: FitMode,
    starts: &[(f64, f64)],
    half_width: usize,
    initial_max_dist: f64,
    gates: &AcceptanceGates,
    iteration: usize,
) -> Vec<MoleculeLoc> {
    starts
        .iter()
        .filter_map(|&start| {
            let mut loc = psf.fit(frame, start, half_width, mode, initial_max_dist)?;
            if let Err(reason) = gates.check(&loc, frame) {
                trace_debug!("dismissed fit at ({:e}, {:e}): {}", loc.x, loc.y, reason.as_str());
                return None;
            }
            loc.iteration = iteration;
            Some(loc)
        })
        .collect()
}

/// Shared settings of the shrinking-half-width search.
struct ShrinkingSearch<'a> {
    psf: &'a GaussianPsf,
    mode: FitMode,
    max_iterations: usize,
    half_width: usize,
    min_half_width: usize,
    initial_max_dist: f64,
    duplicate_min_dist: f64,
    min_same_iteration_dist: f64,
    gates: AcceptanceGates,
}

impl ShrinkingSearch<'_> {
    /// Runs detect, fit, filter and subtract until nothing is found or the
    /// half-width drops below its minimum. The half-width shrinks by one
    /// after every iteration that accepts nothing.
    fn run<F>(&self, frame: &Frame, mut find_starts: F) -> FrameLocalization
    where
        F: FnMut(&Frame) -> Vec<(f64, f64)>,
    {
        let mut working = frame.clone();
        let mut locs: Vec<MoleculeLoc> = Vec::new();
        let mut half_width = self.half_width;
        let mut iteration = 0;
        let termination = loop {
            if half_width < self.min_half_width {
                break Termination::Exhausted;
            }
            if iteration >= self.max_iterations {
                break Termination::IterationCap;
            }
            let _span = trace_span!("batch_iteration", iteration = iteration, half_width = half_width).entered();
            let starts = find_starts(&working);
            if starts.is_empty() {
                break Termination::Exhausted;
            }
            let mut fits = fit_all(
                &working,
                self.psf,
                self.mode,
                &starts,
                half_width,
                self.initial_max_dist,
                &self.gates,
                iteration,
            );
            fits.sort_by(|a, b| b.goodness.total_cmp(&a.goodness));
            let accepted = filter_new_locs(&locs, fits, self.duplicate_min_dist, self.min_same_iteration_dist);
            trace_event!("iteration_locs", starts = starts.len(), accepted = accepted.len());
            working.subtract_locs(self.psf, &accepted, false);
            if accepted.is_empty() {
                half_width -= 1;
            }
            locs.extend(accepted);
            iteration += 1;
        };
        if termination == Termination::IterationCap {
            trace_warn!(
                "maximum number of iterations ({}) reached at frame {}",
                self.max_iterations,
                frame.index()
            );
        }
        annotate_min_distances(&mut locs, self.psf);
        FrameLocalization {
            locs,
            termination,
            iterations: Vec::new(),
        }
    }
}

/// Configuration for [`LocalMaximaLocalizer`].
#[derive(Clone, Debug, PartialEq)]
pub struct LocalMaximaConfig {
    pub max_iterations: usize,
    pub det_threshold: f64,
    pub noise_level: f64,
    pub min_area: usize,
    /// Starting fit half-width.
    pub half_width: usize,
    pub min_half_width: usize,
    pub initial_max_dist: f64,
    pub border: f64,
    pub duplicate_min_dist: f64,
    /// Minimum distance between fits accepted in the same iteration.
    pub min_same_iteration_dist: f64,
    pub min_goodness: f64,
    pub min_offset: f64,
    pub initial_fit_loc: InitialFitLoc,
}

impl Default for LocalMaximaConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            det_threshold: 2000.0,
            noise_level: 10.0,
            min_area: 4,
            half_width: 1,
            min_half_width: 1,
            initial_max_dist: 200e-9,
            border: 300e-9,
            duplicate_min_dist: 200e-9,
            min_same_iteration_dist: 1000e-9,
            min_goodness: 0.5,
            min_offset: -20.0,
            initial_fit_loc: InitialFitLoc::PixelCenter,
        }
    }
}

impl LocalMaximaConfig {
    pub fn validate(&self) -> SmolPhotResult<()> {
        check_half_widths(self.min_half_width, self.half_width)?;
        check_distances(self.initial_max_dist, self.border, self.duplicate_min_dist)?;
        if self.max_iterations == 0 {
            return Err(SmolPhotError::InvalidConfig {
                reason: "max_iterations must be at least 1",
            });
        }
        check_optional_gates(Some(self.min_goodness), Some(self.min_offset))?;
        self.detection().validate()
    }

    fn detection(&self) -> DetectionParams {
        DetectionParams {
            mode: DetectionMode::LocalMaxima,
            threshold: self.det_threshold,
            noise_level: self.noise_level,
            min_area: self.min_area,
        }
    }
}

/// Fits every local maximum of the residual frame each iteration.
#[derive(Clone, Debug)]
pub struct LocalMaximaLocalizer {
    config: LocalMaximaConfig,
}

impl LocalMaximaLocalizer {
    pub fn new(config: LocalMaximaConfig) -> SmolPhotResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &LocalMaximaConfig {
        &self.config
    }

    /// Localizes the emitters of one frame.
    pub fn localize(&self, frame: &Frame, psf: &GaussianPsf, mode: FitMode) -> SmolPhotResult<FrameLocalization> {
        psf.check_mode(mode)?;
        let cfg = &self.config;
        let _span = trace_span!("local_maxima_localize", frame = frame.index()).entered();
        let search = ShrinkingSearch {
            psf,
            mode,
            max_iterations: cfg.max_iterations,
            half_width: cfg.half_width,
            min_half_width: cfg.min_half_width,
            initial_max_dist: cfg.initial_max_dist,
            duplicate_min_dist: cfg.duplicate_min_dist,
            min_same_iteration_dist: cfg.min_same_iteration_dist,
            gates: AcceptanceGates {
                border: cfg.border,
                axial_range: psf.config().axial_range,
                min_goodness: Some(cfg.min_goodness),
                min_offset: Some(cfg.min_offset),
                min_photons: None,
            },
        };
        let detection = cfg.detection();
        let initial_fit_loc = cfg.initial_fit_loc;
        Ok(search.run(frame, |working| {
            detect_candidates(working, working.full_box(), &detection)
                .into_iter()
                .map(|c| match initial_fit_loc {
                    InitialFitLoc::PixelCenter => working.pixel_center(c.pixel),
                    InitialFitLoc::WeightedCentroid => c.weighted_centroid,
                })
                .collect()
        }))
    }
}

/// Configuration for [`RegionLocalizer`].
#[derive(Clone, Debug, PartialEq)]
pub struct RegionConfig {
    pub split_mode: SplitMode,
    pub max_iterations: usize,
    /// Regions whose brightest pixel is below this are dismissed.
    pub det_threshold: f64,
    /// Pixels above this form regions.
    pub mask_threshold: f64,
    pub min_area: usize,
    /// Larger regions are split.
    pub max_area: usize,
    pub half_width: usize,
    pub min_half_width: usize,
    pub initial_max_dist: f64,
    pub border: f64,
    pub duplicate_min_dist: f64,
    pub min_same_iteration_dist: f64,
    pub min_goodness: f64,
    /// Fits with a lower background are rejected; `None` disables the gate.
    pub min_offset: Option<f64>,
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            split_mode: SplitMode::SinglePeak,
            max_iterations: 5,
            det_threshold: 50.0,
            mask_threshold: 30.0,
            min_area: 4,
            max_area: 30,
            half_width: 4,
            min_half_width: 2,
            initial_max_dist: 100e-9,
            border: 300e-9,
            duplicate_min_dist: 200e-9,
            min_same_iteration_dist: 1000e-9,
            min_goodness: 0.5,
            min_offset: None,
        }
    }
}

impl RegionConfig {
    pub fn validate(&self) -> SmolPhotResult<()> {
        check_half_widths(self.min_half_width, self.half_width)?;
        check_distances(self.initial_max_dist, self.border, self.duplicate_min_dist)?;
        if self.max_iterations == 0 {
            return Err(SmolPhotError::InvalidConfig {
                reason: "max_iterations must be at least 1",
            });
        }
        if self.max_area == 0 || self.max_area < self.min_area {
            return Err(SmolPhotError::InvalidConfig {
                reason: "max_area must be positive and at least min_area",
            });
        }
        if !self.mask_threshold.is_finite() || !self.det_threshold.is_finite() {
            return Err(SmolPhotError::InvalidConfig {
                reason: "region thresholds must be finite",
            });
        }
        check_optional_gates(Some(self.min_goodness), self.min_offset)
    }
}

/// Fits the weighted centroids of labeled regions each iteration.
#[derive(Clone, Debug)]
pub struct RegionLocalizer {
    config: RegionConfig,
}

impl RegionLocalizer {
    pub fn new(config: RegionConfig) -> SmolPhotResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &RegionConfig {
        &self.config
    }

    /// Localizes the emitters of one frame.
    pub fn localize(&self, frame: &Frame, psf: &GaussianPsf, mode: FitMode) -> SmolPhotResult<FrameLocalization> {
        psf.check_mode(mode)?;
        let cfg = &self.config;
        let _span = trace_span!("region_localize", frame = frame.index()).entered();
        let search = ShrinkingSearch {
            psf,
            mode,
            max_iterations: cfg.max_iterations,
            half_width: cfg.half_width,
            min_half_width: cfg.min_half_width,
            initial_max_dist: cfg.initial_max_dist,
            duplicate_min_dist: cfg.duplicate_min_dist,
            min_same_iteration_dist: cfg.min_same_iteration_dist,
            gates: AcceptanceGates {
                border: cfg.border,
                axial_range: psf.config().axial_range,
                min_goodness: Some(cfg.min_goodness),
                min_offset: cfg.min_offset,
                min_photons: None,
            },
        };
        Ok(search.run(frame, |working| {
            let regions: Vec<_> = label_regions(working, cfg.mask_threshold)
                .into_iter()
                .filter(|r| r.area() >= cfg.min_area && r.max_intensity() >= cfg.det_threshold)
                .collect();
            split_regions(working, regions, cfg.max_area, cfg.split_mode)
                .iter()
                .map(|r| {
                    let (cx, cy) = r.weighted_centroid();
                    (working.pixel_to_coord(cx), working.pixel_to_coord(cy))
                })
                .collect()
        }))
    }
}

/// Configuration for [`BlobLocalizer`].
#[derive(Clone, Debug, PartialEq)]
pub struct BlobConfig {
    pub max_iterations: usize,
    pub blob: BlobParams,
    pub half_width: usize,
    pub initial_max_dist: f64,
    pub border: f64,
    pub min_photons: f64,
    /// Optional goodness and offset gates, off by default.
    pub min_goodness: Option<f64>,
    pub min_offset: Option<f64>,
    pub duplicate_min_dist: f64,
    /// Subtract fits without their offset.
    pub remove_offset: bool,
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            blob: BlobParams::default(),
            half_width: 1,
            initial_max_dist: 200e-9,
            border: 300e-9,
            min_photons: 1000.0,
            min_goodness: None,
            min_offset: None,
            duplicate_min_dist: 200e-9,
            remove_offset: false,
        }
    }
}

impl BlobConfig {
    pub fn validate(&self) -> SmolPhotResult<()> {
        if self.half_width == 0 {
            return Err(SmolPhotError::InvalidHalfWidthRange { min: 1, max: 0 });
        }
        check_distances(self.initial_max_dist, self.border, self.duplicate_min_dist)?;
        if self.max_iterations == 0 {
            return Err(SmolPhotError::InvalidConfig {
                reason: "max_iterations must be at least 1",
            });
        }
        check_optional_gates(self.min_goodness, self.min_offset)?;
        self.blob.validate()
    }
}

/// Fits LoG blobs of the residual frame each iteration.
#[derive(Clone, Debug)]
pub struct BlobLocalizer {
    config: BlobConfig,
}

impl BlobLocalizer {
    pub fn new(config: BlobConfig) -> SmolPhotResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &BlobConfig {
        &self.config
    }

    /// Localizes the emitters of one frame.
    ///
    /// Fits run on the residual frame; fits that duplicate an earlier
    /// emitter are dropped before subtraction.
    pub fn localize(&self, frame: &Frame, psf: &GaussianPsf, mode: FitMode) -> SmolPhotResult<FrameLocalization> {
        psf.check_mode(mode)?;
        let cfg = &self.config;
        let _span = trace_span!("blob_localize", frame = frame.index()).entered();
        let gates = AcceptanceGates {
            border: cfg.border,
            axial_range: psf.config().axial_range,
            min_goodness: cfg.min_goodness,
            min_offset: cfg.min_offset,
            min_photons: Some(cfg.min_photons),
        };
        let (w, h) = (frame.width(), frame.height());

        let mut working = frame.clone();
        let mut locs: Vec<MoleculeLoc> = Vec::new();
        let mut iteration = 0;
        let termination = loop {
            if iteration >= cfg.max_iterations {
                break Termination::IterationCap;
            }
            let starts: Vec<(f64, f64)> = detect_blobs(&working, &cfg.blob)
                .into_iter()
                .filter(|b| b.pixel.x >= 1 && b.pixel.y >= 1 && b.pixel.x + 1 < w && b.pixel.y + 1 < h)
                .map(|b| working.pixel_center(b.pixel))
                .collect();
            let fits = fit_all(
                &working,
                psf,
                mode,
                &starts,
                cfg.half_width,
                cfg.initial_max_dist,
                &gates,
                iteration,
            );
            if fits.is_empty() {
                break Termination::Exhausted;
            }
            let accepted = remove_pairwise_duplicates(&locs, fits, cfg.duplicate_min_dist);
            trace_event!("iteration_locs", starts = starts.len(), accepted = accepted.len());
            if accepted.is_empty() {
                break Termination::Exhausted;
            }
            working.subtract_locs(psf, &accepted, !cfg.remove_offset);
            locs.extend(accepted);
            iteration += 1;
        };
        if termination == Termination::IterationCap {
            trace_warn!(
                "maximum number of iterations ({}) reached at frame {}",
                cfg.max_iterations,
                frame.index()
            );
        }
        annotate_min_distances(&mut locs, psf);
        Ok(FrameLocalization {
            locs,
            termination,
            iterations: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{BlobConfig, LocalMaximaConfig, RegionConfig};
    use crate::util::SmolPhotError;

    #[test]
    fn default_configs_validate() {
        assert!(LocalMaximaConfig::default().validate().is_ok());
        assert!(RegionConfig::default().validate().is_ok());
        assert!(BlobConfig::default().validate().is_ok());
    }

    #[test]
    fn nan_gate_thresholds_are_rejected() {
        let region = RegionConfig {
            min_offset: Some(f64::NAN),
            ..RegionConfig::default()
        };
        assert!(matches!(region.validate(), Err(SmolPhotError::InvalidConfig { .. })));
        let blob = BlobConfig {
            min_goodness: Some(f64::NAN),
            ..BlobConfig::default()
        };
        assert!(matches!(blob.validate(), Err(SmolPhotError::InvalidConfig { .. })));
    }

    #[test]
    fn half_width_floor_above_start_is_rejected() {
        let cfg = RegionConfig {
            min_half_width: 5,
            ..RegionConfig::default()
        };
        assert_eq!(
            cfg.validate().err().unwrap(),
            SmolPhotError::InvalidHalfWidthRange { min: 5, max: 4 }
        );
    }
}
