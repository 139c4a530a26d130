//! Localization strategies.
//!
//! [`IterativeLocalizer`] accepts one emitter at a time with a cached
//! candidate set; the batch localizers in [`batch`] accept every emitter
//! found in an iteration at once. [`Localizer`] dispatches between them and
//! the `localize_frames*` helpers run a localizer over a frame series.

pub mod batch;
pub(crate) mod cache;
pub mod gates;
pub mod iterative;

use crate::image::Frame;
use crate::psf::{FitMode, GaussianPsf, MoleculeLoc};
use crate::trace::trace_span;
use crate::util::SmolPhotResult;
#[cfg(feature = "rayon")]
use rayon::prelude::*;

pub use batch::{BlobConfig, BlobLocalizer, LocalMaximaConfig, LocalMaximaLocalizer, RegionConfig, RegionLocalizer};
pub use gates::{AcceptanceGates, Rejection};
pub use iterative::{HalfWidthPolicy, InitialFitLoc, IterationRecord, IterativeConfig, IterativeLocalizer};

/// Why a frame stopped producing emitters.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Termination {
    /// No further fit cleared the gates.
    Exhausted,
    /// The iteration budget ran out; more emitters may remain.
    IterationCap,
}

/// Emitters found in one frame.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameLocalization {
    /// Emitters in acceptance order, annotated with neighbour distances.
    pub locs: Vec<MoleculeLoc>,
    pub termination: Termination,
    /// Per-emitter diagnostics, filled only when requested.
    pub iterations: Vec<IterationRecord>,
}

/// Any of the available localizers.
#[derive(Clone, Debug)]
pub enum Localizer {
    Iterative(IterativeLocalizer),
    LocalMaxima(LocalMaximaLocalizer),
    Region(RegionLocalizer),
    Blob(BlobLocalizer),
}

impl Localizer {
    /// Human-readable strategy name.
    pub fn name(&self) -> &'static str {
        match self {
            Localizer::Iterative(_) => "iterative",
            Localizer::LocalMaxima(_) => "local maxima",
            Localizer::Region(_) => "region detection",
            Localizer::Blob(_) => "blob detection",
        }
    }

    /// Localizes the emitters of one frame.
    pub fn localize(&self, frame: &Frame, psf: &GaussianPsf, mode: FitMode) -> SmolPhotResult<FrameLocalization> {
        match self {
            Localizer::Iterative(l) => l.localize(frame, psf, mode),
            Localizer::LocalMaxima(l) => l.localize(frame, psf, mode),
            Localizer::Region(l) => l.localize(frame, psf, mode),
            Localizer::Blob(l) => l.localize(frame, psf, mode),
        }
    }
}

impl From<IterativeLocalizer> for Localizer {
    fn from(l: IterativeLocalizer) -> Self {
        Localizer::Iterative(l)
    }
}

impl From<LocalMaximaLocalizer> for Localizer {
    fn from(l: LocalMaximaLocalizer) -> Self {
        Localizer::LocalMaxima(l)
    }
}

impl From<RegionLocalizer> for Localizer {
    fn from(l: RegionLocalizer) -> Self {
        Localizer::Region(l)
    }
}

impl From<BlobLocalizer> for Localizer {
    fn from(l: BlobLocalizer) -> Self {
        Localizer::Blob(l)
    }
}

/// Localizes every frame in order.
///
/// The fit mode is checked once up front, so a missing calibration fails
/// before any frame is processed.
pub fn localize_frames(
    localizer: &Localizer,
    frames: &[Frame],
    psf: &GaussianPsf,
    mode: FitMode,
) -> SmolPhotResult<Vec<FrameLocalization>> {
    psf.check_mode(mode)?;
    let _span = trace_span!("localize_frames", frames = frames.len(), localizer = localizer.name()).entered();
    frames
        .iter()
        .map(|frame| localizer.localize(frame, psf, mode))
        .collect()
}

/// Localizes frames in parallel (rayon); results keep the input order.
#[cfg(feature = "rayon")]
pub fn localize_frames_par(
    localizer: &Localizer,
    frames: &[Frame],
    psf: &GaussianPsf,
    mode: FitMode,
) -> SmolPhotResult<Vec<FrameLocalization>> {
    psf.check_mode(mode)?;
    let _span = trace_span!("localize_frames_par", frames = frames.len(), localizer = localizer.name()).entered();
    frames
        .par_iter()
        .map(|frame| localizer.localize(frame, psf, mode))
        .collect()
}
