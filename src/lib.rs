//! smolphot localizes single emitters in single-molecule localization
//! microscopy (SMLM) frames.
//!
//! The core loop repeatedly detects candidate pixels, fits a 2D Gaussian PSF
//! around them with Levenberg-Marquardt, accepts the best fit that clears a
//! set of gates and subtracts it from a working copy of the frame, so that
//! overlapping emitters are resolved one after another. Depth is recovered
//! from an astigmatic PSF through per-half-width axial calibration curves.
//!
//! Frames can be processed in parallel with the `rayon` feature; structured
//! logging is available through the `tracing` feature and image loading
//! through `image-io`.

mod candidate;
pub mod image;
pub mod lowlevel;
pub mod psf;
mod refine;
pub mod search;
mod trace;
pub mod util;

pub use image::{FitWindow, Frame, PixelBox, PixelCoord};
pub use psf::{
    calibrate_from_positions, AxialCalibration, AxialRange, AxialSmoothing, CalibrationConfig, ErrorFunction, FitMode,
    FitStds, GaussianPsf, GoodnessFunction, InitialGuess, LocProperty, MoleculeLoc, PsfConfig, PsfParams,
};
pub use refine::LmConfig;
pub use search::{
    localize_frames, BlobConfig, BlobLocalizer, FrameLocalization, HalfWidthPolicy, InitialFitLoc, IterationRecord,
    IterativeConfig, IterativeLocalizer, LocalMaximaConfig, LocalMaximaLocalizer, Localizer, RegionConfig,
    RegionLocalizer, Termination,
};
#[cfg(feature = "rayon")]
pub use search::localize_frames_par;
pub use util::{SmolPhotError, SmolPhotResult};

pub use candidate::blob::BlobParams;
pub use candidate::labeling::SplitMode;
pub use candidate::DetectionMode;
