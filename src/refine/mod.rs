//! Non-linear least-squares refinement.
//!
//! `lm` implements the damped Gauss-Newton (Levenberg-Marquardt) loop used by
//! every PSF fit; `linalg` holds the small dense and banded solvers it and the
//! axial calibration splines rely on.

pub(crate) mod linalg;
pub mod lm;

pub use lm::{LmConfig, LmModel, LmResult};
