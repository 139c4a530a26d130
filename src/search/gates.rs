//! Post-fit acceptance gates shared by all localizers.

use crate::image::Frame;
use crate::psf::{AxialRange, MoleculeLoc};

/// Reason a successful fit was not accepted.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Rejection {
    Border,
    AxialRange,
    Goodness,
    Offset,
    Photons,
    Duplicate,
}

impl Rejection {
    /// Short label for log output.
    pub fn as_str(self) -> &'static str {
        match self {
            Rejection::Border => "in border region",
            Rejection::AxialRange => "outside axial calibration range",
            Rejection::Goodness => "goodness below minimum",
            Rejection::Offset => "offset below minimum",
            Rejection::Photons => "photon count below minimum",
            Rejection::Duplicate => "duplicate of an accepted emitter",
        }
    }
}

/// Checks every fit must pass before it can be accepted.
///
/// Optional gates are disabled when `None`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct AcceptanceGates {
    /// Width of the excluded frame margin.
    pub border: f64,
    /// Allowed depth range for fits with a depth.
    pub axial_range: AxialRange,
    pub min_goodness: Option<f64>,
    pub min_offset: Option<f64>,
    pub min_photons: Option<f64>,
}

impl AcceptanceGates {
    /// Runs the gates in order and reports the first failure.
    ///
    /// A NaN goodness never passes the goodness gate.
    pub fn check(&self, loc: &MoleculeLoc, frame: &Frame) -> Result<(), Rejection> {
        let b = self.border;
        if loc.x < b || loc.y < b || loc.x + b > frame.size_x() || loc.y + b > frame.size_y() {
            return Err(Rejection::Border);
        }
        if let Some(z) = loc.z {
            if !self.axial_range.contains(z) {
                return Err(Rejection::AxialRange);
            }
        }
        if let Some(min) = self.min_goodness {
            if !(loc.goodness >= min) {
                return Err(Rejection::Goodness);
            }
        }
        if let Some(min) = self.min_offset {
            if loc.params.offset < min {
                return Err(Rejection::Offset);
            }
        }
        if let Some(min) = self.min_photons {
            if loc.photons < min {
                return Err(Rejection::Photons);
            }
        }
        Ok(())
    }
}
