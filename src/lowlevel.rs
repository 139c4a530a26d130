//! Low-level building blocks for custom localization pipelines.
//!
//! These expose candidate detection, region labeling, blob detection,
//! duplicate handling and the least-squares solver used by the high-level
//! localizers. Most users should prefer [`crate::Localizer`].

pub use crate::candidate::blob::{detect_blobs, Blob, BlobParams};
pub use crate::candidate::dedup::{
    annotate_min_distances, filter_new_locs, is_duplicate, remove_pairwise_duplicates, MAX_MIN_DIST,
};
pub use crate::candidate::labeling::{label_regions, split_regions, Region, SplitMode};
pub use crate::candidate::{
    area, detect_candidates, find_maxima, weighted_centroid, Candidate, DetectionMode, DetectionParams,
};
pub use crate::psf::{AxialCurve, SmoothingSpline};
pub use crate::refine::lm::{covariance, optimize, residuals, Samples};
pub use crate::refine::{LmConfig, LmModel, LmResult};
pub use crate::search::gates::{AcceptanceGates, Rejection};
