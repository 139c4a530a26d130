//! Error types for smolphot.

use thiserror::Error;

/// Result alias for smolphot operations.
pub type SmolPhotResult<T> = std::result::Result<T, SmolPhotError>;

/// Errors raised while constructing frames or validating configuration.
///
/// Numerical failures inside a PSF fit are not errors; they surface as a
/// rejected fit (`None`) and the localization loop moves on.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SmolPhotError {
    /// Frame width or height is zero.
    #[error("invalid dimensions: width={width}, height={height}")]
    InvalidDimensions { width: usize, height: usize },
    /// Pixel buffer is smaller than `width * height`.
    #[error("buffer too small: needed {needed}, got {got}")]
    BufferTooSmall { needed: usize, got: usize },
    /// Pixel size is not a positive finite number.
    #[error("invalid pixel size: {pixel_size}")]
    InvalidPixelSize { pixel_size: f64 },
    /// Fit region half-width range is empty or starts at zero.
    #[error("invalid half-width range: min={min}, max={max}")]
    InvalidHalfWidthRange { min: usize, max: usize },
    /// A configuration value is out of its valid domain.
    #[error("invalid config: {reason}")]
    InvalidConfig { reason: &'static str },
    /// Axial (z) fitting was requested but no calibration is loaded.
    #[error("axial fit mode requires calibration data")]
    MissingCalibration,
    /// Image decoding failed.
    #[error("image io error: {reason}")]
    ImageIo { reason: String },
}
