//! Convenience helpers for loading frames via the `image` crate.
//!
//! Available when the `image-io` feature is enabled. Camera counts (ADU) are
//! converted to photons as `(adu - baseline) * gain`.

use crate::image::Frame;
use crate::util::{SmolPhotError, SmolPhotResult};
use std::path::Path;

/// Conversion from raw camera counts to photons.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PhotonConversion {
    /// Camera offset in ADU subtracted before scaling.
    pub baseline: f64,
    /// Photons per ADU.
    pub gain: f64,
}

impl Default for PhotonConversion {
    fn default() -> Self {
        Self {
            baseline: 0.0,
            gain: 1.0,
        }
    }
}

/// Creates a photon frame from a 16-bit grayscale buffer.
pub fn frame_from_gray16(
    img: &image::ImageBuffer<image::Luma<u16>, Vec<u16>>,
    pixel_size: f64,
    conversion: PhotonConversion,
) -> SmolPhotResult<Frame> {
    let width = img.width() as usize;
    let height = img.height() as usize;
    let data = img
        .as_raw()
        .iter()
        .map(|&adu| (adu as f64 - conversion.baseline) * conversion.gain)
        .collect();
    Frame::new(data, width, height, pixel_size)
}

/// Creates a photon frame from an 8-bit grayscale buffer.
pub fn frame_from_gray8(
    img: &image::GrayImage,
    pixel_size: f64,
    conversion: PhotonConversion,
) -> SmolPhotResult<Frame> {
    let width = img.width() as usize;
    let height = img.height() as usize;
    let data = img
        .as_raw()
        .iter()
        .map(|&adu| (adu as f64 - conversion.baseline) * conversion.gain)
        .collect();
    Frame::new(data, width, height, pixel_size)
}

/// Creates a photon frame from a dynamic image.
///
/// 8-bit grayscale images keep their raw counts; everything else is
/// converted to 16-bit gray first.
pub fn frame_from_dynamic_image(
    img: &image::DynamicImage,
    pixel_size: f64,
    conversion: PhotonConversion,
) -> SmolPhotResult<Frame> {
    match img {
        image::DynamicImage::ImageLuma8(gray) => frame_from_gray8(gray, pixel_size, conversion),
        other => frame_from_gray16(&other.to_luma16(), pixel_size, conversion),
    }
}

/// Loads an image from disk as a photon frame.
pub fn load_frame<P: AsRef<Path>>(
    path: P,
    pixel_size: f64,
    conversion: PhotonConversion,
) -> SmolPhotResult<Frame> {
    let img = image::open(path).map_err(|err| SmolPhotError::ImageIo {
        reason: err.to_string(),
    })?;
    frame_from_dynamic_image(&img, pixel_size, conversion)
}
