//! Candidate emitter detection.
//!
//! Detection scans a frame (or a sub-rectangle of it) for pixels above a
//! threshold, optionally requiring them to be local maxima, and keeps those
//! whose 3x3 neighbourhood holds enough pixels above the noise floor.
//! Region labeling, LoG blob detection and duplicate handling live in the
//! submodules.

pub mod blob;
pub mod dedup;
pub mod labeling;

use crate::image::{Frame, PixelBox, PixelCoord};
use crate::util::{SmolPhotError, SmolPhotResult};

/// Pixel-level detection rule.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub enum DetectionMode {
    /// Above threshold and not smaller than any of the 8 neighbours.
    #[default]
    LocalMaxima,
    /// Above threshold only.
    AboveThreshold,
}

/// Detection thresholds.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct DetectionParams {
    pub mode: DetectionMode,
    /// Minimum pixel value (exclusive).
    pub threshold: f64,
    /// Noise floor used to count the candidate area.
    pub noise_level: f64,
    /// Minimum number of 3x3 pixels above `noise_level`.
    pub min_area: usize,
}

impl DetectionParams {
    /// Validates the thresholds.
    pub fn validate(&self) -> SmolPhotResult<()> {
        if !self.threshold.is_finite() || !self.noise_level.is_finite() {
            return Err(SmolPhotError::InvalidConfig {
                reason: "detection thresholds must be finite",
            });
        }
        if self.min_area > 9 {
            return Err(SmolPhotError::InvalidConfig {
                reason: "min_area cannot exceed the 3x3 neighbourhood",
            });
        }
        Ok(())
    }
}

/// Detected pixel that may hold an emitter.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Candidate {
    pub pixel: PixelCoord,
    /// Number of 3x3 pixels above the noise floor.
    pub area: usize,
    /// Intensity-weighted centroid of the 3x3 neighbourhood (physical).
    pub weighted_centroid: (f64, f64),
}

/// Pixels inside `bounds` (and at least 1 px from the frame border) that
/// pass the detection rule, in raster order.
pub fn find_maxima(frame: &Frame, bounds: PixelBox, mode: DetectionMode, threshold: f64) -> Vec<PixelCoord> {
    let (w, h) = (frame.width(), frame.height());
    let mut out = Vec::new();
    if w < 3 || h < 3 {
        return out;
    }
    let y_range = bounds.y0.max(1)..bounds.y1.min(h - 1);
    let x_range = bounds.x0.max(1)..bounds.x1.min(w - 1);
    for y in y_range {
        for x in x_range.clone() {
            let v = frame.at(x, y);
            if !(v > threshold) {
                continue;
            }
            if mode == DetectionMode::LocalMaxima && !is_local_max(frame, x, y, v) {
                continue;
            }
            out.push(PixelCoord::new(x, y));
        }
    }
    out
}

#[inline]
fn is_local_max(frame: &Frame, x: usize, y: usize, v: f64) -> bool {
    for ny in y - 1..=y + 1 {
        for nx in x - 1..=x + 1 {
            if (nx, ny) != (x, y) && frame.at(nx, ny) > v {
                return false;
            }
        }
    }
    true
}

/// Number of pixels in the 3x3 neighbourhood strictly above `noise_level`.
///
/// `p` must be at least 1 px away from the frame border.
pub fn area(frame: &Frame, p: PixelCoord, noise_level: f64) -> usize {
    let mut count = 0;
    for y in p.y - 1..=p.y + 1 {
        for x in p.x - 1..=p.x + 1 {
            if frame.at(x, y) > noise_level {
                count += 1;
            }
        }
    }
    count
}

/// Intensity-weighted centroid of the 3x3 neighbourhood of `p`.
///
/// Falls back to the pixel center when the weights do not sum to a
/// positive value. `p` must be at least 1 px away from the frame border.
pub fn weighted_centroid(frame: &Frame, p: PixelCoord) -> (f64, f64) {
    let mut sum = 0.0;
    let mut sx = 0.0;
    let mut sy = 0.0;
    for y in p.y - 1..=p.y + 1 {
        for x in p.x - 1..=p.x + 1 {
            let v = frame.at(x, y);
            sum += v;
            sx += v * x as f64;
            sy += v * y as f64;
        }
    }
    if sum > 0.0 {
        (frame.pixel_to_coord(sx / sum), frame.pixel_to_coord(sy / sum))
    } else {
        frame.pixel_center(p)
    }
}

/// Runs detection inside `bounds` and builds candidates.
pub fn detect_candidates(frame: &Frame, bounds: PixelBox, params: &DetectionParams) -> Vec<Candidate> {
    find_maxima(frame, bounds, params.mode, params.threshold)
        .into_iter()
        .filter_map(|pixel| {
            let area = area(frame, pixel, params.noise_level);
            (area >= params.min_area).then(|| Candidate {
                pixel,
                area,
                weighted_centroid: weighted_centroid(frame, pixel),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{detect_candidates, find_maxima, weighted_centroid, DetectionMode, DetectionParams};
    use crate::image::{Frame, PixelCoord};

    fn frame_with(points: &[(usize, usize, f64)]) -> Frame {
        let mut frame = Frame::filled(8, 8, 1.0, 0.0).unwrap();
        for &(x, y, v) in points {
            frame.data_mut()[y * 8 + x] = v;
        }
        frame
    }

    #[test]
    fn local_maxima_skip_border_and_non_maxima() {
        let frame = frame_with(&[(0, 3, 50.0), (3, 3, 40.0), (4, 3, 30.0), (6, 6, 20.0)]);
        let full = frame.full_box();
        let maxima = find_maxima(&frame, full, DetectionMode::LocalMaxima, 10.0);
        assert_eq!(maxima, vec![PixelCoord::new(3, 3), PixelCoord::new(6, 6)]);
        let all = find_maxima(&frame, full, DetectionMode::AboveThreshold, 10.0);
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn plateau_pixels_are_all_maxima() {
        let frame = frame_with(&[(3, 3, 40.0), (4, 3, 40.0)]);
        let maxima = find_maxima(&frame, frame.full_box(), DetectionMode::LocalMaxima, 10.0);
        assert_eq!(maxima.len(), 2);
    }

    #[test]
    fn area_filter_drops_isolated_spikes() {
        let frame = frame_with(&[(2, 2, 100.0), (5, 5, 100.0), (5, 4, 20.0), (4, 5, 20.0), (6, 5, 20.0)]);
        let params = DetectionParams {
            mode: DetectionMode::LocalMaxima,
            threshold: 50.0,
            noise_level: 10.0,
            min_area: 4,
        };
        let cands = detect_candidates(&frame, frame.full_box(), &params);
        assert_eq!(cands.len(), 1);
        assert_eq!(cands[0].pixel, PixelCoord::new(5, 5));
        assert_eq!(cands[0].area, 4);
    }

    #[test]
    fn weighted_centroid_leans_towards_brighter_side() {
        let frame = frame_with(&[(3, 3, 10.0), (4, 3, 10.0)]);
        let (x, y) = weighted_centroid(&frame, PixelCoord::new(3, 3));
        assert!((x - 4.0).abs() < 1e-12);
        assert!((y - 3.5).abs() < 1e-12);
        let empty = frame_with(&[]);
        assert_eq!(weighted_centroid(&empty, PixelCoord::new(2, 2)), (2.5, 2.5));
    }
}
