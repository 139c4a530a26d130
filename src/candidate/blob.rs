//! Laplacian-of-Gaussian blob detection.
//!
//! The frame is filtered with a scale-normalised negative LoG at `num_sigma`
//! evenly spaced scales. Local maxima of the resulting scale space (3x3x3
//! neighbourhood) above the threshold become blobs, and blobs whose disks
//! overlap by more than half the smaller disk are pruned in favour of the
//! larger scale.

use crate::image::{Frame, PixelCoord};
use crate::util::{SmolPhotError, SmolPhotResult};

/// Gaussian kernels are truncated at this many standard deviations.
const TRUNCATE: f64 = 4.0;

/// Scale-space settings; sigmas are in pixels.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BlobParams {
    pub threshold: f64,
    pub min_sigma: f64,
    pub max_sigma: f64,
    pub num_sigma: usize,
    /// Fractional disk overlap above which the smaller blob is dropped.
    pub overlap: f64,
}

impl Default for BlobParams {
    fn default() -> Self {
        Self {
            threshold: 200.0,
            min_sigma: 1.0,
            max_sigma: 5.0,
            num_sigma: 10,
            overlap: 0.5,
        }
    }
}

impl BlobParams {
    /// Validates the scale range.
    pub fn validate(&self) -> SmolPhotResult<()> {
        if !(self.min_sigma > 0.0 && self.min_sigma <= self.max_sigma && self.max_sigma.is_finite()) {
            return Err(SmolPhotError::InvalidConfig {
                reason: "blob sigmas must satisfy 0 < min_sigma <= max_sigma",
            });
        }
        if self.num_sigma == 0 {
            return Err(SmolPhotError::InvalidConfig {
                reason: "num_sigma must be at least 1",
            });
        }
        if !(0.0..=1.0).contains(&self.overlap) {
            return Err(SmolPhotError::InvalidConfig {
                reason: "overlap must lie in [0, 1]",
            });
        }
        Ok(())
    }

    fn sigmas(&self) -> Vec<f64> {
        if self.num_sigma == 1 {
            return vec![self.min_sigma];
        }
        let step = (self.max_sigma - self.min_sigma) / (self.num_sigma - 1) as f64;
        (0..self.num_sigma)
            .map(|i| self.min_sigma + step * i as f64)
            .collect()
    }
}

/// Detected blob at an integer pixel with its scale.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Blob {
    pub pixel: PixelCoord,
    pub sigma: f64,
}

/// Mirror-reflects an index into `0..len` (edge samples repeated).
#[inline]
fn reflect(i: isize, len: usize) -> usize {
    let n = len as isize;
    let period = 2 * n;
    let mut m = i.rem_euclid(period);
    if m >= n {
        m = period - 1 - m;
    }
    m as usize
}

/// Normalised Gaussian (`order == 0`) or its second derivative (`order == 2`).
fn gaussian_kernel_1d(sigma: f64, order: u8) -> Vec<f64> {
    let radius = (TRUNCATE * sigma + 0.5) as isize;
    let s2 = sigma * sigma;
    let phi: Vec<f64> = (-radius..=radius)
        .map(|x| (-0.5 * (x * x) as f64 / s2).exp())
        .collect();
    let sum: f64 = phi.iter().sum();
    (-radius..=radius)
        .zip(phi)
        .map(|(x, p)| {
            let p = p / sum;
            if order == 2 {
                let x = x as f64;
                p * (x * x / (s2 * s2) - 1.0 / s2)
            } else {
                p
            }
        })
        .collect()
}

fn correlate_rows(src: &[f64], w: usize, h: usize, kernel: &[f64]) -> Vec<f64> {
    let r = (kernel.len() / 2) as isize;
    let mut out = vec![0.0; src.len()];
    for y in 0..h {
        let row = &src[y * w..(y + 1) * w];
        for x in 0..w {
            out[y * w + x] = kernel
                .iter()
                .enumerate()
                .map(|(k, kv)| kv * row[reflect(x as isize + k as isize - r, w)])
                .sum();
        }
    }
    out
}

fn correlate_cols(src: &[f64], w: usize, h: usize, kernel: &[f64]) -> Vec<f64> {
    let r = (kernel.len() / 2) as isize;
    let mut out = vec![0.0; src.len()];
    for y in 0..h {
        for x in 0..w {
            out[y * w + x] = kernel
                .iter()
                .enumerate()
                .map(|(k, kv)| kv * src[reflect(y as isize + k as isize - r, h) * w + x])
                .sum();
        }
    }
    out
}

/// `-sigma^2 * LoG(frame)` at one scale.
fn scaled_negative_log(frame: &Frame, sigma: f64) -> Vec<f64> {
    let (w, h) = (frame.width(), frame.height());
    let g0 = gaussian_kernel_1d(sigma, 0);
    let g2 = gaussian_kernel_1d(sigma, 2);
    let data = frame.data();
    let dxx = correlate_cols(&correlate_rows(data, w, h, &g2), w, h, &g0);
    let dyy = correlate_cols(&correlate_rows(data, w, h, &g0), w, h, &g2);
    let s2 = sigma * sigma;
    dxx.iter().zip(&dyy).map(|(a, b)| -(a + b) * s2).collect()
}

/// Overlap of two disks relative to the area of the smaller one.
fn disk_overlap(a: &Blob, b: &Blob) -> f64 {
    if a.sigma <= 0.0 || b.sigma <= 0.0 {
        return 0.0;
    }
    let r1 = a.sigma * std::f64::consts::SQRT_2;
    let r2 = b.sigma * std::f64::consts::SQRT_2;
    let dx = a.pixel.x as f64 - b.pixel.x as f64;
    let dy = a.pixel.y as f64 - b.pixel.y as f64;
    let d = (dx * dx + dy * dy).sqrt();
    if d > r1 + r2 {
        return 0.0;
    }
    if d <= (r1 - r2).abs() {
        return 1.0;
    }
    let c1 = ((d * d + r1 * r1 - r2 * r2) / (2.0 * d * r1)).clamp(-1.0, 1.0);
    let c2 = ((d * d + r2 * r2 - r1 * r1) / (2.0 * d * r2)).clamp(-1.0, 1.0);
    let a1 = -d + r2 + r1;
    let a2 = d - r2 + r1;
    let a3 = d + r2 - r1;
    let a4 = d + r2 + r1;
    let area = r1 * r1 * c1.acos() + r2 * r2 * c2.acos() - 0.5 * (a1 * a2 * a3 * a4).abs().sqrt();
    area / (std::f64::consts::PI * r1.min(r2).powi(2))
}

/// Detects blobs in `frame`, ordered by scale then raster position.
pub fn detect_blobs(frame: &Frame, params: &BlobParams) -> Vec<Blob> {
    let (w, h) = (frame.width(), frame.height());
    let sigmas = params.sigmas();
    let cube: Vec<Vec<f64>> = sigmas.iter().map(|&s| scaled_negative_log(frame, s)).collect();

    let mut blobs = Vec::new();
    for (si, layer) in cube.iter().enumerate() {
        let s_lo = si.saturating_sub(1);
        let s_hi = (si + 1).min(sigmas.len() - 1);
        for y in 0..h {
            for x in 0..w {
                let v = layer[y * w + x];
                if !(v > params.threshold) {
                    continue;
                }
                let mut is_max = true;
                'scan: for other in &cube[s_lo..=s_hi] {
                    for ny in y.saturating_sub(1)..=(y + 1).min(h - 1) {
                        for nx in x.saturating_sub(1)..=(x + 1).min(w - 1) {
                            if other[ny * w + nx] > v {
                                is_max = false;
                                break 'scan;
                            }
                        }
                    }
                }
                if is_max {
                    blobs.push(Blob {
                        pixel: PixelCoord::new(x, y),
                        sigma: sigmas[si],
                    });
                }
            }
        }
    }

    prune(&mut blobs, params.overlap);
    blobs.retain(|b| b.sigma > 0.0);
    blobs
}

fn prune(blobs: &mut [Blob], overlap: f64) {
    for i in 0..blobs.len() {
        for j in i + 1..blobs.len() {
            if disk_overlap(&blobs[i], &blobs[j]) > overlap {
                if blobs[i].sigma > blobs[j].sigma {
                    blobs[j].sigma = 0.0;
                } else {
                    blobs[i].sigma = 0.0;
                }
            }
        }
    }
}
