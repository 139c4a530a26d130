//! Connected-region labeling and splitting of oversized regions.
//!
//! Labeling uses 8-connectivity and a two-pass union-find scan. Regions are
//! reported in raster order of their first pixel.

use crate::image::{Frame, PixelBox, PixelCoord};

/// How an oversized region is broken up.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub enum SplitMode {
    /// Keep only the brightest sub-region, threshold `(max + mean) / 2`.
    #[default]
    SinglePeak,
    /// Keep every sub-region, threshold `mean + 0.01 (max - mean)`.
    MultiPeak,
}

/// Connected set of pixels with intensity statistics.
#[derive(Clone, Debug, PartialEq)]
pub struct Region {
    pixels: Vec<PixelCoord>,
    max_intensity: f64,
    mean_intensity: f64,
    /// Weighted centroid in fractional pixel indices.
    centroid: (f64, f64),
}

impl Region {
    fn from_pixels(frame: &Frame, pixels: Vec<PixelCoord>) -> Self {
        let mut max_intensity = f64::NEG_INFINITY;
        let mut sum = 0.0;
        let mut sx = 0.0;
        let mut sy = 0.0;
        for p in &pixels {
            let v = frame.at(p.x, p.y);
            max_intensity = max_intensity.max(v);
            sum += v;
            sx += v * p.x as f64;
            sy += v * p.y as f64;
        }
        let n = pixels.len() as f64;
        let centroid = if sum != 0.0 {
            (sx / sum, sy / sum)
        } else {
            let (ux, uy) = pixels
                .iter()
                .fold((0.0, 0.0), |(ax, ay), p| (ax + p.x as f64, ay + p.y as f64));
            (ux / n, uy / n)
        };
        Self {
            pixels,
            max_intensity,
            mean_intensity: sum / n,
            centroid,
        }
    }

    /// Member pixels in raster order.
    pub fn pixels(&self) -> &[PixelCoord] {
        &self.pixels
    }

    /// Number of member pixels.
    pub fn area(&self) -> usize {
        self.pixels.len()
    }

    pub fn max_intensity(&self) -> f64 {
        self.max_intensity
    }

    pub fn mean_intensity(&self) -> f64 {
        self.mean_intensity
    }

    /// Intensity-weighted centroid in fractional pixel indices.
    pub fn weighted_centroid(&self) -> (f64, f64) {
        self.centroid
    }

    /// Bounding box of the region.
    fn bounds(&self) -> PixelBox {
        let mut b = PixelBox {
            x0: usize::MAX,
            y0: usize::MAX,
            x1: 0,
            y1: 0,
        };
        for p in &self.pixels {
            b.x0 = b.x0.min(p.x);
            b.y0 = b.y0.min(p.y);
            b.x1 = b.x1.max(p.x + 1);
            b.y1 = b.y1.max(p.y + 1);
        }
        b
    }

    /// Sub-regions formed by member pixels strictly above `threshold`.
    fn sub_regions(&self, frame: &Frame, threshold: f64) -> Vec<Region> {
        let bounds = self.bounds();
        let bw = bounds.x1 - bounds.x0;
        let mut mask = vec![false; bounds.area()];
        for p in &self.pixels {
            if frame.at(p.x, p.y) > threshold {
                mask[(p.y - bounds.y0) * bw + (p.x - bounds.x0)] = true;
            }
        }
        label_mask(frame, bounds, &mask)
    }
}

fn find_root(parents: &mut [usize], label: usize) -> usize {
    let mut current = label;
    while current != parents[current] {
        parents[current] = parents[parents[current]];
        current = parents[current];
    }
    current
}

fn union(parents: &mut [usize], a: usize, b: usize) {
    let ra = find_root(parents, a);
    let rb = find_root(parents, b);
    if ra < rb {
        parents[rb] = ra;
    } else if rb < ra {
        parents[ra] = rb;
    }
}

/// Labels the `true` cells of a mask covering `bounds` (row-major).
fn label_mask(frame: &Frame, bounds: PixelBox, mask: &[bool]) -> Vec<Region> {
    let bw = bounds.x1 - bounds.x0;
    let bh = bounds.y1 - bounds.y0;
    let mut labels = vec![0usize; mask.len()];
    let mut parents = vec![0usize];

    for y in 0..bh {
        for x in 0..bw {
            let idx = y * bw + x;
            if !mask[idx] {
                continue;
            }
            let mut neighbours = [0usize; 4];
            if x > 0 {
                neighbours[0] = labels[idx - 1];
            }
            if y > 0 {
                let up = idx - bw;
                neighbours[1] = labels[up];
                if x > 0 {
                    neighbours[2] = labels[up - 1];
                }
                if x + 1 < bw {
                    neighbours[3] = labels[up + 1];
                }
            }
            match neighbours.iter().copied().filter(|&l| l > 0).min() {
                None => {
                    let label = parents.len();
                    parents.push(label);
                    labels[idx] = label;
                }
                Some(min_label) => {
                    labels[idx] = min_label;
                    for &l in neighbours.iter().filter(|&&l| l > 0 && l != min_label) {
                        union(&mut parents, min_label, l);
                    }
                }
            }
        }
    }

    let mut slot = vec![usize::MAX; parents.len()];
    let mut groups: Vec<Vec<PixelCoord>> = Vec::new();
    for label in 1..parents.len() {
        let root = find_root(&mut parents, label);
        if slot[root] == usize::MAX {
            slot[root] = groups.len();
            groups.push(Vec::new());
        }
        slot[label] = slot[root];
    }
    for y in 0..bh {
        for x in 0..bw {
            let label = labels[y * bw + x];
            if label > 0 {
                groups[slot[label]].push(PixelCoord::new(bounds.x0 + x, bounds.y0 + y));
            }
        }
    }
    groups
        .into_iter()
        .map(|pixels| Region::from_pixels(frame, pixels))
        .collect()
}

/// Labels the pixels of `frame` strictly above `threshold`.
pub fn label_regions(frame: &Frame, threshold: f64) -> Vec<Region> {
    let mask: Vec<bool> = frame.data().iter().map(|&v| v > threshold).collect();
    label_mask(frame, frame.full_box(), &mask)
}

/// Splits regions larger than `max_area` until each fits, in input order.
///
/// A region that cannot be split further (no member pixel above the local
/// threshold) is kept whole.
pub fn split_regions(frame: &Frame, regions: Vec<Region>, max_area: usize, mode: SplitMode) -> Vec<Region> {
    let mut out = Vec::with_capacity(regions.len());
    let mut stack: Vec<Region> = regions.into_iter().rev().collect();
    while let Some(region) = stack.pop() {
        if region.area() <= max_area {
            out.push(region);
            continue;
        }
        let (max, mean) = (region.max_intensity, region.mean_intensity);
        let threshold = match mode {
            SplitMode::SinglePeak => 0.5 * (max + mean),
            SplitMode::MultiPeak => mean + 0.01 * (max - mean),
        };
        let subs = region.sub_regions(frame, threshold);
        if subs.is_empty() {
            out.push(region);
            continue;
        }
        match mode {
            SplitMode::SinglePeak => {
                let brightest = subs
                    .into_iter()
                    .reduce(|best, r| if r.max_intensity > best.max_intensity { r } else { best });
                if let Some(r) = brightest {
                    stack.push(r);
                }
            }
            SplitMode::MultiPeak => stack.extend(subs.into_iter().rev()),
        }
    }
    out
}
