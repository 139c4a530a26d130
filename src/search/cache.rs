//! Potential-location cache for the iterative localizer.
//!
//! Candidates live in an arena indexed by a dense id. Each one memoizes its
//! fit result per half-width, so after an emitter is subtracted only the
//! candidates inside the affected box have to be detected and fitted again.
//! Invalidated entries are compacted away on every update.

use std::collections::BTreeMap;

use crate::candidate::dedup::is_duplicate;
use crate::candidate::{detect_candidates, Candidate, DetectionParams};
use crate::image::{Frame, PixelBox};
use crate::psf::{FitMode, GaussianPsf, MoleculeLoc};
use crate::search::gates::{AcceptanceGates, Rejection};
use crate::search::iterative::{InitialFitLoc, IterativeConfig};
use crate::trace::trace_debug;
use crate::util::math::dist_xy;

/// The update box around an accepted emitter extends at least this many
/// pixels beyond the configured maximum half-width.
const MIN_UPDATE_HALF_WIDTH: usize = 5;

struct Entry {
    candidate: Candidate,
    /// Half-width -> fit that passed the gates, or `None`.
    fits: BTreeMap<usize, Option<MoleculeLoc>>,
}

impl Entry {
    fn new(candidate: Candidate) -> Self {
        Self {
            candidate,
            fits: BTreeMap::new(),
        }
    }
}

/// Result of subtracting one accepted emitter.
#[derive(Copy, Clone, Debug, PartialEq)]
pub(crate) struct Update {
    pub affected: PixelBox,
    pub fresh_candidates: usize,
}

pub(crate) struct PotentialLocCache<'a> {
    psf: &'a GaussianPsf,
    mode: FitMode,
    detection: DetectionParams,
    initial_fit_loc: InitialFitLoc,
    initial_max_dist: f64,
    duplicate_min_dist: f64,
    gates: AcceptanceGates,
    working: Frame,
    entries: Vec<Entry>,
    locs: Vec<MoleculeLoc>,
    range: (usize, usize),
    max_half_width: usize,
}

impl<'a> PotentialLocCache<'a> {
    /// Copies `frame` and detects candidates over all of it.
    pub fn new(frame: &Frame, psf: &'a GaussianPsf, mode: FitMode, config: &IterativeConfig) -> Self {
        let working = frame.clone();
        let detection = config.detection();
        let entries = detect_candidates(&working, working.full_box(), &detection)
            .into_iter()
            .map(Entry::new)
            .collect();
        Self {
            psf,
            mode,
            detection,
            initial_fit_loc: config.initial_fit_loc,
            initial_max_dist: config.initial_max_dist,
            duplicate_min_dist: config.duplicate_min_dist,
            gates: AcceptanceGates {
                border: config.border,
                axial_range: psf.config().axial_range,
                min_goodness: Some(config.min_goodness),
                min_offset: Some(config.min_offset),
                min_photons: None,
            },
            working,
            entries,
            locs: Vec::new(),
            range: (config.max_half_width, config.max_half_width),
            max_half_width: config.max_half_width,
        }
    }

    pub fn fit_pixels_range(&self) -> (usize, usize) {
        self.range
    }

    pub fn set_fit_pixels_range(&mut self, min: usize, max: usize) {
        self.range = (min, max);
    }

    pub fn live_candidates(&self) -> usize {
        self.entries.len()
    }

    pub fn working_frame(&self) -> &Frame {
        &self.working
    }

    pub fn accepted(&self) -> &[MoleculeLoc] {
        &self.locs
    }

    pub fn into_locs(self) -> Vec<MoleculeLoc> {
        self.locs
    }

    /// Best fit over all live candidates and half-widths in the current range.
    pub fn best_loc_fit(&mut self) -> Option<MoleculeLoc> {
        let (lo, hi) = self.range;
        let mut best: Option<(usize, usize)> = None;
        let mut best_goodness = f64::NEG_INFINITY;
        for idx in 0..self.entries.len() {
            for half_width in lo..=hi {
                if let Some(goodness) = self.cached_goodness(idx, half_width) {
                    if best.is_none() || goodness > best_goodness {
                        best = Some((idx, half_width));
                        best_goodness = goodness;
                    }
                }
            }
        }
        let (idx, half_width) = best?;
        self.entries[idx].fits.get(&half_width).cloned().flatten()
    }

    /// Goodness of the memoized (or freshly computed) fit, rechecking
    /// duplicates on every access.
    fn cached_goodness(&mut self, idx: usize, half_width: usize) -> Option<f64> {
        if !self.entries[idx].fits.contains_key(&half_width) {
            let candidate = self.entries[idx].candidate;
            let fit = self.fit_candidate(candidate, half_width);
            self.entries[idx].fits.insert(half_width, fit);
        }
        let slot = self.entries[idx].fits.get_mut(&half_width)?;
        let loc = slot.as_ref()?;
        if is_duplicate(loc.coord(), &self.locs, self.duplicate_min_dist) {
            trace_debug!("dismissed fit at ({:e}, {:e}): {}", loc.x, loc.y, Rejection::Duplicate.as_str());
            *slot = None;
            return None;
        }
        Some(loc.goodness)
    }

    fn fit_candidate(&self, candidate: Candidate, half_width: usize) -> Option<MoleculeLoc> {
        let start = match self.initial_fit_loc {
            InitialFitLoc::PixelCenter => self.working.pixel_center(candidate.pixel),
            InitialFitLoc::WeightedCentroid => candidate.weighted_centroid,
        };
        let mut loc = self
            .psf
            .fit(&self.working, start, half_width, self.mode, self.initial_max_dist)?;
        loc.area = Some(candidate.area);
        loc.dist_fit_weighted_centroid = Some(dist_xy(candidate.weighted_centroid, (loc.params.x0, loc.params.y0)));
        self.psf.rate(&mut loc);
        match self.gates.check(&loc, &self.working) {
            Ok(()) => Some(loc),
            Err(reason) => {
                trace_debug!(
                    "dismissed fit of pixel ({}, {}) at half-width {}: {}",
                    candidate.pixel.x,
                    candidate.pixel.y,
                    half_width,
                    reason.as_str()
                );
                None
            }
        }
    }

    /// Accepts `loc`: subtracts it from the working frame, drops the
    /// candidates around it and detects fresh ones in the affected box.
    pub fn add_location_and_update(&mut self, loc: MoleculeLoc) -> Update {
        self.working.subtract_locs(self.psf, std::slice::from_ref(&loc), false);
        let reach = loc.half_width.max(MIN_UPDATE_HALF_WIDTH) + self.max_half_width;
        let affected = self.working.box_around(loc.pixel, reach);
        self.entries.retain(|entry| !affected.contains(entry.candidate.pixel));
        let fresh = detect_candidates(&self.working, affected, &self.detection);
        let fresh_candidates = fresh.len();
        self.entries.extend(fresh.into_iter().map(Entry::new));
        self.locs.push(loc);
        Update {
            affected,
            fresh_candidates,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::PotentialLocCache;
    use crate::image::Frame;
    use crate::psf::{FitMode, GaussianPsf, PsfConfig, PsfParams};
    use crate::search::iterative::IterativeConfig;

    const PS: f64 = 100e-9;

    fn two_spots(psf: &GaussianPsf) -> Frame {
        let (w, h) = (56, 56);
        let mut data = vec![5.0; w * h];
        for (cx, cy) in [(14.5, 14.5), (40.5, 40.5)] {
            let params = PsfParams {
                amp: 1000.0,
                x0: cx * PS,
                y0: cy * PS,
                sigma_x: 1.5 * PS,
                sigma_y: 1.5 * PS,
                offset: 0.0,
            };
            for y in 0..h {
                for x in 0..w {
                    data[y * w + x] += psf.evaluate(&params, (x as f64 + 0.5) * PS, (y as f64 + 0.5) * PS);
                }
            }
        }
        Frame::new(data, w, h, PS).unwrap()
    }

    #[test]
    fn affected_box_uses_configured_max_half_width() {
        let psf = GaussianPsf::new(PsfConfig {
            initial_sigma: 150e-9,
            ..PsfConfig::default()
        })
        .unwrap();
        let frame = two_spots(&psf);
        let config = IterativeConfig {
            min_half_width: 3,
            max_half_width: 7,
            ..IterativeConfig::default()
        };
        let mut cache = PotentialLocCache::new(&frame, &psf, FitMode::Sigma, &config);
        assert_eq!(cache.live_candidates(), 2);

        // Loosened all the way down before the accept.
        cache.set_fit_pixels_range(3, 3);
        let loc = cache.best_loc_fit().unwrap();
        assert_eq!(loc.half_width, 3);
        let pixel = loc.pixel;

        let update = cache.add_location_and_update(loc);
        assert_eq!(update.affected, frame.box_around(pixel, 5 + 7));
        assert_eq!(update.affected.x1 - update.affected.x0, 25);
        assert_eq!(update.fresh_candidates, 0);

        // The invalidated entry is gone; only the far spot remains.
        assert_eq!(cache.live_candidates(), 1);
        cache.set_fit_pixels_range(7, 7);
        let other = cache.best_loc_fit().unwrap();
        assert!(!update.affected.contains(other.pixel));
    }

    #[test]
    fn arena_does_not_grow_across_updates() {
        let psf = GaussianPsf::new(PsfConfig {
            initial_sigma: 150e-9,
            ..PsfConfig::default()
        })
        .unwrap();
        let frame = two_spots(&psf);
        let mut cache = PotentialLocCache::new(&frame, &psf, FitMode::Sigma, &IterativeConfig::default());
        while let Some(loc) = cache.best_loc_fit() {
            cache.add_location_and_update(loc);
            assert!(cache.live_candidates() <= 1);
        }
        assert_eq!(cache.accepted().len(), 2);
        assert_eq!(cache.live_candidates(), 0);
    }
}
