//! Duplicate suppression and nearest-neighbour annotation.

use crate::psf::{GaussianPsf, MoleculeLoc};
use crate::util::math::dist_xy;

/// Nearest-neighbour distances are capped at this value.
pub const MAX_MIN_DIST: f64 = 10e-6;

/// Returns true if `coord` lies within `min_dist` (inclusive) of any emitter.
pub fn is_duplicate(coord: (f64, f64), locs: &[MoleculeLoc], min_dist: f64) -> bool {
    locs.iter().any(|l| dist_xy(l.coord(), coord) <= min_dist)
}

/// Filters one iteration's fits against the accepted emitters and each other.
///
/// `new_locs` must be sorted by decreasing goodness. A fit is dropped if it
/// is closer than `min_dist` to an accepted emitter, or closer than
/// `min_same_iteration_dist` to a better fit of the same iteration. The
/// surviving fits keep their order.
pub fn filter_new_locs(
    accepted: &[MoleculeLoc],
    new_locs: Vec<MoleculeLoc>,
    min_dist: f64,
    min_same_iteration_dist: f64,
) -> Vec<MoleculeLoc> {
    let keep: Vec<bool> = new_locs
        .iter()
        .enumerate()
        .map(|(i, loc)| {
            let c = loc.coord();
            let near_accepted = accepted.iter().any(|a| dist_xy(a.coord(), c) < min_dist);
            let near_better = new_locs[..i]
                .iter()
                .any(|b| dist_xy(b.coord(), c) < min_same_iteration_dist);
            !near_accepted && !near_better
        })
        .collect();
    new_locs
        .into_iter()
        .zip(keep)
        .filter_map(|(loc, k)| k.then_some(loc))
        .collect()
}

/// Drops fits closer than `min_dist` to an earlier emitter, in list order.
///
/// Emitters already in `accepted` are never removed; the returned fits are
/// the members of `new_locs` that survive.
pub fn remove_pairwise_duplicates(
    accepted: &[MoleculeLoc],
    new_locs: Vec<MoleculeLoc>,
    min_dist: f64,
) -> Vec<MoleculeLoc> {
    let mut kept: Vec<MoleculeLoc> = Vec::with_capacity(new_locs.len());
    for loc in new_locs {
        let c = loc.coord();
        let dup = accepted
            .iter()
            .chain(kept.iter())
            .any(|other| dist_xy(other.coord(), c) < min_dist);
        if !dup {
            kept.push(loc);
        }
    }
    kept
}

/// Sets each emitter's nearest-neighbour distance and refreshes its scores.
///
/// Distances are capped at [`MAX_MIN_DIST`]; a lone emitter gets the cap.
pub fn annotate_min_distances(locs: &mut [MoleculeLoc], psf: &GaussianPsf) {
    let coords: Vec<(f64, f64)> = locs.iter().map(MoleculeLoc::coord).collect();
    for (i, loc) in locs.iter_mut().enumerate() {
        let nearest = coords
            .iter()
            .enumerate()
            .filter(|&(j, _)| j != i)
            .map(|(_, &c)| dist_xy(c, coords[i]))
            .fold(MAX_MIN_DIST, f64::min);
        loc.min_dist_xy = nearest;
        psf.rate(loc);
    }
}
