//! End-to-end scenarios for the iterative localizer on synthetic frames.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use smolphot::{
    FitMode, Frame, GaussianPsf, IterativeConfig, IterativeLocalizer, PsfConfig, PsfParams,
    Termination,
};

const PIXEL_SIZE: f64 = 100e-9;

/// Renders Gaussian spots given in pixel units on a constant background.
fn render(width: usize, height: usize, offset: f64, spots: &[(f64, f64, f64, f64)]) -> Frame {
    let psf = GaussianPsf::new(PsfConfig::default()).unwrap();
    let mut data = vec![offset; width * height];
    for &(amp, x, y, sigma) in spots {
        let params = PsfParams {
            amp,
            x0: x * PIXEL_SIZE,
            y0: y * PIXEL_SIZE,
            sigma_x: sigma * PIXEL_SIZE,
            sigma_y: sigma * PIXEL_SIZE,
            offset: 0.0,
        };
        for py in 0..height {
            for px in 0..width {
                let cx = (px as f64 + 0.5) * PIXEL_SIZE;
                let cy = (py as f64 + 0.5) * PIXEL_SIZE;
                data[py * width + px] += psf.evaluate(&params, cx, cy);
            }
        }
    }
    Frame::new(data, width, height, PIXEL_SIZE).unwrap()
}

fn psf_with_sigma(sigma: f64) -> GaussianPsf {
    GaussianPsf::new(PsfConfig {
        initial_sigma: sigma,
        ..PsfConfig::default()
    })
    .unwrap()
}

fn localizer(config: IterativeConfig) -> IterativeLocalizer {
    IterativeLocalizer::new(config).unwrap()
}

#[test]
fn single_isolated_spot_is_found_once() {
    let frame = render(24, 24, 5.0, &[(1000.0, 12.3, 11.7, 1.5)]);
    let psf = psf_with_sigma(150e-9);
    let result = localizer(IterativeConfig::default())
        .localize(&frame, &psf, FitMode::Sigma)
        .unwrap();

    assert_eq!(result.termination, Termination::Exhausted);
    assert_eq!(result.locs.len(), 1);
    let loc = &result.locs[0];
    assert!((loc.x / PIXEL_SIZE - 12.3).abs() < 0.05, "x = {}", loc.x / PIXEL_SIZE);
    assert!((loc.y / PIXEL_SIZE - 11.7).abs() < 0.05, "y = {}", loc.y / PIXEL_SIZE);
    assert!((loc.params.amp - 1000.0).abs() < 1.0);
    assert!((loc.params.offset - 5.0).abs() < 0.1);
    assert_eq!(loc.iteration, 0);
    assert!(loc.min_dist_xy.is_infinite() || loc.min_dist_xy >= 10e-6);
}

#[test]
fn close_pair_yields_a_single_emitter() {
    let frame = render(24, 24, 5.0, &[(1000.0, 11.5, 12.0, 1.5), (1000.0, 13.5, 12.0, 1.5)]);
    let psf = psf_with_sigma(150e-9);
    let cfg = IterativeConfig {
        duplicate_min_dist: 300e-9,
        ..IterativeConfig::default()
    };
    let result = localizer(cfg).localize(&frame, &psf, FitMode::Sigma).unwrap();

    assert_eq!(result.termination, Termination::Exhausted);
    assert_eq!(result.locs.len(), 1);
    let loc = &result.locs[0];
    assert!((loc.x / PIXEL_SIZE - 12.5).abs() < 0.1);
    assert!((loc.y / PIXEL_SIZE - 12.0).abs() < 0.1);
}

/// Widths of 1.5 px blend the pair into one peak: the bright fit absorbs part
/// of the dim spot and what is left fails the default goodness floor. Narrow
/// spots and a goodness floor of 0.1 keep the re-detection path measurable;
/// the joint-fit bias on the dim spot stays near 0.4 px.
#[test]
fn dim_neighbour_is_revealed_after_subtraction() {
    let frame = render(30, 30, 5.0, &[(2000.0, 12.5, 15.5, 1.0), (500.0, 15.5, 15.5, 1.0)]);
    let psf = psf_with_sigma(120e-9);
    let cfg = IterativeConfig {
        duplicate_min_dist: 250e-9,
        min_goodness: 0.1,
        record_iterations: true,
        ..IterativeConfig::default()
    };
    let result = localizer(cfg).localize(&frame, &psf, FitMode::Sigma).unwrap();

    assert_eq!(result.termination, Termination::Exhausted);
    assert_eq!(result.locs.len(), 2);
    let (bright, dim) = (&result.locs[0], &result.locs[1]);
    assert!(bright.params.amp > dim.params.amp);
    assert!((bright.x / PIXEL_SIZE - 12.5).abs() < 0.25, "bright x = {}", bright.x / PIXEL_SIZE);
    assert!((bright.y / PIXEL_SIZE - 15.5).abs() < 0.05);
    assert!((dim.x / PIXEL_SIZE - 15.5).abs() < 0.5, "dim x = {}", dim.x / PIXEL_SIZE);
    assert!((dim.y / PIXEL_SIZE - 15.5).abs() < 0.2);
    assert!(dim.params.amp > 200.0 && dim.params.amp < 800.0);
    assert_eq!(dim.iteration, 1);

    // The dim spot is only detected inside the box refreshed after the first
    // subtraction.
    let first = &result.iterations[0];
    assert!(first.fresh_candidates >= 1);
    assert!(first.affected.contains(dim.pixel));

    // Both emitters see each other as nearest neighbour.
    assert!((bright.min_dist_xy - dim.min_dist_xy).abs() < 1e-15);
}

#[test]
fn flat_frame_terminates_without_emitters() {
    let frame = Frame::filled(20, 20, PIXEL_SIZE, 5.0).unwrap();
    let psf = psf_with_sigma(150e-9);
    let cfg = IterativeConfig {
        record_iterations: true,
        ..IterativeConfig::default()
    };
    let result = localizer(cfg).localize(&frame, &psf, FitMode::Sigma).unwrap();

    assert!(result.locs.is_empty());
    assert!(result.iterations.is_empty());
    assert_eq!(result.termination, Termination::Exhausted);
}

#[test]
fn iteration_cap_limits_accepted_emitters() {
    let mut spots = Vec::new();
    for i in 0..4 {
        for j in 0..4 {
            spots.push((1000.0, 5.5 + 8.0 * i as f64, 5.5 + 8.0 * j as f64, 1.5));
        }
    }
    let frame = render(36, 36, 5.0, &spots);
    let psf = psf_with_sigma(150e-9);
    let cfg = IterativeConfig {
        max_iterations: 6,
        record_iterations: true,
        ..IterativeConfig::default()
    };
    let result = localizer(cfg).localize(&frame, &psf, FitMode::Sigma).unwrap();

    assert_eq!(result.termination, Termination::IterationCap);
    assert_eq!(result.locs.len(), 6);
    for (i, loc) in result.locs.iter().enumerate() {
        assert_eq!(loc.iteration, i);
        let on_grid = spots
            .iter()
            .any(|s| (loc.x / PIXEL_SIZE - s.1).abs() < 0.05 && (loc.y / PIXEL_SIZE - s.2).abs() < 0.05);
        assert!(on_grid, "emitter {} at ({}, {})", i, loc.x, loc.y);
    }
    // Every accepted emitter removes energy from the residual frame.
    let mut previous = frame.energy();
    for record in &result.iterations {
        assert!(record.residual_energy < previous);
        previous = record.residual_energy;
    }
}

#[test]
fn accepted_emitters_are_never_duplicates() {
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..5 {
        let mut spots = Vec::new();
        for i in 0..3 {
            let x = 6.5 + 9.0 * i as f64 + rng.random_range(-0.5..0.5);
            let y = 14.0 + rng.random_range(-3.0..3.0);
            spots.push((rng.random_range(800.0..1500.0), x, y, 1.5));
        }
        let frame = render(32, 28, 5.0, &spots);
        let psf = psf_with_sigma(150e-9);
        let cfg = IterativeConfig::default();
        let min_dist = cfg.duplicate_min_dist;
        let result = localizer(cfg).localize(&frame, &psf, FitMode::Sigma).unwrap();

        assert_eq!(result.locs.len(), 3);
        for (i, a) in result.locs.iter().enumerate() {
            for b in result.locs.iter().skip(i + 1) {
                let d = ((a.x - b.x).powi(2) + (a.y - b.y).powi(2)).sqrt();
                assert!(d > min_dist);
            }
        }
    }
}

#[test]
fn noisy_spot_is_localized_within_tolerance() {
    for seed in 0..8u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let (x, y) = (rng.random_range(10.0..14.0), rng.random_range(10.0..14.0));
        let mut frame = render(24, 24, 20.0, &[(3000.0, x, y, 1.5)]);
        for v in frame.data_mut() {
            *v += rng.random_range(-10.0..10.0);
        }
        let psf = psf_with_sigma(150e-9);
        let result = localizer(IterativeConfig::default())
            .localize(&frame, &psf, FitMode::Sigma)
            .unwrap();

        assert!(!result.locs.is_empty(), "seed {seed}: nothing found");
        let loc = &result.locs[0];
        assert!((loc.x / PIXEL_SIZE - x).abs() < 0.2, "seed {seed}");
        assert!((loc.y / PIXEL_SIZE - y).abs() < 0.2, "seed {seed}");
        assert!(loc.stds.x0 > 0.0 && loc.stds.x0 < 50e-9);
    }
}
