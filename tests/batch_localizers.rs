use smolphot::{
    BlobConfig, BlobLocalizer, BlobParams, FitMode, Frame, GaussianPsf, LocalMaximaConfig, LocalMaximaLocalizer,
    Localizer, MoleculeLoc, PsfConfig, PsfParams, RegionConfig, RegionLocalizer, SmolPhotError, SplitMode,
    Termination,
};

const PIXEL_SIZE: f64 = 100e-9;
const SPOTS: [(f64, f64); 3] = [(8.5, 8.5), (22.5, 10.5), (14.5, 24.5)];

fn psf() -> GaussianPsf {
    GaussianPsf::new(PsfConfig {
        initial_sigma: 150e-9,
        ..PsfConfig::default()
    })
    .unwrap()
}

fn render(spots: &[(f64, f64)], amp: f64) -> Frame {
    let psf = psf();
    let (width, height) = (34, 34);
    let mut data = vec![5.0; width * height];
    for &(x, y) in spots {
        let params = PsfParams {
            amp,
            x0: x * PIXEL_SIZE,
            y0: y * PIXEL_SIZE,
            sigma_x: 150e-9,
            sigma_y: 150e-9,
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

fn assert_matches_spots(locs: &[MoleculeLoc]) {
    assert_eq!(locs.len(), SPOTS.len());
    for &(x, y) in &SPOTS {
        let found = locs
            .iter()
            .any(|l| (l.x / PIXEL_SIZE - x).abs() < 0.01 && (l.y / PIXEL_SIZE - y).abs() < 0.01);
        assert!(found, "no emitter at ({x}, {y})");
    }
}

#[test]
fn local_maxima_localizer_fits_all_peaks_in_one_pass() {
    let cfg = LocalMaximaConfig {
        det_threshold: 50.0,
        noise_level: 40.0,
        half_width: 3,
        min_half_width: 2,
        min_offset: -100.0,
        ..LocalMaximaConfig::default()
    };
    let result = LocalMaximaLocalizer::new(cfg)
        .unwrap()
        .localize(&render(&SPOTS, 1000.0), &psf(), FitMode::Sigma)
        .unwrap();
    assert_eq!(result.termination, Termination::Exhausted);
    assert_matches_spots(&result.locs);
    assert!(result.locs.iter().all(|l| l.iteration == 0));
    assert!(result.locs.iter().all(|l| l.min_dist_xy > 1e-6));
}

#[test]
fn region_localizer_fits_region_centroids() {
    for split_mode in [SplitMode::SinglePeak, SplitMode::MultiPeak] {
        let cfg = RegionConfig {
            split_mode,
            max_area: 100,
            ..RegionConfig::default()
        };
        let result = RegionLocalizer::new(cfg)
            .unwrap()
            .localize(&render(&SPOTS, 1000.0), &psf(), FitMode::Sigma)
            .unwrap();
        assert_eq!(result.termination, Termination::Exhausted);
        assert_matches_spots(&result.locs);
    }
}

#[test]
fn blob_localizer_finds_log_blobs() {
    let cfg = BlobConfig {
        half_width: 3,
        blob: BlobParams {
            min_sigma: 1.0,
            max_sigma: 3.0,
            num_sigma: 5,
            ..BlobParams::default()
        },
        ..BlobConfig::default()
    };
    let result = BlobLocalizer::new(cfg)
        .unwrap()
        .localize(&render(&SPOTS, 1000.0), &psf(), FitMode::Sigma)
        .unwrap();
    assert_eq!(result.termination, Termination::Exhausted);
    assert_matches_spots(&result.locs);
    assert!(result.locs.iter().all(|l| l.photons >= 1000.0));
}

#[test]
fn dim_spots_fail_the_photon_gate() {
    // Bright enough for the LoG threshold, too dim for 1e5 photons.
    let cfg = BlobConfig {
        half_width: 3,
        min_photons: 1e5,
        ..BlobConfig::default()
    };
    let result = BlobLocalizer::new(cfg)
        .unwrap()
        .localize(&render(&SPOTS, 1000.0), &psf(), FitMode::Sigma)
        .unwrap();
    assert!(result.locs.is_empty());
    assert_eq!(result.termination, Termination::Exhausted);
}

/// Adds a fixed ripple so residuals, and with them goodness values, stay finite.
fn with_ripple(mut frame: Frame) -> Frame {
    for (i, v) in frame.data_mut().iter_mut().enumerate() {
        *v += ((i * 7919) % 13) as f64 * 0.5 - 3.0;
    }
    frame
}

#[test]
fn region_offset_gate_is_applied() {
    let frame = render(&SPOTS, 1000.0);
    let run = |min_offset| {
        RegionLocalizer::new(RegionConfig {
            max_area: 100,
            min_offset,
            ..RegionConfig::default()
        })
        .unwrap()
        .localize(&frame, &psf(), FitMode::Sigma)
        .unwrap()
    };
    assert_eq!(run(Some(0.0)).locs.len(), 3);
    let gated = run(Some(10.0));
    assert!(gated.locs.is_empty());
    assert_eq!(gated.termination, Termination::Exhausted);
}

#[test]
fn blob_goodness_and_offset_gates_are_applied() {
    let base = BlobConfig {
        half_width: 3,
        blob: BlobParams {
            min_sigma: 1.0,
            max_sigma: 3.0,
            num_sigma: 5,
            ..BlobParams::default()
        },
        ..BlobConfig::default()
    };
    let frame = with_ripple(render(&SPOTS, 1000.0));
    let run = |cfg: BlobConfig| {
        BlobLocalizer::new(cfg)
            .unwrap()
            .localize(&frame, &psf(), FitMode::Sigma)
            .unwrap()
    };

    let open = run(base.clone());
    assert_eq!(open.locs.len(), 3);
    assert!(open.locs.iter().all(|l| l.goodness.is_finite()));

    let min_goodness = open.locs.iter().map(|l| l.goodness).fold(f64::INFINITY, f64::min);
    let strict = run(BlobConfig {
        min_goodness: Some(min_goodness * 1e6),
        ..base.clone()
    });
    assert!(strict.locs.is_empty());

    let offset_gated = run(BlobConfig {
        min_offset: Some(50.0),
        ..base
    });
    assert!(offset_gated.locs.is_empty());
}

#[test]
fn localizer_enum_dispatches() {
    let frame = render(&SPOTS, 1000.0);
    let localizer: Localizer = RegionLocalizer::new(RegionConfig {
        max_area: 100,
        ..RegionConfig::default()
    })
    .unwrap()
    .into();
    assert_eq!(localizer.name(), "region detection");
    let result = localizer.localize(&frame, &psf(), FitMode::Sigma).unwrap();
    assert_eq!(result.locs.len(), 3);

    assert_eq!(
        localizer.localize(&frame, &psf(), FitMode::Z).unwrap_err(),
        SmolPhotError::MissingCalibration
    );
}

#[test]
fn invalid_batch_configs_are_rejected() {
    let err = LocalMaximaLocalizer::new(LocalMaximaConfig {
        max_iterations: 0,
        ..LocalMaximaConfig::default()
    })
    .unwrap_err();
    assert!(matches!(err, SmolPhotError::InvalidConfig { .. }));

    let err = RegionLocalizer::new(RegionConfig {
        max_area: 2,
        ..RegionConfig::default()
    })
    .unwrap_err();
    assert!(matches!(err, SmolPhotError::InvalidConfig { .. }));

    let err = BlobLocalizer::new(BlobConfig {
        half_width: 0,
        ..BlobConfig::default()
    })
    .unwrap_err();
    assert!(matches!(err, SmolPhotError::InvalidHalfWidthRange { .. }));
}
