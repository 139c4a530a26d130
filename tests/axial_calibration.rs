use smolphot::{
    calibrate_from_positions, AxialRange, CalibrationConfig, FitMode, Frame, GaussianPsf, IterativeConfig,
    IterativeLocalizer, PsfConfig, PsfParams, SmolPhotError,
};

const PIXEL_SIZE: f64 = 100e-9;
const POSITIONS: [(f64, f64); 2] = [(8.5, 10.3), (20.4, 10.6)];

/// Astigmatic widths in pixels at depth `z` (meters).
fn widths(z: f64) -> (f64, f64) {
    let z_um = z * 1e6;
    (1.4 + 0.6 * z_um, 1.4 - 0.6 * z_um)
}

/// Lateral drift in pixels at depth `z`.
fn wobble_px(z: f64) -> f64 {
    0.3 * z * 1e6
}

fn render_at_depth(z: f64, wobble: bool) -> Frame {
    let renderer = GaussianPsf::new(PsfConfig::default()).unwrap();
    let (sx, sy) = widths(z);
    let shift = if wobble { wobble_px(z) } else { 0.0 };
    let (width, height) = (30, 20);
    let mut data = vec![5.0; width * height];
    for &(x, y) in &POSITIONS {
        let params = PsfParams {
            amp: 1000.0,
            x0: (x + shift) * PIXEL_SIZE,
            y0: y * PIXEL_SIZE,
            sigma_x: sx * PIXEL_SIZE,
            sigma_y: sy * PIXEL_SIZE,
            offset: 0.0,
        };
        for py in 0..height {
            for px in 0..width {
                let cx = (px as f64 + 0.5) * PIXEL_SIZE;
                let cy = (py as f64 + 0.5) * PIXEL_SIZE;
                data[py * width + px] += renderer.evaluate(&params, cx, cy);
            }
        }
    }
    Frame::new(data, width, height, PIXEL_SIZE).unwrap()
}

fn z_stack(wobble: bool) -> Vec<Frame> {
    (-8..=8)
        .map(|i| {
            let z = i as f64 * 100e-9;
            render_at_depth(z, wobble).with_index((i + 8) as usize).with_z(z)
        })
        .collect()
}

fn start_positions() -> Vec<(f64, f64)> {
    POSITIONS.iter().map(|&(x, y)| (x * PIXEL_SIZE, y * PIXEL_SIZE)).collect()
}

fn calibration_psf(config: PsfConfig) -> GaussianPsf {
    GaussianPsf::new(PsfConfig {
        initial_sigma: 140e-9,
        ..config
    })
    .unwrap()
}

fn calibration_config() -> CalibrationConfig {
    CalibrationConfig {
        use_stds: false,
        ..CalibrationConfig::default()
    }
}

#[test]
fn calibration_curves_follow_the_stack() {
    let mut psf = calibration_psf(PsfConfig::default());
    let count = calibrate_from_positions(&mut psf, &z_stack(false), &start_positions(), &calibration_config())
        .unwrap();
    // Two emitters at three half-widths on each of 17 frames.
    assert_eq!(count, 17 * 2 * 3);
    assert!(psf.has_calibration_data());

    let calib = psf.calibration().unwrap();
    assert_eq!(calib.sigma_x().half_widths().collect::<Vec<_>>(), vec![3, 4, 5]);
    for &z in &[-0.55e-6, 0.0, 0.32e-6] {
        let (sx, sy) = widths(z);
        for hw in 3..=5 {
            assert!((calib.sigma_x().value(z, hw) / PIXEL_SIZE - sx).abs() < 1e-3);
            assert!((calib.sigma_y().value(z, hw) / PIXEL_SIZE - sy).abs() < 1e-3);
        }
        let (dx, dy) = calib.wobble(z, 4);
        assert!(dx.abs() < 1e-10 && dy.abs() < 1e-10);
    }
}

#[test]
fn frames_outside_range_or_without_depth_are_skipped() {
    let mut psf = calibration_psf(PsfConfig {
        axial_range: AxialRange {
            from: -350e-9,
            to: 350e-9,
        },
        ..PsfConfig::default()
    });
    let mut frames = z_stack(false);
    frames.push(render_at_depth(0.0, false));
    let count = calibrate_from_positions(&mut psf, &frames, &start_positions(), &calibration_config()).unwrap();
    assert_eq!(count, 7 * 2 * 3);
}

#[test]
fn depth_is_recovered_in_z_mode() {
    let mut psf = calibration_psf(PsfConfig::default());
    calibrate_from_positions(&mut psf, &z_stack(false), &start_positions(), &calibration_config()).unwrap();

    for &z in &[-0.45e-6, 0.25e-6, 0.6e-6] {
        let frame = render_at_depth(z, false);
        let start = (8.5 * PIXEL_SIZE, 10.5 * PIXEL_SIZE);
        let loc = psf.fit(&frame, start, 4, FitMode::Z, 300e-9).unwrap();
        let fitted = loc.z.unwrap();
        assert!((fitted - z).abs() < 2e-9, "z = {fitted:e}, expected {z:e}");
        assert!((loc.x / PIXEL_SIZE - 8.5).abs() < 1e-3);
        assert!((loc.y / PIXEL_SIZE - 10.3).abs() < 1e-3);
        assert!(loc.stds.z0.is_some());
        assert!(loc.stds.sigma_x.is_none());
    }
}

#[test]
fn wobble_correction_restores_nominal_position() {
    let stack = z_stack(true);
    let mut corrected = calibration_psf(PsfConfig::default());
    calibrate_from_positions(&mut corrected, &stack, &start_positions(), &calibration_config()).unwrap();
    let mut uncorrected = calibration_psf(PsfConfig {
        wobble_correction: false,
        ..PsfConfig::default()
    });
    calibrate_from_positions(&mut uncorrected, &stack, &start_positions(), &calibration_config()).unwrap();

    let z = 0.25e-6;
    let frame = render_at_depth(z, true);
    let start = (8.5 * PIXEL_SIZE, 10.5 * PIXEL_SIZE);
    let a = corrected.fit(&frame, start, 4, FitMode::Z, 300e-9).unwrap();
    let b = uncorrected.fit(&frame, start, 4, FitMode::Z, 300e-9).unwrap();

    assert!((a.x / PIXEL_SIZE - 8.5).abs() < 1e-3);
    assert!((b.x / PIXEL_SIZE - (8.5 + wobble_px(z))).abs() < 1e-3);
    assert!((a.z.unwrap() - z).abs() < 2e-9);
}

#[test]
fn distance_gate_uses_the_uncorrected_centre() {
    let mut psf = calibration_psf(PsfConfig::default());
    calibrate_from_positions(&mut psf, &z_stack(true), &start_positions(), &calibration_config()).unwrap();

    // The spot is drawn at 8.68 px and the correction moves it back to 8.5 px.
    let z = 0.6e-6;
    let frame = render_at_depth(z, true);
    let gate = 20e-9;

    // 12 nm from the raw centre, 30 nm from the corrected one.
    let start = (8.8 * PIXEL_SIZE, 10.3 * PIXEL_SIZE);
    let loc = psf.fit(&frame, start, 4, FitMode::Z, gate).unwrap();
    assert!((loc.x / PIXEL_SIZE - 8.5).abs() < 1e-3);
    assert!((loc.x - start.0).abs() > gate);

    // 28 nm from the raw centre, 10 nm from the corrected one.
    let start = (8.4 * PIXEL_SIZE, 10.3 * PIXEL_SIZE);
    assert!(psf.fit(&frame, start, 4, FitMode::Z, gate).is_none());
    let loc = psf.fit(&frame, start, 4, FitMode::Z, 300e-9).unwrap();
    assert!((loc.x / PIXEL_SIZE - 8.5).abs() < 1e-3);
    assert!((loc.x - start.0).abs() < gate);
}

#[test]
fn localizer_rejects_depths_outside_the_range() {
    let range = AxialRange {
        from: -500e-9,
        to: 500e-9,
    };
    let mut psf = calibration_psf(PsfConfig {
        axial_range: range,
        ..PsfConfig::default()
    });
    calibrate_from_positions(&mut psf, &z_stack(false), &start_positions(), &calibration_config()).unwrap();
    let localizer = IterativeLocalizer::new(IterativeConfig::default()).unwrap();

    let inside = localizer.localize(&render_at_depth(0.2e-6, false), &psf, FitMode::Z).unwrap();
    assert_eq!(inside.locs.len(), 2);
    for loc in &inside.locs {
        assert!((loc.z.unwrap() - 0.2e-6).abs() < 2e-9);
    }

    let outside = localizer.localize(&render_at_depth(0.75e-6, false), &psf, FitMode::Z).unwrap();
    assert!(outside.locs.is_empty());
}

#[test]
fn z_mode_requires_calibration() {
    let psf = calibration_psf(PsfConfig::default());
    let localizer = IterativeLocalizer::new(IterativeConfig::default()).unwrap();
    let err = localizer
        .localize(&render_at_depth(0.0, false), &psf, FitMode::Z)
        .unwrap_err();
    assert_eq!(err, SmolPhotError::MissingCalibration);
}

#[test]
fn empty_calibration_clears_curves() {
    let mut psf = calibration_psf(PsfConfig::default());
    calibrate_from_positions(&mut psf, &z_stack(false), &start_positions(), &calibration_config()).unwrap();
    assert!(psf.has_calibration_data());
    psf.set_axial_calib_points(Vec::new(), false).unwrap();
    assert!(!psf.has_calibration_data());
    assert_eq!(psf.check_mode(FitMode::Z), Err(SmolPhotError::MissingCalibration));
}
