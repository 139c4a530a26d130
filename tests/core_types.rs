use smolphot::{
    localize_frames, AxialSmoothing, FitMode, Frame, GaussianPsf, HalfWidthPolicy, IterativeConfig,
    IterativeLocalizer, LmConfig, Localizer, PixelCoord, PsfConfig, SmolPhotError,
};

#[test]
fn frame_rejects_invalid_dimensions() {
    let err = Frame::new(vec![0.0; 4], 0, 1, 1e-7).err().unwrap();
    assert_eq!(err, SmolPhotError::InvalidDimensions { width: 0, height: 1 });

    let err = Frame::new(vec![0.0; 4], 1, 0, 1e-7).err().unwrap();
    assert_eq!(err, SmolPhotError::InvalidDimensions { width: 1, height: 0 });
}

#[test]
fn frame_rejects_small_buffer() {
    let err = Frame::new(vec![0.0; 3], 2, 2, 1e-7).err().unwrap();
    assert_eq!(err, SmolPhotError::BufferTooSmall { needed: 4, got: 3 });
}

#[test]
fn frame_rejects_bad_pixel_size() {
    for pixel_size in [0.0, -1e-7, f64::NAN, f64::INFINITY] {
        let err = Frame::new(vec![0.0; 4], 2, 2, pixel_size).err().unwrap();
        assert!(matches!(err, SmolPhotError::InvalidPixelSize { .. }));
    }
}

#[test]
fn frame_metadata_and_geometry() {
    let frame = Frame::filled(10, 6, 100e-9, 2.0).unwrap().with_index(7).with_z(-50e-9);
    assert_eq!(frame.index(), 7);
    assert_eq!(frame.z(), Some(-50e-9));
    assert!((frame.size_x() - 1e-6).abs() < 1e-18);
    assert!((frame.size_y() - 0.6e-6).abs() < 1e-18);
    assert_eq!(frame.get(9, 5), Some(2.0));
    assert_eq!(frame.get(10, 0), None);
    assert!((frame.energy() - 240.0).abs() < 1e-12);

    assert_eq!(frame.coord_to_pixel((-1e-6, 5e-6)), PixelCoord::new(0, 5));
    assert_eq!(frame.crop_pixel(-3, 20), PixelCoord::new(0, 5));
    let b = frame.box_around(PixelCoord::new(1, 4), 2);
    assert_eq!((b.x0, b.y0, b.x1, b.y1), (0, 2, 4, 6));
    assert_eq!(b.area(), 16);
    assert_eq!(frame.window(PixelCoord::new(1, 4), 2).len(), 16);
}

#[test]
fn iterative_config_validation() {
    let err = IterativeLocalizer::new(IterativeConfig {
        min_half_width: 0,
        ..IterativeConfig::default()
    })
    .unwrap_err();
    assert_eq!(err, SmolPhotError::InvalidHalfWidthRange { min: 0, max: 5 });

    let err = IterativeLocalizer::new(IterativeConfig {
        initial_max_dist: 0.0,
        ..IterativeConfig::default()
    })
    .unwrap_err();
    assert!(matches!(err, SmolPhotError::InvalidConfig { .. }));

    let err = IterativeLocalizer::new(IterativeConfig {
        min_area: 10,
        ..IterativeConfig::default()
    })
    .unwrap_err();
    assert!(matches!(err, SmolPhotError::InvalidConfig { .. }));

    let ok = IterativeLocalizer::new(IterativeConfig {
        half_width_policy: HalfWidthPolicy::AllAtOnce,
        ..IterativeConfig::default()
    });
    assert!(ok.is_ok());
}

#[test]
fn psf_config_validation() {
    let bad = [
        PsfConfig {
            phi: f64::NAN,
            ..PsfConfig::default()
        },
        PsfConfig {
            initial_sigma: -1e-9,
            ..PsfConfig::default()
        },
        PsfConfig {
            smoothing: AxialSmoothing {
                sigma_x: -1.0,
                ..AxialSmoothing::default()
            },
            ..PsfConfig::default()
        },
        PsfConfig {
            solver: LmConfig {
                max_iterations: 0,
                ..LmConfig::default()
            },
            ..PsfConfig::default()
        },
    ];
    for cfg in bad {
        assert!(matches!(
            GaussianPsf::new(cfg).unwrap_err(),
            SmolPhotError::InvalidConfig { .. }
        ));
    }
}

#[test]
fn set_smoothing_validates() {
    let mut psf = GaussianPsf::new(PsfConfig::default()).unwrap();
    let err = psf
        .set_smoothing(AxialSmoothing {
            dx: f64::INFINITY,
            ..AxialSmoothing::default()
        })
        .unwrap_err();
    assert!(matches!(err, SmolPhotError::InvalidConfig { .. }));
    psf.set_smoothing(AxialSmoothing {
        sigma_x: 2.0,
        ..AxialSmoothing::default()
    })
    .unwrap();
    assert_eq!(psf.config().smoothing.sigma_x, 2.0);
}

#[test]
fn z_mode_fails_before_any_frame_is_processed() {
    let frames = vec![Frame::filled(8, 8, 100e-9, 0.0).unwrap(); 3];
    let psf = GaussianPsf::new(PsfConfig::default()).unwrap();
    let localizer: Localizer = IterativeLocalizer::new(IterativeConfig::default()).unwrap().into();
    assert_eq!(
        localize_frames(&localizer, &frames, &psf, FitMode::Z).unwrap_err(),
        SmolPhotError::MissingCalibration
    );
    let results = localize_frames(&localizer, &frames, &psf, FitMode::Sigma).unwrap();
    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| r.locs.is_empty()));
}

#[test]
fn error_messages_are_descriptive() {
    let msg = SmolPhotError::InvalidHalfWidthRange { min: 4, max: 2 }.to_string();
    assert_eq!(msg, "invalid half-width range: min=4, max=2");
    assert!(SmolPhotError::MissingCalibration.to_string().contains("calibration"));
}
