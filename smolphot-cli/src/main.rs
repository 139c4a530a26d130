use clap::Parser;
use serde::{Deserialize, Serialize};
use smolphot::image::io::{load_frame, PhotonConversion};
use smolphot::{
    calibrate_from_positions, localize_frames, localize_frames_par, AxialRange, AxialSmoothing, BlobConfig,
    BlobLocalizer, BlobParams, CalibrationConfig, DetectionMode, FitMode, FrameLocalization, GaussianPsf,
    HalfWidthPolicy, InitialFitLoc, IterativeConfig, IterativeLocalizer, LocalMaximaConfig, LocalMaximaLocalizer,
    Localizer, MoleculeLoc, PsfConfig, RegionConfig, RegionLocalizer, SplitMode, Termination,
};
use std::fs;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

const SCHEMA_JSON: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/config.schema.json"));
const EXAMPLE_JSON: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/config.example.json"));

#[derive(Parser, Debug)]
#[command(author, version, about = "SMLM emitter localization (JSON config driven)")]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(short, long, value_name = "FILE", default_value = "config.json")]
    config: PathBuf,
    /// Print the JSON schema and exit.
    #[arg(long)]
    print_schema: bool,
    /// Print an example config and exit.
    #[arg(long)]
    print_example: bool,
    /// Enable tracing output.
    #[arg(long)]
    trace: bool,
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(rename_all = "snake_case")]
enum FitModeConfig {
    Sigma,
    Z,
}

impl From<FitModeConfig> for FitMode {
    fn from(value: FitModeConfig) -> Self {
        match value {
            FitModeConfig::Sigma => FitMode::Sigma,
            FitModeConfig::Z => FitMode::Z,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(rename_all = "snake_case")]
enum HalfWidthPolicyConfig {
    ReduceBoth,
    ReduceLower,
    AllAtOnce,
}

impl From<HalfWidthPolicyConfig> for HalfWidthPolicy {
    fn from(value: HalfWidthPolicyConfig) -> Self {
        match value {
            HalfWidthPolicyConfig::ReduceBoth => HalfWidthPolicy::ReduceBoth,
            HalfWidthPolicyConfig::ReduceLower => HalfWidthPolicy::ReduceLower,
            HalfWidthPolicyConfig::AllAtOnce => HalfWidthPolicy::AllAtOnce,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(rename_all = "snake_case")]
enum InitialFitLocConfig {
    PixelCenter,
    WeightedCentroid,
}

impl From<InitialFitLocConfig> for InitialFitLoc {
    fn from(value: InitialFitLocConfig) -> Self {
        match value {
            InitialFitLocConfig::PixelCenter => InitialFitLoc::PixelCenter,
            InitialFitLocConfig::WeightedCentroid => InitialFitLoc::WeightedCentroid,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct PsfConfigJson {
    symmetric: bool,
    phi: f64,
    initial_sigma: f64,
    initial_offset: f64,
    initial_z: f64,
    shift_max_iterations: usize,
    wobble_correction: bool,
    axial_range: [f64; 2],
    /// Smoothing factors for sigma_x, sigma_y, dx and dy.
    smoothing: [f64; 4],
}

impl Default for PsfConfigJson {
    fn default() -> Self {
        let cfg = PsfConfig::default();
        let s = cfg.smoothing;
        Self {
            symmetric: cfg.symmetric,
            phi: cfg.phi,
            initial_sigma: cfg.initial_sigma,
            initial_offset: cfg.initial_offset,
            initial_z: cfg.initial_z,
            shift_max_iterations: cfg.shift_max_iterations,
            wobble_correction: cfg.wobble_correction,
            axial_range: [cfg.axial_range.from, cfg.axial_range.to],
            smoothing: [s.sigma_x, s.sigma_y, s.dx, s.dy],
        }
    }
}

impl From<&PsfConfigJson> for PsfConfig {
    fn from(value: &PsfConfigJson) -> Self {
        let [sx, sy, dx, dy] = value.smoothing;
        PsfConfig {
            symmetric: value.symmetric,
            phi: value.phi,
            initial_sigma: value.initial_sigma,
            initial_offset: value.initial_offset,
            initial_z: value.initial_z,
            shift_max_iterations: value.shift_max_iterations,
            wobble_correction: value.wobble_correction,
            axial_range: AxialRange {
                from: value.axial_range[0],
                to: value.axial_range[1],
            },
            smoothing: AxialSmoothing {
                sigma_x: sx,
                sigma_y: sy,
                dx,
                dy,
            },
            ..PsfConfig::default()
        }
    }
}

#[derive(Debug, Deserialize)]
struct CalibrationFrameJson {
    path: String,
    /// Stage depth in meters.
    z: f64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct CalibrationJson {
    frames: Vec<CalibrationFrameJson>,
    /// Known emitter positions in meters.
    positions: Vec<[f64; 2]>,
    min_half_width: usize,
    max_half_width: usize,
    initial_max_dist: f64,
    use_stds: bool,
}

impl Default for CalibrationJson {
    fn default() -> Self {
        let cfg = CalibrationConfig::default();
        Self {
            frames: Vec::new(),
            positions: Vec::new(),
            min_half_width: cfg.min_half_width,
            max_half_width: cfg.max_half_width,
            initial_max_dist: cfg.initial_max_dist,
            use_stds: cfg.use_stds,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct IterativeJson {
    max_iterations: usize,
    above_threshold: bool,
    det_threshold: f64,
    noise_level: f64,
    min_area: usize,
    min_half_width: usize,
    max_half_width: usize,
    half_width_policy: HalfWidthPolicyConfig,
    initial_max_dist: f64,
    border: f64,
    initial_fit_loc: InitialFitLocConfig,
    min_offset: f64,
    duplicate_min_dist: f64,
    min_goodness: f64,
}

impl Default for IterativeJson {
    fn default() -> Self {
        let cfg = IterativeConfig::default();
        Self {
            max_iterations: cfg.max_iterations,
            above_threshold: cfg.detection_mode == DetectionMode::AboveThreshold,
            det_threshold: cfg.det_threshold,
            noise_level: cfg.noise_level,
            min_area: cfg.min_area,
            min_half_width: cfg.min_half_width,
            max_half_width: cfg.max_half_width,
            half_width_policy: HalfWidthPolicyConfig::ReduceBoth,
            initial_max_dist: cfg.initial_max_dist,
            border: cfg.border,
            initial_fit_loc: InitialFitLocConfig::PixelCenter,
            min_offset: cfg.min_offset,
            duplicate_min_dist: cfg.duplicate_min_dist,
            min_goodness: cfg.min_goodness,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct LocalMaximaJson {
    max_iterations: usize,
    det_threshold: f64,
    noise_level: f64,
    min_area: usize,
    half_width: usize,
    min_half_width: usize,
    initial_max_dist: f64,
    border: f64,
    duplicate_min_dist: f64,
    min_same_iteration_dist: f64,
    min_goodness: f64,
    min_offset: f64,
    initial_fit_loc: InitialFitLocConfig,
}

impl Default for LocalMaximaJson {
    fn default() -> Self {
        let cfg = LocalMaximaConfig::default();
        Self {
            max_iterations: cfg.max_iterations,
            det_threshold: cfg.det_threshold,
            noise_level: cfg.noise_level,
            min_area: cfg.min_area,
            half_width: cfg.half_width,
            min_half_width: cfg.min_half_width,
            initial_max_dist: cfg.initial_max_dist,
            border: cfg.border,
            duplicate_min_dist: cfg.duplicate_min_dist,
            min_same_iteration_dist: cfg.min_same_iteration_dist,
            min_goodness: cfg.min_goodness,
            min_offset: cfg.min_offset,
            initial_fit_loc: InitialFitLocConfig::PixelCenter,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RegionJson {
    multi_peak: bool,
    max_iterations: usize,
    det_threshold: f64,
    mask_threshold: f64,
    min_area: usize,
    max_area: usize,
    half_width: usize,
    min_half_width: usize,
    initial_max_dist: f64,
    border: f64,
    duplicate_min_dist: f64,
    min_same_iteration_dist: f64,
    min_goodness: f64,
    min_offset: Option<f64>,
}

impl Default for RegionJson {
    fn default() -> Self {
        let cfg = RegionConfig::default();
        Self {
            multi_peak: cfg.split_mode == SplitMode::MultiPeak,
            max_iterations: cfg.max_iterations,
            det_threshold: cfg.det_threshold,
            mask_threshold: cfg.mask_threshold,
            min_area: cfg.min_area,
            max_area: cfg.max_area,
            half_width: cfg.half_width,
            min_half_width: cfg.min_half_width,
            initial_max_dist: cfg.initial_max_dist,
            border: cfg.border,
            duplicate_min_dist: cfg.duplicate_min_dist,
            min_same_iteration_dist: cfg.min_same_iteration_dist,
            min_goodness: cfg.min_goodness,
            min_offset: cfg.min_offset,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct BlobJson {
    max_iterations: usize,
    threshold: f64,
    min_sigma: f64,
    max_sigma: f64,
    num_sigma: usize,
    overlap: f64,
    half_width: usize,
    initial_max_dist: f64,
    border: f64,
    min_photons: f64,
    min_goodness: Option<f64>,
    min_offset: Option<f64>,
    duplicate_min_dist: f64,
    remove_offset: bool,
}

impl Default for BlobJson {
    fn default() -> Self {
        let cfg = BlobConfig::default();
        Self {
            max_iterations: cfg.max_iterations,
            threshold: cfg.blob.threshold,
            min_sigma: cfg.blob.min_sigma,
            max_sigma: cfg.blob.max_sigma,
            num_sigma: cfg.blob.num_sigma,
            overlap: cfg.blob.overlap,
            half_width: cfg.half_width,
            initial_max_dist: cfg.initial_max_dist,
            border: cfg.border,
            min_photons: cfg.min_photons,
            min_goodness: cfg.min_goodness,
            min_offset: cfg.min_offset,
            duplicate_min_dist: cfg.duplicate_min_dist,
            remove_offset: cfg.remove_offset,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum LocalizerJson {
    Iterative(IterativeJson),
    LocalMaxima(LocalMaximaJson),
    Region(RegionJson),
    Blob(BlobJson),
}

impl Default for LocalizerJson {
    fn default() -> Self {
        LocalizerJson::Iterative(IterativeJson::default())
    }
}

impl LocalizerJson {
    fn build(&self) -> smolphot::SmolPhotResult<Localizer> {
        let localizer = match self {
            LocalizerJson::Iterative(c) => IterativeLocalizer::new(IterativeConfig {
                max_iterations: c.max_iterations,
                detection_mode: if c.above_threshold {
                    DetectionMode::AboveThreshold
                } else {
                    DetectionMode::LocalMaxima
                },
                det_threshold: c.det_threshold,
                noise_level: c.noise_level,
                min_area: c.min_area,
                min_half_width: c.min_half_width,
                max_half_width: c.max_half_width,
                half_width_policy: c.half_width_policy.into(),
                initial_max_dist: c.initial_max_dist,
                border: c.border,
                initial_fit_loc: c.initial_fit_loc.into(),
                min_offset: c.min_offset,
                duplicate_min_dist: c.duplicate_min_dist,
                min_goodness: c.min_goodness,
                record_iterations: false,
            })?
            .into(),
            LocalizerJson::LocalMaxima(c) => LocalMaximaLocalizer::new(LocalMaximaConfig {
                max_iterations: c.max_iterations,
                det_threshold: c.det_threshold,
                noise_level: c.noise_level,
                min_area: c.min_area,
                half_width: c.half_width,
                min_half_width: c.min_half_width,
                initial_max_dist: c.initial_max_dist,
                border: c.border,
                duplicate_min_dist: c.duplicate_min_dist,
                min_same_iteration_dist: c.min_same_iteration_dist,
                min_goodness: c.min_goodness,
                min_offset: c.min_offset,
                initial_fit_loc: c.initial_fit_loc.into(),
            })?
            .into(),
            LocalizerJson::Region(c) => RegionLocalizer::new(RegionConfig {
                split_mode: if c.multi_peak {
                    SplitMode::MultiPeak
                } else {
                    SplitMode::SinglePeak
                },
                max_iterations: c.max_iterations,
                det_threshold: c.det_threshold,
                mask_threshold: c.mask_threshold,
                min_area: c.min_area,
                max_area: c.max_area,
                half_width: c.half_width,
                min_half_width: c.min_half_width,
                initial_max_dist: c.initial_max_dist,
                border: c.border,
                duplicate_min_dist: c.duplicate_min_dist,
                min_same_iteration_dist: c.min_same_iteration_dist,
                min_goodness: c.min_goodness,
                min_offset: c.min_offset,
            })?
            .into(),
            LocalizerJson::Blob(c) => BlobLocalizer::new(BlobConfig {
                max_iterations: c.max_iterations,
                blob: BlobParams {
                    threshold: c.threshold,
                    min_sigma: c.min_sigma,
                    max_sigma: c.max_sigma,
                    num_sigma: c.num_sigma,
                    overlap: c.overlap,
                },
                half_width: c.half_width,
                initial_max_dist: c.initial_max_dist,
                border: c.border,
                min_photons: c.min_photons,
                min_goodness: c.min_goodness,
                min_offset: c.min_offset,
                duplicate_min_dist: c.duplicate_min_dist,
                remove_offset: c.remove_offset,
            })?
            .into(),
        };
        Ok(localizer)
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct Config {
    frames: Vec<String>,
    /// Pixel size in meters.
    pixel_size: f64,
    baseline: f64,
    gain: f64,
    fit_mode: FitModeConfig,
    parallel: bool,
    output_path: Option<String>,
    psf: PsfConfigJson,
    calibration: Option<CalibrationJson>,
    localizer: LocalizerJson,
}

impl Default for Config {
    fn default() -> Self {
        let conversion = PhotonConversion::default();
        Self {
            frames: Vec::new(),
            pixel_size: 100e-9,
            baseline: conversion.baseline,
            gain: conversion.gain,
            fit_mode: FitModeConfig::Sigma,
            parallel: false,
            output_path: None,
            psf: PsfConfigJson::default(),
            calibration: None,
            localizer: LocalizerJson::default(),
        }
    }
}

#[derive(Debug, Serialize)]
struct LocRecord {
    x: f64,
    y: f64,
    z: Option<f64>,
    amp: f64,
    sigma_x: f64,
    sigma_y: f64,
    offset: f64,
    photons: f64,
    goodness: f64,
    error: f64,
    fit_std_x: f64,
    fit_std_y: f64,
    half_width: usize,
    iteration: usize,
    min_dist_xy: f64,
}

impl From<&MoleculeLoc> for LocRecord {
    fn from(value: &MoleculeLoc) -> Self {
        Self {
            x: value.x,
            y: value.y,
            z: value.z,
            amp: value.params.amp,
            sigma_x: value.params.sigma_x,
            sigma_y: value.params.sigma_y,
            offset: value.params.offset,
            photons: value.photons,
            goodness: value.goodness,
            error: value.error,
            fit_std_x: value.stds.x0,
            fit_std_y: value.stds.y0,
            half_width: value.half_width,
            iteration: value.iteration,
            min_dist_xy: value.min_dist_xy,
        }
    }
}

#[derive(Debug, Serialize)]
struct FrameRecord {
    frame: usize,
    path: String,
    iteration_cap_reached: bool,
    locs: Vec<LocRecord>,
}

#[derive(Debug, Serialize)]
struct Output {
    localizer: &'static str,
    total_locs: usize,
    frames: Vec<FrameRecord>,
}

fn build_psf(config: &Config) -> Result<GaussianPsf, Box<dyn std::error::Error>> {
    let mut psf = GaussianPsf::new(PsfConfig::from(&config.psf))?;
    let Some(calib) = &config.calibration else {
        return Ok(psf);
    };
    let conversion = PhotonConversion {
        baseline: config.baseline,
        gain: config.gain,
    };
    let frames = calib
        .frames
        .iter()
        .enumerate()
        .map(|(i, f)| Ok(load_frame(&f.path, config.pixel_size, conversion)?.with_index(i).with_z(f.z)))
        .collect::<smolphot::SmolPhotResult<Vec<_>>>()?;
    let positions: Vec<(f64, f64)> = calib.positions.iter().map(|p| (p[0], p[1])).collect();
    let fits = calibrate_from_positions(
        &mut psf,
        &frames,
        &positions,
        &CalibrationConfig {
            min_half_width: calib.min_half_width,
            max_half_width: calib.max_half_width,
            initial_max_dist: calib.initial_max_dist,
            use_stds: calib.use_stds,
        },
    )?;
    tracing::info!(frames = frames.len(), fits, "axial calibration built");
    Ok(psf)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.trace {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env().add_directive("smolphot=info".parse()?))
            .with_target(false)
            .init();
    }

    if cli.print_schema {
        println!("{SCHEMA_JSON}");
        return Ok(());
    }
    if cli.print_example {
        println!("{EXAMPLE_JSON}");
        return Ok(());
    }

    let config_text = fs::read_to_string(&cli.config)?;
    let config: Config = serde_json::from_str(&config_text)?;
    if config.frames.is_empty() {
        return Err("frames must list at least one image".into());
    }

    let psf = build_psf(&config)?;
    let localizer = config.localizer.build()?;
    let conversion = PhotonConversion {
        baseline: config.baseline,
        gain: config.gain,
    };
    let frames = config
        .frames
        .iter()
        .enumerate()
        .map(|(i, path)| Ok(load_frame(path, config.pixel_size, conversion)?.with_index(i)))
        .collect::<smolphot::SmolPhotResult<Vec<_>>>()?;

    let mode = config.fit_mode.into();
    let results: Vec<FrameLocalization> = if config.parallel {
        localize_frames_par(&localizer, &frames, &psf, mode)?
    } else {
        localize_frames(&localizer, &frames, &psf, mode)?
    };

    let records: Vec<FrameRecord> = results
        .iter()
        .zip(config.frames.iter())
        .enumerate()
        .map(|(frame, (result, path))| FrameRecord {
            frame,
            path: path.clone(),
            iteration_cap_reached: result.termination == Termination::IterationCap,
            locs: result.locs.iter().map(LocRecord::from).collect(),
        })
        .collect();
    let output = Output {
        localizer: localizer.name(),
        total_locs: records.iter().map(|r| r.locs.len()).sum(),
        frames: records,
    };
    let json = serde_json::to_string_pretty(&output)?;

    match config.output_path {
        Some(path) => fs::write(path, json)?,
        None => println!("{json}"),
    }

    Ok(())
}
