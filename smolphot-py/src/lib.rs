//! Python bindings for the smolphot localization library.
//!
//! Frames are passed in as 2D `float64` numpy arrays (height x width) in
//! photon units; all positions and widths are in meters.

use numpy::ndarray::Array2;
use numpy::{IntoPyArray, PyArray2, PyReadonlyArray2, PyUntypedArrayMethods};
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;

use smolphot::image::io::{load_frame, PhotonConversion};
use smolphot::{
    calibrate_from_positions, AxialRange, BlobConfig as RustBlobConfig, BlobLocalizer, CalibrationConfig, FitMode,
    Frame as RustFrame, GaussianPsf, IterativeConfig, IterativeLocalizer, LocalMaximaConfig, LocalMaximaLocalizer,
    Localizer as RustLocalizer, MoleculeLoc, PsfConfig, RegionConfig, RegionLocalizer, SmolPhotError, SplitMode,
    Termination,
};

/// Convert a SmolPhotError to a Python exception.
fn to_py_err(err: SmolPhotError) -> PyErr {
    match err {
        SmolPhotError::ImageIo { .. } | SmolPhotError::MissingCalibration => PyRuntimeError::new_err(err.to_string()),
        _ => PyValueError::new_err(err.to_string()),
    }
}

fn parse_mode(mode: &str) -> PyResult<FitMode> {
    match mode.to_lowercase().as_str() {
        "sigma" => Ok(FitMode::Sigma),
        "z" => Ok(FitMode::Z),
        _ => Err(PyValueError::new_err("mode must be 'sigma' or 'z'")),
    }
}

fn frame_from_array(pixels: &PyReadonlyArray2<'_, f64>, pixel_size: f64) -> PyResult<RustFrame> {
    let shape = pixels.shape();
    let (height, width) = (shape[0], shape[1]);
    let data: Vec<f64> = pixels.as_slice()?.to_vec();
    RustFrame::new(data, width, height, pixel_size).map_err(to_py_err)
}

/// One camera frame.
#[pyclass]
#[derive(Clone)]
pub struct Frame {
    inner: RustFrame,
}

#[pymethods]
impl Frame {
    /// Create a frame from a 2D float64 numpy array.
    ///
    /// Args:
    ///     pixels: photon counts (height x width)
    ///     pixel_size: pixel size in meters
    ///     index: frame number (default: 0)
    ///     z: stage depth in meters for calibration frames (default: None)
    #[new]
    #[pyo3(signature = (pixels, pixel_size, index = 0, z = None))]
    fn new(pixels: PyReadonlyArray2<'_, f64>, pixel_size: f64, index: usize, z: Option<f64>) -> PyResult<Self> {
        let mut inner = frame_from_array(&pixels, pixel_size)?.with_index(index);
        if let Some(z) = z {
            inner = inner.with_z(z);
        }
        Ok(Self { inner })
    }

    /// Load a frame from an image file, converting ADU to photons.
    #[staticmethod]
    #[pyo3(signature = (path, pixel_size, baseline = 0.0, gain = 1.0, index = 0))]
    fn from_file(path: &str, pixel_size: f64, baseline: f64, gain: f64, index: usize) -> PyResult<Self> {
        let inner = load_frame(path, pixel_size, PhotonConversion { baseline, gain })
            .map_err(to_py_err)?
            .with_index(index);
        Ok(Self { inner })
    }

    #[getter]
    fn width(&self) -> usize {
        self.inner.width()
    }

    #[getter]
    fn height(&self) -> usize {
        self.inner.height()
    }

    #[getter]
    fn pixel_size(&self) -> f64 {
        self.inner.pixel_size()
    }

    fn __repr__(&self) -> String {
        format!(
            "Frame({}x{}, index={}, pixel_size={:e})",
            self.inner.width(),
            self.inner.height(),
            self.inner.index(),
            self.inner.pixel_size()
        )
    }
}

/// A fitted emitter.
#[pyclass]
#[derive(Clone)]
pub struct Loc {
    #[pyo3(get)]
    pub x: f64,
    #[pyo3(get)]
    pub y: f64,
    /// Depth in meters for axial fits.
    #[pyo3(get)]
    pub z: Option<f64>,
    #[pyo3(get)]
    pub amp: f64,
    #[pyo3(get)]
    pub sigma_x: f64,
    #[pyo3(get)]
    pub sigma_y: f64,
    #[pyo3(get)]
    pub offset: f64,
    #[pyo3(get)]
    pub photons: f64,
    #[pyo3(get)]
    pub goodness: f64,
    #[pyo3(get)]
    pub error: f64,
    #[pyo3(get)]
    pub frame: usize,
    #[pyo3(get)]
    pub iteration: usize,
    #[pyo3(get)]
    pub min_dist_xy: f64,
}

#[pymethods]
impl Loc {
    fn __repr__(&self) -> String {
        format!(
            "Loc(x={:.4e}, y={:.4e}, photons={:.1}, goodness={:.3})",
            self.x, self.y, self.photons, self.goodness
        )
    }
}

impl From<&MoleculeLoc> for Loc {
    fn from(l: &MoleculeLoc) -> Self {
        Self {
            x: l.x,
            y: l.y,
            z: l.z,
            amp: l.params.amp,
            sigma_x: l.params.sigma_x,
            sigma_y: l.params.sigma_y,
            offset: l.params.offset,
            photons: l.photons,
            goodness: l.goodness,
            error: l.error,
            frame: l.frame_index,
            iteration: l.iteration,
            min_dist_xy: l.min_dist_xy,
        }
    }
}

/// Gaussian PSF model with optional axial calibration.
#[pyclass]
pub struct Psf {
    inner: GaussianPsf,
}

#[pymethods]
impl Psf {
    /// Create a PSF model.
    ///
    /// Args:
    ///     initial_sigma: starting width in meters (default: 300e-9)
    ///     symmetric: fit a single width (default: False)
    ///     phi: axis tilt in radians (default: 0.0)
    ///     shift_max_iterations: re-centring retries (default: 0)
    ///     wobble_correction: apply calibrated wobble in z mode (default: True)
    ///     axial_range: calibrated depth range in meters (default: (-1e-6, 1e-6))
    #[new]
    #[pyo3(signature = (
        initial_sigma = 300e-9,
        symmetric = false,
        phi = 0.0,
        shift_max_iterations = 0,
        wobble_correction = true,
        axial_range = (-1e-6, 1e-6)
    ))]
    fn new(
        initial_sigma: f64,
        symmetric: bool,
        phi: f64,
        shift_max_iterations: usize,
        wobble_correction: bool,
        axial_range: (f64, f64),
    ) -> PyResult<Self> {
        let inner = GaussianPsf::new(PsfConfig {
            initial_sigma,
            symmetric,
            phi,
            shift_max_iterations,
            wobble_correction,
            axial_range: AxialRange {
                from: axial_range.0,
                to: axial_range.1,
            },
            ..PsfConfig::default()
        })
        .map_err(to_py_err)?;
        Ok(Self { inner })
    }

    /// Build the axial calibration from frames at known depths.
    ///
    /// Args:
    ///     frames: calibration frames, each created with a `z`
    ///     positions: known emitter positions [(x, y), ...] in meters
    ///
    /// Returns:
    ///     Number of fits that entered the calibration
    #[pyo3(signature = (frames, positions, min_half_width = 3, max_half_width = 5, use_stds = true))]
    fn calibrate(
        &mut self,
        frames: Vec<Frame>,
        positions: Vec<(f64, f64)>,
        min_half_width: usize,
        max_half_width: usize,
        use_stds: bool,
    ) -> PyResult<usize> {
        let frames: Vec<RustFrame> = frames.into_iter().map(|f| f.inner).collect();
        let config = CalibrationConfig {
            min_half_width,
            max_half_width,
            use_stds,
            ..CalibrationConfig::default()
        };
        calibrate_from_positions(&mut self.inner, &frames, &positions, &config).map_err(to_py_err)
    }

    /// True once axial calibration curves are available.
    #[getter]
    fn has_calibration(&self) -> bool {
        self.inner.has_calibration_data()
    }

    /// Fit a single emitter around `initial` (meters).
    #[pyo3(signature = (frame, initial, half_width = 4, mode = "sigma", initial_max_dist = 300e-9))]
    fn fit(
        &self,
        frame: &Frame,
        initial: (f64, f64),
        half_width: usize,
        mode: &str,
        initial_max_dist: f64,
    ) -> PyResult<Option<Loc>> {
        let mode = parse_mode(mode)?;
        self.inner.check_mode(mode).map_err(to_py_err)?;
        Ok(self
            .inner
            .fit(&frame.inner, initial, half_width, mode, initial_max_dist)
            .as_ref()
            .map(Loc::from))
    }

    fn __repr__(&self) -> String {
        let cfg = self.inner.config();
        format!(
            "Psf(initial_sigma={:e}, symmetric={}, calibrated={})",
            cfg.initial_sigma,
            cfg.symmetric,
            self.inner.has_calibration_data()
        )
    }
}

/// Emitter localizer.
#[pyclass]
pub struct Localizer {
    inner: RustLocalizer,
}

#[pymethods]
impl Localizer {
    /// Iterative single-emitter-per-step localizer.
    #[staticmethod]
    #[pyo3(signature = (
        max_iterations = 10,
        det_threshold = 50.0,
        noise_level = 40.0,
        min_half_width = 3,
        max_half_width = 5,
        initial_max_dist = 250e-9,
        duplicate_min_dist = 400e-9,
        min_goodness = 0.5
    ))]
    #[allow(clippy::too_many_arguments)]
    fn iterative(
        max_iterations: usize,
        det_threshold: f64,
        noise_level: f64,
        min_half_width: usize,
        max_half_width: usize,
        initial_max_dist: f64,
        duplicate_min_dist: f64,
        min_goodness: f64,
    ) -> PyResult<Self> {
        let inner = IterativeLocalizer::new(IterativeConfig {
            max_iterations,
            det_threshold,
            noise_level,
            min_half_width,
            max_half_width,
            initial_max_dist,
            duplicate_min_dist,
            min_goodness,
            ..IterativeConfig::default()
        })
        .map_err(to_py_err)?;
        Ok(Self { inner: inner.into() })
    }

    /// Localizer that fits every local maximum per iteration.
    #[staticmethod]
    #[pyo3(signature = (det_threshold = 2000.0, noise_level = 10.0, half_width = 1, min_half_width = 1))]
    fn local_maxima(det_threshold: f64, noise_level: f64, half_width: usize, min_half_width: usize) -> PyResult<Self> {
        let inner = LocalMaximaLocalizer::new(LocalMaximaConfig {
            det_threshold,
            noise_level,
            half_width,
            min_half_width,
            ..LocalMaximaConfig::default()
        })
        .map_err(to_py_err)?;
        Ok(Self { inner: inner.into() })
    }

    /// Localizer that fits labeled regions.
    #[staticmethod]
    #[pyo3(signature = (mask_threshold = 30.0, det_threshold = 50.0, max_area = 30, multi_peak = false))]
    fn region(mask_threshold: f64, det_threshold: f64, max_area: usize, multi_peak: bool) -> PyResult<Self> {
        let inner = RegionLocalizer::new(RegionConfig {
            mask_threshold,
            det_threshold,
            max_area,
            split_mode: if multi_peak {
                SplitMode::MultiPeak
            } else {
                SplitMode::SinglePeak
            },
            ..RegionConfig::default()
        })
        .map_err(to_py_err)?;
        Ok(Self { inner: inner.into() })
    }

    /// Localizer that fits Laplacian-of-Gaussian blobs.
    #[staticmethod]
    #[pyo3(signature = (threshold = 200.0, half_width = 1, min_photons = 1000.0))]
    fn blob(threshold: f64, half_width: usize, min_photons: f64) -> PyResult<Self> {
        let defaults = RustBlobConfig::default();
        let mut blob = defaults.blob;
        blob.threshold = threshold;
        let inner = BlobLocalizer::new(RustBlobConfig {
            blob,
            half_width,
            min_photons,
            ..defaults
        })
        .map_err(to_py_err)?;
        Ok(Self { inner: inner.into() })
    }

    /// Localize the emitters of one frame.
    ///
    /// Returns:
    ///     (locs, iteration_cap_reached)
    #[pyo3(signature = (frame, psf, mode = "sigma"))]
    fn localize(&self, frame: &Frame, psf: &Psf, mode: &str) -> PyResult<(Vec<Loc>, bool)> {
        let result = self
            .inner
            .localize(&frame.inner, &psf.inner, parse_mode(mode)?)
            .map_err(to_py_err)?;
        Ok((
            result.locs.iter().map(Loc::from).collect(),
            result.termination == Termination::IterationCap,
        ))
    }

    /// Localize a frame series, optionally in parallel.
    ///
    /// Returns:
    ///     float64 array with one row per emitter:
    ///     frame, x, y, z (NaN for sigma fits), photons, goodness
    #[pyo3(signature = (frames, psf, mode = "sigma", parallel = false))]
    fn localize_frames<'py>(
        &self,
        py: Python<'py>,
        frames: Vec<Frame>,
        psf: &Psf,
        mode: &str,
        parallel: bool,
    ) -> PyResult<Bound<'py, PyArray2<f64>>> {
        let mode = parse_mode(mode)?;
        let frames: Vec<RustFrame> = frames.into_iter().map(|f| f.inner).collect();
        let results = if parallel {
            smolphot::localize_frames_par(&self.inner, &frames, &psf.inner, mode)
        } else {
            smolphot::localize_frames(&self.inner, &frames, &psf.inner, mode)
        }
        .map_err(to_py_err)?;

        const COLUMNS: usize = 6;
        let mut data = Vec::new();
        for loc in results.iter().flat_map(|r| r.locs.iter()) {
            data.extend_from_slice(&[
                loc.frame_index as f64,
                loc.x,
                loc.y,
                loc.z.unwrap_or(f64::NAN),
                loc.photons,
                loc.goodness,
            ]);
        }
        let rows = data.len() / COLUMNS;
        let table = Array2::from_shape_vec((rows, COLUMNS), data).map_err(|e| PyRuntimeError::new_err(e.to_string()))?;
        Ok(table.into_pyarray(py))
    }

    #[getter]
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn __repr__(&self) -> String {
        format!("Localizer('{}')", self.inner.name())
    }
}

/// Python module for smolphot localization.
#[pymodule]
fn _smolphot(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<Frame>()?;
    m.add_class::<Loc>()?;
    m.add_class::<Psf>()?;
    m.add_class::<Localizer>()?;
    m.add("__version__", env!("CARGO_PKG_VERSION"))?;
    Ok(())
}
