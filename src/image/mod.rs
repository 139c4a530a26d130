//! Camera frames and pixel geometry.
//!
//! A `Frame` owns a row-major `f64` intensity buffer (photons) together with
//! the physical pixel size. Pixel `(i, j)` covers the square whose center is
//! at `((i + 0.5) * pixel_size, (j + 0.5) * pixel_size)`; every mapping between
//! pixel indices and physical coordinates goes through that affine rule.
//! Geometry that falls outside the frame is clamped rather than rejected.

use crate::psf::{GaussianPsf, MoleculeLoc};
use crate::util::{SmolPhotError, SmolPhotResult};

#[cfg(feature = "image-io")]
pub mod io;

/// Integer pixel position; `x` is the column, `y` the row.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct PixelCoord {
    /// Column index.
    pub x: usize,
    /// Row index.
    pub y: usize,
}

impl PixelCoord {
    /// Creates a pixel coordinate.
    pub fn new(x: usize, y: usize) -> Self {
        Self { x, y }
    }
}

/// Half-open pixel rectangle `[x0, x1) x [y0, y1)`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PixelBox {
    pub x0: usize,
    pub y0: usize,
    pub x1: usize,
    pub y1: usize,
}

impl PixelBox {
    /// Returns true if the pixel lies inside the box.
    pub fn contains(&self, p: PixelCoord) -> bool {
        p.x >= self.x0 && p.x < self.x1 && p.y >= self.y0 && p.y < self.y1
    }

    /// Number of pixels covered by the box.
    pub fn area(&self) -> usize {
        (self.x1 - self.x0) * (self.y1 - self.y0)
    }
}

/// Flattened pixel samples around a fit center.
///
/// Sample positions are expressed in pixel units (pixel centers at
/// `index + 0.5`), which keeps the least-squares problem well conditioned
/// regardless of the physical pixel size.
#[derive(Clone, Debug)]
pub struct FitWindow {
    center: PixelCoord,
    bounds: PixelBox,
    xs: Vec<f64>,
    ys: Vec<f64>,
    values: Vec<f64>,
}

impl FitWindow {
    /// Pixel the window was centered on.
    pub fn center(&self) -> PixelCoord {
        self.center
    }

    /// Clamped rectangle covered by the window.
    pub fn bounds(&self) -> PixelBox {
        self.bounds
    }

    /// Sample x positions in pixel units.
    pub fn xs(&self) -> &[f64] {
        &self.xs
    }

    /// Sample y positions in pixel units.
    pub fn ys(&self) -> &[f64] {
        &self.ys
    }

    /// Sample intensities.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if the window holds no samples.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Owned camera frame in photon units.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    data: Vec<f64>,
    width: usize,
    height: usize,
    pixel_size: f64,
    index: usize,
    z: Option<f64>,
}

impl Frame {
    /// Creates a frame from a row-major buffer of `width * height` samples.
    pub fn new(data: Vec<f64>, width: usize, height: usize, pixel_size: f64) -> SmolPhotResult<Self> {
        if width == 0 || height == 0 {
            return Err(SmolPhotError::InvalidDimensions { width, height });
        }
        let needed = width
            .checked_mul(height)
            .ok_or(SmolPhotError::InvalidDimensions { width, height })?;
        if data.len() < needed {
            return Err(SmolPhotError::BufferTooSmall {
                needed,
                got: data.len(),
            });
        }
        if !(pixel_size.is_finite() && pixel_size > 0.0) {
            return Err(SmolPhotError::InvalidPixelSize { pixel_size });
        }
        let mut data = data;
        data.truncate(needed);
        Ok(Self {
            data,
            width,
            height,
            pixel_size,
            index: 0,
            z: None,
        })
    }

    /// Creates a frame filled with a constant value.
    pub fn filled(width: usize, height: usize, pixel_size: f64, value: f64) -> SmolPhotResult<Self> {
        let len = width
            .checked_mul(height)
            .ok_or(SmolPhotError::InvalidDimensions { width, height })?;
        Self::new(vec![value; len], width, height, pixel_size)
    }

    /// Sets the frame index within its acquisition series.
    pub fn with_index(mut self, index: usize) -> Self {
        self.index = index;
        self
    }

    /// Sets the stage z position (calibration frames only).
    pub fn with_z(mut self, z: f64) -> Self {
        self.z = Some(z);
        self
    }

    /// Frame width in pixels.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Frame height in pixels.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Physical edge length of one pixel.
    pub fn pixel_size(&self) -> f64 {
        self.pixel_size
    }

    /// Index of the frame in its series.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Stage z position, if known.
    pub fn z(&self) -> Option<f64> {
        self.z
    }

    /// Physical width of the frame.
    pub fn size_x(&self) -> f64 {
        self.width as f64 * self.pixel_size
    }

    /// Physical height of the frame.
    pub fn size_y(&self) -> f64 {
        self.height as f64 * self.pixel_size
    }

    /// Row-major pixel buffer.
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// Mutable row-major pixel buffer.
    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    /// Returns the sample at `(x, y)` if it is within bounds.
    pub fn get(&self, x: usize, y: usize) -> Option<f64> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.data.get(y * self.width + x).copied()
    }

    #[inline]
    pub(crate) fn at(&self, x: usize, y: usize) -> f64 {
        self.data[y * self.width + x]
    }

    /// Sum of squared samples, used to track residual energy.
    pub fn energy(&self) -> f64 {
        self.data.iter().map(|v| v * v).sum()
    }

    /// Maps a (possibly fractional) pixel index to a physical coordinate.
    #[inline]
    pub fn pixel_to_coord(&self, index: f64) -> f64 {
        self.pixel_size * (0.5 + index)
    }

    /// Physical coordinates of a pixel center.
    pub fn pixel_center(&self, p: PixelCoord) -> (f64, f64) {
        (self.pixel_to_coord(p.x as f64), self.pixel_to_coord(p.y as f64))
    }

    /// Nearest pixel to a physical coordinate, clamped into the frame.
    pub fn coord_to_pixel(&self, coord: (f64, f64)) -> PixelCoord {
        let to_index = |c: f64, len: usize| -> usize {
            let idx = (c / self.pixel_size - 0.5).round();
            if !(idx > 0.0) {
                0
            } else {
                (idx as usize).min(len - 1)
            }
        };
        PixelCoord::new(to_index(coord.0, self.width), to_index(coord.1, self.height))
    }

    /// Clamps a signed pixel position into the frame.
    pub fn crop_pixel(&self, x: isize, y: isize) -> PixelCoord {
        let clamp = |v: isize, len: usize| v.clamp(0, len as isize - 1) as usize;
        PixelCoord::new(clamp(x, self.width), clamp(y, self.height))
    }

    /// Rectangle of `half_width` pixels around `center`, clamped to bounds.
    pub fn box_around(&self, center: PixelCoord, half_width: usize) -> PixelBox {
        PixelBox {
            x0: center.x.saturating_sub(half_width),
            y0: center.y.saturating_sub(half_width),
            x1: (center.x + half_width + 1).min(self.width),
            y1: (center.y + half_width + 1).min(self.height),
        }
    }

    /// The whole frame as a box.
    pub fn full_box(&self) -> PixelBox {
        PixelBox {
            x0: 0,
            y0: 0,
            x1: self.width,
            y1: self.height,
        }
    }

    /// Extracts the flattened fit window around `center`.
    pub fn window(&self, center: PixelCoord, half_width: usize) -> FitWindow {
        let bounds = self.box_around(center, half_width);
        let n = bounds.area();
        let mut xs = Vec::with_capacity(n);
        let mut ys = Vec::with_capacity(n);
        let mut values = Vec::with_capacity(n);
        for y in bounds.y0..bounds.y1 {
            let row = &self.data[y * self.width..(y + 1) * self.width];
            for (x, &v) in row.iter().enumerate().take(bounds.x1).skip(bounds.x0) {
                xs.push(x as f64 + 0.5);
                ys.push(y as f64 + 0.5);
                values.push(v);
            }
        }
        FitWindow {
            center,
            bounds,
            xs,
            ys,
            values,
        }
    }

    /// Subtracts fitted PSFs from every pixel of the frame.
    ///
    /// With `include_offset == false` only the Gaussian peak is removed so the
    /// background level of the residual is preserved.
    pub fn subtract_locs(&mut self, psf: &GaussianPsf, locs: &[MoleculeLoc], include_offset: bool) {
        for loc in locs {
            let params = &loc.params;
            let offset = if include_offset { params.offset } else { 0.0 };
            for y in 0..self.height {
                let cy = self.pixel_to_coord(y as f64);
                let row = &mut self.data[y * self.width..(y + 1) * self.width];
                for (x, v) in row.iter_mut().enumerate() {
                    let cx = self.pixel_size * (0.5 + x as f64);
                    *v -= psf.evaluate(params, cx, cy) + offset;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Frame, PixelCoord};

    #[test]
    fn coord_mapping_round_trips_pixel_centers() {
        let frame = Frame::filled(8, 6, 100e-9, 0.0).unwrap();
        for y in 0..6 {
            for x in 0..8 {
                let p = PixelCoord::new(x, y);
                assert_eq!(frame.coord_to_pixel(frame.pixel_center(p)), p);
            }
        }
    }

    #[test]
    fn coord_to_pixel_clamps_outside_points() {
        let frame = Frame::filled(4, 4, 1.0, 0.0).unwrap();
        assert_eq!(frame.coord_to_pixel((-3.0, 100.0)), PixelCoord::new(0, 3));
    }

    #[test]
    fn window_is_clamped_at_corner() {
        let data: Vec<f64> = (0..25).map(|v| v as f64).collect();
        let frame = Frame::new(data, 5, 5, 1.0).unwrap();
        let window = frame.window(PixelCoord::new(0, 0), 2);
        assert_eq!(window.len(), 9);
        assert_eq!(window.values(), &[0.0, 1.0, 2.0, 5.0, 6.0, 7.0, 10.0, 11.0, 12.0]);
        assert_eq!(window.xs()[1], 1.5);
        assert_eq!(window.ys()[3], 1.5);
    }
}
