//! Regular 2-D grids in projected coordinates.
//!
//! A [`Raster`] carries an ESRI-grid style header (columns, rows, lower-left corner,
//! square cell size, no-data value, projection string) and a row-major value buffer.
//! Row 0 is the southern-most row, so `y` grows with the row index:
//!
//! ```text
//! index(row, col) = row * ncols + col
//! centre(row, col) = (xll + (col + 0.5) * cell_size, yll + (row + 0.5) * cell_size)
//! ```

use crate::error::{try_alloc, RunError, RunResult};
use serde::{Deserialize, Serialize};

/// Default value marking cells without data.
pub const NO_DATA: f64 = -9999.0;

/// How values are carried over when a raster changes resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resampling {
    /// Value of the source cell containing the target centre.
    Nearest,
    /// Bilinear blend of the four surrounding source centres.
    Bilinear,
}

/// 2-D grid of `f64` values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Raster {
    ncols: usize,
    nrows: usize,
    xll: f64,
    yll: f64,
    cell_size: f64,
    no_data: f64,
    prj: String,
    data: Vec<f64>,
}

impl Raster {
    /// Create a raster filled with `fill`.
    pub fn new(ncols: usize, nrows: usize, xll: f64, yll: f64, cell_size: f64, fill: f64) -> Self {
        Self {
            ncols,
            nrows,
            xll,
            yll,
            cell_size,
            no_data: NO_DATA,
            prj: String::new(),
            data: vec![fill; ncols * nrows],
        }
    }

    /// Like [`Raster::new`] but reports allocation failure instead of aborting.
    pub fn try_new(
        ncols: usize,
        nrows: usize,
        xll: f64,
        yll: f64,
        cell_size: f64,
        fill: f64,
    ) -> RunResult<Self> {
        let len = ncols.checked_mul(nrows).ok_or_else(|| {
            RunError::ResourceExhaustion(format!("raster of {ncols}x{nrows} cells overflows"))
        })?;
        Ok(Self {
            ncols,
            nrows,
            xll,
            yll,
            cell_size,
            no_data: NO_DATA,
            prj: String::new(),
            data: try_alloc(len, fill, "raster")?,
        })
    }

    /// Wrap an existing buffer (row 0 south).
    pub fn from_data(
        ncols: usize,
        nrows: usize,
        xll: f64,
        yll: f64,
        cell_size: f64,
        data: Vec<f64>,
    ) -> RunResult<Self> {
        if data.len() != ncols * nrows {
            return Err(RunError::Configuration(format!(
                "raster buffer holds {} values, header expects {}x{}",
                data.len(),
                ncols,
                nrows
            )));
        }
        if cell_size <= 0.0 {
            return Err(RunError::Configuration(format!(
                "raster cell size must be positive, got {cell_size}"
            )));
        }
        Ok(Self {
            ncols,
            nrows,
            xll,
            yll,
            cell_size,
            no_data: NO_DATA,
            prj: String::new(),
            data,
        })
    }

    /// Raster with the same header as `self`, filled with `fill`.
    pub fn like(&self, fill: f64) -> Self {
        Self {
            ncols: self.ncols,
            nrows: self.nrows,
            xll: self.xll,
            yll: self.yll,
            cell_size: self.cell_size,
            no_data: self.no_data,
            prj: self.prj.clone(),
            data: vec![fill; self.data.len()],
        }
    }

    pub fn with_projection(mut self, prj: impl Into<String>) -> Self {
        self.prj = prj.into();
        self
    }

    pub fn with_no_data(mut self, no_data: f64) -> Self {
        self.no_data = no_data;
        self
    }

    #[inline]
    pub fn ncols(&self) -> usize {
        self.ncols
    }

    #[inline]
    pub fn nrows(&self) -> usize {
        self.nrows
    }

    #[inline]
    pub fn xll(&self) -> f64 {
        self.xll
    }

    #[inline]
    pub fn yll(&self) -> f64 {
        self.yll
    }

    #[inline]
    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    #[inline]
    pub fn no_data(&self) -> f64 {
        self.no_data
    }

    pub fn projection(&self) -> &str {
        &self.prj
    }

    /// Total extent in x (meters).
    pub fn x_extent(&self) -> f64 {
        self.ncols as f64 * self.cell_size
    }

    /// Total extent in y (meters).
    pub fn y_extent(&self) -> f64 {
        self.nrows as f64 * self.cell_size
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<f64> {
        self.data
    }

    #[inline]
    pub fn index(&self, row: usize, col: usize) -> usize {
        row * self.ncols + col
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[self.index(row, col)]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        let idx = self.index(row, col);
        self.data[idx] = value;
    }

    #[inline]
    pub fn is_no_data(&self, value: f64) -> bool {
        value == self.no_data
    }

    /// Centre of a cell in projected coordinates.
    #[inline]
    pub fn cell_center(&self, row: usize, col: usize) -> (f64, f64) {
        (
            self.xll + (col as f64 + 0.5) * self.cell_size,
            self.yll + (row as f64 + 0.5) * self.cell_size,
        )
    }

    /// Whether `(x, y)` lies inside the raster footprint.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.xll
            && x <= self.xll + self.x_extent()
            && y >= self.yll
            && y <= self.yll + self.y_extent()
    }

    /// Cell containing `(x, y)`, or `None` outside the footprint.
    pub fn cell_of(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        if !self.contains(x, y) {
            return None;
        }
        let col = (((x - self.xll) / self.cell_size) as usize).min(self.ncols - 1);
        let row = (((y - self.yll) / self.cell_size) as usize).min(self.nrows - 1);
        Some((row, col))
    }

    /// Largest value that is not no-data.
    pub fn max_value(&self) -> Option<f64> {
        self.data
            .iter()
            .copied()
            .filter(|v| !self.is_no_data(*v))
            .reduce(f64::max)
    }

    /// Smallest value that is not no-data.
    pub fn min_value(&self) -> Option<f64> {
        self.data
            .iter()
            .copied()
            .filter(|v| !self.is_no_data(*v))
            .reduce(f64::min)
    }

    pub fn has_no_data(&self) -> bool {
        self.data.iter().any(|v| self.is_no_data(*v))
    }

    /// Apply `f` to every cell that holds data.
    pub fn map_in_place(&mut self, mut f: impl FnMut(f64) -> f64) {
        let no_data = self.no_data;
        for v in &mut self.data {
            if *v != no_data {
                *v = f(*v);
            }
        }
    }

    /// Fallible variant of [`Raster::map_in_place`]; stops at the first error.
    pub fn try_map_in_place<E>(
        &mut self,
        mut f: impl FnMut(f64) -> Result<f64, E>,
    ) -> Result<(), E> {
        let no_data = self.no_data;
        for v in &mut self.data {
            if *v != no_data {
                *v = f(*v)?;
            }
        }
        Ok(())
    }

    /// Nearest-cell lookup; `None` outside the footprint.
    pub fn nearest(&self, x: f64, y: f64) -> Option<f64> {
        self.cell_of(x, y).map(|(row, col)| self.get(row, col))
    }

    /// Bilinear interpolation between cell centres.
    ///
    /// Points between the outermost centres and the raster edge use the edge value.
    /// Returns `None` outside the footprint or when a contributing cell is no-data.
    pub fn bilinear(&self, x: f64, y: f64) -> Option<f64> {
        if !self.contains(x, y) {
            return None;
        }
        let fx = ((x - self.xll) / self.cell_size - 0.5).clamp(0.0, (self.ncols - 1) as f64);
        let fy = ((y - self.yll) / self.cell_size - 0.5).clamp(0.0, (self.nrows - 1) as f64);

        let c0 = (fx.floor() as usize).min(self.ncols.saturating_sub(2));
        let r0 = (fy.floor() as usize).min(self.nrows.saturating_sub(2));
        let c1 = (c0 + 1).min(self.ncols - 1);
        let r1 = (r0 + 1).min(self.nrows - 1);
        let tx = (fx - c0 as f64).clamp(0.0, 1.0);
        let ty = (fy - r0 as f64).clamp(0.0, 1.0);

        let q00 = self.get(r0, c0);
        let q10 = self.get(r0, c1);
        let q01 = self.get(r1, c0);
        let q11 = self.get(r1, c1);
        if [q00, q10, q01, q11].iter().any(|v| self.is_no_data(*v)) {
            return None;
        }

        let south = q00 * (1.0 - tx) + q10 * tx;
        let north = q01 * (1.0 - tx) + q11 * tx;
        Some(south * (1.0 - ty) + north * ty)
    }

    /// Resample onto a new cell size covering the same footprint.
    pub fn resample(&self, cell_size: f64, method: Resampling) -> RunResult<Raster> {
        if cell_size <= 0.0 {
            return Err(RunError::Configuration(format!(
                "resample cell size must be positive, got {cell_size}"
            )));
        }
        let ncols = ((self.x_extent() / cell_size).round() as usize).max(1);
        let nrows = ((self.y_extent() / cell_size).round() as usize).max(1);
        let mut out = Raster::try_new(ncols, nrows, self.xll, self.yll, cell_size, self.no_data)?
            .with_no_data(self.no_data)
            .with_projection(self.prj.clone());

        for row in 0..nrows {
            for col in 0..ncols {
                let (x, y) = out.cell_center(row, col);
                let x = x.min(self.xll + self.x_extent());
                let y = y.min(self.yll + self.y_extent());
                let value = match method {
                    Resampling::Nearest => self.nearest(x, y),
                    Resampling::Bilinear => self.bilinear(x, y),
                };
                out.set(row, col, value.unwrap_or(self.no_data));
            }
        }
        Ok(out)
    }

    /// Trim `percent` of the extent from every side, snapped to whole cells.
    ///
    /// `percent` must lie in `[0, 50)`.
    pub fn clip_buffer(&self, percent: f64) -> RunResult<Raster> {
        if !(0.0..50.0).contains(&percent) {
            return Err(RunError::Configuration(format!(
                "output buffer clipping must be in [0, 50) percent, got {percent}"
            )));
        }
        let clip_cols = (self.ncols as f64 * percent / 100.0).floor() as usize;
        let clip_rows = (self.nrows as f64 * percent / 100.0).floor() as usize;
        if clip_cols == 0 && clip_rows == 0 {
            return Ok(self.clone());
        }
        let ncols = self.ncols - 2 * clip_cols;
        let nrows = self.nrows - 2 * clip_rows;
        let mut data = Vec::with_capacity(ncols * nrows);
        for row in clip_rows..clip_rows + nrows {
            let start = self.index(row, clip_cols);
            data.extend_from_slice(&self.data[start..start + ncols]);
        }
        Ok(Raster {
            ncols,
            nrows,
            xll: self.xll + clip_cols as f64 * self.cell_size,
            yll: self.yll + clip_rows as f64 * self.cell_size,
            cell_size: self.cell_size,
            no_data: self.no_data,
            prj: self.prj.clone(),
            data,
        })
    }
}
