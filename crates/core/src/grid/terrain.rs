//! Terrain elevation (DEM) support
//!
//! Wraps an elevation [`Raster`] in meters and provides the synthetic terrains used by
//! demos and tests.

use crate::core_types::raster::{Raster, Resampling};
use crate::error::{RunError, RunResult};
use serde::{Deserialize, Serialize};

/// Terrain data structure holding elevation information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerrainData {
    dem: Raster,
    min_elevation: f64,
    max_elevation: f64,
}

impl TerrainData {
    /// Wrap a DEM. Every cell must hold data.
    pub fn from_raster(dem: Raster) -> RunResult<Self> {
        if dem.ncols() < 2 || dem.nrows() < 2 {
            return Err(RunError::Configuration(format!(
                "elevation grid must be at least 2x2 cells, got {}x{}",
                dem.ncols(),
                dem.nrows()
            )));
        }
        if dem.has_no_data() {
            return Err(RunError::Configuration(
                "elevation grid contains no-data cells".to_string(),
            ));
        }
        let (min_elevation, max_elevation) = match (dem.min_value(), dem.max_value()) {
            (Some(lo), Some(hi)) => (lo, hi),
            _ => {
                return Err(RunError::Configuration(
                    "elevation grid holds no values".to_string(),
                ))
            }
        };
        Ok(Self {
            dem,
            min_elevation,
            max_elevation,
        })
    }

    /// Create flat terrain at given elevation
    pub fn flat(ncols: usize, nrows: usize, cell_size: f64, elevation: f64) -> Self {
        Self {
            dem: Raster::new(ncols, nrows, 0.0, 0.0, cell_size, elevation),
            min_elevation: elevation,
            max_elevation: elevation,
        }
    }

    /// Create terrain with a single Gaussian hill in the middle of the domain
    pub fn single_hill(
        ncols: usize,
        nrows: usize,
        cell_size: f64,
        base_elevation: f64,
        hill_height: f64,
        hill_radius: f64,
    ) -> Self {
        let mut dem = Raster::new(ncols, nrows, 0.0, 0.0, cell_size, base_elevation);
        let center_x = dem.x_extent() / 2.0;
        let center_y = dem.y_extent() / 2.0;

        let mut min_elev = f64::MAX;
        let mut max_elev = f64::MIN;
        for row in 0..nrows {
            for col in 0..ncols {
                let (x, y) = dem.cell_center(row, col);
                let dx = x - center_x;
                let dy = y - center_y;
                let height_factor = (-(dx * dx + dy * dy) / (hill_radius * hill_radius)).exp();
                let elev = base_elevation + hill_height * height_factor;
                dem.set(row, col, elev);
                min_elev = min_elev.min(elev);
                max_elev = max_elev.max(elev);
            }
        }

        Self {
            dem,
            min_elevation: min_elev,
            max_elevation: max_elev,
        }
    }

    pub fn dem(&self) -> &Raster {
        &self.dem
    }

    pub fn min_elevation(&self) -> f64 {
        self.min_elevation
    }

    pub fn max_elevation(&self) -> f64 {
        self.max_elevation
    }

    pub fn resolution(&self) -> f64 {
        self.dem.cell_size()
    }

    /// Bilinear elevation at a projected position.
    pub fn elevation_at(&self, x: f64, y: f64) -> Option<f64> {
        self.dem.bilinear(x, y)
    }

    /// Terrain on a new cell size: bilinear when refining, nearest when coarsening.
    pub fn resampled(&self, cell_size: f64) -> RunResult<TerrainData> {
        if (cell_size - self.dem.cell_size()).abs() < 1e-9 * cell_size {
            return Ok(self.clone());
        }
        let method = if cell_size < self.dem.cell_size() {
            Resampling::Bilinear
        } else {
            Resampling::Nearest
        };
        TerrainData::from_raster(self.dem.resample(cell_size, method)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_flat_terrain() {
        let terrain = TerrainData::flat(10, 8, 30.0, 250.0);
        assert_eq!(terrain.min_elevation(), 250.0);
        assert_eq!(terrain.max_elevation(), 250.0);
        assert_eq!(terrain.elevation_at(100.0, 100.0), Some(250.0));
        assert_eq!(terrain.elevation_at(400.0, 100.0), None);
    }

    #[test]
    fn test_single_hill() {
        let terrain = TerrainData::single_hill(21, 21, 10.0, 100.0, 50.0, 40.0);
        assert_relative_eq!(terrain.max_elevation(), 150.0, epsilon = 1e-9);
        assert!(terrain.min_elevation() >= 100.0);
        let center = terrain.elevation_at(105.0, 105.0).unwrap();
        let edge = terrain.elevation_at(5.0, 5.0).unwrap();
        assert!(center > edge);
    }

    #[test]
    fn test_resampled() {
        let terrain = TerrainData::single_hill(20, 20, 10.0, 0.0, 30.0, 50.0);
        let coarse = terrain.resampled(20.0).unwrap();
        assert_eq!(coarse.dem().ncols(), 10);
        let fine = terrain.resampled(5.0).unwrap();
        assert_eq!(fine.dem().ncols(), 40);
        assert!(fine.max_elevation() <= terrain.max_elevation() + 1e-9);
    }

    #[test]
    fn test_from_raster_rejects_no_data() {
        let mut dem = Raster::new(3, 3, 0.0, 0.0, 1.0, 10.0);
        let nd = dem.no_data();
        dem.set(1, 1, nd);
        assert!(TerrainData::from_raster(dem).is_err());
    }
}
