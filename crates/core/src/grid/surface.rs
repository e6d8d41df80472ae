//! Surface roughness description
//!
//! Each horizontal cell carries the three canopy parameters the profile evaluator
//! needs: roughness length `z0`, vegetation height `h` and displacement height `d`.

use crate::core_types::raster::{Raster, Resampling};
use crate::error::{RunError, RunResult};
use crate::physics::wind_profile::WindProfile;
use serde::{Deserialize, Serialize};

/// Uniform vegetation presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Vegetation {
    Grass,
    Brush,
    Trees,
}

impl Vegetation {
    /// `(z0, h, d)` in meters.
    pub fn parameters(&self) -> (f64, f64, f64) {
        match self {
            Vegetation::Grass => (0.01, 0.0, 0.0),
            Vegetation::Brush => (0.43, 2.3, 1.8),
            Vegetation::Trees => (1.0, 15.4, 12.0),
        }
    }
}

/// How the surface is specified for a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SurfaceSpec {
    Uniform(Vegetation),
    Custom { roughness: f64, rough_h: f64, rough_d: f64 },
    Gridded(SurfaceProperties),
}

impl Default for SurfaceSpec {
    fn default() -> Self {
        SurfaceSpec::Uniform(Vegetation::Grass)
    }
}

impl SurfaceSpec {
    /// Materialize on the grid of `like`.
    pub fn rasterize(&self, like: &Raster) -> RunResult<SurfaceProperties> {
        match self {
            SurfaceSpec::Uniform(veg) => {
                let (z0, h, d) = veg.parameters();
                SurfaceProperties::uniform(like, z0, h, d)
            }
            SurfaceSpec::Custom {
                roughness,
                rough_h,
                rough_d,
            } => SurfaceProperties::uniform(like, *roughness, *rough_h, *rough_d),
            SurfaceSpec::Gridded(props) => {
                if props.roughness.cell_size() == like.cell_size()
                    && props.roughness.ncols() == like.ncols()
                    && props.roughness.nrows() == like.nrows()
                {
                    Ok(props.clone())
                } else {
                    props.resampled(like.cell_size())
                }
            }
        }
    }
}

/// Gridded canopy parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurfaceProperties {
    pub roughness: Raster,
    pub rough_h: Raster,
    pub rough_d: Raster,
}

impl SurfaceProperties {
    pub fn uniform(like: &Raster, roughness: f64, rough_h: f64, rough_d: f64) -> RunResult<Self> {
        check_canopy(roughness, rough_h, rough_d)?;
        Ok(Self {
            roughness: like.like(roughness),
            rough_h: like.like(rough_h),
            rough_d: like.like(rough_d),
        })
    }

    /// Validate and wrap three rasters sharing one header.
    pub fn from_rasters(roughness: Raster, rough_h: Raster, rough_d: Raster) -> RunResult<Self> {
        let same = |r: &Raster| {
            r.ncols() == roughness.ncols()
                && r.nrows() == roughness.nrows()
                && r.cell_size() == roughness.cell_size()
        };
        if !same(&rough_h) || !same(&rough_d) {
            return Err(RunError::Configuration(
                "roughness grids do not share one header".to_string(),
            ));
        }
        for ((z0, h), d) in roughness
            .data()
            .iter()
            .zip(rough_h.data())
            .zip(rough_d.data())
        {
            check_canopy(*z0, *h, *d)?;
        }
        Ok(Self {
            roughness,
            rough_h,
            rough_d,
        })
    }

    /// `(z0, h, d)` of one cell.
    #[inline]
    pub fn at(&self, row: usize, col: usize) -> (f64, f64, f64) {
        (
            self.roughness.get(row, col),
            self.rough_h.get(row, col),
            self.rough_d.get(row, col),
        )
    }

    /// Profile parameters of one cell on top of `base` (shape, L, boundary-layer depth).
    pub fn profile(&self, row: usize, col: usize, base: &WindProfile) -> WindProfile {
        let (roughness, rough_h, rough_d) = self.at(row, col);
        WindProfile {
            roughness,
            rough_h,
            rough_d,
            ..*base
        }
    }

    pub fn max_rough_h(&self) -> f64 {
        self.rough_h.max_value().unwrap_or(0.0)
    }

    /// Nearest-neighbour resampling (canopy classes do not blend).
    pub fn resampled(&self, cell_size: f64) -> RunResult<Self> {
        Ok(Self {
            roughness: self.roughness.resample(cell_size, Resampling::Nearest)?,
            rough_h: self.rough_h.resample(cell_size, Resampling::Nearest)?,
            rough_d: self.rough_d.resample(cell_size, Resampling::Nearest)?,
        })
    }
}

fn check_canopy(roughness: f64, rough_h: f64, rough_d: f64) -> RunResult<()> {
    if roughness.is_nan() || roughness <= 0.0 || rough_h < 0.0 || rough_d < 0.0 || rough_d > rough_h {
        return Err(RunError::Configuration(format!(
            "invalid canopy parameters z0={roughness}, h={rough_h}, d={rough_d}"
        )));
    }
    Ok(())
}
