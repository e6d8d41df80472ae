//! Core types and utilities

pub mod polar;
pub mod raster;
pub mod station;
pub mod units;
pub mod vec3;

pub use polar::{wind_sd_to_uv, wind_uv_to_sd};
pub use raster::{Raster, Resampling, NO_DATA};
pub use station::{Station, StationFormat, StationSample};
pub use units::{CoverUnit, LengthUnit, TemperatureUnit, UnitFamily, VelocityUnit};
pub use vec3::Vec3;
