//! Boundary-layer physics: vertical wind profiles and surface stress

pub mod boundary_layer;
pub mod surface_stress;
pub mod wind_profile;

pub use boundary_layer::{coriolis_parameter, friction_velocity, neutral_bl_height};
pub use surface_stress::{log_friction_velocity, pm10_flux};
pub use wind_profile::{monin_obukhov, stability_function, ProfileShape, WindProfile};
