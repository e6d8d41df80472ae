//! Computational grid: terrain, surface roughness, mesh and volume fields

pub mod mesh;
pub mod surface;
pub mod terrain;
pub mod wind_field;

// Re-export main types
pub use mesh::{Mesh, MeshBuilder, MeshPoint, MeshResolution, MeshSpec, StandardMeshBuilder};
pub use surface::{SurfaceProperties, SurfaceSpec, Vegetation};
pub use terrain::TerrainData;
pub use wind_field::VolumeVelocityField;
