//! Vector type alias for velocities and positions.

use nalgebra::Vector3;

/// 3D vector used for node velocities `(u, v, w)` and projected positions `(x, y, z)`.
///
/// This is a simple alias for `nalgebra::Vector3<f64>`; `x` is east, `y` north and
/// `z` up everywhere in the crate.
pub type Vec3 = Vector3<f64>;
