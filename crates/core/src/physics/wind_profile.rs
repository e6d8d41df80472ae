//! Surface-layer wind profile evaluator
//!
//! Moves one wind component known at a reference height to another height above
//! ground using Monin-Obukhov similarity theory.
//!
//! # Theory
//!
//! Over a canopy of height `h` with displacement height `d` and roughness length `z0`
//! the mean wind follows
//!
//! ```text
//! U(z) = U(z1) · [ln(z/z0) - ψ(z/L)] / [ln(z1/z0) - ψ(z1/L)]
//! ```
//!
//! where `z` is measured from the displacement plane and `L` is the Obukhov length.
//! `L = 0` denotes neutral stratification and reduces the profile to the plain log law.
//!
//! Stability correction (Businger-Dyer / Beljaars-Holtslag form):
//!
//! ```text
//! stable   (L > 0): ψ = -17 · (1 - exp(-0.29 · z/L))
//! unstable (L < 0): x = (1 - 16 z/L)^¼
//!                   ψ = 2 ln((1+x)/2) + ln((1+x²)/2) - 2 atan(x) + π/2
//! ```
//!
//! Below the displacement plane plus seven roughness lengths the log law is not valid,
//! so the value at `d + 7 z0` is scaled linearly to zero at the ground. Above the
//! boundary-layer top the wind is held at its boundary-layer-top value.
//!
//! References:
//! - Stull, R.B. (1988). "An Introduction to Boundary Layer Meteorology." Kluwer.
//! - Beljaars, A.C.M. & Holtslag, A.A.M. (1991). "Flux parameterization over land
//!   surfaces for atmospheric models." J. Appl. Meteor. 30, 327-341.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Exponent of the 1/7 power law.
pub const POWER_LAW_EXPONENT: f64 = 0.143;

/// Which vertical profile shape to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ProfileShape {
    /// Similarity profile with stability correction.
    #[default]
    MoninObukhov,
    /// Neutral log law regardless of the Obukhov length.
    Logarithmic,
    /// `U(z) = U(z1) · (z/z1)^0.143`
    PowerLaw,
    /// Height-independent wind.
    Uniform,
}

/// Similarity parameters for one grid column.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindProfile {
    pub shape: ProfileShape,
    /// Obukhov length `L` (m); 0 for neutral.
    pub obukhov_length: f64,
    /// Atmospheric boundary-layer depth (m).
    pub bl_height: f64,
    /// Roughness length `z0` (m).
    pub roughness: f64,
    /// Vegetation height `h` (m).
    pub rough_h: f64,
    /// Displacement height `d` (m).
    pub rough_d: f64,
}

impl Default for WindProfile {
    fn default() -> Self {
        Self {
            shape: ProfileShape::MoninObukhov,
            obukhov_length: 0.0,
            bl_height: 1000.0,
            roughness: 0.01,
            rough_h: 0.0,
            rough_d: 0.0,
        }
    }
}

impl WindProfile {
    /// Value of a wind component at `agl` meters above ground, given `input_value`
    /// measured `input_height` meters above the vegetation top.
    ///
    /// Zero input yields zero output; `agl == 0` yields zero.
    pub fn evaluate(&self, input_value: f64, input_height: f64, agl: f64) -> f64 {
        if agl <= 0.0 {
            return 0.0;
        }
        match self.shape {
            ProfileShape::Uniform => input_value,
            ProfileShape::PowerLaw => {
                let z1 = input_height + self.rough_h;
                if z1 <= 0.0 {
                    return input_value;
                }
                input_value * (agl / z1).powf(POWER_LAW_EXPONENT)
            }
            ProfileShape::Logarithmic => self.similarity(input_value, input_height, agl, 0.0),
            ProfileShape::MoninObukhov => {
                self.similarity(input_value, input_height, agl, self.obukhov_length)
            }
        }
    }

    fn similarity(&self, input_value: f64, input_height: f64, agl: f64, l: f64) -> f64 {
        let z0 = self.roughness;
        let d = self.rough_d;
        // Reference height above the displacement plane
        let z1 = input_height + self.rough_h - d;

        if z1 <= z0 {
            // Reference sits inside the roughness sublayer: linear to the ground
            return input_value * agl / (z1 + d);
        }
        if agl < d + 7.0 * z0 {
            let at_7z0 = monin_obukhov(7.0 * z0, input_value, z1, z0, l);
            at_7z0 * agl / (7.0 * z0 + d)
        } else if agl < d + self.bl_height {
            monin_obukhov(agl - d, input_value, z1, z0, l)
        } else {
            monin_obukhov(self.bl_height, input_value, z1, z0, l)
        }
    }
}

/// Similarity scaling from `z1` to `z` (both above the displacement plane).
pub fn monin_obukhov(z: f64, value_at_z1: f64, z1: f64, z0: f64, obukhov_length: f64) -> f64 {
    if obukhov_length == 0.0 {
        return value_at_z1 * (z / z0).ln() / (z1 / z0).ln();
    }
    value_at_z1 * ((z / z0).ln() - stability_function(z / obukhov_length))
        / ((z1 / z0).ln() - stability_function(z1 / obukhov_length))
}

/// Integrated stability correction `ψ(ζ)` for momentum, `ζ = z/L`.
pub fn stability_function(zeta: f64) -> f64 {
    if zeta >= 0.0 {
        -17.0 * (1.0 - (-0.29 * zeta).exp())
    } else {
        let x = (1.0 - 16.0 * zeta).powf(0.25);
        2.0 * ((1.0 + x) / 2.0).ln() + ((1.0 + x * x) / 2.0).ln() - 2.0 * x.atan() + PI / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn grass() -> WindProfile {
        WindProfile {
            roughness: 0.01,
            bl_height: 1000.0,
            ..WindProfile::default()
        }
    }

    #[test]
    fn test_reference_height_returns_input() {
        let p = grass();
        assert_relative_eq!(p.evaluate(5.0, 10.0, 10.0), 5.0, epsilon = 1e-12);
    }

    #[test]
    fn test_zero_input_and_ground() {
        let p = grass();
        assert_eq!(p.evaluate(0.0, 10.0, 20.0), 0.0);
        assert_eq!(p.evaluate(5.0, 10.0, 0.0), 0.0);
    }

    #[test]
    fn test_neutral_log_law() {
        let p = grass();
        let expected = 5.0 * (20.0_f64 / 0.01).ln() / (10.0_f64 / 0.01).ln();
        assert_relative_eq!(p.evaluate(5.0, 10.0, 20.0), expected, epsilon = 1e-12);
        // Monotone increasing with height
        assert!(p.evaluate(5.0, 10.0, 2.0) < p.evaluate(5.0, 10.0, 6.0));
    }

    #[test]
    fn test_linear_near_ground() {
        let p = WindProfile {
            roughness: 1.0,
            rough_h: 15.4,
            rough_d: 12.0,
            ..WindProfile::default()
        };
        // Below d + 7 z0 = 19 m the value scales linearly from the ground.
        let at_19 = p.evaluate(5.0, 10.0, 19.0 - 1e-9);
        let at_95 = p.evaluate(5.0, 10.0, 9.5);
        assert_relative_eq!(at_95, at_19 * 0.5, epsilon = 1e-6);
    }

    #[test]
    fn test_capped_at_boundary_layer_top() {
        let p = WindProfile {
            bl_height: 100.0,
            ..grass()
        };
        assert_relative_eq!(
            p.evaluate(5.0, 10.0, 150.0),
            p.evaluate(5.0, 10.0, 100.0),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_stability_shifts_profile() {
        let neutral = grass();
        let stable = WindProfile {
            obukhov_length: 50.0,
            ..grass()
        };
        let unstable = WindProfile {
            obukhov_length: -50.0,
            ..grass()
        };
        let n = neutral.evaluate(5.0, 10.0, 50.0);
        assert!(stable.evaluate(5.0, 10.0, 50.0) > n);
        assert!(unstable.evaluate(5.0, 10.0, 50.0) < n);
        // Logarithmic shape ignores L
        let forced_log = WindProfile {
            shape: ProfileShape::Logarithmic,
            ..stable
        };
        assert_relative_eq!(forced_log.evaluate(5.0, 10.0, 50.0), n, epsilon = 1e-12);
    }

    #[test]
    fn test_stability_function_continuous_at_neutral() {
        assert_relative_eq!(stability_function(0.0), 0.0, epsilon = 1e-12);
        assert_relative_eq!(stability_function(-1e-9), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_other_shapes() {
        let uniform = WindProfile {
            shape: ProfileShape::Uniform,
            ..grass()
        };
        assert_eq!(uniform.evaluate(3.0, 10.0, 80.0), 3.0);
        let power = WindProfile {
            shape: ProfileShape::PowerLaw,
            ..grass()
        };
        assert_relative_eq!(
            power.evaluate(3.0, 10.0, 20.0),
            3.0 * 2.0_f64.powf(POWER_LAW_EXPONENT),
            epsilon = 1e-12
        );
    }
}
