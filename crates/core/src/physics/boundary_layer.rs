//! Neutral atmospheric boundary-layer scaling
//!
//! Estimates the friction velocity and the depth of a neutral boundary layer from a
//! single reference wind:
//!
//! ```text
//! u* = κ · U(z_ref) / ln((z_ref + h - d) / z0)
//! f  = 2Ω · |sin(φ)|                      (Coriolis parameter)
//! δ  = 0.2 · u* / f                        (Blackadar & Tennekes 1968)
//! ```

use super::wind_profile::WindProfile;

/// Atmospheric constants for boundary-layer calculations
pub mod constants {
    /// von Kármán constant
    pub const VON_KARMAN: f64 = 0.4;

    /// Twice the Earth's angular velocity (rad/s)
    pub const TWO_OMEGA: f64 = 1.4544e-4;

    /// Coriolis parameter used when the latitude is unusable (1/s)
    pub const DEFAULT_CORIOLIS: f64 = 1.0e-4;

    /// Floor keeping the boundary-layer depth finite at the equator (1/s)
    pub const MIN_CORIOLIS: f64 = 1.0e-8;

    /// Depth assigned when there is no wind to scale from (m)
    pub const CALM_BL_HEIGHT: f64 = 1000.0;

    /// Empirical proportionality of neutral boundary-layer depth to u*/f
    pub const BL_HEIGHT_COEFFICIENT: f64 = 0.2;
}

/// Coriolis parameter at `latitude` degrees.
pub fn coriolis_parameter(latitude: f64) -> f64 {
    if !(-90.0..=90.0).contains(&latitude) {
        return constants::DEFAULT_CORIOLIS;
    }
    let f = constants::TWO_OMEGA * latitude.to_radians().sin().abs();
    if f == 0.0 {
        constants::MIN_CORIOLIS
    } else {
        f
    }
}

/// Friction velocity from a reference speed `input_height` meters above the vegetation.
pub fn friction_velocity(speed: f64, input_height: f64, profile: &WindProfile) -> f64 {
    let z = input_height + profile.rough_h - profile.rough_d;
    speed.abs() * constants::VON_KARMAN / (z / profile.roughness).ln()
}

/// Neutral boundary-layer depth for a reference speed.
pub fn neutral_bl_height(speed: f64, input_height: f64, profile: &WindProfile, latitude: f64) -> f64 {
    if speed == 0.0 {
        return constants::CALM_BL_HEIGHT;
    }
    let u_star = friction_velocity(speed, input_height, profile);
    constants::BL_HEIGHT_COEFFICIENT * u_star / coriolis_parameter(latitude)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_coriolis() {
        assert_relative_eq!(coriolis_parameter(90.0), constants::TWO_OMEGA, epsilon = 1e-15);
        assert_relative_eq!(
            coriolis_parameter(-30.0),
            constants::TWO_OMEGA * 0.5,
            epsilon = 1e-12
        );
        assert_eq!(coriolis_parameter(0.0), constants::MIN_CORIOLIS);
        assert_eq!(coriolis_parameter(123.0), constants::DEFAULT_CORIOLIS);
    }

    #[test]
    fn test_neutral_bl_height() {
        let p = WindProfile {
            roughness: 0.01,
            ..WindProfile::default()
        };
        let u_star = 5.0 * 0.4 / (10.0_f64 / 0.01).ln();
        let expected = 0.2 * u_star / coriolis_parameter(45.0);
        assert_relative_eq!(neutral_bl_height(5.0, 10.0, &p, 45.0), expected, epsilon = 1e-9);
        assert_eq!(neutral_bl_height(0.0, 10.0, &p, 45.0), constants::CALM_BL_HEIGHT);
    }
}
