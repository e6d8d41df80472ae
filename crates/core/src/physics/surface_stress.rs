//! Surface stress products derived from the near-ground wind
//!
//! - Friction velocity from the log law applied to the wind at a chosen node height
//! - PM10 dust emission flux (Gillette & Passi 1988 style threshold scaling):
//!
//! ```text
//! F = K · ρ / g · u* · (u*² - u*t²)    for u* > u*t, else 0
//! ```

use super::boundary_layer::constants::VON_KARMAN;

/// Dust emission constants
pub mod constants {
    /// Threshold friction velocity for saltation (m/s)
    pub const USTAR_THRESHOLD: f64 = 0.22;

    /// Empirical PM10 emission coefficient (1/m)
    pub const EMISSION_K: f64 = 0.0007;

    /// Particle-laden air density scale (g/m³)
    pub const RHO: f64 = 1.164e6;

    /// Gravitational acceleration (m/s²)
    pub const GRAVITY: f64 = 9.81;
}

/// Friction velocity from the speed `speed` measured `z` meters above ground.
///
/// Returns 0 when `z` does not clear the roughness sublayer.
pub fn log_friction_velocity(speed: f64, z: f64, roughness: f64, rough_d: f64) -> f64 {
    let z_eff = z - rough_d;
    if z_eff <= roughness || roughness <= 0.0 {
        return 0.0;
    }
    speed.abs() * VON_KARMAN / (z_eff / roughness).ln()
}

/// PM10 vertical flux (g/m²/s) for a friction velocity.
pub fn pm10_flux(u_star: f64) -> f64 {
    use constants::{EMISSION_K, GRAVITY, RHO, USTAR_THRESHOLD};
    if u_star <= USTAR_THRESHOLD {
        return 0.0;
    }
    EMISSION_K * RHO / GRAVITY * u_star * (u_star * u_star - USTAR_THRESHOLD * USTAR_THRESHOLD)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_log_friction_velocity() {
        let u = log_friction_velocity(5.0, 10.0, 0.01, 0.0);
        assert_relative_eq!(u, 2.0 / 1000.0_f64.ln(), epsilon = 1e-12);
        assert_eq!(log_friction_velocity(5.0, 0.005, 0.01, 0.0), 0.0);
    }

    #[test]
    fn test_pm10_threshold() {
        assert_eq!(pm10_flux(0.1), 0.0);
        assert_eq!(pm10_flux(constants::USTAR_THRESHOLD), 0.0);
        let f = pm10_flux(0.5);
        let expected = 0.0007 * 1.164e6 / 9.81 * 0.5 * (0.25 - 0.0484);
        assert_relative_eq!(f, expected, epsilon = 1e-9);
        assert!(pm10_flux(0.6) > f);
    }
}
