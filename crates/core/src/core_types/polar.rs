//! Conversions between meteorological speed/direction and Cartesian components.
//!
//! Directions follow the meteorological convention: the compass bearing the wind
//! blows FROM, in degrees clockwise from north. `u` is the eastward and `v` the
//! northward component, so a westerly (270°) wind has positive `u`.
//!
//! ```text
//! u = -speed · sin(dir)
//! v = -speed · cos(dir)
//! ```

use crate::error::{RunError, RunResult};

/// Convert speed and direction to `(u, v)`.
///
/// Directions up to one turn past 360° are wrapped once; anything negative or beyond
/// 720° is a configuration error.
pub fn wind_sd_to_uv(speed: f64, direction: f64) -> RunResult<(f64, f64)> {
    let mut dir = direction;
    if dir > 360.0 {
        dir -= 360.0;
    }
    if !(0.0..=360.0).contains(&dir) {
        return Err(RunError::Configuration(format!(
            "wind direction {direction} is outside [0, 360] degrees"
        )));
    }
    if dir == 360.0 {
        dir = 0.0;
    }

    let rad = dir.to_radians();
    // Cardinal directions are snapped so they yield exact zeros.
    let u = if dir == 0.0 || dir == 180.0 {
        0.0
    } else {
        -speed * rad.sin()
    };
    let v = if dir == 90.0 || dir == 270.0 {
        0.0
    } else {
        -speed * rad.cos()
    };
    Ok((u, v))
}

/// Convert `(u, v)` to speed and the direction the wind blows from, in `[0, 360)`.
///
/// Calm wind reports a direction of 0.
pub fn wind_uv_to_sd(u: f64, v: f64) -> (f64, f64) {
    let speed = u.hypot(v);
    if u == 0.0 && v == 0.0 {
        return (0.0, 0.0);
    }
    let mut dir = (-u).atan2(-v).to_degrees();
    if dir < 0.0 {
        dir += 360.0;
    }
    if dir >= 360.0 {
        dir -= 360.0;
    }
    (speed, dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_cardinal_directions() {
        assert_eq!(wind_sd_to_uv(5.0, 270.0).unwrap(), (5.0, 0.0));
        assert_eq!(wind_sd_to_uv(5.0, 90.0).unwrap(), (-5.0, 0.0));
        assert_eq!(wind_sd_to_uv(5.0, 0.0).unwrap(), (0.0, -5.0));
        assert_eq!(wind_sd_to_uv(5.0, 360.0).unwrap(), (0.0, -5.0));
        let (u, v) = wind_sd_to_uv(5.0, 180.0).unwrap();
        assert_eq!(u, 0.0);
        assert_relative_eq!(v, 5.0);
    }

    #[test]
    fn test_direction_range() {
        let (u, v) = wind_sd_to_uv(2.0, 405.0).unwrap();
        let (u2, v2) = wind_sd_to_uv(2.0, 45.0).unwrap();
        assert_relative_eq!(u, u2);
        assert_relative_eq!(v, v2);
        assert!(wind_sd_to_uv(2.0, -1.0).is_err());
        assert!(wind_sd_to_uv(2.0, 721.0).is_err());
    }

    #[test]
    fn test_inverse() {
        for dir in [0.0, 10.0, 90.0, 135.0, 200.0, 270.0, 359.0] {
            let (u, v) = wind_sd_to_uv(7.5, dir).unwrap();
            let (s, d) = wind_uv_to_sd(u, v);
            assert_relative_eq!(s, 7.5, epsilon = 1e-12);
            assert_relative_eq!(d, dir, epsilon = 1e-9);
        }
        assert_eq!(wind_uv_to_sd(0.0, 0.0), (0.0, 0.0));
    }
}
