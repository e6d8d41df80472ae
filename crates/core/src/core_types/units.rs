//! Physical unit families and conversion to their base units.
//!
//! Every quantity inside the crate is held in a fixed base unit per family:
//!
//! | Family      | Base       | Symbols                                  |
//! |-------------|------------|------------------------------------------|
//! | length      | meters     | `ft`, `m`, `mi`, `km`, `ftx10`, `mx10`   |
//! | velocity    | m/s        | `mps`, `mph`, `kph`                      |
//! | temperature | kelvin     | `K`, `C`, `R`, `F`                       |
//! | cover       | fraction   | `fraction`, `percent`, `canopy_categories` |
//!
//! Conversion goes through [`UnitFamily::to_base`] / [`UnitFamily::from_base`], for
//! scalars or elementwise over a [`Raster`]. Unknown symbols are an
//! [`UnitError::UnknownSymbol`], never a silent default.
//!
//! # Canopy categories
//!
//! The categorical cover scale maps four canopy density buckets onto fixed fractions
//! (1 → 0.10, 2 → 0.35, 3 → 0.65, 4 → 0.90, 0 and 99 → 0.0). Going back from a fraction
//! picks the bucket whose range contains it, so the conversion is lossy: a cover of
//! 0.42 becomes bucket 2 and returns as 0.35. Applying the round trip a second time is
//! stable.
//!
//! # Usage
//! ```
//! use windfield_core::core_types::units::{LengthUnit, UnitFamily, VelocityUnit};
//!
//! let mph: VelocityUnit = "mph".parse().unwrap();
//! assert!((mph.to_base(10.0).unwrap() - 4.4704).abs() < 1e-12);
//! assert!((LengthUnit::Feet.from_base(1.0).unwrap() - 3.28084).abs() < 1e-12);
//! ```

use crate::core_types::raster::Raster;
use crate::error::UnitError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Shared behaviour of all unit families.
pub trait UnitFamily: Copy + fmt::Display + FromStr<Err = UnitError> {
    /// Family name used in error messages.
    const FAMILY: &'static str;

    /// Convert a value expressed in `self` into the family base unit.
    fn to_base(self, value: f64) -> Result<f64, UnitError>;

    /// Convert a base-unit value into `self`.
    fn from_base(self, value: f64) -> Result<f64, UnitError>;

    /// Elementwise [`UnitFamily::to_base`]; no-data cells are left untouched.
    fn raster_to_base(self, raster: &mut Raster) -> Result<(), UnitError> {
        raster.try_map_in_place(|v| self.to_base(v))
    }

    /// Elementwise [`UnitFamily::from_base`]; no-data cells are left untouched.
    fn raster_from_base(self, raster: &mut Raster) -> Result<(), UnitError> {
        raster.try_map_in_place(|v| self.from_base(v))
    }
}

/// Convert `value` given a unit symbol, e.g. `to_base::<LengthUnit>(10.0, "ft")`.
pub fn to_base<U: UnitFamily>(value: f64, symbol: &str) -> Result<f64, UnitError> {
    symbol.parse::<U>()?.to_base(value)
}

/// Inverse of [`to_base`].
pub fn from_base<U: UnitFamily>(value: f64, symbol: &str) -> Result<f64, UnitError> {
    symbol.parse::<U>()?.from_base(value)
}

fn unknown(family: &'static str, symbol: &str) -> UnitError {
    UnitError::UnknownSymbol {
        family,
        symbol: symbol.to_string(),
    }
}

// ============================================================================
// LENGTH
// ============================================================================

/// Length units (base: meters).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LengthUnit {
    Feet,
    Meters,
    Miles,
    Kilometers,
    /// Feet stored as tenths (integer DEM encodings).
    FeetTimesTen,
    /// Meters stored as tenths.
    MetersTimesTen,
}

impl LengthUnit {
    pub const ALL: [LengthUnit; 6] = [
        LengthUnit::Feet,
        LengthUnit::Meters,
        LengthUnit::Miles,
        LengthUnit::Kilometers,
        LengthUnit::FeetTimesTen,
        LengthUnit::MetersTimesTen,
    ];

    const FEET_PER_METER: f64 = 3.28084;
    const METERS_PER_MILE: f64 = 1609.344;

    pub fn symbol(&self) -> &'static str {
        match self {
            LengthUnit::Feet => "ft",
            LengthUnit::Meters => "m",
            LengthUnit::Miles => "mi",
            LengthUnit::Kilometers => "km",
            LengthUnit::FeetTimesTen => "ftx10",
            LengthUnit::MetersTimesTen => "mx10",
        }
    }
}

impl UnitFamily for LengthUnit {
    const FAMILY: &'static str = "length";

    fn to_base(self, value: f64) -> Result<f64, UnitError> {
        Ok(match self {
            LengthUnit::Feet => value / Self::FEET_PER_METER,
            LengthUnit::Meters => value,
            LengthUnit::Miles => value * Self::METERS_PER_MILE,
            LengthUnit::Kilometers => value * 1000.0,
            LengthUnit::FeetTimesTen => value / (Self::FEET_PER_METER * 10.0),
            LengthUnit::MetersTimesTen => value / 10.0,
        })
    }

    fn from_base(self, value: f64) -> Result<f64, UnitError> {
        Ok(match self {
            LengthUnit::Feet => value * Self::FEET_PER_METER,
            LengthUnit::Meters => value,
            LengthUnit::Miles => value / Self::METERS_PER_MILE,
            LengthUnit::Kilometers => value / 1000.0,
            LengthUnit::FeetTimesTen => value * Self::FEET_PER_METER * 10.0,
            LengthUnit::MetersTimesTen => value * 10.0,
        })
    }
}

impl FromStr for LengthUnit {
    type Err = UnitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LengthUnit::ALL
            .into_iter()
            .find(|u| u.symbol() == s)
            .ok_or_else(|| unknown(Self::FAMILY, s))
    }
}

impl fmt::Display for LengthUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

// ============================================================================
// VELOCITY
// ============================================================================

/// Velocity units (base: meters per second).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VelocityUnit {
    MetersPerSecond,
    MilesPerHour,
    KilometersPerHour,
}

impl VelocityUnit {
    pub const ALL: [VelocityUnit; 3] = [
        VelocityUnit::MetersPerSecond,
        VelocityUnit::MilesPerHour,
        VelocityUnit::KilometersPerHour,
    ];

    const MPS_PER_MPH: f64 = 0.44704;
    const MPS_PER_KPH: f64 = 0.27778;

    pub fn symbol(&self) -> &'static str {
        match self {
            VelocityUnit::MetersPerSecond => "mps",
            VelocityUnit::MilesPerHour => "mph",
            VelocityUnit::KilometersPerHour => "kph",
        }
    }
}

impl UnitFamily for VelocityUnit {
    const FAMILY: &'static str = "velocity";

    fn to_base(self, value: f64) -> Result<f64, UnitError> {
        Ok(match self {
            VelocityUnit::MetersPerSecond => value,
            VelocityUnit::MilesPerHour => value * Self::MPS_PER_MPH,
            VelocityUnit::KilometersPerHour => value * Self::MPS_PER_KPH,
        })
    }

    fn from_base(self, value: f64) -> Result<f64, UnitError> {
        Ok(match self {
            VelocityUnit::MetersPerSecond => value,
            VelocityUnit::MilesPerHour => value / Self::MPS_PER_MPH,
            VelocityUnit::KilometersPerHour => value / Self::MPS_PER_KPH,
        })
    }
}

impl FromStr for VelocityUnit {
    type Err = UnitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VelocityUnit::ALL
            .into_iter()
            .find(|u| u.symbol() == s)
            .ok_or_else(|| unknown(Self::FAMILY, s))
    }
}

impl fmt::Display for VelocityUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

// ============================================================================
// TEMPERATURE
// ============================================================================

/// Temperature units (base: kelvin).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TemperatureUnit {
    Kelvin,
    Celsius,
    Rankine,
    Fahrenheit,
}

impl TemperatureUnit {
    pub const ALL: [TemperatureUnit; 4] = [
        TemperatureUnit::Kelvin,
        TemperatureUnit::Celsius,
        TemperatureUnit::Rankine,
        TemperatureUnit::Fahrenheit,
    ];

    /// 0°C = 273.15 K
    const CELSIUS_KELVIN_OFFSET: f64 = 273.15;
    /// 0°F = 459.67 °R
    const FAHRENHEIT_RANKINE_OFFSET: f64 = 459.67;

    pub fn symbol(&self) -> &'static str {
        match self {
            TemperatureUnit::Kelvin => "K",
            TemperatureUnit::Celsius => "C",
            TemperatureUnit::Rankine => "R",
            TemperatureUnit::Fahrenheit => "F",
        }
    }
}

impl UnitFamily for TemperatureUnit {
    const FAMILY: &'static str = "temperature";

    fn to_base(self, value: f64) -> Result<f64, UnitError> {
        Ok(match self {
            TemperatureUnit::Kelvin => value,
            TemperatureUnit::Celsius => value + Self::CELSIUS_KELVIN_OFFSET,
            TemperatureUnit::Rankine => value * 5.0 / 9.0,
            TemperatureUnit::Fahrenheit => (value + Self::FAHRENHEIT_RANKINE_OFFSET) * 5.0 / 9.0,
        })
    }

    fn from_base(self, value: f64) -> Result<f64, UnitError> {
        Ok(match self {
            TemperatureUnit::Kelvin => value,
            TemperatureUnit::Celsius => value - Self::CELSIUS_KELVIN_OFFSET,
            TemperatureUnit::Rankine => value * 9.0 / 5.0,
            TemperatureUnit::Fahrenheit => value * 9.0 / 5.0 - Self::FAHRENHEIT_RANKINE_OFFSET,
        })
    }
}

impl FromStr for TemperatureUnit {
    type Err = UnitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TemperatureUnit::ALL
            .into_iter()
            .find(|u| u.symbol() == s)
            .ok_or_else(|| unknown(Self::FAMILY, s))
    }
}

impl fmt::Display for TemperatureUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

// ============================================================================
// COVER
// ============================================================================

/// Cloud/canopy cover units (base: fraction in `[0, 1]`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CoverUnit {
    Fraction,
    Percent,
    /// Lossy four-bucket canopy density scale, see module docs.
    CanopyCategories,
}

impl CoverUnit {
    pub const ALL: [CoverUnit; 3] = [
        CoverUnit::Fraction,
        CoverUnit::Percent,
        CoverUnit::CanopyCategories,
    ];

    pub fn symbol(&self) -> &'static str {
        match self {
            CoverUnit::Fraction => "fraction",
            CoverUnit::Percent => "percent",
            CoverUnit::CanopyCategories => "canopy_categories",
        }
    }

    /// Whether `from_base(to_base(v))` recovers `v`.
    pub fn is_invertible(&self) -> bool {
        !matches!(self, CoverUnit::CanopyCategories)
    }

    fn category_to_fraction(category: f64) -> Result<f64, UnitError> {
        // Categories are stored as floats in rasters; compare on the exact code.
        match category {
            c if c == 1.0 => Ok(0.10),
            c if c == 2.0 => Ok(0.35),
            c if c == 3.0 => Ok(0.65),
            c if c == 4.0 => Ok(0.90),
            c if c == 0.0 || c == 99.0 => Ok(0.0),
            value => Err(UnitError::OutOfRange {
                unit: "fraction",
                value,
            }),
        }
    }

    fn fraction_to_category(fraction: f64) -> Result<f64, UnitError> {
        match fraction {
            f if f <= 0.0 => Ok(0.0),
            f if f <= 0.20 => Ok(1.0),
            f if f <= 0.50 => Ok(2.0),
            f if f <= 0.80 => Ok(3.0),
            f if f <= 1.0 => Ok(4.0),
            value => Err(UnitError::OutOfRange {
                unit: "canopy_categories",
                value,
            }),
        }
    }
}

impl UnitFamily for CoverUnit {
    const FAMILY: &'static str = "cover";

    fn to_base(self, value: f64) -> Result<f64, UnitError> {
        match self {
            CoverUnit::Fraction => Ok(value),
            CoverUnit::Percent => Ok(value / 100.0),
            CoverUnit::CanopyCategories => Self::category_to_fraction(value),
        }
    }

    fn from_base(self, value: f64) -> Result<f64, UnitError> {
        match self {
            CoverUnit::Fraction => Ok(value),
            CoverUnit::Percent => Ok(value * 100.0),
            CoverUnit::CanopyCategories => Self::fraction_to_category(value),
        }
    }
}

impl FromStr for CoverUnit {
    type Err = UnitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CoverUnit::ALL
            .into_iter()
            .find(|u| u.symbol() == s)
            .ok_or_else(|| unknown(Self::FAMILY, s))
    }
}

impl fmt::Display for CoverUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn assert_round_trip<U: UnitFamily>(units: &[U], rng: &mut StdRng) {
        for _ in 0..200 {
            let v: f64 = rng.random_range(-1.0e4..1.0e4);
            for unit in units {
                let back = unit.from_base(unit.to_base(v).unwrap()).unwrap();
                assert_relative_eq!(back, v, epsilon = 1e-9, max_relative = 1e-12);
            }
        }
    }

    #[test]
    fn test_round_trip_all_invertible_units() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        assert_round_trip(&LengthUnit::ALL, &mut rng);
        assert_round_trip(&VelocityUnit::ALL, &mut rng);
        assert_round_trip(&TemperatureUnit::ALL, &mut rng);
        assert_round_trip(&[CoverUnit::Fraction, CoverUnit::Percent], &mut rng);
    }

    #[test]
    fn test_known_conversions() {
        assert_relative_eq!(LengthUnit::Feet.to_base(3.28084).unwrap(), 1.0, epsilon = 1e-9);
        assert_relative_eq!(LengthUnit::Miles.to_base(1.0).unwrap(), 1609.344, epsilon = 1e-9);
        assert_relative_eq!(LengthUnit::FeetTimesTen.to_base(32.8084).unwrap(), 1.0, epsilon = 1e-9);
        assert_relative_eq!(LengthUnit::MetersTimesTen.to_base(15.0).unwrap(), 1.5, epsilon = 1e-9);
        assert_relative_eq!(VelocityUnit::KilometersPerHour.to_base(36.0).unwrap(), 10.00008, epsilon = 1e-9);
        assert_relative_eq!(TemperatureUnit::Celsius.to_base(25.0).unwrap(), 298.15, epsilon = 1e-9);
        assert_relative_eq!(
            TemperatureUnit::Fahrenheit.to_base(32.0).unwrap(),
            273.15,
            epsilon = 1e-9
        );
        assert_relative_eq!(TemperatureUnit::Rankine.to_base(9.0).unwrap(), 5.0, epsilon = 1e-9);
        assert_relative_eq!(CoverUnit::Percent.to_base(40.0).unwrap(), 0.4, epsilon = 1e-9);
    }

    #[test]
    fn test_symbols_parse_and_print() {
        for unit in LengthUnit::ALL {
            assert_eq!(unit.to_string().parse::<LengthUnit>().unwrap(), unit);
        }
        for unit in CoverUnit::ALL {
            assert_eq!(unit.to_string().parse::<CoverUnit>().unwrap(), unit);
        }
        assert_relative_eq!(to_base::<VelocityUnit>(10.0, "mph").unwrap(), 4.4704, epsilon = 1e-9);
        assert_relative_eq!(from_base::<TemperatureUnit>(273.15, "C").unwrap(), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_unknown_symbol_is_error() {
        let err = "knots".parse::<VelocityUnit>().unwrap_err();
        assert_eq!(
            err,
            UnitError::UnknownSymbol {
                family: "velocity",
                symbol: "knots".to_string()
            }
        );
        assert!(to_base::<LengthUnit>(1.0, "M").is_err());
        assert!(to_base::<TemperatureUnit>(1.0, "kelvin").is_err());
    }

    #[test]
    fn test_canopy_category_table() {
        let c = CoverUnit::CanopyCategories;
        assert_eq!(c.to_base(1.0).unwrap(), 0.10);
        assert_eq!(c.to_base(2.0).unwrap(), 0.35);
        assert_eq!(c.to_base(3.0).unwrap(), 0.65);
        assert_eq!(c.to_base(4.0).unwrap(), 0.90);
        assert_eq!(c.to_base(0.0).unwrap(), 0.0);
        assert_eq!(c.to_base(99.0).unwrap(), 0.0);
        assert!(c.to_base(5.0).is_err());
        assert!(c.to_base(2.5).is_err());

        assert_eq!(c.from_base(-0.1).unwrap(), 0.0);
        assert_eq!(c.from_base(0.20).unwrap(), 1.0);
        assert_eq!(c.from_base(0.21).unwrap(), 2.0);
        assert_eq!(c.from_base(0.80).unwrap(), 3.0);
        assert_eq!(c.from_base(1.0).unwrap(), 4.0);
        assert!(c.from_base(1.01).is_err());
    }

    #[test]
    fn test_canopy_categories_idempotent_not_invertible() {
        let c = CoverUnit::CanopyCategories;
        assert!(!c.is_invertible());
        for fraction in [0.0, 0.05, 0.2, 0.42, 0.5, 0.77, 0.93, 1.0] {
            let once = c.to_base(c.from_base(fraction).unwrap()).unwrap();
            let twice = c.to_base(c.from_base(once).unwrap()).unwrap();
            assert_eq!(once, twice);
        }
        let recovered = c.to_base(c.from_base(0.42).unwrap()).unwrap();
        assert_eq!(recovered, 0.35);
        assert_ne!(recovered, 0.42);
    }

    #[test]
    fn test_raster_conversion_skips_no_data() {
        let mut r = Raster::new(2, 1, 0.0, 0.0, 1.0, 10.0);
        let no_data = r.no_data();
        r.set(0, 1, no_data);
        VelocityUnit::MilesPerHour.raster_to_base(&mut r).unwrap();
        assert_relative_eq!(r.get(0, 0), 4.4704, epsilon = 1e-9);
        assert_eq!(r.get(0, 1), no_data);

        let mut cats = Raster::new(1, 1, 0.0, 0.0, 1.0, 7.0);
        assert!(CoverUnit::CanopyCategories.raster_to_base(&mut cats).is_err());
    }
}
