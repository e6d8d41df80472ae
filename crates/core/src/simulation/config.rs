//! Run configuration
//!
//! A [`RunConfiguration`] is built once before a run and read throughout it. All
//! consistency checks live in [`RunConfiguration::validate`], which the run calls
//! before any mesh or solver work.

use crate::core_types::raster::Raster;
use crate::core_types::station::Station;
use crate::core_types::units::{UnitFamily, VelocityUnit};
use crate::error::{RunError, RunResult};
use crate::grid::{MeshSpec, SurfaceSpec, TerrainData};
use crate::physics::wind_profile::ProfileShape;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Environment variable overriding the matching relaxation factor.
pub const ENV_MATCH_RELAXATION: &str = "WINDFIELD_POINT_MATCH_OUT_RELAX";
/// Environment variable overriding the matching iteration budget.
pub const ENV_MATCH_MAX_ITERATIONS: &str = "WINDFIELD_POINT_MAX_MATCH_ITERS";

/// Uniform wind applied over the whole domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainAverageInput {
    /// Speed (m/s)
    pub speed: f64,
    /// Direction the wind blows from (degrees)
    pub direction: f64,
    /// Height of the input wind above the vegetation (m)
    pub input_height: f64,
    /// Cloud cover fraction
    pub cloud_cover: f64,
    /// Air temperature (K)
    pub temperature: f64,
}

impl Default for DomainAverageInput {
    fn default() -> Self {
        Self {
            speed: 5.0,
            direction: 270.0,
            input_height: 10.0,
            cloud_cover: 0.0,
            temperature: 288.15,
        }
    }
}

/// Outer station-matching loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchingSettings {
    /// Maximum allowed |Δu| and |Δv| at every station (m/s)
    pub tolerance: f64,
    /// Damping applied to each input correction
    pub relaxation: f64,
    /// Outer iteration budget
    pub max_iterations: usize,
}

impl Default for MatchingSettings {
    fn default() -> Self {
        Self {
            // Half of 1 mph
            tolerance: 0.22,
            relaxation: 1.0,
            max_iterations: 150,
        }
    }
}

impl MatchingSettings {
    /// Apply [`ENV_MATCH_RELAXATION`] and [`ENV_MATCH_MAX_ITERATIONS`] when set.
    pub fn with_env_overrides(self) -> RunResult<Self> {
        self.with_overrides(
            std::env::var(ENV_MATCH_RELAXATION).ok().as_deref(),
            std::env::var(ENV_MATCH_MAX_ITERATIONS).ok().as_deref(),
        )
    }

    fn with_overrides(mut self, relaxation: Option<&str>, max_iterations: Option<&str>) -> RunResult<Self> {
        if let Some(raw) = relaxation {
            self.relaxation = raw.trim().parse().map_err(|_| {
                RunError::Configuration(format!("{ENV_MATCH_RELAXATION}='{raw}' is not a number"))
            })?;
        }
        if let Some(raw) = max_iterations {
            self.max_iterations = raw.trim().parse().map_err(|_| {
                RunError::Configuration(format!(
                    "{ENV_MATCH_MAX_ITERATIONS}='{raw}' is not a whole number"
                ))
            })?;
        }
        Ok(self)
    }

    pub fn validate(&self) -> RunResult<()> {
        if self.tolerance.is_nan() || self.tolerance <= 0.0 {
            return Err(RunError::Configuration(format!(
                "matching tolerance must be positive, got {}",
                self.tolerance
            )));
        }
        if self.relaxation.is_nan() || self.relaxation <= 0.0 {
            return Err(RunError::Configuration(format!(
                "matching relaxation must be positive, got {}",
                self.relaxation
            )));
        }
        if self.max_iterations == 0 {
            return Err(RunError::Configuration(
                "matching needs at least one iteration".to_string(),
            ));
        }
        Ok(())
    }
}

/// Station-based initialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointInput {
    pub stations: Vec<Station>,
    /// Outer matching loop; `None` initializes once without matching
    pub matching: Option<MatchingSettings>,
    /// Index into the stations' observation series
    pub time_step: usize,
}

/// One time step of gridded weather-model output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherModelStep {
    pub time: DateTime<Utc>,
    /// Speed (m/s)
    pub speed: Raster,
    /// Direction the wind blows from (degrees)
    pub direction: Raster,
    /// Cloud cover fraction; clear sky when absent
    pub cloud_cover: Option<Raster>,
    /// Air temperature (K)
    pub temperature: Option<Raster>,
}

/// Weather-model initialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherModelInput {
    pub steps: Vec<WeatherModelStep>,
    /// Height of the model wind above the vegetation (m)
    pub input_height: f64,
    pub time_step: usize,
}

/// How the initial flow field is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InitializationMode {
    DomainAverage(DomainAverageInput),
    PointMatching(PointInput),
    WeatherModel(WeatherModelInput),
}

impl Default for InitializationMode {
    fn default() -> Self {
        InitializationMode::DomainAverage(DomainAverageInput::default())
    }
}

impl InitializationMode {
    pub fn name(&self) -> &'static str {
        match self {
            InitializationMode::DomainAverage(_) => "domain average",
            InitializationMode::PointMatching(_) => "point",
            InitializationMode::WeatherModel(_) => "weather model",
        }
    }

    /// Matching settings when this run uses the outer station-matching loop.
    pub fn matching(&self) -> Option<&MatchingSettings> {
        match self {
            InitializationMode::PointMatching(input) => input.matching.as_ref(),
            _ => None,
        }
    }

    /// Stations the run takes observations from; empty for gridded inputs.
    pub fn stations(&self) -> &[Station] {
        match self {
            InitializationMode::PointMatching(input) => &input.stations,
            _ => &[],
        }
    }

    /// Number of time steps the inputs describe.
    pub fn time_step_count(&self) -> usize {
        match self {
            InitializationMode::DomainAverage(_) => 1,
            InitializationMode::PointMatching(input) => input
                .stations
                .iter()
                .map(|s| s.samples().len())
                .min()
                .unwrap_or(0),
            InitializationMode::WeatherModel(input) => input.steps.len(),
        }
    }

    /// Select the time step the next run uses.
    pub fn set_time_step(&mut self, step: usize) {
        match self {
            InitializationMode::DomainAverage(_) => {}
            InitializationMode::PointMatching(input) => input.time_step = step,
            InitializationMode::WeatherModel(input) => input.time_step = step,
        }
    }

    /// Timestamp of the selected step, when the inputs are dated.
    pub fn current_time(&self) -> Option<DateTime<Utc>> {
        match self {
            InitializationMode::DomainAverage(_) => None,
            InitializationMode::PointMatching(input) => input
                .stations
                .first()
                .and_then(|s| s.samples().get(input.time_step))
                .and_then(|s| s.time),
            InitializationMode::WeatherModel(input) => {
                input.steps.get(input.time_step).map(|s| s.time)
            }
        }
    }

    fn validate(&self) -> RunResult<()> {
        match self {
            InitializationMode::DomainAverage(input) => {
                if input.speed.is_nan() || input.speed < 0.0 {
                    return Err(RunError::Configuration(format!(
                        "domain-average speed must be non-negative, got {}",
                        input.speed
                    )));
                }
                if !(0.0..=360.0).contains(&input.direction) {
                    return Err(RunError::Configuration(format!(
                        "domain-average direction must be in [0, 360], got {}",
                        input.direction
                    )));
                }
                check_input_height(input.input_height)?;
                if !(0.0..=1.0).contains(&input.cloud_cover) {
                    return Err(RunError::Configuration(format!(
                        "cloud cover must be a fraction, got {}",
                        input.cloud_cover
                    )));
                }
            }
            InitializationMode::PointMatching(input) => {
                if input.stations.is_empty() {
                    return Err(RunError::Configuration(
                        "point initialization needs at least one weather station".to_string(),
                    ));
                }
                for station in &input.stations {
                    let mut selected = station.clone();
                    selected.select_step(input.time_step)?;
                    selected.validate()?;
                }
                if let Some(matching) = &input.matching {
                    matching.validate()?;
                }
            }
            InitializationMode::WeatherModel(input) => {
                let step = input.steps.get(input.time_step).ok_or_else(|| {
                    RunError::Configuration(format!(
                        "weather model has {} time step(s), step {} requested",
                        input.steps.len(),
                        input.time_step
                    ))
                })?;
                check_input_height(input.input_height)?;
                let same_grid = |r: &Raster| {
                    r.ncols() == step.speed.ncols()
                        && r.nrows() == step.speed.nrows()
                        && r.cell_size() == step.speed.cell_size()
                };
                let extra_ok = step.cloud_cover.as_ref().is_none_or(same_grid)
                    && step.temperature.as_ref().is_none_or(same_grid);
                if !same_grid(&step.direction) || !extra_ok {
                    return Err(RunError::Configuration(
                        "weather model grids for one time step must share a header".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }
}

fn check_input_height(height: f64) -> RunResult<()> {
    if height.is_nan() || height <= 0.0 {
        return Err(RunError::Configuration(format!(
            "input wind height must be positive, got {height}"
        )));
    }
    Ok(())
}

/// Equation engine tolerances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverSettings {
    /// Relative update size at which the iteration stops
    pub tolerance: f64,
    /// Iteration budget of the primary method (the alternate gets twice this)
    pub max_iterations: usize,
    /// Over-relaxation factor of the primary method, in (0, 2)
    pub sor_omega: f64,
    /// Vertical-to-horizontal adjustment weighting (σ)
    pub sigma: f64,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            tolerance: 1e-4,
            max_iterations: 2000,
            sor_omega: 1.7,
            sigma: 1.0,
        }
    }
}

/// A location where the output wind is also reported as a point value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputPoint {
    pub name: String,
    pub x: f64,
    pub y: f64,
    /// Height above the vegetation (m)
    pub height: f64,
}

/// What the output stage produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSettings {
    /// Output height above the vegetation (m)
    pub height: f64,
    pub speed_units: VelocityUnit,
    /// Output cell size (m); the mesh resolution when `None`
    pub resolution: Option<f64>,
    /// Percentage of the extent trimmed from each side, `[0, 50)`
    pub buffer_clipping: f64,
    pub points: Vec<OutputPoint>,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            height: 10.0,
            speed_units: VelocityUnit::MetersPerSecond,
            resolution: None,
            buffer_clipping: 0.0,
            points: Vec::new(),
        }
    }
}

/// Immutable-per-run settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfiguration {
    pub terrain: TerrainData,
    pub surface: SurfaceSpec,
    pub mesh: MeshSpec,
    pub mode: InitializationMode,
    /// Domain latitude (degrees) for the Coriolis parameter
    pub latitude: f64,
    /// Uniform Obukhov length (m); 0 is neutral
    pub obukhov_length: f64,
    pub profile_shape: ProfileShape,
    /// Diurnal slope flows (not available in this crate)
    pub diurnal_winds: bool,
    pub output: OutputSettings,
    pub solver: SolverSettings,
    /// Worker threads; 0 lets the pool pick
    pub num_threads: usize,
    pub friction_velocity: bool,
    pub dust: bool,
    /// Erodible cells for dust emission (non-zero = source); all cells when absent
    pub dust_source: Option<Raster>,
}

impl Default for RunConfiguration {
    fn default() -> Self {
        Self {
            terrain: TerrainData::flat(10, 10, 100.0, 0.0),
            surface: SurfaceSpec::default(),
            mesh: MeshSpec::default(),
            mode: InitializationMode::default(),
            latitude: 45.0,
            obukhov_length: 0.0,
            profile_shape: ProfileShape::MoninObukhov,
            diurnal_winds: false,
            output: OutputSettings::default(),
            solver: SolverSettings::default(),
            num_threads: 0,
            friction_velocity: false,
            dust: false,
            dust_source: None,
        }
    }
}

impl RunConfiguration {
    /// Set the output speed units from a symbol such as `"mph"`.
    pub fn set_output_speed_units(&mut self, symbol: &str) -> RunResult<()> {
        self.output.speed_units = symbol.parse::<VelocityUnit>()?;
        Ok(())
    }

    /// Check every setting before any expensive work.
    pub fn validate(&self) -> RunResult<()> {
        if self.diurnal_winds {
            return Err(RunError::Configuration(
                "diurnal slope flows require solar and shading inputs that this crate does not model"
                    .to_string(),
            ));
        }
        self.mesh.validate()?;
        self.mode.validate()?;
        if self.output.height.is_nan() || self.output.height <= 0.0 {
            return Err(RunError::Configuration(format!(
                "output height must be positive, got {}",
                self.output.height
            )));
        }
        if !(0.0..50.0).contains(&self.output.buffer_clipping) {
            return Err(RunError::Configuration(format!(
                "output buffer clipping must be in [0, 50) percent, got {}",
                self.output.buffer_clipping
            )));
        }
        if let Some(res) = self.output.resolution {
            if res.is_nan() || res <= 0.0 {
                return Err(RunError::Configuration(format!(
                    "output resolution must be positive, got {res}"
                )));
            }
        }
        // Units are typed here but may still be rejected by the converter
        self.output.speed_units.from_base(0.0)?;
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err(RunError::Configuration(format!(
                "latitude must be in [-90, 90], got {}",
                self.latitude
            )));
        }
        if self.solver.tolerance.is_nan() || self.solver.tolerance <= 0.0 || self.solver.max_iterations == 0 {
            return Err(RunError::Configuration(
                "solver tolerance and iteration budget must be positive".to_string(),
            ));
        }
        if !(self.solver.sor_omega > 0.0 && self.solver.sor_omega < 2.0) {
            return Err(RunError::Configuration(format!(
                "over-relaxation factor must be in (0, 2), got {}",
                self.solver.sor_omega
            )));
        }
        if self.dust && !self.friction_velocity {
            return Err(RunError::Configuration(
                "dust emission needs friction velocity output enabled".to_string(),
            ));
        }
        if self.dust_source.is_some() && !self.dust {
            return Err(RunError::Configuration(
                "a dust source grid was given but dust output is disabled".to_string(),
            ));
        }
        if let Some(source) = &self.dust_source {
            let dem = self.terrain.dem();
            let slack = 0.5 * source.cell_size();
            let covers = source.xll() <= dem.xll() + slack
                && source.yll() <= dem.yll() + slack
                && source.xll() + source.x_extent() >= dem.xll() + dem.x_extent() - slack
                && source.yll() + source.y_extent() >= dem.yll() + dem.y_extent() - slack;
            if !covers {
                return Err(RunError::Configuration(format!(
                    "dust source grid ({:.1}, {:.1}) + {:.1} x {:.1} m does not cover the terrain",
                    source.xll(),
                    source.yll(),
                    source.x_extent(),
                    source.y_extent()
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::station::StationSample;

    #[test]
    fn test_default_is_valid() {
        assert!(RunConfiguration::default().validate().is_ok());
    }

    #[test]
    fn test_diurnal_rejected() {
        let config = RunConfiguration {
            diurnal_winds: true,
            ..RunConfiguration::default()
        };
        assert!(matches!(config.validate(), Err(RunError::Configuration(_))));
    }

    #[test]
    fn test_output_units_from_symbol() {
        let mut config = RunConfiguration::default();
        config.set_output_speed_units("kph").unwrap();
        assert_eq!(config.output.speed_units, VelocityUnit::KilometersPerHour);
        let err = config.set_output_speed_units("furlongs/fortnight").unwrap_err();
        assert!(matches!(err, RunError::UnrecognizedUnit(_)));
    }

    #[test]
    fn test_point_mode_checks_stations() {
        let mut config = RunConfiguration {
            mode: InitializationMode::PointMatching(PointInput {
                stations: Vec::new(),
                matching: Some(MatchingSettings::default()),
                time_step: 0,
            }),
            ..RunConfiguration::default()
        };
        assert!(config.validate().is_err());

        let station = Station::legacy("A", 500.0, 500.0, 10.0, StationSample::new(4.0, 200.0));
        config.mode = InitializationMode::PointMatching(PointInput {
            stations: vec![station],
            matching: Some(MatchingSettings::default()),
            time_step: 1,
        });
        assert!(config.validate().is_err());
        config.mode.set_time_step(0);
        assert!(config.validate().is_ok());
        assert_eq!(config.mode.time_step_count(), 1);
    }

    #[test]
    fn test_matching_overrides() {
        let s = MatchingSettings::default()
            .with_overrides(Some("0.5"), Some(" 12 "))
            .unwrap();
        assert_eq!(s.relaxation, 0.5);
        assert_eq!(s.max_iterations, 12);
        assert!(MatchingSettings::default()
            .with_overrides(None, Some("lots"))
            .is_err());
        let untouched = MatchingSettings::default().with_overrides(None, None).unwrap();
        assert_eq!(untouched, MatchingSettings::default());
    }

    #[test]
    fn test_dust_requires_friction_velocity() {
        let config = RunConfiguration {
            dust: true,
            ..RunConfiguration::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_matching_defaults() {
        let settings = MatchingSettings::default();
        assert_eq!(settings.max_iterations, 150);
        assert_eq!(settings.tolerance, 0.22);
        assert_eq!(settings.relaxation, 1.0);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_dust_source_must_cover_terrain() {
        let mut config = RunConfiguration {
            friction_velocity: true,
            dust: true,
            ..RunConfiguration::default()
        };
        // Default terrain spans 1 km at 100 m cells; a coarser grid over the same area is fine
        config.dust_source = Some(Raster::new(4, 4, 0.0, 0.0, 250.0, 1.0));
        assert!(config.validate().is_ok());

        config.dust_source = Some(Raster::new(2, 2, 0.0, 0.0, 250.0, 1.0));
        assert!(matches!(config.validate(), Err(RunError::Configuration(_))));
    }
}
