//! Point weather observations.
//!
//! A [`Station`] is one measurement site. It carries either a single undated
//! observation (the legacy one-line format) or a time series of dated samples; the
//! run works on one time step at a time, selected with [`Station::select_step`].
//!
//! All values are in base units: meters, m/s, degrees (from, clockwise from north),
//! kelvin and cover fraction.

use crate::core_types::polar::{wind_sd_to_uv, wind_uv_to_sd};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{RunError, RunResult};

/// One observation at a station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationSample {
    /// Observation time; `None` for legacy undated records.
    pub time: Option<DateTime<Utc>>,
    /// Horizontal wind speed (m/s).
    pub speed: f64,
    /// Direction the wind blows from (degrees).
    pub direction: f64,
    /// Vertical wind speed (m/s).
    pub w_speed: f64,
    /// Air temperature (K).
    pub temperature: f64,
    /// Cloud cover fraction in `[0, 1]`.
    pub cloud_cover: f64,
    /// Radius of influence (m). Negative means infinite.
    pub influence_radius: f64,
}

impl StationSample {
    pub fn new(speed: f64, direction: f64) -> Self {
        Self {
            time: None,
            speed,
            direction,
            w_speed: 0.0,
            temperature: 288.15,
            cloud_cover: 0.0,
            influence_radius: -1.0,
        }
    }

    pub fn at(mut self, time: DateTime<Utc>) -> Self {
        self.time = Some(time);
        self
    }

    pub fn with_temperature(mut self, kelvin: f64) -> Self {
        self.temperature = kelvin;
        self
    }

    pub fn with_cloud_cover(mut self, fraction: f64) -> Self {
        self.cloud_cover = fraction;
        self
    }

    pub fn with_influence_radius(mut self, meters: f64) -> Self {
        self.influence_radius = meters;
        self
    }

    pub fn with_w_speed(mut self, w: f64) -> Self {
        self.w_speed = w;
        self
    }
}

/// Which on-disk layout a station's samples came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StationFormat {
    /// Single undated observation.
    Legacy,
    /// Dated samples, one per time step.
    TimeSeries,
}

/// A weather station and its observations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub name: String,
    /// Geographic position (degrees), informational.
    pub latitude: f64,
    pub longitude: f64,
    /// Projected position in the terrain's coordinate system (m).
    pub x: f64,
    pub y: f64,
    /// Sensor height above the vegetation top (m).
    pub height: f64,
    format: StationFormat,
    samples: Vec<StationSample>,
    step: usize,
}

impl Station {
    /// Station with a single undated observation.
    pub fn legacy(name: impl Into<String>, x: f64, y: f64, height: f64, sample: StationSample) -> Self {
        Self {
            name: name.into(),
            latitude: 0.0,
            longitude: 0.0,
            x,
            y,
            height,
            format: StationFormat::Legacy,
            samples: vec![StationSample { time: None, ..sample }],
            step: 0,
        }
    }

    /// Station with dated observations.
    ///
    /// Every sample must carry a time and the times must be strictly increasing.
    pub fn time_series(
        name: impl Into<String>,
        x: f64,
        y: f64,
        height: f64,
        samples: Vec<StationSample>,
    ) -> RunResult<Self> {
        let name = name.into();
        if samples.is_empty() {
            return Err(RunError::Configuration(format!(
                "station '{name}' has no observations"
            )));
        }
        let mut last: Option<DateTime<Utc>> = None;
        for sample in &samples {
            let Some(t) = sample.time else {
                return Err(RunError::Configuration(format!(
                    "station '{name}' mixes dated and undated observations"
                )));
            };
            if last.is_some_and(|prev| t <= prev) {
                return Err(RunError::Configuration(format!(
                    "station '{name}' observations are not in increasing time order"
                )));
            }
            last = Some(t);
        }
        Ok(Self {
            name,
            latitude: 0.0,
            longitude: 0.0,
            x,
            y,
            height,
            format: StationFormat::TimeSeries,
            samples,
            step: 0,
        })
    }

    pub fn with_geographic(mut self, latitude: f64, longitude: f64) -> Self {
        self.latitude = latitude;
        self.longitude = longitude;
        self
    }

    pub fn format(&self) -> StationFormat {
        self.format
    }

    pub fn samples(&self) -> &[StationSample] {
        &self.samples
    }

    pub fn step(&self) -> usize {
        self.step
    }

    /// Observation times, empty for legacy stations.
    pub fn times(&self) -> Vec<DateTime<Utc>> {
        self.samples.iter().filter_map(|s| s.time).collect()
    }

    /// Make `step` the current sample. Legacy stations accept only step 0.
    pub fn select_step(&mut self, step: usize) -> RunResult<()> {
        if step >= self.samples.len() {
            return Err(RunError::Configuration(format!(
                "station '{}' has {} observation(s), time step {} requested",
                self.name,
                self.samples.len(),
                step
            )));
        }
        self.step = step;
        Ok(())
    }

    /// Current sample.
    #[inline]
    pub fn current(&self) -> &StationSample {
        &self.samples[self.step]
    }

    #[inline]
    fn current_mut(&mut self) -> &mut StationSample {
        &mut self.samples[self.step]
    }

    pub fn speed(&self) -> f64 {
        self.current().speed
    }

    pub fn direction(&self) -> f64 {
        self.current().direction
    }

    pub fn w_speed(&self) -> f64 {
        self.current().w_speed
    }

    pub fn temperature(&self) -> f64 {
        self.current().temperature
    }

    pub fn cloud_cover(&self) -> f64 {
        self.current().cloud_cover
    }

    pub fn influence_radius(&self) -> f64 {
        self.current().influence_radius
    }

    pub fn has_infinite_influence(&self) -> bool {
        self.influence_radius() < 0.0
    }

    pub fn update_speed(&mut self, speed: f64) {
        self.current_mut().speed = speed;
    }

    pub fn update_direction(&mut self, direction: f64) {
        self.current_mut().direction = direction;
    }

    /// Current observation as `(u, v)`.
    pub fn uv(&self) -> RunResult<(f64, f64)> {
        wind_sd_to_uv(self.speed(), self.direction())
    }

    /// Overwrite the current speed/direction from `(u, v)`.
    pub fn set_uv(&mut self, u: f64, v: f64) {
        let (speed, direction) = wind_uv_to_sd(u, v);
        let sample = self.current_mut();
        sample.speed = speed;
        sample.direction = direction;
    }

    /// Physical sanity checks on the current sample.
    pub fn validate(&self) -> RunResult<()> {
        let s = self.current();
        let bad = |what: &str, value: f64| {
            Err(RunError::Configuration(format!(
                "station '{}': invalid {what} {value}",
                self.name
            )))
        };
        if !self.height.is_finite() || self.height <= 0.0 {
            return bad("height", self.height);
        }
        if !s.speed.is_finite() || s.speed < 0.0 {
            return bad("speed", s.speed);
        }
        if !(0.0..=360.0).contains(&s.direction) {
            return bad("direction", s.direction);
        }
        if !s.temperature.is_finite() || s.temperature <= 0.0 {
            return bad("temperature", s.temperature);
        }
        if !(0.0..=1.0).contains(&s.cloud_cover) {
            return bad("cloud cover", s.cloud_cover);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::TimeZone;

    fn t(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_legacy_station_has_single_step() {
        let mut st = Station::legacy("A", 10.0, 20.0, 6.1, StationSample::new(4.0, 225.0).at(t(3)));
        assert_eq!(st.format(), StationFormat::Legacy);
        assert!(st.times().is_empty());
        assert!(st.select_step(0).is_ok());
        assert!(st.select_step(1).is_err());
    }

    #[test]
    fn test_time_series_selection() {
        let samples = vec![
            StationSample::new(2.0, 90.0).at(t(1)),
            StationSample::new(6.0, 180.0).at(t(2)),
        ];
        let mut st = Station::time_series("B", 0.0, 0.0, 10.0, samples).unwrap();
        assert_eq!(st.times(), vec![t(1), t(2)]);
        st.select_step(1).unwrap();
        assert_eq!(st.speed(), 6.0);
        st.update_speed(7.0);
        assert_eq!(st.samples()[1].speed, 7.0);
        assert_eq!(st.samples()[0].speed, 2.0);
    }

    #[test]
    fn test_time_series_rejects_bad_order() {
        let samples = vec![
            StationSample::new(2.0, 90.0).at(t(2)),
            StationSample::new(6.0, 180.0).at(t(1)),
        ];
        assert!(Station::time_series("C", 0.0, 0.0, 10.0, samples).is_err());
        let undated = vec![StationSample::new(2.0, 90.0)];
        assert!(Station::time_series("D", 0.0, 0.0, 10.0, undated).is_err());
    }

    #[test]
    fn test_uv_round_trip_through_station() {
        let mut st = Station::legacy("E", 0.0, 0.0, 10.0, StationSample::new(5.0, 270.0));
        let (u, v) = st.uv().unwrap();
        assert_eq!((u, v), (5.0, 0.0));
        st.set_uv(0.0, -3.0);
        assert_relative_eq!(st.speed(), 3.0);
        assert_relative_eq!(st.direction(), 0.0);
    }

    #[test]
    fn test_validate() {
        let ok = Station::legacy("F", 0.0, 0.0, 10.0, StationSample::new(5.0, 270.0));
        assert!(ok.validate().is_ok());
        let bad = Station::legacy("G", 0.0, 0.0, 10.0, StationSample::new(-1.0, 270.0));
        assert!(bad.validate().is_err());
        let cloudy = Station::legacy(
            "H",
            0.0,
            0.0,
            10.0,
            StationSample::new(1.0, 10.0).with_cloud_cover(1.5),
        );
        assert!(cloudy.validate().is_err());
    }
}
