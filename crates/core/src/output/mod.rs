//! Output assembly and dispatch
//!
//! After interpolation the surface wind is resampled to the output resolution,
//! clipped, converted to the output speed units and bundled into an [`OutputSet`].
//! Named [`OutputWriter`]s then run concurrently on the run's pool. Writers only read
//! the set; if any writer fails every file written during that dispatch is removed.

use crate::core_types::raster::{Raster, Resampling};
use crate::core_types::units::{UnitFamily, VelocityUnit};
use crate::error::{RunError, RunResult};
use crate::simulation::config::RunConfiguration;
use crate::simulation::interpolation::{PointWind, SurfaceWind};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rayon::prelude::*;
use std::io;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Process-wide guard for geospatial metadata libraries that are not re-entrant.
static GEOSPATIAL_LOCK: Mutex<()> = parking_lot::const_mutex(());

/// Run `f` while holding the process-wide geospatial lock.
///
/// Writers that identify or stamp files through a shared geospatial library call
/// this around each library call and nothing else.
pub fn with_geospatial_lock<R>(f: impl FnOnce() -> R) -> R {
    let _guard = GEOSPATIAL_LOCK.lock();
    f()
}

/// Header information shared by every output grid.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputMetadata {
    pub projection: String,
    pub cell_size: f64,
    pub speed_units: VelocityUnit,
    /// Output height above the vegetation (m)
    pub output_height: f64,
    pub time: Option<DateTime<Utc>>,
}

/// Finalized outputs of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSet {
    /// Horizontal speed in `metadata.speed_units`
    pub speed: Raster,
    /// Direction the wind blows from (degrees)
    pub direction: Raster,
    /// Cloud cover fraction
    pub cloud: Raster,
    /// East component in `metadata.speed_units`
    pub u: Raster,
    /// North component in `metadata.speed_units`
    pub v: Raster,
    /// Friction velocity (m/s)
    pub friction_velocity: Option<Raster>,
    /// PM10 flux
    pub dust: Option<Raster>,
    pub points: Vec<PointWind>,
    pub metadata: OutputMetadata,
}

/// Optional surface products produced before output assembly.
#[derive(Debug, Clone, Default)]
pub struct SurfaceProducts {
    pub friction_velocity: Option<Raster>,
    pub dust: Option<Raster>,
}

fn regrid(raster: Raster, cell_size: f64, clip: f64) -> RunResult<Raster> {
    let raster = if (raster.cell_size() - cell_size).abs() > f64::EPSILON * cell_size {
        raster.resample(cell_size, Resampling::Bilinear)?
    } else {
        raster
    };
    if clip > 0.0 {
        raster.clip_buffer(clip)
    } else {
        Ok(raster)
    }
}

impl OutputSet {
    /// Assemble the outputs from mesh-grid products.
    pub fn assemble(
        config: &RunConfiguration,
        wind: SurfaceWind,
        cloud: Raster,
        products: SurfaceProducts,
        points: Vec<PointWind>,
        time: Option<DateTime<Utc>>,
    ) -> RunResult<Self> {
        let settings = &config.output;
        let cell_size = settings.resolution.unwrap_or_else(|| wind.u.cell_size());
        let clip = settings.buffer_clipping;
        let units = settings.speed_units;

        // Components are regridded, then speed and direction recombined from them
        let wind = SurfaceWind::from_components(
            regrid(wind.u, cell_size, clip)?,
            regrid(wind.v, cell_size, clip)?,
            regrid(wind.w, cell_size, clip)?,
        );
        let SurfaceWind {
            mut u,
            mut v,
            mut speed,
            direction,
            ..
        } = wind;
        for grid in [&mut speed, &mut u, &mut v] {
            units.raster_from_base(grid)?;
        }

        let metadata = OutputMetadata {
            projection: speed.projection().to_string(),
            cell_size: speed.cell_size(),
            speed_units: units,
            output_height: settings.height,
            time,
        };
        debug!(
            "Output grids {}x{} at {:.2} m in {}",
            speed.ncols(),
            speed.nrows(),
            metadata.cell_size,
            units
        );

        let points = points
            .into_iter()
            .map(|p| -> RunResult<PointWind> {
                Ok(PointWind {
                    u: units.from_base(p.u)?,
                    v: units.from_base(p.v)?,
                    w: units.from_base(p.w)?,
                    speed: units.from_base(p.speed)?,
                    ..p
                })
            })
            .collect::<RunResult<_>>()?;

        Ok(Self {
            speed,
            direction,
            cloud: regrid(cloud, cell_size, clip)?,
            u,
            v,
            friction_velocity: products
                .friction_velocity
                .map(|r| regrid(r, cell_size, clip))
                .transpose()?,
            dust: products.dust.map(|r| regrid(r, cell_size, clip)).transpose()?,
            points,
            metadata,
        })
    }
}

/// An export collaborator.
pub trait OutputWriter: Send + Sync {
    /// Get the writer name for error reports
    fn name(&self) -> &str;

    /// Write the outputs; returns every path created.
    fn write(&self, outputs: &OutputSet) -> io::Result<Vec<PathBuf>>;
}

/// Run every writer concurrently on the current pool.
///
/// On failure all paths reported by the successful writers are removed and the first
/// failure (in writer order) is returned.
pub fn dispatch(writers: &[Box<dyn OutputWriter>], outputs: &OutputSet) -> RunResult<Vec<PathBuf>> {
    let results: Vec<(String, io::Result<Vec<PathBuf>>)> = writers
        .par_iter()
        .map(|w| (w.name().to_string(), w.write(outputs)))
        .collect();

    let mut written = Vec::new();
    let mut failure = None;
    for (name, result) in results {
        match result {
            Ok(paths) => written.extend(paths),
            Err(e) => {
                warn!("Output writer '{}' failed: {}", name, e);
                if failure.is_none() {
                    failure = Some(RunError::OutputWriter {
                        writer: name,
                        message: e.to_string(),
                    });
                }
            }
        }
    }

    match failure {
        None => Ok(written),
        Some(err) => {
            remove_outputs(&written);
            Err(err)
        }
    }
}

/// Delete output files, ignoring ones that are already gone.
pub fn remove_outputs(paths: &[PathBuf]) {
    for path in paths {
        match std::fs::remove_file(path) {
            Ok(()) => debug!("Removed output {}", path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Could not remove output {}: {}", path.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static UNIQUE: AtomicUsize = AtomicUsize::new(0);

    fn temp_path(stem: &str) -> PathBuf {
        let n = UNIQUE.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!("windfield-{}-{stem}-{n}.txt", std::process::id()))
    }

    struct FileWriter {
        path: PathBuf,
    }

    impl OutputWriter for FileWriter {
        fn name(&self) -> &str {
            "speed text"
        }

        fn write(&self, outputs: &OutputSet) -> io::Result<Vec<PathBuf>> {
            let line = with_geospatial_lock(|| format!("{:?}\n", outputs.speed.max_value()));
            fs::write(&self.path, line)?;
            Ok(vec![self.path.clone()])
        }
    }

    struct FailingWriter;

    impl OutputWriter for FailingWriter {
        fn name(&self) -> &str {
            "broken"
        }

        fn write(&self, _outputs: &OutputSet) -> io::Result<Vec<PathBuf>> {
            Err(io::Error::other("disk full"))
        }
    }

    fn outputs() -> OutputSet {
        let u = Raster::new(4, 4, 0.0, 0.0, 10.0, 3.0);
        let v = u.like(4.0);
        let wind = SurfaceWind::from_components(u.clone(), v, u.like(0.0));
        OutputSet::assemble(
            &RunConfiguration::default(),
            wind,
            u.like(0.0),
            SurfaceProducts::default(),
            Vec::new(),
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_assemble_converts_units_and_resamples() {
        let mut config = RunConfiguration::default();
        config.output.speed_units = VelocityUnit::KilometersPerHour;
        config.output.resolution = Some(20.0);
        let u = Raster::new(4, 4, 0.0, 0.0, 10.0, 3.0);
        let wind = SurfaceWind::from_components(u.clone(), u.like(4.0), u.like(0.0));
        let set = OutputSet::assemble(&config, wind, u.like(0.5), SurfaceProducts::default(), Vec::new(), None)
            .unwrap();
        assert_eq!(set.speed.ncols(), 2);
        assert!((set.speed.get(0, 0) - 5.0 / 0.27778).abs() < 1e-9);
        assert!((set.cloud.get(1, 1) - 0.5).abs() < 1e-12);
        assert_eq!(set.metadata.speed_units, VelocityUnit::KilometersPerHour);
    }

    #[test]
    fn test_dispatch_success() {
        let set = outputs();
        let path = temp_path("ok");
        let writers: Vec<Box<dyn OutputWriter>> = vec![Box::new(FileWriter { path: path.clone() })];
        let written = dispatch(&writers, &set).unwrap();
        assert_eq!(written, vec![path.clone()]);
        assert!(path.exists());
        remove_outputs(&written);
        assert!(!path.exists());
    }

    #[test]
    fn test_failed_dispatch_removes_outputs() {
        let set = outputs();
        let path = temp_path("rollback");
        let writers: Vec<Box<dyn OutputWriter>> = vec![
            Box::new(FileWriter { path: path.clone() }),
            Box::new(FailingWriter),
        ];
        let err = dispatch(&writers, &set).unwrap_err();
        assert!(matches!(err, RunError::OutputWriter { ref writer, .. } if writer == "broken"));
        assert!(!path.exists());
    }
}
