use clap::{Parser, ValueEnum};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;
use windfield_core::grid::MeshResolution;
use windfield_core::simulation::{DomainAverageInput, PointInput, RunStage};
use windfield_core::{
    InitializationMode, MatchingSettings, OutputSet, OutputWriter, ProgressReporter, Raster,
    RunConfiguration, RunReport, Station, StationSample, SurfaceSpec, TerrainData, UnitFamily,
    Vegetation, WindSimulation,
};

/// Mass-consistent wind run over synthetic terrain
#[derive(Parser, Debug)]
#[command(name = "windfield-headless")]
#[command(about = "Steady mass-consistent wind field demo", long_about = None)]
struct Args {
    /// DEM cells per side (square domain)
    #[arg(long, default_value_t = 60)]
    size: usize,

    /// DEM cell size in meters
    #[arg(long, default_value_t = 30.0)]
    cell_size: f64,

    /// Gaussian hill height in meters (0 = flat)
    #[arg(long, default_value_t = 0.0)]
    hill: f64,

    /// Mesh resolution: coarse, medium, fine or a cell size in meters
    #[arg(short, long, default_value = "coarse")]
    resolution: String,

    /// Input wind speed
    #[arg(short, long, default_value_t = 5.0)]
    speed: f64,

    /// Direction the wind blows from in degrees (0=North, 90=East)
    #[arg(short, long, default_value_t = 270.0)]
    direction: f64,

    /// Input and output speed units (mps, mph, kph)
    #[arg(short, long, default_value = "mps")]
    units: String,

    /// Output height above the vegetation in meters
    #[arg(long, default_value_t = 10.0)]
    output_height: f64,

    #[arg(long, value_enum, default_value_t = Cover::Grass)]
    vegetation: Cover,

    #[arg(short, long, value_enum, default_value_t = Mode::Domain)]
    mode: Mode,

    /// Worker threads (0 = all cores)
    #[arg(short, long, default_value_t = 0)]
    threads: usize,

    /// Also compute friction velocity and dust emission
    #[arg(long)]
    dust: bool,

    /// Directory for ESRI ASCII speed and direction grids
    #[arg(short, long)]
    output_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Cover {
    Grass,
    Brush,
    Trees,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    /// Uniform domain-average wind
    Domain,
    /// One station at the domain centre, matched by the outer loop
    Station,
}

fn parse_resolution(text: &str) -> Result<MeshResolution, String> {
    match text.to_lowercase().as_str() {
        "coarse" => Ok(MeshResolution::Coarse),
        "medium" => Ok(MeshResolution::Medium),
        "fine" => Ok(MeshResolution::Fine),
        other => other
            .parse::<f64>()
            .map(MeshResolution::Meters)
            .map_err(|_| format!("unknown resolution '{other}'")),
    }
}

/// Writes speed and direction as ESRI ASCII grids.
struct AsciiGridWriter {
    dir: PathBuf,
}

fn write_ascii_grid(path: &Path, grid: &Raster) -> io::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    writeln!(out, "ncols        {}", grid.ncols())?;
    writeln!(out, "nrows        {}", grid.nrows())?;
    writeln!(out, "xllcorner    {}", grid.xll())?;
    writeln!(out, "yllcorner    {}", grid.yll())?;
    writeln!(out, "cellsize     {}", grid.cell_size())?;
    writeln!(out, "NODATA_value {}", grid.no_data())?;
    // ASCII grids list the northern row first
    for row in (0..grid.nrows()).rev() {
        let line: Vec<String> = (0..grid.ncols())
            .map(|col| format!("{:.2}", grid.get(row, col)))
            .collect();
        writeln!(out, "{}", line.join(" "))?;
    }
    out.flush()
}

impl OutputWriter for AsciiGridWriter {
    fn name(&self) -> &str {
        "ascii grid"
    }

    fn write(&self, outputs: &OutputSet) -> io::Result<Vec<PathBuf>> {
        std::fs::create_dir_all(&self.dir)?;
        let height = outputs.metadata.output_height;
        let mut written = Vec::new();
        for (stem, grid) in [("vel", &outputs.speed), ("ang", &outputs.direction)] {
            let path = self.dir.join(format!("windfield_{height:.0}m_{stem}.asc"));
            write_ascii_grid(&path, grid)?;
            written.push(path);
        }
        Ok(written)
    }
}

/// Prints stage completion and matching progress to stdout.
struct ConsoleProgress;

impl ProgressReporter for ConsoleProgress {
    fn matching_progress(&self, percent: u8) {
        println!("  matching {percent:>3}%");
    }

    fn stage_completed(&self, stage: RunStage) {
        println!("  [done] {stage}");
    }
}

fn build_config(args: &Args) -> Result<RunConfiguration, String> {
    let terrain = if args.hill > 0.0 {
        let radius = args.size as f64 * args.cell_size / 5.0;
        TerrainData::single_hill(args.size, args.size, args.cell_size, 0.0, args.hill, radius)
    } else {
        TerrainData::flat(args.size, args.size, args.cell_size, 0.0)
    };
    let vegetation = match args.vegetation {
        Cover::Grass => Vegetation::Grass,
        Cover::Brush => Vegetation::Brush,
        Cover::Trees => Vegetation::Trees,
    };

    let mut config = RunConfiguration {
        terrain,
        surface: SurfaceSpec::Uniform(vegetation),
        num_threads: args.threads,
        friction_velocity: args.dust,
        dust: args.dust,
        ..RunConfiguration::default()
    };
    config.mesh.resolution = parse_resolution(&args.resolution)?;
    config.output.height = args.output_height;
    config
        .set_output_speed_units(&args.units)
        .map_err(|e| e.to_string())?;
    // Inputs are given in the output units
    let speed = config
        .output
        .speed_units
        .to_base(args.speed)
        .map_err(|e| e.to_string())?;

    config.mode = match args.mode {
        Mode::Domain => InitializationMode::DomainAverage(DomainAverageInput {
            speed,
            direction: args.direction,
            ..DomainAverageInput::default()
        }),
        Mode::Station => {
            let center = args.size as f64 * args.cell_size / 2.0;
            let station = Station::legacy(
                "center",
                center,
                center,
                args.output_height,
                StationSample::new(speed, args.direction),
            );
            InitializationMode::PointMatching(PointInput {
                stations: vec![station],
                matching: Some(MatchingSettings::default()),
                time_step: 0,
            })
        }
    };
    Ok(config)
}

fn print_stats(label: &str, grid: &Raster) {
    let data = grid.data();
    let mean = data.iter().sum::<f64>() / data.len().max(1) as f64;
    println!(
        "{label:<10} min {:>8.2}  mean {:>8.2}  max {:>8.2}",
        grid.min_value().unwrap_or(f64::NAN),
        mean,
        grid.max_value().unwrap_or(f64::NAN)
    );
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    println!("=== Wind Field Demo ===\n");

    let config = match build_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid arguments: {e}");
            return ExitCode::FAILURE;
        }
    };
    let units = config.output.speed_units;
    println!(
        "Domain {}x{} cells at {:.0} m, hill {:.0} m, {} initialization",
        args.size,
        args.size,
        args.cell_size,
        args.hill,
        config.mode.name()
    );
    println!(
        "Input wind {:.1} {} from {:.0} deg\n",
        args.speed, units, args.direction
    );

    let mut sim = WindSimulation::new(config).with_progress(Arc::new(ConsoleProgress));
    if let Some(dir) = &args.output_dir {
        sim = sim.with_writer(Box::new(AsciiGridWriter { dir: dir.clone() }));
    }

    let result = sim.run();
    if let Ok(outcome) = &result {
        info!("Total run time {:.2} s", outcome.timings.total.as_secs_f64());
        for path in &outcome.written {
            println!("Wrote {}", path.display());
        }
        if outcome.matching_iterations > 0 {
            println!("Matched stations in {} iteration(s)", outcome.matching_iterations);
        }
    }

    let report = RunReport::from(result);
    match (&report.outputs, &report.diagnostic) {
        (Some(outputs), _) => {
            println!("\n=== Surface wind at {:.1} m ({}) ===", outputs.metadata.output_height, units);
            print_stats("speed", &outputs.speed);
            print_stats("direction", &outputs.direction);
            if let Some(ustar) = &outputs.friction_velocity {
                print_stats("u*", ustar);
            }
            if let Some(dust) = &outputs.dust {
                print_stats("pm10", dust);
            }
            ExitCode::SUCCESS
        }
        (None, diagnostic) => {
            eprintln!("\nRun failed: {}", diagnostic.as_deref().unwrap_or("unknown error"));
            if let Some(ratio) = report.radius_to_resolution {
                eprintln!("Influence radius is {ratio:.1} mesh cells");
            }
            ExitCode::FAILURE
        }
    }
}
