use clap::error::ErrorKind;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use voxreg::image::io::{load_volume_slices, save_volume_slices};
use voxreg::{
    resample, AffineTransform, Geometry, InitializerStrategy, LevelRecord, LoggingObserver,
    OptimizerConfig, OptimizerStatus, Region, Registration, RegistrationConfig,
    RegistrationOutcome, StepLengthSchedule,
};

const EXAMPLE_JSON: &str =
    include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/config.example.json"));

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Affine registration of a moving slice stack onto a fixed one"
)]
struct Cli {
    /// Directory of moving-volume slices.
    #[arg(required_unless_present = "print_example")]
    moving: Option<PathBuf>,
    /// Directory of fixed-volume slices.
    #[arg(required_unless_present = "print_example")]
    fixed: Option<PathBuf>,
    /// Directory the registered moving volume is written to.
    #[arg(required_unless_present = "print_example")]
    output: Option<PathBuf>,
    /// Path to a JSON configuration file.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Write a JSON report of the run.
    #[arg(short, long, value_name = "FILE")]
    report: Option<PathBuf>,
    /// Print an example config and exit.
    #[arg(long)]
    print_example: bool,
    /// Log per-level progress. Warnings and errors are always logged.
    #[arg(long)]
    trace: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum InitializerConfig {
    None,
    GeometricCenters,
    IntensityMoments,
}

impl From<InitializerConfig> for InitializerStrategy {
    fn from(value: InitializerConfig) -> Self {
        match value {
            InitializerConfig::None => InitializerStrategy::None,
            InitializerConfig::GeometricCenters => InitializerStrategy::GeometricCenters,
            InitializerConfig::IntensityMoments => InitializerStrategy::IntensityMoments,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct GeometryJson {
    origin: [f64; 3],
    spacing: [f64; 3],
}

impl Default for GeometryJson {
    fn default() -> Self {
        let geometry = Geometry::default();
        Self {
            origin: geometry.origin,
            spacing: geometry.spacing,
        }
    }
}

impl GeometryJson {
    fn to_geometry(&self) -> voxreg::VoxRegResult<Geometry> {
        Geometry::new(self.origin, self.spacing)
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct OptimizerJson {
    max_step_length: f64,
    min_step_length: f64,
    max_iterations: usize,
    gradient_magnitude_tolerance: f64,
    relaxation_factor: f64,
    scales: Option<Vec<f64>>,
    timeout_secs: Option<f64>,
}

impl Default for OptimizerJson {
    fn default() -> Self {
        let cfg = OptimizerConfig::default();
        Self {
            max_step_length: cfg.max_step_length,
            min_step_length: cfg.min_step_length,
            max_iterations: cfg.max_iterations,
            gradient_magnitude_tolerance: cfg.gradient_magnitude_tolerance,
            relaxation_factor: cfg.relaxation_factor,
            scales: cfg.scales,
            timeout_secs: cfg.timeout.map(|t| t.as_secs_f64()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RegionJson {
    start: [usize; 3],
    size: [usize; 3],
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct Config {
    levels: usize,
    initializer: InitializerConfig,
    parallel: bool,
    fill_value: u16,
    fixed_geometry: GeometryJson,
    moving_geometry: GeometryJson,
    optimizer: OptimizerJson,
    step_schedule: Vec<f64>,
    fixed_region: Option<RegionJson>,
}

impl Default for Config {
    fn default() -> Self {
        let cfg = RegistrationConfig::default();
        Self {
            levels: cfg.levels,
            initializer: InitializerConfig::IntensityMoments,
            parallel: true,
            fill_value: 0,
            fixed_geometry: GeometryJson::default(),
            moving_geometry: GeometryJson::default(),
            optimizer: OptimizerJson::default(),
            step_schedule: StepLengthSchedule::observed().steps().to_vec(),
            fixed_region: None,
        }
    }
}

impl Config {
    fn registration_config(self) -> Result<RegistrationConfig, Box<dyn std::error::Error>> {
        let timeout = match self.optimizer.timeout_secs {
            Some(secs) => Some(Duration::try_from_secs_f64(secs)?),
            None => None,
        };
        Ok(RegistrationConfig {
            levels: self.levels,
            initializer: self.initializer.into(),
            optimizer: OptimizerConfig {
                max_step_length: self.optimizer.max_step_length,
                min_step_length: self.optimizer.min_step_length,
                max_iterations: self.optimizer.max_iterations,
                gradient_magnitude_tolerance: self.optimizer.gradient_magnitude_tolerance,
                relaxation_factor: self.optimizer.relaxation_factor,
                scales: self.optimizer.scales,
                timeout,
            },
            step_schedule: StepLengthSchedule::new(self.step_schedule),
            fixed_region: self.fixed_region.map(|r| Region {
                start: r.start,
                size: r.size,
            }),
            parallel: self.parallel,
        })
    }
}

#[derive(Debug, Serialize)]
struct LevelReport {
    level: usize,
    shrink_factor: usize,
    status: String,
    iterations: usize,
    value: Option<f64>,
    parameters: Vec<f64>,
}

impl From<&LevelRecord> for LevelReport {
    fn from(value: &LevelRecord) -> Self {
        Self {
            level: value.level,
            shrink_factor: value.shrink_factor,
            status: status_label(&value.status),
            iterations: value.iterations,
            value: value.value,
            parameters: value.parameters.clone(),
        }
    }
}

#[derive(Debug, Default, Serialize)]
struct Report {
    error: Option<String>,
    center: [f64; 3],
    initial_parameters: Vec<f64>,
    final_parameters: Vec<f64>,
    failed_levels: Vec<usize>,
    partial: bool,
    levels: Vec<LevelReport>,
}

impl Report {
    fn from_outcome(outcome: &RegistrationOutcome) -> Self {
        Self {
            error: None,
            center: outcome.center(),
            initial_parameters: outcome.initial_transform().parameters(),
            final_parameters: outcome.final_parameters().to_vec(),
            failed_levels: outcome.failed_levels(),
            partial: outcome.is_partial(),
            levels: outcome.levels().iter().map(LevelReport::from).collect(),
        }
    }
}

fn status_label(status: &OptimizerStatus) -> String {
    match status {
        OptimizerStatus::Converged(stop) => format!("converged ({stop:?})"),
        OptimizerStatus::Failed(reason) => format!("failed ({reason:?})"),
        other => format!("{other:?}"),
    }
}

fn parse_cli() -> Cli {
    match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            err.exit()
        }
        Err(err) => {
            // Missing or malformed arguments.
            let _ = err.print();
            std::process::exit(-1);
        }
    }
}

/// Warnings and errors always reach stderr; `--trace` adds per-level progress.
fn log_directive(trace: bool) -> &'static str {
    if trace {
        "voxreg=info"
    } else {
        "warn"
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = parse_cli();

    let filter = EnvFilter::from_default_env().add_directive(log_directive(cli.trace).parse()?);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
    if cli.print_example {
        println!("{EXAMPLE_JSON}");
        return Ok(());
    }
    let (Some(moving_dir), Some(fixed_dir), Some(output_dir)) =
        (&cli.moving, &cli.fixed, &cli.output)
    else {
        eprintln!("moving, fixed and output directories are required");
        std::process::exit(-1);
    };

    let config: Config = match &cli.config {
        Some(path) => serde_json::from_str(&fs::read_to_string(path)?)?,
        None => Config::default(),
    };
    let fill_value = config.fill_value;
    let fixed = load_volume_slices(fixed_dir, config.fixed_geometry.to_geometry()?)?;
    let moving = load_volume_slices(moving_dir, config.moving_geometry.to_geometry()?)?;
    let registration_config = config.registration_config()?;

    let mut logger = LoggingObserver::default();
    let mut registration = Registration::new(registration_config).observe(&mut logger);
    let (transform, report) = match registration.run(fixed.view(), moving.view()) {
        Ok(outcome) => {
            let report = Report::from_outcome(&outcome);
            match outcome.final_transform() {
                Ok(transform) => (transform, report),
                Err(err) => {
                    tracing::warn!("final transform rejected: {err}");
                    (*outcome.initial_transform(), report)
                }
            }
        }
        Err(err) => {
            tracing::error!("registration failed: {err}");
            let fallback = AffineTransform::identity(fixed.geometry().center(fixed.size()));
            let report = Report {
                error: Some(err.to_string()),
                center: fallback.center(),
                initial_parameters: fallback.parameters(),
                final_parameters: fallback.parameters(),
                ..Report::default()
            };
            (fallback, report)
        }
    };

    let registered = resample(
        moving.view(),
        &transform,
        fixed.geometry(),
        fixed.size(),
        fill_value,
    )?;
    save_volume_slices(registered.view(), output_dir)?;

    let json = serde_json::to_string_pretty(&report)?;
    match cli.report {
        Some(path) => fs::write(path, json)?,
        None => println!("{json}"),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::log_directive;
    use tracing_subscriber::filter::LevelFilter;
    use tracing_subscriber::EnvFilter;

    #[test]
    fn errors_are_logged_without_trace() {
        let quiet = EnvFilter::default().add_directive(log_directive(false).parse().unwrap());
        assert_eq!(quiet.max_level_hint(), Some(LevelFilter::WARN));
        let verbose = EnvFilter::default().add_directive(log_directive(true).parse().unwrap());
        assert_eq!(verbose.max_level_hint(), Some(LevelFilter::INFO));
    }
}
