//! KALMANVIZ: run a Kalman filter demonstration and emit chart-ready data.
//!
//! The program simulates a hidden trajectory, noisy observations and the filter's
//! predictions and estimates, then writes one flat row per step to stdout as CSV or JSON
//! for a plotting front-end. A run is configured either from a file (TOML/JSON/YAML) or
//! from one of the two built-in presets with command-line overrides.

use clap::{Args, Parser, Subcommand, ValueEnum};
use kalmanviz::chart::{ChartRow, TraceVisibility, chart_rows, columns};
use kalmanviz::gaussian::{BeliefCycle, Gaussian, STAGE_TITLES};
use kalmanviz::logging::init_logger;
use kalmanviz::sim::{SimulationConfig, simulate};
use log::{error, info, warn};
use std::error::Error;
use std::io::{self, Write};
use std::path::PathBuf;

/// Command line arguments
#[derive(Parser)]
#[command(
    author,
    version,
    about = "Simulate a Kalman filter run and write chart rows to stdout."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log level (off, error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Log file path (if not specified, logs to stderr)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand, Clone)]
enum Command {
    /// Run a simulation and print one chart row per step
    Run(RunArgs),
    /// Write a preset configuration to a file (format chosen by extension)
    Config {
        #[arg(long, value_enum, default_value_t = Preset::Constant)]
        preset: Preset,
        output: PathBuf,
    },
    /// Print the densities of one predict/measure/fuse cycle
    Walkthrough(WalkthroughArgs),
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Preset {
    Constant,
    Pendulum,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Csv,
    Json,
}

#[derive(Args, Clone, Debug)]
struct RunArgs {
    /// Configuration file (TOML/JSON/YAML); overrides --preset
    #[arg(short, long)]
    config: Option<PathBuf>,
    #[arg(long, value_enum, default_value_t = Preset::Constant)]
    preset: Preset,
    /// Process noise intensity Q
    #[arg(short = 'q', long)]
    process_noise: Option<f64>,
    /// Measurement noise intensity R
    #[arg(short = 'r', long)]
    measurement_noise: Option<f64>,
    /// Number of steps (replaces any configured duration)
    #[arg(long)]
    steps: Option<usize>,
    /// Time step in seconds
    #[arg(long)]
    dt: Option<f64>,
    #[arg(long)]
    process_seed: Option<u64>,
    #[arg(long)]
    measurement_seed: Option<u64>,
    #[arg(long, value_enum, default_value_t = OutputFormat::Csv)]
    format: OutputFormat,
    #[arg(long)]
    hide_true_state: bool,
    #[arg(long)]
    hide_measurement: bool,
    #[arg(long)]
    hide_prediction: bool,
    #[arg(long)]
    hide_estimate: bool,
    #[arg(long)]
    hide_uncertainty: bool,
}

#[derive(Args, Clone, Debug)]
struct WalkthroughArgs {
    /// Stage to show (0-4); all stages when omitted
    #[arg(long)]
    stage: Option<usize>,
    /// Number of density samples over [-5, 5)
    #[arg(long, default_value_t = 100)]
    samples: usize,
}

impl RunArgs {
    fn to_config(&self) -> Result<SimulationConfig, Box<dyn Error>> {
        let mut config = match &self.config {
            Some(path) => SimulationConfig::from_file(path)?,
            None => match self.preset {
                Preset::Constant => SimulationConfig::constant_demo(),
                Preset::Pendulum => SimulationConfig::pendulum_demo(),
            },
        };
        if let Some(q) = self.process_noise {
            config.process_noise = q;
        }
        if let Some(r) = self.measurement_noise {
            config.measurement_noise = r;
        }
        if let Some(steps) = self.steps {
            config.steps = Some(steps);
            config.duration = None;
        }
        if let Some(dt) = self.dt {
            config.dt = dt;
        }
        if let Some(seed) = self.process_seed {
            config.process_seed = seed;
        }
        if let Some(seed) = self.measurement_seed {
            config.measurement_seed = seed;
        }
        Ok(config)
    }

    fn visibility(&self) -> TraceVisibility {
        TraceVisibility {
            true_state: !self.hide_true_state,
            measurement: !self.hide_measurement,
            prediction: !self.hide_prediction,
            estimate: !self.hide_estimate,
            uncertainty: !self.hide_uncertainty,
        }
    }
}

fn write_csv<W: Write>(rows: &[ChartRow], out: W) -> Result<(), Box<dyn Error>> {
    let header = columns(rows);
    let mut writer = csv::Writer::from_writer(out);
    writer.write_record(&header)?;
    for row in rows {
        let record: Vec<String> = header
            .iter()
            .map(|key| match row.get(key).copied().flatten() {
                Some(value) => value.to_string(),
                None => String::new(),
            })
            .collect();
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

fn run(args: &RunArgs) -> Result<(), Box<dyn Error>> {
    let config = args.to_config()?;
    let linear = config.process_model.is_linear() && config.measurement_model.is_linear();
    info!(
        "Running {} on {:?} with {:?} measurements",
        if linear { "KF" } else { "EKF" },
        config.process_model,
        config.measurement_model
    );
    let run = simulate(&config)?;
    for warning in &run.warnings {
        warn!("{warning}");
    }
    let rows = chart_rows(&run, &args.visibility());
    let stdout = io::stdout().lock();
    match args.format {
        OutputFormat::Csv => write_csv(&rows, stdout)?,
        OutputFormat::Json => serde_json::to_writer_pretty(stdout, &rows)?,
    }
    Ok(())
}

fn walkthrough(args: &WalkthroughArgs) -> Result<(), Box<dyn Error>> {
    let cycle = BeliefCycle::default();
    let stages: Vec<usize> = match args.stage {
        Some(stage) => vec![stage],
        None => (0..STAGE_TITLES.len()).collect(),
    };
    let mut out = io::stdout().lock();
    for index in stages {
        let shown = cycle.stage(index)?;
        writeln!(out, "# {}: {}", index, STAGE_TITLES[index])?;
        for (role, density) in &shown {
            writeln!(
                out,
                "{:?}: mean {:.4}, std {:.4}",
                role,
                density.mean,
                density.std_dev()
            )?;
        }
        let densities: Vec<Gaussian> = shown.iter().map(|(_, g)| *g).collect();
        let grids: Vec<Vec<(f64, f64)>> = densities
            .iter()
            .map(|g| g.sample(-5.0, 5.0, args.samples))
            .collect();
        for i in 0..args.samples {
            let x = grids.first().map(|g| g[i].0).unwrap_or_default();
            let values: Vec<String> = grids.iter().map(|g| format!("{:.6}", g[i].1)).collect();
            writeln!(out, "{:.2},{}", x, values.join(","))?;
        }
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    if let Err(e) = init_logger(&cli.log_level, cli.log_file.as_ref()) {
        eprintln!("Failed to initialize logger: {}", e);
        return Err(e);
    }

    let result = match &cli.command {
        Command::Run(args) => run(args),
        Command::Config { preset, output } => {
            let config = match preset {
                Preset::Constant => SimulationConfig::constant_demo(),
                Preset::Pendulum => SimulationConfig::pendulum_demo(),
            };
            config
                .to_file(output)
                .map_err(|e| Box::new(e) as Box<dyn Error>)
                .map(|_| info!("Wrote {:?} preset to {}", preset, output.display()))
        }
        Command::Walkthrough(args) => walkthrough(args),
    };
    if let Err(e) = &result {
        error!("{e}");
    }
    result
}
