//! LANDMARK PF: A simulation tool for landmark-based particle filter localization.
//!
//! The tool generates a synthetic drive through a landmark field, feeds the noisy controls and
//! body-frame observations to the particle filter, and reports the estimation error.
//!
//! Parameters come either from a configuration file (TOML/JSON/YAML) or from defaults overridden
//! by command-line flags.
use clap::{Args, Parser, Subcommand};
use log::{error, info};
use rayon::prelude::*;

use landmark_pf::config::RunConfig;
use landmark_pf::map::LandmarkMap;
use landmark_pf::particle::{ParticleAveragingStrategy, ParticleResamplingStrategy};
use landmark_pf::sim::{dead_reckoning, generate_scenario, run_filter};

use std::error::Error;
use std::path::PathBuf;

/// Command line arguments
#[derive(Parser)]
#[command(
    author,
    version,
    about = "A simulation tool for landmark-based particle filter localization."
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
    #[command(
        name = "pf",
        about = "Run the particle filter on a simulated drive",
        long_about = "Generate a synthetic drive through a landmark field and localize the vehicle with the particle filter. Each cycle predicts with the noisy control, weights particles by their landmark observations and resamples."
    )]
    ParticleFilter(RunArgs),
    #[command(
        name = "dr",
        about = "Run the dead reckoning baseline on a simulated drive",
        long_about = "Integrate the noisy controls from the initial estimate without landmark updates. Useful as a baseline for the particle filter."
    )]
    DeadReckoning(RunArgs),
    #[command(name = "create-config", about = "Write a default configuration file")]
    CreateConfig {
        /// Output path; the format follows the extension (.toml, .json, .yaml)
        path: PathBuf,
    },
    #[command(name = "create-map", about = "Generate a random landmark map as CSV")]
    CreateMap {
        /// Output CSV path
        path: PathBuf,
        /// Number of landmarks
        #[arg(long, default_value_t = 40)]
        landmarks: usize,
        /// Half-width of the square the landmarks are placed in (m)
        #[arg(long, default_value_t = 100.0)]
        half_extent: f64,
        #[arg(long, default_value_t = 7)]
        seed: u64,
    },
}

#[derive(Args, Clone, Debug)]
struct RunArgs {
    /// Configuration file (TOML/JSON/YAML); defaults are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Landmark map CSV (`id,x,y`); a random map is generated when omitted
    #[arg(short, long)]
    map: Option<PathBuf>,
    /// Output CSV for the per-step records
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Override the number of particles
    #[arg(long)]
    particles: Option<usize>,
    /// Override the number of simulated steps
    #[arg(long)]
    steps: Option<usize>,
    /// Override the filter seed
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long, value_enum)]
    resampling: Option<ParticleResamplingStrategy>,
    #[arg(long, value_enum)]
    averaging: Option<ParticleAveragingStrategy>,
    /// Repeat the filter run with this many consecutive filter seeds, in parallel
    #[arg(long, default_value_t = 1)]
    trials: usize,
}

impl RunArgs {
    fn load_config(&self) -> Result<RunConfig, Box<dyn Error>> {
        let mut config = match &self.config {
            Some(path) => {
                info!("Loading configuration from {}", path.display());
                RunConfig::from_file(path)?
            }
            None => RunConfig::default(),
        };
        if let Some(particles) = self.particles {
            config.filter.num_particles = particles;
        }
        if let Some(steps) = self.steps {
            config.simulation.steps = steps;
        }
        if let Some(seed) = self.seed {
            config.filter.seed = seed;
        }
        if let Some(strategy) = self.resampling {
            config.filter.resampling_strategy = strategy;
        }
        if let Some(strategy) = self.averaging {
            config.filter.averaging_strategy = strategy;
        }
        config.validate()?;
        Ok(config)
    }
    fn load_map(&self) -> Result<Option<LandmarkMap>, Box<dyn Error>> {
        match &self.map {
            Some(path) => {
                let map = LandmarkMap::from_csv(path)?;
                info!("Loaded {} landmarks from {}", map.len(), path.display());
                Ok(Some(map))
            }
            None => Ok(None),
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logger(&cli.log_level, cli.log_file.as_ref())?;
    let result = match cli.command {
        Command::ParticleFilter(args) => run_particle_filter(&args),
        Command::DeadReckoning(args) => run_dead_reckoning(&args),
        Command::CreateConfig { path } => {
            RunConfig::default().to_file(&path)?;
            info!("Wrote default configuration to {}", path.display());
            Ok(())
        }
        Command::CreateMap {
            path,
            landmarks,
            half_extent,
            seed,
        } => {
            use rand::SeedableRng;
            let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
            let map = landmark_pf::sim::generate_landmark_map(
                landmarks,
                half_extent,
                (0.0, 0.0),
                &mut rng,
            )?;
            map.to_csv(&path)?;
            info!("Wrote {} landmarks to {}", map.len(), path.display());
            Ok(())
        }
    };
    if let Err(e) = &result {
        error!("{}", e);
    }
    result
}

fn run_particle_filter(args: &RunArgs) -> Result<(), Box<dyn Error>> {
    let config = args.load_config()?;
    let scenario = generate_scenario(&config.simulation, args.load_map()?)?;
    info!(
        "Running particle filter: {} particles, {} steps, {} landmarks, {:?} resampling",
        config.filter.num_particles,
        scenario.steps.len(),
        scenario.map.len(),
        config.filter.resampling_strategy
    );
    if args.trials > 1 {
        let summaries: Vec<_> = (0..args.trials as u64)
            .into_par_iter()
            .map(|trial| {
                let mut filter = config.filter.clone();
                filter.seed = filter.seed.wrapping_add(trial);
                run_filter(&filter, &scenario).map(|result| (filter.seed, result.summary()))
            })
            .collect::<Result<_, _>>()?;
        for (seed, summary) in &summaries {
            info!("seed {}: {}", seed, summary);
        }
        let mean = summaries
            .iter()
            .map(|(_, s)| s.mean_position_error)
            .sum::<f64>()
            / summaries.len() as f64;
        info!(
            "Mean position error over {} trials: {:.4} m",
            summaries.len(),
            mean
        );
        return Ok(());
    }
    let result = run_filter(&config.filter, &scenario)?;
    info!("Particle filter: {}", result.summary());
    if let Some(path) = &args.output {
        result.to_csv(path)?;
        info!("Wrote {} records to {}", result.records.len(), path.display());
    }
    Ok(())
}

fn run_dead_reckoning(args: &RunArgs) -> Result<(), Box<dyn Error>> {
    let config = args.load_config()?;
    let scenario = generate_scenario(&config.simulation, args.load_map()?)?;
    let result = dead_reckoning(&scenario);
    info!("Dead reckoning: {}", result.summary());
    if let Some(path) = &args.output {
        result.to_csv(path)?;
        info!("Wrote {} records to {}", result.records.len(), path.display());
    }
    Ok(())
}

/// Initialize env_logger with a timestamped format, writing to `log_file` when given.
fn init_logger(log_level: &str, log_file: Option<&PathBuf>) -> Result<(), Box<dyn Error>> {
    use std::io::Write;

    let level = log_level.parse::<log::LevelFilter>().unwrap_or_else(|_| {
        eprintln!("Invalid log level '{}', defaulting to 'info'", log_level);
        log::LevelFilter::Info
    });

    let mut builder = env_logger::Builder::new();
    builder.filter_level(level);
    builder.format(|buf, record| {
        writeln!(
            buf,
            "{} [{}] - {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            record.level(),
            record.args()
        )
    });

    if let Some(log_path) = log_file {
        if let Some(parent) = log_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let target = Box::new(
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_path)?,
        );
        builder.target(env_logger::Target::Pipe(target));
    }

    builder.try_init()?;
    Ok(())
}
