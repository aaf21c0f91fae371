//! Command-line front end for the household treatment train.

use anyhow::Context;
use clap::{Parser, Subcommand};
use sanitrain::config::TrainConfig;
use sanitrain::library;
use sanitrain::trains::household_system;
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Household wastewater mass-balance trains
#[derive(Parser)]
#[command(name = "sanitrain")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Steady-state greywater/blackwater treatment trains", long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate the household train and print the stream report
    Run {
        /// Connected population (overrides the configuration)
        #[arg(short, long)]
        population: Option<f64>,
        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// List the household component library
    Components,
    /// Check a configuration file and print it with defaults filled in
    Validate {
        /// TOML configuration file
        config: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run { population, config } => run(population, config),
        Commands::Components => {
            list_components();
            Ok(())
        }
        Commands::Validate { config } => {
            let config = TrainConfig::from_file(&config)
                .with_context(|| format!("invalid configuration {}", config.display()))?;
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

fn run(population: Option<f64>, config: Option<PathBuf>) -> anyhow::Result<()> {
    let mut config = match config {
        Some(path) => TrainConfig::from_file(&path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => TrainConfig::default(),
    };
    if let Some(population) = population {
        config.population = population;
        config.validate()?;
    }

    let components = library::household();
    let mut train = household_system(&components, &config)?;

    println!("\nRunning simulation for population of {}.\n", config.population);
    print!("{}", train.influent_report());

    train.simulate().context("simulation failed")?;

    print!("{}", train.outlet_report());
    for summary in train.removal_summaries() {
        print!("{}", summary);
    }
    Ok(())
}

fn list_components() {
    let components = library::household();
    println!(
        "{:<10} {:<6} {:<12} {:<13} {:>8} {:>6} {:>8} {:>8}",
        "ID", "Phase", "Size", "Degradable", "MW", "i_COD", "i_N", "i_P"
    );
    for c in components.iter() {
        let mw = c.molar_mass.map(|m| format!("{:.3}", m)).unwrap_or_else(|| "-".to_string());
        println!(
            "{:<10} {:<6} {:<12} {:<13} {:>8} {:>6} {:>8} {:>8}",
            c.id,
            c.phase.to_string(),
            format!("{:?}", c.particle_size),
            format!("{:?}", c.degradability),
            mw,
            c.i_cod,
            c.i_n,
            c.i_p
        );
    }
}
