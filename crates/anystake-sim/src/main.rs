// crates/anystake-sim/src/main.rs
//
// Binary entrypoint for the AnyStake simulator.
//
// Parses CLI arguments, loads the scenario file, initializes tracing,
// runs the scenario and prints the report.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use anystake_sim::{render, OutputFormat, SimConfig};

/// AnyStake simulator: runs a staking/treasury scenario from a TOML file.
#[derive(Parser, Debug)]
#[command(name = "anystake-sim", version = "0.1.0", about = "AnyStake reward economy simulator")]
struct Args {
    /// Path to the TOML deployment and scenario file.
    #[arg(long, default_value = "configs/anystake.toml")]
    config: String,

    /// Report format: table or json. Overrides the config file.
    #[arg(long)]
    format: Option<String>,

    /// Stop at the first failed step.
    #[arg(long)]
    strict: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // The config may set the log level, so it is read before the
    // subscriber is installed and reported right after.
    let loaded = SimConfig::load(&args.config);
    let level = loaded
        .as_ref()
        .map(|config| config.log_level.clone())
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .init();

    let config = match loaded {
        Ok(config) => {
            tracing::info!("Loaded scenario from {}", args.config);
            config
        }
        Err(e) => {
            tracing::warn!(
                "Could not load scenario from {}: {}. Using defaults.",
                args.config,
                e
            );
            SimConfig::default()
        }
    };

    let format: OutputFormat = args.format.as_deref().unwrap_or(&config.format).parse()?;
    let report = anystake_sim::run(&config, args.strict)?;
    println!("{}", render(&report, &format));

    let failed = report.failed_steps().count();
    if failed > 0 {
        tracing::warn!(failed, "some steps were rolled back");
    }
    Ok(())
}
