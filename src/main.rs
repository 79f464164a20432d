//! CLI entry point for the docking station.
//!
//! Runs a bump test or a calibration against the simulated instrument
//! described in the station file's `[simulation]` table and prints the
//! result as JSON.
//!
//! ```bash
//! dockstation bump --config config/station.example.toml
//! dockstation calibrate --config config/station.example.toml --compressed
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dock_core::{GasOperationResult, TimingConfig};
use dockstation::{
    logging, BumpTestOperation, CalibrationOperation, OperationContext, StationConfig,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "dockstation")]
#[command(about = "Bump test and calibrate a docked gas detector", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bump test the docked instrument
    Bump {
        /// Station configuration file
        #[arg(long)]
        config: PathBuf,

        /// Shorten purges and settles
        #[arg(long)]
        compressed: bool,
    },

    /// Calibrate the docked instrument
    Calibrate {
        /// Station configuration file
        #[arg(long)]
        config: PathBuf,

        /// Shorten purges and settles
        #[arg(long)]
        compressed: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Bump { config, compressed } => {
            let (station, ctx, instrument) = setup(&config, compressed)?;
            let mut op = BumpTestOperation::new(
                ctx,
                station.bump.clone(),
                instrument,
                station.catalog(),
            );
            op.execute().await
        }
        Commands::Calibrate { config, compressed } => {
            let (station, ctx, instrument) = setup(&config, compressed)?;
            let mut op = CalibrationOperation::new(
                ctx,
                station.calibration.clone(),
                instrument,
                station.catalog(),
            );
            op.execute().await
        }
    };

    match result {
        Ok(result) => print_result(&result),
        Err(e) => {
            error!(error = %e, "Operation failed");
            Err(e.into())
        }
    }
}

fn setup(
    path: &Path,
    compressed: bool,
) -> Result<(StationConfig, OperationContext, dock_core::DockedInstrument)> {
    let station = StationConfig::load_from(path)
        .with_context(|| format!("Failed to load station config: {}", path.display()))?;
    logging::init_from_config(&station).map_err(anyhow::Error::msg)?;

    let simulation = station
        .simulation
        .as_ref()
        .context("Station config has no [simulation] table")?;
    let (instrument, simulator) = simulation.build();
    info!(
        station = %station.station.serial,
        instrument = %instrument.serial,
        sensors = instrument.sensors.len(),
        "Instrument docked"
    );

    let timing = if compressed {
        let short = TimingConfig::compressed();
        TimingConfig {
            cross_pass_purge: short.cross_pass_purge,
            final_purge: short.final_purge,
            zero_settle: short.zero_settle,
            ..station.timing
        }
    } else {
        station.timing
    };
    let ctx = OperationContext::new(Arc::new(simulator)).with_timing(timing);
    Ok((station, ctx, instrument))
}

fn print_result(result: &GasOperationResult) -> Result<()> {
    let json = serde_json::to_string_pretty(result).context("Failed to serialize result")?;
    println!("{}", json);
    Ok(())
}
