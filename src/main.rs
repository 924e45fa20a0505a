//! Command line front-end for the Hall effect bench.
//!
//! # Usage
//!
//! Record channels 1-3 and the thermocouple until Ctrl-C:
//! ```bash
//! hall-daq acquire --output run.csv --channels 1,2,3 --thermocouple
//! ```
//!
//! Show the multimeter configuration:
//! ```bash
//! hall-daq status --json
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hall_daq::acquisition::pump::{NoopPump, YieldPump};
use hall_daq::acquisition::sink::{column_labels, AcquisitionRow, RowSink, Source};
use hall_daq::config::{HallConfig, DEFAULT_CONFIG_PATH};
use hall_daq::telemetry::{self, OutputFormat, TracingConfig};
use hall_daq::{AppResult, Bench};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "hall-daq")]
#[command(about = "Keithley 199 and thermocouple acquisition", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level, overriding the configuration
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log format, overriding the configuration
    #[arg(long, global = true, value_enum)]
    log_format: Option<OutputFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a session to a CSV file (Ctrl-C stops after the current row)
    Acquire {
        /// Output file
        #[arg(long)]
        output: Option<PathBuf>,

        /// Keithley channels, e.g. 1,2,3
        #[arg(long, value_delimiter = ',')]
        channels: Option<Vec<u8>>,

        /// Also record the thermocouple
        #[arg(long)]
        thermocouple: bool,

        /// Stop after this many rows
        #[arg(long)]
        ticks: Option<u64>,

        /// Leave the Keithley front panel locked afterwards
        #[arg(long)]
        no_unlock: bool,
    },

    /// Print the decoded Keithley machine status
    Status {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Print the thermocouple reader's settings and temperature
    Temperature,
}

/// Prints every row to stdout as it is recorded.
struct PrintSink;

impl RowSink for PrintSink {
    fn on_session_start(&mut self, sources: &[Source]) {
        println!("{}", column_labels(sources).join("\t"));
    }

    fn on_row(&mut self, row: &AcquisitionRow) {
        println!("{}", row.fields().join("\t"));
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = HallConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(level) = cli.log_level {
        config.application.log_level = level;
    }
    if let Some(format) = cli.log_format {
        config.application.log_format = format;
    }
    let tracing_config = TracingConfig::from_config(&config).map_err(anyhow::Error::msg)?;
    telemetry::init(tracing_config).map_err(anyhow::Error::msg)?;

    let bench = Bench::connect(&config).await;
    let outcome = match cli.command {
        Commands::Acquire {
            output,
            channels,
            thermocouple,
            ticks,
            no_unlock,
        } => {
            let mut plan = config.plan();
            if let Some(output) = output {
                plan.output = output;
            }
            if let Some(channels) = channels {
                plan.channels = channels;
            }
            plan.thermocouple |= thermocouple;
            plan.max_ticks = ticks;
            if no_unlock {
                plan.unlock_on_stop = false;
            }
            acquire(&bench, plan).await
        }
        Commands::Status { json } => status(&bench, json).await,
        Commands::Temperature => temperature(&bench)
            .await
            .context("thermocouple query failed"),
    };

    bench.disconnect().await;
    outcome
}

async fn acquire(bench: &Bench, plan: hall_daq::AcquisitionPlan) -> Result<()> {
    let orchestrator = bench.orchestrator();

    let stop = orchestrator.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Stop requested");
            stop.stop();
        }
    });

    let mut printer = PrintSink;
    let summary = orchestrator
        .start(plan, &mut YieldPump, &mut [&mut printer])
        .await
        .context("acquisition failed")?;

    eprintln!(
        "{} rows written to {} ({:?})",
        summary.rows_written,
        summary.output.display(),
        summary.stop_reason
    );
    Ok(())
}

async fn status(bench: &Bench, json: bool) -> Result<()> {
    let orchestrator = bench.orchestrator();
    let report = orchestrator
        .refresh_status(&mut NoopPump)
        .await
        .context("status query failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        let keithley = orchestrator.keithley().await;
        match keithley.model() {
            Some(model) => println!("Keithley {model}"),
            None => println!("*** Simulation Mode ***"),
        }
        println!("{report}");
    }
    Ok(())
}

async fn temperature(bench: &Bench) -> AppResult<()> {
    let mut thermocouple = bench.orchestrator().thermocouple().await;

    let kind = thermocouple.get_thermocouple_type().await?;
    let mode = thermocouple.get_mode().await?;
    let cold_junction = thermocouple.get_cold_junction_temperature().await?;
    let reading = thermocouple.get_temperature().await?;

    println!("type:          {kind}");
    println!("mode:          {mode}");
    println!("cold junction: {cold_junction}");
    println!("temperature:   {reading}");
    Ok(())
}
