//! Offline generator simulation.
//!
//! Runs the synthetic load generator over simulated time against an
//! in-memory sink, so rates can be sanity-checked without a database.

use anyhow::{Context, Result};
use chainchat_core::config::GeneratorConfig;
use chainchat_core::generator;
use clap::Args;

use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct SimulateArgs {
    /// Target rate in messages per minute
    #[arg(short, long, default_value = "30")]
    rate: f64,

    /// Simulated duration in milliseconds
    #[arg(short, long, default_value = "600000")]
    duration_ms: u64,

    /// Generator tick interval in milliseconds
    #[arg(short, long, default_value = "100")]
    tick_ms: u64,

    /// Fixed RNG seed for a reproducible run
    #[arg(long)]
    seed: Option<u64>,
}

pub async fn execute(args: SimulateArgs, format: OutputFormat) -> Result<()> {
    let mut config = GeneratorConfig::new(args.tick_ms, args.rate);
    if let Some(seed) = args.seed {
        config = config.with_seed(seed);
    }

    let report = generator::simulate(&config, args.duration_ms)
        .await
        .context("Simulation failed")?;

    match format {
        OutputFormat::Table => {
            output::print_header("Generator simulation");
            output::print_detail("Rate", &format!("{} msg/min", args.rate));
            output::print_detail("Duration", &format!("{} ms", report.duration_ms));
            output::print_detail("Ticks", &format!("{} x {} ms", report.ticks, report.tick_ms));
            output::print_detail("Emitted", &report.emitted.to_string());
            output::print_detail("Expected", &format!("{:.1}", report.expected));
        }
        _ => output::print_item(&report, format)?,
    }

    Ok(())
}
