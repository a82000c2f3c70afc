//! chainchat CLI - operator tooling for the chainchat ingestion pipeline.
//!
//! Inspects configuration, the stored cursor and messages, and simulates the
//! synthetic load generator.

mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{config, cursor, messages, simulate};
use output::OutputFormat;

/// chainchat - on-chain chat ingestion
#[derive(Parser)]
#[command(
    name = "chainchat",
    version,
    about = "Operator CLI for the chainchat ingestion pipeline",
    long_about = "Inspect configuration, cursors and stored chat messages, and simulate synthetic load.",
    propagate_version = true
)]
pub struct Cli {
    /// Output format
    #[arg(short, long, global = true, default_value = "table")]
    output: OutputFormat,

    /// Configuration file (defaults and CHAINCHAT__* variables still apply)
    #[arg(short, long, global = true, env = "CHAINCHAT_CONFIG")]
    config: Option<String>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configuration checks
    #[command(subcommand)]
    Config(config::ConfigCommands),

    /// Read-position inspection
    #[command(subcommand)]
    Cursor(cursor::CursorCommands),

    /// Stored and live messages
    #[command(subcommand)]
    Messages(messages::MessageCommands),

    /// Simulate the synthetic load generator
    Simulate(simulate::SimulateArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let format = cli.output;
    let path = cli.config.as_deref();

    let result = match cli.command {
        Commands::Config(cmd) => config::execute(cmd, path, format).await,
        Commands::Cursor(cmd) => cursor::execute(cmd, path, format).await,
        Commands::Messages(cmd) => messages::execute(cmd, path, format).await,
        Commands::Simulate(args) => simulate::execute(args, format).await,
    };

    if let Err(e) = result {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }

    Ok(())
}
