use anyhow::Result;
use clap::{Parser, Subcommand};
use common::{init_structured_logging, LoggingConfig};

mod commands;
mod render;

use commands::{CheckConfigCommand, ExampleConfigCommand, RunCommand};

#[derive(Parser)]
#[command(name = "vitals")]
#[command(about = "Health monitoring, alerting and automated recovery for long-running services")]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Monitor metric samples read as JSON lines from stdin
    Run(RunCommand),
    /// Validate a configuration file and print a summary
    #[command(alias = "check")]
    CheckConfig(CheckConfigCommand),
    /// Print an example configuration
    #[command(alias = "gen")]
    ExampleConfig(ExampleConfigCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_structured_logging(LoggingConfig::from_verbosity(cli.verbose).json(cli.log_json))?;

    match cli.command {
        Commands::Run(command) => command.execute().await,
        Commands::CheckConfig(command) => command.execute().await,
        Commands::ExampleConfig(command) => command.execute().await,
    }
}
