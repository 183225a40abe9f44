mod commands;
mod logging;
mod output;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use tracing::Level;

use commands::matrix::MatrixArgs;
use commands::run::RunArgs;
use commands::validate::ValidateArgs;

/// Run matrix CI workflows locally, one isolated workspace per cell
#[derive(Parser, Debug)]
#[command(name = "gridci", version, about)]
struct Cli {
    /// Show debug logs
    #[arg(long, short = 'v', global = true, env = "GRIDCI_VERBOSE")]
    verbose: bool,

    /// Write logs as JSON lines
    #[arg(long, global = true, env = "GRIDCI_JSON_LOGS")]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run every cell a trigger event schedules
    Run(RunArgs),

    /// Check a workflow file without running it
    Validate(ValidateArgs),

    /// Print the cells a workflow expands to
    Matrix(MatrixArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    let level = if cli.verbose { Level::DEBUG } else { Level::WARN };
    logging::init_tracing(cli.json_logs, level);

    match cli.command {
        Command::Run(args) => commands::run::execute(args).await,
        Command::Validate(args) => commands::validate::execute(args),
        Command::Matrix(args) => commands::matrix::execute(args),
    }
}
