//! Sigil CLI - Command-line interface
//!
//! Runs the telemetry agent and exposes the movement advisor and
//! configuration file from the command line.

mod commands;
mod error;
mod notifier;

use clap::{Parser, Subcommand};

use commands::config::ConfigCommands;
use commands::run::RunArgs;
use error::CliError;

#[derive(Debug, Parser)]
#[command(name = "sigil")]
#[command(version, about = "Network mesh telemetry agent", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Start the agent and run until interrupted
    Run(RunArgs),

    /// Print movement instructions between two positions
    Advise {
        /// Current x (latitude)
        #[arg(allow_hyphen_values = true)]
        from_x: f64,
        /// Current y (longitude)
        #[arg(allow_hyphen_values = true)]
        from_y: f64,
        /// Target x (latitude)
        #[arg(allow_hyphen_values = true)]
        to_x: f64,
        /// Target y (longitude)
        #[arg(allow_hyphen_values = true)]
        to_y: f64,
    },

    /// View or modify configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run(args) => commands::run::run(args),
        Commands::Advise {
            from_x,
            from_y,
            to_x,
            to_y,
        } => commands::advise::run(from_x, from_y, to_x, to_y),
        Commands::Config { command } => commands::config::run(command),
    };

    if let Err(e) = result {
        e.exit();
    }
}
