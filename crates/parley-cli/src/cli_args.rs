use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "parley",
    about = "Chat command bus with conversational completion",
    version
)]
pub(crate) struct Cli {
    #[arg(
        long,
        global = true,
        env = "PARLEY_CONFIG",
        default_value = "parley.json",
        help = "Path to the JSON bus configuration file"
    )]
    pub(crate) config: PathBuf,

    #[command(subcommand)]
    pub(crate) command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub(crate) enum CliCommand {
    /// Start the bus and chat over stdin/stdout until interrupted.
    Run {
        #[arg(
            long,
            env = "PARLEY_USER",
            help = "User name for lines read from stdin; overrides every stdio transport"
        )]
        user: Option<String>,
    },
    /// Load and validate the configuration, then print a summary.
    Validate,
}
