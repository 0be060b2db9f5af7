//! CLI module for the publisher
//!
//! Provides command-line access to sharing builds, logging in, tracked
//! builds and configuration.

mod commands;
mod output;

use clap::{Parser, Subcommand};

pub use output::{OutputFormat, print_error};

/// Publisher - share WebGL builds to the web
#[derive(Parser, Debug)]
#[command(name = "publisher")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Output format
    #[command(flatten)]
    pub output: OutputOptions,

    #[command(subcommand)]
    pub command: Commands,
}

/// Output formatting options
#[derive(Parser, Debug, Clone)]
pub struct OutputOptions {
    /// Output in JSON format (for machine parsing)
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Increase output verbosity
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

impl OutputOptions {
    pub fn format(&self) -> OutputFormat {
        if self.json {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Package, upload and publish a build
    Share(commands::share::ShareArgs),

    /// Open the login page and wait for an access token
    Login,

    /// Tracked build directories
    Builds {
        #[command(subcommand)]
        command: commands::builds::BuildsCommands,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        command: commands::config::ConfigCommands,
    },
}

/// Run the CLI with parsed arguments
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let format = cli.output.format();
    let quiet = cli.output.quiet;

    match cli.command {
        Commands::Share(args) => commands::share::run(args, format, quiet).await,
        Commands::Login => commands::login::run(format, quiet).await,
        Commands::Builds { command } => commands::builds::run(command, format, quiet).await,
        Commands::Config { command } => commands::config::run(command, format, quiet).await,
    }
}
