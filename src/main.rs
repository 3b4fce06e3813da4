use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use pcron::infrastructure::parsers::crontab_parser;
use pcron::presentation::cli::commands::{InstallCommand, RunCommand, SignalCommand};
use pcron::presentation::cli::{Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = match &cli.command {
        Commands::Run { directory, .. } => {
            match crontab_parser::default_loglevel(&directory.join("crontab.ini")).as_deref() {
                Some("quiet") => "pcron=warn",
                Some("debug") => "pcron=debug",
                _ => "pcron=info",
            }
        }
        _ => "pcron=info",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    fmt().with_env_filter(filter).with_target(false).init();

    match cli.command {
        Commands::Run { directory, daemon } => RunCommand::execute(directory, daemon),
        Commands::Install { directory } => InstallCommand::execute(directory),
        Commands::Signal { directory, signal } => SignalCommand::execute(directory, signal),
    }
}
