pub mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "pcron")]
#[command(author = "pcron-rs contributors")]
#[command(version)]
#[command(about = "A periodic cron-like job scheduler", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(about = "Start the scheduler daemon for a pcron directory")]
    Run {
        #[arg(value_name = "DIR", help = "pcron directory containing crontab.ini")]
        directory: PathBuf,

        #[arg(short, long, help = "Fork into the background")]
        daemon: bool,
    },

    #[command(about = "Scaffold a fresh pcron directory (crontab.ini, environment.sh, jobs/)")]
    Install {
        #[arg(value_name = "DIR", help = "pcron directory to create or fill in")]
        directory: PathBuf,
    },

    #[command(about = "Send a control signal to a running scheduler")]
    Signal {
        #[arg(value_name = "DIR", help = "pcron directory holding pcron.pid")]
        directory: PathBuf,

        #[arg(value_enum, help = "Which signal to send")]
        signal: SignalKind,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SignalKind {
    /// Graceful shutdown.
    Shutdown,
    /// Reload the crontab.
    Reload,
    /// Dump the running/waiting/sleeping table to the log.
    Dump,
}
