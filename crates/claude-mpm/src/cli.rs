use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "mpm",
    about = "Context budget and resume log engine",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate a resume log now and wait for it to commit
    Pause {
        /// Transcript file to summarize (defaults to an empty transcript)
        #[arg(long)]
        transcript: Option<PathBuf>,
        /// Project directory (defaults to the current directory)
        #[arg(long)]
        cd: Option<PathBuf>,
    },
    /// Print the path of the resume log a new session would load
    Resume {
        /// Project directory (defaults to the current directory)
        #[arg(long)]
        cd: Option<PathBuf>,
    },
    /// Show occupancy, threshold level and stored logs
    Status {
        /// Emit machine-readable JSON
        #[arg(long)]
        json: bool,
        /// Project directory (defaults to the current directory)
        #[arg(long)]
        cd: Option<PathBuf>,
    },
}
