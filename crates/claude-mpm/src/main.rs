use anyhow::Result;
use clap::Parser;
use mpm_core::EngineError;

mod cli;
mod git;
mod pause_cmd;
mod resume_cmd;
mod status_cmd;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing (output to stderr, initialize only once)
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init()
        .ok();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Pause { transcript, cd } => {
            let root = resolve_root(cd)?;
            pause_cmd::handle_pause(transcript, &root).await
        }
        Commands::Resume { cd } => {
            let root = resolve_root(cd)?;
            resume_cmd::handle_resume(&root)
        }
        Commands::Status { json, cd } => {
            let root = resolve_root(cd)?;
            status_cmd::handle_status(&root, json)
        }
    };

    match result {
        Ok(exit_code) => std::process::exit(exit_code),
        Err(error) => {
            // InvalidConfig and ConcurrentWriter are fatal by design;
            // everything else still exits non-zero but without ceremony.
            if let Some(engine_error) = error.downcast_ref::<EngineError>() {
                if engine_error.is_fatal() {
                    eprintln!("{engine_error}");
                    std::process::exit(1);
                }
            }
            Err(error)
        }
    }
}

fn resolve_root(cd: Option<std::path::PathBuf>) -> Result<std::path::PathBuf> {
    match cd {
        Some(path) => Ok(path),
        None => Ok(std::env::current_dir()?),
    }
}
