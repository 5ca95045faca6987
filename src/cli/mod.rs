//! Command line interface
//!
//! - `run`: execute the pipeline described by a trigger event
//! - `validate`: parse a trigger event and check its plugin references

pub mod event;
pub mod run;
pub mod validate;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use cirunner::infrastructure::{Config, init_logging};
use cirunner::pipeline::ExitStatus;

/// CLI arguments for cirunner
#[derive(Parser, Debug)]
#[command(name = "cirunner")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the pipeline described by a trigger event
    Run {
        /// Trigger event JSON file (defaults to the CI_CD_EVENT variable)
        #[arg(short, long)]
        event: Option<PathBuf>,
    },

    /// Check a trigger event without running anything
    Validate {
        /// Trigger event JSON file (defaults to the CI_CD_EVENT variable)
        #[arg(short, long)]
        event: Option<PathBuf>,
    },
}

/// Parse and execute CLI arguments
pub fn run() -> Result<ExitStatus> {
    let args = Args::parse();
    let config = Config::from_env();
    init_logging(&config.log_level);
    tracing::debug!(?config, "Loaded configuration");

    match args.command {
        Command::Run { event } => {
            let event = event::load_event(event.as_deref())?;
            run::run_event(&event, &config)
        }
        Command::Validate { event } => {
            let event = event::load_event(event.as_deref())?;
            validate::validate_event(&event)?;
            Ok(ExitStatus::Success)
        }
    }
}
