//! cirunner - CI/CD step runner
//!
//! Executes the stages described by a trigger event: CI builds with their
//! pre/post steps, standalone jobs, and pre/post deployment stages.
//!
//! ## Commands
//!
//! - `cirunner run` - Run the pipeline for a trigger event
//! - `cirunner validate` - Check a trigger event's plugin references
//!
//! The event is read from `--event <file>` or from the `CI_CD_EVENT`
//! environment variable.
//!
//! ## Exit codes
//!
//! - `0` - pipeline succeeded
//! - `1` - infrastructure, validation or notification failure
//! - `2` - a pipeline step failed

use std::process::ExitCode;

mod cli;

fn main() -> ExitCode {
    match cli::run() {
        Ok(status) => ExitCode::from(status.code()),
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
