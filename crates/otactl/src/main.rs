//! otactl - operator CLI for the update agent
//!
//! Every command exits with its outcome code so automation can branch on it.

use clap::Parser;
use ota_shared::Outcome;
use std::process::ExitCode;

use otactl::cli::Cli;
use otactl::{commands, output};

fn main() -> ExitCode {
    let cli = Cli::parse();
    otad::logging::init(cli.verbose);

    let outcome = match commands::run(&cli) {
        Ok(outcome) => outcome,
        Err(e) => {
            eprintln!("otactl: {:#}", e);
            Outcome::UnknownError
        }
    };

    eprintln!("{}", output::outcome_label(outcome));
    ExitCode::from(outcome.code().clamp(0, 255) as u8)
}
