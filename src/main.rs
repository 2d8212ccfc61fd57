// Licensed under the MIT and Apache-2.0 licenses.

pub use eidola::*;

use anyhow::Result;
use clap::Parser;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;
use std::process::ExitCode;

// The end-to-end scenario tests live outside the crate to make sure the
// public API is usable without accidentally relying on crate-level
// visibility.
#[cfg(test)]
mod test;

/// Deterministic replicated-transaction simulator: feed it a command script,
/// one command per line, and it prints the resulting event log.
#[derive(Parser, Debug)]
#[command(name = "eidola")]
struct Args {
    /// Command script to run; reads stdin when omitted.
    input: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace). Logs go to stderr; the
    /// event log on stdout is unaffected.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();
    let level = match args.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(io::stderr)
        .init();

    let mut driver = Driver::new();
    let clean = match &args.input {
        Some(path) => driver.run(
            BufReader::new(File::open(path)?),
            io::stdout().lock(),
            io::stderr().lock(),
        )?,
        None => driver.run(io::stdin().lock(), io::stdout().lock(), io::stderr().lock())?,
    };
    Ok(if clean {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
