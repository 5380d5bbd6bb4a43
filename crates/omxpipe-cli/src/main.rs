// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

mod cycle;
mod error;
mod info;
mod metrics;
mod run;
mod utils;

use clap::{Parser, Subcommand};
use error::result_to_exit_code;
use std::process::ExitCode;

/// OMX Pipeline CLI - Component lifecycle, buffer exchange, and metrics tool
#[derive(Parser)]
#[command(name = "omxpipe")]
#[command(version)]
#[command(about = "OMX Pipeline CLI - Component lifecycle, buffer exchange, and metrics tool")]
#[command(long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable debug logging, twice for trace (RUST_LOG overrides)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Output results in JSON format
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a component through its lifecycle and drain its output
    Run(run::Args),

    /// Repeatedly open, populate, and tear down a component
    Cycle(cycle::Args),

    /// Display available components and their port definitions
    Info(info::Args),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.quiet);

    let result = match cli.command {
        Commands::Run(args) => run::execute(args, cli.json),
        Commands::Cycle(args) => cycle::execute(args, cli.json),
        Commands::Info(args) => info::execute(args, cli.json),
    };

    result_to_exit_code(result)
}

/// Configure env_logger from the verbosity flags; RUST_LOG still wins
/// when set.
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        "error"
    } else {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let env = env_logger::Env::default().default_filter_or(level);

    // Timestamps and module targets are noise on a terminal
    env_logger::Builder::from_env(env)
        .format_timestamp(None)
        .format_target(false)
        .init();

    log::debug!("logging initialized");
}
