// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use crate::error::CliError;
use crate::utils;
use clap::Args as ClapArgs;
use omxpipe::component::ComponentState;
use omxpipe::session::create_session;
use serde::Serialize;
use std::time::{Duration, Instant};

#[derive(ClapArgs, Debug)]
pub struct Args {
    /// Component name to open
    #[arg(short, long, default_value = "loopback.video")]
    component: String,

    /// Number of open/populate/teardown passes
    #[arg(short, long, default_value = "3")]
    iterations: u32,

    /// Ceiling on each state transition wait in milliseconds
    #[arg(long, default_value = "5000")]
    timeout_ms: u64,
}

/// Result of a completed cycle run
#[derive(Debug, Serialize)]
struct CycleSummary {
    component: String,
    iterations: u32,
    buffers_per_pass: usize,
    duration_ms: u64,
}

/// Open the component, climb to Executing, descend, and release,
/// `iterations` times over
///
/// Each pass checks that every buffer returns to the free pool before
/// the handle closes; a leak fails the run.
pub fn execute(args: Args, json: bool) -> Result<(), CliError> {
    log::info!(
        "Cycling {} through {} open/close passes",
        args.component,
        args.iterations
    );

    let cancel = utils::install_signal_handler()?;
    let start = Instant::now();
    let mut buffers_per_pass = 0;

    for iteration in 1..=args.iterations {
        if cancel.is_cancelled() {
            log::info!("Received Ctrl+C, stopping after {} passes", iteration - 1);
            break;
        }

        let mut session = create_session()
            .with_component_name(&args.component)
            .with_transition_timeout(Some(Duration::from_millis(args.timeout_ms)))
            .with_cancel_token(cancel.clone())
            .build()?;

        session.transition_to(ComponentState::Idle)?;
        let populated = session.census();
        if populated.total() == 0 {
            return Err(CliError::PipelineFault(format!(
                "pass {}: no buffers were allocated",
                iteration
            )));
        }
        buffers_per_pass = populated.total();

        session.transition_to(ComponentState::Executing)?;
        session.transition_to(ComponentState::Idle)?;
        session.transition_to(ComponentState::Loaded)?;

        let census = session.census();
        if census.total() != 0 {
            return Err(CliError::PipelineFault(format!(
                "pass {}: {} buffers leaked ({})",
                iteration,
                census.total(),
                census
            )));
        }
        session.shutdown()?;

        log::info!(
            "Pass {}/{}: {} buffers allocated and released",
            iteration,
            args.iterations,
            buffers_per_pass
        );
    }

    let summary = CycleSummary {
        component: args.component,
        iterations: args.iterations,
        buffers_per_pass,
        duration_ms: start.elapsed().as_millis() as u64,
    };

    if json {
        let text = serde_json::to_string_pretty(&summary)
            .map_err(|e| CliError::General(format!("Failed to output JSON summary: {}", e)))?;
        println!("{}", text);
    } else {
        log::info!(
            "Completed {} passes in {} ms",
            summary.iterations,
            summary.duration_ms
        );
    }

    Ok(())
}
