// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use crate::error::CliError;
use crate::metrics::PipelineMetrics;
use crate::utils;
use clap::Args as ClapArgs;
use omxpipe::component::{Component, ComponentError, ComponentState};
use omxpipe::drain::{DrainAction, DrainConfig, DrainPolicy, DrainedBuffer};
use omxpipe::loopback::{LoopbackComponent, LoopbackConfig};
use omxpipe::session::create_session;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(ClapArgs, Debug)]
pub struct Args {
    /// Component name to open
    #[arg(short, long, default_value = "loopback.video")]
    component: String,

    /// Number of frames to drain before stopping (0=unlimited)
    #[arg(short, long, default_value = "120")]
    frames: u64,

    /// Output buffer count
    #[arg(short, long, default_value = "4")]
    buffers: usize,

    /// Input buffer count (0 disables the input port)
    #[arg(long, default_value = "0")]
    input_buffers: usize,

    /// Buffer size in bytes (default: derived from the frame geometry)
    #[arg(long)]
    buffer_size: Option<usize>,

    /// Resolution in WxH format
    #[arg(short, long, default_value = "640x480")]
    resolution: String,

    /// Write drained payloads to a file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Ceiling on each state transition wait in milliseconds
    #[arg(long, default_value = "5000")]
    timeout_ms: u64,

    /// Pause and resume the component once this many frames have drained
    #[arg(long)]
    pause_at: Option<u64>,

    /// Pace loopback frame completions this many milliseconds apart
    /// (0 completes as fast as possible)
    #[arg(long, default_value = "0")]
    frame_interval_ms: u64,

    /// Print performance metrics on exit
    #[arg(long)]
    metrics: bool,
}

/// Drain policy that counts frames and optionally writes their payloads
struct WritePolicy {
    writer: Option<BufWriter<File>>,
}

impl DrainPolicy for WritePolicy {
    fn on_buffer(&mut self, buffer: &mut DrainedBuffer) -> Result<DrainAction, omxpipe::Error> {
        if let Some(writer) = self.writer.as_mut() {
            writer.write_all(buffer.data()).map_err(omxpipe::Error::Io)?;
        }
        log::trace!(
            "frame {}: {} bytes ({})",
            buffer.sequence(),
            buffer.filled(),
            buffer.flags()
        );
        Ok(DrainAction::Resubmit)
    }
}

pub fn execute(args: Args, json: bool) -> Result<(), CliError> {
    log::info!("Starting pipeline run on {}", args.component);
    log::debug!("Run parameters: {:?}", args);

    // Parse resolution
    let (width, height) = utils::parse_resolution(&args.resolution)?;
    log::debug!("Resolution: {}x{}", width, height);

    // Install signal handler for graceful shutdown
    let cancel = utils::install_signal_handler()?;

    // Open the component and configure its ports
    let mut builder = create_session()
        .with_output_buffers(args.buffers)
        .with_input_buffers(args.input_buffers)
        .with_resolution(width, height)
        .with_transition_timeout(Some(Duration::from_millis(args.timeout_ms)))
        .with_cancel_token(cancel.clone());
    if args.frame_interval_ms > 0 {
        // Pacing is a loopback construction setting, so it needs the
        // component built here rather than opened by name.
        let name = args.component.clone();
        let interval = Duration::from_millis(args.frame_interval_ms);
        builder = builder.with_component(move |callbacks| {
            if !matches!(name.as_str(), "loopback.video" | "loopback.camera") {
                return Err(omxpipe::Error::Component(ComponentError::ComponentNotFound));
            }
            let config = LoopbackConfig::default().with_frame_interval(interval);
            Ok(LoopbackComponent::create(config, callbacks)? as Arc<dyn Component>)
        });
    } else {
        builder = builder.with_component_name(&args.component);
    }
    if let Some(size) = args.buffer_size {
        builder = builder.with_buffer_size(size);
    }
    let mut session = builder.build()?;

    for def in session.ports() {
        log::info!("Configured {}", def);
    }

    // Climb to Executing and prime the exchange
    session.transition_to(ComponentState::Idle)?;
    session.transition_to(ComponentState::Executing)?;
    let primed = session.submit_all_outputs()?;
    log::info!("Primed {} output buffers", primed);

    // Open the payload sink if requested
    let writer = match &args.output {
        Some(path) => {
            let file = File::create(path)
                .map_err(|e| CliError::General(format!("Failed to create {:?}: {}", path, e)))?;
            log::info!("Writing drained payloads to {:?}", path);
            Some(BufWriter::new(file))
        }
        None => None,
    };

    let mut config = DrainConfig::default();
    if args.frames > 0 {
        config = config.with_frame_budget(args.frames);
    }

    let start = Instant::now();
    let drain = session.spawn_drain(WritePolicy { writer }, config)?;

    log::info!(
        "Draining {} frames (Ctrl+C to stop)...",
        if args.frames == 0 {
            "unlimited".to_string()
        } else {
            args.frames.to_string()
        }
    );

    // Wait for the budget, EOS, or a signal; pause mid-stream if asked
    let mut pauses = 0u64;
    let mut pause_at = args.pause_at;
    loop {
        if session.shutdown_signal().wait(Some(Duration::from_millis(50))) {
            log::info!("Drain finished");
            break;
        }
        if cancel.is_cancelled() {
            log::info!("Received Ctrl+C, stopping...");
            break;
        }
        if let Some(frame) = pause_at {
            if drain.report().frames >= frame {
                pause_at = None;
                pauses += 1;
                log::info!("Pausing at frame {}", frame);
                match session.transition_to(ComponentState::Pause) {
                    Err(omxpipe::Error::Cancelled) => break,
                    other => other?,
                }
                std::thread::sleep(Duration::from_millis(200));
                log::info!("Resuming");
                match session.transition_to(ComponentState::Executing) {
                    Err(omxpipe::Error::Cancelled) => break,
                    other => other?,
                }
            }
        }
    }

    let report = drain.join();
    let duration = start.elapsed();
    log::info!(
        "Drained {} frames ({} bytes) in {:.2} s",
        report.frames,
        report.bytes,
        duration.as_secs_f64()
    );

    // Tear down; buffers must all come home
    session.shutdown()?;
    log::debug!("Final census: {}", session.census());

    if report.resubmit_failures > 0 {
        return Err(CliError::PipelineFault(format!(
            "{} resubmissions failed",
            report.resubmit_failures
        )));
    }

    // Print final metrics if requested
    if args.metrics || json {
        let metrics = PipelineMetrics::new(&report, duration, pauses);
        if json {
            metrics
                .print_json()
                .map_err(|e| CliError::General(format!("Failed to output JSON metrics: {}", e)))?;
        } else {
            metrics.print_text();
        }
    }

    Ok(())
}
