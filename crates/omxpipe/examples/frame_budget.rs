// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Drive the loopback component through its lifecycle and drain a fixed
//! number of frames.
//!
//! Usage: cargo run --example frame_budget [FRAMES]

use std::time::Instant;

use omxpipe::component::ComponentState;
use omxpipe::drain::{DrainAction, DrainConfig, DrainPolicy, DrainedBuffer};
use omxpipe::session::create_session;

struct PrintPolicy;

impl DrainPolicy for PrintPolicy {
    fn on_buffer(&mut self, buffer: &mut DrainedBuffer) -> Result<DrainAction, omxpipe::Error> {
        println!(
            "frame {:4}  {:6} bytes  flags {}",
            buffer.sequence(),
            buffer.filled(),
            buffer.flags()
        );
        Ok(DrainAction::Resubmit)
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let frames: u64 = std::env::args()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(30);

    let mut session = create_session()
        .with_component_name("loopback.video")
        .with_input_buffers(0)
        .with_output_buffers(4)
        .build()?;

    for def in session.ports() {
        println!("configured {}", def);
    }

    session.transition_to(ComponentState::Idle)?;
    session.transition_to(ComponentState::Executing)?;
    let primed = session.submit_all_outputs()?;
    println!("primed {} output buffers, draining {} frames", primed, frames);

    let start = Instant::now();
    let drain = session.spawn_drain(
        PrintPolicy,
        DrainConfig::default().with_frame_budget(frames),
    )?;
    session.shutdown_signal().wait(None);
    let report = drain.join();

    println!(
        "drained {} frames ({} bytes) in {:.2} s, {} resubmissions",
        report.frames,
        report.bytes,
        start.elapsed().as_secs_f64(),
        report.resubmitted
    );

    session.shutdown()?;
    println!("final census: {}", session.census());
    Ok(())
}
