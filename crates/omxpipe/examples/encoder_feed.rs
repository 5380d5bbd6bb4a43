// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Encoder-style exchange: feed raw frames through the input port while a
//! second worker drains the compressed output port.
//!
//! Usage: cargo run --example encoder_feed [FRAMES]

use omxpipe::buffer::BufferFlags;
use omxpipe::component::ComponentState;
use omxpipe::drain::{DrainAction, DrainConfig, DrainPolicy, DrainedBuffer};
use omxpipe::loopback::INPUT_PORT;
use omxpipe::params::PortDirection;
use omxpipe::session::create_session;

/// Rewrites each returned input buffer with the next synthetic frame
struct SourcePolicy {
    frame: u8,
}

impl DrainPolicy for SourcePolicy {
    fn on_buffer(&mut self, buffer: &mut DrainedBuffer) -> Result<DrainAction, omxpipe::Error> {
        self.frame = self.frame.wrapping_add(1);
        let fill = self.frame;
        for byte in buffer.data_mut().iter_mut() {
            *byte = fill;
        }
        let capacity = buffer.capacity();
        buffer.set_filled(capacity);
        Ok(DrainAction::Resubmit)
    }
}

/// Counts compressed output
struct SinkPolicy {
    bytes: u64,
}

impl DrainPolicy for SinkPolicy {
    fn on_buffer(&mut self, buffer: &mut DrainedBuffer) -> Result<DrainAction, omxpipe::Error> {
        self.bytes += buffer.filled() as u64;
        Ok(DrainAction::Resubmit)
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let frames: u64 = std::env::args()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(60);

    let mut session = create_session()
        .with_component_name("loopback.video")
        .with_input_buffers(5)
        .with_output_buffers(3)
        .with_resolution(1280, 720)
        .build()?;

    session.transition_to(ComponentState::Idle)?;
    session.transition_to(ComponentState::Executing)?;

    // Prime both directions: raw frames in, empty bitstream buffers out.
    for id in session.buffers_on_port(INPUT_PORT) {
        let slot = session.buffer(id)?;
        let capacity = slot.lock().unwrap().capacity();
        session.submit_input(id, capacity, BufferFlags::NONE)?;
    }
    session.submit_all_outputs()?;

    let source = session.spawn_drain(
        SourcePolicy { frame: 0 },
        DrainConfig::default().with_direction(PortDirection::Input),
    )?;
    let sink = session.spawn_drain(
        SinkPolicy { bytes: 0 },
        DrainConfig::default().with_frame_budget(frames),
    )?;

    session.shutdown_signal().wait(None);
    source.stop();
    source.join();
    let report = sink.join();
    println!(
        "encoded {} frames, {} output bytes, eos={}",
        report.frames, report.bytes, report.eos
    );

    session.shutdown()?;
    Ok(())
}
