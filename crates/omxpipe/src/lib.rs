// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! OMX Pipeline Library for Rust
//!
//! Asynchronous state-transition coordination and buffer drain pipelines for
//! OpenMAX IL style media components.
//!
//! A media component (camera pipeline, video encoder, decoder) accepts
//! commands synchronously but confirms them through callbacks delivered from
//! its own thread, and returns filled buffers the same way. This crate
//! provides the coordination core every client of such a component needs:
//! a session that drives the Loaded/Idle/Executing/Pause lifecycle and
//! interleaves buffer allocation with the asynchronous confirmation wait, a
//! callback bridge that moves completed buffers onto a bounded queue without
//! blocking the component, and a drain worker that consumes completions and
//! resubmits or retires buffers under a caller-supplied policy.
//!
//! # Quick Start
//!
//! ## Driving a component through its lifecycle
//!
//! ```no_run
//! use omxpipe::component::ComponentState;
//! use omxpipe::session::create_session;
//!
//! let mut session = create_session()
//!     .with_component_name("loopback.video")
//!     .with_output_buffers(4)
//!     .build()?;
//!
//! session.transition_to(ComponentState::Idle)?;
//! session.transition_to(ComponentState::Executing)?;
//! session.submit_all_outputs()?;
//! // Buffers now flow; see the drain module for consuming them.
//! session.shutdown()?;
//! # Ok::<(), omxpipe::Error>(())
//! ```
//!
//! ## Draining completed buffers
//!
//! ```no_run
//! use omxpipe::component::ComponentState;
//! use omxpipe::drain::{DrainAction, DrainConfig, DrainPolicy, DrainedBuffer};
//! use omxpipe::session::create_session;
//!
//! struct Counter {
//!     frames: u64,
//! }
//!
//! impl DrainPolicy for Counter {
//!     fn on_buffer(&mut self, buffer: &mut DrainedBuffer) -> Result<DrainAction, omxpipe::Error> {
//!         self.frames += 1;
//!         println!("frame {} ({} bytes)", buffer.sequence(), buffer.filled());
//!         Ok(DrainAction::Resubmit)
//!     }
//! }
//!
//! let mut session = create_session().with_component_name("loopback.video").build()?;
//! session.transition_to(ComponentState::Idle)?;
//! session.transition_to(ComponentState::Executing)?;
//! session.submit_all_outputs()?;
//!
//! let drain = session.spawn_drain(Counter { frames: 0 }, DrainConfig::default().with_frame_budget(100))?;
//! session.shutdown_signal().wait(None);
//! drain.stop();
//! let report = drain.join();
//! println!("drained {} frames", report.frames);
//! session.shutdown()?;
//! # Ok::<(), omxpipe::Error>(())
//! ```
//!
//! # Features
//!
//! - Asynchronous state transitions with exactly-once confirmation waits
//! - Buffer ownership tracked per descriptor and asserted on every handoff
//! - Bounded completion queues with level-triggered readiness
//! - Drain workers with pluggable per-buffer policies and frame budgets
//! - First-class timeouts and cancellation on every blocking wait
//! - In-process loopback component for tests and bring-up
//!
//! # Support
//!
//! For questions and support:
//! - Documentation: <https://docs.rs/omxpipe>
//! - Repository: <https://github.com/EdgeFirstAI/omxpipe>
//! - Professional support: support@au-zone.com

use std::{error, fmt, io, time::SystemTime};

use unix_ts::Timestamp;

/// Error type for OMX pipeline operations
#[derive(Debug)]
pub enum Error {
    /// A synchronous component call returned a failure code
    Component(component::ComponentError),

    /// An error event arrived while a state transition was outstanding
    Transition {
        /// The state the failed transition was headed for
        target: component::ComponentState,
        /// The error the component reported instead of confirming
        source: component::ComponentError,
    },

    /// A state transition was requested while another is still outstanding
    TransitionPending,

    /// The confirmation event for a state transition did not arrive in time
    TransitionTimeout {
        /// The state the abandoned transition was headed for
        target: component::ComponentState,
    },

    /// The operation observed a cancellation request and stopped early
    Cancelled,

    /// Queue or wait-slot protocol fault, fatal for its pipeline
    QueueFault(&'static str),

    /// A buffer changed hands while its ownership tag disagreed
    OwnershipViolation {
        /// Index of the offending buffer
        buffer: usize,
        /// The tag the operation required
        expected: buffer::Ownership,
        /// The tag actually found on the descriptor
        actual: buffer::Ownership,
    },

    /// No port with the given index exists on the component
    UnknownPort(u32),

    /// No buffer with the given index exists in the pool
    UnknownBuffer(usize),

    /// I/O error from underlying system calls
    Io(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Component(err) => write!(f, "component call failed: {}", err),
            Error::Transition { target, source } => {
                write!(f, "transition to {} failed: {}", target, source)
            }
            Error::TransitionPending => {
                write!(f, "a state transition is already outstanding")
            }
            Error::TransitionTimeout { target } => {
                write!(f, "timed out waiting for transition to {}", target)
            }
            Error::Cancelled => write!(f, "operation cancelled"),
            Error::QueueFault(what) => write!(f, "queue fault: {}", what),
            Error::OwnershipViolation {
                buffer,
                expected,
                actual,
            } => {
                write!(
                    f,
                    "buffer {} ownership violation: expected {}, found {}",
                    buffer, expected, actual
                )
            }
            Error::UnknownPort(port) => write!(f, "no such port: {}", port),
            Error::UnknownBuffer(index) => write!(f, "no such buffer: {}", index),
            Error::Io(err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::Component(err) => Some(err),
            Error::Transition { source, .. } => Some(source),
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<component::ComponentError> for Error {
    fn from(err: component::ComponentError) -> Self {
        Error::Component(err)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

/// The buffer module provides buffer descriptors, ownership tags, and pools.
pub mod buffer;

/// The component module defines the call and callback surfaces of a component.
pub mod component;

/// The params module provides port definitions and component parameters.
pub mod params;

/// The queue module provides the bounded completion queue.
pub mod queue;

/// The signal module provides the shutdown latch and cancellation token.
pub mod signal;

/// The bridge module routes callbacks into queues and transition waits.
pub mod bridge;

/// The session module drives the component lifecycle.
pub mod session;

/// The drain module provides the completion-consuming worker thread.
pub mod drain;

/// The loopback module provides an in-process component for tests.
pub mod loopback;

/// Lock a mutex, recovering the inner guard if a panicking thread poisoned
/// it. Consistency of shared pipeline state is kept by the buffer ownership
/// tags, not by poison propagation.
pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Get the omxpipe library version string
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Get the current wall-clock time as a Unix timestamp
pub fn timestamp() -> Timestamp {
    let elapsed = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default();
    Timestamp::new(elapsed.as_secs() as i64, elapsed.subsec_nanos())
}
