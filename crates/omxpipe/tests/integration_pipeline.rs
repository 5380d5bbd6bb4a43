// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies
//
// OMX Pipeline Integration Tests
//
// End-to-end scenarios over the in-process loopback component. The loopback
// delivers events and buffer returns from its own thread, so these tests
// exercise the real cross-thread paths: transition confirmation waits, the
// callback-to-queue handoff, and the drain worker loop.
//
// SCENARIOS:
//   - test_full_cycle_returns_every_buffer: census accounting over a
//     complete Loaded->Idle->Executing->Idle->Loaded cycle
//   - test_drain_resubmits_and_empties_queue: completions drain, resubmit,
//     and nothing is left queued at teardown
//   - test_loaded_confirmation_deferred_until_all_frees: the component
//     withholds CommandComplete(Loaded) until the last free_buffer
//   - test_error_event_fails_transition_without_stale_token: an injected
//     error event surfaces as Error::Transition and the next wait is clean
//   - test_frame_budget_fires_shutdown_exactly_once: a budget of 10 stops
//     resubmission and latches the shutdown signal once
//   - test_drain_preserves_completion_order: FIFO law over sequence numbers
//   - test_settled_transition_sends_no_command: idempotent transitions
//   - pause/resume, EOS, input refill, refused resubmit, cancellation
//
// Everything here is pure software; no hardware or elevated scheduling
// privileges are required (the drain priority raise is best-effort).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use omxpipe::buffer::{BufferFlags, BufferId};
use omxpipe::component::{
    Command, Component, ComponentCallbacks, ComponentError, ComponentEvent, ComponentState,
};
use omxpipe::drain::{DrainAction, DrainConfig, DrainPolicy, DrainedBuffer};
use omxpipe::loopback::{LoopbackComponent, LoopbackConfig, INPUT_PORT, OUTPUT_PORT};
use omxpipe::params::{Param, ParamIndex, PortDefinition, PortDirection};
use rand::Rng;
use omxpipe::session::{create_session, Session};
use omxpipe::Error;
use serial_test::serial;

/// Poll `predicate` until it holds or the deadline passes
fn wait_until<F: Fn() -> bool>(predicate: F, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    predicate()
}

/// Build a session over a loopback created from `config`, returning the
/// concrete component so tests can reach the fault-injection hooks
fn session_with_loopback(
    config: LoopbackConfig,
    input_buffers: usize,
    output_buffers: usize,
) -> (Session, Arc<LoopbackComponent>) {
    let slot: Arc<Mutex<Option<Arc<LoopbackComponent>>>> = Arc::new(Mutex::new(None));
    let captured = slot.clone();
    let session = create_session()
        .with_component(move |callbacks| {
            let component = LoopbackComponent::create(config, callbacks)?;
            *captured.lock().unwrap() = Some(component.clone());
            Ok(component as Arc<dyn Component>)
        })
        .with_input_buffers(input_buffers)
        .with_output_buffers(output_buffers)
        .build()
        .expect("session build");
    let component = slot.lock().unwrap().clone().expect("component captured");
    (session, component)
}

/// Policy counting frames and recording their sequence numbers
struct CountingPolicy {
    frames: Arc<AtomicU64>,
    sequences: Arc<Mutex<Vec<u64>>>,
    resubmit_errors: Arc<AtomicU64>,
}

impl CountingPolicy {
    #[allow(clippy::type_complexity)]
    fn new() -> (Self, Arc<AtomicU64>, Arc<Mutex<Vec<u64>>>, Arc<AtomicU64>) {
        let frames = Arc::new(AtomicU64::new(0));
        let sequences = Arc::new(Mutex::new(Vec::new()));
        let resubmit_errors = Arc::new(AtomicU64::new(0));
        (
            CountingPolicy {
                frames: frames.clone(),
                sequences: sequences.clone(),
                resubmit_errors: resubmit_errors.clone(),
            },
            frames,
            sequences,
            resubmit_errors,
        )
    }
}

impl DrainPolicy for CountingPolicy {
    fn on_buffer(&mut self, buffer: &mut DrainedBuffer) -> Result<DrainAction, Error> {
        self.frames.fetch_add(1, Ordering::SeqCst);
        self.sequences.lock().unwrap().push(buffer.sequence());
        Ok(DrainAction::Resubmit)
    }

    fn on_resubmit_error(&mut self, _id: BufferId, _error: &Error) {
        self.resubmit_errors.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Lifecycle and census
// ============================================================================

#[test]
#[serial]
fn test_full_cycle_returns_every_buffer() {
    let (mut session, _component) = session_with_loopback(LoopbackConfig::default(), 2, 4);

    session.transition_to(ComponentState::Idle).unwrap();
    let census = session.census();
    assert_eq!(census.total(), 6);
    assert!(census.is_all_free());

    session.transition_to(ComponentState::Executing).unwrap();
    assert_eq!(session.submit_all_outputs().unwrap(), 4);

    let (policy, frames, _, _) = CountingPolicy::new();
    let drain = session
        .spawn_drain(policy, DrainConfig::default().with_frame_budget(8))
        .unwrap();
    assert!(session.shutdown_signal().wait(Some(Duration::from_secs(10))));
    drain.join();

    // The Idle confirmation is delivered behind every pending buffer
    // return, so once this transition completes nothing is in flight.
    session.transition_to(ComponentState::Idle).unwrap();
    session.reclaim_completions();
    let census = session.census();
    assert_eq!(census.client_free, 6, "all buffers client-free after Idle");
    assert_eq!(census.submitted, 0);
    assert_eq!(census.awaiting_drain, 0);

    session.transition_to(ComponentState::Loaded).unwrap();
    assert_eq!(session.census().total(), 0);
    session.shutdown().unwrap();
    assert!(frames.load(Ordering::SeqCst) >= 8);
}

#[test]
#[serial]
fn test_drain_resubmits_and_empties_queue() {
    let (mut session, component) = session_with_loopback(LoopbackConfig::default(), 0, 4);

    session.transition_to(ComponentState::Idle).unwrap();
    session.transition_to(ComponentState::Executing).unwrap();
    assert_eq!(session.submit_all_outputs().unwrap(), 4);

    let (policy, _, _, _) = CountingPolicy::new();
    let drain = session
        .spawn_drain(policy, DrainConfig::default().with_frame_budget(8))
        .unwrap();
    assert!(session.shutdown_signal().wait(Some(Duration::from_secs(10))));
    let report = drain.join();

    // Each of the four buffers completed and went around at least once.
    assert!(report.frames >= 8);
    assert!(report.resubmitted >= 4);
    assert!(report.budget_reached);
    assert!(component.frames_completed() >= 8);

    // Retirement plus teardown reclaim leaves no buffer behind.
    session.shutdown().unwrap();
    assert_eq!(session.census().total(), 0);
}

// ============================================================================
// Transition confirmation semantics
// ============================================================================

/// Records events delivered by a component driven without a session
struct RecordingCallbacks {
    events: Mutex<Vec<ComponentEvent>>,
}

impl RecordingCallbacks {
    fn new() -> Arc<RecordingCallbacks> {
        Arc::new(RecordingCallbacks {
            events: Mutex::new(Vec::new()),
        })
    }

    fn count(&self, want: ComponentEvent) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|event| **event == want)
            .count()
    }
}

impl ComponentCallbacks for RecordingCallbacks {
    fn on_event(&self, event: ComponentEvent) {
        self.events.lock().unwrap().push(event);
    }

    fn on_input_returned(&self, _id: BufferId) {}

    fn on_output_returned(
        &self,
        _id: BufferId,
        _filled: usize,
        _flags: BufferFlags,
        _timestamp: Option<unix_ts::Timestamp>,
    ) {
    }
}

#[test]
fn test_loaded_confirmation_deferred_until_all_frees() {
    let callbacks = RecordingCallbacks::new();
    let component =
        LoopbackComponent::create(LoopbackConfig::default(), callbacks.clone()).unwrap();

    // Populate both ports on the way to Idle.
    let input = PortDefinition::input(INPUT_PORT);
    let output = PortDefinition::output(OUTPUT_PORT);
    component
        .send_command(Command::SetState(ComponentState::Idle))
        .unwrap();
    let mut ids: Vec<(u32, BufferId)> = Vec::new();
    for _ in 0..input.buffer_count {
        let id = component
            .allocate_buffer(INPUT_PORT, input.buffer_size)
            .unwrap();
        ids.push((INPUT_PORT, id));
    }
    for _ in 0..output.buffer_count {
        let id = component
            .allocate_buffer(OUTPUT_PORT, output.buffer_size)
            .unwrap();
        ids.push((OUTPUT_PORT, id));
    }
    assert_eq!(component.state(), ComponentState::Idle);

    // Ask for Loaded, then free one buffer at a time. The confirmation
    // must wait for the last free.
    component
        .send_command(Command::SetState(ComponentState::Loaded))
        .unwrap();
    let confirmed = ComponentEvent::CommandComplete {
        command: Command::SetState(ComponentState::Loaded),
    };
    let (last_port, last_id) = ids.pop().unwrap();
    for (port, id) in ids {
        component.free_buffer(port, id).unwrap();
        assert_eq!(component.state(), ComponentState::Idle);
        assert_eq!(callbacks.count(confirmed), 0, "confirmed before all frees");
    }
    component.free_buffer(last_port, last_id).unwrap();
    assert_eq!(component.state(), ComponentState::Loaded);

    assert!(
        wait_until(|| callbacks.count(confirmed) == 1, Duration::from_secs(5)),
        "exactly one CommandComplete(Loaded)"
    );
    component.close().unwrap();
}

#[test]
#[serial]
fn test_error_event_fails_transition_without_stale_token() {
    let (mut session, component) = session_with_loopback(LoopbackConfig::default(), 0, 3);
    session.transition_to(ComponentState::Idle).unwrap();

    component.error_event_on_next_transition(ComponentError::InsufficientResources);
    match session.transition_to(ComponentState::Executing) {
        Err(Error::Transition { target, source }) => {
            assert_eq!(target, ComponentState::Executing);
            assert_eq!(source, ComponentError::InsufficientResources);
        }
        other => panic!("expected transition error, got {:?}", other),
    }

    // The failed wait consumed its token; an unrelated retry works.
    session.transition_to(ComponentState::Executing).unwrap();
    assert_eq!(session.state(), ComponentState::Executing);
    session.shutdown().unwrap();
}

/// Component wrapper counting `send_command` calls
struct CountingComponent {
    inner: Arc<LoopbackComponent>,
    commands: Arc<AtomicU64>,
}

impl Component for CountingComponent {
    fn send_command(&self, command: Command) -> Result<(), Error> {
        self.commands.fetch_add(1, Ordering::SeqCst);
        self.inner.send_command(command)
    }

    fn get_parameter(&self, index: ParamIndex) -> Result<Param, Error> {
        self.inner.get_parameter(index)
    }

    fn set_parameter(&self, param: &Param) -> Result<(), Error> {
        self.inner.set_parameter(param)
    }

    fn allocate_buffer(&self, port: u32, size: usize) -> Result<BufferId, Error> {
        self.inner.allocate_buffer(port, size)
    }

    fn use_buffer(&self, port: u32, size: usize) -> Result<BufferId, Error> {
        self.inner.use_buffer(port, size)
    }

    fn free_buffer(&self, port: u32, id: BufferId) -> Result<(), Error> {
        self.inner.free_buffer(port, id)
    }

    fn fill_this_buffer(&self, id: BufferId) -> Result<(), Error> {
        self.inner.fill_this_buffer(id)
    }

    fn empty_this_buffer(
        &self,
        id: BufferId,
        filled: usize,
        flags: BufferFlags,
    ) -> Result<(), Error> {
        self.inner.empty_this_buffer(id, filled, flags)
    }

    fn state(&self) -> ComponentState {
        self.inner.state()
    }

    fn close(&self) -> Result<(), Error> {
        self.inner.close()
    }
}

#[test]
fn test_settled_transition_sends_no_command() {
    let commands = Arc::new(AtomicU64::new(0));
    let counted = commands.clone();
    let mut session = create_session()
        .with_component(move |callbacks| {
            let inner = LoopbackComponent::create(LoopbackConfig::default(), callbacks)?;
            Ok(Arc::new(CountingComponent {
                inner,
                commands: counted,
            }) as Arc<dyn Component>)
        })
        .with_input_buffers(0)
        .with_output_buffers(2)
        .build()
        .unwrap();

    // Already Loaded: no command sent, no wait token consumed.
    session.transition_to(ComponentState::Loaded).unwrap();
    assert_eq!(commands.load(Ordering::SeqCst), 0);
    assert_eq!(session.unmatched_events(), 0);

    session.transition_to(ComponentState::Idle).unwrap();
    let after_idle = commands.load(Ordering::SeqCst);
    assert_eq!(after_idle, 1);

    session.transition_to(ComponentState::Idle).unwrap();
    assert_eq!(
        commands.load(Ordering::SeqCst),
        after_idle,
        "settled Idle resent a command"
    );
    session.shutdown().unwrap();
}

// ============================================================================
// Drain worker behavior
// ============================================================================

#[test]
#[serial]
fn test_frame_budget_fires_shutdown_exactly_once() {
    let (mut session, component) = session_with_loopback(LoopbackConfig::default(), 0, 4);
    session.transition_to(ComponentState::Idle).unwrap();
    session.transition_to(ComponentState::Executing).unwrap();
    session.submit_all_outputs().unwrap();

    let (policy, _, _, _) = CountingPolicy::new();
    let drain = session
        .spawn_drain(policy, DrainConfig::default().with_frame_budget(10))
        .unwrap();

    assert!(session.shutdown_signal().wait(Some(Duration::from_secs(10))));
    let report = drain.join();
    assert!(report.budget_reached);
    // Completions past the budget are retired without reaching the
    // policy, so the count lands exactly on the budget.
    assert_eq!(report.frames, 10);

    // The drain worker already latched the signal; any later fire is a
    // no-op, which is how exactly-once is observable from outside.
    assert!(session.shutdown_signal().is_fired());
    assert!(!session.shutdown_signal().fire());

    // No resubmission after retirement: the component stops seeing
    // submissions once the worker switches to retire-only.
    let settled = component.frames_completed();
    thread::sleep(Duration::from_millis(100));
    assert_eq!(component.frames_completed(), settled);

    session.shutdown().unwrap();
    assert_eq!(session.census().total(), 0);
}

#[test]
#[serial]
fn test_drain_preserves_completion_order() {
    let (mut session, _component) = session_with_loopback(LoopbackConfig::default(), 0, 4);
    session.transition_to(ComponentState::Idle).unwrap();
    session.transition_to(ComponentState::Executing).unwrap();
    session.submit_all_outputs().unwrap();

    let (policy, _, sequences, _) = CountingPolicy::new();
    let drain = session
        .spawn_drain(policy, DrainConfig::default().with_frame_budget(20))
        .unwrap();
    assert!(session.shutdown_signal().wait(Some(Duration::from_secs(10))));
    drain.join();

    let sequences = sequences.lock().unwrap();
    assert!(sequences.len() >= 20);
    for window in sequences.windows(2) {
        assert!(
            window[0] < window[1],
            "drain order broke: {} before {}",
            window[0],
            window[1]
        );
    }
    drop(sequences);
    session.shutdown().unwrap();
}

#[test]
#[serial]
fn test_eos_stops_drain() {
    let config = LoopbackConfig::default().with_frame_limit(6);
    let (mut session, _component) = session_with_loopback(config, 0, 3);
    session.transition_to(ComponentState::Idle).unwrap();
    session.transition_to(ComponentState::Executing).unwrap();
    session.submit_all_outputs().unwrap();

    let (policy, _, _, _) = CountingPolicy::new();
    let drain = session.spawn_drain(policy, DrainConfig::default()).unwrap();
    assert!(session.shutdown_signal().wait(Some(Duration::from_secs(10))));
    let report = drain.join();

    assert!(report.eos, "EOS flag should reach the report");
    assert_eq!(report.frames, 6);
    assert!(session.eos_seen());
    session.shutdown().unwrap();
}

#[test]
#[serial]
fn test_pause_and_resume_mid_stream() {
    // Paced completions keep the frame count observable mid-stream, so
    // the pause lands before the budget is spent.
    let config = LoopbackConfig::default().with_frame_interval(Duration::from_millis(5));
    let (mut session, _component) = session_with_loopback(config, 0, 4);
    session.transition_to(ComponentState::Idle).unwrap();
    session.transition_to(ComponentState::Executing).unwrap();
    session.submit_all_outputs().unwrap();

    let (policy, frames, _, _) = CountingPolicy::new();
    let drain = session
        .spawn_drain(policy, DrainConfig::default().with_frame_budget(24))
        .unwrap();

    assert!(wait_until(
        || frames.load(Ordering::SeqCst) >= 6,
        Duration::from_secs(10)
    ));
    session.transition_to(ComponentState::Pause).unwrap();
    let paused_at = frames.load(Ordering::SeqCst);
    assert!(paused_at < 24, "pause landed after the whole budget drained");

    // Resume is confirmed through the same wait path as any transition,
    // and the buffers parked during Pause complete afterwards.
    session.transition_to(ComponentState::Executing).unwrap();
    assert!(wait_until(
        || frames.load(Ordering::SeqCst) > paused_at,
        Duration::from_secs(10)
    ));

    assert!(session.shutdown_signal().wait(Some(Duration::from_secs(10))));
    drain.join();
    session.shutdown().unwrap();
}

#[test]
#[serial]
fn test_input_refill_cycle() {
    let (mut session, _component) = session_with_loopback(LoopbackConfig::default(), 3, 3);
    session.transition_to(ComponentState::Idle).unwrap();
    session.transition_to(ComponentState::Executing).unwrap();

    // Feed every input buffer once; the refill policy keeps the cycle
    // going from the drain side.
    for id in session.buffers_on_port(INPUT_PORT) {
        session.submit_input(id, 64, BufferFlags::NONE).unwrap();
    }

    struct RefillPolicy {
        fed: Arc<AtomicU64>,
    }

    impl DrainPolicy for RefillPolicy {
        fn on_buffer(&mut self, buffer: &mut DrainedBuffer) -> Result<DrainAction, Error> {
            self.fed.fetch_add(1, Ordering::SeqCst);
            rand::rng().fill(&mut buffer.data_mut()[..64]);
            buffer.set_filled(64);
            Ok(DrainAction::Resubmit)
        }
    }

    let fed = Arc::new(AtomicU64::new(0));
    let drain = session
        .spawn_drain(
            RefillPolicy { fed: fed.clone() },
            DrainConfig::default()
                .with_direction(PortDirection::Input)
                .with_frame_budget(9),
        )
        .unwrap();

    assert!(session.shutdown_signal().wait(Some(Duration::from_secs(10))));
    let report = drain.join();
    assert!(report.frames >= 9);
    assert!(fed.load(Ordering::SeqCst) >= 9);
    session.shutdown().unwrap();
    assert_eq!(session.census().total(), 0);
}

// ============================================================================
// Failure and teardown paths
// ============================================================================

#[test]
#[serial]
fn test_refused_resubmit_reports_and_teardown_recovers() {
    let (mut session, component) = session_with_loopback(LoopbackConfig::default(), 0, 3);
    session.transition_to(ComponentState::Idle).unwrap();
    session.transition_to(ComponentState::Executing).unwrap();
    session.submit_all_outputs().unwrap();

    let (policy, frames, _, resubmit_errors) = CountingPolicy::new();
    let drain = session.spawn_drain(policy, DrainConfig::default()).unwrap();

    assert!(wait_until(
        || frames.load(Ordering::SeqCst) >= 3,
        Duration::from_secs(10)
    ));
    component.refuse_submits(true);

    // The next resubmission fails synchronously; the worker notifies the
    // policy, faults the pipeline, and stops.
    assert!(session.shutdown_signal().wait(Some(Duration::from_secs(10))));
    let report = drain.join();
    assert_eq!(report.resubmit_failures, 1);
    assert_eq!(resubmit_errors.load(Ordering::SeqCst), 1);

    // Teardown still brings every buffer home and closes the handle.
    component.refuse_submits(false);
    session.shutdown().unwrap();
    assert_eq!(session.census().total(), 0);
}

#[test]
#[serial]
fn test_settings_change_flag_and_refresh() {
    let (mut session, component) = session_with_loopback(LoopbackConfig::default(), 0, 3);
    component.settings_change_on_frame(2);

    session.transition_to(ComponentState::Idle).unwrap();
    session.transition_to(ComponentState::Executing).unwrap();
    session.submit_all_outputs().unwrap();

    let (policy, _, _, _) = CountingPolicy::new();
    let drain = session
        .spawn_drain(policy, DrainConfig::default().with_frame_budget(4))
        .unwrap();
    assert!(session.shutdown_signal().wait(Some(Duration::from_secs(10))));
    drain.join();

    assert!(wait_until(
        || session.port_settings_changed(OUTPUT_PORT),
        Duration::from_secs(5)
    ));
    let def = session.refresh_port_definition(OUTPUT_PORT).unwrap();
    assert_eq!(def.port, OUTPUT_PORT);
    assert!(
        !session.port_settings_changed(OUTPUT_PORT),
        "refresh clears the flag"
    );

    session.shutdown().unwrap();
}

#[test]
#[serial]
fn test_cancellation_stops_drain_between_bursts() {
    let (mut session, _component) = session_with_loopback(LoopbackConfig::default(), 0, 4);
    session.transition_to(ComponentState::Idle).unwrap();
    session.transition_to(ComponentState::Executing).unwrap();
    session.submit_all_outputs().unwrap();

    let (policy, frames, _, _) = CountingPolicy::new();
    let drain = session.spawn_drain(policy, DrainConfig::default()).unwrap();

    assert!(wait_until(
        || frames.load(Ordering::SeqCst) >= 3,
        Duration::from_secs(10)
    ));
    session.cancel_token().cancel();
    let report = drain.join();
    assert!(report.frames >= 3);

    // Teardown waits run on their own token, so a cancelled session still
    // frees everything and closes cleanly.
    session.shutdown().unwrap();
    assert_eq!(session.census().total(), 0);
}
