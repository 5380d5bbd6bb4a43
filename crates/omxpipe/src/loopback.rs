// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! In-process loopback component
//!
//! A software [`Component`] for bring-up and tests. It speaks the full
//! call/callback protocol of a hardware component, including deferred
//! transition confirmations and buffer returns delivered from its own
//! thread, but produces synthetic frames instead of encoded video. Output
//! submissions complete in submission order with a running sequence,
//! a plausible filled length and a timestamp; input submissions are
//! consumed immediately. An optional frame limit flags end of stream.
//!
//! Fault injection hooks let tests force synchronous command failures,
//! asynchronous error events, refused submissions and mid-stream
//! settings changes.

use std::collections::{HashMap, VecDeque};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use unix_ts::Timestamp;

use crate::buffer::{BufferFlags, BufferId};
use crate::component::{
    Command, Component, ComponentCallbacks, ComponentError, ComponentEvent, ComponentState,
};
use crate::params::{
    BitrateParam, FramerateParam, Param, ParamIndex, PortCountParam, PortDefinition,
    DEFAULT_FRAME_RATE,
};
use crate::{lock, Error};

/// Port index of the loopback input port
pub const INPUT_PORT: u32 = 0;

/// Port index of the loopback output port
pub const OUTPUT_PORT: u32 = 1;

/// Sequence interval at which outputs are flagged as sync frames
const SYNC_FRAME_INTERVAL: u64 = 30;

/// Open a component by name
///
/// `"loopback.video"` and the `"loopback.camera"` alias construct a
/// loopback component with default ports; any other name fails with
/// [`ComponentError::ComponentNotFound`].
pub fn open(
    name: &str,
    callbacks: Arc<dyn ComponentCallbacks>,
) -> Result<Arc<dyn Component>, Error> {
    match name {
        "loopback.video" | "loopback.camera" => {
            let component = LoopbackComponent::create(LoopbackConfig::default(), callbacks)?;
            Ok(component)
        }
        _ => {
            log::warn!("no component named {:?}", name);
            Err(Error::Component(ComponentError::ComponentNotFound))
        }
    }
}

/// Construction settings for a [`LoopbackComponent`]
#[derive(Debug, Clone)]
pub struct LoopbackConfig {
    /// Flag end of stream once this many output frames have completed
    pub frame_limit: Option<u64>,

    /// Delivery pacing between output frame completions; zero completes
    /// instantly
    pub frame_interval: Duration,

    /// Input port definition
    pub input: PortDefinition,

    /// Output port definition
    pub output: PortDefinition,
}

impl LoopbackConfig {
    /// Set the frame limit
    pub fn with_frame_limit(mut self, limit: u64) -> LoopbackConfig {
        self.frame_limit = Some(limit);
        self
    }

    /// Pace output completions at roughly one per `interval`
    pub fn with_frame_interval(mut self, interval: Duration) -> LoopbackConfig {
        self.frame_interval = interval;
        self
    }
}

impl Default for LoopbackConfig {
    fn default() -> LoopbackConfig {
        LoopbackConfig {
            frame_limit: None,
            frame_interval: Duration::ZERO,
            input: PortDefinition::input(INPUT_PORT),
            output: PortDefinition::output(OUTPUT_PORT),
        }
    }
}

enum Delivery {
    Event(ComponentEvent),
    InputDone(BufferId),
    OutputDone {
        id: BufferId,
        filled: usize,
        flags: BufferFlags,
        timestamp: Option<Timestamp>,
    },
    Stop,
}

struct Inner {
    tx: mpsc::Sender<Delivery>,
    state: ComponentState,
    pending: Option<ComponentState>,
    ports: HashMap<u32, PortDefinition>,
    bitrate: BitrateParam,
    framerate: FramerateParam,
    registered: HashMap<BufferId, u32>,
    next_id: usize,
    parked_outputs: VecDeque<BufferId>,
    parked_inputs: VecDeque<(BufferId, BufferFlags)>,
    frames_completed: u64,
    frame_limit: Option<u64>,
    eos_pending: bool,
    fail_next_command: Option<ComponentError>,
    error_event_next_transition: Option<ComponentError>,
    refuse_submits: bool,
    settings_change_frame: Option<u64>,
    closed: bool,
}

impl Inner {
    fn send(&self, delivery: Delivery) {
        if self.tx.send(delivery).is_err() {
            log::warn!("loopback delivery thread is gone");
        }
    }

    fn port(&self, port: u32) -> Result<&PortDefinition, Error> {
        self.ports
            .get(&port)
            .ok_or(Error::Component(ComponentError::BadPortIndex))
    }

    /// Every enabled port holds its full buffer count
    fn populated(&self) -> bool {
        self.ports.values().all(|def| {
            let held = self.registered.values().filter(|p| **p == def.port).count();
            !def.enabled || held == def.buffer_count
        })
    }

    fn confirm(&mut self, state: ComponentState) {
        self.state = state;
        self.pending = None;
        self.send(Delivery::Event(ComponentEvent::CommandComplete {
            command: Command::SetState(state),
        }));
    }

    /// Complete one submitted output with a synthetic frame
    fn complete_output(&mut self, id: BufferId) {
        self.frames_completed += 1;
        let sequence = self.frames_completed;
        let capacity = self
            .ports
            .get(&OUTPUT_PORT)
            .map(|def| def.buffer_size)
            .unwrap_or(0);

        let mut flags = BufferFlags::END_OF_FRAME;
        if sequence == 1 {
            flags = flags | BufferFlags::START_TIME;
        }
        if sequence % SYNC_FRAME_INTERVAL == 1 {
            flags = flags | BufferFlags::SYNC_FRAME;
        }
        let limit_hit = self.frame_limit.is_some_and(|limit| sequence >= limit);
        let eos = self.eos_pending || limit_hit;
        if eos {
            self.eos_pending = false;
            flags = flags | BufferFlags::EOS;
        }

        self.send(Delivery::OutputDone {
            id,
            filled: synthetic_filled(capacity, sequence),
            flags,
            timestamp: Some(crate::timestamp()),
        });
        if eos {
            self.send(Delivery::Event(ComponentEvent::BufferFlag {
                port: OUTPUT_PORT,
                flags: BufferFlags::EOS,
            }));
        }
        if self.settings_change_frame == Some(sequence) {
            self.settings_change_frame = None;
            self.send(Delivery::Event(ComponentEvent::PortSettingsChanged {
                port: OUTPUT_PORT,
            }));
        }
    }

    /// Return every parked buffer to the client without consuming it
    fn return_parked(&mut self) {
        while let Some(id) = self.parked_outputs.pop_front() {
            self.send(Delivery::OutputDone {
                id,
                filled: 0,
                flags: BufferFlags::NONE,
                timestamp: None,
            });
        }
        while let Some((id, _)) = self.parked_inputs.pop_front() {
            self.send(Delivery::InputDone(id));
        }
    }

    /// Consume every buffer parked during Pause
    fn resume_parked(&mut self) {
        while let Some((id, flags)) = self.parked_inputs.pop_front() {
            if flags.is_eos() {
                self.eos_pending = true;
            }
            self.send(Delivery::InputDone(id));
        }
        while let Some(id) = self.parked_outputs.pop_front() {
            self.complete_output(id);
        }
    }
}

/// Size a synthetic compressed frame, varying with the sequence
fn synthetic_filled(capacity: usize, sequence: u64) -> usize {
    if capacity == 0 {
        return 0;
    }
    let base = capacity / 2;
    let jitter = sequence as usize % (capacity / 4 + 1);
    (base + jitter).clamp(1, capacity)
}

/// Software component that completes submissions with synthetic frames
///
/// Create with [`open`] for the default configuration or
/// [`LoopbackComponent::create`] to control ports, frame limit and fault
/// injection.
pub struct LoopbackComponent {
    inner: Mutex<Inner>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl LoopbackComponent {
    /// Build the component and start its delivery thread
    pub fn create(
        config: LoopbackConfig,
        callbacks: Arc<dyn ComponentCallbacks>,
    ) -> Result<Arc<LoopbackComponent>, Error> {
        let (tx, rx) = mpsc::channel();
        let interval = config.frame_interval;
        let thread = thread::Builder::new()
            .name("omx-loopback".to_owned())
            .spawn(move || deliver(rx, callbacks, interval))?;

        let mut ports = HashMap::new();
        ports.insert(config.input.port, config.input);
        ports.insert(config.output.port, config.output);

        Ok(Arc::new(LoopbackComponent {
            inner: Mutex::new(Inner {
                tx,
                state: ComponentState::Loaded,
                pending: None,
                ports,
                bitrate: BitrateParam {
                    port: OUTPUT_PORT,
                    target_bps: 4_000_000,
                    variable: true,
                },
                framerate: FramerateParam::from_fps(OUTPUT_PORT, DEFAULT_FRAME_RATE),
                registered: HashMap::new(),
                next_id: 0,
                parked_outputs: VecDeque::new(),
                parked_inputs: VecDeque::new(),
                frames_completed: 0,
                frame_limit: config.frame_limit,
                eos_pending: false,
                fail_next_command: None,
                error_event_next_transition: None,
                refuse_submits: false,
                settings_change_frame: None,
                closed: false,
            }),
            thread: Mutex::new(Some(thread)),
        }))
    }

    /// Fail the next `send_command` synchronously with `code`
    pub fn fail_next_command(&self, code: ComponentError) {
        lock(&self.inner).fail_next_command = Some(code);
    }

    /// Accept the next transition command but fail it with an
    /// asynchronous error event
    pub fn error_event_on_next_transition(&self, code: ComponentError) {
        lock(&self.inner).error_event_next_transition = Some(code);
    }

    /// Refuse every buffer submission while set
    pub fn refuse_submits(&self, refuse: bool) {
        lock(&self.inner).refuse_submits = refuse;
    }

    /// Raise a settings-changed event when output frame `sequence`
    /// completes
    pub fn settings_change_on_frame(&self, sequence: u64) {
        lock(&self.inner).settings_change_frame = Some(sequence);
    }

    /// Output frames completed so far
    pub fn frames_completed(&self) -> u64 {
        lock(&self.inner).frames_completed
    }

    fn stop_delivery(&self) {
        {
            let inner = lock(&self.inner);
            let _ = inner.tx.send(Delivery::Stop);
        }
        if let Some(thread) = lock(&self.thread).take() {
            if thread.join().is_err() {
                log::error!("loopback delivery thread panicked");
            }
        }
    }
}

fn deliver(rx: mpsc::Receiver<Delivery>, callbacks: Arc<dyn ComponentCallbacks>, interval: Duration) {
    for delivery in rx {
        match delivery {
            Delivery::Event(event) => callbacks.on_event(event),
            Delivery::InputDone(id) => callbacks.on_input_returned(id),
            Delivery::OutputDone {
                id,
                filled,
                flags,
                timestamp,
            } => {
                // Synthetic frames carry a timestamp; parked buffers
                // returned unconsumed do not and skip the pacing.
                if !interval.is_zero() && timestamp.is_some() {
                    thread::sleep(interval);
                }
                callbacks.on_output_returned(id, filled, flags, timestamp)
            }
            Delivery::Stop => break,
        }
    }
    log::trace!("loopback delivery thread exiting");
}

impl Component for LoopbackComponent {
    fn send_command(&self, command: Command) -> Result<(), Error> {
        let mut inner = lock(&self.inner);
        if inner.closed {
            return Err(Error::Component(ComponentError::InvalidState));
        }
        if let Some(code) = inner.fail_next_command.take() {
            return Err(Error::Component(code));
        }

        match command {
            Command::SetState(target) => {
                if let Some(code) = inner.error_event_next_transition.take() {
                    inner.send(Delivery::Event(ComponentEvent::Error(code)));
                    return Ok(());
                }
                use ComponentState::*;
                match (inner.state, target) {
                    (Loaded, Idle) => {
                        inner.pending = Some(Idle);
                        if inner.populated() {
                            inner.confirm(Idle);
                        }
                    }
                    (Idle, Loaded) => {
                        inner.pending = Some(Loaded);
                        if inner.registered.is_empty() {
                            inner.confirm(Loaded);
                        }
                    }
                    (Idle, Executing) => inner.confirm(Executing),
                    (Executing, Pause) => inner.confirm(Pause),
                    (Pause, Executing) => {
                        inner.confirm(Executing);
                        inner.resume_parked();
                    }
                    (Executing, Idle) | (Pause, Idle) => {
                        // In-flight buffers come back unconsumed before
                        // the confirmation.
                        inner.return_parked();
                        inner.confirm(Idle);
                    }
                    _ => {
                        log::debug!("refusing {} from {}", target, inner.state);
                        inner.send(Delivery::Event(ComponentEvent::Error(
                            ComponentError::IncorrectStateTransition,
                        )));
                    }
                }
            }
            Command::FlushPort(port) => {
                inner.port(port)?;
                inner.return_parked();
                inner.send(Delivery::Event(ComponentEvent::CommandComplete { command }));
            }
            Command::DisablePort(port) | Command::EnablePort(port) => {
                let enabled = matches!(command, Command::EnablePort(_));
                let def = inner
                    .ports
                    .get_mut(&port)
                    .ok_or(Error::Component(ComponentError::BadPortIndex))?;
                def.enabled = enabled;
                inner.send(Delivery::Event(ComponentEvent::CommandComplete { command }));
            }
            Command::MarkBuffer(port) => {
                inner.port(port)?;
                inner.send(Delivery::Event(ComponentEvent::CommandComplete { command }));
            }
        }
        Ok(())
    }

    fn get_parameter(&self, index: ParamIndex) -> Result<Param, Error> {
        let inner = lock(&self.inner);
        if inner.closed {
            return Err(Error::Component(ComponentError::InvalidState));
        }
        match index {
            ParamIndex::PortCount => Ok(Param::PortCount(PortCountParam {
                ports: inner.ports.len() as u32,
                start_port: INPUT_PORT,
            })),
            ParamIndex::PortDefinition(port) => {
                Ok(Param::PortDefinition(inner.port(port)?.clone()))
            }
            ParamIndex::Bitrate => Ok(Param::Bitrate(inner.bitrate)),
            ParamIndex::Framerate => Ok(Param::Framerate(inner.framerate)),
            ParamIndex::ProfileLevel => {
                Err(Error::Component(ComponentError::UnsupportedIndex))
            }
        }
    }

    fn set_parameter(&self, param: &Param) -> Result<(), Error> {
        let mut inner = lock(&self.inner);
        if inner.closed {
            return Err(Error::Component(ComponentError::InvalidState));
        }
        // Parameters are frozen once buffers exist or a transition is in
        // flight.
        if inner.state != ComponentState::Loaded || inner.pending.is_some() {
            return Err(Error::Component(ComponentError::IncorrectStateOperation));
        }
        match param {
            Param::PortDefinition(def) => {
                inner.port(def.port)?;
                inner.ports.insert(def.port, def.clone());
                Ok(())
            }
            Param::Bitrate(bitrate) => {
                inner.port(bitrate.port)?;
                inner.bitrate = *bitrate;
                Ok(())
            }
            Param::Framerate(framerate) => {
                inner.port(framerate.port)?;
                inner.framerate = *framerate;
                Ok(())
            }
            Param::PortCount(_) | Param::ProfileLevel(_) => {
                Err(Error::Component(ComponentError::UnsupportedIndex))
            }
        }
    }

    fn allocate_buffer(&self, port: u32, size: usize) -> Result<BufferId, Error> {
        let mut inner = lock(&self.inner);
        if inner.closed {
            return Err(Error::Component(ComponentError::InvalidState));
        }
        let def = inner.port(port)?;
        if !def.enabled {
            return Err(Error::Component(ComponentError::PortUnpopulated));
        }
        if size < def.buffer_size {
            return Err(Error::Component(ComponentError::BadParameter));
        }
        // Population is only legal on the way from Loaded to Idle.
        if inner.pending != Some(ComponentState::Idle) {
            return Err(Error::Component(ComponentError::IncorrectStateOperation));
        }

        let id = BufferId(inner.next_id);
        inner.next_id += 1;
        inner.registered.insert(id, port);
        log::trace!("allocated {} on port {}", id, port);
        if inner.populated() {
            inner.confirm(ComponentState::Idle);
        }
        Ok(id)
    }

    fn use_buffer(&self, port: u32, size: usize) -> Result<BufferId, Error> {
        // Client-backed buffers register exactly like component-backed
        // ones here.
        self.allocate_buffer(port, size)
    }

    fn free_buffer(&self, port: u32, id: BufferId) -> Result<(), Error> {
        let mut inner = lock(&self.inner);
        if inner.closed {
            return Err(Error::Component(ComponentError::InvalidState));
        }
        match inner.registered.get(&id) {
            Some(registered) if *registered == port => {}
            Some(_) => return Err(Error::Component(ComponentError::BadPortIndex)),
            None => return Err(Error::Component(ComponentError::BadParameter)),
        }
        // Release is only legal on the way from Idle to Loaded, or after
        // a failed population while still Loaded.
        let releasing = inner.pending == Some(ComponentState::Loaded)
            || inner.state == ComponentState::Loaded;
        if !releasing {
            return Err(Error::Component(ComponentError::IncorrectStateOperation));
        }

        inner.registered.remove(&id);
        log::trace!("released {} on port {}", id, port);
        if inner.pending == Some(ComponentState::Loaded) && inner.registered.is_empty() {
            inner.confirm(ComponentState::Loaded);
        }
        Ok(())
    }

    fn fill_this_buffer(&self, id: BufferId) -> Result<(), Error> {
        let mut inner = lock(&self.inner);
        if inner.closed {
            return Err(Error::Component(ComponentError::InvalidState));
        }
        if inner.refuse_submits {
            return Err(Error::Component(ComponentError::Hardware));
        }
        match inner.registered.get(&id) {
            Some(port) if *port == OUTPUT_PORT => {}
            Some(_) => return Err(Error::Component(ComponentError::BadPortIndex)),
            None => return Err(Error::Component(ComponentError::BadParameter)),
        }
        match inner.state {
            ComponentState::Executing => {
                inner.complete_output(id);
                Ok(())
            }
            ComponentState::Pause => {
                inner.parked_outputs.push_back(id);
                Ok(())
            }
            _ => Err(Error::Component(ComponentError::IncorrectStateOperation)),
        }
    }

    fn empty_this_buffer(
        &self,
        id: BufferId,
        _filled: usize,
        flags: BufferFlags,
    ) -> Result<(), Error> {
        let mut inner = lock(&self.inner);
        if inner.closed {
            return Err(Error::Component(ComponentError::InvalidState));
        }
        if inner.refuse_submits {
            return Err(Error::Component(ComponentError::Hardware));
        }
        match inner.registered.get(&id) {
            Some(port) if *port == INPUT_PORT => {}
            Some(_) => return Err(Error::Component(ComponentError::BadPortIndex)),
            None => return Err(Error::Component(ComponentError::BadParameter)),
        }
        match inner.state {
            ComponentState::Executing => {
                if flags.is_eos() {
                    // The next completed output carries the flag through.
                    inner.eos_pending = true;
                }
                inner.send(Delivery::InputDone(id));
                Ok(())
            }
            ComponentState::Pause => {
                inner.parked_inputs.push_back((id, flags));
                Ok(())
            }
            _ => Err(Error::Component(ComponentError::IncorrectStateOperation)),
        }
    }

    fn state(&self) -> ComponentState {
        lock(&self.inner).state
    }

    fn close(&self) -> Result<(), Error> {
        {
            let mut inner = lock(&self.inner);
            if inner.closed {
                return Ok(());
            }
            if !inner.registered.is_empty() {
                log::error!(
                    "close with {} buffers still registered",
                    inner.registered.len()
                );
                return Err(Error::Component(ComponentError::IncorrectStateOperation));
            }
            inner.closed = true;
        }
        self.stop_delivery();
        Ok(())
    }
}

impl Drop for LoopbackComponent {
    fn drop(&mut self) {
        self.stop_delivery();
    }
}
