// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Session lifecycle and state transition coordination
//!
//! A [`Session`] owns one component handle and everything shared with its
//! callback and drain sides: the buffer pool, the completion queues, the
//! transition slot, and the shutdown signal. The session is the only
//! place state commands are issued from, and the only place buffers are
//! created or destroyed.
//!
//! Transitions follow the population rule of the exchange protocol: a
//! component confirms Loaded to Idle only once every enabled port holds
//! its full buffer count, and Idle to Loaded only once every buffer has
//! been released. The session therefore allocates or frees between
//! sending the command and waiting for the confirmation.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::bridge::{CallbackBridge, TransitionSlot};
use crate::buffer::{BufferBacking, BufferDescriptor, BufferFlags, BufferId, BufferPool, Ownership, OwnershipCensus};
use crate::component::{Command, Component, ComponentCallbacks, ComponentError, ComponentState};
use crate::drain::{DrainConfig, DrainHandle, DrainPolicy, DrainWorker};
use crate::params::{Param, ParamIndex, PortDefinition, PortDirection, DEFAULT_INPUT_BUFFER_COUNT, DEFAULT_OUTPUT_BUFFER_COUNT};
use crate::queue::CompletionQueue;
use crate::signal::{CancelToken, ShutdownSignal};
use crate::{lock, loopback, Error};

/// Default bound on every transition confirmation wait
pub const DEFAULT_TRANSITION_TIMEOUT: Duration = Duration::from_secs(5);

/// Pipeline state shared between the session, the callback bridge, and
/// the drain workers
pub(crate) struct Shared {
    pub(crate) pool: BufferPool,
    pub(crate) input_queue: CompletionQueue,
    pub(crate) output_queue: CompletionQueue,
    pub(crate) transition: TransitionSlot,
    pub(crate) shutdown: ShutdownSignal,
    pub(crate) cancel: CancelToken,
    pub(crate) input_sequence: AtomicU64,
    pub(crate) output_sequence: AtomicU64,
    pub(crate) eos: AtomicBool,
    pub(crate) unmatched_events: AtomicU64,
    settings_changed: Mutex<HashSet<u32>>,
}

impl Shared {
    pub(crate) fn new(input_capacity: usize, output_capacity: usize, cancel: CancelToken) -> Self {
        Shared {
            pool: BufferPool::new(),
            input_queue: CompletionQueue::new(input_capacity),
            output_queue: CompletionQueue::new(output_capacity),
            transition: TransitionSlot::new(),
            shutdown: ShutdownSignal::new(),
            cancel,
            input_sequence: AtomicU64::new(0),
            output_sequence: AtomicU64::new(0),
            eos: AtomicBool::new(false),
            unmatched_events: AtomicU64::new(0),
            settings_changed: Mutex::new(HashSet::new()),
        }
    }

    pub(crate) fn flag_settings_changed(&self, port: u32) {
        lock(&self.settings_changed).insert(port);
    }

    pub(crate) fn settings_changed(&self, port: u32) -> bool {
        lock(&self.settings_changed).contains(&port)
    }

    pub(crate) fn take_settings_changed(&self, port: u32) -> bool {
        lock(&self.settings_changed).remove(&port)
    }

    pub(crate) fn eos_seen(&self) -> bool {
        self.eos.load(Ordering::Relaxed)
    }
}

type ComponentFactory =
    Box<dyn FnOnce(Arc<dyn ComponentCallbacks>) -> Result<Arc<dyn Component>, Error> + Send>;

enum ComponentSource {
    Name(String),
    Factory(ComponentFactory),
}

/// Builder for a [`Session`]
///
/// Obtained from [`create_session`]. Buffer count and geometry overrides
/// are written to the component with `set_parameter` while it is still
/// Loaded, then read back, so the session always works with the counts
/// the component actually accepted.
pub struct SessionBuilder {
    source: ComponentSource,
    input_buffers: Option<usize>,
    output_buffers: Option<usize>,
    buffer_size: Option<usize>,
    resolution: Option<(u32, u32)>,
    transition_timeout: Option<Duration>,
    cancel: Option<CancelToken>,
}

impl SessionBuilder {
    /// Name of the component to open
    pub fn with_component_name(mut self, name: &str) -> SessionBuilder {
        self.source = ComponentSource::Name(name.to_owned());
        self
    }

    /// Supply the component yourself instead of opening one by name
    ///
    /// The factory receives the callback bridge the session registers
    /// with the component.
    pub fn with_component<F>(mut self, factory: F) -> SessionBuilder
    where
        F: FnOnce(Arc<dyn ComponentCallbacks>) -> Result<Arc<dyn Component>, Error> + Send + 'static,
    {
        self.source = ComponentSource::Factory(Box::new(factory));
        self
    }

    /// Buffer count for input ports; 0 disables them
    pub fn with_input_buffers(mut self, count: usize) -> SessionBuilder {
        self.input_buffers = Some(count);
        self
    }

    /// Buffer count for output ports
    pub fn with_output_buffers(mut self, count: usize) -> SessionBuilder {
        self.output_buffers = Some(count);
        self
    }

    /// Byte size for every buffer, overriding the frame-derived size
    pub fn with_buffer_size(mut self, size: usize) -> SessionBuilder {
        self.buffer_size = Some(size);
        self
    }

    /// Frame geometry applied to every port
    pub fn with_resolution(mut self, width: u32, height: u32) -> SessionBuilder {
        self.resolution = Some((width, height));
        self
    }

    /// Bound on each transition confirmation wait; `None` waits forever
    pub fn with_transition_timeout(mut self, timeout: Option<Duration>) -> SessionBuilder {
        self.transition_timeout = timeout;
        self
    }

    /// Cancellation token observed by every blocking wait
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> SessionBuilder {
        self.cancel = Some(cancel);
        self
    }

    /// Open the component and assemble the session
    pub fn build(self) -> Result<Session, Error> {
        let cancel = self.cancel.unwrap_or_default();
        let shared = Arc::new(Shared::new(
            self.input_buffers.unwrap_or(DEFAULT_INPUT_BUFFER_COUNT).max(1),
            self.output_buffers.unwrap_or(DEFAULT_OUTPUT_BUFFER_COUNT).max(1),
            cancel.clone(),
        ));
        let callbacks: Arc<dyn ComponentCallbacks> =
            Arc::new(CallbackBridge::new(shared.clone()));

        let component = match self.source {
            ComponentSource::Name(name) => loopback::open(&name, callbacks)?,
            ComponentSource::Factory(factory) => factory(callbacks)?,
        };

        let count = match component.get_parameter(ParamIndex::PortCount)? {
            Param::PortCount(count) => count,
            _ => return Err(Error::Component(ComponentError::UnsupportedIndex)),
        };

        let mut ports = Vec::with_capacity(count.ports as usize);
        for port in count.start_port..count.start_port + count.ports {
            let mut def = query_port_definition(component.as_ref(), port)?;
            let mut dirty = false;

            if let Some((width, height)) = self.resolution {
                if (def.width, def.height) != (width, height) {
                    def = def.with_resolution(width, height);
                    dirty = true;
                }
            }
            if let Some(size) = self.buffer_size {
                if def.buffer_size != size {
                    def.buffer_size = size;
                    dirty = true;
                }
            }
            let requested = match def.direction {
                PortDirection::Input => self.input_buffers,
                PortDirection::Output => self.output_buffers,
            };
            if let Some(requested) = requested {
                if requested == 0 {
                    def.enabled = false;
                    def.buffer_count = 0;
                } else {
                    def = def.with_buffer_count(requested);
                }
                dirty = true;
            }

            if dirty {
                component.set_parameter(&Param::PortDefinition(def.clone()))?;
                def = query_port_definition(component.as_ref(), port)?;
            }
            log::debug!("configured {}", def);
            ports.push(def);
        }

        Ok(Session {
            component,
            shared,
            ports,
            state: ComponentState::Loaded,
            transition_timeout: self.transition_timeout,
            closed: false,
        })
    }
}

impl Default for SessionBuilder {
    fn default() -> SessionBuilder {
        SessionBuilder {
            source: ComponentSource::Name("loopback.video".to_owned()),
            input_buffers: None,
            output_buffers: None,
            buffer_size: None,
            resolution: None,
            transition_timeout: Some(DEFAULT_TRANSITION_TIMEOUT),
            cancel: None,
        }
    }
}

/// Create a session builder with default settings
pub fn create_session() -> SessionBuilder {
    SessionBuilder::default()
}

fn query_port_definition(component: &dyn Component, port: u32) -> Result<PortDefinition, Error> {
    match component.get_parameter(ParamIndex::PortDefinition(port))? {
        Param::PortDefinition(def) => Ok(def),
        _ => Err(Error::Component(ComponentError::UnsupportedIndex)),
    }
}

/// One open component and the pipeline plumbing around it
pub struct Session {
    component: Arc<dyn Component>,
    shared: Arc<Shared>,
    ports: Vec<PortDefinition>,
    state: ComponentState,
    transition_timeout: Option<Duration>,
    closed: bool,
}

impl Session {
    /// Drive the component to `target` and wait for the confirmation
    ///
    /// Already settled in `target` is a no-op: no command is sent and no
    /// confirmation is consumed, which keeps a settled component from
    /// deadlocking a retry. Loaded to Idle populates every enabled port
    /// before waiting; Idle to Loaded releases every buffer before
    /// waiting. An error event during the wait surfaces as
    /// [`Error::Transition`] and is not retried.
    pub fn transition_to(&mut self, target: ComponentState) -> Result<(), Error> {
        let cancel = self.shared.cancel.clone();
        self.transition_with(target, &cancel)
    }

    fn transition_with(&mut self, target: ComponentState, cancel: &CancelToken) -> Result<(), Error> {
        let current = self.component.state();
        if current == target {
            log::debug!("component already {}, transition skipped", target);
            self.state = current;
            return Ok(());
        }

        self.shared.transition.begin(target)?;
        if let Err(err) = self.component.send_command(Command::SetState(target)) {
            self.shared.transition.abort();
            return Err(err);
        }

        // Population happens between the command and the wait; the
        // component withholds its confirmation until the counts match.
        let prepared = if current == ComponentState::Loaded && target == ComponentState::Idle {
            self.populate_ports()
        } else if current == ComponentState::Idle && target == ComponentState::Loaded {
            self.depopulate_ports()
        } else {
            Ok(())
        };
        if let Err(err) = prepared {
            self.shared.transition.abort();
            return Err(err);
        }

        let confirmed = self
            .shared
            .transition
            .wait(cancel, self.transition_timeout)?;
        self.state = confirmed;
        log::info!("component reached {}", confirmed);
        Ok(())
    }

    fn populate_ports(&mut self) -> Result<(), Error> {
        for index in 0..self.ports.len() {
            let port = self.ports[index].port;
            let def = query_port_definition(self.component.as_ref(), port)?;
            self.ports[index] = def.clone();
            if !def.enabled || def.buffer_count == 0 {
                continue;
            }

            let queue = match def.direction {
                PortDirection::Input => &self.shared.input_queue,
                PortDirection::Output => &self.shared.output_queue,
            };
            queue.set_capacity(def.buffer_count);

            for _ in 0..def.buffer_count {
                let id = self.component.allocate_buffer(def.port, def.buffer_size)?;
                self.shared
                    .pool
                    .insert(id, def.port, def.buffer_size, BufferBacking::Component);
                log::trace!("allocated buffer {} on port {}", id, def.port);
            }
            log::debug!(
                "port {} populated with {} buffers of {} bytes",
                def.port,
                def.buffer_count,
                def.buffer_size
            );
        }
        Ok(())
    }

    fn depopulate_ports(&mut self) -> Result<(), Error> {
        let reclaimed = self.reclaim_completions();
        if reclaimed > 0 {
            log::debug!("reclaimed {} queued completions before release", reclaimed);
        }
        for def in &self.ports {
            for id in self.shared.pool.ids_for_port(def.port) {
                let owner = self.shared.pool.owner(id)?;
                if owner != Ownership::ClientFree {
                    return Err(Error::OwnershipViolation {
                        buffer: id.0,
                        expected: Ownership::ClientFree,
                        actual: owner,
                    });
                }
                self.component.free_buffer(def.port, id)?;
                self.shared.pool.remove(id)?;
                log::trace!("released buffer {} on port {}", id, def.port);
            }
        }
        Ok(())
    }

    /// Hand every undrained completion back to the client side
    ///
    /// Pops both queues, then sweeps the pool for buffers still tagged
    /// awaiting drain without a queue entry (a failed resubmission leaves
    /// its buffer in that state). Used before releasing buffers and
    /// during teardown, when nothing will drain the queues any more.
    pub fn reclaim_completions(&self) -> usize {
        let mut reclaimed = 0;
        for queue in [&self.shared.input_queue, &self.shared.output_queue] {
            while let Some(id) = queue.pop() {
                match self.shared.pool.mark_reclaimed(id) {
                    Ok(()) => reclaimed += 1,
                    Err(err) => log::error!("reclaim of buffer {} failed: {}", id, err),
                }
            }
        }
        for id in self
            .shared
            .pool
            .ids_with_owner(Ownership::CompletedAwaitingDrain)
        {
            match self.shared.pool.mark_reclaimed(id) {
                Ok(()) => reclaimed += 1,
                Err(err) => log::error!("reclaim of stranded buffer {} failed: {}", id, err),
            }
        }
        reclaimed
    }

    /// Submit every client-free output buffer to the component
    ///
    /// Called after reaching Executing to prime the exchange. Returns the
    /// number submitted.
    pub fn submit_all_outputs(&self) -> Result<usize, Error> {
        let mut submitted = 0;
        for def in self.ports.iter().filter(|def| {
            def.enabled && def.direction == PortDirection::Output
        }) {
            for id in self.shared.pool.ids_for_port(def.port) {
                if self.shared.pool.owner(id)? != Ownership::ClientFree {
                    continue;
                }
                self.submit_output(id)?;
                submitted += 1;
            }
        }
        log::debug!("primed {} output buffers", submitted);
        Ok(submitted)
    }

    /// Submit one output buffer for the component to fill
    pub fn submit_output(&self, id: BufferId) -> Result<(), Error> {
        self.shared.pool.mark_submitted(id)?;
        if let Err(err) = self.component.fill_this_buffer(id) {
            self.shared
                .pool
                .rollback_submit(id, Ownership::ClientFree)?;
            return Err(err);
        }
        Ok(())
    }

    /// Submit one filled input buffer for the component to consume
    pub fn submit_input(&self, id: BufferId, filled: usize, flags: BufferFlags) -> Result<(), Error> {
        self.shared.pool.mark_submitted(id)?;
        if let Err(err) = self.component.empty_this_buffer(id, filled, flags) {
            self.shared
                .pool
                .rollback_submit(id, Ownership::ClientFree)?;
            return Err(err);
        }
        Ok(())
    }

    /// Spawn a drain worker over this session's pipeline
    pub fn spawn_drain<P>(&self, policy: P, config: DrainConfig) -> Result<DrainHandle, Error>
    where
        P: DrainPolicy + 'static,
    {
        DrainWorker::spawn(self.shared.clone(), self.component.clone(), policy, config)
    }

    /// The last state a confirmation event reported
    pub fn state(&self) -> ComponentState {
        self.state
    }

    /// Port definitions as last read from the component
    pub fn ports(&self) -> &[PortDefinition] {
        &self.ports
    }

    /// Descriptor ids currently pooled on a port
    pub fn buffers_on_port(&self, port: u32) -> Vec<BufferId> {
        self.shared.pool.ids_for_port(port)
    }

    /// Look up a pooled buffer descriptor
    pub fn buffer(&self, id: BufferId) -> Result<Arc<Mutex<BufferDescriptor>>, Error> {
        self.shared.pool.slot(id)
    }

    /// Ownership counts across every pooled buffer
    pub fn census(&self) -> OwnershipCensus {
        self.shared.pool.census()
    }

    /// Ownership counts for one port
    pub fn census_port(&self, port: u32) -> OwnershipCensus {
        self.shared.pool.census_port(port)
    }

    /// True once end of stream has been observed on any port
    pub fn eos_seen(&self) -> bool {
        self.shared.eos_seen()
    }

    /// True while a settings-changed notice for the port is unhandled
    pub fn port_settings_changed(&self, port: u32) -> bool {
        self.shared.settings_changed(port)
    }

    /// Re-read a port definition after a settings-changed notice
    ///
    /// Clears the notice; the returned definition replaces the cached
    /// one.
    pub fn refresh_port_definition(&mut self, port: u32) -> Result<PortDefinition, Error> {
        let def = query_port_definition(self.component.as_ref(), port)?;
        let slot = self
            .ports
            .iter_mut()
            .find(|existing| existing.port == port)
            .ok_or(Error::UnknownPort(port))?;
        *slot = def.clone();
        self.shared.take_settings_changed(port);
        log::info!("refreshed {}", def);
        Ok(def)
    }

    /// The signal fired when a drain worker reaches its stop condition
    pub fn shutdown_signal(&self) -> &ShutdownSignal {
        &self.shared.shutdown
    }

    /// The cancellation token every wait in this session observes
    pub fn cancel_token(&self) -> CancelToken {
        self.shared.cancel.clone()
    }

    /// Count of callback events that had no transition outstanding
    pub fn unmatched_events(&self) -> u64 {
        self.shared.unmatched_events.load(Ordering::Relaxed)
    }

    /// Tear the pipeline down as far as it will go
    ///
    /// Walks Executing or Pause back to Idle, releases every buffer on
    /// the way to Loaded, then closes the component handle. Every step
    /// runs even after an earlier one fails; the first failure is
    /// returned. Teardown waits ignore the session cancellation token so
    /// an interrupt still tears down cleanly.
    pub fn shutdown(&mut self) -> Result<(), Error> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let teardown_cancel = CancelToken::new();
        let mut first_error: Option<Error> = None;

        let live = self.component.state();
        if matches!(live, ComponentState::Executing | ComponentState::Pause) {
            if let Err(err) = self.transition_with(ComponentState::Idle, &teardown_cancel) {
                log::warn!("teardown to Idle failed: {}", err);
                first_error.get_or_insert(err);
            }
        }

        let reclaimed = self.reclaim_completions();
        if reclaimed > 0 {
            log::debug!("reclaimed {} completions during teardown", reclaimed);
        }

        if self.component.state() == ComponentState::Idle {
            if let Err(err) = self.transition_with(ComponentState::Loaded, &teardown_cancel) {
                log::warn!("teardown to Loaded failed: {}", err);
                first_error.get_or_insert(err);
            }
        }

        self.shared.input_queue.close();
        self.shared.output_queue.close();

        let census = self.shared.pool.census();
        if census.total() > 0 {
            log::error!("{} buffers still pooled at close ({})", census.total(), census);
        }
        if let Err(err) = self.component.close() {
            log::warn!("component close failed: {}", err);
            first_error.get_or_insert(err);
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let session = create_session().build().unwrap();
        assert_eq!(session.state(), ComponentState::Loaded);
        assert_eq!(session.ports().len(), 2);
        assert_eq!(session.ports()[0].buffer_count, DEFAULT_INPUT_BUFFER_COUNT);
        assert_eq!(session.ports()[1].buffer_count, DEFAULT_OUTPUT_BUFFER_COUNT);
        assert_eq!(session.census().total(), 0);
    }

    #[test]
    fn test_unknown_component_name() {
        let result = create_session().with_component_name("no.such.component").build();
        assert!(matches!(
            result,
            Err(Error::Component(ComponentError::ComponentNotFound))
        ));
    }

    #[test]
    fn test_populate_and_depopulate() {
        let mut session = create_session()
            .with_input_buffers(2)
            .with_output_buffers(3)
            .build()
            .unwrap();

        session.transition_to(ComponentState::Idle).unwrap();
        let census = session.census();
        assert_eq!(census.total(), 5);
        assert!(census.is_all_free());

        session.transition_to(ComponentState::Loaded).unwrap();
        assert_eq!(session.census().total(), 0);
        session.shutdown().unwrap();
    }

    #[test]
    fn test_transition_to_settled_state_is_a_no_op() {
        let mut session = create_session().build().unwrap();
        session.transition_to(ComponentState::Loaded).unwrap();
        assert_eq!(session.state(), ComponentState::Loaded);
        assert_eq!(session.unmatched_events(), 0);
    }

    #[test]
    fn test_buffer_count_override_is_written_back() {
        let session = create_session()
            .with_input_buffers(0)
            .with_output_buffers(4)
            .build()
            .unwrap();
        let input = &session.ports()[0];
        assert!(!input.enabled);
        assert_eq!(session.ports()[1].buffer_count, 4);
    }

    #[test]
    fn test_resolution_override() {
        let session = create_session()
            .with_resolution(1280, 720)
            .build()
            .unwrap();
        for def in session.ports() {
            assert_eq!((def.width, def.height), (1280, 720));
            assert_eq!(def.buffer_size, def.format.frame_size(1280, 720));
        }
    }

    #[test]
    fn test_shutdown_from_executing() {
        let mut session = create_session()
            .with_input_buffers(0)
            .build()
            .unwrap();
        session.transition_to(ComponentState::Idle).unwrap();
        session.transition_to(ComponentState::Executing).unwrap();
        let submitted = session.submit_all_outputs().unwrap();
        assert_eq!(submitted, DEFAULT_OUTPUT_BUFFER_COUNT);

        session.shutdown().unwrap();
        assert_eq!(session.census().total(), 0);
        // Second shutdown is a no-op.
        session.shutdown().unwrap();
    }

    #[test]
    fn test_submit_all_outputs_requires_population() {
        let session = create_session().build().unwrap();
        // Nothing pooled while Loaded, so nothing to submit.
        assert_eq!(session.submit_all_outputs().unwrap(), 0);
    }
}
