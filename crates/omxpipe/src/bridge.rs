// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Callback bridge and transition wait slot
//!
//! The component delivers events and returned buffers on its own thread.
//! [`CallbackBridge`] is the crate's implementation of
//! [`crate::component::ComponentCallbacks`]: it tags descriptors, pushes
//! completions onto the bounded queues, and releases transition waits. No
//! policy code runs here and nothing here blocks; the delivery thread must
//! get back to the component quickly.
//!
//! [`TransitionSlot`] holds the single outstanding transition request. A
//! request receives exactly one terminal event: the confirmation, a latched
//! component error, a timeout, or a cancellation. Whichever arrives first
//! consumes the request, so an abandoned wait never leaves a stale token
//! behind for the next transition to trip over.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use unix_ts::Timestamp;

use crate::buffer::{BufferFlags, BufferId};
use crate::component::{Command, ComponentCallbacks, ComponentError, ComponentEvent, ComponentState};
use crate::session::Shared;
use crate::signal::CancelToken;
use crate::{lock, Error};

/// How often a transition wait rechecks its cancellation token
const WAIT_SLICE: Duration = Duration::from_millis(20);

struct Pending {
    target: ComponentState,
    outcome: Option<Result<ComponentState, ComponentError>>,
}

/// The single outstanding state transition request
///
/// `begin` claims the slot, the callback side resolves it through
/// `complete` or `fail`, and `wait` consumes the result. At most one
/// request exists at a time; a second `begin` while one is outstanding is
/// refused with [`Error::TransitionPending`].
pub struct TransitionSlot {
    inner: Mutex<Option<Pending>>,
    condvar: Condvar,
}

impl TransitionSlot {
    pub fn new() -> Self {
        TransitionSlot {
            inner: Mutex::new(None),
            condvar: Condvar::new(),
        }
    }

    /// Claim the slot for a transition to `target`
    pub fn begin(&self, target: ComponentState) -> Result<(), Error> {
        let mut inner = lock(&self.inner);
        if inner.is_some() {
            return Err(Error::TransitionPending);
        }
        *inner = Some(Pending {
            target,
            outcome: None,
        });
        Ok(())
    }

    /// Release the slot without waiting
    ///
    /// Used when the command that claimed the slot failed synchronously
    /// and no confirmation will ever arrive.
    pub fn abort(&self) {
        let mut inner = lock(&self.inner);
        *inner = None;
    }

    /// True while a request is outstanding
    pub fn is_pending(&self) -> bool {
        lock(&self.inner).is_some()
    }

    /// Resolve the outstanding request with a confirmed state
    ///
    /// Returns `false` when no unresolved request is outstanding; the
    /// caller decides whether that is worth a diagnostic.
    pub fn complete(&self, state: ComponentState) -> bool {
        self.resolve(Ok(state))
    }

    /// Resolve the outstanding request with a component error
    pub fn fail(&self, error: ComponentError) -> bool {
        self.resolve(Err(error))
    }

    fn resolve(&self, outcome: Result<ComponentState, ComponentError>) -> bool {
        let mut inner = lock(&self.inner);
        match inner.as_mut() {
            Some(pending) if pending.outcome.is_none() => {
                pending.outcome = Some(outcome);
                self.condvar.notify_all();
                true
            }
            _ => false,
        }
    }

    /// Block until the outstanding request resolves, then consume it
    ///
    /// Timeout and cancellation also consume the request, clearing the
    /// slot for the next transition.
    pub fn wait(
        &self,
        cancel: &CancelToken,
        timeout: Option<Duration>,
    ) -> Result<ComponentState, Error> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut inner = lock(&self.inner);
        loop {
            let (target, outcome) = match inner.as_mut() {
                Some(pending) => (pending.target, pending.outcome.take()),
                None => return Err(Error::QueueFault("transition wait without a request")),
            };
            if let Some(outcome) = outcome {
                *inner = None;
                return outcome.map_err(|source| Error::Transition { target, source });
            }
            if cancel.is_cancelled() {
                *inner = None;
                return Err(Error::Cancelled);
            }
            let mut slice = WAIT_SLICE;
            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    *inner = None;
                    return Err(Error::TransitionTimeout { target });
                }
                slice = slice.min(deadline - now);
            }
            let (guard, _) = self
                .condvar
                .wait_timeout(inner, slice)
                .unwrap_or_else(|e| e.into_inner());
            inner = guard;
        }
    }
}

impl Default for TransitionSlot {
    fn default() -> Self {
        TransitionSlot::new()
    }
}

/// Routes component callbacks into the shared pipeline state
///
/// One bridge instance is registered with the component at open time and
/// lives for the whole session.
pub struct CallbackBridge {
    shared: Arc<Shared>,
}

impl CallbackBridge {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        CallbackBridge { shared }
    }

    fn note_unmatched(&self, what: &str) {
        self.shared.unmatched_events.fetch_add(1, Ordering::Relaxed);
        log::warn!("{} arrived with no transition outstanding", what);
    }

    fn deliver(&self, queue_name: &str, result: Result<(), Error>) {
        if let Err(err) = result {
            // A full queue means the buffer exchange protocol was violated.
            // Nothing can be done from callback context except fault the
            // pipeline so the coordinator tears it down.
            log::error!("{} delivery failed: {}", queue_name, err);
            self.shared.shutdown.fire();
        }
    }
}

impl ComponentCallbacks for CallbackBridge {
    fn on_event(&self, event: ComponentEvent) {
        match event {
            ComponentEvent::CommandComplete {
                command: Command::SetState(state),
            } => {
                if !self.shared.transition.complete(state) {
                    self.note_unmatched("state confirmation");
                }
            }
            ComponentEvent::CommandComplete { command } => {
                log::debug!("command complete: {}", command);
            }
            ComponentEvent::Error(error) => {
                if !self.shared.transition.fail(error) {
                    self.note_unmatched("component error");
                    log::error!("component error outside transition: {}", error);
                }
            }
            ComponentEvent::PortSettingsChanged { port } => {
                self.shared.flag_settings_changed(port);
                log::info!("port {} settings changed", port);
            }
            ComponentEvent::BufferFlag { port, flags } => {
                if flags.is_eos() {
                    self.shared.eos.store(true, Ordering::Relaxed);
                    log::debug!("end of stream flagged on port {}", port);
                }
            }
            other => {
                log::trace!("event ignored: {}", other);
            }
        }
    }

    fn on_input_returned(&self, id: BufferId) {
        let sequence = self.shared.input_sequence.fetch_add(1, Ordering::Relaxed);
        match self
            .shared
            .pool
            .mark_completed(id, 0, BufferFlags::NONE, sequence, None)
        {
            Ok(()) => self.deliver("input queue", self.shared.input_queue.push(id)),
            Err(err) => log::error!("input return rejected: {}", err),
        }
    }

    fn on_output_returned(
        &self,
        id: BufferId,
        filled: usize,
        flags: BufferFlags,
        timestamp: Option<Timestamp>,
    ) {
        if flags.is_eos() {
            self.shared.eos.store(true, Ordering::Relaxed);
        }
        let sequence = self.shared.output_sequence.fetch_add(1, Ordering::Relaxed);
        match self
            .shared
            .pool
            .mark_completed(id, filled, flags, sequence, timestamp)
        {
            Ok(()) => self.deliver("output queue", self.shared.output_queue.push(id)),
            Err(err) => log::error!("output return rejected: {}", err),
        }
    }
}
