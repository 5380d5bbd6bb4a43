// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Drain worker consuming completed buffers under a caller policy
//!
//! The worker thread alternates between waiting on the completion queue's
//! ready signal and draining it in bursts. Every popped buffer is handed
//! to the [`DrainPolicy`] exactly once, in completion order, then either
//! resubmitted to the component or retired to the client-free state. A
//! frame budget or an end-of-stream flag switches the worker to
//! retire-only mode and fires the session shutdown signal, once.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use unix_ts::Timestamp;

use crate::buffer::{BufferDescriptor, BufferFlags, BufferId, Ownership};
use crate::component::Component;
use crate::params::PortDirection;
use crate::queue::{CompletionQueue, WaitOutcome};
use crate::session::Shared;
use crate::signal::CancelToken;
use crate::{lock, Error};

/// Scheduling priority requested for the worker thread
const DRAIN_THREAD_PRIORITY: libc::c_int = 10;

/// How long one ready wait blocks before rechecking the stop flag
const STOP_POLL: Duration = Duration::from_millis(50);

/// What to do with a buffer after the policy has seen it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainAction {
    /// Hand the buffer back to the component for another pass
    Resubmit,

    /// Return the buffer to the client-free pool
    Retire,
}

/// Per-buffer hook run by the drain worker
///
/// Implementations own whatever the drained payload feeds: a file writer,
/// a frame counter, a checksum. The worker calls [`on_buffer`] from its
/// own thread, one buffer at a time, in completion order.
///
/// [`on_buffer`]: DrainPolicy::on_buffer
pub trait DrainPolicy: Send {
    /// Inspect one drained buffer and choose its fate
    ///
    /// The buffer is exclusively held for the duration of the call; the
    /// payload may be read or rewritten (input refill writes new bytes
    /// and calls [`DrainedBuffer::set_filled`]). Returning an error
    /// retires the buffer and is counted against the worker.
    fn on_buffer(&mut self, buffer: &mut DrainedBuffer<'_>) -> Result<DrainAction, Error>;

    /// Called when a resubmission the policy asked for fails
    ///
    /// The buffer stays awaiting drain and the worker stops; this is the
    /// last notification before [`DrainHandle::join`] returns.
    fn on_resubmit_error(&mut self, id: BufferId, error: &Error) {
        let _ = (id, error);
    }
}

/// Exclusive view of one completed buffer during the policy call
pub struct DrainedBuffer<'a> {
    descriptor: &'a mut BufferDescriptor,
    sequence: u64,
}

impl DrainedBuffer<'_> {
    pub fn id(&self) -> BufferId {
        self.descriptor.id()
    }

    pub fn port(&self) -> u32 {
        self.descriptor.port()
    }

    pub fn capacity(&self) -> usize {
        self.descriptor.capacity()
    }

    pub fn filled(&self) -> usize {
        self.descriptor.filled()
    }

    /// Bytes the component produced into this buffer
    pub fn data(&self) -> &[u8] {
        self.descriptor.payload()
    }

    /// Whole backing store, for rewriting the payload before resubmit
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.descriptor.data
    }

    /// Set the valid byte count, clamped to the capacity
    pub fn set_filled(&mut self, filled: usize) {
        self.descriptor.filled = filled.min(self.descriptor.data.len());
        self.descriptor.offset = 0;
    }

    pub fn flags(&self) -> BufferFlags {
        self.descriptor.flags()
    }

    pub fn set_flags(&mut self, flags: BufferFlags) {
        self.descriptor.flags = flags;
    }

    pub fn timestamp(&self) -> Option<Timestamp> {
        self.descriptor.timestamp()
    }

    /// Completion order of this buffer within its port direction
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn is_eos(&self) -> bool {
        self.descriptor.flags().is_eos()
    }
}

/// Drain worker settings
#[derive(Debug, Clone)]
pub struct DrainConfig {
    direction: PortDirection,
    frame_budget: Option<u64>,
}

impl DrainConfig {
    /// Which completion queue the worker consumes
    pub fn with_direction(mut self, direction: PortDirection) -> DrainConfig {
        self.direction = direction;
        self
    }

    /// Stop resubmitting and fire the shutdown signal after this many
    /// buffers
    pub fn with_frame_budget(mut self, budget: u64) -> DrainConfig {
        self.frame_budget = Some(budget);
        self
    }
}

impl Default for DrainConfig {
    fn default() -> DrainConfig {
        DrainConfig {
            direction: PortDirection::Output,
            frame_budget: None,
        }
    }
}

/// Totals accumulated by a drain worker
#[derive(Debug, Clone, Default)]
pub struct DrainReport {
    /// Buffers handed to the policy
    pub frames: u64,

    /// Valid payload bytes across those buffers
    pub bytes: u64,

    /// Buffers handed back to the component
    pub resubmitted: u64,

    /// Buffers returned to the client-free pool
    pub retired: u64,

    /// Resubmissions that failed synchronously
    pub resubmit_failures: u64,

    /// An end-of-stream flagged buffer was drained
    pub eos: bool,

    /// The frame budget was reached
    pub budget_reached: bool,
}

/// Running drain worker
///
/// Returned by [`Session::spawn_drain`]. Dropping the handle without
/// calling [`join`] detaches the worker; it keeps running until its
/// queue closes.
///
/// [`Session::spawn_drain`]: crate::session::Session::spawn_drain
/// [`join`]: DrainHandle::join
pub struct DrainHandle {
    stop: Arc<AtomicBool>,
    report: Arc<Mutex<DrainReport>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl DrainHandle {
    /// Ask the worker to exit after its current burst
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// Snapshot of the totals so far
    pub fn report(&self) -> DrainReport {
        lock(&self.report).clone()
    }

    /// Stop the worker, wait for it, and return the final totals
    pub fn join(mut self) -> DrainReport {
        self.stop();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("drain worker panicked");
            }
        }
        lock(&self.report).clone()
    }
}

pub(crate) struct DrainWorker<P: DrainPolicy> {
    shared: Arc<Shared>,
    component: Arc<dyn Component>,
    policy: P,
    direction: PortDirection,
    frame_budget: Option<u64>,
    stop: Arc<AtomicBool>,
    report: Arc<Mutex<DrainReport>>,
    cancel: CancelToken,
    retiring: bool,
}

impl<P: DrainPolicy + 'static> DrainWorker<P> {
    pub(crate) fn spawn(
        shared: Arc<Shared>,
        component: Arc<dyn Component>,
        policy: P,
        config: DrainConfig,
    ) -> Result<DrainHandle, Error> {
        let stop = Arc::new(AtomicBool::new(false));
        let report = Arc::new(Mutex::new(DrainReport::default()));
        let cancel = shared.cancel.clone();
        let worker = DrainWorker {
            shared,
            component,
            policy,
            direction: config.direction,
            frame_budget: config.frame_budget,
            stop: stop.clone(),
            report: report.clone(),
            cancel,
            retiring: false,
        };
        let thread = thread::Builder::new()
            .name("omx-drain".to_owned())
            .spawn(move || worker.run())?;
        Ok(DrainHandle {
            stop,
            report,
            thread: Some(thread),
        })
    }

    fn queue(&self) -> &CompletionQueue {
        match self.direction {
            PortDirection::Input => &self.shared.input_queue,
            PortDirection::Output => &self.shared.output_queue,
        }
    }

    fn run(mut self) {
        raise_thread_priority();
        log::debug!("drain worker started on {} completions", self.direction);

        loop {
            if self.stop.load(Ordering::Relaxed) || self.cancel.is_cancelled() {
                break;
            }
            match self.queue().wait_ready(&self.cancel, Some(STOP_POLL)) {
                WaitOutcome::Ready => {}
                WaitOutcome::TimedOut => continue,
                WaitOutcome::Cancelled | WaitOutcome::Closed => break,
            }
            // Every buffer popped in this burst is fully processed even
            // if a stop request arrives partway through.
            while let Some(id) = self.queue().pop() {
                if !self.process(id) {
                    return;
                }
            }
        }
        log::debug!("drain worker exiting");
    }

    /// Handle one drained buffer; false stops the worker
    fn process(&mut self, id: BufferId) -> bool {
        let slot = match self.shared.pool.slot(id) {
            Ok(slot) => slot,
            Err(err) => {
                log::error!("drained unknown buffer {}: {}", id, err);
                return true;
            }
        };

        // Once the worker is retiring, later completions bypass the
        // policy and the counters; they only need their tags returned.
        if self.retiring {
            return self.retire(id);
        }

        let (action, eos) = {
            let mut descriptor = lock(&slot);
            if descriptor.owner() != Ownership::CompletedAwaitingDrain {
                log::error!(
                    "buffer {} reached the drain while {}",
                    id,
                    descriptor.owner()
                );
                return true;
            }
            let sequence = descriptor.sequence().unwrap_or(0);
            let mut drained = DrainedBuffer {
                descriptor: &mut *descriptor,
                sequence,
            };
            let eos = drained.is_eos();
            let filled = drained.filled() as u64;
            let action = match self.policy.on_buffer(&mut drained) {
                Ok(action) => action,
                Err(err) => {
                    log::warn!("drain policy failed on buffer {}: {}", id, err);
                    DrainAction::Retire
                }
            };
            {
                let mut report = lock(&self.report);
                report.frames += 1;
                report.bytes += filled;
            }
            (action, eos)
        };

        if eos {
            lock(&self.report).eos = true;
            self.enter_retirement("end of stream");
        }
        if let Some(budget) = self.frame_budget {
            if lock(&self.report).frames >= budget {
                lock(&self.report).budget_reached = true;
                self.enter_retirement("frame budget reached");
            }
        }

        let action = if self.retiring { DrainAction::Retire } else { action };
        match action {
            DrainAction::Resubmit => self.resubmit(id, &slot),
            DrainAction::Retire => self.retire(id),
        }
    }

    /// Hand the buffer back to the client-free pool
    fn retire(&mut self, id: BufferId) -> bool {
        match self.shared.pool.mark_reclaimed(id) {
            Ok(()) => lock(&self.report).retired += 1,
            Err(err) => log::error!("retire of buffer {} failed: {}", id, err),
        }
        true
    }

    /// Hand the buffer back to the component; false on failure
    fn resubmit(&mut self, id: BufferId, slot: &Arc<Mutex<BufferDescriptor>>) -> bool {
        let (filled, flags) = {
            let descriptor = lock(slot);
            (descriptor.filled(), descriptor.flags())
        };
        if let Err(err) = self
            .shared
            .pool
            .mark_reclaimed(id)
            .and_then(|()| self.shared.pool.mark_submitted(id))
        {
            log::error!("resubmit tagging of buffer {} failed: {}", id, err);
            return true;
        }

        let result = match self.direction {
            PortDirection::Output => self.component.fill_this_buffer(id),
            PortDirection::Input => self.component.empty_this_buffer(id, filled, flags),
        };
        match result {
            Ok(()) => {
                lock(&self.report).resubmitted += 1;
                true
            }
            Err(err) => {
                // The buffer stays awaiting drain so teardown can still
                // account for it.
                if let Err(rollback) = self
                    .shared
                    .pool
                    .rollback_submit(id, Ownership::CompletedAwaitingDrain)
                {
                    log::error!("rollback of buffer {} failed: {}", id, rollback);
                }
                log::error!("resubmit of buffer {} failed: {}", id, err);
                lock(&self.report).resubmit_failures += 1;
                self.policy.on_resubmit_error(id, &err);
                if self.shared.shutdown.fire() {
                    log::warn!("pipeline stopped by resubmit failure");
                }
                false
            }
        }
    }

    fn enter_retirement(&mut self, reason: &str) {
        if !self.retiring {
            self.retiring = true;
            if self.shared.shutdown.fire() {
                log::info!("drain stopping: {}", reason);
            }
        }
    }
}

/// Best-effort move to round-robin scheduling for latency
fn raise_thread_priority() {
    let mut param: libc::sched_param = unsafe { std::mem::zeroed() };
    param.sched_priority = DRAIN_THREAD_PRIORITY;
    let rc = unsafe { libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_RR, &param) };
    if rc != 0 {
        log::debug!(
            "drain thread keeps default scheduling: {}",
            io::Error::from_raw_os_error(rc)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferBacking;
    use crate::buffer::BufferPool;

    #[test]
    fn test_config_defaults() {
        let config = DrainConfig::default();
        assert_eq!(config.direction, PortDirection::Output);
        assert_eq!(config.frame_budget, None);

        let config = config.with_frame_budget(25).with_direction(PortDirection::Input);
        assert_eq!(config.frame_budget, Some(25));
        assert_eq!(config.direction, PortDirection::Input);
    }

    #[test]
    fn test_drained_buffer_accessors() {
        let pool = BufferPool::new();
        let id = BufferId(7);
        pool.insert(id, 1, 16, BufferBacking::Component);
        pool.mark_submitted(id).unwrap();
        pool.mark_completed(id, 12, BufferFlags::SYNC_FRAME, 3, None)
            .unwrap();

        let slot = pool.slot(id).unwrap();
        let mut descriptor = lock(&slot);
        let sequence = descriptor.sequence().unwrap();
        let mut drained = DrainedBuffer {
            descriptor: &mut *descriptor,
            sequence,
        };

        assert_eq!(drained.id(), id);
        assert_eq!(drained.port(), 1);
        assert_eq!(drained.capacity(), 16);
        assert_eq!(drained.filled(), 12);
        assert_eq!(drained.data().len(), 12);
        assert_eq!(drained.sequence(), 3);
        assert!(!drained.is_eos());

        drained.data_mut()[0] = 0xAA;
        drained.set_filled(64);
        assert_eq!(drained.filled(), 16);
        drained.set_flags(BufferFlags::EOS);
        assert!(drained.is_eos());
        assert_eq!(drained.data()[0], 0xAA);
    }

    #[test]
    fn test_report_snapshot_is_independent() {
        let report = Arc::new(Mutex::new(DrainReport::default()));
        let snapshot = lock(&report).clone();
        lock(&report).frames = 9;
        assert_eq!(snapshot.frames, 0);
        assert_eq!(lock(&report).frames, 9);
    }
}
