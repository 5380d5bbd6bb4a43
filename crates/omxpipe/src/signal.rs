// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! One-shot shutdown latch and cooperative cancellation token
//!
//! [`ShutdownSignal`] tells the coordinator and the drain workers that
//! teardown should begin; it latches on the first `fire` and stays set.
//! [`CancelToken`] is the cooperative stop request checked by every
//! blocking wait in the crate. The token can adopt an externally owned
//! flag, which is how a SIGINT handler reaches the pipeline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::lock;

/// One-shot latch signalling that teardown should begin
///
/// Cloning shares the latch. `fire` is idempotent; only the first caller
/// observes `true`, which is how "the shutdown signal fires exactly once"
/// is kept even when several conditions trip at the same time.
#[derive(Clone)]
pub struct ShutdownSignal {
    inner: Arc<SignalInner>,
}

struct SignalInner {
    fired: Mutex<bool>,
    condvar: Condvar,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        ShutdownSignal {
            inner: Arc::new(SignalInner {
                fired: Mutex::new(false),
                condvar: Condvar::new(),
            }),
        }
    }

    /// Latch the signal
    ///
    /// Returns `true` only for the first caller.
    pub fn fire(&self) -> bool {
        let mut fired = lock(&self.inner.fired);
        if *fired {
            return false;
        }
        *fired = true;
        self.inner.condvar.notify_all();
        true
    }

    /// True once the signal has fired
    pub fn is_fired(&self) -> bool {
        *lock(&self.inner.fired)
    }

    /// Block until the signal fires or the timeout elapses
    ///
    /// Returns `true` if the signal fired. `None` waits indefinitely.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut fired = lock(&self.inner.fired);
        while !*fired {
            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    let (guard, _) = self
                        .inner
                        .condvar
                        .wait_timeout(fired, deadline - now)
                        .unwrap_or_else(|e| e.into_inner());
                    fired = guard;
                }
                None => {
                    fired = self
                        .inner
                        .condvar
                        .wait(fired)
                        .unwrap_or_else(|e| e.into_inner());
                }
            }
        }
        true
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        ShutdownSignal::new()
    }
}

/// Cooperative cancellation token
///
/// Cloning shares the flag. Every blocking wait in the crate polls the
/// token and returns early once it is cancelled; the drain worker also
/// checks it between bursts.
#[derive(Clone)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// A token nobody has cancelled
    pub fn new() -> Self {
        CancelToken {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Adopt an externally owned flag, such as one registered with a
    /// signal handler
    pub fn from_flag(flag: Arc<AtomicBool>) -> Self {
        CancelToken { flag }
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// True once cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        CancelToken::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_fire_exactly_once() {
        let signal = ShutdownSignal::new();
        assert!(!signal.is_fired());
        assert!(signal.fire());
        assert!(!signal.fire());
        assert!(!signal.fire());
        assert!(signal.is_fired());
    }

    #[test]
    fn test_wait_times_out() {
        let signal = ShutdownSignal::new();
        assert!(!signal.wait(Some(Duration::from_millis(20))));
    }

    #[test]
    fn test_wait_observes_fire_from_other_thread() {
        let signal = ShutdownSignal::new();
        let fire_side = signal.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            fire_side.fire()
        });
        assert!(signal.wait(Some(Duration::from_secs(5))));
        assert!(handle.join().unwrap());
    }

    #[test]
    fn test_wait_returns_immediately_once_fired() {
        let signal = ShutdownSignal::new();
        signal.fire();
        assert!(signal.wait(Some(Duration::from_millis(1))));
        assert!(signal.wait(None));
    }

    #[test]
    fn test_cancel_token_shared_across_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_cancel_token_adopts_external_flag() {
        let flag = Arc::new(AtomicBool::new(false));
        let token = CancelToken::from_flag(flag.clone());
        flag.store(true, Ordering::Relaxed);
        assert!(token.is_cancelled());
    }
}
