// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
struct GateState {
    signaled: Mutex<bool>,
    condvar: Condvar,
}

/// A one-shot latch that releases every waiter once the output file is durably written
/// and closed.
///
/// Clones share the same latch. Signaling is sticky: waiters that arrive after the
/// signal return immediately, and signaling again has no effect.
///
/// # Examples
///
/// ```
/// use std::thread;
///
/// use chunkwrite::CompletionGate;
///
/// let gate = CompletionGate::new();
/// let signaler = gate.clone();
///
/// thread::spawn(move || signaler.signal());
///
/// gate.wait();
/// assert!(gate.is_signaled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CompletionGate {
    state: Arc<GateState>,
}

impl CompletionGate {
    /// Creates an unsignaled gate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Releases all current and future waiters.
    pub fn signal(&self) {
        let mut signaled = self.state.signaled.lock();
        if !*signaled {
            *signaled = true;
            let _ = self.state.condvar.notify_all();
        }
    }

    /// Whether the gate has been signaled.
    #[must_use]
    pub fn is_signaled(&self) -> bool {
        *self.state.signaled.lock()
    }

    /// Blocks the calling thread until the gate is signaled.
    pub fn wait(&self) {
        let mut signaled = self.state.signaled.lock();
        while !*signaled {
            self.state.condvar.wait(&mut signaled);
        }
    }

    /// Blocks the calling thread until the gate is signaled or `timeout` elapses.
    ///
    /// Returns `true` if the gate was signaled.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut signaled = self.state.signaled.lock();
        while !*signaled {
            if self.state.condvar.wait_until(&mut signaled, deadline).timed_out() {
                break;
            }
        }
        *signaled
    }
}
