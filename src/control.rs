// Control Module - Stop Flag and Pause Gate
// =======================================================
// Workers consult the control signal at every chunk boundary. The stop flag
// is monotonic (false -> true, never back); the pause gate toggles freely
// until a stop is requested, after which it stays open.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};

/// What a worker needs from the batch's control state.
///
/// The orchestrator is written against this trait so the same logic works
/// whether the signal is backed by in-process atomics or by some
/// cross-process mechanism.
pub trait ControlSignal: Send + Sync {
    /// True once a stop has been requested.
    fn is_stop_requested(&self) -> bool;

    /// Block while the pause gate is closed. Returns immediately if it is open.
    fn wait_if_paused(&self);
}

/// In-process control signal shared by reference between the orchestrator and
/// its worker threads.
#[derive(Debug)]
pub struct SharedControl {
    stop: AtomicBool,
    // true = gate open (running), false = paused
    gate: Mutex<bool>,
    gate_changed: Condvar,
}

impl SharedControl {
    /// A new signal: not stopped, gate open.
    pub fn new() -> Self {
        Self {
            stop: AtomicBool::new(false),
            gate: Mutex::new(true),
            gate_changed: Condvar::new(),
        }
    }

    /// Close the gate; workers block at their next chunk boundary.
    ///
    /// Has no effect once a stop was requested.
    pub fn pause(&self) {
        let mut open = self.gate.lock();
        if !self.stop.load(Ordering::SeqCst) {
            *open = false;
        }
    }

    /// Open the gate and wake any blocked workers.
    pub fn resume(&self) {
        *self.gate.lock() = true;
        self.gate_changed.notify_all();
    }

    /// Request a stop.
    ///
    /// The gate is forced open as well, otherwise a paused worker would never
    /// get to observe the flag.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.resume();
    }

    pub fn is_paused(&self) -> bool {
        !*self.gate.lock()
    }
}

impl Default for SharedControl {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlSignal for SharedControl {
    fn is_stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    fn wait_if_paused(&self) {
        let mut open = self.gate.lock();
        while !*open && !self.stop.load(Ordering::SeqCst) {
            self.gate_changed.wait(&mut open);
        }
    }
}
