//! Ordered shutdown calls.
//!
//! Calls fire once, most recently registered first. Each entry leaves the
//! list before its callback runs and the lock is not held across the call, so
//! a callback may add or remove entries.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::error::{HdlError, Result};

/// Shutdown callback. The argument is the value given at registration.
pub type ShutdownCallback = Arc<dyn Fn(usize) + Send + Sync>;

struct ShutdownCall {
    name: String,
    callback: ShutdownCallback,
    arg: usize,
}

/// LIFO list of named shutdown calls.
pub struct ShutdownSequencer {
    /// Head of the list is index 0
    calls: Mutex<Vec<ShutdownCall>>,
    ran: AtomicBool,
}

impl ShutdownSequencer {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            ran: AtomicBool::new(false),
        }
    }

    /// Register a call at the head of the list.
    pub fn add(&self, name: impl Into<String>, callback: ShutdownCallback, arg: usize) {
        self.calls.lock().insert(
            0,
            ShutdownCall {
                name: name.into(),
                callback,
                arg,
            },
        );
    }

    /// Remove the first entry registered with this callback and argument.
    pub fn remove(&self, callback: &ShutdownCallback, arg: usize) -> Result<()> {
        let mut calls = self.calls.lock();
        let position = calls
            .iter()
            .position(|c| same_callback(&c.callback, callback) && c.arg == arg)
            .ok_or_else(|| HdlError::NotFound("shutdown call".to_string()))?;
        calls.remove(position);
        Ok(())
    }

    /// Names of pending calls, in firing order.
    pub fn pending(&self) -> Vec<String> {
        self.calls.lock().iter().map(|c| c.name.clone()).collect()
    }

    /// Whether the sequence has already run.
    pub fn has_run(&self) -> bool {
        self.ran.load(Ordering::Acquire)
    }

    /// Run every call until the list is empty. Only the first invocation
    /// does anything.
    pub fn run_all(&self) {
        if self.ran.swap(true, Ordering::AcqRel) {
            warn!("Shutdown sequence already run, ignoring");
            return;
        }

        info!("Begin shutdown sequence");
        loop {
            let call = {
                let mut calls = self.calls.lock();
                if calls.is_empty() {
                    break;
                }
                calls.remove(0)
            };

            info!(call = %call.name, "Calling {}", call.name);
            (call.callback)(call.arg);
            info!(call = %call.name, "{} complete", call.name);
        }
        info!("Shutdown sequence complete");
    }
}

impl Default for ShutdownSequencer {
    fn default() -> Self {
        Self::new()
    }
}

fn same_callback(a: &ShutdownCallback, b: &ShutdownCallback) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder(log: &Arc<Mutex<Vec<usize>>>) -> ShutdownCallback {
        let log = log.clone();
        Arc::new(move |arg: usize| log.lock().push(arg))
    }

    #[test]
    fn test_lifo_order() {
        let seq = ShutdownSequencer::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let cb = recorder(&log);
        seq.add("first", cb.clone(), 1);
        seq.add("second", cb.clone(), 2);
        seq.add("third", cb, 3);
        assert_eq!(seq.pending(), vec!["third", "second", "first"]);

        seq.run_all();
        assert_eq!(*log.lock(), vec![3, 2, 1]);
        assert!(seq.pending().is_empty());
    }

    #[test]
    fn test_remove_matches_callback_and_arg() {
        let seq = ShutdownSequencer::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let cb = recorder(&log);
        let other = recorder(&log);
        seq.add("a", cb.clone(), 1);
        seq.add("b", cb.clone(), 2);

        assert!(seq.remove(&cb, 3).is_err());
        assert!(seq.remove(&other, 1).is_err());
        seq.remove(&cb, 1).unwrap();
        assert_eq!(seq.pending(), vec!["b"]);
    }

    #[test]
    fn test_runs_only_once() {
        let seq = ShutdownSequencer::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        seq.add("a", recorder(&log), 7);
        seq.run_all();
        seq.add("late", recorder(&log), 8);
        seq.run_all();
        assert!(seq.has_run());
        assert_eq!(*log.lock(), vec![7]);
    }
}
