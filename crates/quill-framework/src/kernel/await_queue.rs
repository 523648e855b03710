//! Deferred continuations keyed by module readiness.

use tracing::{debug, trace};

use quill_core::LoadState;

use super::Kernel;
use crate::context::ModuleHandle;

/// What [`Kernel::await_module`] did with a continuation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Awaited {
    /// The target was loaded; the continuation already ran.
    Ran,
    /// Queued until the target loads.
    Queued,
    /// The target failed (or the kernel shut down); the continuation was
    /// dropped without running.
    Dropped,
}

impl Kernel {
    /// Runs `continuation` with the handle of `target` once it is loaded.
    ///
    /// If `target` is already loaded the continuation runs immediately on the
    /// caller's thread. Otherwise it is queued and runs exactly once, in FIFO
    /// order with other continuations for the same target, the instant the
    /// target becomes loaded. A target that fails never runs its
    /// continuations; one that is never registered keeps them forever.
    pub fn await_module<F>(&self, target: &str, continuation: F) -> Awaited
    where
        F: FnOnce(ModuleHandle) + Send + 'static,
    {
        let ready = {
            let mut state = self.state.lock();
            if state.shut_down {
                debug!(target = %target, "Kernel shut down; dropping continuation");
                return Awaited::Dropped;
            }
            match state.entry(target) {
                Some(entry) if entry.state == LoadState::Loaded => Some(entry.handle()),
                Some(entry) if entry.state == LoadState::Failed => {
                    debug!(target = %target, "Target failed; dropping continuation");
                    return Awaited::Dropped;
                }
                _ => {
                    state
                        .waiting
                        .entry(target.to_string())
                        .or_default()
                        .push_back(Box::new(continuation));
                    trace!(target = %target, "Continuation queued");
                    return Awaited::Queued;
                }
            }
        };

        if let Some(handle) = ready {
            continuation(handle);
        }
        Awaited::Ran
    }

    /// Number of continuations waiting on `target`.
    pub fn pending_awaits(&self, target: &str) -> usize {
        self.state
            .lock()
            .waiting
            .get(target)
            .map_or(0, |queue| queue.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::ModuleDefinition;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn test_immediate_when_loaded() {
        let kernel = Kernel::new();
        kernel.register(ModuleDefinition::builder("t").build()).unwrap();
        kernel.load_all();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in = Arc::clone(&seen);
        let outcome = kernel.await_module("t", move |h| seen_in.lock().push(h.name().to_string()));
        assert_eq!(outcome, Awaited::Ran);
        assert_eq!(*seen.lock(), vec!["t"]);
    }

    #[test]
    fn test_deferred_runs_once_in_fifo_order() {
        let kernel = Kernel::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second"] {
            let seen = Arc::clone(&seen);
            assert_eq!(
                kernel.await_module("t", move |_| seen.lock().push(tag)),
                Awaited::Queued
            );
        }
        assert_eq!(kernel.pending_awaits("t"), 2);

        kernel.register(ModuleDefinition::builder("t").build()).unwrap();
        kernel.load_all();
        kernel.load_all();
        assert_eq!(*seen.lock(), vec!["first", "second"]);
        assert_eq!(kernel.pending_awaits("t"), 0);
    }

    #[test]
    fn test_failed_target_drops_continuations() {
        let kernel = Kernel::new();
        let seen = Arc::new(Mutex::new(0));
        let queued = Arc::clone(&seen);
        kernel
            .register(ModuleDefinition::builder("t").requires(["ghost"]).build())
            .unwrap();
        kernel.await_module("t", move |_| *queued.lock() += 1);
        kernel.load_all();
        assert_eq!(kernel.pending_awaits("t"), 0);

        let late = Arc::clone(&seen);
        assert_eq!(
            kernel.await_module("t", move |_| *late.lock() += 1),
            Awaited::Dropped
        );
        assert_eq!(*seen.lock(), 0);
    }
}
