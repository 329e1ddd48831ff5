//! Lock-free reject-if-busy guard.
//!
//! Used twice per job: once inside [`crate::Job`] so overlapping `run()`
//! calls short-circuit, and once per job id in the registry so an in-flight
//! firing coalesces the next one.

use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Default)]
pub struct RunGuard {
    running: AtomicBool,
}

impl RunGuard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically claim the guard. `None` means someone already holds it;
    /// the caller must not wait.
    pub fn try_acquire(&self) -> Option<RunPermit<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunPermit {
                flag: &self.running,
            })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Releases the guard when dropped, including on panic or when the owning
/// future is abandoned.
#[derive(Debug)]
pub struct RunPermit<'a> {
    flag: &'a AtomicBool,
}

impl Drop for RunPermit<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}
