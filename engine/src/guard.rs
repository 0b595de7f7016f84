//! Scope-bound cleanup.
//!
//! A `ScopeGuard` runs its closure exactly once when it goes out of scope,
//! unless it was dismissed first. It replaces wrapper types whose only job is
//! to attach a close callback to some other object.

/// RAII wrapper around a single-shot cleanup closure.
pub struct ScopeGuard<F: FnOnce()> {
    cleanup: Option<F>,
}

impl<F: FnOnce()> ScopeGuard<F> {
    pub fn new(cleanup: F) -> Self {
        Self {
            cleanup: Some(cleanup),
        }
    }

    /// Disarms the guard; the closure is dropped without running.
    pub fn dismiss(mut self) {
        self.cleanup = None;
    }

    /// Runs the cleanup now instead of at scope exit.
    pub fn trigger(mut self) {
        if let Some(f) = self.cleanup.take() {
            f();
        }
    }
}

impl<F: FnOnce()> Drop for ScopeGuard<F> {
    fn drop(&mut self) {
        if let Some(f) = self.cleanup.take() {
            f();
        }
    }
}
