//! Reentrancy gate for reconciliation passes.
//!
//! Writing a hash or letting the package tool touch files can produce file
//! notifications while a pass is still unwinding. Those must not start a
//! second, nested pass. Clones share one flag, so hooks running inside a
//! pass observe the region held by the caller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct ReconciliationGuard {
    active: Arc<AtomicBool>,
}

impl ReconciliationGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter the guarded region. Returns `None` if a pass is already running.
    pub fn enter(&self) -> Option<GuardScope> {
        self.active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| GuardScope {
                active: Arc::clone(&self.active),
            })
    }

    /// Run `action` inside the region. Returns `false` without running it if
    /// the region is already held.
    pub fn with_guard<F: FnOnce()>(&self, action: F) -> bool {
        match self.enter() {
            Some(_scope) => {
                action();
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

/// Held for the duration of one pass; releases the flag on drop.
#[derive(Debug)]
#[must_use = "the guarded region ends when the scope is dropped"]
pub struct GuardScope {
    active: Arc<AtomicBool>,
}

impl Drop for GuardScope {
    fn drop(&mut self) {
        self.active.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_entry_is_a_no_op() {
        let guard = ReconciliationGuard::new();
        let mut inner_ran = false;
        let outer_ran = guard.with_guard(|| {
            inner_ran = guard.with_guard(|| unreachable!("nested pass must not run"));
        });
        assert!(outer_ran);
        assert!(!inner_ran);
        assert!(!guard.is_active());
    }

    #[test]
    fn clones_share_the_region() {
        let guard = ReconciliationGuard::new();
        let hook = guard.clone();
        let scope = guard.enter().expect("enter");
        assert!(hook.enter().is_none());
        drop(scope);
        assert!(hook.enter().is_some());
    }

    #[test]
    fn released_after_early_return() {
        fn pass(guard: &ReconciliationGuard, bail: bool) -> Option<()> {
            let _scope = guard.enter()?;
            if bail {
                return None;
            }
            Some(())
        }

        let guard = ReconciliationGuard::new();
        assert!(pass(&guard, true).is_none());
        assert!(!guard.is_active());
        assert!(pass(&guard, false).is_some());
    }

    #[test]
    fn released_after_panic() {
        let guard = ReconciliationGuard::new();
        let cloned = guard.clone();
        let result = std::panic::catch_unwind(move || {
            let _scope = cloned.enter().expect("enter");
            panic!("boom");
        });
        assert!(result.is_err());
        assert!(!guard.is_active());
    }
}
