//! Bounded waits
//!
//! Every blocking wait in the crate goes through these helpers. They never
//! block past their budget and report how they ended as a [`WaitOutcome`].
//! Poisoned locks are recovered rather than propagated: a panicking
//! consumer callback must not wedge the node's threads.

use crate::config::WaitBudget;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// How a bounded wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The awaited condition holds
    Signaled,
    /// The budget ran out
    TimedOut,
    /// The wait was abandoned because the owner is shutting down
    Cancelled,
}

/// Lock a mutex, recovering the guard if a previous holder panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Wait once on `cond` for at most `timeout`
pub(crate) fn wait_once<'a, T>(
    cond: &Condvar,
    guard: MutexGuard<'a, T>,
    timeout: Duration,
) -> (MutexGuard<'a, T>, WaitOutcome) {
    let (guard, res) = cond
        .wait_timeout(guard, timeout)
        .unwrap_or_else(PoisonError::into_inner);
    let outcome = if res.timed_out() {
        WaitOutcome::TimedOut
    } else {
        WaitOutcome::Signaled
    };
    (guard, outcome)
}

/// Wait on `cond` until `done` holds, `cancelled` holds, or `budget` is
/// spent. Conditions are checked before every wait and once more at the end.
pub(crate) fn wait_bounded<'a, T>(
    cond: &Condvar,
    mut guard: MutexGuard<'a, T>,
    budget: WaitBudget,
    mut done: impl FnMut(&T) -> bool,
    mut cancelled: impl FnMut(&T) -> bool,
) -> (MutexGuard<'a, T>, WaitOutcome) {
    for _ in 0..budget.retries.max(1) {
        if done(&guard) {
            return (guard, WaitOutcome::Signaled);
        }
        if cancelled(&guard) {
            return (guard, WaitOutcome::Cancelled);
        }
        let (g, _) = wait_once(cond, guard, budget.interval());
        guard = g;
    }
    if done(&guard) {
        (guard, WaitOutcome::Signaled)
    } else if cancelled(&guard) {
        (guard, WaitOutcome::Cancelled)
    } else {
        (guard, WaitOutcome::TimedOut)
    }
}
