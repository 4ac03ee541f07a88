//! Node lifecycle state
//!
//! ```text
//!  Inactive ──start──> Active ──driver start──> Active+Ready
//!      ^                                              │
//!      └──────────────────── stop ───────────────────┘
//! ```
//!
//! The deque thread parks on `thread_cond` while the node is not both
//! active and ready. 3A callbacks that race hardware start park on
//! `start_cond` until readiness, bounded by the start-ready budget.

use crate::action::id::MagicNum;
use crate::config::WaitBudget;
use crate::delivery::wait::{lock, wait_bounded, wait_once, WaitOutcome};
use crate::types::CaptureType;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

/// Progress of the hardware start sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum StartState {
    #[default]
    Null,
    /// Collecting requests before a request-mode start
    WaitRequest,
    /// Driver start in progress
    DrvStart,
    Ready,
}

/// Start phase of the capture flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum CapturePhase {
    #[default]
    Idle,
    /// Hardware configured, waiting for the first full burst
    WaitRequest,
    /// `start_capture` issued, waiting for the first 3A callback
    WaitCallback,
    Ready,
}

/// Why the deque thread woke up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Park {
    Streaming,
    Idle,
    Exit,
}

#[derive(Debug, Default)]
pub(crate) struct Lifecycle {
    pub active: bool,
    pub ready: bool,
    pub start: StartState,
    pub exit: bool,
    pub io_pipe_event: bool,
    pub standby: bool,
}

pub(crate) struct NodeState {
    inner: Mutex<Lifecycle>,
    thread_cond: Condvar,
    start_cond: Condvar,
    first_received: AtomicBool,
}

impl NodeState {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Lifecycle::default()),
            thread_cond: Condvar::new(),
            start_cond: Condvar::new(),
            first_received: AtomicBool::new(false),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, Lifecycle> {
        lock(&self.inner)
    }

    pub fn is_active(&self) -> bool {
        self.lock().active
    }

    pub fn is_ready(&self) -> bool {
        self.lock().ready
    }

    pub fn is_standby(&self) -> bool {
        self.lock().standby
    }

    pub fn set_standby(&self, standby: bool) {
        self.lock().standby = standby;
    }

    pub fn set_start(&self, start: StartState) {
        self.lock().start = start;
    }

    /// Mark the node active and wake the deque thread
    pub fn activate(&self) {
        let mut st = self.lock();
        st.active = true;
        st.start = StartState::Null;
        self.thread_cond.notify_all();
    }

    /// Mark the node ready and wake every waiter
    pub fn set_ready(&self) {
        let mut st = self.lock();
        st.ready = true;
        st.start = StartState::Ready;
        self.thread_cond.notify_all();
        self.start_cond.notify_all();
    }

    /// Back to inactive; wakes every waiter so nobody sleeps through a stop.
    /// Returns whether the node was active.
    pub fn deactivate(&self) -> bool {
        let mut st = self.lock();
        let was_active = st.active;
        st.active = false;
        st.ready = false;
        st.standby = false;
        st.start = StartState::Null;
        self.thread_cond.notify_all();
        self.start_cond.notify_all();
        was_active
    }

    pub fn request_exit(&self) {
        let mut st = self.lock();
        st.exit = true;
        self.thread_cond.notify_all();
        self.start_cond.notify_all();
    }

    pub fn clear_exit(&self) {
        self.lock().exit = false;
    }

    pub fn set_io_pipe_event(&self, on: bool) {
        self.lock().io_pipe_event = on;
    }

    pub fn wake_start_waiters(&self) {
        let _st = self.lock();
        self.start_cond.notify_all();
    }

    pub fn first_received(&self) -> bool {
        self.first_received.load(Ordering::Acquire)
    }

    pub fn set_first_received(&self, value: bool) {
        self.first_received.store(value, Ordering::Release);
    }

    /// Park the deque thread until the node is active and ready, exit is
    /// requested, or `timeout` passes
    pub fn park(&self, timeout: Duration) -> Park {
        let st = self.lock();
        let check = |st: &Lifecycle| {
            if st.exit {
                Some(Park::Exit)
            } else if st.active && st.ready {
                Some(Park::Streaming)
            } else {
                None
            }
        };
        if let Some(park) = check(&st) {
            return park;
        }
        let (st, _) = wait_once(&self.thread_cond, st, timeout);
        check(&st).unwrap_or(Park::Idle)
    }

    /// Wait for readiness while active; cancelled when the node goes inactive
    pub fn wait_start_ready(&self, budget: WaitBudget) -> WaitOutcome {
        let st = self.lock();
        let (_st, outcome) = wait_bounded(
            &self.start_cond,
            st,
            budget,
            |s| s.ready,
            |s| !s.active || s.exit,
        );
        outcome
    }
}

/// Capture-flow start handshake between `queue()` and the first 3A callback
#[derive(Debug, Default)]
pub(crate) struct CaptureStart {
    pub phase: CapturePhase,
    pub capture_type: CaptureType,
    pub exposure_ns: i64,
    pub sof_idx: u32,
}

pub(crate) struct CaptureGate {
    inner: Mutex<CaptureStart>,
    cond: Condvar,
}

impl CaptureGate {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(CaptureStart::default()),
            cond: Condvar::new(),
        }
    }

    pub fn phase(&self) -> CapturePhase {
        lock(&self.inner).phase
    }

    pub fn set_phase(&self, phase: CapturePhase) {
        lock(&self.inner).phase = phase;
        self.cond.notify_all();
    }

    /// Store what 3A reported for the first capture and open the gate
    pub fn complete(&self, capture_type: CaptureType, exposure_ns: i64, sof_idx: u32) {
        let mut st = lock(&self.inner);
        st.capture_type = capture_type;
        st.exposure_ns = exposure_ns;
        st.sof_idx = sof_idx;
        st.phase = CapturePhase::Ready;
        self.cond.notify_all();
    }

    /// Wait while the first callback is outstanding; returns the stored
    /// capture parameters whatever the outcome
    pub fn wait_callback(&self, budget: WaitBudget) -> (WaitOutcome, CaptureType, i64, u32) {
        let st = lock(&self.inner);
        let (st, outcome) = wait_bounded(
            &self.cond,
            st,
            budget,
            |s| s.phase != CapturePhase::WaitCallback,
            |_| false,
        );
        (outcome, st.capture_type, st.exposure_ns, st.sof_idx)
    }

    pub fn reset(&self) {
        *lock(&self.inner) = CaptureStart::default();
        self.cond.notify_all();
    }
}

/// Id of the job currently being handed to the driver by a 3A callback.
/// The deque thread holds off on a job while it is still in transfer.
pub(crate) struct TransferJob {
    current: Mutex<MagicNum>,
    cond: Condvar,
}

impl TransferJob {
    pub fn new() -> Self {
        Self {
            current: Mutex::new(MagicNum::NULL),
            cond: Condvar::new(),
        }
    }

    pub fn begin(&self, id: MagicNum) {
        *lock(&self.current) = id;
    }

    pub fn end(&self) {
        *lock(&self.current) = MagicNum::NULL;
        self.cond.notify_all();
    }

    /// Wait while `id` is the job in transfer
    pub fn wait_clear(&self, id: MagicNum, budget: WaitBudget) -> WaitOutcome {
        let cur = lock(&self.current);
        let (_cur, outcome) = wait_bounded(&self.cond, cur, budget, |c| *c != id, |_| false);
        outcome
    }
}
