//! In-order delivery engine
//!
//! The delivery thread releases finished actions to the consumer strictly
//! in the order their frame numbers were registered, while bypass actions
//! go out as soon as they arrive.
//!
//! # Architecture
//!
//! ```text
//!  collector.verify ── register_sequence(n) ──> expected: [n0, n1, n2, ...]
//!  release path ────── send_act_queue(act) ───> pending:  {n2, n0}
//!                                               bypass:   [z0, z1]
//!
//!  delivery thread:  Init -> Waiting -> Processing -> Done -> Init
//!                    Processing takes every bypass entry, then pops
//!                    `expected` while its head is in `pending`.
//!                    The batch is released outside the lock.
//! ```
//!
//! The thread waits only when no new frame number was registered since the
//! last iteration and nobody triggered it. The wait is bounded by the
//! check interval, so untriggered arrivals are picked up on the next
//! periodic wake.

use super::frame_act::{FrameAction, FrameActionSummary};
use super::wait::{lock, wait_bounded, wait_once, WaitOutcome};
use crate::action::id::FrameNo;
use crate::config::{TimingConfig, WaitBudget};
use crate::error::{NodeError, Result};
use crate::node::context::{FrameRelease, SequenceRegistry};
use crate::types::ActionKind;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Delivery loop state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum LoopState {
    #[default]
    Init,
    Waiting,
    Processing,
    Done,
}

#[derive(Default)]
struct DeliveryState {
    loop_state: LoopState,
    expected: VecDeque<FrameNo>,
    pending: Vec<FrameAction>,
    bypass: VecDeque<FrameAction>,
    /// Registrations so far; compared against `seen` to decide on waiting
    registered: u64,
    seen: u64,
    wake_pending: bool,
    exit: bool,
    iterations: u64,
    delivered: u64,
}

impl DeliveryState {
    /// Take every bypass entry, then the ordered prefix of `pending`
    fn collect_batch(&mut self) -> Vec<FrameAction> {
        let mut batch: Vec<FrameAction> = self.bypass.drain(..).collect();
        while let Some(head) = self.expected.front().copied() {
            match self.pending.iter().position(|a| a.frame_no == head) {
                Some(pos) => {
                    self.expected.pop_front();
                    batch.push(self.pending.swap_remove(pos));
                }
                None => break,
            }
        }
        batch
    }

    /// Everything still held, ordered part first
    fn drain_all(&mut self) -> Vec<FrameAction> {
        let mut batch = self.collect_batch();
        self.pending.sort_by_key(|a| a.frame_no);
        batch.append(&mut self.pending);
        self.expected.clear();
        batch
    }
}

struct DeliveryShared {
    state: Mutex<DeliveryState>,
    wake: Condvar,
    done: Condvar,
    running: AtomicBool,
    release: Arc<dyn FrameRelease>,
    check_interval: Duration,
    inspect_after: Duration,
    flush_budget: WaitBudget,
    log_batches: bool,
}

/// Diagnostics snapshot of the engine
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryDump {
    pub captured_at: DateTime<Utc>,
    pub running: bool,
    pub loop_state: LoopState,
    pub expected: Vec<u32>,
    pub pending: Vec<FrameActionSummary>,
    pub bypass: Vec<FrameActionSummary>,
    pub iterations: u64,
    pub delivered: u64,
}

/// Ordered release of finished actions on a dedicated thread
pub struct DeliveryEngine {
    shared: Arc<DeliveryShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DeliveryEngine {
    pub fn new(release: Arc<dyn FrameRelease>, timing: &TimingConfig, log_batches: bool) -> Self {
        Self {
            shared: Arc::new(DeliveryShared {
                state: Mutex::new(DeliveryState::default()),
                wake: Condvar::new(),
                done: Condvar::new(),
                running: AtomicBool::new(false),
                release,
                check_interval: timing.delivery_check(),
                inspect_after: timing.delivery_inspect(),
                flush_budget: timing.flush_drain,
                log_batches,
            }),
            worker: Mutex::new(None),
        }
    }

    /// Spawn the delivery thread
    pub fn start(&self) -> Result<()> {
        let mut worker = lock(&self.worker);
        if worker.is_some() {
            return Ok(());
        }
        {
            let mut st = lock(&self.shared.state);
            st.exit = false;
            st.loop_state = LoopState::Init;
        }
        self.shared.running.store(true, Ordering::Release);
        let shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new()
            .name("p1-delivery".to_string())
            .spawn(move || shared.run())
            .map_err(|e| {
                self.shared.running.store(false, Ordering::Release);
                NodeError::Delivery(format!("Failed to spawn delivery thread: {}", e))
            })?;
        *worker = Some(handle);
        info!("delivery engine started");
        Ok(())
    }

    /// Stop the thread. Whatever is still held is released before it exits.
    pub fn stop(&self) {
        let handle = lock(&self.worker).take();
        let Some(handle) = handle else {
            return;
        };
        {
            let mut st = lock(&self.shared.state);
            st.exit = true;
            self.shared.wake.notify_all();
        }
        if handle.join().is_err() {
            error!("delivery thread panicked");
        }
        self.shared.running.store(false, Ordering::Release);
        info!("delivery engine stopped");
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Register the next frame number in delivery order
    pub fn register_act_list(&self, frame: FrameNo) -> bool {
        if !self.is_running() {
            return false;
        }
        let mut st = lock(&self.shared.state);
        if st.exit {
            return false;
        }
        st.expected.push_back(frame);
        st.registered += 1;
        trace!(%frame, depth = st.expected.len(), "sequence registered");
        true
    }

    /// Hand a finished action over for release. A stopped engine hands the
    /// action back so the caller can release it directly.
    pub fn send_act_queue(
        &self,
        action: FrameAction,
        trigger_now: bool,
    ) -> std::result::Result<(), FrameAction> {
        if !self.is_running() {
            return Err(action);
        }
        let mut st = lock(&self.shared.state);
        if st.exit {
            return Err(action);
        }
        match action.kind() {
            ActionKind::Normal if st.expected.contains(&action.frame_no) => {
                st.pending.push(action);
            }
            ActionKind::Normal => {
                warn!(
                    frame = %action.frame_no,
                    magic = %action.magic,
                    "frame was never registered, releasing without ordering"
                );
                st.bypass.push_back(action);
            }
            _ => st.bypass.push_back(action),
        }
        if trigger_now {
            st.wake_pending = true;
            self.shared.wake.notify_one();
        }
        Ok(())
    }

    /// Wake the thread without adding work
    pub fn trigger(&self) {
        let mut st = lock(&self.shared.state);
        st.wake_pending = true;
        self.shared.wake.notify_one();
    }

    /// Block until every registered frame was released. Diagnostic only:
    /// returns false and logs if the list is still non-empty at the end.
    pub fn wait_flush(&self, trigger_now: bool) -> bool {
        if !self.is_running() {
            return true;
        }
        if trigger_now {
            self.trigger();
        }
        let st = lock(&self.shared.state);
        let (st, outcome) = wait_bounded(
            &self.shared.done,
            st,
            self.shared.flush_budget,
            |s| s.expected.is_empty(),
            |s| s.exit,
        );
        match outcome {
            WaitOutcome::Signaled => true,
            WaitOutcome::Cancelled => st.expected.is_empty(),
            WaitOutcome::TimedOut => {
                warn!(
                    remaining = st.expected.len(),
                    head = ?st.expected.front(),
                    waited_ms = self.shared.flush_budget.total().as_millis() as u64,
                    "delivery list did not drain"
                );
                false
            }
        }
    }

    /// True if the engine is stopped or nothing is awaiting delivery
    pub fn is_act_list_empty(&self) -> bool {
        !self.is_running() || lock(&self.shared.state).expected.is_empty()
    }

    pub fn snapshot(&self) -> DeliveryDump {
        let st = lock(&self.shared.state);
        DeliveryDump {
            captured_at: Utc::now(),
            running: self.is_running(),
            loop_state: st.loop_state,
            expected: st.expected.iter().map(|f| f.0).collect(),
            pending: st.pending.iter().map(FrameAction::summary).collect(),
            bypass: st.bypass.iter().map(FrameAction::summary).collect(),
            iterations: st.iterations,
            delivered: st.delivered,
        }
    }

    /// Serialized snapshot for logging
    pub fn dump_info(&self) -> String {
        let dump = self.snapshot();
        serde_json::to_string(&dump).unwrap_or_else(|e| format!("<dump failed: {}>", e))
    }
}

impl SequenceRegistry for DeliveryEngine {
    fn register_sequence(&self, frame: FrameNo) -> bool {
        self.register_act_list(frame)
    }
}

impl Drop for DeliveryEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

impl DeliveryShared {
    fn run(&self) {
        debug!("delivery thread running");
        let mut idle = Duration::ZERO;
        loop {
            let batch = {
                let mut st = lock(&self.state);
                st.loop_state = LoopState::Init;
                if st.exit {
                    break;
                }
                if st.registered == st.seen && !st.wake_pending {
                    st.loop_state = LoopState::Waiting;
                    let (guard, _) = wait_once(&self.wake, st, self.check_interval);
                    st = guard;
                    if st.exit {
                        break;
                    }
                }
                st.wake_pending = false;
                st.seen = st.registered;
                st.loop_state = LoopState::Processing;
                let batch = st.collect_batch();
                if batch.is_empty() && !st.expected.is_empty() {
                    idle += self.check_interval;
                    if idle >= self.inspect_after {
                        warn!(
                            head = ?st.expected.front(),
                            expected = st.expected.len(),
                            pending = st.pending.len(),
                            "delivery stalled, driver may be stuck"
                        );
                        idle = Duration::ZERO;
                    }
                } else {
                    idle = Duration::ZERO;
                }
                batch
            };

            let count = batch.len() as u64;
            if count > 0 && self.log_batches {
                debug!(
                    frames = ?batch.iter().map(|a| a.frame_no.0).collect::<Vec<_>>(),
                    "delivering batch"
                );
            }
            for action in batch {
                self.release.release_frame(action);
            }

            let mut st = lock(&self.state);
            st.delivered += count;
            st.iterations += 1;
            st.loop_state = LoopState::Done;
            self.done.notify_all();
        }

        let leftovers = {
            let mut st = lock(&self.state);
            st.loop_state = LoopState::Done;
            st.drain_all()
        };
        if !leftovers.is_empty() {
            warn!(count = leftovers.len(), "releasing undelivered actions on exit");
        }
        for action in leftovers {
            self.release.release_frame(action);
        }
        self.running.store(false, Ordering::Release);
        self.done.notify_all();
        debug!("delivery thread exited");
    }
}
