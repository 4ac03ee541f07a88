//! Wait budgets and delivery timing
//!
//! Every blocking wait in the node is bounded. A [`WaitBudget`] describes
//! one of those waits as a polling interval times a retry count, so a
//! timed-out wait can log how long it actually waited.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default interval of the start-ready and transfer-job waits (ms)
pub const DEFAULT_SHORT_WAIT_INTERVAL_MS: u64 = 10;

/// Default interval of the flush drain wait (ms)
pub const DEFAULT_COMMON_WAIT_INTERVAL_MS: u64 = 100;

/// Default retry count for all wait budgets
pub const DEFAULT_WAIT_RETRIES: u32 = 100;

/// Default periodic wake of the delivery thread (ms)
pub const DEFAULT_DELIVERY_CHECK_MS: u64 = 100;

/// Default idle time before the delivery thread dumps a stuck report (ms)
pub const DEFAULT_DELIVERY_INSPECT_MS: u64 = 2000;

/// Default driver dequeue timeout (ms)
pub const DEFAULT_DEQUE_TIMEOUT_MS: u64 = 500;

/// A bounded wait: `retries` waits of `interval_ms` each
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitBudget {
    pub interval_ms: u64,
    pub retries: u32,
}

impl WaitBudget {
    pub const fn new(interval_ms: u64, retries: u32) -> Self {
        Self {
            interval_ms,
            retries,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Upper bound of the whole wait
    pub fn total(&self) -> Duration {
        Duration::from_millis(self.interval_ms.saturating_mul(u64::from(self.retries)))
    }
}

fn default_short_wait() -> WaitBudget {
    WaitBudget::new(DEFAULT_SHORT_WAIT_INTERVAL_MS, DEFAULT_WAIT_RETRIES)
}

fn default_common_wait() -> WaitBudget {
    WaitBudget::new(DEFAULT_COMMON_WAIT_INTERVAL_MS, DEFAULT_WAIT_RETRIES)
}

fn default_delivery_check_ms() -> u64 {
    DEFAULT_DELIVERY_CHECK_MS
}

fn default_delivery_inspect_ms() -> u64 {
    DEFAULT_DELIVERY_INSPECT_MS
}

fn default_deque_timeout_ms() -> u64 {
    DEFAULT_DEQUE_TIMEOUT_MS
}

/// Timing knobs of the node and its delivery thread
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Wait for readiness when a 3A callback races hardware start
    #[serde(default = "default_short_wait")]
    pub start_ready: WaitBudget,

    /// Wait of the deque thread while a job is still being enqueued
    #[serde(default = "default_short_wait")]
    pub transfer_job: WaitBudget,

    /// Wait for the processing queue and delivery list to drain on flush
    #[serde(default = "default_common_wait")]
    pub flush_drain: WaitBudget,

    /// Periodic wake of the delivery thread
    #[serde(default = "default_delivery_check_ms")]
    pub delivery_check_ms: u64,

    /// Idle time with pending work before a stuck-delivery report
    #[serde(default = "default_delivery_inspect_ms")]
    pub delivery_inspect_ms: u64,

    /// Timeout passed to each blocking driver dequeue
    #[serde(default = "default_deque_timeout_ms")]
    pub deque_timeout_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            start_ready: default_short_wait(),
            transfer_job: default_short_wait(),
            flush_drain: default_common_wait(),
            delivery_check_ms: DEFAULT_DELIVERY_CHECK_MS,
            delivery_inspect_ms: DEFAULT_DELIVERY_INSPECT_MS,
            deque_timeout_ms: DEFAULT_DEQUE_TIMEOUT_MS,
        }
    }
}

impl TimingConfig {
    pub fn delivery_check(&self) -> Duration {
        Duration::from_millis(self.delivery_check_ms)
    }

    pub fn delivery_inspect(&self) -> Duration {
        Duration::from_millis(self.delivery_inspect_ms)
    }

    pub fn deque_timeout(&self) -> Duration {
        Duration::from_millis(self.deque_timeout_ms)
    }
}
