//! Magic number generation
//!
//! By default magic numbers come from the driver, which keeps its own
//! counter so the numbers it reports on dequeue line up with what was
//! enqueued. [`LocalMagic`] generates them in-process; it also backs the
//! driver source when the driver cannot answer.

use crate::action::id::MagicNum;
use crate::hal::driver::{CameraDriver, DriverCommand};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Source of magic numbers for registered actions
pub trait MagicGenerator: Send + Sync {
    fn next_magic(&self) -> MagicNum;
}

/// In-process counter; wraps back to FIRST below the uncertain mask
pub struct LocalMagic {
    next: AtomicI32,
}

impl LocalMagic {
    pub fn new() -> Self {
        Self {
            next: AtomicI32::new(MagicNum::FIRST.0),
        }
    }
}

impl Default for LocalMagic {
    fn default() -> Self {
        Self::new()
    }
}

impl MagicGenerator for LocalMagic {
    fn next_magic(&self) -> MagicNum {
        let prev = self
            .next
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                Some(MagicNum(cur).next().0)
            })
            .unwrap_or(MagicNum::FIRST.0);
        MagicNum(prev)
    }
}

/// Asks the driver for each number
pub struct DriverMagic {
    driver: Arc<dyn CameraDriver>,
    fallback: LocalMagic,
}

impl DriverMagic {
    pub fn new(driver: Arc<dyn CameraDriver>) -> Self {
        Self {
            driver,
            fallback: LocalMagic::new(),
        }
    }
}

impl MagicGenerator for DriverMagic {
    fn next_magic(&self) -> MagicNum {
        match self.driver.send_command(DriverCommand::GenMagicNum) {
            Ok(raw) => MagicNum::from_driver(raw),
            Err(e) => {
                let magic = self.fallback.next_magic();
                warn!(error = %e, %magic, "driver could not generate magic number, using local");
                magic
            }
        }
    }
}
