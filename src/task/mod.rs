//! Action lifecycle management
//!
//! - [`controller`] - Live pool, ids, magic numbers and the session lock
//! - [`collector`] - FIFO roll and burst job assembly
//! - [`magic`] - Driver-backed and local magic number sources

pub mod collector;
pub mod controller;
pub mod magic;

pub use collector::TaskCollector;
pub use controller::{PoolDump, TaskController};
pub use magic::{DriverMagic, LocalMagic, MagicGenerator};
