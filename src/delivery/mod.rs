//! Ordered delivery of finished actions
//!
//! - [`frame_act`] - Snapshots handed to the consumer
//! - [`engine`] - The delivery thread and its queues
//! - [`wait`] - Bounded waits shared by every thread in the crate

pub mod engine;
pub mod frame_act;
pub mod wait;

pub use engine::{DeliveryDump, DeliveryEngine, LoopState};
pub use frame_act::{FrameAction, FrameActionSummary};
pub use wait::WaitOutcome;
