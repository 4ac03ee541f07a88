//! Capability traits passed between node components
//!
//! Components never hold a back-pointer to the node. Each one receives
//! only the narrow capability it calls:
//!
//! - [`SequenceRegistry`] - the collector registers Normal frame numbers
//!   with the delivery engine
//! - [`FrameReturn`] - the collector and the node hand finished actions to
//!   the single release path
//! - [`FrameRelease`] - the delivery engine hands ordered snapshots to the
//!   consumer dispatcher

use crate::action::arena::ActHandle;
use crate::action::flush::FlushSet;
use crate::action::id::FrameNo;
use crate::delivery::frame_act::FrameAction;

/// Registers the order Normal frames must be delivered in
pub trait SequenceRegistry: Send + Sync {
    /// Returns false if nothing is enforcing order right now
    fn register_sequence(&self, frame: FrameNo) -> bool;
}

/// The single exit point of an action
pub trait FrameReturn: Send + Sync {
    /// Apply `flush`, release every slot, retire the id and hand the
    /// snapshot on. Consumes the handle.
    fn return_frame(&self, act: ActHandle, flush: FlushSet, trigger: bool);
}

/// Final hand-off of a snapshot to the consumer
pub trait FrameRelease: Send + Sync {
    fn release_frame(&self, action: FrameAction);
}
