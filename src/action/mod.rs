//! Action records and the containers that move them around
//!
//! - [`id`] - Sequence ids, magic numbers, consumer numbering
//! - [`flush`] - Flush reasons and the no-buffer record
//! - [`meta`] - Metadata store and the 3A control set
//! - [`record`] - The per-request execution record
//! - [`arena`] - Generational storage and move-only handles
//! - [`job`] - Burst groups of handles

pub mod arena;
pub mod flush;
pub mod id;
pub mod job;
pub mod meta;
pub mod record;

pub use arena::{ActHandle, ActionArena};
pub use flush::{FlushSet, NoBufferSet};
pub use id::{ActId, FrameNo, MagicNum, RequestNo};
pub use job::Job;
pub use meta::{tag, MetaSet, MetaValue, Metadata};
pub use record::{ActionRecord, CropInfo, ImageSlot, LockState, MetaSlot, OutRequest, SlotSource};
