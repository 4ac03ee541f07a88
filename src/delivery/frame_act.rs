//! Delivery snapshots
//!
//! A [`FrameAction`] copies the fields delivery and the consumer need out
//! of an [`ActionRecord`], so the record can be retired before the
//! snapshot is dispatched.

use crate::action::flush::{FlushSet, NoBufferSet};
use crate::action::id::{ActId, FrameNo, MagicNum, RequestNo};
use crate::action::record::ActionRecord;
use crate::hal::frame::PipelineFrame;
use crate::types::{ActionKind, RequestKind};
use serde::Serialize;
use std::sync::Arc;

/// Snapshot of a finished action
#[derive(Debug, Clone)]
pub struct FrameAction {
    pub id: ActId,
    pub magic: MagicNum,
    pub frame_no: FrameNo,
    pub request_no: RequestNo,
    pub request: Option<RequestKind>,
    pub flush: FlushSet,
    pub no_buffer: NoBufferSet,
    pub sof_idx: u32,
    pub frame_ts_ns: i64,
    pub frame: Option<Arc<PipelineFrame>>,
}

impl FrameAction {
    pub fn from_record(record: &ActionRecord) -> Self {
        Self {
            id: record.id,
            magic: record.magic,
            frame_no: record.frame_no,
            request_no: record.request_no,
            request: record.request,
            flush: record.flush,
            no_buffer: record.no_buffer,
            sof_idx: record.sof_idx,
            frame_ts_ns: record.frame_ts_ns,
            frame: record.frame.clone(),
        }
    }

    pub fn kind(&self) -> ActionKind {
        ActionKind::of(self.request)
    }

    pub fn is_flushed(&self) -> bool {
        !self.flush.is_empty()
    }

    /// Compact form for diagnostics dumps
    pub fn summary(&self) -> FrameActionSummary {
        FrameActionSummary {
            frame: self.frame_no.0,
            magic: self.magic.0,
            kind: self
                .request
                .map_or_else(|| "Null".to_string(), |k| k.to_string()),
            flush: self.flush.bits(),
        }
    }
}

/// Serializable view of a [`FrameAction`]
#[derive(Debug, Clone, Serialize)]
pub struct FrameActionSummary {
    pub frame: u32,
    pub magic: i32,
    pub kind: String,
    pub flush: u32,
}
