//! 3A contract
//!
//! The node hands every job's control metadata to 3A with `set` and gets
//! per-frame results back with `get`. 3A drives the node's cadence through
//! [`Hal3AEvent`] notifications delivered to an attached
//! [`Hal3AListener`].

use crate::action::id::MagicNum;
use crate::action::meta::{MetaSet, Metadata};
use crate::error::Result;
use crate::types::CaptureType;
use std::sync::Weak;

/// Capture parameters 3A reports when it finishes processing a frame
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaptureParam {
    pub capture_type: CaptureType,
    pub exposure_ns: i64,
    /// Early metadata for the consumer
    pub meta: Metadata,
}

/// Notifications from 3A
#[derive(Debug, Clone, PartialEq)]
pub enum Hal3AEvent {
    /// 3A finished preparing the frame with this magic
    ProcFinish {
        magic: MagicNum,
        sof_idx: u32,
        capture: Option<CaptureParam>,
    },
    /// Current result for an in-flight frame
    CurrentResult { magic: MagicNum, meta: Metadata },
    /// Vertical sync done
    VsyncDone,
}

/// Receiver of 3A notifications
pub trait Hal3AListener: Send + Sync {
    fn on_3a_notify(&self, event: Hal3AEvent);
}

/// The 3A library
pub trait Hal3A: Send + Sync {
    fn start(&self) -> Result<()>;

    fn stop(&self) -> Result<()>;

    /// Queue a job's control metadata
    fn set(&self, batch: &[MetaSet]) -> Result<()>;

    /// Announce control metadata ahead of `set`
    fn preset(&self, batch: &[MetaSet]) -> Result<()>;

    /// Result metadata of a finished frame
    fn get(&self, magic: MagicNum) -> Result<MetaSet>;

    /// Current result; used for high-quality captures
    fn get_cur(&self, magic: MagicNum) -> Result<MetaSet>;

    fn notify_p1_done(&self, magic: MagicNum);

    /// Start in request mode with the collected jobs
    fn start_request_q(&self, batch: &[MetaSet]) -> Result<CaptureType>;

    /// Start in capture mode with the first job
    fn start_capture(&self, batch: &[MetaSet]) -> Result<CaptureType>;

    fn attach(&self, listener: Weak<dyn Hal3AListener>);

    fn detach(&self);
}
