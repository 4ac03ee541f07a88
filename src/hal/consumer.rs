//! Downstream consumer contract
//!
//! [`FrameConsumer::on_dispatch_frame`] is called exactly once for every
//! consumer-visible request, in frame-number order for Normal requests.
//! The `on_ctrl_*` hooks are only invoked for frames that asked for them
//! (see [`PipelineFrame::needs_ctrl_callback`]); their default
//! implementations leave everything untouched.

use crate::action::id::FrameNo;
use crate::action::meta::Metadata;
use crate::delivery::frame_act::FrameAction;
use crate::hal::frame::PipelineFrame;
use crate::types::StreamMeta;

pub trait FrameConsumer: Send + Sync {
    /// The request is complete; `action.flush` tells whether it succeeded
    fn on_dispatch_frame(&self, action: FrameAction);

    /// Metadata available before the frame completes
    fn on_early_callback(&self, _frame: &PipelineFrame, _stream: StreamMeta, _meta: &Metadata) {}

    /// Edit the control metadata before it goes to 3A. Return true if changed.
    fn on_ctrl_setting(&self, _frame: &PipelineFrame, _app: &mut Metadata, _hal: &mut Metadata) -> bool {
        false
    }

    /// Edit the resize decision carried in hal metadata. Return true if changed.
    fn on_ctrl_resize(&self, _frame: &PipelineFrame, _hal: &mut Metadata) -> bool {
        false
    }

    /// Edit result metadata before release. Return true if changed.
    fn on_ctrl_readout(&self, _frame: &PipelineFrame, _app: &mut Metadata, _hal: &mut Metadata) -> bool {
        false
    }

    /// The job holding this frame is about to be enqueued
    fn on_ctrl_sync(&self, _frame: &PipelineFrame) {}

    /// The node can take another request
    fn on_request_beckon(&self, _last_frame: FrameNo) {}
}
