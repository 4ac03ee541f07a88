//! The per-request execution record
//!
//! An [`ActionRecord`] carries everything the node learns about one
//! in-flight request between admission and release: identity, request
//! classification, hardware-state fields, buffer slots and flush reasons.
//! Records live in the [`ActionArena`](super::arena::ActionArena) and are
//! only reached through a move-only handle.

use super::flush::{FlushSet, NoBufferSet};
use super::id::{ActId, FrameNo, MagicNum, RequestNo};
use super::meta::{MetaSet, Metadata};
use crate::hal::frame::{ImageBuffer, PipelineFrame};
use crate::types::{
    ActionKind, CaptureType, ExeState, InternalKind, OutPort, RawType, Rect, RequestKind,
    SensorCtrl, Size, StreamImg, StreamMeta,
};
use std::sync::Arc;

/// Where the buffer in a slot came from; decides where it goes back to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlotSource {
    #[default]
    Empty,
    Frame,
    Pool,
    Stuff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockState {
    #[default]
    Unlocked,
    ReadLocked,
    WriteLocked,
}

/// One image stream slot
#[derive(Debug, Default)]
pub struct ImageSlot {
    /// The request frame configures this stream
    pub exists: bool,
    pub buffer: Option<ImageBuffer>,
    pub source: SlotSource,
    pub lock: LockState,
    /// Port the buffer was programmed on, if any
    pub port: Option<OutPort>,
}

impl ImageSlot {
    pub fn is_held(&self) -> bool {
        self.buffer.is_some() || self.lock != LockState::Unlocked
    }
}

/// One metadata stream slot
#[derive(Debug, Default)]
pub struct MetaSlot {
    pub exists: bool,
    pub content: Option<Metadata>,
    pub lock: LockState,
}

impl MetaSlot {
    pub fn is_held(&self) -> bool {
        self.content.is_some() || self.lock != LockState::Unlocked
    }
}

/// An output the hardware must write for this action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutRequest {
    pub port: OutPort,
    pub stream: StreamImg,
    /// Served from a stuff buffer regardless of what the request carries
    pub stuff: bool,
}

/// Image stream a port writes into
pub fn port_stream(port: OutPort, opaque: bool) -> StreamImg {
    match port {
        OutPort::Imgo if opaque => StreamImg::OutOpaque,
        OutPort::Imgo => StreamImg::OutFull,
        OutPort::Rrzo => StreamImg::OutResize,
        OutPort::Lcso => StreamImg::OutLcs,
        OutPort::Rsso => StreamImg::OutRss,
    }
}

/// Crop and destination sizes of the full and resized outputs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CropInfo {
    pub sensor: Size,
    pub full_crop: Rect,
    pub full_dst: Size,
    pub resize_crop: Rect,
    pub resize_dst: Size,
    /// Request crop region in sensor coordinates, if any
    pub scaler_crop: Option<Rect>,
}

/// Execution record of one in-flight request
#[derive(Debug)]
pub struct ActionRecord {
    pub id: ActId,
    pub magic: MagicNum,
    pub frame_no: FrameNo,
    pub request_no: RequestNo,
    pub request: Option<RequestKind>,
    pub exe_state: ExeState,
    pub frame: Option<Arc<PipelineFrame>>,

    // Hardware state, fixed once the action is enqueued
    pub sensor_ctrl: SensorCtrl,
    pub capture_type: CaptureType,
    pub full_raw: RawType,
    pub raw_type_changed: bool,
    pub crop: CropInfo,
    pub outputs: Vec<OutRequest>,

    pub meta_set: MetaSet,
    pub images: [ImageSlot; StreamImg::COUNT],
    pub metas: [MetaSlot; StreamMeta::COUNT],

    pub flush: FlushSet,
    pub no_buffer: NoBufferSet,

    pub sof_idx: u32,
    pub exposure_ns: i64,
    pub frame_ts_ns: i64,
    pub frame_ts_boot_ns: i64,
    pub readout_ready: bool,
}

impl ActionRecord {
    pub fn new(id: ActId) -> Self {
        Self {
            id,
            magic: MagicNum::NULL,
            frame_no: FrameNo::INVALID,
            request_no: RequestNo::INVALID,
            request: None,
            exe_state: ExeState::Requested,
            frame: None,
            sensor_ctrl: SensorCtrl::None,
            capture_type: CaptureType::Normal,
            full_raw: RawType::Processed,
            raw_type_changed: false,
            crop: CropInfo::default(),
            outputs: Vec::new(),
            meta_set: MetaSet::default(),
            images: Default::default(),
            metas: Default::default(),
            flush: FlushSet::NONE,
            no_buffer: NoBufferSet::default(),
            sof_idx: 0,
            exposure_ns: 0,
            frame_ts_ns: 0,
            frame_ts_boot_ns: 0,
            readout_ready: false,
        }
    }

    pub fn kind(&self) -> ActionKind {
        ActionKind::of(self.request)
    }

    pub fn set_flush(&mut self, reason: FlushSet) {
        self.flush |= reason;
    }

    pub fn is_flushed(&self) -> bool {
        !self.flush.is_empty()
    }

    /// Advance the execution state; it never moves backwards
    pub fn advance(&mut self, state: ExeState) {
        if state > self.exe_state {
            self.exe_state = state;
        }
    }

    /// Flush reason an internal action is released with
    pub fn internal_flush(&self) -> Option<FlushSet> {
        match self.request {
            Some(RequestKind::Internal(InternalKind::Initial)) => Some(FlushSet::INITIAL),
            Some(RequestKind::Internal(InternalKind::Padding)) => Some(FlushSet::PADDING),
            Some(RequestKind::Internal(InternalKind::Dummy)) => Some(FlushSet::DUMMY),
            _ => None,
        }
    }

    /// Whether any buffer or metadata slot is still held
    pub fn holds_buffers(&self) -> bool {
        self.images.iter().any(ImageSlot::is_held) || self.metas.iter().any(MetaSlot::is_held)
    }

    pub fn image(&self, stream: StreamImg) -> &ImageSlot {
        &self.images[stream.index()]
    }

    pub fn image_mut(&mut self, stream: StreamImg) -> &mut ImageSlot {
        &mut self.images[stream.index()]
    }

    pub fn meta(&self, stream: StreamMeta) -> &MetaSlot {
        &self.metas[stream.index()]
    }

    pub fn meta_mut(&mut self, stream: StreamMeta) -> &mut MetaSlot {
        &mut self.metas[stream.index()]
    }

    /// Slot programmed on a port, if the action requested that port
    pub fn port_slot(&self, port: OutPort) -> Option<&ImageSlot> {
        self.outputs
            .iter()
            .find(|o| o.port == port)
            .map(|o| self.image(o.stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_record_is_empty() {
        let rec = ActionRecord::new(ActId(3));
        assert_eq!(rec.kind(), ActionKind::Null);
        assert_eq!(rec.exe_state, ExeState::Requested);
        assert!(!rec.holds_buffers());
        assert!(!rec.is_flushed());
    }

    #[test]
    fn test_state_only_advances() {
        let mut rec = ActionRecord::new(ActId(1));
        rec.advance(ExeState::Done);
        rec.advance(ExeState::Processing);
        assert_eq!(rec.exe_state, ExeState::Done);
    }

    #[test]
    fn test_internal_flush_reason() {
        let mut rec = ActionRecord::new(ActId(1));
        rec.request = Some(RequestKind::PADDING);
        assert_eq!(rec.internal_flush(), Some(FlushSet::PADDING));
        rec.request = Some(RequestKind::Normal);
        assert_eq!(rec.internal_flush(), None);
    }

    #[test]
    fn test_holds_buffers_tracks_slots() {
        let mut rec = ActionRecord::new(ActId(1));
        rec.image_mut(StreamImg::OutFull).buffer = Some(ImageBuffer::new(Size::new(2, 2)));
        assert!(rec.holds_buffers());
        rec.image_mut(StreamImg::OutFull).buffer = None;
        rec.meta_mut(StreamMeta::InApp).lock = LockState::ReadLocked;
        assert!(rec.holds_buffers());
    }

    #[test]
    fn test_port_stream_mapping() {
        assert_eq!(port_stream(OutPort::Imgo, false), StreamImg::OutFull);
        assert_eq!(port_stream(OutPort::Imgo, true), StreamImg::OutOpaque);
        assert_eq!(port_stream(OutPort::Rsso, false), StreamImg::OutRss);
    }
}
