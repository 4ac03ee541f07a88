//! Core data types shared across the P1 node
//!
//! This module contains the classification enums and geometry primitives
//! every other module builds on:
//!
//! - [`RequestKind`] - Closed sum type describing what a request is
//! - [`ActionKind`] - Coarse routing class derived from the request kind
//! - [`ExeState`] - Per-action execution state
//! - [`StreamImg`] / [`StreamMeta`] - Fixed stream slot indices
//! - [`OutPort`] - Hardware output ports
//! - [`AcceptResult`] - Typed admission outcome of `queue()`
//! - [`Size`], [`Point`], [`Rect`] - Crop/resize geometry

use serde::{Deserialize, Serialize};
use std::fmt;

// ==================== Request Classification ====================

/// Internal request flavours. These never reach the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InternalKind {
    /// Warm-up action enqueued before the driver starts
    Initial,
    /// Cadence filler added after a YUV reprocess request
    Padding,
    /// Synthesized when no real job can be assembled
    Dummy,
}

/// Bypass request flavours. These skip delivery ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BypassKind {
    /// Opaque raw reprocess
    Redo,
    /// YUV reprocess
    Yuv,
    /// Zero-shutter-lag reprocess
    Zsl,
}

/// What a request is. Exhaustive matching on this type replaces the
/// integer request-type tags of older camera stacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestKind {
    Normal,
    Internal(InternalKind),
    Bypass(BypassKind),
}

impl RequestKind {
    pub const INITIAL: RequestKind = RequestKind::Internal(InternalKind::Initial);
    pub const PADDING: RequestKind = RequestKind::Internal(InternalKind::Padding);
    pub const DUMMY: RequestKind = RequestKind::Internal(InternalKind::Dummy);
    pub const REDO: RequestKind = RequestKind::Bypass(BypassKind::Redo);
    pub const YUV: RequestKind = RequestKind::Bypass(BypassKind::Yuv);
    pub const ZSL: RequestKind = RequestKind::Bypass(BypassKind::Zsl);

    /// Routing class of this request kind
    pub fn action_kind(self) -> ActionKind {
        match self {
            RequestKind::Normal => ActionKind::Normal,
            RequestKind::Internal(_) => ActionKind::Internal,
            RequestKind::Bypass(_) => ActionKind::Bypass,
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestKind::Normal => "Normal",
            RequestKind::Internal(InternalKind::Initial) => "Initial",
            RequestKind::Internal(InternalKind::Padding) => "Padding",
            RequestKind::Internal(InternalKind::Dummy) => "Dummy",
            RequestKind::Bypass(BypassKind::Redo) => "Redo",
            RequestKind::Bypass(BypassKind::Yuv) => "Yuv",
            RequestKind::Bypass(BypassKind::Zsl) => "Zsl",
        };
        f.write_str(name)
    }
}

/// Routing class of an action.
///
/// `Null` is what a record reports before its request kind is filled in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ActionKind {
    #[default]
    Null,
    Normal,
    Internal,
    Bypass,
}

impl ActionKind {
    /// Map an optional request kind; a missing kind is `Null`
    pub fn of(kind: Option<RequestKind>) -> Self {
        kind.map(RequestKind::action_kind).unwrap_or(ActionKind::Null)
    }
}

// ==================== Execution State ====================

/// Per-action execution state. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum ExeState {
    #[default]
    Requested,
    Processing,
    Done,
}

/// Sensor control requested through hal metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SensorCtrl {
    #[default]
    None,
    Standby,
    Streaming,
}

/// Capture type reported by 3A for a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CaptureType {
    #[default]
    Normal,
    HighQuality,
    Manual,
}

/// Raw format produced on the full-size port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RawType {
    #[default]
    Processed,
    Pure,
}

/// Sensor receive mode; conservative mode doubles the admission depth
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiveMode {
    #[default]
    Normal,
    Conservative,
}

// ==================== Streams and Ports ====================

/// Image stream slots of a request frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StreamImg {
    InYuv,
    InOpaque,
    OutOpaque,
    OutFull,
    OutResize,
    OutLcs,
    OutRss,
}

impl StreamImg {
    pub const COUNT: usize = 7;
    pub const ALL: [StreamImg; Self::COUNT] = [
        StreamImg::InYuv,
        StreamImg::InOpaque,
        StreamImg::OutOpaque,
        StreamImg::OutFull,
        StreamImg::OutResize,
        StreamImg::OutLcs,
        StreamImg::OutRss,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn is_input(self) -> bool {
        matches!(self, StreamImg::InYuv | StreamImg::InOpaque)
    }
}

/// Metadata stream slots of a request frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StreamMeta {
    InApp,
    InHal,
    OutApp,
    OutHal,
}

impl StreamMeta {
    pub const COUNT: usize = 4;
    pub const ALL: [StreamMeta; Self::COUNT] = [
        StreamMeta::InApp,
        StreamMeta::InHal,
        StreamMeta::OutApp,
        StreamMeta::OutHal,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn is_input(self) -> bool {
        matches!(self, StreamMeta::InApp | StreamMeta::InHal)
    }
}

/// Hardware output ports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutPort {
    /// Full-size raw
    Imgo,
    /// Resized raw
    Rrzo,
    /// Local contrast statistics
    Lcso,
    /// Resized statistics
    Rsso,
}

impl OutPort {
    pub const ALL: [OutPort; 4] = [OutPort::Imgo, OutPort::Rrzo, OutPort::Lcso, OutPort::Rsso];

    /// Bit used in the per-port no-buffer exception record
    pub fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

impl fmt::Display for OutPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OutPort::Imgo => "IMGO",
            OutPort::Rrzo => "RRZO",
            OutPort::Lcso => "LCSO",
            OutPort::Rsso => "RSSO",
        };
        f.write_str(name)
    }
}

// ==================== Admission ====================

/// Outcome of offering a request to the node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcceptResult {
    AcceptAvailable,
    AcceptBypass,
    RejectNotAvailable,
    RejectIoPipeEvent,
}

impl AcceptResult {
    pub fn is_accepted(self) -> bool {
        matches!(self, AcceptResult::AcceptAvailable | AcceptResult::AcceptBypass)
    }
}

// ==================== Geometry ====================

/// Width/height pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Size {
    pub w: u32,
    pub h: u32,
}

impl Size {
    pub const fn new(w: u32, h: u32) -> Self {
        Self { w, h }
    }

    pub fn is_empty(&self) -> bool {
        self.w == 0 || self.h == 0
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.w, self.h)
    }
}

/// Top-left corner of a region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

/// Region of interest in sensor coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub p: Point,
    pub s: Size,
}

impl Rect {
    pub const fn new(x: i32, y: i32, w: u32, h: u32) -> Self {
        Self {
            p: Point { x, y },
            s: Size { w, h },
        }
    }

    /// Whole-area rectangle of the given size
    pub const fn of(size: Size) -> Self {
        Self::new(0, 0, size.w, size.h)
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})-{}", self.p.x, self.p.y, self.s)
    }
}
