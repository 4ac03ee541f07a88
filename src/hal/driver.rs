//! Camera driver contract
//!
//! The node talks to the image-processing hardware only through
//! [`CameraDriver`]. A job is enqueued as one [`EnqueueRequest`] carrying
//! one [`BufInfo`] per requested port per action; the deque thread blocks
//! in [`CameraDriver::dequeue`] until the hardware hands a filled set back.
//!
//! Implementations must let `stop` unblock a pending `dequeue`, which then
//! returns an empty [`DequeResult`].

use crate::action::id::MagicNum;
use crate::error::Result;
use crate::types::{OutPort, RawType, Rect, Size};
use std::time::Duration;

/// What kind of enqueue this is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueKind {
    /// Warm-up job before driver start
    Initial,
    /// Regular job after its 3A set completed
    Normal,
    /// Job pushed straight through at start (request or capture flow)
    Direct,
}

/// Buffer programmed on one port for one action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufInfo {
    pub port: OutPort,
    pub address: u64,
    pub magic: MagicNum,
    pub crop: Rect,
    pub dst: Size,
    pub raw: RawType,
}

/// One driver enqueue: a whole job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueueRequest {
    pub kind: EnqueueKind,
    pub job_id: MagicNum,
    pub buffers: Vec<BufInfo>,
    /// Exposure of the first action, used for shutter timing
    pub shutter_ns: i64,
}

/// One buffer handed back by the hardware
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DequedBuf {
    pub port: OutPort,
    pub address: u64,
    /// Magic the hardware reports for the frame it wrote
    pub magic: MagicNum,
    pub timestamp_ns: i64,
    pub timestamp_boot_ns: i64,
    pub raw: RawType,
}

/// Result of one blocking dequeue
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DequeResult {
    pub buffers: Vec<DequedBuf>,
}

impl DequeResult {
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Buffer carrying the n-th action's output on a port.
    ///
    /// Buffers of the same port keep their job order regardless of how
    /// ports are interleaved, so the n-th buffer of a port belongs to the
    /// n-th action.
    pub fn port_buffer(&self, port: OutPort, nth: usize) -> Option<&DequedBuf> {
        self.buffers.iter().filter(|b| b.port == port).nth(nth)
    }
}

/// Out-of-band driver commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverCommand {
    /// Allocate the next magic number
    GenMagicNum,
    /// Query the hardware resize ratio limit in percent
    QueryResizeRatio,
}

/// Port configuration handed to the driver at hardware start
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSetting {
    pub port: OutPort,
    pub size: Size,
}

/// The camera driver
pub trait CameraDriver: Send + Sync {
    /// Program the output ports before start
    fn configure(&self, ports: &[PortSetting], burst_size: usize) -> Result<()>;

    fn start(&self) -> Result<()>;

    /// Stop streaming; pending dequeues return empty
    fn stop(&self) -> Result<()>;

    /// Drop every enqueued job without completing it
    fn abort(&self) -> Result<()>;

    /// Put the sensor into standby
    fn suspend(&self) -> Result<()>;

    /// Resume streaming after standby
    fn resume(&self) -> Result<()>;

    fn enqueue(&self, request: EnqueueRequest) -> Result<()>;

    /// Block until a filled buffer set is ready, stop is called, or the
    /// timeout elapses (empty result)
    fn dequeue(&self, timeout: Duration) -> Result<DequeResult>;

    fn send_command(&self, command: DriverCommand) -> Result<i64>;
}
