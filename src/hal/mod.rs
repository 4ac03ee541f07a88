//! Collaborator contracts
//!
//! The node never talks to hardware, 3A or the downstream pipeline
//! directly. Everything outside the frame lifecycle is reached through the
//! traits in this module:
//!
//! - [`driver`] - [`CameraDriver`]: enqueue/dequeue and streaming control
//! - [`three_a`] - [`Hal3A`]: control metadata in, results and cadence out
//! - [`consumer`] - [`FrameConsumer`]: where finished requests go
//! - [`frame`] - [`PipelineFrame`]: the request and its stream buffers
//! - [`buffers`] - [`BufferProvider`]: pool and stuff buffers owned by the node
//!
//! With the `sim-driver` feature, [`sim`] provides in-process stand-ins
//! for the driver and 3A.

pub mod buffers;
pub mod consumer;
pub mod driver;
pub mod frame;
#[cfg(feature = "sim-driver")]
pub mod sim;
pub mod three_a;

pub use buffers::{BufferProvider, ImagePool};
pub use consumer::FrameConsumer;
pub use driver::{
    BufInfo, CameraDriver, DequeResult, DequedBuf, DriverCommand, EnqueueKind, EnqueueRequest,
    PortSetting,
};
pub use frame::{BufferStatus, FrameBuilder, ImageBuffer, PipelineFrame};
#[cfg(feature = "sim-driver")]
pub use sim::{Sim3A, SimDriver};
pub use three_a::{CaptureParam, Hal3A, Hal3AEvent, Hal3AListener};
