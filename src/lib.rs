//! # p1node-rs: P1 pipeline node
//!
//! The first stage of a camera processing pipeline. A [`P1Node`] takes
//! capture requests from the consumer above it, groups them into hardware
//! jobs, drives them through the 3A library and the camera driver, and
//! hands every request back exactly once: Normal requests in frame-number
//! order, bypass requests as soon as they are released.
//!
//! ## Architecture
//!
//! - **Actions** ([`action`]): one record per request or filler frame,
//!   owned by an arena and addressed by handle
//! - **Tasks** ([`task`]): action pool, magic numbers and the collector
//!   that rolls actions into burst-sized jobs
//! - **Delivery** ([`delivery`]): a worker thread that reorders released
//!   actions and dispatches them to the consumer
//! - **Node** ([`node`]): the request queue, the processing queue, the
//!   deque thread and the flush machinery
//! - **Collaborators** ([`hal`]): driver, 3A, consumer and buffer traits
//!
//! Threads talk through mutex/condvar pairs and crossbeam channels.
//!
//! ## Configuration
//!
//! [`NodeConfig`] is plain serde data, loaded from TOML with
//! [`NodeConfig::load`] and checked with [`NodeConfig::validate`] before a
//! node is built.
//!
//! ## Example
//!
//! ```ignore
//! use p1node_rs::{Collaborators, NodeConfig, P1Node};
//!
//! let config = NodeConfig::load("p1node.toml")?;
//! let node = P1Node::new(config, Collaborators {
//!     driver,
//!     hal3a,
//!     consumer,
//!     buffers: None,
//! })?;
//! node.init()?;
//! node.queue(frame)?;
//! // ...
//! node.flush()?;
//! node.uninit()?;
//! ```

pub mod action;
pub mod config;
pub mod delivery;
pub mod error;
pub mod hal;
pub mod node;
pub mod task;
pub mod types;

// Re-export commonly used types
pub use action::{ActId, FlushSet, FrameNo, MagicNum, MetaSet, Metadata, RequestNo};
pub use config::{NodeConfig, PortConfig, TimingConfig};
pub use delivery::FrameAction;
pub use error::{NodeError, Result};
pub use hal::{CameraDriver, FrameConsumer, Hal3A, PipelineFrame};
pub use node::{Collaborators, DropNotifier, NodeDump, NodeStats, P1Node};
pub use types::{AcceptResult, OutPort, RequestKind, StreamImg, StreamMeta};
