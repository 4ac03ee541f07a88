//! The P1 pipeline node
//!
//! [`P1Node`] turns consumer requests into driver jobs and driver results
//! back into ordered, exactly-once consumer callbacks.
//!
//! # Architecture
//!
//! ```text
//!  queue(frame) ──> collector roll ──require_job──> request queue ──3A set──┐
//!                                                                          │
//!        ┌──────────── on_sync_begin(magic) <── 3A proc finish ────────────┘
//!        v
//!  driver enqueue ──> processing queue ──deque thread──> result metadata
//!                                                              │
//!  consumer <── delivery thread <── release path <─────────────┘
//! ```
//!
//! # Threads
//!
//! - The caller, serialized by the public lock (`queue`, `kick`, `flush`)
//! - The deque thread, blocked in driver dequeue while streaming
//! - The delivery thread, see [`DeliveryEngine`]
//! - 3A and driver callback threads entering through [`P1Node::notify_3a`]
//!   and [`DropNotifier`]
//!
//! # Lock order
//!
//! public lock, hardware lock, frame-set lock, session lock, a job queue,
//! the action arena. The release path takes none of the node's own locks,
//! so it may run under any of them.

pub mod context;
mod accept;
mod crop;
mod dequeue;
mod enqueue;
mod flush;
mod hardware;
mod queues;
mod release;
mod result;
mod state;

pub use queues::DropNotifier;
pub use state::{CapturePhase, StartState};

use crate::action::id::{FrameNo, RequestNo};
use crate::config::{MagicSource, NodeConfig, PortConfig};
use crate::delivery::engine::{DeliveryDump, DeliveryEngine};
use crate::delivery::wait::lock;
use crate::error::{NodeError, Result};
use crate::hal::buffers::{BufferProvider, ImagePool};
use crate::hal::consumer::FrameConsumer;
use crate::hal::driver::CameraDriver;
use crate::hal::frame::PipelineFrame;
use crate::hal::three_a::{Hal3A, Hal3AEvent, Hal3AListener};
use crate::task::collector::TaskCollector;
use crate::task::controller::TaskController;
use crate::task::magic::{DriverMagic, LocalMagic, MagicGenerator};
use crate::types::{AcceptResult, Size};
use chrono::{DateTime, Utc};
use queues::{DropQueue, JobQueue};
use release::{Dispatcher, ReleasePath};
use serde::Serialize;
use state::{CaptureGate, NodeState, TransferJob};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::JoinHandle;
use tracing::{debug, error, info};

/// Running counters, reported by [`P1Node::stats`] and in dumps
#[derive(Debug, Clone, Default, Serialize)]
pub struct NodeStats {
    pub accepted: u64,
    pub rejected: u64,
    pub dummy_jobs: u64,
    pub enqueued_jobs: u64,
    pub enqueue_failures: u64,
    pub deque_matched: u64,
    pub deque_mismatch: u64,
    pub deque_unmatched: u64,
    pub dropped: u64,
}

/// Diagnostics snapshot of the node
#[derive(Debug, Clone, Serialize)]
pub struct NodeDump {
    pub captured_at: DateTime<Utc>,
    pub active: bool,
    pub ready: bool,
    pub start: StartState,
    pub capture: CapturePhase,
    pub standby: bool,
    pub first_received: bool,
    pub in_flight: i32,
    pub roll: usize,
    pub request_queue: Vec<i32>,
    pub processing_queue: Vec<i32>,
    pub drop_queue: usize,
    pub stats: NodeStats,
    pub delivery: DeliveryDump,
}

/// The collaborators a node is built around
pub struct Collaborators {
    pub driver: Arc<dyn CameraDriver>,
    pub hal3a: Arc<dyn Hal3A>,
    pub consumer: Arc<dyn FrameConsumer>,
    /// Pool and stuff buffers; a pool sized from the config when `None`
    pub buffers: Option<Arc<dyn BufferProvider>>,
}

/// Progress of the initial request run
#[derive(Debug, Default)]
struct InitRequest {
    /// Requests to collect before a request-mode start
    num: usize,
    count: usize,
    pending: bool,
}

impl InitRequest {
    fn new(num: usize) -> Self {
        Self {
            num,
            count: 0,
            pending: num > 0,
        }
    }

    fn rearm(&mut self) {
        self.count = 0;
        self.pending = self.num > 0;
    }
}

/// State shared between the caller, the deque thread and 3A callbacks
struct NodeShared {
    config: Arc<NodeConfig>,
    ports: RwLock<PortConfig>,
    driver: Arc<dyn CameraDriver>,
    hal3a: Arc<dyn Hal3A>,
    consumer: Arc<dyn FrameConsumer>,
    buffers: Arc<dyn BufferProvider>,
    task: Arc<TaskController>,
    collector: TaskCollector,
    delivery: Arc<DeliveryEngine>,
    release: Arc<ReleasePath>,

    state: NodeState,
    capture: CaptureGate,
    transfer: TransferJob,
    request_q: JobQueue,
    processing_q: JobQueue,
    drops: DropQueue,

    hardware_lock: Mutex<()>,
    frame_set_lock: Mutex<()>,
    frame_set: AtomicBool,
    init_req: Mutex<InitRequest>,
    resize_ratio: AtomicU32,
    last_request: Mutex<(FrameNo, RequestNo)>,
    in_flight: Arc<AtomicI32>,
    stats: Mutex<NodeStats>,
}

impl NodeShared {
    fn ports(&self) -> PortConfig {
        self.ports
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn sensor_size(&self) -> Size {
        self.config.sensor.size
    }

    fn stat(&self, f: impl FnOnce(&mut NodeStats)) {
        f(&mut lock(&self.stats));
    }

    fn snapshot(&self) -> NodeDump {
        let (active, ready, start, standby) = {
            let st = self.state.lock();
            (st.active, st.ready, st.start, st.standby)
        };
        NodeDump {
            captured_at: Utc::now(),
            active,
            ready,
            start,
            capture: self.capture.phase(),
            standby,
            first_received: self.state.first_received(),
            in_flight: self.in_flight.load(Ordering::Acquire),
            roll: self.collector.remainder(),
            request_queue: self.request_q.ids(),
            processing_queue: self.processing_q.ids(),
            drop_queue: self.drops.len(),
            stats: lock(&self.stats).clone(),
            delivery: self.delivery.snapshot(),
        }
    }
}

impl Hal3AListener for NodeShared {
    fn on_3a_notify(&self, event: Hal3AEvent) {
        match event {
            Hal3AEvent::ProcFinish {
                magic,
                sof_idx,
                capture,
            } => self.on_sync_begin(magic, sof_idx, capture),
            Hal3AEvent::CurrentResult { magic, meta } => self.on_current_result(magic, &meta),
            Hal3AEvent::VsyncDone => self.on_sync_end(),
        }
    }
}

/// The P1 pipeline node
pub struct P1Node {
    shared: Arc<NodeShared>,
    deque_thread: Mutex<Option<JoinHandle<()>>>,
    public_lock: Mutex<()>,
}

impl P1Node {
    /// Build a node. Nothing runs until [`P1Node::init`].
    pub fn new(config: NodeConfig, parts: Collaborators) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);

        let magic: Box<dyn MagicGenerator> = match config.magic_source {
            MagicSource::Driver => Box::new(DriverMagic::new(Arc::clone(&parts.driver))),
            MagicSource::Local => Box::new(LocalMagic::new()),
        };
        let task = Arc::new(TaskController::new(magic));
        let in_flight = Arc::new(AtomicI32::new(0));
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&parts.consumer),
            Arc::clone(&in_flight),
        ));
        let delivery = Arc::new(DeliveryEngine::new(
            dispatcher.clone(),
            &config.timing,
            config.dump.delivery_batches,
        ));
        let buffers = parts
            .buffers
            .unwrap_or_else(|| Arc::new(ImagePool::from_config(&config)) as Arc<dyn BufferProvider>);
        let release = Arc::new(ReleasePath::new(
            Arc::clone(&task),
            Arc::clone(&buffers),
            Arc::clone(&delivery),
            dispatcher,
        ));
        let collector = TaskCollector::new(
            Arc::clone(&task),
            config.burst_size,
            delivery.clone(),
            release.clone(),
        );

        let shared = Arc::new(NodeShared {
            ports: RwLock::new(config.ports.clone()),
            driver: parts.driver,
            hal3a: parts.hal3a,
            consumer: parts.consumer,
            buffers,
            task,
            collector,
            delivery,
            release,
            state: NodeState::new(),
            capture: CaptureGate::new(),
            transfer: TransferJob::new(),
            request_q: JobQueue::new("request"),
            processing_q: JobQueue::new("processing"),
            drops: DropQueue::new(),
            hardware_lock: Mutex::new(()),
            frame_set_lock: Mutex::new(()),
            frame_set: AtomicBool::new(false),
            init_req: Mutex::new(InitRequest::new(
                config.init_request_count * config.burst_size,
            )),
            resize_ratio: AtomicU32::new(config.max_resize_ratio_percent),
            last_request: Mutex::new((FrameNo::INVALID, RequestNo::INVALID)),
            in_flight,
            stats: Mutex::new(NodeStats::default()),
            config,
        });

        Ok(Self {
            shared,
            deque_thread: Mutex::new(None),
            public_lock: Mutex::new(()),
        })
    }

    /// Start the delivery and deque threads
    pub fn init(&self) -> Result<()> {
        let _public = lock(&self.public_lock);
        self.shared.delivery.start()?;
        let mut slot = lock(&self.deque_thread);
        if slot.is_none() {
            self.shared.state.clear_exit();
            let shared = Arc::clone(&self.shared);
            let handle = std::thread::Builder::new()
                .name("p1-deque".to_string())
                .spawn(move || shared.deque_loop())
                .map_err(|e| NodeError::State(format!("Failed to spawn deque thread: {}", e)))?;
            *slot = Some(handle);
        }
        info!(
            burst = self.shared.config.burst_size,
            init_request = self.shared.config.init_request_count,
            capture_flow = self.shared.config.enable_capture_flow,
            "P1 node initialized"
        );
        Ok(())
    }

    /// Replace the port configuration. Only allowed while inactive.
    pub fn config(&self, ports: PortConfig) -> Result<()> {
        let _public = lock(&self.public_lock);
        if self.shared.state.is_active() {
            return Err(NodeError::State(
                "port configuration changed while streaming".to_string(),
            ));
        }
        let enabled = ports.enabled();
        if enabled.is_empty() {
            return Err(NodeError::Config("no output port enabled".to_string()));
        }
        if let Some(port) = enabled
            .iter()
            .find(|p| ports.size(**p).is_some_and(|s| s.is_empty()))
        {
            return Err(NodeError::Config(format!("port {} has an empty size", port)));
        }
        debug!(?enabled, "ports configured");
        *self
            .shared
            .ports
            .write()
            .unwrap_or_else(PoisonError::into_inner) = ports;
        Ok(())
    }

    /// Offer a request. A rejection is a normal outcome, not an error; only
    /// a failed hardware start is.
    pub fn queue(&self, frame: Arc<PipelineFrame>) -> Result<AcceptResult> {
        let _public = lock(&self.public_lock);
        let accept = self.shared.accept_request(&frame);
        if !accept.is_accepted() {
            self.shared.stat(|s| s.rejected += 1);
            debug!(frame = %frame.frame_no(), ?accept, "request rejected");
            return Ok(accept);
        }
        self.shared.on_queue(&frame)?;
        Ok(accept)
    }

    /// Push whatever sits in the roll out to the consumer
    pub fn kick(&self) {
        let _public = lock(&self.public_lock);
        self.shared.kick();
    }

    /// Stop the hardware and return every action the node holds
    pub fn flush(&self) -> Result<()> {
        let _public = lock(&self.public_lock);
        self.shared.on_handle_flush();
        Ok(())
    }

    /// Flush, then stop the deque and delivery threads
    pub fn uninit(&self) -> Result<()> {
        let _public = lock(&self.public_lock);
        self.shared.on_handle_flush();
        self.shared.state.request_exit();
        if let Some(handle) = lock(&self.deque_thread).take() {
            if handle.join().is_err() {
                error!("deque thread panicked");
            }
        }
        self.shared.delivery.stop();
        info!(stats = ?self.stats(), "P1 node uninitialized");
        Ok(())
    }

    /// Entry point for 3A notifications when the 3A library is not attached
    /// through [`Hal3A::attach`]
    pub fn notify_3a(&self, event: Hal3AEvent) {
        self.shared.on_3a_notify(event);
    }

    /// Handle the driver uses to report dropped frames
    pub fn drop_notifier(&self) -> DropNotifier {
        self.shared.drops.notifier()
    }

    /// Mark or clear an IO pipe event; while set, every request is rejected
    pub fn set_io_pipe_event(&self, on: bool) {
        self.shared.state.set_io_pipe_event(on);
    }

    /// Requests accepted and not yet dispatched to the consumer
    pub fn in_flight(&self) -> i32 {
        self.shared.in_flight.load(Ordering::Acquire)
    }

    pub fn is_active(&self) -> bool {
        self.shared.state.is_active()
    }

    pub fn is_ready(&self) -> bool {
        self.shared.state.is_ready()
    }

    /// Actions waiting in the collector roll
    pub fn roll_len(&self) -> usize {
        self.shared.collector.remainder()
    }

    pub fn request_queue_len(&self) -> usize {
        self.shared.request_q.len()
    }

    pub fn processing_queue_len(&self) -> usize {
        self.shared.processing_q.len()
    }

    pub fn drop_queue_len(&self) -> usize {
        self.shared.drops.len()
    }

    /// Live actions in the controller pool
    pub fn pool_len(&self) -> usize {
        self.shared.task.pool_len()
    }

    pub fn stats(&self) -> NodeStats {
        lock(&self.shared.stats).clone()
    }

    pub fn snapshot(&self) -> NodeDump {
        self.shared.snapshot()
    }

    /// Serialized snapshot for logging
    pub fn dump_info(&self) -> String {
        serde_json::to_string(&self.shared.snapshot())
            .unwrap_or_else(|e| format!("<dump failed: {}>", e))
    }
}

impl Drop for P1Node {
    fn drop(&mut self) {
        let running = lock(&self.deque_thread).is_some();
        if running {
            if let Err(e) = self.uninit() {
                error!(error = %e, "uninit on drop failed");
            }
        }
    }
}
