//! In-process driver and 3A
//!
//! Stand-ins for the camera driver and the 3A library, used by the
//! `p1node-sim` binary and by end-to-end tests. They keep no image data:
//! the driver hands back exactly the buffers it was given, one job per
//! frame interval, and 3A releases one pending set per tick.
//!
//! # Architecture
//!
//! - [`SimDriver`]: enqueued jobs travel over a crossbeam channel to
//!   whoever blocks in `dequeue`. `stop` posts a wake-up so a blocked
//!   dequeue returns empty.
//! - [`Sim3A`]: a ticker thread emits `ProcFinish` for the oldest pending
//!   set and then `VsyncDone`. Listener calls happen outside every lock
//!   the simulator holds.
//!
//! # Enabling
//!
//! ```bash
//! cargo run --features sim-driver --bin p1node-sim
//! ```

use crate::action::id::MagicNum;
use crate::action::meta::{tag, MetaSet, MetaValue, Metadata};
use crate::error::{NodeError, Result};
use crate::hal::driver::{
    CameraDriver, DequeResult, DequedBuf, DriverCommand, EnqueueRequest, PortSetting,
};
use crate::hal::three_a::{CaptureParam, Hal3A, Hal3AEvent, Hal3AListener};
use crate::task::magic::{LocalMagic, MagicGenerator};
use crate::types::CaptureType;
use crossbeam_channel::{bounded, select, tick, unbounded, Receiver, Sender};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Resize limit the simulated hardware reports, in percent
const SIM_RESIZE_RATIO: i64 = 25;

/// Results kept for `get` before the oldest is evicted
const MAX_STORED_RESULTS: usize = 64;

/// Default exposure stamped on simulated captures
const SIM_EXPOSURE_NS: i64 = 10_000_000;

enum SimMsg {
    Job(EnqueueRequest),
    Stop,
}

/// Simulated camera driver
pub struct SimDriver {
    tx: Sender<SimMsg>,
    rx: Receiver<SimMsg>,
    frame_interval: Duration,
    streaming: AtomicBool,
    suspended: AtomicBool,
    ports: Mutex<Vec<PortSetting>>,
    next_frame: Mutex<Option<Instant>>,
    magic: LocalMagic,
    epoch: Instant,
    enqueued: AtomicU32,
}

impl SimDriver {
    pub fn new(frame_interval: Duration) -> Self {
        let (tx, rx) = unbounded();
        Self {
            tx,
            rx,
            frame_interval,
            streaming: AtomicBool::new(false),
            suspended: AtomicBool::new(false),
            ports: Mutex::new(Vec::new()),
            next_frame: Mutex::new(None),
            magic: LocalMagic::new(),
            epoch: Instant::now(),
            enqueued: AtomicU32::new(0),
        }
    }

    /// Ports programmed by the last `configure`
    pub fn ports(&self) -> Vec<PortSetting> {
        self.ports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::Acquire)
    }

    /// Jobs enqueued since creation
    pub fn enqueued(&self) -> u32 {
        self.enqueued.load(Ordering::Relaxed)
    }

    fn discard_jobs(&self) -> usize {
        self.rx
            .try_iter()
            .filter(|msg| matches!(msg, SimMsg::Job(_)))
            .count()
    }

    /// Sleep until the next frame slot
    fn pace(&self) {
        let mut next = self
            .next_frame
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        let due = next.unwrap_or(now);
        if due > now {
            std::thread::sleep(due - now);
        }
        *next = Some(due.max(now) + self.frame_interval);
    }

    fn complete(&self, request: EnqueueRequest) -> DequeResult {
        self.pace();
        let timestamp_ns = self.epoch.elapsed().as_nanos() as i64;
        let timestamp_boot_ns = chrono::Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or(timestamp_ns);
        trace!(job = %request.job_id, buffers = request.buffers.len(), "sim frame done");
        DequeResult {
            buffers: request
                .buffers
                .into_iter()
                .map(|b| DequedBuf {
                    port: b.port,
                    address: b.address,
                    magic: b.magic,
                    timestamp_ns,
                    timestamp_boot_ns,
                    raw: b.raw,
                })
                .collect(),
        }
    }
}

impl CameraDriver for SimDriver {
    fn configure(&self, ports: &[PortSetting], burst_size: usize) -> Result<()> {
        if ports.is_empty() {
            return Err(NodeError::Driver("no port to configure".to_string()));
        }
        debug!(ports = ports.len(), burst_size, "sim driver configured");
        *self.ports.lock().unwrap_or_else(PoisonError::into_inner) = ports.to_vec();
        Ok(())
    }

    fn start(&self) -> Result<()> {
        self.suspended.store(false, Ordering::Release);
        self.streaming.store(true, Ordering::Release);
        *self
            .next_frame
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.streaming.store(false, Ordering::Release);
        let discarded = self.discard_jobs();
        if discarded > 0 {
            debug!(discarded, "sim driver stopped with jobs pending");
        }
        self.tx
            .send(SimMsg::Stop)
            .map_err(|_| NodeError::Driver("sim channel closed".to_string()))
    }

    fn abort(&self) -> Result<()> {
        self.streaming.store(false, Ordering::Release);
        self.discard_jobs();
        Ok(())
    }

    fn suspend(&self) -> Result<()> {
        self.suspended.store(true, Ordering::Release);
        Ok(())
    }

    fn resume(&self) -> Result<()> {
        self.suspended.store(false, Ordering::Release);
        Ok(())
    }

    fn enqueue(&self, request: EnqueueRequest) -> Result<()> {
        if request.buffers.is_empty() {
            return Err(NodeError::Driver(format!(
                "job {} has no buffer",
                request.job_id
            )));
        }
        self.enqueued.fetch_add(1, Ordering::Relaxed);
        self.tx
            .send(SimMsg::Job(request))
            .map_err(|_| NodeError::Driver("sim channel closed".to_string()))
    }

    fn dequeue(&self, timeout: Duration) -> Result<DequeResult> {
        if self.suspended.load(Ordering::Acquire) || !self.is_streaming() {
            std::thread::sleep(timeout.min(self.frame_interval));
            return Ok(DequeResult::default());
        }
        match self.rx.recv_timeout(timeout) {
            Ok(SimMsg::Job(request)) => Ok(self.complete(request)),
            Ok(SimMsg::Stop) | Err(_) => Ok(DequeResult::default()),
        }
    }

    fn send_command(&self, command: DriverCommand) -> Result<i64> {
        match command {
            DriverCommand::GenMagicNum => Ok(i64::from(self.magic.next_magic().0)),
            DriverCommand::QueryResizeRatio => Ok(SIM_RESIZE_RATIO),
        }
    }
}

#[derive(Default)]
struct Sim3AInner {
    pending: VecDeque<(MagicNum, Option<CaptureParam>)>,
    results: VecDeque<MetaSet>,
}

struct Sim3AShared {
    inner: Mutex<Sim3AInner>,
    listener: Mutex<Option<Weak<dyn Hal3AListener>>>,
    sof: AtomicU32,
}

impl Sim3AShared {
    fn lock(&self) -> std::sync::MutexGuard<'_, Sim3AInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, event: Hal3AEvent) {
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(Weak::upgrade);
        if let Some(listener) = listener {
            listener.on_3a_notify(event);
        }
    }

    fn on_tick(&self) {
        let sof_idx = self.sof.fetch_add(1, Ordering::AcqRel) + 1;
        let head = self.lock().pending.pop_front();
        if let Some((magic, capture)) = head {
            let capture = capture.or_else(|| {
                Some(CaptureParam {
                    capture_type: CaptureType::Normal,
                    exposure_ns: SIM_EXPOSURE_NS,
                    meta: Metadata::new(),
                })
            });
            self.notify(Hal3AEvent::ProcFinish {
                magic,
                sof_idx,
                capture,
            });
        }
        self.notify(Hal3AEvent::VsyncDone);
    }

    fn store(&self, batch: &[MetaSet]) {
        let mut inner = self.lock();
        for set in batch {
            let mut result = MetaSet {
                magic: set.magic,
                preset_key: set.preset_key,
                dummy: set.dummy,
                app: set.app.clone(),
                hal: Metadata::new(),
            };
            result
                .app
                .set(tag::SENSOR_EXPOSURE_TIME, MetaValue::I64(SIM_EXPOSURE_NS));
            inner.results.push_back(result);
        }
        while inner.results.len() > MAX_STORED_RESULTS {
            inner.results.pop_front();
        }
    }

    fn result(&self, magic: MagicNum) -> MetaSet {
        self.lock()
            .results
            .iter()
            .rev()
            .find(|set| set.magic == magic)
            .cloned()
            .unwrap_or_else(|| MetaSet {
                magic,
                ..MetaSet::default()
            })
    }
}

/// Simulated 3A with a fixed frame period
pub struct Sim3A {
    shared: Arc<Sim3AShared>,
    ticker: Mutex<Option<(Sender<()>, JoinHandle<()>)>>,
    period: Duration,
    burst_size: usize,
}

impl Sim3A {
    pub fn new(period: Duration, burst_size: usize) -> Self {
        Self {
            shared: Arc::new(Sim3AShared {
                inner: Mutex::new(Sim3AInner::default()),
                listener: Mutex::new(None),
                sof: AtomicU32::new(0),
            }),
            ticker: Mutex::new(None),
            period,
            burst_size: burst_size.max(1),
        }
    }

    pub fn is_running(&self) -> bool {
        self.ticker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Sets waiting for their `ProcFinish`
    pub fn pending(&self) -> usize {
        self.shared.lock().pending.len()
    }

    fn spawn_ticker(&self) -> Result<()> {
        let mut ticker = self.ticker.lock().unwrap_or_else(PoisonError::into_inner);
        if ticker.is_some() {
            return Ok(());
        }
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let shared = Arc::clone(&self.shared);
        let period = self.period;
        let handle = std::thread::Builder::new()
            .name("sim-3a".to_string())
            .spawn(move || {
                let clock = tick(period);
                loop {
                    select! {
                        recv(clock) -> _ => shared.on_tick(),
                        recv(stop_rx) -> _ => break,
                    }
                }
                trace!("sim 3A ticker exiting");
            })
            .map_err(NodeError::Io)?;
        *ticker = Some((stop_tx, handle));
        debug!(period_ms = period.as_millis() as u64, "sim 3A started");
        Ok(())
    }
}

impl Hal3A for Sim3A {
    fn start(&self) -> Result<()> {
        self.spawn_ticker()
    }

    fn stop(&self) -> Result<()> {
        let ticker = self
            .ticker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some((stop, handle)) = ticker {
            let _ = stop.send(());
            if handle.join().is_err() {
                warn!("sim 3A ticker panicked");
            }
        }
        let mut inner = self.shared.lock();
        inner.pending.clear();
        inner.results.clear();
        Ok(())
    }

    fn set(&self, batch: &[MetaSet]) -> Result<()> {
        let Some(first) = batch.first() else {
            return Err(NodeError::Hal3A("empty set".to_string()));
        };
        self.shared.store(batch);
        self.shared.lock().pending.push_back((first.magic, None));
        Ok(())
    }

    fn preset(&self, batch: &[MetaSet]) -> Result<()> {
        trace!(sets = batch.len(), "sim 3A preset");
        Ok(())
    }

    fn get(&self, magic: MagicNum) -> Result<MetaSet> {
        Ok(self.shared.result(magic))
    }

    fn get_cur(&self, magic: MagicNum) -> Result<MetaSet> {
        Ok(self.shared.result(magic))
    }

    fn notify_p1_done(&self, magic: MagicNum) {
        trace!(%magic, "sim 3A p1 done");
    }

    fn start_request_q(&self, batch: &[MetaSet]) -> Result<CaptureType> {
        if batch.len() < self.burst_size {
            return Err(NodeError::Hal3A(format!(
                "request queue of {} sets shorter than burst {}",
                batch.len(),
                self.burst_size
            )));
        }
        self.shared.store(batch);
        let last = batch[batch.len() - self.burst_size].magic;
        self.shared.lock().pending.push_back((last, None));
        self.spawn_ticker()?;
        Ok(CaptureType::Normal)
    }

    fn start_capture(&self, batch: &[MetaSet]) -> Result<CaptureType> {
        let Some(first) = batch.first() else {
            return Err(NodeError::Hal3A("empty capture".to_string()));
        };
        self.shared.store(batch);
        let param = CaptureParam {
            capture_type: CaptureType::Normal,
            exposure_ns: SIM_EXPOSURE_NS,
            meta: Metadata::new(),
        };
        self.shared
            .lock()
            .pending
            .push_back((first.magic, Some(param)));
        self.spawn_ticker()?;
        Ok(CaptureType::Normal)
    }

    fn attach(&self, listener: Weak<dyn Hal3AListener>) {
        *self
            .shared
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(listener);
    }

    fn detach(&self) {
        *self
            .shared
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl Drop for Sim3A {
    fn drop(&mut self) {
        let _ = Hal3A::stop(self);
    }
}
