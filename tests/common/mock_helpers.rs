//! Mock construction helpers
//!
//! Scripted collaborators let a test decide exactly when 3A finishes a
//! job and when the hardware hands it back. The mockall mocks cover the
//! cases where only the call pattern matters.

use crossbeam_channel::{unbounded, Receiver, Sender};
use mockall::mock;
use p1node_rs::hal::{
    BufInfo, BufferProvider, CaptureParam, DequeResult, DequedBuf, DriverCommand, EnqueueKind,
    EnqueueRequest, Hal3AEvent, Hal3AListener, ImageBuffer, ImagePool, PortSetting,
};
use p1node_rs::task::{LocalMagic, MagicGenerator};
use p1node_rs::types::{CaptureType, OutPort, Size};
use p1node_rs::{
    CameraDriver, Collaborators, FrameAction, FrameConsumer, FrameNo, Hal3A, MagicNum, MetaSet,
    NodeConfig, NodeError, P1Node, Result,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

// ==================== Driver ====================

/// Driver that completes jobs only when the test says so
pub struct ScriptedDriver {
    queued: Mutex<VecDeque<EnqueueRequest>>,
    history: Mutex<Vec<EnqueueRequest>>,
    done_tx: Sender<DequeResult>,
    done_rx: Receiver<DequeResult>,
    magic: LocalMagic,
    fail_enqueue: AtomicBool,
    pub configured: AtomicUsize,
    pub started: AtomicUsize,
    pub stopped: AtomicUsize,
    pub suspended: AtomicUsize,
}

impl ScriptedDriver {
    pub fn new() -> Self {
        let (done_tx, done_rx) = unbounded();
        Self {
            queued: Mutex::new(VecDeque::new()),
            history: Mutex::new(Vec::new()),
            done_tx,
            done_rx,
            magic: LocalMagic::new(),
            fail_enqueue: AtomicBool::new(false),
            configured: AtomicUsize::new(0),
            started: AtomicUsize::new(0),
            stopped: AtomicUsize::new(0),
            suspended: AtomicUsize::new(0),
        }
    }

    pub fn set_fail_enqueue(&self, fail: bool) {
        self.fail_enqueue.store(fail, Ordering::SeqCst);
    }

    /// Jobs enqueued and not yet completed
    pub fn pending(&self) -> usize {
        self.queued.lock().unwrap().len()
    }

    /// Every enqueue so far, in order
    pub fn history(&self) -> Vec<EnqueueRequest> {
        self.history.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<EnqueueKind> {
        self.history().iter().map(|r| r.kind).collect()
    }

    pub fn wait_enqueued(&self, count: usize, timeout: Duration) -> bool {
        super::wait_until(timeout, || self.history.lock().unwrap().len() >= count)
    }

    /// Hand the oldest job back unchanged
    pub fn complete_next(&self) -> Option<MagicNum> {
        self.complete_next_with(|_| {})
    }

    /// Hand the oldest job back after `edit` had a go at the result
    pub fn complete_next_with(&self, edit: impl FnOnce(&mut DequeResult)) -> Option<MagicNum> {
        let request = self.queued.lock().unwrap().pop_front()?;
        let mut result = mirror(&request);
        edit(&mut result);
        self.done_tx.send(result).unwrap();
        Some(request.job_id)
    }
}

fn mirror(request: &EnqueueRequest) -> DequeResult {
    let ts = i64::from(request.job_id.0) * 1_000_000;
    DequeResult {
        buffers: request
            .buffers
            .iter()
            .map(|b: &BufInfo| DequedBuf {
                port: b.port,
                address: b.address,
                magic: b.magic,
                timestamp_ns: ts,
                timestamp_boot_ns: ts + 1,
                raw: b.raw,
            })
            .collect(),
    }
}

impl CameraDriver for ScriptedDriver {
    fn configure(&self, _ports: &[PortSetting], _burst_size: usize) -> Result<()> {
        self.configured.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn start(&self) -> Result<()> {
        self.started.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.stopped.fetch_add(1, Ordering::SeqCst);
        self.queued.lock().unwrap().clear();
        let _ = self.done_tx.send(DequeResult::default());
        Ok(())
    }

    fn abort(&self) -> Result<()> {
        self.queued.lock().unwrap().clear();
        Ok(())
    }

    fn suspend(&self) -> Result<()> {
        self.suspended.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn resume(&self) -> Result<()> {
        Ok(())
    }

    fn enqueue(&self, request: EnqueueRequest) -> Result<()> {
        if self.fail_enqueue.load(Ordering::SeqCst) {
            return Err(NodeError::Driver("scripted enqueue failure".to_string()));
        }
        self.history.lock().unwrap().push(request.clone());
        self.queued.lock().unwrap().push_back(request);
        Ok(())
    }

    fn dequeue(&self, timeout: Duration) -> Result<DequeResult> {
        Ok(self.done_rx.recv_timeout(timeout).unwrap_or_default())
    }

    fn send_command(&self, command: DriverCommand) -> Result<i64> {
        match command {
            DriverCommand::GenMagicNum => Ok(i64::from(self.magic.next_magic().0)),
            DriverCommand::QueryResizeRatio => Ok(25),
        }
    }
}

// ==================== 3A ====================

/// 3A that records what it was given; callbacks are driven by the test
#[derive(Default)]
pub struct Recording3A {
    sets: Mutex<Vec<Vec<MetaSet>>>,
    request_q: Mutex<Vec<Vec<MetaSet>>>,
    captures: Mutex<Vec<Vec<MetaSet>>>,
    listener: Mutex<Option<Weak<dyn Hal3AListener>>>,
    capture_reply: Mutex<Option<CaptureParam>>,
    fail_results: AtomicBool,
    pub started: AtomicUsize,
    pub stopped: AtomicUsize,
}

impl Recording3A {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `start_capture` with a callback carrying `param`
    pub fn with_capture_reply(self, param: CaptureParam) -> Self {
        *self.capture_reply.lock().unwrap() = Some(param);
        self
    }

    pub fn set_fail_results(&self, fail: bool) {
        self.fail_results.store(fail, Ordering::SeqCst);
    }

    /// Job magic of every `set`, in order
    pub fn set_magics(&self) -> Vec<MagicNum> {
        self.sets
            .lock()
            .unwrap()
            .iter()
            .filter_map(|batch| batch.first().map(|s| s.magic))
            .collect()
    }

    pub fn last_set(&self) -> Option<Vec<MetaSet>> {
        self.sets.lock().unwrap().last().cloned()
    }

    pub fn request_q_batches(&self) -> Vec<Vec<MetaSet>> {
        self.request_q.lock().unwrap().clone()
    }

    pub fn capture_batches(&self) -> Vec<Vec<MetaSet>> {
        self.captures.lock().unwrap().clone()
    }

    pub fn is_attached(&self) -> bool {
        self.listener.lock().unwrap().is_some()
    }

    fn result(&self, magic: MagicNum) -> Result<MetaSet> {
        if self.fail_results.load(Ordering::SeqCst) {
            return Err(NodeError::Hal3A(format!("no result for {}", magic)));
        }
        Ok(MetaSet {
            magic,
            ..MetaSet::default()
        })
    }
}

impl Hal3A for Recording3A {
    fn start(&self) -> Result<()> {
        self.started.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.stopped.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn set(&self, batch: &[MetaSet]) -> Result<()> {
        self.sets.lock().unwrap().push(batch.to_vec());
        Ok(())
    }

    fn preset(&self, _batch: &[MetaSet]) -> Result<()> {
        Ok(())
    }

    fn get(&self, magic: MagicNum) -> Result<MetaSet> {
        self.result(magic)
    }

    fn get_cur(&self, magic: MagicNum) -> Result<MetaSet> {
        self.result(magic)
    }

    fn notify_p1_done(&self, _magic: MagicNum) {}

    fn start_request_q(&self, batch: &[MetaSet]) -> Result<CaptureType> {
        self.request_q.lock().unwrap().push(batch.to_vec());
        Ok(CaptureType::Normal)
    }

    fn start_capture(&self, batch: &[MetaSet]) -> Result<CaptureType> {
        self.captures.lock().unwrap().push(batch.to_vec());
        let reply = self.capture_reply.lock().unwrap().clone();
        let listener = self.listener.lock().unwrap().clone();
        if let (Some(param), Some(listener), Some(first)) = (reply, listener, batch.first()) {
            let magic = first.magic;
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                if let Some(listener) = listener.upgrade() {
                    listener.on_3a_notify(Hal3AEvent::ProcFinish {
                        magic,
                        sof_idx: 1,
                        capture: Some(param),
                    });
                }
            });
        }
        Ok(CaptureType::Normal)
    }

    fn attach(&self, listener: Weak<dyn Hal3AListener>) {
        *self.listener.lock().unwrap() = Some(listener);
    }

    fn detach(&self) {
        *self.listener.lock().unwrap() = None;
    }
}

// ==================== Consumer ====================

/// Consumer that keeps every dispatched request
pub struct RecordingConsumer {
    tx: Sender<FrameAction>,
    rx: Receiver<FrameAction>,
    seen: Mutex<Vec<FrameAction>>,
    pub beckons: AtomicUsize,
}

impl RecordingConsumer {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self {
            tx,
            rx,
            seen: Mutex::new(Vec::new()),
            beckons: AtomicUsize::new(0),
        }
    }

    /// Wait until `count` requests came back; returns all seen so far
    pub fn wait_for(&self, count: usize, timeout: Duration) -> Vec<FrameAction> {
        let deadline = Instant::now() + timeout;
        let mut seen = self.seen.lock().unwrap();
        while seen.len() < count {
            let left = deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(left) {
                Ok(action) => seen.push(action),
                Err(_) => break,
            }
        }
        seen.extend(self.rx.try_iter());
        seen.clone()
    }

    pub fn frames(&self, timeout: Duration, count: usize) -> Vec<FrameNo> {
        self.wait_for(count, timeout)
            .iter()
            .map(|a| a.frame_no)
            .collect()
    }
}

impl Default for RecordingConsumer {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameConsumer for RecordingConsumer {
    fn on_dispatch_frame(&self, action: FrameAction) {
        let _ = self.tx.send(action);
    }

    fn on_request_beckon(&self, _last_frame: FrameNo) {
        self.beckons.fetch_add(1, Ordering::SeqCst);
    }
}


// ==================== Buffers ====================

/// Pool that lends its buffers normally but cannot allocate stuff buffers
pub struct NoStuffPool {
    pool: ImagePool,
    pub refused: AtomicUsize,
}

impl NoStuffPool {
    pub fn from_config(config: &NodeConfig) -> Self {
        Self {
            pool: ImagePool::from_config(config),
            refused: AtomicUsize::new(0),
        }
    }

    pub fn available(&self, port: OutPort) -> usize {
        self.pool.available(port)
    }
}

impl BufferProvider for NoStuffPool {
    fn pool_acquire(&self, port: OutPort) -> Option<ImageBuffer> {
        self.pool.pool_acquire(port)
    }

    fn pool_release(&self, port: OutPort, buffer: ImageBuffer) {
        self.pool.pool_release(port, buffer)
    }

    fn stuff_acquire(&self, _port: OutPort, _size: Size) -> Option<ImageBuffer> {
        self.refused.fetch_add(1, Ordering::SeqCst);
        None
    }

    fn stuff_release(&self, port: OutPort, _buffer: ImageBuffer) {
        panic!("stuff buffer released on {} but none was ever lent", port);
    }
}

// ==================== Harness ====================

/// A running node wired to scripted collaborators
pub struct Harness {
    pub node: P1Node,
    pub driver: Arc<ScriptedDriver>,
    pub hal3a: Arc<Recording3A>,
    pub consumer: Arc<RecordingConsumer>,
}

impl Harness {
    pub fn new(config: NodeConfig) -> Self {
        Self::with_3a(config, Recording3A::new())
    }

    pub fn with_3a(config: NodeConfig, hal3a: Recording3A) -> Self {
        Self::assemble(config, hal3a, None)
    }

    /// Node drawing pool and stuff buffers from `buffers`
    pub fn with_buffers(config: NodeConfig, buffers: Arc<dyn BufferProvider>) -> Self {
        Self::assemble(config, Recording3A::new(), Some(buffers))
    }

    fn assemble(
        config: NodeConfig,
        hal3a: Recording3A,
        buffers: Option<Arc<dyn BufferProvider>>,
    ) -> Self {
        super::init_tracing();
        let driver = Arc::new(ScriptedDriver::new());
        let hal3a = Arc::new(hal3a);
        let consumer = Arc::new(RecordingConsumer::new());
        let node = P1Node::new(
            config,
            Collaborators {
                driver: driver.clone(),
                hal3a: hal3a.clone(),
                consumer: consumer.clone(),
                buffers,
            },
        )
        .unwrap();
        node.init().unwrap();
        Self {
            node,
            driver,
            hal3a,
            consumer,
        }
    }

    /// 3A finished preparing the job with `magic`
    pub fn proc_finish(&self, magic: MagicNum) {
        self.node.notify_3a(Hal3AEvent::ProcFinish {
            magic,
            sof_idx: 1,
            capture: None,
        });
    }

    pub fn vsync(&self) {
        self.node.notify_3a(Hal3AEvent::VsyncDone);
    }

    /// Magic of the job most recently handed to 3A
    pub fn last_set_magic(&self) -> MagicNum {
        *self.hal3a.set_magics().last().expect("nothing set to 3A")
    }

    /// Let 3A finish the last set job and wait for its enqueue
    pub fn finish_last_set(&self) -> MagicNum {
        let magic = self.last_set_magic();
        let before = self.driver.history().len();
        self.proc_finish(magic);
        assert!(
            self.driver.wait_enqueued(before + 1, super::test_timeout()),
            "job {} was not enqueued",
            magic
        );
        magic
    }
}

// ==================== mockall ====================

mock! {
    pub Driver {}

    impl CameraDriver for Driver {
        fn configure(&self, ports: &[PortSetting], burst_size: usize) -> Result<()>;
        fn start(&self) -> Result<()>;
        fn stop(&self) -> Result<()>;
        fn abort(&self) -> Result<()>;
        fn suspend(&self) -> Result<()>;
        fn resume(&self) -> Result<()>;
        fn enqueue(&self, request: EnqueueRequest) -> Result<()>;
        fn dequeue(&self, timeout: Duration) -> Result<DequeResult>;
        fn send_command(&self, command: DriverCommand) -> Result<i64>;
    }
}

mock! {
    pub ThreeA {}

    impl Hal3A for ThreeA {
        fn start(&self) -> Result<()>;
        fn stop(&self) -> Result<()>;
        fn set(&self, batch: &[MetaSet]) -> Result<()>;
        fn preset(&self, batch: &[MetaSet]) -> Result<()>;
        fn get(&self, magic: MagicNum) -> Result<MetaSet>;
        fn get_cur(&self, magic: MagicNum) -> Result<MetaSet>;
        fn notify_p1_done(&self, magic: MagicNum);
        fn start_request_q(&self, batch: &[MetaSet]) -> Result<CaptureType>;
        fn start_capture(&self, batch: &[MetaSet]) -> Result<CaptureType>;
        fn attach(&self, listener: Weak<dyn Hal3AListener>);
        fn detach(&self);
    }
}

mock! {
    pub Consumer {}

    impl FrameConsumer for Consumer {
        fn on_dispatch_frame(&self, action: FrameAction);
    }
}
