//! Node-side job queues
//!
//! - [`JobQueue`] - request queue (set to 3A, waiting for its callback) and
//!   processing queue (enqueued to the driver, waiting for dequeue)
//! - [`DropNotifier`] - driver-side handle feeding the drop queue
//!
//! Each queue has its own mutex. Closures run under a queue lock may read
//! the action arena; the arena never calls back into a queue, so the lock
//! order is always queue before arena.

use crate::action::id::MagicNum;
use crate::action::job::Job;
use crate::delivery::wait::lock;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::{debug, trace};

/// FIFO of jobs with by-id extraction
pub(crate) struct JobQueue {
    name: &'static str,
    jobs: Mutex<VecDeque<Job>>,
}

impl JobQueue {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            jobs: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push(&self, job: Job) -> usize {
        let mut jobs = lock(&self.jobs);
        trace!(queue = self.name, id = %job.id(), "job queued");
        jobs.push_back(job);
        jobs.len()
    }

    /// Remove the job with this id; also reports how far from the head it was
    pub fn take_by_id(&self, id: MagicNum) -> Option<(Job, usize)> {
        self.take_where(|job| job.id() == id)
    }

    /// Remove the first job matching `pred`, oldest first
    pub fn take_where(&self, mut pred: impl FnMut(&Job) -> bool) -> Option<(Job, usize)> {
        let mut jobs = lock(&self.jobs);
        let pos = jobs.iter().position(|job| pred(job))?;
        let job = jobs.remove(pos)?;
        Some((job, pos))
    }

    pub fn take_front(&self) -> Option<Job> {
        lock(&self.jobs).pop_front()
    }

    /// Inspect queued jobs in order without removing them
    pub fn find_map<R>(&self, f: impl FnMut(&Job) -> Option<R>) -> Option<R> {
        lock(&self.jobs).iter().find_map(f)
    }

    pub fn drain(&self) -> Vec<Job> {
        let mut jobs = lock(&self.jobs);
        let drained: Vec<Job> = jobs.drain(..).collect();
        if !drained.is_empty() {
            debug!(queue = self.name, count = drained.len(), "queue drained");
        }
        drained
    }

    pub fn len(&self) -> usize {
        lock(&self.jobs).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids(&self) -> Vec<i32> {
        lock(&self.jobs).iter().map(|job| job.id().0).collect()
    }
}

/// Receiving side of the drop queue, owned by the node
pub(crate) struct DropQueue {
    tx: Sender<MagicNum>,
    rx: Receiver<MagicNum>,
}

impl DropQueue {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    pub fn notifier(&self) -> DropNotifier {
        DropNotifier {
            tx: self.tx.clone(),
        }
    }

    /// Every magic reported so far
    pub fn drain(&self) -> Vec<MagicNum> {
        self.rx.try_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

/// Handle the driver uses to report frames it dropped.
///
/// Cheap to clone; reports are picked up by the deque thread on its next
/// iteration and by flush.
#[derive(Clone)]
pub struct DropNotifier {
    tx: Sender<MagicNum>,
}

impl DropNotifier {
    /// Report that the job with this magic will never be dequeued
    pub fn notify(&self, magic: MagicNum, cookie: u64) {
        debug!(%magic, cookie, "driver reported dropped frame");
        // The receiver lives as long as the node; a send after teardown is moot
        let _ = self.tx.send(magic);
    }
}
