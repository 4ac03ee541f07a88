//! Task collector
//!
//! The collector is the FIFO roll in front of the controller. New actions
//! are enrolled, filled in by the caller and committed with
//! [`TaskCollector::verify`]; jobs are then cut from the front of the roll
//! all-or-nothing.
//!
//! # Routing on verify
//!
//! | kind     | registered for ordering | stays in roll |
//! |----------|-------------------------|---------------|
//! | Normal   | yes                     | yes           |
//! | Internal | no                      | yes           |
//! | Bypass   | no                      | no, returned at once |

use super::controller::TaskController;
use crate::action::arena::ActHandle;
use crate::action::flush::FlushSet;
use crate::action::job::Job;
use crate::action::record::ActionRecord;
use crate::delivery::wait::lock;
use crate::node::context::{FrameReturn, SequenceRegistry};
use crate::types::ActionKind;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

pub struct TaskCollector {
    ctrl: Arc<TaskController>,
    roll: Mutex<VecDeque<ActHandle>>,
    max: usize,
    registry: Arc<dyn SequenceRegistry>,
    returner: Arc<dyn FrameReturn>,
}

impl TaskCollector {
    pub fn new(
        ctrl: Arc<TaskController>,
        max: usize,
        registry: Arc<dyn SequenceRegistry>,
        returner: Arc<dyn FrameReturn>,
    ) -> Self {
        Self {
            ctrl,
            roll: Mutex::new(VecDeque::with_capacity(max * 2)),
            max,
            registry,
            returner,
        }
    }

    /// An empty collector sharing this one's controller and capabilities.
    /// Used to assemble dummy jobs without touching the real roll.
    pub fn scratch(&self) -> TaskCollector {
        TaskCollector::new(
            Arc::clone(&self.ctrl),
            self.max,
            Arc::clone(&self.registry),
            Arc::clone(&self.returner),
        )
    }

    pub fn controller(&self) -> &Arc<TaskController> {
        &self.ctrl
    }

    /// Burst size this collector cuts jobs for
    pub fn max(&self) -> usize {
        self.max
    }

    /// Allocate a fresh record into `slot`. Rejected if `slot` is occupied.
    pub fn enroll(&self, slot: &mut Option<ActHandle>) -> bool {
        if let Some(existing) = slot {
            warn!(?existing, "enroll into an occupied handle");
            return false;
        }
        *slot = Some(self.ctrl.create_act());
        true
    }

    /// Commit a filled record; returns the roll size
    pub fn verify(&self, act: ActHandle) -> usize {
        let info = self.ctrl.with_act(&act, |r| (r.kind(), r.frame_no));
        match info {
            None => warn!(?act, "verify on a stale handle"),
            Some((ActionKind::Normal, frame)) => {
                if !self.registry.register_sequence(frame) {
                    debug!(%frame, "delivery not running, frame not registered");
                }
                lock(&self.roll).push_back(act);
            }
            Some((ActionKind::Internal, _)) => lock(&self.roll).push_back(act),
            Some((ActionKind::Bypass, frame)) => {
                debug!(%frame, "bypass action returned on verify");
                self.ctrl.register_act(&act);
                self.returner.return_frame(act, FlushSet::NONE, true);
            }
            Some((ActionKind::Null, _)) => {
                warn!(?act, "verify on an unclassified action");
                lock(&self.roll).push_back(act);
            }
        }
        self.remainder()
    }

    /// Cut a job of exactly `capacity` actions from the front of the roll.
    /// If fewer are present, nothing is taken and the job is not ready.
    pub fn require_job(&self, capacity: usize) -> Job {
        let mut job = Job::new(capacity);
        let taken: Vec<ActHandle> = {
            let mut roll = lock(&self.roll);
            if capacity == 0 || roll.len() < capacity {
                return job;
            }
            roll.drain(..capacity).collect()
        };
        for act in taken {
            self.ctrl.register_act(&act);
            job.push(act);
        }
        if let Some(first) = job.first() {
            if let Some(magic) = self.ctrl.with_act(first, |r| r.magic) {
                job.set_id(magic);
            }
        }
        job
    }

    /// Take the front action alone; used when draining
    pub fn require_act(&self) -> Option<ActHandle> {
        let act = lock(&self.roll).pop_front()?;
        self.ctrl.register_act(&act);
        Some(act)
    }

    /// Inspect the `index`-th action in the roll
    pub fn query_act<R>(&self, index: usize, f: impl FnOnce(&ActionRecord) -> R) -> Option<R> {
        let roll = lock(&self.roll);
        let act = roll.get(index)?;
        self.ctrl.with_act(act, f)
    }

    /// Actions waiting in the roll
    pub fn remainder(&self) -> usize {
        lock(&self.roll).len()
    }

    /// Empty the roll, registering everything so it can be retired
    pub fn settle(&self) -> Vec<ActHandle> {
        let drained: Vec<ActHandle> = lock(&self.roll).drain(..).collect();
        for act in &drained {
            self.ctrl.register_act(act);
        }
        drained
    }

    pub fn dump_roll(&self) {
        let roll = lock(&self.roll);
        let entries: Vec<String> = roll
            .iter()
            .filter_map(|a| {
                self.ctrl
                    .with_act(a, |r| format!("{}:{}:{:?}", r.id.0, r.frame_no.0, r.kind()))
            })
            .collect();
        info!(size = roll.len(), ?entries, "collector roll");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::id::{FrameNo, MagicNum};
    use crate::task::magic::LocalMagic;
    use crate::types::RequestKind;
    use proptest::prelude::*;

    #[derive(Default)]
    struct Recorder {
        registered: Mutex<Vec<FrameNo>>,
        returned: Mutex<Vec<(ActHandle, FlushSet)>>,
    }

    impl SequenceRegistry for Recorder {
        fn register_sequence(&self, frame: FrameNo) -> bool {
            lock(&self.registered).push(frame);
            true
        }
    }

    impl FrameReturn for Recorder {
        fn return_frame(&self, act: ActHandle, flush: FlushSet, _trigger: bool) {
            lock(&self.returned).push((act, flush));
        }
    }

    fn setup(burst: usize) -> (TaskCollector, Arc<Recorder>) {
        let ctrl = Arc::new(TaskController::new(Box::new(LocalMagic::new())));
        let rec = Arc::new(Recorder::default());
        let collector = TaskCollector::new(ctrl, burst, rec.clone(), rec.clone());
        (collector, rec)
    }

    fn add(collector: &TaskCollector, kind: RequestKind, frame: u32) -> usize {
        let mut slot = None;
        assert!(collector.enroll(&mut slot));
        let act = slot.unwrap();
        collector.controller().with_act_mut(&act, |r| {
            r.request = Some(kind);
            r.frame_no = FrameNo(frame);
        });
        collector.verify(act)
    }

    #[test]
    fn test_enroll_rejects_occupied_slot() {
        let (collector, _) = setup(1);
        let mut slot = None;
        assert!(collector.enroll(&mut slot));
        assert!(!collector.enroll(&mut slot));
        collector.controller().release_act(slot.take().unwrap());
    }

    #[test]
    fn test_job_is_all_or_nothing() {
        let (collector, rec) = setup(4);
        for n in 0..3 {
            add(&collector, RequestKind::Normal, n);
        }
        let job = collector.require_job(4);
        assert!(!job.is_ready());
        assert!(job.is_empty());
        assert_eq!(collector.remainder(), 3);

        add(&collector, RequestKind::Normal, 3);
        let job = collector.require_job(4);
        assert!(job.is_ready());
        assert_eq!(job.id(), MagicNum(1));
        assert_eq!(collector.remainder(), 0);
        assert_eq!(lock(&rec.registered).len(), 4);

        let magics: Vec<MagicNum> = job
            .iter()
            .map(|a| collector.controller().with_act(a, |r| r.magic).unwrap())
            .collect();
        assert_eq!(magics, vec![MagicNum(1), MagicNum(2), MagicNum(3), MagicNum(4)]);
        for act in job.into_acts() {
            collector.controller().release_act(act);
        }
    }

    #[test]
    fn test_internal_not_registered() {
        let (collector, rec) = setup(1);
        assert_eq!(add(&collector, RequestKind::DUMMY, 0), 1);
        assert!(lock(&rec.registered).is_empty());
        for act in collector.settle() {
            collector.controller().release_act(act);
        }
    }

    #[test]
    fn test_bypass_returned_immediately() {
        let (collector, rec) = setup(1);
        add(&collector, RequestKind::Normal, 0);
        let remaining = add(&collector, RequestKind::ZSL, 1);
        assert_eq!(remaining, 1);
        assert_eq!(lock(&rec.registered).as_slice(), &[FrameNo(0)]);

        let returned = std::mem::take(&mut *lock(&rec.returned));
        assert_eq!(returned.len(), 1);
        let (act, flush) = returned.into_iter().next().unwrap();
        assert_eq!(flush, FlushSet::NONE);
        assert_eq!(
            collector.controller().with_act(&act, |r| r.magic),
            Some(MagicNum::INVALID)
        );
        collector.controller().release_act(act);
    }

    #[test]
    fn test_require_act_and_query() {
        let (collector, _) = setup(2);
        add(&collector, RequestKind::Normal, 7);
        add(&collector, RequestKind::Normal, 8);
        assert_eq!(collector.query_act(1, |r| r.frame_no), Some(FrameNo(8)));
        assert_eq!(collector.query_act(2, |r| r.frame_no), None);

        let act = collector.require_act().unwrap();
        assert_eq!(collector.controller().with_act(&act, |r| r.frame_no), Some(FrameNo(7)));
        assert_eq!(collector.remainder(), 1);
        collector.controller().release_act(act);
        for act in collector.settle() {
            collector.controller().release_act(act);
        }
        assert_eq!(collector.controller().pool_len(), 0);
    }

    #[test]
    fn test_scratch_has_own_roll() {
        let (collector, _) = setup(1);
        add(&collector, RequestKind::Normal, 0);
        let scratch = collector.scratch();
        assert_eq!(scratch.remainder(), 0);
        add(&scratch, RequestKind::DUMMY, 0);
        let job = scratch.require_job(1);
        assert!(job.is_ready());
        assert_eq!(collector.remainder(), 1);
        for act in job.into_acts() {
            collector.controller().release_act(act);
        }
        for act in collector.settle() {
            collector.controller().release_act(act);
        }
    }

    proptest! {
        #[test]
        fn test_require_job_never_splits(burst in 1usize..6, count in 0usize..20) {
            let (collector, _) = setup(burst);
            for n in 0..count {
                add(&collector, RequestKind::Normal, n as u32);
            }
            let mut jobs = 0;
            loop {
                let job = collector.require_job(burst);
                if !job.is_ready() {
                    prop_assert!(job.is_empty());
                    break;
                }
                prop_assert_eq!(job.len(), burst);
                jobs += 1;
                for act in job.into_acts() {
                    collector.controller().release_act(act);
                }
            }
            prop_assert_eq!(jobs, count / burst);
            prop_assert_eq!(collector.remainder(), count % burst);
            for act in collector.settle() {
                collector.controller().release_act(act);
            }
            prop_assert_eq!(collector.controller().pool_len(), 0);
            prop_assert_eq!(collector.controller().live_len(), 0);
        }
    }
}
