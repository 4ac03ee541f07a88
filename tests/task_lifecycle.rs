//! Action lifecycle through the controller and collector

use mockall::mock;
use mockall::predicate::eq;
use p1node_rs::action::{ActHandle, FlushSet, FrameNo, MagicNum};
use p1node_rs::node::context::{FrameReturn, SequenceRegistry};
use p1node_rs::task::{LocalMagic, TaskCollector, TaskController};
use p1node_rs::types::{InternalKind, RequestKind};
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

mock! {
    pub Registry {}

    impl SequenceRegistry for Registry {
        fn register_sequence(&self, frame: FrameNo) -> bool;
    }
}

mock! {
    pub Returner {}

    impl FrameReturn for Returner {
        fn return_frame(&self, act: ActHandle, flush: FlushSet, trigger: bool);
    }
}

type Returned = Arc<Mutex<Vec<(ActHandle, FlushSet)>>>;

fn controller() -> Arc<TaskController> {
    Arc::new(TaskController::new(Box::new(LocalMagic::new())))
}

/// Returner that parks every handle it is given
fn parking_returner() -> (MockReturner, Returned) {
    let parked: Returned = Arc::default();
    let sink = Arc::clone(&parked);
    let mut returner = MockReturner::new();
    returner
        .expect_return_frame()
        .returning(move |act, flush, _| sink.lock().unwrap().push((act, flush)));
    (returner, parked)
}

fn permissive_registry() -> MockRegistry {
    let mut registry = MockRegistry::new();
    registry.expect_register_sequence().returning(|_| true);
    registry
}

fn collect(
    collector: &TaskCollector,
    ctrl: &TaskController,
    frame: u32,
    kind: RequestKind,
) -> usize {
    let mut slot = None;
    assert!(collector.enroll(&mut slot));
    let act = slot.unwrap();
    ctrl.with_act_mut(&act, |r| {
        r.request = Some(kind);
        r.frame_no = FrameNo(frame);
    });
    collector.verify(act)
}

#[test]
fn test_normal_frames_registered_in_roll_order() {
    let ctrl = controller();
    let mut registry = MockRegistry::new();
    let mut seq = mockall::Sequence::new();
    for n in 0..3 {
        registry
            .expect_register_sequence()
            .with(eq(FrameNo(n)))
            .times(1)
            .in_sequence(&mut seq)
            .return_const(true);
    }
    let mut returner = MockReturner::new();
    returner.expect_return_frame().never();
    let collector = TaskCollector::new(ctrl.clone(), 1, Arc::new(registry), Arc::new(returner));

    for n in 0..3 {
        assert_eq!(collect(&collector, &ctrl, n, RequestKind::Normal), n as usize + 1);
    }
    // internal actions never take part in ordering
    collect(&collector, &ctrl, 0, RequestKind::Internal(InternalKind::Padding));
    assert_eq!(collector.remainder(), 4);
    assert_eq!(ctrl.pool_len(), 0);
}

#[test]
fn test_bypass_returned_on_verify() {
    let ctrl = controller();
    let (returner, parked) = parking_returner();
    let mut registry = MockRegistry::new();
    registry.expect_register_sequence().never();
    let collector = TaskCollector::new(ctrl.clone(), 1, Arc::new(registry), Arc::new(returner));

    assert_eq!(collect(&collector, &ctrl, 9, RequestKind::YUV), 0);

    let parked = parked.lock().unwrap();
    assert_eq!(parked.len(), 1);
    let (act, flush) = &parked[0];
    assert_eq!(*flush, FlushSet::NONE);
    assert_eq!(ctrl.with_act(act, |r| r.magic), Some(MagicNum::INVALID));
    assert_eq!(ctrl.pool_len(), 1);
}

#[test]
fn test_burst_job_is_all_or_nothing() {
    let ctrl = controller();
    let (returner, _) = parking_returner();
    let collector = TaskCollector::new(
        ctrl.clone(),
        2,
        Arc::new(permissive_registry()),
        Arc::new(returner),
    );

    collect(&collector, &ctrl, 0, RequestKind::Normal);
    let job = collector.require_job(2);
    assert!(!job.is_ready());
    assert_eq!(collector.remainder(), 1);

    collect(&collector, &ctrl, 1, RequestKind::Normal);
    let job = collector.require_job(2);
    assert!(job.is_ready());
    assert_eq!(job.len(), 2);
    assert_eq!(collector.remainder(), 0);

    let magics: Vec<MagicNum> = job
        .iter()
        .filter_map(|act| ctrl.with_act(act, |r| r.magic))
        .collect();
    assert_eq!(job.id(), magics[0]);
    assert_ne!(magics[0], magics[1]);
    assert_eq!(ctrl.pool_len(), 2);

    for act in job.into_acts() {
        assert!(ctrl.release_act(act));
    }
    assert_eq!(ctrl.pool_len(), 0);
    assert_eq!(ctrl.live_len(), 0);
}

#[test]
fn test_scratch_collector_shares_controller() {
    let ctrl = controller();
    let (returner, _) = parking_returner();
    let collector = TaskCollector::new(
        ctrl.clone(),
        1,
        Arc::new(permissive_registry()),
        Arc::new(returner),
    );
    collect(&collector, &ctrl, 0, RequestKind::Normal);

    let scratch = collector.scratch();
    collect(&scratch, &ctrl, 0, RequestKind::DUMMY);
    let dummy = scratch.require_job(1);
    assert!(dummy.is_ready());
    assert_eq!(collector.remainder(), 1);
    assert_eq!(ctrl.pool_len(), 1);
}

#[test]
fn test_settle_registers_leftovers_for_retirement() {
    let ctrl = controller();
    let (returner, _) = parking_returner();
    let collector = TaskCollector::new(
        ctrl.clone(),
        1,
        Arc::new(permissive_registry()),
        Arc::new(returner),
    );
    for n in 0..3 {
        collect(&collector, &ctrl, n, RequestKind::Normal);
    }
    let drained = collector.settle();
    assert_eq!(drained.len(), 3);
    assert_eq!(collector.remainder(), 0);
    assert_eq!(ctrl.pool_len(), 3);
    for act in drained {
        ctrl.release_act(act);
    }
    ctrl.reset();
    assert_eq!(ctrl.generate_id().0, 1);
}

fn kind() -> impl Strategy<Value = RequestKind> {
    prop_oneof![
        4 => Just(RequestKind::Normal),
        1 => Just(RequestKind::PADDING),
        1 => Just(RequestKind::YUV),
        1 => Just(RequestKind::REDO),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Every action ends up exactly once in a job, the roll or the
    /// returned list, and every registered magic number is unique.
    #[test]
    fn test_actions_partitioned_between_jobs_roll_and_returns(
        kinds in prop::collection::vec(kind(), 0..40),
        burst in 1usize..4,
    ) {
        let ctrl = controller();
        let (returner, parked) = parking_returner();
        let collector = TaskCollector::new(
            ctrl.clone(),
            burst,
            Arc::new(permissive_registry()),
            Arc::new(returner),
        );

        let mut jobs = Vec::new();
        for (n, kind) in kinds.iter().enumerate() {
            collect(&collector, &ctrl, n as u32, *kind);
            let job = collector.require_job(burst);
            if job.is_ready() {
                prop_assert_eq!(job.len(), burst);
                jobs.push(job);
            }
        }

        let bypass = kinds.iter().filter(|k| matches!(k, RequestKind::Bypass(_))).count();
        let in_jobs: usize = jobs.iter().map(|j| j.len()).sum();
        prop_assert_eq!(parked.lock().unwrap().len(), bypass);
        prop_assert!(collector.remainder() < burst);
        prop_assert_eq!(in_jobs + collector.remainder() + bypass, kinds.len());

        let mut magics = HashSet::new();
        for act in jobs.iter().flat_map(|j| j.iter()) {
            let magic = ctrl.with_act(act, |r| r.magic).unwrap();
            prop_assert!(magic.is_valid());
            prop_assert!(magics.insert(magic));
        }
        prop_assert_eq!(ctrl.pool_len(), in_jobs + bypass);
    }
}
