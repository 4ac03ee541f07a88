//! Flush and kick
//!
//! Flush is the cancellation primitive: it stops the hardware and returns
//! every action the node still holds, queue by queue, each with the reason
//! naming where it was found. Kick only pushes out what waits in the roll.

use super::NodeShared;
use crate::node::context::FrameReturn;
use crate::action::arena::ActHandle;
use crate::action::flush::FlushSet;
use crate::delivery::wait::lock;
use crate::types::SensorCtrl;
use std::sync::atomic::Ordering;
use tracing::{debug, info, warn};

impl NodeShared {
    /// Return a batch of actions; the last one triggers delivery
    pub(super) fn return_all(&self, acts: Vec<ActHandle>, flush: FlushSet) {
        let last = acts.len().saturating_sub(1);
        for (i, act) in acts.into_iter().enumerate() {
            self.release.return_frame(act, flush, i == last);
        }
    }

    pub(super) fn on_handle_flush(&self) {
        info!(
            roll = self.collector.remainder(),
            requests = self.request_q.len(),
            processing = self.processing_q.len(),
            drops = self.drops.len(),
            "flush begin"
        );
        self.state.wake_start_waiters();
        let stopped = self.hardware_ops_stop();
        if !self.state.first_received() {
            debug!("flush before the first full burst");
        }
        lock(&self.init_req).rearm();

        let roll = {
            let _session = self.task.session_lock();
            self.collector.settle()
        };
        self.return_all(roll, FlushSet::COLLECTOR);
        for job in self.request_q.drain() {
            self.return_all(job.into_acts(), FlushSet::REQUESTQ);
        }
        self.on_process_drop_frame();
        for job in self.processing_q.drain() {
            self.return_all(job.into_acts(), FlushSet::PROCESSQ);
        }

        if !self.delivery.wait_flush(true) {
            warn!(delivery = %self.delivery.dump_info(), "delivery did not drain on flush");
        }
        self.task.reset();
        self.state.set_first_received(false);
        info!(
            stopped,
            in_flight = self.in_flight.load(Ordering::Acquire),
            "flush done"
        );
    }

    /// Release whatever waits in the roll with `KICK`. Stops at a request
    /// carrying sensor control, which must go through the hardware.
    pub(super) fn kick(&self) {
        let (active, ready) = {
            let st = self.state.lock();
            (st.active, st.ready)
        };
        if !active || !ready || self.config.is_burst() {
            return;
        }
        let mut kicked = 0usize;
        loop {
            let act = {
                let _session = self.task.session_lock();
                match self.collector.query_act(0, |r| r.sensor_ctrl) {
                    None => break,
                    Some(SensorCtrl::None) => {}
                    Some(ctrl) => {
                        debug!(?ctrl, "kick stops at a sensor control request");
                        break;
                    }
                }
                self.collector.require_act()
            };
            let Some(act) = act else {
                break;
            };
            self.release.return_frame(act, FlushSet::KICK, true);
            kicked += 1;
        }
        if kicked > 0 {
            debug!(kicked, "roll kicked");
        }
    }
}
