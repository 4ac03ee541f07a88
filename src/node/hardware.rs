//! Hardware start and stop
//!
//! Three ways to bring the pipeline up, picked from the configuration:
//!
//! - Normal: 3A start, an Initial warm-up job, driver start
//! - Request mode: wait for `init_request_count` jobs, hand them to 3A in
//!   one `start_request_q`, enqueue all but the last directly
//! - Capture flow: the first job goes through 3A `start_capture` and the
//!   first callback's capture parameters are stamped on it
//!
//! Any failure on the way aborts the start and returns what was enqueued.

use super::state::StartState;
use super::{CapturePhase, NodeShared};
use crate::action::flush::FlushSet;
use crate::action::job::Job;
use crate::delivery::wait::{lock, WaitOutcome};
use crate::error::{NodeError, Result, ResultExt};
use crate::hal::driver::{DriverCommand, EnqueueKind, PortSetting};
use crate::hal::three_a::Hal3AListener;
use crate::types::{CaptureType, InternalKind};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

impl NodeShared {
    /// Warm-up job of Initial actions on pool buffers
    fn build_initial_job(&self) -> Job {
        let burst = self.config.burst_size;
        let scratch = self.collector.scratch();
        let _session = self.task.session_lock();
        for _ in 0..burst {
            self.collect_internal(&scratch, InternalKind::Initial);
        }
        scratch.require_job(burst)
    }

    /// Undo a partial start. Returns `err` for the caller to propagate.
    fn abort_start(&self, err: NodeError) -> NodeError {
        warn!(error = %err, "hardware start failed, aborting");
        self.state.deactivate();
        self.frame_set.store(false, Ordering::Release);
        self.capture.reset();
        self.hal3a.detach();
        if let Err(e) = self.hal3a.stop() {
            debug!(error = %e, "3A stop after failed start");
        }
        if let Err(e) = self.driver.abort() {
            warn!(error = %e, "driver abort failed");
        }
        for job in self.request_q.drain() {
            self.return_all(job.into_acts(), FlushSet::FAIL);
        }
        for job in self.processing_q.drain() {
            self.return_all(job.into_acts(), FlushSet::FAIL);
        }
        err
    }

    /// Configure the hardware and, outside the request and capture modes,
    /// start streaming
    pub(super) fn hardware_ops_start(self: &Arc<Self>) -> Result<()> {
        let _hw = lock(&self.hardware_lock);
        self.state.activate();
        self.state.set_first_received(false);
        self.frame_set.store(false, Ordering::Release);
        self.transfer.end();

        let ports = self.ports();
        let settings: Vec<PortSetting> = ports
            .enabled()
            .into_iter()
            .filter_map(|port| ports.size(port).map(|size| PortSetting { port, size }))
            .collect();
        if let Err(e) = self
            .driver
            .configure(&settings, self.config.burst_size)
            .context("driver configure")
        {
            return Err(self.abort_start(e));
        }
        match self.driver.send_command(DriverCommand::QueryResizeRatio) {
            Ok(ratio) if (1..=100).contains(&ratio) => {
                self.resize_ratio.store(ratio as u32, Ordering::Release);
            }
            Ok(ratio) => warn!(ratio, "driver resize ratio out of range, keeping configured"),
            Err(e) => debug!(error = %e, "driver has no resize ratio, keeping configured"),
        }

        let weak: Weak<NodeShared> = Arc::downgrade(self);
        let listener: Weak<dyn Hal3AListener> = weak;
        self.hal3a.attach(listener);

        if lock(&self.init_req).pending {
            self.state.set_start(StartState::WaitRequest);
            info!(
                requests = self.config.init_request_count,
                "hardware configured, waiting for initial requests"
            );
            return Ok(());
        }
        if self.config.enable_capture_flow {
            self.capture.set_phase(CapturePhase::WaitRequest);
            self.state.set_start(StartState::WaitRequest);
            info!("hardware configured, waiting for the first capture");
            return Ok(());
        }

        if let Err(e) = self.hal3a.start().context("3A start") {
            return Err(self.abort_start(e));
        }
        let initial = self.build_initial_job();
        if let Err(e) = self
            .hardware_ops_enque(initial, EnqueueKind::Initial)
            .context("initial enqueue")
        {
            return Err(self.abort_start(e));
        }
        self.state.set_start(StartState::DrvStart);
        if let Err(e) = self.driver.start().context("driver start") {
            return Err(self.abort_start(e));
        }
        self.state.set_ready();
        info!(ports = ?ports.enabled(), burst = self.config.burst_size, "hardware started");
        Ok(())
    }

    /// Request-mode start once the initial requests are collected
    pub(super) fn hardware_ops_request(self: &Arc<Self>) -> Result<()> {
        let _hw = lock(&self.hardware_lock);
        let burst = self.config.burst_size;
        let mut jobs = Vec::with_capacity(self.config.init_request_count);
        {
            let _session = self.task.session_lock();
            for _ in 0..self.config.init_request_count {
                let job = self.collector.require_job(burst);
                if !job.is_ready() {
                    break;
                }
                jobs.push(job);
            }
        }
        let Some(last) = jobs.pop() else {
            warn!("request-mode start without a full job");
            return Ok(());
        };
        let mut batch: Vec<_> = jobs.iter().flat_map(|job| self.job_metas(job)).collect();
        batch.extend(self.job_metas(&last));
        let count = jobs.len() + 1;

        {
            let _frame_set = lock(&self.frame_set_lock);
            self.request_q.push(last);
            self.frame_set.store(true, Ordering::Release);
        }
        self.state.set_start(StartState::DrvStart);
        if let Err(e) = self.hal3a.start_request_q(&batch).context("3A start_request_q") {
            for job in jobs {
                self.return_all(job.into_acts(), FlushSet::FAIL);
            }
            return Err(self.abort_start(e));
        }
        for job in jobs {
            if let Err(e) = self
                .hardware_ops_enque(job, EnqueueKind::Direct)
                .context("initial request enqueue")
            {
                return Err(self.abort_start(e));
            }
        }
        if let Err(e) = self.driver.start().context("driver start") {
            return Err(self.abort_start(e));
        }
        lock(&self.init_req).pending = false;
        self.state.set_ready();
        info!(jobs = count, "hardware started in request mode");
        Ok(())
    }

    /// Stamp the first capture's parameters on `job` and enqueue it
    fn enque_capture_start(&self, job: Option<Job>) -> Result<()> {
        let Some(job) = job else {
            return Err(NodeError::State("capture job missing".to_string()));
        };
        let (outcome, capture_type, exposure_ns, sof_idx) =
            self.capture.wait_callback(self.config.timing.start_ready);
        if outcome != WaitOutcome::Signaled {
            warn!(?outcome, job = %job.id(), "first capture callback did not arrive");
        }
        self.stamp_job(&job, sof_idx, capture_type, exposure_ns);
        self.hardware_ops_enque(job, EnqueueKind::Direct)
    }

    /// Capture-flow start once the first full burst is collected
    pub(super) fn hardware_ops_capture(self: &Arc<Self>) -> Result<()> {
        let _hw = lock(&self.hardware_lock);
        let burst = self.config.burst_size;
        let job = {
            let _session = self.task.session_lock();
            self.collector.require_job(burst)
        };
        if !job.is_ready() {
            warn!("capture start without a full job");
            return Ok(());
        }
        let batch = self.job_metas(&job);

        self.capture.set_phase(CapturePhase::WaitCallback);
        {
            let _frame_set = lock(&self.frame_set_lock);
            self.request_q.push(job);
            self.frame_set.store(true, Ordering::Release);
        }
        let capture_type = match self.hal3a.start_capture(&batch).context("3A start_capture") {
            Ok(t) => t,
            Err(e) => return Err(self.abort_start(e)),
        };
        let manual = capture_type != CaptureType::Normal;

        let initial = self.build_initial_job();
        if let Err(e) = self
            .hardware_ops_enque(initial, EnqueueKind::Initial)
            .context("initial enqueue")
        {
            return Err(self.abort_start(e));
        }
        self.state.set_start(StartState::DrvStart);
        let started = if manual {
            self.driver
                .start()
                .context("driver start")
                .and_then(|_| self.enque_capture_start(self.request_q.take_front()))
        } else {
            self.enque_capture_start(self.request_q.take_front())
                .and_then(|_| self.driver.start().context("driver start"))
        };
        if let Err(e) = started {
            return Err(self.abort_start(e));
        }
        self.capture.set_phase(CapturePhase::Ready);
        self.state.set_ready();
        info!(?capture_type, "hardware started in capture flow");
        if self.config.is_burst() {
            self.set_request(false);
        }
        Ok(())
    }

    /// Leave sensor standby
    pub(super) fn hardware_ops_streaming(&self) {
        if !self.state.is_standby() {
            return;
        }
        match self.driver.resume() {
            Ok(()) => {
                self.state.set_standby(false);
                info!("sensor streaming resumed");
            }
            Err(e) => warn!(error = %e, "driver resume failed"),
        }
    }

    /// Stop streaming. Returns whether the hardware was running.
    pub(super) fn hardware_ops_stop(&self) -> bool {
        let was_active = self.state.deactivate();
        self.frame_set.store(false, Ordering::Release);
        self.capture.reset();
        if !was_active {
            return false;
        }
        if let Err(e) = self.driver.stop() {
            warn!(error = %e, "driver stop failed");
        }
        {
            let _hw = lock(&self.hardware_lock);
            self.hal3a.detach();
        }
        // 3A may join its callback thread, which can be waiting on the
        // hardware lock
        if let Err(e) = self.hal3a.stop() {
            warn!(error = %e, "3A stop failed");
        }
        info!("hardware stopped");
        true
    }
}
