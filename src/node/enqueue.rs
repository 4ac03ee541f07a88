//! Request cadence and driver enqueue
//!
//! ```text
//!  set_request ── require_job / dummy job ──> request queue ── 3A set
//!  on_sync_begin(magic) ── take job by id ──> stamp ──> hardware_ops_enque
//!  on_sync_end ── (non-burst) set_request
//! ```
//!
//! Buffers for each output are sourced frame first, then pool, then stuff.
//! A requested Normal output that ends up on a stuff buffer is recorded in
//! the action's no-buffer set.

use super::crop::resize_valid;
use super::{CapturePhase, NodeShared};
use crate::action::arena::ActHandle;
use crate::action::flush::{FlushSet, NoBufferSet};
use crate::action::job::Job;
use crate::action::meta::{tag, MetaSet, MetaValue, Metadata};
use crate::action::record::{OutRequest, SlotSource};
use crate::delivery::wait::{lock, WaitOutcome};
use crate::error::{NodeError, Result};
use crate::hal::driver::{BufInfo, EnqueueKind, EnqueueRequest};
use crate::hal::frame::{ImageBuffer, PipelineFrame};
use crate::hal::three_a::CaptureParam;
use crate::action::id::MagicNum;
use crate::types::{
    CaptureType, ExeState, InternalKind, OutPort, RawType, Rect, RequestKind, SensorCtrl,
    StreamMeta,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// A buffer picked for one output, before it is written into the record
struct Placed {
    out: OutRequest,
    buffer: ImageBuffer,
    source: SlotSource,
}

impl NodeShared {
    /// Control metadata of every action in a job, in order
    pub(super) fn job_metas(&self, job: &Job) -> Vec<MetaSet> {
        job.iter()
            .filter_map(|act| self.task.with_act(act, |r| r.meta_set.clone()))
            .collect()
    }

    /// Stamp what 3A reported for the job on each of its actions
    pub(super) fn stamp_job(&self, job: &Job, sof_idx: u32, capture_type: CaptureType, exposure_ns: i64) {
        for act in job.iter() {
            self.task.with_act_mut(act, |r| {
                r.sof_idx = sof_idx;
                r.capture_type = capture_type;
                r.exposure_ns = exposure_ns;
                if capture_type == CaptureType::HighQuality && r.full_raw != RawType::Pure {
                    r.full_raw = RawType::Pure;
                    r.raw_type_changed = true;
                }
            });
        }
    }

    fn request_frame(&self, act: &ActHandle) -> Option<Arc<PipelineFrame>> {
        self.task
            .with_act(act, |r| {
                r.frame
                    .clone()
                    .filter(|f| r.request == Some(RequestKind::Normal) && f.needs_ctrl_callback())
            })
            .flatten()
    }

    /// Let the consumer edit the control metadata of the head action
    fn attempt_ctrl_setting(&self, act: &ActHandle) {
        let Some(frame) = self.request_frame(act) else {
            return;
        };
        let Some((mut app, mut hal)) = self
            .task
            .with_act(act, |r| (r.meta_set.app.clone(), r.meta_set.hal.clone()))
        else {
            return;
        };
        if self.consumer.on_ctrl_setting(&frame, &mut app, &mut hal) {
            trace!(frame = %frame.frame_no(), "control metadata edited by consumer");
            self.task.with_act_mut(act, |r| {
                r.meta_set.app = app;
                r.meta_set.hal = hal;
            });
        }
    }

    /// Let the consumer override the resizer crop; invalid results are ignored
    fn attempt_ctrl_resize(&self, act: &ActHandle) {
        let Some(frame) = self.request_frame(act) else {
            return;
        };
        let Some(crop) = self.task.with_act(act, |r| r.crop) else {
            return;
        };
        let mut hal = Metadata::new();
        hal.set(tag::HAL_SCALAR_CROP_REGION, MetaValue::Rect(crop.resize_crop));
        hal.set(tag::HAL_RESIZER_SIZE, MetaValue::Size(crop.resize_dst));
        if !self.consumer.on_ctrl_resize(&frame, &mut hal) {
            return;
        }
        let (Some(new_crop), Some(new_dst)) = (
            hal.get_rect(tag::HAL_SCALAR_CROP_REGION),
            hal.get_size(tag::HAL_RESIZER_SIZE),
        ) else {
            warn!(frame = %frame.frame_no(), "resize override incomplete, keeping computed crop");
            return;
        };
        if !resize_valid(new_crop, new_dst, crop.sensor) {
            warn!(
                frame = %frame.frame_no(),
                crop = %new_crop,
                dst = %new_dst,
                "resize override invalid, keeping computed crop"
            );
            return;
        }
        self.task.with_act_mut(act, |r| {
            r.crop.resize_crop = new_crop;
            r.crop.resize_dst = new_dst;
        });
    }

    /// Put a buffer on every output of an action and describe them for
    /// the driver
    fn setup_action(&self, act: &ActHandle) -> Option<Vec<BufInfo>> {
        self.attempt_ctrl_resize(act);
        let (kind, frame, outputs, crop, full_raw, magic) = self.task.with_act(act, |r| {
            (
                r.request,
                r.frame.clone(),
                r.outputs.clone(),
                r.crop,
                r.full_raw,
                r.magic,
            )
        })?;
        let kind = match kind {
            Some(kind @ (RequestKind::Normal | RequestKind::Internal(_))) => kind,
            other => {
                warn!(?act, kind = ?other, "only normal and internal actions are enqueued");
                return None;
            }
        };

        let ports = self.ports();
        let mut placed = Vec::with_capacity(outputs.len());
        let mut no_buffer = NoBufferSet::default();
        let mut missing = false;
        for out in outputs {
            let size = ports.size(out.port).unwrap_or(crop.sensor);
            let stuff = || self.buffers.stuff_acquire(out.port, size).map(|b| (b, SlotSource::Stuff));
            let pool = || self.buffers.pool_acquire(out.port).map(|b| (b, SlotSource::Pool));
            let sourced = if out.stuff {
                stuff()
            } else {
                match kind {
                    RequestKind::Normal => {
                        let from_frame = frame
                            .as_ref()
                            .and_then(|f| f.acquire_image(out.stream))
                            .map(|b| (b, SlotSource::Frame));
                        from_frame.or_else(pool).or_else(|| {
                            let b = stuff();
                            if b.is_some() {
                                no_buffer.mark(out.port);
                                debug!(%magic, port = %out.port, "no request or pool buffer, using stuff buffer");
                            }
                            b
                        })
                    }
                    RequestKind::Internal(InternalKind::Initial) => pool().or_else(|| {
                        warn!(%magic, port = %out.port, "pool dry for initial action, using stuff buffer");
                        stuff()
                    }),
                    _ => stuff(),
                }
            };
            match sourced {
                Some((buffer, source)) => placed.push(Placed {
                    out,
                    buffer,
                    source,
                }),
                None => {
                    warn!(%magic, port = %out.port, %size, "no buffer for output");
                    missing = true;
                }
            }
        }

        let infos: Vec<BufInfo> = placed
            .iter()
            .map(|p| {
                let (crop_rect, dst, raw) = match p.out.port {
                    OutPort::Imgo => (crop.full_crop, crop.full_dst, full_raw),
                    OutPort::Rrzo => (crop.resize_crop, crop.resize_dst, RawType::Processed),
                    _ => (
                        Rect::of(p.buffer.size()),
                        p.buffer.size(),
                        RawType::Processed,
                    ),
                };
                BufInfo {
                    port: p.out.port,
                    address: p.buffer.address(),
                    magic,
                    crop: crop_rect,
                    dst,
                    raw,
                }
            })
            .collect();

        let written = self.task.with_act_mut(act, |r| {
            for p in placed {
                let slot = r.image_mut(p.out.stream);
                slot.port = Some(p.out.port);
                slot.source = p.source;
                slot.buffer = Some(p.buffer);
            }
            r.no_buffer = no_buffer;
            r.advance(ExeState::Processing);
        });
        // buffers already placed stay in the slots so the release path
        // gives them back to their sources
        if missing {
            return None;
        }
        written.map(|_| infos)
    }

    /// Hand a whole job to the driver. On failure every action of the job is
    /// returned with `FAIL`.
    pub(super) fn hardware_ops_enque(&self, job: Job, kind: EnqueueKind) -> Result<()> {
        let job_id = job.id();
        if !self.state.is_active() {
            warn!(job = %job_id, ?kind, "enqueue while inactive");
            self.return_all(job.into_acts(), FlushSet::INACTIVE);
            return Err(NodeError::State("enqueue while inactive".to_string()));
        }

        let mut buffers = Vec::new();
        let mut complete = true;
        for act in job.iter() {
            match self.setup_action(act) {
                Some(infos) => buffers.extend(infos),
                None => complete = false,
            }
        }
        if !complete {
            self.stat(|s| s.enqueue_failures += 1);
            self.return_all(job.into_acts(), FlushSet::FAIL);
            return Err(NodeError::Task(format!("job {} could not be set up", job_id)));
        }

        let shutter_ns = job
            .first()
            .and_then(|act| {
                self.task.with_act(act, |r| {
                    (r.request == Some(RequestKind::Normal)).then_some(r.exposure_ns)
                })
            })
            .flatten()
            .unwrap_or(0);
        let sync_frame = if !self.config.is_burst() && kind != EnqueueKind::Initial {
            job.first().and_then(|act| self.request_frame(act))
        } else {
            None
        };

        let depth = self.processing_q.push(job);
        if depth > self.config.process_depth {
            warn!(depth, limit = self.config.process_depth, "processing queue deeper than expected");
        }
        if let Some(frame) = sync_frame {
            self.consumer.on_ctrl_sync(&frame);
        }

        let request = EnqueueRequest {
            kind,
            job_id,
            buffers,
            shutter_ns,
        };
        if let Err(e) = self.driver.enqueue(request) {
            warn!(error = %e, job = %job_id, ?kind, "driver enqueue failed");
            self.stat(|s| s.enqueue_failures += 1);
            if let Some((job, _)) = self.processing_q.take_by_id(job_id) {
                self.return_all(job.into_acts(), FlushSet::FAIL);
            }
            return Err(e);
        }
        self.stat(|s| s.enqueued_jobs += 1);
        trace!(job = %job_id, ?kind, depth, "job enqueued");
        Ok(())
    }

    /// Next job for 3A: from the roll if a full burst is there, else a
    /// dummy job that keeps the cadence going
    fn fetch_job(&self) -> Job {
        let burst = self.config.burst_size;
        let job = {
            let _session = self.task.session_lock();
            self.collector.require_job(burst)
        };
        if job.is_ready() {
            return job;
        }
        let scratch = self.collector.scratch();
        let job = {
            let _session = self.task.session_lock();
            for _ in 0..burst {
                self.collect_internal(&scratch, InternalKind::Dummy);
            }
            scratch.require_job(burst)
        };
        self.stat(|s| s.dummy_jobs += 1);
        debug!(job = %job.id(), "no full burst available, dummy job");
        job
    }

    /// Set the next job to 3A. `initial` is the first set after start.
    pub(super) fn set_request(&self, initial: bool) {
        {
            let _frame_set = lock(&self.frame_set_lock);
            if !initial && !self.frame_set.load(Ordering::Acquire) {
                return;
            }
            if !self.state.is_active() {
                return;
            }
            let job = self.fetch_job();
            if !self.config.is_burst() {
                if let Some(act) = job.first() {
                    self.attempt_ctrl_setting(act);
                }
            }
            let batch = self.job_metas(&job);
            let job_id = job.id();
            self.request_q.push(job);
            if let Err(e) = self.hal3a.set(&batch) {
                warn!(error = %e, job = %job_id, "3A set failed");
            }
            self.frame_set.store(true, Ordering::Release);
            trace!(job = %job_id, initial, "request set");
        }
        if !initial {
            self.beckon();
        }
    }

    /// 3A finished processing the job with `magic`: enqueue it
    pub(super) fn on_sync_begin(&self, magic: MagicNum, sof_idx: u32, capture: Option<CaptureParam>) {
        if self.state.is_standby() {
            trace!(%magic, "sync begin ignored in standby");
            return;
        }
        if !self.frame_set.load(Ordering::Acquire) {
            debug!(%magic, "sync begin before the first frame set");
            return;
        }
        match self.capture.phase() {
            CapturePhase::WaitCallback => {
                let param = capture.unwrap_or_default();
                self.capture
                    .complete(param.capture_type, param.exposure_ns, sof_idx);
                return;
            }
            CapturePhase::WaitRequest => return,
            CapturePhase::Idle | CapturePhase::Ready => {}
        }
        let (active, ready) = {
            let st = self.state.lock();
            (st.active, st.ready)
        };
        if !active {
            return;
        }
        if !ready {
            let outcome = self.state.wait_start_ready(self.config.timing.start_ready);
            if outcome != WaitOutcome::Signaled {
                warn!(%magic, ?outcome, "sync begin while hardware not ready");
                return;
            }
        }

        let Some((job, pos)) = self.request_q.take_by_id(magic) else {
            warn!(%magic, queued = ?self.request_q.ids(), "sync begin for a job not in the request queue");
            if self.config.is_burst() {
                self.set_request(false);
            }
            return;
        };
        if pos > 0 {
            warn!(%magic, missing = pos, "3A callback missing for earlier jobs");
        }

        let param = capture.unwrap_or_default();
        self.stamp_job(&job, sof_idx, param.capture_type, param.exposure_ns);
        let standby = job
            .first()
            .and_then(|act| self.task.with_act(act, |r| r.sensor_ctrl))
            == Some(SensorCtrl::Standby);
        let early: Vec<Arc<PipelineFrame>> = if param.meta.is_empty() {
            Vec::new()
        } else {
            job.iter()
                .filter_map(|act| {
                    self.task
                        .with_act(act, |r| {
                            r.frame
                                .clone()
                                .filter(|_| r.request == Some(RequestKind::Normal))
                        })
                        .flatten()
                })
                .collect()
        };

        self.transfer.begin(job.id());
        let enqueued = {
            let _hw = lock(&self.hardware_lock);
            self.hardware_ops_enque(job, EnqueueKind::Normal)
        };
        if let Err(e) = enqueued {
            warn!(%magic, error = %e, "job not enqueued");
        }
        for frame in &early {
            self.consumer
                .on_early_callback(frame, StreamMeta::OutHal, &param.meta);
        }
        if standby {
            match self.driver.suspend() {
                Ok(()) => {
                    self.state.set_standby(true);
                    debug!(%magic, "sensor in standby");
                }
                Err(e) => warn!(%magic, error = %e, "driver suspend failed"),
            }
            self.on_process_drop_frame();
        }
        self.transfer.end();

        if self.config.is_burst() {
            self.set_request(false);
        }
    }

    /// 3A reported vsync done
    pub(super) fn on_sync_end(&self) {
        if self.state.is_standby() || !self.frame_set.load(Ordering::Acquire) {
            return;
        }
        if self.config.is_burst() {
            return;
        }
        if matches!(
            self.capture.phase(),
            CapturePhase::WaitRequest | CapturePhase::WaitCallback
        ) {
            return;
        }
        self.set_request(false);
    }

    /// 3A has a current result for an in-flight frame
    pub(super) fn on_current_result(&self, magic: MagicNum, meta: &Metadata) {
        let find = |job: &Job| {
            job.iter().find_map(|act| {
                self.task
                    .with_act(act, |r| {
                        r.frame
                            .clone()
                            .filter(|_| r.magic == magic && r.request == Some(RequestKind::Normal))
                    })
                    .flatten()
            })
        };
        let frame = self
            .request_q
            .find_map(find)
            .or_else(|| self.processing_q.find_map(find));
        match frame {
            Some(frame) => self
                .consumer
                .on_early_callback(&frame, StreamMeta::OutApp, meta),
            None => trace!(%magic, "current result for no queued frame"),
        }
    }
}
