//! Admission and collection of requests
//!
//! `queue()` lands here. A request is classified from its streams and
//! metadata, enrolled into the collector roll and verified; the first full
//! burst triggers the start of the request cadence.

use super::crop::compute_crop;
use super::NodeShared;
use crate::action::meta::{tag, MetaSet, MetaValue, Metadata};
use crate::action::record::{port_stream, ActionRecord, CropInfo, LockState, OutRequest};
use crate::delivery::wait::lock;
use crate::error::Result;
use crate::hal::frame::PipelineFrame;
use crate::task::collector::TaskCollector;
use crate::types::{
    AcceptResult, ExeState, InternalKind, OutPort, RawType, RequestKind, SensorCtrl, StreamImg,
    StreamMeta,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

pub(super) fn raw_type_code(raw: RawType) -> i32 {
    match raw {
        RawType::Processed => tag::RAW_TYPE_PROCESSED,
        RawType::Pure => tag::RAW_TYPE_PURE,
    }
}

fn raw_type_of(hal: &Metadata) -> Option<RawType> {
    match hal.get_i32(tag::HAL_RAW_TYPE)? {
        tag::RAW_TYPE_PROCESSED => Some(RawType::Processed),
        tag::RAW_TYPE_PURE => Some(RawType::Pure),
        other => {
            warn!(raw_type = other, "unknown raw type requested");
            None
        }
    }
}

fn sensor_ctrl_of(hal: &Metadata) -> SensorCtrl {
    match hal.get_i32(tag::HAL_SENSOR_CTRL) {
        Some(tag::SENSOR_CTRL_STANDBY) => SensorCtrl::Standby,
        Some(tag::SENSOR_CTRL_STREAMING) => SensorCtrl::Streaming,
        _ => SensorCtrl::None,
    }
}

/// Everything the node derives from a request before it touches the arena
struct Classified {
    kind: RequestKind,
    images: [bool; StreamImg::COUNT],
    metas: [bool; StreamMeta::COUNT],
    app: Metadata,
    hal: Metadata,
    full_raw: RawType,
    sensor_ctrl: SensorCtrl,
    outputs: Vec<OutRequest>,
    crop: CropInfo,
}

impl Classified {
    fn apply(self, rec: &mut ActionRecord, frame: &Arc<PipelineFrame>) {
        rec.request = Some(self.kind);
        rec.frame_no = frame.frame_no();
        rec.request_no = frame.request_no();
        rec.frame = Some(Arc::clone(frame));
        for stream in StreamImg::ALL {
            rec.image_mut(stream).exists = self.images[stream.index()];
        }
        for stream in StreamMeta::ALL {
            let slot = rec.meta_mut(stream);
            slot.exists = self.metas[stream.index()];
            if slot.exists && stream.is_input() {
                slot.lock = LockState::ReadLocked;
            }
        }
        rec.full_raw = self.full_raw;
        rec.sensor_ctrl = self.sensor_ctrl;
        rec.crop = self.crop;
        rec.outputs = self.outputs;
        rec.meta_set = MetaSet {
            magic: rec.magic,
            preset_key: rec.id,
            dummy: false,
            app: self.app,
            hal: self.hal,
        };
        if matches!(self.kind, RequestKind::Bypass(_)) {
            rec.advance(ExeState::Done);
        }
    }
}

impl NodeShared {
    /// Decide whether a request can be taken right now
    pub(super) fn accept_request(&self, frame: &PipelineFrame) -> AcceptResult {
        let (io_pipe_event, ready) = {
            let st = self.state.lock();
            (st.io_pipe_event, st.ready)
        };
        if io_pipe_event {
            return AcceptResult::RejectIoPipeEvent;
        }
        if !ready || !self.state.first_received() {
            return AcceptResult::AcceptAvailable;
        }
        if frame.is_reprocess() {
            return AcceptResult::AcceptBypass;
        }
        let limit = self.config.depth_factor() * self.config.burst_size;
        let depth = self.collector.remainder();
        if depth >= limit {
            debug!(depth, limit, frame = %frame.frame_no(), "roll full");
            return AcceptResult::RejectNotAvailable;
        }
        AcceptResult::AcceptAvailable
    }

    fn classify(&self, frame: &PipelineFrame) -> Classified {
        let app = frame.read_meta(StreamMeta::InApp).unwrap_or_default();
        let mut hal = frame.read_meta(StreamMeta::InHal).unwrap_or_default();

        let zsl = frame.is_reprocess()
            && app.get_u8(tag::CONTROL_ENABLE_ZSL) == Some(1)
            && app.get_i32(tag::CONTROL_CAPTURE_INTENT) == Some(tag::CAPTURE_INTENT_STILL);
        let kind = if zsl {
            RequestKind::ZSL
        } else if frame.has_image(StreamImg::InYuv) {
            RequestKind::YUV
        } else if frame.has_image(StreamImg::InOpaque) {
            RequestKind::REDO
        } else if frame.is_reprocess() {
            warn!(frame = %frame.frame_no(), "reprocess request without input, handled as redo");
            RequestKind::REDO
        } else {
            RequestKind::Normal
        };

        let full_raw = raw_type_of(&hal).unwrap_or(self.config.raw_type);
        let sensor_ctrl = sensor_ctrl_of(&hal);
        let ports = self.ports();
        let ratio = self.resize_ratio.load(Ordering::Acquire);
        let crop = compute_crop(
            self.sensor_size(),
            &ports,
            app.get_rect(tag::SCALER_CROP_REGION),
            ratio,
        );

        let mut outputs = Vec::new();
        if kind == RequestKind::Normal {
            for port in ports.enabled() {
                let out = match port {
                    OutPort::Imgo => {
                        let opaque = frame.has_image(StreamImg::OutOpaque);
                        let requested = opaque || frame.has_image(StreamImg::OutFull);
                        OutRequest {
                            port,
                            stream: port_stream(port, opaque),
                            stuff: !requested,
                        }
                    }
                    _ => {
                        let stream = port_stream(port, false);
                        OutRequest {
                            port,
                            stream,
                            stuff: !frame.has_image(stream),
                        }
                    }
                };
                outputs.push(out);
            }
            if !hal.contains(tag::HAL_RAW_TYPE) {
                hal.set(tag::HAL_RAW_TYPE, MetaValue::I32(raw_type_code(full_raw)));
            }
        }

        let mut images = [false; StreamImg::COUNT];
        for stream in StreamImg::ALL {
            images[stream.index()] = frame.has_image(stream);
        }
        let mut metas = [false; StreamMeta::COUNT];
        for stream in StreamMeta::ALL {
            metas[stream.index()] = frame.has_meta(stream);
        }

        Classified {
            kind,
            images,
            metas,
            app,
            hal,
            full_raw,
            sensor_ctrl,
            outputs,
            crop,
        }
    }

    /// Enroll and verify one request. Call with the session lock held.
    fn collect_frame(&self, frame: &Arc<PipelineFrame>) -> (usize, RequestKind, SensorCtrl) {
        let classified = self.classify(frame);
        let kind = classified.kind;
        let sensor_ctrl = classified.sensor_ctrl;
        let mut slot = None;
        if !self.collector.enroll(&mut slot) {
            return (self.collector.remainder(), kind, sensor_ctrl);
        }
        let Some(act) = slot else {
            return (self.collector.remainder(), kind, sensor_ctrl);
        };
        self.task
            .with_act_mut(&act, |rec| classified.apply(rec, frame));
        trace!(frame = %frame.frame_no(), %kind, ?sensor_ctrl, "request collected");
        (self.collector.verify(act), kind, sensor_ctrl)
    }

    /// Enroll and verify one internal action into `collector`. Call with the
    /// session lock held.
    pub(super) fn collect_internal(&self, collector: &TaskCollector, kind: InternalKind) -> usize {
        let ports = self.ports();
        let crop = compute_crop(
            self.sensor_size(),
            &ports,
            None,
            self.resize_ratio.load(Ordering::Acquire),
        );
        let outputs: Vec<OutRequest> = ports
            .enabled()
            .into_iter()
            .map(|port| OutRequest {
                port,
                stream: port_stream(port, false),
                stuff: kind != InternalKind::Initial,
            })
            .collect();
        let full_raw = self.config.raw_type;

        let mut slot = None;
        if !collector.enroll(&mut slot) {
            return collector.remainder();
        }
        let Some(act) = slot else {
            return collector.remainder();
        };
        self.task.with_act_mut(&act, |rec| {
            rec.request = Some(RequestKind::Internal(kind));
            rec.full_raw = full_raw;
            rec.crop = crop;
            rec.outputs = outputs;
            rec.meta_set.preset_key = rec.id;
            rec.meta_set.dummy = true;
        });
        collector.verify(act)
    }

    /// Tell the consumer the node can take another request
    pub(super) fn beckon(&self) {
        let (frame, _) = *lock(&self.last_request);
        self.consumer.on_request_beckon(frame);
    }

    /// Bookkeeping after a request was accepted
    pub(super) fn on_queue(self: &Arc<Self>, frame: &Arc<PipelineFrame>) -> Result<()> {
        *lock(&self.last_request) = (frame.frame_no(), frame.request_no());

        if !self.state.is_active() {
            self.hardware_ops_start()?;
        }
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        self.stat(|s| s.accepted += 1);

        let first_received = self.state.first_received();
        let (remainder, kind, sensor_ctrl, preset) = {
            let _session = self.task.session_lock();
            let (remainder, kind, sensor_ctrl) = self.collect_frame(frame);
            let remainder = if kind == RequestKind::YUV && first_received {
                self.collect_internal(&self.collector, InternalKind::Padding)
            } else {
                remainder
            };
            let preset = (!self.config.is_burst() && first_received && kind == RequestKind::Normal)
                .then(|| self.collector.query_act(0, |r| r.meta_set.clone()))
                .flatten();
            (remainder, kind, sensor_ctrl, preset)
        };

        if kind == RequestKind::Normal {
            let mut init = lock(&self.init_req);
            if init.pending {
                init.count += 1;
            }
        }
        if sensor_ctrl == SensorCtrl::Streaming {
            self.hardware_ops_streaming();
        }
        if let Some(set) = preset {
            if let Err(e) = self.hal3a.preset(std::slice::from_ref(&set)) {
                warn!(error = %e, magic = %set.magic, "3A preset failed");
            }
        }

        if !first_received {
            if remainder >= self.config.burst_size {
                self.state.set_first_received(true);
                info!(frame = %frame.frame_no(), "first full burst received");
                self.start_set()?;
            }
        } else if self.init_request_due() {
            self.start_set()?;
        }
        Ok(())
    }

    fn init_request_due(&self) -> bool {
        let init = lock(&self.init_req);
        init.pending && init.count >= init.num && !self.state.is_ready()
    }

    /// Kick off the request cadence for whichever start mode is configured
    fn start_set(self: &Arc<Self>) -> Result<()> {
        let ready = self.state.is_ready();
        let (pending, due) = {
            let init = lock(&self.init_req);
            (init.pending, init.count >= init.num)
        };
        if pending && !ready {
            if due {
                self.hardware_ops_request()?;
            } else {
                debug!("collecting initial requests");
            }
            return Ok(());
        }
        if self.config.enable_capture_flow
            && !ready
            && self.capture.phase() == super::CapturePhase::WaitRequest
        {
            return self.hardware_ops_capture();
        }
        self.set_request(true);
        Ok(())
    }
}
