//! Result metadata of a dequeued Normal action
//!
//! App out is the 3A app result plus frame count, sensor timestamp and
//! rolling skew. Hal out starts from the request's hal metadata, takes the
//! 3A hal result over it and appends what the node knows about the frame.

use super::accept::raw_type_code;
use super::NodeShared;
use crate::action::arena::ActHandle;
use crate::action::meta::{tag, MetaSet, MetaValue};
use crate::action::record::LockState;
use crate::types::{OutPort, StreamMeta};
use tracing::{trace, warn};

impl NodeShared {
    pub(super) fn on_process_result(&self, act: &ActHandle, result: MetaSet) {
        let Some((frame, frame_no, magic, exposure_ns, ts, ts_boot, crop, full_raw, raw_changed, no_buffer, uses_resizer, in_hal)) =
            self.task.with_act(act, |r| {
                (
                    r.frame.clone(),
                    r.frame_no,
                    r.magic,
                    r.exposure_ns,
                    r.frame_ts_ns,
                    r.frame_ts_boot_ns,
                    r.crop,
                    r.full_raw,
                    r.raw_type_changed,
                    r.no_buffer,
                    r.outputs.iter().any(|o| o.port == OutPort::Rrzo && !o.stuff),
                    r.meta_set.hal.clone(),
                )
            })
        else {
            warn!(?act, "result for a stale action");
            return;
        };

        let mut app = result.app;
        app.set(tag::REQUEST_FRAME_COUNT, MetaValue::I32(frame_no.0 as i32));
        app.set(tag::SENSOR_TIMESTAMP, MetaValue::I64(ts - exposure_ns));
        app.set(
            tag::SENSOR_ROLLING_SHUTTER_SKEW,
            MetaValue::I64(self.config.sensor.rolling_skew_ns),
        );

        let mut hal = in_hal;
        hal.merge(&result.hal);
        hal.set(tag::HAL_SENSOR_MODE, MetaValue::I32(self.config.sensor.mode as i32));
        hal.set(tag::HAL_PIPELINE_FRAME_NUMBER, MetaValue::I32(magic.0));
        hal.set(tag::HAL_DMA_CROP_REGION, MetaValue::Rect(crop.full_crop));
        if uses_resizer {
            hal.set(tag::HAL_SCALAR_CROP_REGION, MetaValue::Rect(crop.resize_crop));
            hal.set(tag::HAL_RESIZER_SIZE, MetaValue::Size(crop.resize_dst));
        }
        hal.set(tag::HAL_FRAME_START_TIMESTAMP, MetaValue::I64(ts));
        hal.set(tag::HAL_FRAME_START_TIMESTAMP_BOOT, MetaValue::I64(ts_boot));
        if raw_changed {
            hal.set(tag::HAL_RAW_TYPE, MetaValue::I32(raw_type_code(full_raw)));
        }
        if !no_buffer.is_empty() {
            hal.set(tag::HAL_NO_BUFFER_EXCEPTION, MetaValue::U8(no_buffer.bits()));
        }

        if let Some(frame) = frame.as_ref().filter(|f| f.needs_ctrl_callback()) {
            if self.consumer.on_ctrl_readout(frame, &mut app, &mut hal) {
                trace!(frame = %frame_no, "result metadata edited by consumer");
            }
        }

        self.task.with_act_mut(act, |r| {
            let out_app = r.meta_mut(StreamMeta::OutApp);
            if out_app.exists {
                out_app.content = Some(app);
                out_app.lock = LockState::WriteLocked;
            }
            let out_hal = r.meta_mut(StreamMeta::OutHal);
            if out_hal.exists {
                out_hal.content = Some(hal);
                out_hal.lock = LockState::WriteLocked;
            }
        });
        trace!(frame = %frame_no, %magic, "result metadata written");
    }
}
