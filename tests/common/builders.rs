//! Test data builders for creating test objects

use p1node_rs::action::meta::{tag, MetaValue};
use p1node_rs::config::{PortConfig, WaitBudget};
use p1node_rs::types::{BypassKind, ReceiveMode, Size};
use p1node_rs::{
    ActId, FlushSet, FrameAction, FrameNo, MagicNum, Metadata, NodeConfig, PipelineFrame,
    RequestKind, RequestNo, StreamImg,
};
use std::sync::Arc;

pub const SENSOR: Size = Size::new(640, 480);
pub const RESIZED: Size = Size::new(320, 240);

/// Builder for node configurations with short test timings
pub struct ConfigBuilder {
    config: NodeConfig,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        let mut config = NodeConfig::default();
        config.sensor.size = SENSOR;
        config.ports = PortConfig {
            imgo: Some(SENSOR),
            rrzo: Some(RESIZED),
            lcso: None,
            rsso: None,
        };
        config.queue_depth = 4;
        config.timing.start_ready = WaitBudget::new(5, 100);
        config.timing.transfer_job = WaitBudget::new(5, 20);
        config.timing.flush_drain = WaitBudget::new(10, 100);
        config.timing.delivery_check_ms = 5;
        config.timing.deque_timeout_ms = 10;
        Self { config }
    }

    pub fn burst(mut self, burst: usize) -> Self {
        self.config.burst_size = burst;
        self
    }

    pub fn init_requests(mut self, count: usize) -> Self {
        self.config.init_request_count = count;
        self
    }

    pub fn conservative(mut self) -> Self {
        self.config.receive_mode = ReceiveMode::Conservative;
        self
    }

    pub fn capture_flow(mut self) -> Self {
        self.config.enable_capture_flow = true;
        self
    }

    pub fn build(self) -> NodeConfig {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for consumer requests
pub struct RequestBuilder {
    n: u32,
    hal: Metadata,
    yuv: bool,
    full_only: bool,
}

impl RequestBuilder {
    pub fn new(n: u32) -> Self {
        Self {
            n,
            hal: Metadata::new(),
            yuv: false,
            full_only: false,
        }
    }

    pub fn standby(mut self) -> Self {
        self.hal
            .set(tag::HAL_SENSOR_CTRL, MetaValue::I32(tag::SENSOR_CTRL_STANDBY));
        self
    }

    /// YUV reprocess request; bypasses the hardware
    pub fn yuv_reprocess(mut self) -> Self {
        self.yuv = true;
        self
    }

    /// Request carrying only the full-size image
    pub fn full_only(mut self) -> Self {
        self.full_only = true;
        self
    }

    pub fn build(self) -> Arc<PipelineFrame> {
        let mut app = Metadata::new();
        app.set(tag::REQUEST_FRAME_COUNT, MetaValue::I32(self.n as i32));
        let builder = PipelineFrame::builder(FrameNo(self.n), RequestNo(self.n))
            .in_app(app)
            .in_hal(self.hal)
            .out_meta();
        if self.yuv {
            builder
                .reprocess(true)
                .image(StreamImg::InYuv, RESIZED)
                .image(StreamImg::OutResize, RESIZED)
                .build()
        } else if self.full_only {
            builder.image(StreamImg::OutFull, SENSOR).build()
        } else {
            builder
                .image(StreamImg::OutFull, SENSOR)
                .image(StreamImg::OutResize, RESIZED)
                .build()
        }
    }
}

/// Shorthand for a plain Normal request
pub fn request(n: u32) -> Arc<PipelineFrame> {
    RequestBuilder::new(n).build()
}

/// Finished action as delivery receives it
pub fn finished(frame: u32, request: RequestKind) -> FrameAction {
    FrameAction {
        id: ActId(frame + 1),
        magic: MagicNum(frame as i32 + 1),
        frame_no: FrameNo(frame),
        request_no: RequestNo(frame),
        request: Some(request),
        flush: FlushSet::NONE,
        no_buffer: Default::default(),
        sof_idx: 0,
        frame_ts_ns: 0,
        frame: None,
    }
}

pub fn finished_bypass(frame: u32) -> FrameAction {
    finished(frame, RequestKind::Bypass(BypassKind::Yuv))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder_is_valid() {
        let config = ConfigBuilder::new().burst(2).build();
        assert!(config.validate().is_ok());
        assert_eq!(config.burst_size, 2);
    }

    #[test]
    fn test_request_builder_streams() {
        let frame = RequestBuilder::new(3).yuv_reprocess().build();
        assert!(frame.is_reprocess());
        assert!(frame.has_image(StreamImg::InYuv));
        assert_eq!(frame.frame_no(), FrameNo(3));
    }
}
