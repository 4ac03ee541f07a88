//! Pipeline request frames
//!
//! A [`PipelineFrame`] is the consumer-side request the node works on: a
//! set of image streams and metadata streams, each acquired by the node at
//! most once and released back exactly once. The frame keeps track of what
//! was returned, and with which status, so the release path can be audited.

use crate::action::id::{FrameNo, RequestNo};
use crate::action::meta::Metadata;
use crate::types::{Size, StreamImg, StreamMeta};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::warn;

static NEXT_ADDRESS: AtomicU64 = AtomicU64::new(0x1000);

/// An image buffer. The address identifies it in driver traffic.
#[derive(Debug, PartialEq, Eq)]
pub struct ImageBuffer {
    address: u64,
    size: Size,
}

impl ImageBuffer {
    /// Allocate a buffer with a process-unique address
    pub fn new(size: Size) -> Self {
        let address = NEXT_ADDRESS.fetch_add(0x1000, Ordering::Relaxed);
        Self { address, size }
    }

    pub fn address(&self) -> u64 {
        self.address
    }

    pub fn size(&self) -> Size {
        self.size
    }
}

/// Status a stream is released with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferStatus {
    Ok,
    Error,
}

#[derive(Debug, Default)]
struct ImageStream {
    configured: bool,
    buffer: Option<ImageBuffer>,
    acquired: bool,
    returned: Option<BufferStatus>,
}

#[derive(Debug, Default)]
struct MetaStream {
    configured: bool,
    content: Option<Metadata>,
    returned: Option<BufferStatus>,
}

#[derive(Debug, Default)]
struct FrameStreams {
    images: [ImageStream; StreamImg::COUNT],
    metas: [MetaStream; StreamMeta::COUNT],
}

/// One consumer request
#[derive(Debug)]
pub struct PipelineFrame {
    frame_no: FrameNo,
    request_no: RequestNo,
    reprocess: bool,
    ctrl_callback: bool,
    streams: Mutex<FrameStreams>,
}

impl PipelineFrame {
    pub fn builder(frame_no: FrameNo, request_no: RequestNo) -> FrameBuilder {
        FrameBuilder::new(frame_no, request_no)
    }

    pub fn frame_no(&self) -> FrameNo {
        self.frame_no
    }

    pub fn request_no(&self) -> RequestNo {
        self.request_no
    }

    /// Reprocessing requests carry input buffers and are admitted as bypass
    pub fn is_reprocess(&self) -> bool {
        self.reprocess
    }

    /// Whether the consumer asked for `on_ctrl_*` callbacks on this frame
    pub fn needs_ctrl_callback(&self) -> bool {
        self.ctrl_callback
    }

    fn streams(&self) -> std::sync::MutexGuard<'_, FrameStreams> {
        self.streams.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn has_image(&self, stream: StreamImg) -> bool {
        self.streams().images[stream.index()].configured
    }

    pub fn has_meta(&self, stream: StreamMeta) -> bool {
        self.streams().metas[stream.index()].configured
    }

    /// Take the image buffer of a stream. Returns `None` when the stream is
    /// absent, already acquired or has no backing buffer.
    pub fn acquire_image(&self, stream: StreamImg) -> Option<ImageBuffer> {
        let mut streams = self.streams();
        let slot = &mut streams.images[stream.index()];
        if !slot.configured || slot.acquired {
            return None;
        }
        slot.acquired = true;
        slot.buffer.take()
    }

    /// Give an image stream back. Returns false if it was already returned.
    pub fn release_image(
        &self,
        stream: StreamImg,
        buffer: Option<ImageBuffer>,
        status: BufferStatus,
    ) -> bool {
        let mut streams = self.streams();
        let slot = &mut streams.images[stream.index()];
        if slot.returned.is_some() {
            warn!(frame = %self.frame_no, ?stream, "image stream released twice");
            return false;
        }
        slot.returned = Some(status);
        if buffer.is_some() {
            slot.buffer = buffer;
        }
        true
    }

    /// Read an input metadata stream
    pub fn read_meta(&self, stream: StreamMeta) -> Option<Metadata> {
        let streams = self.streams();
        let slot = &streams.metas[stream.index()];
        if !slot.configured {
            return None;
        }
        slot.content.clone()
    }

    /// Give a metadata stream back, with result content for output streams
    pub fn release_meta(
        &self,
        stream: StreamMeta,
        content: Option<Metadata>,
        status: BufferStatus,
    ) -> bool {
        let mut streams = self.streams();
        let slot = &mut streams.metas[stream.index()];
        if slot.returned.is_some() {
            warn!(frame = %self.frame_no, ?stream, "meta stream released twice");
            return false;
        }
        slot.returned = Some(status);
        if !stream.is_input() {
            slot.content = content;
        }
        true
    }

    // ── Introspection ─────────────────────────────────────────────────

    pub fn image_status(&self, stream: StreamImg) -> Option<BufferStatus> {
        self.streams().images[stream.index()].returned
    }

    pub fn meta_status(&self, stream: StreamMeta) -> Option<BufferStatus> {
        self.streams().metas[stream.index()].returned
    }

    /// Result metadata written to an output stream
    pub fn output_meta(&self, stream: StreamMeta) -> Option<Metadata> {
        if stream.is_input() {
            return None;
        }
        self.streams().metas[stream.index()].content.clone()
    }

    /// Address of the buffer currently parked in an image stream
    pub fn image_address(&self, stream: StreamImg) -> Option<u64> {
        self.streams().images[stream.index()]
            .buffer
            .as_ref()
            .map(ImageBuffer::address)
    }

    /// True once every configured stream has been released
    pub fn is_fully_released(&self) -> bool {
        let streams = self.streams();
        streams
            .images
            .iter()
            .all(|s| !s.configured || s.returned.is_some())
            && streams
                .metas
                .iter()
                .all(|s| !s.configured || s.returned.is_some())
    }
}

/// Builder for [`PipelineFrame`]
pub struct FrameBuilder {
    frame_no: FrameNo,
    request_no: RequestNo,
    reprocess: bool,
    ctrl_callback: bool,
    streams: FrameStreams,
}

impl FrameBuilder {
    fn new(frame_no: FrameNo, request_no: RequestNo) -> Self {
        Self {
            frame_no,
            request_no,
            reprocess: false,
            ctrl_callback: false,
            streams: FrameStreams::default(),
        }
    }

    /// Configure an image stream backed by a freshly allocated buffer
    pub fn image(mut self, stream: StreamImg, size: Size) -> Self {
        let slot = &mut self.streams.images[stream.index()];
        slot.configured = true;
        slot.buffer = Some(ImageBuffer::new(size));
        self
    }

    /// Configure an image stream without a backing buffer
    pub fn image_without_buffer(mut self, stream: StreamImg) -> Self {
        self.streams.images[stream.index()].configured = true;
        self
    }

    pub fn in_app(mut self, meta: Metadata) -> Self {
        let slot = &mut self.streams.metas[StreamMeta::InApp.index()];
        slot.configured = true;
        slot.content = Some(meta);
        self
    }

    pub fn in_hal(mut self, meta: Metadata) -> Self {
        let slot = &mut self.streams.metas[StreamMeta::InHal.index()];
        slot.configured = true;
        slot.content = Some(meta);
        self
    }

    /// Configure both output metadata streams
    pub fn out_meta(mut self) -> Self {
        self.streams.metas[StreamMeta::OutApp.index()].configured = true;
        self.streams.metas[StreamMeta::OutHal.index()].configured = true;
        self
    }

    pub fn reprocess(mut self, reprocess: bool) -> Self {
        self.reprocess = reprocess;
        self
    }

    pub fn ctrl_callback(mut self, enabled: bool) -> Self {
        self.ctrl_callback = enabled;
        self
    }

    pub fn build(self) -> Arc<PipelineFrame> {
        Arc::new(PipelineFrame {
            frame_no: self.frame_no,
            request_no: self.request_no,
            reprocess: self.reprocess,
            ctrl_callback: self.ctrl_callback,
            streams: Mutex::new(self.streams),
        })
    }
}
