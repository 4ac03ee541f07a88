//! The single exit point of an action
//!
//! Every action leaves through [`ReleasePath::return_frame`], whatever the
//! reason: normal result, drop, mismatch or flush. The handle is consumed,
//! so an action cannot be returned twice.
//!
//! # Steps
//!
//! 1. Apply the flush reason and mark the action Done
//! 2. Take every buffer and metadata slot out of the record
//! 3. Put each buffer back where it came from (frame, pool or stuff)
//! 4. Retire the id in the controller
//! 5. Hand the snapshot to delivery, or dispatch it directly when delivery
//!    is not running. Internal actions stop after step 4.

use crate::action::arena::ActHandle;
use crate::action::flush::FlushSet;
use crate::action::meta::Metadata;
use crate::action::record::{ActionRecord, LockState, SlotSource};
use crate::delivery::engine::DeliveryEngine;
use crate::delivery::frame_act::FrameAction;
use crate::hal::buffers::BufferProvider;
use crate::hal::consumer::FrameConsumer;
use crate::hal::frame::{BufferStatus, ImageBuffer, PipelineFrame};
use crate::node::context::{FrameRelease, FrameReturn};
use crate::task::controller::TaskController;
use crate::types::{ActionKind, BypassKind, OutPort, RequestKind, StreamImg, StreamMeta};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Final hand-off to the consumer; keeps the in-flight count
pub(crate) struct Dispatcher {
    consumer: Arc<dyn FrameConsumer>,
    in_flight: Arc<AtomicI32>,
}

impl Dispatcher {
    pub fn new(consumer: Arc<dyn FrameConsumer>, in_flight: Arc<AtomicI32>) -> Self {
        Self {
            consumer,
            in_flight,
        }
    }
}

impl FrameRelease for Dispatcher {
    fn release_frame(&self, action: FrameAction) {
        // only requests carry a frame and count as in flight
        if action.frame.is_none() {
            debug!(frame = %action.frame_no, magic = %action.magic, "action without a frame retired");
            return;
        }
        let left = self.in_flight.fetch_sub(1, Ordering::AcqRel) - 1;
        if left < 0 {
            warn!(frame = %action.frame_no, "in-flight count went negative");
            self.in_flight.store(0, Ordering::Release);
        }
        trace!(
            frame = %action.frame_no,
            magic = %action.magic,
            flush = %action.flush,
            in_flight = left,
            "dispatch frame"
        );
        self.consumer.on_dispatch_frame(action);
    }
}

/// One image slot on its way back to its source
struct ImageReturn {
    stream: StreamImg,
    exists: bool,
    buffer: Option<ImageBuffer>,
    source: SlotSource,
    port: Option<OutPort>,
}

/// One metadata slot on its way back to the frame
struct MetaReturn {
    stream: StreamMeta,
    content: Option<Metadata>,
}

/// Everything taken out of a record under the arena lock
struct Retired {
    snapshot: FrameAction,
    images: Vec<ImageReturn>,
    metas: Vec<MetaReturn>,
    pass_through: bool,
}

impl Retired {
    fn take(record: &mut ActionRecord) -> Self {
        let images = StreamImg::ALL
            .iter()
            .map(|stream| {
                let slot = record.image_mut(*stream);
                slot.lock = LockState::Unlocked;
                ImageReturn {
                    stream: *stream,
                    exists: slot.exists,
                    buffer: slot.buffer.take(),
                    source: std::mem::take(&mut slot.source),
                    port: slot.port.take(),
                }
            })
            .filter(|r| r.exists || r.buffer.is_some())
            .collect();
        let metas = StreamMeta::ALL
            .iter()
            .filter_map(|stream| {
                let slot = record.meta_mut(*stream);
                slot.lock = LockState::Unlocked;
                let content = slot.content.take();
                slot.exists.then_some(MetaReturn {
                    stream: *stream,
                    content,
                })
            })
            .collect();
        let pass_through = !record.is_flushed()
            && matches!(
                record.request,
                Some(RequestKind::Bypass(BypassKind::Redo | BypassKind::Yuv))
            );
        Self {
            snapshot: FrameAction::from_record(record),
            images,
            metas,
            pass_through,
        }
    }
}

/// Returns actions: slots back to their sources, ids retired, snapshots on
/// to delivery
pub(crate) struct ReleasePath {
    ctrl: Arc<TaskController>,
    buffers: Arc<dyn BufferProvider>,
    delivery: Arc<DeliveryEngine>,
    dispatcher: Arc<Dispatcher>,
}

impl ReleasePath {
    pub fn new(
        ctrl: Arc<TaskController>,
        buffers: Arc<dyn BufferProvider>,
        delivery: Arc<DeliveryEngine>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            ctrl,
            buffers,
            delivery,
            dispatcher,
        }
    }

    fn return_image(&self, frame: Option<&PipelineFrame>, slot: ImageReturn, flushed: bool) {
        let status = if flushed {
            BufferStatus::Error
        } else {
            BufferStatus::Ok
        };
        match (slot.source, slot.buffer) {
            (SlotSource::Frame, buffer) => match frame {
                Some(frame) => {
                    frame.release_image(slot.stream, buffer, status);
                }
                None => warn!(stream = ?slot.stream, "frame buffer without a frame"),
            },
            (SlotSource::Pool, Some(buffer)) => match slot.port {
                Some(port) => self.buffers.pool_release(port, buffer),
                None => warn!(stream = ?slot.stream, "pool buffer without a port"),
            },
            (SlotSource::Stuff, Some(buffer)) => match slot.port {
                Some(port) => self.buffers.stuff_release(port, buffer),
                None => warn!(stream = ?slot.stream, "stuff buffer without a port"),
            },
            (source, Some(buffer)) => {
                warn!(?source, stream = ?slot.stream, address = buffer.address(), "buffer with unknown source");
            }
            (_, None) => {}
        }
        // The frame's own stream was not filled from the frame itself
        if slot.exists && slot.source != SlotSource::Frame {
            if let Some(frame) = frame {
                let status = if slot.stream.is_input() && !flushed {
                    BufferStatus::Ok
                } else {
                    BufferStatus::Error
                };
                frame.release_image(slot.stream, None, status);
            }
        }
    }

    fn return_meta(&self, frame: &PipelineFrame, slot: MetaReturn, flushed: bool, pass_through: bool) {
        if slot.stream.is_input() {
            frame.release_meta(slot.stream, None, BufferStatus::Ok);
            return;
        }
        let content = if pass_through {
            let source = match slot.stream {
                StreamMeta::OutApp => StreamMeta::InApp,
                _ => StreamMeta::InHal,
            };
            frame.read_meta(source)
        } else if flushed {
            None
        } else {
            slot.content
        };
        let status = if content.is_some() {
            BufferStatus::Ok
        } else {
            BufferStatus::Error
        };
        frame.release_meta(slot.stream, content, status);
    }
}

impl FrameReturn for ReleasePath {
    fn return_frame(&self, act: ActHandle, flush: FlushSet, trigger: bool) {
        let retired = self.ctrl.with_act_mut(&act, |rec| {
            rec.set_flush(flush);
            rec.advance(crate::types::ExeState::Done);
            Retired::take(rec)
        });
        let Some(retired) = retired else {
            warn!(?act, "return on a stale handle");
            return;
        };
        let Retired {
            snapshot,
            images,
            metas,
            pass_through,
        } = retired;
        let flushed = snapshot.is_flushed();
        let frame = snapshot.frame.as_deref();
        for slot in images {
            self.return_image(frame, slot, flushed);
        }
        if let Some(frame) = frame {
            for slot in metas {
                self.return_meta(frame, slot, flushed, pass_through);
            }
        }
        self.ctrl.release_act(act);

        match snapshot.kind() {
            ActionKind::Internal => {
                trace!(magic = %snapshot.magic, flush = %snapshot.flush, "internal action retired");
            }
            _ => {
                if let Err(snapshot) = self.delivery.send_act_queue(snapshot, trigger) {
                    self.dispatcher.release_frame(snapshot);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::id::{FrameNo, RequestNo};
    use crate::config::TimingConfig;
    use crate::hal::buffers::ImagePool;
    use crate::task::magic::LocalMagic;
    use crate::types::{Size, StreamImg};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collect(Mutex<Vec<FrameAction>>);

    impl FrameConsumer for Collect {
        fn on_dispatch_frame(&self, action: FrameAction) {
            self.0.lock().unwrap().push(action);
        }
    }

    struct Fixture {
        ctrl: Arc<TaskController>,
        pool: Arc<ImagePool>,
        consumer: Arc<Collect>,
        in_flight: Arc<AtomicI32>,
        path: ReleasePath,
    }

    fn fixture() -> Fixture {
        let ctrl = Arc::new(TaskController::new(Box::new(LocalMagic::new())));
        let pool = Arc::new(ImagePool::new(&[(OutPort::Imgo, Size::new(8, 8))], 2));
        let consumer = Arc::new(Collect::default());
        let in_flight = Arc::new(AtomicI32::new(0));
        let dispatcher = Arc::new(Dispatcher::new(consumer.clone(), in_flight.clone()));
        let delivery = Arc::new(DeliveryEngine::new(
            dispatcher.clone(),
            &TimingConfig::default(),
            false,
        ));
        let path = ReleasePath::new(ctrl.clone(), pool.clone(), delivery, dispatcher);
        Fixture {
            ctrl,
            pool,
            consumer,
            in_flight,
            path,
        }
    }

    #[test]
    fn test_normal_release_returns_every_slot() {
        let fx = fixture();
        let frame = PipelineFrame::builder(FrameNo(3), RequestNo(30))
            .image(StreamImg::OutFull, Size::new(8, 8))
            .in_app(Metadata::new())
            .out_meta()
            .build();
        let act = fx.ctrl.create_act();
        let buffer = frame.acquire_image(StreamImg::OutFull);
        fx.ctrl.with_act_mut(&act, |r| {
            r.request = Some(RequestKind::Normal);
            r.frame_no = frame.frame_no();
            r.frame = Some(frame.clone());
            let slot = r.image_mut(StreamImg::OutFull);
            slot.exists = true;
            slot.buffer = buffer;
            slot.source = SlotSource::Frame;
            slot.port = Some(OutPort::Imgo);
            for stream in [StreamMeta::InApp, StreamMeta::OutApp, StreamMeta::OutHal] {
                r.meta_mut(stream).exists = true;
            }
            r.meta_mut(StreamMeta::OutApp).content = Some(Metadata::new());
        });
        fx.ctrl.register_act(&act);
        fx.in_flight.store(1, Ordering::Release);

        fx.path.return_frame(act, FlushSet::NONE, true);

        assert_eq!(fx.ctrl.pool_len(), 0);
        assert_eq!(fx.ctrl.live_len(), 0);
        assert!(frame.is_fully_released());
        assert_eq!(frame.image_status(StreamImg::OutFull), Some(BufferStatus::Ok));
        assert_eq!(frame.meta_status(StreamMeta::OutApp), Some(BufferStatus::Ok));
        assert_eq!(frame.meta_status(StreamMeta::OutHal), Some(BufferStatus::Error));
        let dispatched = fx.consumer.0.lock().unwrap();
        assert_eq!(dispatched.len(), 1);
        assert!(!dispatched[0].is_flushed());
        assert_eq!(fx.in_flight.load(Ordering::Acquire), 0);
    }

    #[test]
    fn test_flushed_release_marks_error_and_returns_pool() {
        let fx = fixture();
        let frame = PipelineFrame::builder(FrameNo(1), RequestNo(1))
            .image_without_buffer(StreamImg::OutFull)
            .out_meta()
            .build();
        let act = fx.ctrl.create_act();
        let pooled = fx.pool.pool_acquire(OutPort::Imgo);
        fx.ctrl.with_act_mut(&act, |r| {
            r.request = Some(RequestKind::Normal);
            r.frame = Some(frame.clone());
            let slot = r.image_mut(StreamImg::OutFull);
            slot.exists = true;
            slot.buffer = pooled;
            slot.source = SlotSource::Pool;
            slot.port = Some(OutPort::Imgo);
            r.meta_mut(StreamMeta::OutApp).exists = true;
            r.meta_mut(StreamMeta::OutHal).exists = true;
            r.meta_mut(StreamMeta::OutApp).content = Some(Metadata::new());
        });
        fx.ctrl.register_act(&act);
        assert_eq!(fx.pool.available(OutPort::Imgo), 1);

        fx.path.return_frame(act, FlushSet::MIS_BUFFER, true);

        assert_eq!(fx.pool.available(OutPort::Imgo), 2);
        assert_eq!(frame.image_status(StreamImg::OutFull), Some(BufferStatus::Error));
        assert_eq!(frame.output_meta(StreamMeta::OutApp), None);
        let dispatched = fx.consumer.0.lock().unwrap();
        assert!(dispatched[0].flush.contains(FlushSet::MIS_BUFFER));
    }

    #[test]
    fn test_internal_action_not_dispatched() {
        let fx = fixture();
        let act = fx.ctrl.create_act();
        let stuff = fx.pool.stuff_acquire(OutPort::Imgo, Size::new(4, 4));
        fx.ctrl.with_act_mut(&act, |r| {
            r.request = Some(RequestKind::DUMMY);
            let slot = r.image_mut(StreamImg::OutFull);
            slot.buffer = stuff;
            slot.source = SlotSource::Stuff;
            slot.port = Some(OutPort::Imgo);
        });
        fx.ctrl.register_act(&act);
        fx.path.return_frame(act, FlushSet::DUMMY, false);
        assert_eq!(fx.pool.stuff_outstanding(), 0);
        assert!(fx.consumer.0.lock().unwrap().is_empty());
        assert_eq!(fx.ctrl.live_len(), 0);
    }

    #[test]
    fn test_frameless_action_clears_its_sequence_slot() {
        let fx = fixture();
        let delivery = fx.path.delivery.clone();
        delivery.start().unwrap();
        assert!(delivery.register_act_list(FrameNo(4)));
        assert!(delivery.register_act_list(FrameNo(5)));

        let lost = fx.ctrl.create_act();
        fx.ctrl.with_act_mut(&lost, |r| {
            r.request = Some(RequestKind::Normal);
            r.frame_no = FrameNo(4);
        });
        fx.ctrl.register_act(&lost);

        let frame = PipelineFrame::builder(FrameNo(5), RequestNo(5)).out_meta().build();
        let kept = fx.ctrl.create_act();
        fx.ctrl.with_act_mut(&kept, |r| {
            r.request = Some(RequestKind::Normal);
            r.frame_no = FrameNo(5);
            r.frame = Some(frame.clone());
        });
        fx.ctrl.register_act(&kept);
        fx.in_flight.store(1, Ordering::Release);

        fx.path.return_frame(kept, FlushSet::NONE, true);
        fx.path.return_frame(lost, FlushSet::NONE, true);

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        while fx.consumer.0.lock().unwrap().is_empty() && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(2));
        }
        assert!(delivery.wait_flush(true));
        delivery.stop();

        let dispatched = fx.consumer.0.lock().unwrap();
        assert_eq!(dispatched.len(), 1);
        assert_eq!(dispatched[0].frame_no, FrameNo(5));
        assert_eq!(fx.in_flight.load(Ordering::Acquire), 0);
        assert_eq!(fx.ctrl.live_len(), 0);
    }

    #[test]
    fn test_redo_passes_metadata_through() {
        let fx = fixture();
        let mut in_hal = Metadata::new();
        in_hal.set(1, crate::action::meta::MetaValue::I32(5));
        let frame = PipelineFrame::builder(FrameNo(9), RequestNo(9))
            .image(StreamImg::InOpaque, Size::new(8, 8))
            .in_hal(in_hal.clone())
            .out_meta()
            .reprocess(true)
            .build();
        let act = fx.ctrl.create_act();
        fx.ctrl.with_act_mut(&act, |r| {
            r.request = Some(RequestKind::REDO);
            r.frame = Some(frame.clone());
            r.image_mut(StreamImg::InOpaque).exists = true;
            for stream in [StreamMeta::InHal, StreamMeta::OutApp, StreamMeta::OutHal] {
                r.meta_mut(stream).exists = true;
            }
        });
        fx.ctrl.register_act(&act);
        fx.path.return_frame(act, FlushSet::NONE, true);

        assert_eq!(frame.output_meta(StreamMeta::OutHal), Some(in_hal));
        assert_eq!(frame.image_status(StreamImg::InOpaque), Some(BufferStatus::Ok));
        assert!(frame.is_fully_released());
        assert_eq!(fx.consumer.0.lock().unwrap().len(), 1);
    }
}
