//! The deque thread
//!
//! Blocks in driver dequeue while the node streams, matches what comes
//! back against the processing queue and returns every action of the
//! matched job. Drop reports from the driver are handled on the same
//! thread, between dequeues.
//!
//! A job is matched by the address of the first returned buffer against
//! the first action's buffer on that port, oldest job first. The magic
//! number the hardware reports then decides whether the result is trusted.

use super::state::Park;
use super::NodeShared;
use crate::node::context::FrameReturn;
use crate::action::arena::ActHandle;
use crate::action::flush::FlushSet;
use crate::action::id::MagicNum;
use crate::action::meta::{tag, MetaSet};
use crate::delivery::wait::{lock, WaitOutcome};
use crate::hal::driver::DequeResult;
use crate::hal::frame::ImageBuffer;
use crate::types::{CaptureType, OutPort, RawType, RequestKind};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

const PARK_INTERVAL: Duration = Duration::from_millis(100);
const DEQUE_ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// How far the hardware's report can be trusted for a matched job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Matched,
    Uncertain,
    Mismatch,
}

impl Verdict {
    fn of(reported: MagicNum, expected: MagicNum) -> Self {
        if reported == expected {
            Verdict::Matched
        } else if reported.is_uncertain() {
            Verdict::Uncertain
        } else {
            Verdict::Mismatch
        }
    }

    fn flush(self) -> FlushSet {
        match self {
            Verdict::Matched => FlushSet::NONE,
            Verdict::Uncertain => FlushSet::MIS_UNCERTAIN,
            Verdict::Mismatch => FlushSet::MIS_BUFFER,
        }
    }
}

/// What the finish step needs from a record
struct Finishing {
    request: Option<RequestKind>,
    magic: MagicNum,
    capture_type: CaptureType,
    full_raw: RawType,
    outputs: Vec<(OutPort, Option<u64>)>,
    internal_flush: Option<FlushSet>,
}

impl NodeShared {
    pub(super) fn deque_loop(&self) {
        debug!("deque thread running");
        loop {
            match self.state.park(PARK_INTERVAL) {
                Park::Exit => break,
                Park::Idle => {
                    self.on_process_drop_frame();
                    continue;
                }
                Park::Streaming => {}
            }
            match self.driver.dequeue(self.config.timing.deque_timeout()) {
                Ok(res) if res.is_empty() => trace!("dequeue returned nothing"),
                Ok(res) => self.on_process_deque_frame(res),
                Err(e) => {
                    if self.state.is_active() {
                        warn!(error = %e, "driver dequeue failed");
                    }
                    std::thread::sleep(DEQUE_ERROR_BACKOFF);
                }
            }
            self.on_process_drop_frame();
        }
        debug!("deque thread exiting");
    }

    fn dump_processing_queue(&self) {
        let mut jobs = Vec::new();
        self.processing_q.find_map(|job| {
            let acts: Vec<String> = job
                .iter()
                .filter_map(|act| {
                    self.task.with_act(act, |r| {
                        let addrs: Vec<String> = r
                            .outputs
                            .iter()
                            .map(|o| {
                                let addr = r.image(o.stream).buffer.as_ref().map(ImageBuffer::address);
                                format!("{}={:#x}", o.port, addr.unwrap_or(0))
                            })
                            .collect();
                        format!("{}/{}[{}]", r.magic.0, r.frame_no.0, addrs.join(" "))
                    })
                })
                .collect();
            jobs.push(format!("{}: {}", job.id(), acts.join(", ")));
            None::<()>
        });
        info!(?jobs, "processing queue");
    }

    /// Match one driver result to its job and return the job's actions
    fn on_process_deque_frame(&self, res: DequeResult) {
        let hw = lock(&self.hardware_lock);
        let Some(head) = res.buffers.first() else {
            return;
        };
        let (address, port, reported) = (head.address, head.port, head.magic);
        let found = self.processing_q.take_where(|job| {
            job.first()
                .and_then(|act| {
                    self.task.with_act(act, |r| {
                        r.port_slot(port)
                            .and_then(|s| s.buffer.as_ref())
                            .map(ImageBuffer::address)
                            == Some(address)
                    })
                })
                .unwrap_or(false)
        });
        let Some((job, pos)) = found else {
            self.stat(|s| s.deque_unmatched += 1);
            warn!(
                address = format_args!("{:#x}", address),
                %port,
                magic = %reported,
                queued = ?self.processing_q.ids(),
                "dequeued buffer matches no job"
            );
            if self.config.dump.processing_queue_on_mismatch {
                self.dump_processing_queue();
            }
            return;
        };
        if pos > 0 {
            warn!(job = %job.id(), skipped = pos, "dequeued job was not the oldest");
        }

        let verdict = Verdict::of(reported, job.id());
        match verdict {
            Verdict::Matched => self.stat(|s| s.deque_matched += 1),
            _ => {
                self.stat(|s| s.deque_mismatch += 1);
                warn!(job = %job.id(), %reported, ?verdict, "dequeued magic does not match");
                for act in job.iter() {
                    self.task.with_act_mut(act, |r| {
                        r.capture_type = CaptureType::Normal;
                        r.exposure_ns = 0;
                    });
                }
            }
        }

        if self.transfer.wait_clear(job.id(), self.config.timing.transfer_job) != WaitOutcome::Signaled {
            warn!(job = %job.id(), "job still in transfer after wait");
        }

        let returns: Vec<(ActHandle, FlushSet)> = job
            .into_acts()
            .into_iter()
            .enumerate()
            .map(|(nth, act)| {
                let flush = self.finish_action(&act, nth, &res, verdict.flush());
                (act, flush)
            })
            .collect();
        drop(hw);

        let last = returns.len().saturating_sub(1);
        for (i, (act, flush)) in returns.into_iter().enumerate() {
            self.release.return_frame(act, flush, i == last);
        }
    }

    /// Check one dequeued action and build its result; returns the reason
    /// it is released with
    fn finish_action(&self, act: &ActHandle, nth: usize, res: &DequeResult, verdict: FlushSet) -> FlushSet {
        let Some(info) = self.task.with_act(act, |r| Finishing {
            request: r.request,
            magic: r.magic,
            capture_type: r.capture_type,
            full_raw: r.full_raw,
            outputs: r
                .outputs
                .iter()
                .map(|o| {
                    (
                        o.port,
                        r.image(o.stream).buffer.as_ref().map(ImageBuffer::address),
                    )
                })
                .collect(),
            internal_flush: r.internal_flush(),
        }) else {
            warn!(?act, "dequeued action is stale");
            return FlushSet::GENERAL;
        };

        let active = self.state.is_active();
        let mut flush = FlushSet::NONE;
        let mut result: Option<MetaSet> = None;
        if info.request == Some(RequestKind::Normal) && active {
            self.hal3a.notify_p1_done(info.magic);
            let got = if info.capture_type == CaptureType::HighQuality {
                self.hal3a.get_cur(info.magic)
            } else {
                self.hal3a.get(info.magic)
            };
            match got {
                Ok(mut set) => {
                    for t in tag::STRIPPED_RESULT_TAGS {
                        set.app.remove(t);
                    }
                    result = Some(set);
                }
                Err(e) => {
                    warn!(magic = %info.magic, error = %e, "3A result unavailable");
                    flush |= FlushSet::MIS_RESULT;
                }
            }
        }

        let mut stamp: Option<(i64, i64)> = None;
        for (port, address) in &info.outputs {
            match res.port_buffer(*port, nth) {
                Some(buf) if Some(buf.address) == *address => {
                    if stamp.is_none() || *port == OutPort::Imgo {
                        stamp = Some((buf.timestamp_ns, buf.timestamp_boot_ns));
                    }
                    if *port == OutPort::Imgo
                        && info.full_raw == RawType::Processed
                        && buf.raw != RawType::Processed
                    {
                        warn!(magic = %info.magic, raw = ?buf.raw, "full-size port produced the wrong raw type");
                        flush |= FlushSet::MIS_RAW;
                    }
                }
                Some(buf) => {
                    warn!(
                        magic = %info.magic,
                        %port,
                        expected = format_args!("{:#x}", address.unwrap_or(0)),
                        got = format_args!("{:#x}", buf.address),
                        "dequeued buffer address mismatch"
                    );
                    flush |= FlushSet::MIS_BUFFER;
                }
                None => {
                    warn!(magic = %info.magic, %port, "no dequeued buffer for port");
                    flush |= FlushSet::MIS_BUFFER;
                }
            }
        }
        let (ts, ts_boot) = stamp.unwrap_or_default();
        self.task.with_act_mut(act, |r| {
            r.frame_ts_ns = ts;
            r.frame_ts_boot_ns = ts_boot;
            r.readout_ready = true;
        });

        if !verdict.is_empty() {
            verdict
        } else if let Some(internal) = info.internal_flush {
            internal
        } else if !active {
            FlushSet::INACTIVE
        } else if !flush.is_empty() {
            flush
        } else {
            if let Some(set) = result {
                self.on_process_result(act, set);
            }
            FlushSet::NONE
        }
    }

    /// Return every job the driver reported as dropped
    pub(super) fn on_process_drop_frame(&self) {
        let dropped = self.drops.drain();
        if dropped.is_empty() {
            return;
        }
        let jobs: Vec<_> = {
            let _hw = lock(&self.hardware_lock);
            dropped
                .into_iter()
                .filter_map(|magic| match self.processing_q.take_by_id(magic) {
                    Some((job, _)) => Some(job),
                    None => {
                        debug!(%magic, "dropped job not in the processing queue");
                        None
                    }
                })
                .collect()
        };
        if jobs.is_empty() {
            return;
        }
        self.stat(|s| s.dropped += jobs.len() as u64);
        for job in jobs {
            debug!(job = %job.id(), "returning dropped job");
            self.return_all(job.into_acts(), FlushSet::DROP);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict() {
        assert_eq!(Verdict::of(MagicNum(5), MagicNum(5)), Verdict::Matched);
        assert_eq!(
            Verdict::of(MagicNum(5 | MagicNum::UNCERTAIN_MASK), MagicNum(5)),
            Verdict::Uncertain
        );
        assert_eq!(Verdict::of(MagicNum(6), MagicNum(5)), Verdict::Mismatch);
        assert_eq!(Verdict::Mismatch.flush(), FlushSet::MIS_BUFFER);
        assert_eq!(Verdict::Uncertain.flush(), FlushSet::MIS_UNCERTAIN);
        assert!(Verdict::Matched.flush().is_empty());
    }
}
