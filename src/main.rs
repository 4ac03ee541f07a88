//! P1 node simulator - Main Entry Point
//!
//! Runs a [`P1Node`] against the in-process driver and 3A, queues a number
//! of requests at the sensor frame rate and reports the order in which the
//! consumer got them back.
//!
//! ```bash
//! p1node-sim [config.toml] [requests]
//! ```
//!
//! Set `P1NODE_LOG_DIR` to also write a log file there.

use anyhow::{bail, Context};
use crossbeam_channel::{unbounded, Receiver, Sender};
use p1node_rs::action::meta::{tag, MetaValue};
use p1node_rs::hal::{Sim3A, SimDriver};
use p1node_rs::{
    Collaborators, FrameAction, FrameConsumer, FrameNo, Metadata, NodeConfig, P1Node,
    PipelineFrame, RequestNo, StreamImg,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_REQUESTS: u32 = 30;
const FRAME_INTERVAL: Duration = Duration::from_millis(33);
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Forwards every dispatched request to the main thread
struct ChannelConsumer {
    tx: Sender<FrameAction>,
}

impl FrameConsumer for ChannelConsumer {
    fn on_dispatch_frame(&self, action: FrameAction) {
        let _ = self.tx.send(action);
    }
}

fn init_logging() -> anyhow::Result<Option<WorkerGuard>> {
    let filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,p1node_rs=debug"))
    };
    let (file_layer, guard) = match std::env::var_os("P1NODE_LOG_DIR") {
        Some(dir) => {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("creating log directory {:?}", dir))?;
            let appender = tracing_appender::rolling::never(&dir, "p1node-sim.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(filter());
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(filter()))
        .with(file_layer)
        .init();
    Ok(guard)
}

fn load_config(path: Option<&str>) -> anyhow::Result<NodeConfig> {
    match path {
        Some(path) => {
            NodeConfig::load(path).with_context(|| format!("loading config from {}", path))
        }
        None => Ok(NodeConfig::default()),
    }
}

fn build_frame(config: &NodeConfig, n: u32) -> Arc<PipelineFrame> {
    let mut app = Metadata::new();
    app.set(tag::REQUEST_FRAME_COUNT, MetaValue::I32(n as i32));
    let mut builder = PipelineFrame::builder(FrameNo(n), RequestNo(n))
        .in_app(app)
        .in_hal(Metadata::new())
        .out_meta();
    if let Some(size) = config.ports.imgo {
        builder = builder.image(StreamImg::OutFull, size);
    }
    if let Some(size) = config.ports.rrzo {
        builder = builder.image(StreamImg::OutResize, size);
    }
    builder.build()
}

fn collect(rx: &Receiver<FrameAction>, expected: usize) -> Vec<FrameAction> {
    let deadline = Instant::now() + DRAIN_TIMEOUT;
    let mut got = Vec::with_capacity(expected);
    while got.len() < expected {
        let left = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(left) {
            Ok(action) => got.push(action),
            Err(_) => break,
        }
    }
    got
}

fn main() -> anyhow::Result<()> {
    let _log_guard = init_logging()?;

    let mut args = std::env::args().skip(1);
    let config = load_config(args.next().as_deref())?;
    let requests = match args.next() {
        Some(n) => n
            .parse::<u32>()
            .with_context(|| format!("invalid request count {:?}", n))?,
        None => DEFAULT_REQUESTS,
    };

    tracing::info!(requests, burst = config.burst_size, "Starting P1 node simulator");

    let (tx, rx) = unbounded();
    let driver = Arc::new(SimDriver::new(FRAME_INTERVAL));
    let hal3a = Arc::new(Sim3A::new(FRAME_INTERVAL, config.burst_size));
    let node = P1Node::new(
        config.clone(),
        Collaborators {
            driver,
            hal3a,
            consumer: Arc::new(ChannelConsumer { tx }),
            buffers: None,
        },
    )
    .context("building node")?;
    node.init().context("starting node")?;

    let mut accepted = 0usize;
    for n in 0..requests {
        let frame = build_frame(&config, n);
        let mut result = node.queue(Arc::clone(&frame))?;
        while !result.is_accepted() {
            std::thread::sleep(FRAME_INTERVAL);
            result = node.queue(Arc::clone(&frame))?;
        }
        accepted += 1;
        std::thread::sleep(FRAME_INTERVAL);
    }
    node.kick();

    let mut delivered = collect(&rx, accepted);
    if delivered.len() < accepted {
        tracing::info!(
            missing = accepted - delivered.len(),
            "flushing requests still in flight"
        );
        node.flush()?;
        delivered.extend(collect(&rx, accepted - delivered.len()));
    }
    tracing::info!(stats = ?node.stats(), "final statistics");
    node.uninit()?;

    let order: Vec<String> = delivered
        .iter()
        .map(|a| {
            if a.is_flushed() {
                format!("{}!{:#x}", a.frame_no.0, a.flush.bits())
            } else {
                a.frame_no.0.to_string()
            }
        })
        .collect();
    println!("dispatched {} of {}: {}", delivered.len(), accepted, order.join(" "));

    if delivered.len() != accepted {
        bail!("{} requests never came back", accepted - delivered.len());
    }
    Ok(())
}
