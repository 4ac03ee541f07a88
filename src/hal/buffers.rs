//! Node-owned buffer sources
//!
//! When a request does not bring its own buffer for a port, the node
//! falls back to a pool buffer, and when the pool is dry, to a "stuff"
//! buffer: a throwaway target the hardware can write into whose content is
//! never published.

use crate::config::NodeConfig;
use crate::hal::frame::ImageBuffer;
use crate::types::{OutPort, Size};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, warn};

/// Buffer sources the node can draw from besides the request itself
pub trait BufferProvider: Send + Sync {
    /// Take a pool buffer for a port
    fn pool_acquire(&self, port: OutPort) -> Option<ImageBuffer>;

    /// Return a pool buffer
    fn pool_release(&self, port: OutPort, buffer: ImageBuffer);

    /// Allocate a stuff buffer of the given size
    fn stuff_acquire(&self, port: OutPort, size: Size) -> Option<ImageBuffer>;

    /// Free a stuff buffer
    fn stuff_release(&self, port: OutPort, buffer: ImageBuffer);
}

/// Fixed-depth per-port pool with an unbounded stuff allocator
pub struct ImagePool {
    pools: Mutex<HashMap<OutPort, Vec<ImageBuffer>>>,
    stuff_outstanding: AtomicUsize,
}

impl ImagePool {
    /// Prepare `depth` buffers for every port in `sizes`
    pub fn new(sizes: &[(OutPort, Size)], depth: usize) -> Self {
        let pools = sizes
            .iter()
            .map(|(port, size)| (*port, (0..depth).map(|_| ImageBuffer::new(*size)).collect()))
            .collect();
        Self {
            pools: Mutex::new(pools),
            stuff_outstanding: AtomicUsize::new(0),
        }
    }

    /// Pool sized from the enabled ports and `queue_depth`
    pub fn from_config(config: &NodeConfig) -> Self {
        let sizes: Vec<(OutPort, Size)> = config
            .ports
            .enabled()
            .into_iter()
            .filter_map(|p| config.ports.size(p).map(|s| (p, s)))
            .collect();
        Self::new(&sizes, config.queue_depth)
    }

    /// Buffers currently available for a port
    pub fn available(&self, port: OutPort) -> usize {
        self.pools
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&port)
            .map_or(0, Vec::len)
    }

    /// Stuff buffers handed out and not yet freed
    pub fn stuff_outstanding(&self) -> usize {
        self.stuff_outstanding.load(Ordering::Acquire)
    }
}

impl BufferProvider for ImagePool {
    fn pool_acquire(&self, port: OutPort) -> Option<ImageBuffer> {
        let buffer = self
            .pools
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&port)
            .and_then(Vec::pop);
        if buffer.is_none() {
            debug!(%port, "pool exhausted");
        }
        buffer
    }

    fn pool_release(&self, port: OutPort, buffer: ImageBuffer) {
        let mut pools = self.pools.lock().unwrap_or_else(PoisonError::into_inner);
        match pools.get_mut(&port) {
            Some(pool) => pool.push(buffer),
            None => warn!(%port, "pool buffer returned to unknown port"),
        }
    }

    fn stuff_acquire(&self, _port: OutPort, size: Size) -> Option<ImageBuffer> {
        if size.is_empty() {
            return None;
        }
        self.stuff_outstanding.fetch_add(1, Ordering::AcqRel);
        Some(ImageBuffer::new(size))
    }

    fn stuff_release(&self, port: OutPort, buffer: ImageBuffer) {
        let prev = self.stuff_outstanding.fetch_sub(1, Ordering::AcqRel);
        if prev == 0 {
            self.stuff_outstanding.store(0, Ordering::Release);
            warn!(%port, address = buffer.address(), "stuff buffer freed twice");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_depth_and_return() {
        let pool = ImagePool::new(&[(OutPort::Imgo, Size::new(8, 8))], 2);
        let a = pool.pool_acquire(OutPort::Imgo).unwrap();
        let _b = pool.pool_acquire(OutPort::Imgo).unwrap();
        assert!(pool.pool_acquire(OutPort::Imgo).is_none());
        pool.pool_release(OutPort::Imgo, a);
        assert_eq!(pool.available(OutPort::Imgo), 1);
        assert!(pool.pool_acquire(OutPort::Rrzo).is_none());
    }

    #[test]
    fn test_stuff_accounting() {
        let pool = ImagePool::new(&[], 0);
        let buf = pool.stuff_acquire(OutPort::Rrzo, Size::new(4, 4)).unwrap();
        assert_eq!(pool.stuff_outstanding(), 1);
        pool.stuff_release(OutPort::Rrzo, buf);
        assert_eq!(pool.stuff_outstanding(), 0);
        assert!(pool.stuff_acquire(OutPort::Rrzo, Size::new(0, 4)).is_none());
    }

    #[test]
    fn test_from_config_uses_enabled_ports() {
        let config = NodeConfig::default();
        let pool = ImagePool::from_config(&config);
        assert_eq!(pool.available(OutPort::Imgo), config.queue_depth);
        assert_eq!(pool.available(OutPort::Lcso), 0);
    }
}
