//! Pooled pixel buffers for capture-zone readback

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use bytes::BytesMut;
use crossbeam::utils::CachePadded;
use tracing::{debug, trace};

/// Allocator for readback buffers.
///
/// A buffer handed out by `acquire` has exactly one owner until it comes
/// back through `release`.
pub trait BufferAllocator: Send + Sync {
    /// Returns a zero-filled buffer of exactly `len` bytes
    fn acquire(&self, len: usize) -> BytesMut;

    fn release(&self, buffer: BytesMut);

    /// Buffers acquired and not yet released
    fn outstanding(&self) -> usize;
}

/// Size-classed buffer pool.
///
/// Buffers are grouped by the next power of two of their requested length so
/// a capture zone that shrinks or grows slightly keeps reusing memory.
pub struct BufferPool {
    free: Mutex<HashMap<usize, Vec<BytesMut>>>,
    max_per_class: usize,

    /// Statistics
    stats: CachePadded<Stats>,
}

#[derive(Default)]
struct Stats {
    allocated: AtomicUsize,
    reused: AtomicUsize,
    outstanding: AtomicUsize,
}

fn size_class(len: usize) -> usize {
    len.max(1).next_power_of_two()
}

impl BufferPool {
    pub fn new(max_per_class: usize) -> Self {
        Self {
            free: Mutex::new(HashMap::new()),
            max_per_class,
            stats: CachePadded::new(Stats::default()),
        }
    }

    /// (allocated, reused, outstanding)
    pub fn stats(&self) -> (usize, usize, usize) {
        (
            self.stats.allocated.load(Ordering::Relaxed),
            self.stats.reused.load(Ordering::Relaxed),
            self.stats.outstanding.load(Ordering::Relaxed),
        )
    }

    /// Buffers currently parked in the pool
    pub fn idle(&self) -> usize {
        let free = self.free.lock().unwrap_or_else(PoisonError::into_inner);
        free.values().map(Vec::len).sum()
    }
}

impl BufferAllocator for BufferPool {
    fn acquire(&self, len: usize) -> BytesMut {
        let class = size_class(len);
        let reused = {
            let mut free = self.free.lock().unwrap_or_else(PoisonError::into_inner);
            free.get_mut(&class).and_then(Vec::pop)
        };

        let mut buffer = match reused {
            Some(buffer) => {
                self.stats.reused.fetch_add(1, Ordering::Relaxed);
                buffer
            }
            None => {
                self.stats.allocated.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("buffers_allocated").increment(1);
                debug!("Allocating {} byte buffer (class {})", len, class);
                BytesMut::with_capacity(class)
            }
        };

        buffer.clear();
        buffer.resize(len, 0);
        self.stats.outstanding.fetch_add(1, Ordering::Relaxed);
        buffer
    }

    fn release(&self, buffer: BytesMut) {
        self.stats.outstanding.fetch_sub(1, Ordering::Relaxed);

        let capacity = buffer.capacity();
        if capacity == 0 {
            trace!("Dropping empty buffer");
            return;
        }
        // Largest class the buffer can fully serve
        let class = if capacity.is_power_of_two() {
            capacity
        } else {
            size_class(capacity) >> 1
        };

        let mut free = self.free.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = free.entry(class).or_default();
        if slot.len() < self.max_per_class {
            slot.push(buffer);
        }
    }

    fn outstanding(&self) -> usize {
        self.stats.outstanding.load(Ordering::Relaxed)
    }
}
