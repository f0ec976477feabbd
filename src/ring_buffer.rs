//! Circular buffer of recently ingested events
//!
//! Fixed capacity, FIFO eviction: once full, every push drops the oldest
//! entry. Memory stays bounded no matter how fast events arrive. Entries are
//! stored serialized so readers get exactly what came off the wire.
//!
//! ```text
//! capacity = 4
//! push e1..e4   [e1 e2 e3 e4]
//! push e5       [e2 e3 e4 e5]   e1 evicted
//! ```

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

/// Bounded FIFO of serialized events, safe to share between the network
/// reader and UI readers
///
/// # Example
///
/// ```
/// use trueflow::ring_buffer::EventRingBuffer;
///
/// let buffer = EventRingBuffer::new(2);
/// buffer.push("a".to_string());
/// buffer.push("b".to_string());
/// buffer.push("c".to_string());
/// assert_eq!(buffer.snapshot(), vec!["b".to_string(), "c".to_string()]);
/// ```
#[derive(Debug)]
pub struct EventRingBuffer {
    entries: Mutex<VecDeque<String>>,
    capacity: usize,
    total_pushed: AtomicU64,
    total_evicted: AtomicU64,
}

impl EventRingBuffer {
    /// Create a new ring buffer with specified capacity
    ///
    /// # Panics
    ///
    /// Panics if capacity is 0.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "Ring buffer capacity must be > 0");

        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
            capacity,
            total_pushed: AtomicU64::new(0),
            total_evicted: AtomicU64::new(0),
        }
    }

    /// Append an entry, evicting the oldest when full. Never blocks on I/O.
    pub fn push(&self, entry: String) {
        self.total_pushed.fetch_add(1, Ordering::Relaxed);

        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
            self.total_evicted.fetch_add(1, Ordering::Relaxed);
        }
        entries.push_back(entry);
    }

    /// All entries, oldest first
    pub fn snapshot(&self) -> Vec<String> {
        self.entries.lock().iter().cloned().collect()
    }

    /// The newest `limit` entries, oldest first
    pub fn recent(&self, limit: usize) -> Vec<String> {
        let entries = self.entries.lock();
        let skip = entries.len().saturating_sub(limit);
        entries.iter().skip(skip).cloned().collect()
    }

    /// Remove and return everything, oldest first
    pub fn drain(&self) -> Vec<String> {
        self.entries.lock().drain(..).collect()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get buffer statistics
    pub fn stats(&self) -> BufferStats {
        BufferStats {
            total_pushed: self.total_pushed.load(Ordering::Relaxed),
            total_evicted: self.total_evicted.load(Ordering::Relaxed),
            current_size: self.len(),
            capacity: self.capacity,
        }
    }
}

/// Ring buffer statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferStats {
    pub total_pushed: u64,
    pub total_evicted: u64,
    pub current_size: usize,
    pub capacity: usize,
}

impl BufferStats {
    /// Fraction of pushed entries that have been evicted (0.0 to 1.0)
    pub fn eviction_rate(&self) -> f64 {
        if self.total_pushed == 0 {
            0.0
        } else {
            self.total_evicted as f64 / self.total_pushed as f64
        }
    }

    /// Calculate buffer utilization (0.0 to 1.0)
    pub fn utilization(&self) -> f64 {
        self.current_size as f64 / self.capacity as f64
    }
}
