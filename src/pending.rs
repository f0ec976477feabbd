//! Bounded map of calls still waiting for their return
//!
//! Calls whose return never arrives (crashed threads, lost lines, tracer
//! stopped mid-call) would otherwise accumulate forever. Entries live in a
//! slot arena indexed by call id, and an insertion-ordered age queue lets a
//! periodic sweep evict anything older than the configured age in
//! O(evicted) time. A hard entry cap evicts the oldest entry on overflow.
//!
//! Removed slots are recycled through a free list; each slot carries a
//! generation so stale age-queue references are recognized and skipped.

use std::collections::{HashMap, VecDeque};

/// A call observed but not yet returned
#[derive(Debug, Clone, PartialEq)]
pub struct PendingCall {
    pub call_id: String,
    pub function_key: String,
    /// Event timestamp of the call (seconds)
    pub timestamp: f64,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u64,
    entry: Option<PendingCall>,
}

/// `call_id → call timestamp`, bounded by age and entry count
#[derive(Debug)]
pub struct PendingCallMap {
    slots: Vec<Slot>,
    free: Vec<usize>,
    index: HashMap<String, usize>,
    age_queue: VecDeque<(usize, u64)>,
    max_age_secs: f64,
    max_entries: usize,
    evicted_total: u64,
}

impl PendingCallMap {
    /// # Panics
    ///
    /// Panics if `max_entries` is 0.
    pub fn new(max_age_secs: f64, max_entries: usize) -> Self {
        assert!(max_entries > 0, "Pending call capacity must be > 0");
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            index: HashMap::new(),
            age_queue: VecDeque::new(),
            max_age_secs,
            max_entries,
            evicted_total: 0,
        }
    }

    /// Record a call. A repeated call id replaces the earlier entry.
    ///
    /// Returns the entry evicted to make room, if the map was full.
    pub fn insert(&mut self, call_id: &str, function_key: &str, timestamp: f64) -> Option<PendingCall> {
        self.remove(call_id);

        let evicted = if self.index.len() >= self.max_entries {
            self.evict_oldest()
        } else {
            None
        };

        let slot = match self.free.pop() {
            Some(slot) => slot,
            None => {
                self.slots.push(Slot::default());
                self.slots.len() - 1
            }
        };
        let generation = self.slots[slot].generation;
        self.slots[slot].entry = Some(PendingCall {
            call_id: call_id.to_string(),
            function_key: function_key.to_string(),
            timestamp,
        });
        self.index.insert(call_id.to_string(), slot);
        self.age_queue.push_back((slot, generation));
        self.compact_if_needed();

        evicted
    }

    /// Take the entry for a returning call
    pub fn remove(&mut self, call_id: &str) -> Option<PendingCall> {
        let slot = self.index.remove(call_id)?;
        Some(self.release(slot))
    }

    pub fn get(&self, call_id: &str) -> Option<&PendingCall> {
        let slot = *self.index.get(call_id)?;
        self.slots[slot].entry.as_ref()
    }

    /// Evict every entry older than the max age relative to `now`
    ///
    /// Returns the evicted entries, oldest first.
    pub fn sweep(&mut self, now: f64) -> Vec<PendingCall> {
        let mut evicted = Vec::new();
        while let Some(&(slot, generation)) = self.age_queue.front() {
            let state = self
                .live_entry(slot, generation)
                .map(|e| (now - e.timestamp > self.max_age_secs, e.call_id.clone()));
            match state {
                None => {
                    self.age_queue.pop_front();
                }
                Some((true, call_id)) => {
                    self.age_queue.pop_front();
                    self.index.remove(&call_id);
                    evicted.push(self.release(slot));
                }
                Some((false, _)) => break,
            }
        }
        self.evicted_total += evicted.len() as u64;
        evicted
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Entries dropped by sweeps or capacity pressure since creation
    pub fn evicted_total(&self) -> u64 {
        self.evicted_total
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.index.clear();
        self.age_queue.clear();
    }

    fn live_entry(&self, slot: usize, generation: u64) -> Option<&PendingCall> {
        let s = self.slots.get(slot)?;
        if s.generation != generation {
            return None;
        }
        s.entry.as_ref()
    }

    fn release(&mut self, slot: usize) -> PendingCall {
        let s = &mut self.slots[slot];
        let entry = s.entry.take();
        s.generation += 1;
        self.free.push(slot);
        // index and slot are kept in lockstep, so an indexed slot is occupied
        entry.unwrap_or_else(|| PendingCall {
            call_id: String::new(),
            function_key: String::new(),
            timestamp: 0.0,
        })
    }

    fn evict_oldest(&mut self) -> Option<PendingCall> {
        while let Some((slot, generation)) = self.age_queue.pop_front() {
            if let Some(call_id) = self.live_entry(slot, generation).map(|e| e.call_id.clone()) {
                self.index.remove(&call_id);
                self.evicted_total += 1;
                return Some(self.release(slot));
            }
        }
        None
    }

    /// Drop stale age-queue references once they dominate the queue
    fn compact_if_needed(&mut self) {
        if self.age_queue.len() > 2 * self.index.len() + 64 {
            let slots = &self.slots;
            self.age_queue.retain(|&(slot, generation)| {
                slots
                    .get(slot)
                    .is_some_and(|s| s.generation == generation && s.entry.is_some())
            });
        }
    }
}
