//! Sampling and throttling of UI refresh notifications
//!
//! Every retained event bumps a counter; only every Nth event is eligible to
//! notify. An eligible event notifies immediately when the throttle interval
//! has elapsed since the last notification, claimed by compare-and-swap so
//! two ingest threads cannot both win. Otherwise at most one deferred
//! notification is armed for the remainder of the interval.
//!
//! ```text
//! t=0     eligible  -> Immediate
//! t=500   eligible  -> Deferred(1500ms)   armed
//! t=600   eligible  -> Suppressed         already armed
//! t=2000  fire_deferred()                 disarmed, last = 2000
//! ```
//!
//! The throttle only decides; running timers is the caller's job.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

const NEVER: u64 = u64::MAX;

/// Outcome of offering an event to the throttle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notify {
    /// Not a sampling point
    NotEligible,
    /// Notify now
    Immediate,
    /// Arm a one-shot notification after the given delay
    Deferred(Duration),
    /// A deferred notification is already armed
    Suppressed,
}

/// Counters describing throttle decisions so far
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ThrottleStats {
    pub events_seen: u64,
    pub eligible: u64,
    pub immediate: u64,
    pub deferred: u64,
    pub suppressed: u64,
}

#[derive(Debug)]
pub struct NotificationThrottle {
    sample_rate: u64,
    interval_ms: u64,
    epoch: Instant,
    counter: AtomicU64,
    last_notified: AtomicU64,
    deferred_armed: AtomicBool,
    eligible: AtomicU64,
    immediate: AtomicU64,
    deferred: AtomicU64,
    suppressed: AtomicU64,
}

impl NotificationThrottle {
    /// `sample_rate` of 0 is treated as 1
    pub fn new(sample_rate: u64, interval_ms: u64) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            interval_ms,
            epoch: Instant::now(),
            counter: AtomicU64::new(0),
            last_notified: AtomicU64::new(NEVER),
            deferred_armed: AtomicBool::new(false),
            eligible: AtomicU64::new(0),
            immediate: AtomicU64::new(0),
            deferred: AtomicU64::new(0),
            suppressed: AtomicU64::new(0),
        }
    }

    /// Milliseconds since this throttle was created
    pub fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Count one retained event and decide whether it notifies
    pub fn on_event(&self, now_ms: u64) -> Notify {
        let seen = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        if seen % self.sample_rate != 0 {
            return Notify::NotEligible;
        }
        self.check(now_ms)
    }

    /// Eligibility check that skips sampling (natural refresh points)
    pub fn check(&self, now_ms: u64) -> Notify {
        self.eligible.fetch_add(1, Ordering::Relaxed);

        let mut last = self.last_notified.load(Ordering::Acquire);
        loop {
            let elapsed = if last == NEVER {
                u64::MAX
            } else {
                now_ms.saturating_sub(last)
            };

            if elapsed >= self.interval_ms {
                match self.last_notified.compare_exchange(
                    last,
                    now_ms,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => {
                        self.immediate.fetch_add(1, Ordering::Relaxed);
                        return Notify::Immediate;
                    }
                    Err(actual) => {
                        last = actual;
                        continue;
                    }
                }
            }

            let remaining = self.interval_ms - elapsed;
            return if self
                .deferred_armed
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.deferred.fetch_add(1, Ordering::Relaxed);
                Notify::Deferred(Duration::from_millis(remaining))
            } else {
                self.suppressed.fetch_add(1, Ordering::Relaxed);
                Notify::Suppressed
            };
        }
    }

    /// Record that the armed deferred notification ran at `now_ms`
    pub fn fire_deferred(&self, now_ms: u64) {
        let mut current = self.last_notified.load(Ordering::Acquire);
        while current == NEVER || now_ms > current {
            match self.last_notified.compare_exchange_weak(
                current,
                now_ms,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        self.deferred_armed.store(false, Ordering::Release);
    }

    pub fn is_deferred_armed(&self) -> bool {
        self.deferred_armed.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> ThrottleStats {
        ThrottleStats {
            events_seen: self.counter.load(Ordering::Relaxed),
            eligible: self.eligible.load(Ordering::Relaxed),
            immediate: self.immediate.load(Ordering::Relaxed),
            deferred: self.deferred.load(Ordering::Relaxed),
            suppressed: self.suppressed.load(Ordering::Relaxed),
        }
    }

    /// Restart sampling and forget the last notification time
    pub fn reset(&self) {
        self.counter.store(0, Ordering::Relaxed);
        self.last_notified.store(NEVER, Ordering::Release);
        for c in [&self.eligible, &self.immediate, &self.deferred, &self.suppressed] {
            c.store(0, Ordering::Relaxed);
        }
    }
}
