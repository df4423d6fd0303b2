//! Bucketed rolling statistics.

use std::collections::VecDeque;
use std::ops::AddAssign;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

/// Call counts over some span of time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WindowCounts {
    pub fires: u64,
    pub successes: u64,
    /// Includes timeouts.
    pub failures: u64,
    pub timeouts: u64,
    pub rejects: u64,
    pub fallbacks: u64,
}

impl WindowCounts {
    /// Failed share of fired calls, 0 when nothing fired.
    pub fn error_percentage(&self) -> f64 {
        if self.fires == 0 {
            0.0
        } else {
            self.failures as f64 / self.fires as f64 * 100.0
        }
    }
}

impl AddAssign for WindowCounts {
    fn add_assign(&mut self, other: Self) {
        self.fires += other.fires;
        self.successes += other.successes;
        self.failures += other.failures;
        self.timeouts += other.timeouts;
        self.rejects += other.rejects;
        self.fallbacks += other.fallbacks;
    }
}

/// A window of `buckets` equal slices; the oldest slice is dropped as time
/// moves past it.
#[derive(Debug)]
pub struct RollingWindow {
    origin: Instant,
    bucket_len: Duration,
    capacity: u64,
    buckets: VecDeque<(u64, WindowCounts)>,
}

impl RollingWindow {
    pub fn new(window: Duration, buckets: u32) -> Self {
        let buckets = buckets.max(1);
        let bucket_len = (window / buckets).max(Duration::from_millis(1));
        Self {
            origin: Instant::now(),
            bucket_len,
            capacity: buckets as u64,
            buckets: VecDeque::with_capacity(buckets as usize),
        }
    }

    fn slot(&self, now: Instant) -> u64 {
        let elapsed = now.saturating_duration_since(self.origin);
        (elapsed.as_nanos() / self.bucket_len.as_nanos()) as u64
    }

    fn evict(&mut self, slot: u64) {
        while let Some((front, _)) = self.buckets.front() {
            if front + self.capacity <= slot {
                self.buckets.pop_front();
            } else {
                break;
            }
        }
    }

    /// Apply `update` to the bucket covering `now`.
    pub fn record(&mut self, now: Instant, update: impl FnOnce(&mut WindowCounts)) {
        let slot = self.slot(now);
        self.evict(slot);
        if self.buckets.back().map(|(s, _)| *s) != Some(slot) {
            self.buckets.push_back((slot, WindowCounts::default()));
        }
        if let Some((_, counts)) = self.buckets.back_mut() {
            update(counts);
        }
    }

    /// Sum of every bucket still inside the window at `now`.
    pub fn totals(&self, now: Instant) -> WindowCounts {
        let slot = self.slot(now);
        let mut total = WindowCounts::default();
        for (bucket, counts) in &self.buckets {
            if bucket + self.capacity > slot {
                total += *counts;
            }
        }
        total
    }

    pub fn clear(&mut self) {
        self.buckets.clear();
    }
}
