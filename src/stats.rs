use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{NaiveDateTime, Utc};

/// Counter sink the scheduler reports into, decoupling it from any
/// particular execution framework. Implementations must be cheap; workers
/// call this on the fetch path.
pub trait MetricsSink: Send + Sync {
    fn increment(&self, name: &str, amount: u64);
}

pub mod counter {
    pub const URLS_ADMITTED: &str = "urls_admitted";
    pub const URLS_SKIP_SCORED: &str = "urls_skip_scored";
    pub const URLS_REJECTED: &str = "urls_rejected";
    pub const URLS_FETCHED: &str = "urls_fetched";
    pub const URLS_FAILED: &str = "urls_failed";
    pub const URLS_SKIPPED: &str = "urls_skipped";
    pub const SETS_RELEASED: &str = "sets_released";
}

// Needed stats:
// - urls admitted / fetched / failed / skipped
// - fetch sets released
// - fetched per minute
pub struct Stats {
    urls_admitted: AtomicU64,
    urls_skip_scored: AtomicU64,
    urls_rejected: AtomicU64,
    urls_fetched: AtomicU64,
    urls_failed: AtomicU64,
    urls_skipped: AtomicU64,
    sets_released: AtomicU64,
    start_time: Mutex<NaiveDateTime>,
}

impl Stats {
    pub fn new() -> Self {
        Self {
            urls_admitted: AtomicU64::new(0),
            urls_skip_scored: AtomicU64::new(0),
            urls_rejected: AtomicU64::new(0),
            urls_fetched: AtomicU64::new(0),
            urls_failed: AtomicU64::new(0),
            urls_skipped: AtomicU64::new(0),
            sets_released: AtomicU64::new(0),
            start_time: Mutex::new(Utc::now().naive_utc()),
        }
    }

    pub fn reset(&self) {
        let mut start_time = self.start_time.lock().unwrap();
        self.urls_admitted.store(0, Ordering::Relaxed);
        self.urls_skip_scored.store(0, Ordering::Relaxed);
        self.urls_rejected.store(0, Ordering::Relaxed);
        self.urls_fetched.store(0, Ordering::Relaxed);
        self.urls_failed.store(0, Ordering::Relaxed);
        self.urls_skipped.store(0, Ordering::Relaxed);
        self.sets_released.store(0, Ordering::Relaxed);
        *start_time = Utc::now().naive_utc();
    }

    pub fn urls_admitted(&self) -> u64 {
        self.urls_admitted.load(Ordering::Relaxed)
    }

    pub fn urls_fetched(&self) -> u64 {
        self.urls_fetched.load(Ordering::Relaxed)
    }

    pub fn urls_failed(&self) -> u64 {
        self.urls_failed.load(Ordering::Relaxed)
    }

    pub fn urls_skipped(&self) -> u64 {
        self.urls_skipped.load(Ordering::Relaxed)
    }

    pub fn sets_released(&self) -> u64 {
        self.sets_released.load(Ordering::Relaxed)
    }

    pub fn fetched_per_minute(&self) -> u64 {
        let fetched = self.urls_fetched();
        let elapsed = (self.elapsed_time() / 60) as u64;
        if elapsed > 0 {
            fetched / elapsed
        } else {
            0
        }
    }

    /// Elapsed time for this run in seconds
    pub fn elapsed_time(&self) -> i64 {
        let start_time = self.start_time.lock().unwrap();
        let now = Utc::now().naive_utc();
        let elapsed = now - *start_time;
        elapsed.num_seconds()
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSink for Stats {
    fn increment(&self, name: &str, amount: u64) {
        let counter = match name {
            counter::URLS_ADMITTED => &self.urls_admitted,
            counter::URLS_SKIP_SCORED => &self.urls_skip_scored,
            counter::URLS_REJECTED => &self.urls_rejected,
            counter::URLS_FETCHED => &self.urls_fetched,
            counter::URLS_FAILED => &self.urls_failed,
            counter::URLS_SKIPPED => &self.urls_skipped,
            counter::SETS_RELEASED => &self.sets_released,
            _ => {
                log::warn!("unknown counter: {}", name);
                return;
            }
        };
        counter.fetch_add(amount, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increments_route_to_counters() {
        let stats = Stats::new();
        stats.increment(counter::URLS_FETCHED, 3);
        stats.increment(counter::URLS_FETCHED, 2);
        stats.increment(counter::SETS_RELEASED, 1);
        assert_eq!(stats.urls_fetched(), 5);
        assert_eq!(stats.sets_released(), 1);
        assert_eq!(stats.urls_failed(), 0);

        stats.reset();
        assert_eq!(stats.urls_fetched(), 0);
    }
}
