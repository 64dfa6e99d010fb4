use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Run-wide counters, updated by workers without locking
#[derive(Debug, Default)]
pub struct BulkStats {
    total: AtomicUsize,
    processed: AtomicUsize,
    successful: AtomicUsize,
    failed: AtomicUsize,
    skipped: AtomicUsize,
}

/// Point-in-time copy of [`BulkStats`], also the `stats` object of the cache document
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub total: usize,
    pub processed: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl BulkStats {
    pub fn set_total(&self, total: usize) {
        self.total.store(total, Ordering::Relaxed);
    }

    pub fn record_success(&self) {
        self.successful.fetch_add(1, Ordering::Relaxed);
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    /// A resumed file that already has a cache entry. Not counted as processed.
    pub fn record_skip(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total: self.total.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            successful: self.successful.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }
}

impl StatsSnapshot {
    /// Files the run is done with, either processed or skipped
    pub fn completed(&self) -> usize {
        self.processed + self.skipped
    }

    /// Share of `total` the run is done with
    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.completed() as f64 * 100.0 / self.total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_keep_processed_balanced() {
        let stats = BulkStats::default();
        stats.set_total(5);
        stats.record_success();
        stats.record_failure();
        stats.record_failure();
        stats.record_skip();

        let snap = stats.snapshot();
        assert_eq!(snap.total, 5);
        assert_eq!(snap.processed, snap.successful + snap.failed);
        assert_eq!(snap.skipped, 1);
        assert_eq!(snap.completed(), 4);
        assert!((snap.percentage() - 80.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_percentage_with_no_files() {
        assert_eq!(StatsSnapshot::default().percentage(), 0.0);
    }

    #[test]
    fn test_concurrent_updates() {
        let stats = BulkStats::default();
        stats.set_total(800);
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for i in 0..100 {
                        if i % 2 == 0 {
                            stats.record_success();
                        } else {
                            stats.record_failure();
                        }
                    }
                });
            }
        });

        let snap = stats.snapshot();
        assert_eq!(snap.processed, 800);
        assert_eq!(snap.successful, 400);
        assert_eq!(snap.failed, 400);
    }
}
