//! Provides the metrics which are recorded by each coordinator.
//!
//! All counters are plain atomics, therefore recording a metric never blocks a lookup.
use std::fmt;
use std::fmt::Display;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::average::Average;

/// Collects the metrics of a [Coordinator](crate::coordinator::Coordinator).
#[derive(Default)]
pub struct Stats {
    reads: AtomicUsize,
    hits: AtomicUsize,
    misses: AtomicUsize,
    populates: AtomicUsize,
    lock_denials: AtomicUsize,
    interrupted: AtomicUsize,
    lock_lost: AtomicUsize,
    populate_duration: Average,
}

impl Stats {
    pub(crate) fn record_lookups(&self, hits: usize, misses: usize) {
        let _ = self.reads.fetch_add(hits + misses, Ordering::Relaxed);
        let _ = self.hits.fetch_add(hits, Ordering::Relaxed);
        let _ = self.misses.fetch_add(misses, Ordering::Relaxed);
    }

    pub(crate) fn record_populate(&self, duration: Duration) {
        let _ = self.populates.fetch_add(1, Ordering::Relaxed);
        self.populate_duration.add_duration(duration);
    }

    pub(crate) fn record_lock_denial(&self) {
        let _ = self.lock_denials.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_interrupted(&self) {
        let _ = self.interrupted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_lock_lost(&self) {
        let _ = self.lock_lost.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of keys which were looked up in the cache on the first (shared) pass.
    ///
    /// A call which has to retry after a lock denial is only counted for its first attempt.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    /// Returns the number of keys which were found on the first (shared) pass.
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::Relaxed)
    }

    /// Returns the number of keys which were missing on the first (shared) pass.
    pub fn misses(&self) -> usize {
        self.misses.load(Ordering::Relaxed)
    }

    /// Returns the number of populate rounds which reached the data source.
    ///
    /// A batch lookup counts as a single populate, no matter how many positions it fetched.
    pub fn populates(&self) -> usize {
        self.populates.load(Ordering::Relaxed)
    }

    /// Returns how often the distributed lock was denied.
    pub fn lock_denials(&self) -> usize {
        self.lock_denials.load(Ordering::Relaxed)
    }

    /// Returns how many calls gave up waiting and returned an empty result.
    pub fn interrupted(&self) -> usize {
        self.interrupted.load(Ordering::Relaxed)
    }

    /// Returns how often a distributed lock had already expired (or was taken over) once its
    /// populate completed.
    pub fn lock_lost(&self) -> usize {
        self.lock_lost.load(Ordering::Relaxed)
    }

    /// Returns the sliding average of the populate latency.
    pub fn populate_duration(&self) -> &Average {
        &self.populate_duration
    }

    /// Computes the hit rate of the first pass in percent.
    pub fn hit_rate(&self) -> f32 {
        let reads = self.reads();
        if reads == 0 {
            0.
        } else {
            self.hits() as f32 / reads as f32 * 100.
        }
    }
}

impl Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:<30} {:>20}", "Reads", self.reads())?;
        writeln!(f, "{:<30} {:>20}", "Hits", self.hits())?;
        writeln!(f, "{:<30} {:>20}", "Misses", self.misses())?;
        writeln!(f, "{:<30} {:>18.2} %", "Hit Rate", self.hit_rate())?;
        writeln!(f, "{:<30} {:>20}", "Populates", self.populates())?;
        writeln!(
            f,
            "{:<30} {:>20}",
            "Populate Duration",
            self.populate_duration.to_string()
        )?;
        writeln!(f, "{:<30} {:>20}", "Lock Denials", self.lock_denials())?;
        writeln!(f, "{:<30} {:>20}", "Interrupted Waits", self.interrupted())?;
        writeln!(f, "{:<30} {:>20}", "Lost Locks", self.lock_lost())
    }
}

#[cfg(test)]
mod tests {
    use crate::stats::Stats;
    use std::time::Duration;

    #[test]
    fn hit_rate_is_computed_from_lookups() {
        let stats = Stats::default();
        assert_eq!(stats.hit_rate(), 0.);

        stats.record_lookups(3, 1);
        assert_eq!(stats.reads(), 4);
        assert_eq!(stats.hit_rate(), 75.);
    }

    #[test]
    fn populates_track_their_duration() {
        let stats = Stats::default();
        stats.record_populate(Duration::from_millis(2));
        assert_eq!(stats.populates(), 1);
        assert_eq!(stats.populate_duration().avg(), 2_000);
        assert!(format!("{}", stats).contains("2.00 ms (1)"));
    }
}
