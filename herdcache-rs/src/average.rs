//! Provides a helper which computes a sliding average of a series of durations.
//!
//! This is used to track how long populating the cache from the data source takes, which is the
//! latency every waiting caller of a scope pays during a miss episode.
//!
//! An [Average](Average) is internally mutable without needing a mutable reference as we rely on
//! atomic intrinsics as provided by modern processors / compilers.
//!
//! # Example
//!
//! ```
//! # use herdcache::average::Average;
//! # use std::time::Duration;
//! let avg = Average::new();
//! avg.add(10);
//! avg.add_duration(Duration::from_micros(20));
//! avg.add(30);
//!
//! assert_eq!(avg.avg(), 20);
//! assert_eq!(avg.count(), 3);
//! ```
use crate::fmt::format_micros;
use std::fmt;
use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Computes a sliding average of a series of values (in microseconds).
///
/// Keeps track of the sliding average of the last 100 values as well as the total number of
/// recorded values. Note that this overflows gracefully.
#[derive(Default)]
pub struct Average {
    sum_and_count: AtomicU64,
    count: AtomicU64,
}

impl Average {
    /// Creates a new average.
    pub fn new() -> Average {
        Average {
            sum_and_count: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    fn sum_and_count(&self) -> (i32, i32) {
        let last_sum_and_count = self.sum_and_count.load(Ordering::Relaxed);
        let count = (last_sum_and_count & 0xFFFFFFFF) as i32;
        let sum = ((last_sum_and_count >> 32) & 0xFFFFFFFF) as i32;

        (sum, count)
    }

    /// Adds another value to the average calculation.
    ///
    /// A single u64 is split into two i32 halves which keep the sum and the count of the sliding
    /// window. Once more than 100 values were recorded (or the sum would overflow), both halves
    /// are divided by two before the new value is added. Only atomic loads and stores are used,
    /// so recording never blocks. Concurrent updates may drop a sample, which is fine for a
    /// latency indicator.
    pub fn add(&self, value: i32) {
        let _ = self.count.fetch_add(1, Ordering::Relaxed);

        let (mut sum, mut count) = self.sum_and_count();

        while count > 100 || sum as i64 + value as i64 > i32::MAX as i64 {
            sum = count / 2 * sum / count;
            count /= 2;
        }

        sum += value;
        count += 1;

        let next_sum_and_count = (sum as u64 & 0xFFFFFFFF) << 32 | (count as u64 & 0xFFFFFFFF);
        self.sum_and_count
            .store(next_sum_and_count, Ordering::Relaxed);
    }

    /// Records the given duration with microsecond precision.
    ///
    /// Durations beyond `i32::MAX` microseconds (about 35 minutes) are clamped.
    pub fn add_duration(&self, duration: Duration) {
        self.add(duration.as_micros().min(i32::MAX as u128) as i32);
    }

    /// Returns the total number of recorded values.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Computes the sliding average of the last 100 values.
    pub fn avg(&self) -> i32 {
        let (sum, count) = self.sum_and_count();

        if sum == 0 {
            0
        } else {
            sum / count
        }
    }
}

impl Display for Average {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        format_micros(self.avg(), f)?;
        write!(f, " ({})", self.count())?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use crate::average::Average;
    use std::time::Duration;

    #[test]
    fn empty_average_is_properly_initialized() {
        let avg = Average::new();
        assert_eq!(avg.avg(), 0);
        assert_eq!(avg.count(), 0);
    }

    #[test]
    fn average_with_many_values_keeps_count() {
        let avg = Average::new();
        for i in 1..=1000 {
            avg.add(i);
        }
        assert_eq!(avg.avg(), 928);
        assert_eq!(avg.count(), 1000);
    }

    #[test]
    fn durations_are_recorded_in_micros() {
        let avg = Average::new();
        avg.add_duration(Duration::from_millis(10));
        avg.add_duration(Duration::from_millis(30));
        assert_eq!(avg.avg(), 20_000);
        assert_eq!(format!("{}", avg), "20.0 ms (2)");
    }

    #[test]
    fn huge_durations_are_clamped() {
        let avg = Average::new();
        avg.add_duration(Duration::from_secs(24 * 60 * 60));
        assert_eq!(avg.avg(), i32::MAX);
    }
}
