//! Hold duration, acquisition latency and contention statistics
//!
//! Every hold duration sample is retained per lock: exact median, min/max
//! and the histogram need the full distribution, and a post-mortem trace is
//! bounded anyway. Mean and standard deviation come from running sums so they
//! stay exact for integer nanosecond samples.

use crate::event::{LockEvent, LockId};
use fnv::FnvHashMap;
use serde::Serialize;

/// Position of a release in the trace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReleaseMark {
    pub index: u64,
    pub timestamp_ns: i64,
}

impl ReleaseMark {
    fn of(event: &LockEvent) -> Self {
        Self {
            index: event.index,
            timestamp_ns: event.timestamp_ns,
        }
    }
}

/// One equal-width histogram bucket, `[start, end)` except for the last one
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramBucket {
    pub start: f64,
    pub end: f64,
    pub count: u64,
}

/// Hold durations of a single lock
#[derive(Debug, Clone, Default)]
pub struct DurationStats {
    count: u64,
    sum: i128,
    sum_sq: i128,
    samples: Vec<i64>,
    first_release: Option<ReleaseMark>,
    last_release: Option<ReleaseMark>,
}

impl DurationStats {
    /// Record one matched acquire/release pair
    pub fn record(&mut self, duration_ns: i64, release: &LockEvent) {
        self.count += 1;
        let d = i128::from(duration_ns);
        self.sum = self.sum.saturating_add(d);
        self.sum_sq = self.sum_sq.saturating_add(d * d);
        self.samples.push(duration_ns);

        let mark = ReleaseMark::of(release);
        if self.first_release.is_none() {
            self.first_release = Some(mark);
        }
        self.last_release = Some(mark);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn samples(&self) -> &[i64] {
        &self.samples
    }

    pub fn mean(&self) -> Option<f64> {
        if self.count == 0 {
            return None;
        }
        Some(self.sum as f64 / self.count as f64)
    }

    /// Population standard deviation, `sqrt(sumSq/n - mean²)`
    ///
    /// Computed as `sqrt(n·sumSq - sum²) / n` in integers so identical samples
    /// give exactly zero.
    pub fn stddev(&self) -> Option<f64> {
        if self.count == 0 {
            return None;
        }
        let n = i128::from(self.count);

        let variance_n2 = n
            .checked_mul(self.sum_sq)
            .and_then(|a| self.sum.checked_mul(self.sum).map(|b| a - b));

        let stddev = match variance_n2 {
            Some(v) => (v.max(0) as f64).sqrt() / n as f64,
            None => {
                let mean = self.sum as f64 / n as f64;
                (self.sum_sq as f64 / n as f64 - mean * mean).max(0.0).sqrt()
            }
        };

        Some(stddev)
    }

    /// Full summary with a histogram of `buckets` buckets, `None` without samples
    pub fn summary(&self, buckets: usize) -> Option<DurationSummary> {
        let mean = self.mean()?;
        let stddev = self.stddev()?;

        let mut sorted = self.samples.clone();
        sorted.sort_unstable();

        Some(DurationSummary {
            count: self.count,
            total_ns: self.sum as f64,
            mean_ns: mean,
            stddev_ns: stddev,
            min_ns: sorted[0],
            median_ns: sorted[sorted.len() / 2],
            max_ns: sorted[sorted.len() - 1],
            histogram: histogram(&sorted, buckets),
            first_release: self.first_release,
            last_release: self.last_release,
        })
    }
}

/// Derived hold duration statistics of one lock
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DurationSummary {
    pub count: u64,
    pub total_ns: f64,
    pub mean_ns: f64,
    pub stddev_ns: f64,
    pub min_ns: i64,
    pub median_ns: i64,
    pub max_ns: i64,
    pub histogram: Vec<HistogramBucket>,
    pub first_release: Option<ReleaseMark>,
    pub last_release: Option<ReleaseMark>,
}

/// Equal-width histogram over `[min, max]` of already sorted samples
///
/// When every sample is identical there is no width to divide by and all
/// samples land in a single bucket. The maximum is counted in the last bucket,
/// so bucket counts always add up to the number of samples.
pub fn histogram(sorted: &[i64], buckets: usize) -> Vec<HistogramBucket> {
    let (min, max) = match (sorted.first(), sorted.last()) {
        (Some(&min), Some(&max)) => (min, max),
        _ => return Vec::new(),
    };

    if min == max || buckets <= 1 {
        return vec![HistogramBucket {
            start: min as f64,
            end: max as f64,
            count: sorted.len() as u64,
        }];
    }

    // Samples span the whole i64 range in corrupt traces
    let range = i128::from(max) - i128::from(min);
    let width = range as f64 / buckets as f64;
    let mut counts = vec![0u64; buckets];

    for &v in sorted {
        let offset = i128::from(v) - i128::from(min);
        let slot = ((offset as f64 / width) as usize).min(buckets - 1);
        counts[slot] += 1;
    }

    counts
        .into_iter()
        .enumerate()
        .map(|(i, count)| HistogramBucket {
            start: min as f64 + i as f64 * width,
            end: min as f64 + (i + 1) as f64 * width,
            count,
        })
        .collect()
}

/// Time spent waiting for a lock; only the mean is reported
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LatencyStats {
    count: u64,
    sum: i128,
}

impl LatencyStats {
    pub fn record(&mut self, latency_ns: i64) {
        self.count += 1;
        self.sum += i128::from(latency_ns);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> Option<f64> {
        if self.count == 0 {
            return None;
        }
        Some(self.sum as f64 / self.count as f64)
    }
}

/// Everything aggregated for one lock
#[derive(Debug, Clone, Default)]
pub struct LockStats {
    pub durations: DurationStats,
    pub latency: LatencyStats,
    /// Acquisitions that happened while an earlier holder record was present
    pub contended: u64,
}

/// Per-lock statistics for one lock family (mutexes or rwlocks)
#[derive(Debug, Default)]
pub struct StatsTracker {
    locks: FnvHashMap<LockId, LockStats>,
}

impl StatsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a hold duration, measured at `release`
    pub fn record_hold(&mut self, lock: LockId, duration_ns: i64, release: &LockEvent) {
        self.locks
            .entry(lock)
            .or_default()
            .durations
            .record(duration_ns, release);
    }

    pub fn record_latency(&mut self, lock: LockId, latency_ns: i64) {
        self.locks.entry(lock).or_default().latency.record(latency_ns);
    }

    pub fn record_contention(&mut self, lock: LockId) {
        self.locks.entry(lock).or_default().contended += 1;
    }

    pub fn get(&self, lock: LockId) -> Option<&LockStats> {
        self.locks.get(&lock)
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// Locks with at least one hold duration sample, ordered by lock id
    pub fn with_samples(&self) -> Vec<(LockId, &LockStats)> {
        let mut locks: Vec<_> = self
            .locks
            .iter()
            .filter(|(_, stats)| stats.durations.count() > 0)
            .map(|(&id, stats)| (id, stats))
            .collect();
        locks.sort_by_key(|(id, _)| *id);
        locks
    }
}
