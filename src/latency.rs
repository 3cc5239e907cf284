//! Per-translator, per-FOP latency instrumentation (C7).
//!
//! Updated on every stack unwind when a process-wide, signal-toggled flag
//! is set; left untouched (and so effectively free) otherwise.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

/// Process-wide switch mirroring the C source's `SIGUSR2`-toggled
/// `latency_measurement_enabled` flag.
static ENABLED: AtomicBool = AtomicBool::new(false);

pub fn set_enabled(enabled: bool) {
    ENABLED.store(enabled, Ordering::Relaxed);
}

pub fn is_enabled() -> bool {
    ENABLED.load(Ordering::Relaxed)
}

/// Running min/max/mean/variance for one (translator, FOP) pair, computed
/// with Welford's online algorithm so no per-call history is retained.
#[derive(Debug, Default)]
struct Accumulator {
    count: u64,
    mean_us: f64,
    m2: f64,
    min_us: f64,
    max_us: f64,
}

impl Accumulator {
    fn observe(&mut self, sample_us: f64) {
        if self.count == 0 {
            self.min_us = sample_us;
            self.max_us = sample_us;
        } else {
            self.min_us = self.min_us.min(sample_us);
            self.max_us = self.max_us.max(sample_us);
        }
        self.count += 1;
        let delta = sample_us - self.mean_us;
        self.mean_us += delta / self.count as f64;
        let delta2 = sample_us - self.mean_us;
        self.m2 += delta * delta2;
    }

    fn stddev_us(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            (self.m2 / (self.count - 1) as f64).sqrt()
        }
    }
}

/// A snapshot of one (translator, FOP) pair's accumulated stats.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FopStats {
    pub count: u64,
    pub mean_us: f64,
    pub min_us: f64,
    pub max_us: f64,
    pub stddev_us: f64,
}

/// Per-translator latency table, indexed by an opaque FOP slot number (the
/// translator assigns its own numbering; this module doesn't care what FOP
/// index 3 means, only that it's stable for that translator).
pub struct LatencyTable {
    counters: Mutex<Vec<Accumulator>>,
    fop_count: usize,
    total_calls: AtomicU64,
}

impl LatencyTable {
    pub fn new(fop_count: usize) -> Self {
        LatencyTable {
            counters: Mutex::new((0..fop_count).map(|_| Accumulator::default()).collect()),
            fop_count,
            total_calls: AtomicU64::new(0),
        }
    }

    /// Record one FOP's unwind latency, a no-op unless instrumentation is
    /// globally enabled.
    pub fn record(&self, fop_index: usize, elapsed: Duration) {
        if !is_enabled() {
            return;
        }
        assert!(fop_index < self.fop_count, "fop index out of range for this translator's latency table");
        self.counters.lock()[fop_index].observe(elapsed.as_secs_f64() * 1_000_000.0);
        self.total_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self, fop_index: usize) -> FopStats {
        let acc = &self.counters.lock()[fop_index];
        FopStats {
            count: acc.count,
            mean_us: acc.mean_us,
            min_us: acc.min_us,
            max_us: acc.max_us,
            stddev_us: acc.stddev_us(),
        }
    }

    pub fn reset(&self) {
        for acc in self.counters.lock().iter_mut() {
            *acc = Accumulator::default();
        }
        self.total_calls.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_is_noop_when_disabled() {
        set_enabled(false);
        let table = LatencyTable::new(1);
        table.record(0, Duration::from_micros(100));
        assert_eq!(table.stats(0).count, 0);
    }

    #[test]
    fn record_accumulates_min_max_mean_when_enabled() {
        set_enabled(true);
        let table = LatencyTable::new(1);
        table.record(0, Duration::from_micros(100));
        table.record(0, Duration::from_micros(300));
        let stats = table.stats(0);
        set_enabled(false);
        assert_eq!(stats.count, 2);
        assert_eq!(stats.min_us, 100.0);
        assert_eq!(stats.max_us, 300.0);
        assert_eq!(stats.mean_us, 200.0);
    }
}
