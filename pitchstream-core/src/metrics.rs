//! Streaming metrics
//!
//! Each generator owns one [`StreamMetrics`] behind an `Arc`, so a training
//! loop can read it from another thread while batches are being produced.

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Instant;

/// Monotonically increasing counter
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    /// Increment by one
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment by `delta`
    pub fn inc_by(&self, delta: u64) {
        self.0.fetch_add(delta, Ordering::Relaxed);
    }

    /// Get current value
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Value that can go up or down
#[derive(Debug, Default)]
pub struct Gauge(AtomicI64);

impl Gauge {
    /// Set current value
    pub fn set(&self, val: i64) {
        self.0.store(val, Ordering::Relaxed);
    }

    /// Get current value
    pub fn get(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Cumulative histogram of durations in seconds
#[derive(Debug)]
pub struct Histogram {
    bounds: Vec<f64>,
    buckets: Vec<AtomicU64>,
    sum_micros: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    /// Buckets sized for decompressing one array file
    pub fn new() -> Self {
        Self::with_bounds(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0])
    }

    /// Histogram with custom upper bounds in seconds
    pub fn with_bounds(bounds: Vec<f64>) -> Self {
        let buckets = bounds.iter().map(|_| AtomicU64::new(0)).collect();
        Self {
            bounds,
            buckets,
            sum_micros: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Record one observation
    pub fn observe(&self, seconds: f64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_micros
            .fetch_add((seconds * 1_000_000.0) as u64, Ordering::Relaxed);

        for (bound, bucket) in self.bounds.iter().zip(&self.buckets) {
            if seconds <= *bound {
                bucket.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Run `f` and record how long it took
    pub fn time<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let start = Instant::now();
        let result = f();
        self.observe(start.elapsed().as_secs_f64());
        result
    }

    /// Number of observations
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Sum of all observations
    pub fn sum_seconds(&self) -> f64 {
        self.sum_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0
    }

    /// `(upper bound, cumulative count)` pairs
    pub fn buckets(&self) -> Vec<(f64, u64)> {
        self.bounds
            .iter()
            .zip(&self.buckets)
            .map(|(bound, count)| (*bound, count.load(Ordering::Relaxed)))
            .collect()
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters for one batch generator
#[derive(Debug, Default)]
pub struct StreamMetrics {
    /// Samples pulled from file streams
    pub samples_drawn: Counter,
    /// Full batches handed to the consumer
    pub batches_emitted: Counter,
    /// File streams instantiated
    pub streams_activated: Counter,
    /// Active streams retired in favour of an inactive file
    pub rotations: Counter,
    /// Feature files read from disk while streaming
    pub files_loaded: Counter,
    /// Streams currently in the active pool
    pub active_streams: Gauge,
    /// Time spent reading deferred feature files
    pub file_load_seconds: Histogram,
}

/// Point-in-time copy of [`StreamMetrics`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub samples_drawn: u64,
    pub batches_emitted: u64,
    pub streams_activated: u64,
    pub rotations: u64,
    pub files_loaded: u64,
    pub active_streams: i64,
    pub file_load_count: u64,
    pub file_load_seconds: f64,
}

impl StreamMetrics {
    /// Zeroed metrics
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy current values
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            samples_drawn: self.samples_drawn.get(),
            batches_emitted: self.batches_emitted.get(),
            streams_activated: self.streams_activated.get(),
            rotations: self.rotations.get(),
            files_loaded: self.files_loaded.get(),
            active_streams: self.active_streams.get(),
            file_load_count: self.file_load_seconds.count(),
            file_load_seconds: self.file_load_seconds.sum_seconds(),
        }
    }

    /// Render in Prometheus text exposition format
    pub fn to_prometheus(&self) -> String {
        let mut out = String::new();
        let counters = [
            ("pitchstream_samples_drawn_total", "Samples pulled from file streams", &self.samples_drawn),
            ("pitchstream_batches_emitted_total", "Batches handed to the consumer", &self.batches_emitted),
            ("pitchstream_streams_activated_total", "File streams instantiated", &self.streams_activated),
            ("pitchstream_rotations_total", "Active streams rotated out", &self.rotations),
            ("pitchstream_files_loaded_total", "Feature files read while streaming", &self.files_loaded),
        ];
        for (name, help, counter) in counters {
            let _ = write!(
                out,
                "# HELP {name} {help}\n# TYPE {name} counter\n{name} {}\n",
                counter.get()
            );
        }

        let name = "pitchstream_active_streams";
        let _ = write!(
            out,
            "# HELP {name} Streams in the active pool\n# TYPE {name} gauge\n{name} {}\n",
            self.active_streams.get()
        );

        let name = "pitchstream_file_load_duration_seconds";
        let _ = write!(
            out,
            "# HELP {name} Deferred feature file load latency\n# TYPE {name} histogram\n"
        );
        for (bound, count) in self.file_load_seconds.buckets() {
            let _ = writeln!(out, "{name}_bucket{{le=\"{bound}\"}} {count}");
        }
        let count = self.file_load_seconds.count();
        let _ = writeln!(out, "{name}_bucket{{le=\"+Inf\"}} {count}");
        let _ = writeln!(out, "{name}_sum {}", self.file_load_seconds.sum_seconds());
        let _ = writeln!(out, "{name}_count {count}");

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_and_gauge() {
        let metrics = StreamMetrics::new();
        metrics.samples_drawn.inc();
        metrics.samples_drawn.inc_by(4);
        metrics.active_streams.set(3);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.samples_drawn, 5);
        assert_eq!(snapshot.active_streams, 3);
        assert_eq!(snapshot.batches_emitted, 0);
    }

    #[test]
    fn test_histogram_buckets_are_cumulative() {
        let histogram = Histogram::with_bounds(vec![0.01, 0.1, 1.0]);
        histogram.observe(0.005);
        histogram.observe(0.05);
        histogram.observe(0.5);

        assert_eq!(histogram.count(), 3);
        assert_eq!(histogram.buckets(), vec![(0.01, 1), (0.1, 2), (1.0, 3)]);
        assert!((histogram.sum_seconds() - 0.555).abs() < 1e-6);
    }

    #[test]
    fn test_histogram_time() {
        let histogram = Histogram::new();
        let value = histogram.time(|| 42);
        assert_eq!(value, 42);
        assert_eq!(histogram.count(), 1);
    }

    #[test]
    fn test_prometheus_output() {
        let metrics = StreamMetrics::new();
        metrics.batches_emitted.inc_by(7);
        metrics.file_load_seconds.observe(0.02);

        let text = metrics.to_prometheus();
        assert!(text.contains("pitchstream_batches_emitted_total 7"));
        assert!(text.contains("# TYPE pitchstream_active_streams gauge"));
        assert!(text.contains("pitchstream_file_load_duration_seconds_count 1"));
        assert!(text.contains("le=\"+Inf\"} 1"));
    }

    #[test]
    fn test_snapshot_serializes() {
        let metrics = StreamMetrics::new();
        metrics.rotations.inc();
        let json = serde_json::to_string(&metrics.snapshot()).unwrap();
        assert!(json.contains("\"rotations\":1"));
    }
}
