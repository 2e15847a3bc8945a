//! Per-call check metrics
//!
//! One [`CheckMetrics`] lives for one typecheck call. The scheduler records how
//! long each layer's check took, and layers contribute named counters (solver
//! queries, cache hits, ...).

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::Serialize;

#[derive(Debug, Default)]
pub struct CheckMetrics {
    timings: RwLock<BTreeMap<String, Duration>>,
    counters: RwLock<BTreeMap<String, u64>>,
}

impl CheckMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_timing(&self, name: impl Into<String>, duration: Duration) {
        *self.timings.write().entry(name.into()).or_default() += duration;
    }

    pub fn add(&self, name: impl Into<String>, value: u64) {
        *self.counters.write().entry(name.into()).or_default() += value;
    }

    pub fn increment(&self, name: impl Into<String>) {
        self.add(name, 1);
    }

    pub fn timing(&self, name: &str) -> Option<Duration> {
        self.timings.read().get(name).copied()
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.counters.read().get(name).copied().unwrap_or(0)
    }

    /// Start timing `name`; the duration is recorded when the timer drops.
    pub fn timer(&self, name: impl Into<String>) -> Timer<'_> {
        Timer {
            metrics: self,
            name: name.into(),
            start: Instant::now(),
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            timings: self
                .timings
                .read()
                .iter()
                .map(|(name, duration)| (name.clone(), duration.as_micros() as u64))
                .collect(),
            counters: self.counters.read().clone(),
        }
    }
}

/// Snapshot of [`CheckMetrics`], timings in microseconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSummary {
    pub timings: BTreeMap<String, u64>,
    pub counters: BTreeMap<String, u64>,
}

impl MetricsSummary {
    pub fn total_time(&self) -> Duration {
        Duration::from_micros(self.timings.values().sum())
    }

    pub fn report(&self) -> String {
        let mut lines = vec!["=== Layer timings ===".to_string()];
        for (name, micros) in &self.timings {
            lines.push(format!("{:<16} {:>10.2?}", name, Duration::from_micros(*micros)));
        }
        lines.push(format!("{:<16} {:>10.2?}", "total", self.total_time()));

        if !self.counters.is_empty() {
            lines.push(String::new());
            lines.push("=== Counters ===".to_string());
            for (name, value) in &self.counters {
                lines.push(format!("{:<24} {}", name, value));
            }
        }

        lines.join("\n")
    }
}

/// Records its lifetime into [`CheckMetrics`] on drop.
pub struct Timer<'a> {
    metrics: &'a CheckMetrics,
    name: String,
    start: Instant,
}

impl Drop for Timer<'_> {
    fn drop(&mut self) {
        self.metrics.record_timing(std::mem::take(&mut self.name), self.start.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_counters_accumulate() {
        let metrics = CheckMetrics::new();
        metrics.increment("liquid.solver_queries");
        metrics.add("liquid.solver_queries", 4);

        assert_eq!(metrics.counter("liquid.solver_queries"), 5);
        assert_eq!(metrics.counter("missing"), 0);
    }

    #[test]
    fn test_timer_records_on_drop() {
        let metrics = CheckMetrics::new();
        {
            let _timer = metrics.timer("types");
            thread::sleep(Duration::from_millis(5));
        }

        assert!(metrics.timing("types").unwrap() >= Duration::from_millis(5));
    }

    #[test]
    fn test_summary_report() {
        let metrics = CheckMetrics::new();
        metrics.record_timing("types", Duration::from_micros(1500));
        metrics.record_timing("liquid", Duration::from_micros(500));
        metrics.add("liquid.cache_hits", 2);

        let summary = metrics.summary();
        assert_eq!(summary.total_time(), Duration::from_micros(2000));

        let report = summary.report();
        assert!(report.contains("types"));
        assert!(report.contains("liquid.cache_hits"));
    }
}
