//! Metrics collaborator.
//!
//! The pipeline reports one [`OptimizationMetrics`] per optimization call to
//! whatever [`MetricsSink`] it was given. The engine works identically with
//! [`NoopMetrics`]; [`MetricsCollector`] keeps a bounded in-memory window and
//! answers percentile and aggregate queries over it.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;

/// One optimization call, as seen by observers.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OptimizationMetrics {
    /// Unix ms.
    pub timestamp: u64,
    pub duration: Duration,
    pub tokens_before: usize,
    pub tokens_after: usize,
    pub entries_processed: usize,
    pub entries_kept: usize,
    pub cache_hit_rate: f64,
    pub memory_bytes: usize,
}

impl OptimizationMetrics {
    /// Fraction of tokens removed, in [0, 1].
    pub fn reduction(&self) -> f64 {
        if self.tokens_before == 0 {
            return 0.0;
        }
        1.0 - (self.tokens_after.min(self.tokens_before) as f64 / self.tokens_before as f64)
    }
}

pub trait MetricsSink: Send + Sync {
    fn record(&self, metrics: &OptimizationMetrics);
}

/// Discards everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record(&self, _metrics: &OptimizationMetrics) {}
}

pub const DEFAULT_SAMPLE_WINDOW: usize = 1000;

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct MetricsSummary {
    pub samples: usize,
    pub total_tokens_saved: usize,
    pub avg_duration: Duration,
    pub p50_duration: Duration,
    pub p95_duration: Duration,
    pub p99_duration: Duration,
    pub avg_cache_hit_rate: f64,
    pub avg_reduction: f64,
    pub peak_memory_bytes: usize,
}

/// In-memory collector over the most recent `capacity` records.
#[derive(Debug)]
pub struct MetricsCollector {
    capacity: usize,
    samples: Mutex<VecDeque<OptimizationMetrics>>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_WINDOW)
    }
}

impl MetricsCollector {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            samples: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    fn snapshot(&self) -> Vec<OptimizationMetrics> {
        match self.samples.lock() {
            Ok(guard) => guard.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Nearest-rank percentile of call duration, `p` in [0, 100].
    pub fn duration_percentile(&self, p: f64) -> Option<Duration> {
        let mut durations: Vec<Duration> = self.snapshot().iter().map(|m| m.duration).collect();
        percentile(&mut durations, p)
    }

    pub fn summary(&self) -> MetricsSummary {
        let samples = self.snapshot();
        if samples.is_empty() {
            return MetricsSummary::default();
        }
        let n = samples.len();
        let mut durations: Vec<Duration> = samples.iter().map(|m| m.duration).collect();
        let total: Duration = durations.iter().sum();

        MetricsSummary {
            samples: n,
            total_tokens_saved: samples
                .iter()
                .map(|m| m.tokens_before.saturating_sub(m.tokens_after))
                .sum(),
            avg_duration: total / n as u32,
            p50_duration: percentile(&mut durations, 50.0).unwrap_or_default(),
            p95_duration: percentile(&mut durations, 95.0).unwrap_or_default(),
            p99_duration: percentile(&mut durations, 99.0).unwrap_or_default(),
            avg_cache_hit_rate: samples.iter().map(|m| m.cache_hit_rate).sum::<f64>() / n as f64,
            avg_reduction: samples.iter().map(|m| m.reduction()).sum::<f64>() / n as f64,
            peak_memory_bytes: samples.iter().map(|m| m.memory_bytes).max().unwrap_or(0),
        }
    }

    pub fn clear(&self) {
        match self.samples.lock() {
            Ok(mut guard) => guard.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }
}

impl MetricsSink for MetricsCollector {
    fn record(&self, metrics: &OptimizationMetrics) {
        let mut guard = match self.samples.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if guard.len() == self.capacity {
            guard.pop_front();
        }
        guard.push_back(metrics.clone());
    }
}

fn percentile(values: &mut [Duration], p: f64) -> Option<Duration> {
    if values.is_empty() {
        return None;
    }
    values.sort_unstable();
    let rank = ((p.clamp(0.0, 100.0) / 100.0) * values.len() as f64).ceil() as usize;
    Some(values[rank.saturating_sub(1).min(values.len() - 1)])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(ms: u64, before: usize, after: usize, hit: f64) -> OptimizationMetrics {
        OptimizationMetrics {
            timestamp: 0,
            duration: Duration::from_millis(ms),
            tokens_before: before,
            tokens_after: after,
            entries_processed: 1,
            entries_kept: 1,
            cache_hit_rate: hit,
            memory_bytes: before,
        }
    }

    #[test]
    fn test_noop_accepts_records() {
        NoopMetrics.record(&sample(1, 1, 1, 0.0));
    }

    #[test]
    fn test_percentiles() {
        let c = MetricsCollector::new(1000);
        for ms in 1..=100 {
            c.record(&sample(ms, 10, 5, 0.5));
        }
        assert_eq!(c.duration_percentile(50.0), Some(Duration::from_millis(50)));
        assert_eq!(c.duration_percentile(95.0), Some(Duration::from_millis(95)));
        assert_eq!(c.duration_percentile(99.0), Some(Duration::from_millis(99)));
        assert_eq!(c.duration_percentile(100.0), Some(Duration::from_millis(100)));
    }

    #[test]
    fn test_empty_collector() {
        let c = MetricsCollector::default();
        assert!(c.is_empty());
        assert_eq!(c.duration_percentile(50.0), None);
        assert_eq!(c.summary(), MetricsSummary::default());
    }

    #[test]
    fn test_window_is_bounded() {
        let c = MetricsCollector::new(3);
        for ms in 1..=5 {
            c.record(&sample(ms, 1, 1, 0.0));
        }
        assert_eq!(c.len(), 3);
        assert_eq!(c.duration_percentile(0.0), Some(Duration::from_millis(3)));
    }

    #[test]
    fn test_summary() {
        let c = MetricsCollector::new(10);
        c.record(&sample(10, 100, 40, 0.0));
        c.record(&sample(30, 100, 80, 1.0));
        let s = c.summary();
        assert_eq!(s.samples, 2);
        assert_eq!(s.total_tokens_saved, 80);
        assert_eq!(s.avg_duration, Duration::from_millis(20));
        assert_eq!(s.avg_cache_hit_rate, 0.5);
        assert!((s.avg_reduction - 0.4).abs() < 1e-12);
        assert_eq!(s.peak_memory_bytes, 100);
    }

    #[test]
    fn test_reduction() {
        assert_eq!(sample(1, 0, 0, 0.0).reduction(), 0.0);
        assert_eq!(sample(1, 100, 25, 0.0).reduction(), 0.75);
    }
}
