//! Metrics Recorder (C6): append-only bounded ring of `MetricSample`s with
//! snapshot aggregation (count, success rate, p50/p95 latency, tokens).
//!
//! `record` is non-blocking: the ring lives behind a `parking_lot::Mutex`
//! rather than a `tokio::sync` lock, matching the "hot, non-async-held
//! lock" idiom the wider pack reaches for outside the cache/queue's
//! necessarily-async-held locks.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::model::{ModelTier, TaskKind};

#[derive(Debug, Clone)]
pub struct MetricSample {
    pub operation: String,
    pub task_kind: Option<TaskKind>,
    pub tier: Option<ModelTier>,
    pub outcome: &'static str,
    pub latency_ms: u64,
    pub tokens_in: u32,
    pub tokens_out: u32,
    pub timestamp: DateTime<Utc>,
}

struct Ring {
    samples: VecDeque<MetricSample>,
    capacity: usize,
}

impl Ring {
    fn push(&mut self, sample: MetricSample) {
        if self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }
}

pub struct MetricsRecorder {
    rings: Mutex<HashMap<String, Ring>>,
    capacity: usize,
    dropped: AtomicU64,
}

#[derive(Debug, Clone, Default)]
pub struct Aggregate {
    pub count: usize,
    pub success_rate: f64,
    pub p50_latency_ms: u64,
    pub p95_latency_ms: u64,
    pub total_tokens_in: u64,
    pub total_tokens_out: u64,
}

impl MetricsRecorder {
    pub fn new(capacity: usize) -> Self {
        Self {
            rings: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
        }
    }

    /// Non-blocking; never panics. In lossy mode (the default for hot
    /// paths) this simply overwrites the oldest sample once the ring is
    /// full rather than growing unbounded.
    pub fn record(&self, sample: MetricSample) {
        let mut rings = self.rings.lock();
        let ring = rings.entry(sample.operation.clone()).or_insert_with(|| Ring {
            samples: VecDeque::with_capacity(self.capacity),
            capacity: self.capacity,
        });
        if ring.samples.len() >= ring.capacity {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        ring.push(sample);
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Snapshot read; does not mutate the ring.
    pub fn aggregate(&self, operation: &str, task_kind: Option<TaskKind>) -> Aggregate {
        let rings = self.rings.lock();
        let Some(ring) = rings.get(operation) else {
            return Aggregate::default();
        };

        let mut latencies: Vec<u64> = Vec::new();
        let mut successes = 0usize;
        let mut total = 0usize;
        let mut tokens_in = 0u64;
        let mut tokens_out = 0u64;

        for sample in &ring.samples {
            if let Some(tk) = task_kind {
                if sample.task_kind != Some(tk) {
                    continue;
                }
            }
            total += 1;
            if sample.outcome == "succeeded" || sample.outcome == "cache-hit" {
                successes += 1;
            }
            latencies.push(sample.latency_ms);
            tokens_in += sample.tokens_in as u64;
            tokens_out += sample.tokens_out as u64;
        }

        latencies.sort_unstable();
        let p50 = percentile(&latencies, 0.50);
        let p95 = percentile(&latencies, 0.95);

        Aggregate {
            count: total,
            success_rate: if total == 0 {
                1.0
            } else {
                successes as f64 / total as f64
            },
            p50_latency_ms: p50,
            p95_latency_ms: p95,
            total_tokens_in: tokens_in,
            total_tokens_out: tokens_out,
        }
    }
}

fn percentile(sorted_latencies: &[u64], p: f64) -> u64 {
    if sorted_latencies.is_empty() {
        return 0;
    }
    let rank = ((sorted_latencies.len() as f64 - 1.0) * p).round() as usize;
    sorted_latencies[rank.min(sorted_latencies.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(outcome: &'static str, latency_ms: u64) -> MetricSample {
        MetricSample {
            operation: "model_call".to_string(),
            task_kind: Some(TaskKind::AnalyzeRisk),
            tier: Some(ModelTier::Balanced),
            outcome,
            latency_ms,
            tokens_in: 10,
            tokens_out: 5,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn ring_is_bounded_and_drops_oldest() {
        let recorder = MetricsRecorder::new(2);
        recorder.record(sample("succeeded", 10));
        recorder.record(sample("succeeded", 20));
        recorder.record(sample("succeeded", 30));
        let aggregate = recorder.aggregate("model_call", None);
        assert_eq!(aggregate.count, 2);
        assert_eq!(recorder.dropped_count(), 1);
    }

    #[test]
    fn success_rate_reflects_outcomes() {
        let recorder = MetricsRecorder::new(10);
        recorder.record(sample("succeeded", 10));
        recorder.record(sample("failed", 20));
        let aggregate = recorder.aggregate("model_call", None);
        assert_eq!(aggregate.success_rate, 0.5);
    }

    #[test]
    fn aggregate_of_unknown_operation_is_empty() {
        let recorder = MetricsRecorder::new(10);
        let aggregate = recorder.aggregate("nonexistent", None);
        assert_eq!(aggregate.count, 0);
        assert_eq!(aggregate.success_rate, 1.0);
    }
}
