//! Performance Optimizer (C10): chooses a model tier and per-request
//! timeout for a task kind from recent metrics. A pure function of the
//! metrics snapshot and task kind — it never mutates state.
//!
//! Grounded on the tier/fallback-chain shape of a primary-with-fallback
//! backend registry (pick a backend by availability and recent
//! performance) adapted from "pick a backend" to "pick a tier".

use std::time::Duration;

use crate::metrics::{Aggregate, MetricsRecorder};
use crate::model::{ModelTier, TaskKind};

#[derive(Debug, Clone, Copy)]
pub struct OptimizerPolicy {
    pub p95_latency_shift_down_ms: u64,
    pub min_success_rate_for_shift_down: f64,
    pub min_success_rate_before_shift_up: f64,
    pub timeout_floor_ms: u64,
    pub timeout_ceiling_ms: u64,
}

impl Default for OptimizerPolicy {
    fn default() -> Self {
        Self {
            p95_latency_shift_down_ms: 8_000,
            min_success_rate_for_shift_down: 0.95,
            min_success_rate_before_shift_up: 0.8,
            timeout_floor_ms: 2_000,
            timeout_ceiling_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Decision {
    pub tier: ModelTier,
    pub timeout: Duration,
}

pub struct PerformanceOptimizer<'a> {
    metrics: &'a MetricsRecorder,
    policy: OptimizerPolicy,
}

impl<'a> PerformanceOptimizer<'a> {
    pub fn new(metrics: &'a MetricsRecorder, policy: OptimizerPolicy) -> Self {
        Self { metrics, policy }
    }

    /// Chooses a tier and timeout for `task_kind`, starting from
    /// `default_tier`. `deadline_budget` overrides the tier choice when the
    /// job carries a deadline: the scheduler always picks the tier whose
    /// expected latency fits the remaining budget.
    pub fn decide(
        &self,
        task_kind: TaskKind,
        default_tier: ModelTier,
        deadline_budget: Option<Duration>,
    ) -> Decision {
        let aggregate = self.metrics.aggregate("model_call", Some(task_kind));
        let mut tier = self.shift_tier(default_tier, &aggregate);

        if let Some(budget) = deadline_budget {
            tier = self.fit_to_deadline(tier, task_kind, budget);
        }

        let timeout = self.timeout_for(task_kind, tier);
        Decision { tier, timeout }
    }

    fn shift_tier(&self, default_tier: ModelTier, aggregate: &Aggregate) -> ModelTier {
        if aggregate.count == 0 {
            return default_tier;
        }
        if aggregate.success_rate < self.policy.min_success_rate_before_shift_up {
            return default_tier.larger();
        }
        if aggregate.p95_latency_ms > self.policy.p95_latency_shift_down_ms
            && aggregate.success_rate >= self.policy.min_success_rate_for_shift_down
        {
            return default_tier.smaller();
        }
        default_tier
    }

    /// Picks the largest tier, no larger than `preferred`, whose recent p95
    /// latency still fits the deadline budget. Deadlines only narrow the
    /// choice the success-rate/latency shift already made, never escalate it.
    fn fit_to_deadline(
        &self,
        preferred: ModelTier,
        task_kind: TaskKind,
        budget: Duration,
    ) -> ModelTier {
        let p95 = self
            .metrics
            .aggregate("model_call", Some(task_kind))
            .p95_latency_ms;

        for tier in [ModelTier::Large, ModelTier::Balanced, ModelTier::Small] {
            if tier.ordinal() > preferred.ordinal() {
                continue;
            }
            if p95 == 0 || p95 <= budget.as_millis() as u64 {
                return tier;
            }
        }
        ModelTier::Small
    }

    fn timeout_for(&self, task_kind: TaskKind, tier: ModelTier) -> Duration {
        let aggregate = self.metrics.aggregate("model_call", Some(task_kind));
        let _ = tier;
        let floor = self.policy.timeout_floor_ms;
        let scaled = (aggregate.p95_latency_ms as f64 * 1.5) as u64;
        let ms = scaled.max(floor).min(self.policy.timeout_ceiling_ms);
        Duration::from_millis(ms)
    }
}

// `ModelTier` needs an ordinal for the deadline-fit comparison above.
impl ModelTier {
    pub fn ordinal(self) -> u8 {
        match self {
            ModelTier::Small => 0,
            ModelTier::Balanced => 1,
            ModelTier::Large => 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricSample;
    use chrono::Utc;

    fn push_samples(metrics: &MetricsRecorder, count: usize, latency_ms: u64, outcome: &'static str) {
        for _ in 0..count {
            metrics.record(MetricSample {
                operation: "model_call".to_string(),
                task_kind: Some(TaskKind::AnalyzeRisk),
                tier: Some(ModelTier::Balanced),
                outcome,
                latency_ms,
                tokens_in: 10,
                tokens_out: 5,
                timestamp: Utc::now(),
            });
        }
    }

    #[test]
    fn defaults_to_configured_tier_with_no_data() {
        let metrics = MetricsRecorder::new(100);
        let optimizer = PerformanceOptimizer::new(&metrics, OptimizerPolicy::default());
        let decision = optimizer.decide(TaskKind::AnalyzeRisk, ModelTier::Balanced, None);
        assert!(matches!(decision.tier, ModelTier::Balanced));
    }

    #[test]
    fn shifts_down_when_latency_high_and_success_good() {
        let metrics = MetricsRecorder::new(100);
        push_samples(&metrics, 20, 10_000, "succeeded");
        let optimizer = PerformanceOptimizer::new(&metrics, OptimizerPolicy::default());
        let decision = optimizer.decide(TaskKind::AnalyzeRisk, ModelTier::Balanced, None);
        assert!(matches!(decision.tier, ModelTier::Small));
    }

    #[test]
    fn shifts_up_when_success_rate_poor() {
        let metrics = MetricsRecorder::new(100);
        push_samples(&metrics, 10, 500, "failed");
        let optimizer = PerformanceOptimizer::new(&metrics, OptimizerPolicy::default());
        let decision = optimizer.decide(TaskKind::AnalyzeRisk, ModelTier::Balanced, None);
        assert!(matches!(decision.tier, ModelTier::Large));
    }
}
