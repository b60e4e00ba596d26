//! Health Gate (C5): background probing of the model runtime, exposed as
//! an atomically-replaced snapshot (§4.5, §5).
//!
//! Grounded on the teacher's `LlmClient::is_available`/`list_models` probe
//! calls, generalized into a standing background task rather than an
//! on-demand check, per the "generation counter, atomic replace" contract.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::model_client::{ModelInfo, ModelRuntime};

#[derive(Debug, Clone)]
pub struct HealthSnapshot {
    pub reachable: bool,
    pub models: Vec<ModelInfo>,
    pub last_error: Option<String>,
    pub last_checked_at: DateTime<Utc>,
    pub generation: u64,
}

impl HealthSnapshot {
    fn initial() -> Self {
        Self {
            reachable: false,
            models: Vec::new(),
            last_error: None,
            last_checked_at: Utc::now(),
            generation: 0,
        }
    }

    pub fn is_ready(&self, model_name: &str) -> bool {
        self.reachable && self.models.iter().any(|m| m.name == model_name && m.loaded)
    }
}

pub struct HealthGate {
    snapshot: ArcSwap<HealthSnapshot>,
    generation: AtomicU64,
    consecutive_failures: AtomicU32,
    failure_threshold: u32,
}

impl HealthGate {
    pub fn new(failure_threshold: u32) -> Arc<Self> {
        Arc::new(Self {
            snapshot: ArcSwap::from_pointee(HealthSnapshot::initial()),
            generation: AtomicU64::new(0),
            consecutive_failures: AtomicU32::new(0),
            failure_threshold: failure_threshold.max(1),
        })
    }

    pub fn snapshot(&self) -> Arc<HealthSnapshot> {
        self.snapshot.load_full()
    }

    pub fn is_ready(&self, model_name: &str) -> bool {
        self.snapshot().is_ready(model_name)
    }

    /// Spawns the standing probe loop; the returned handle can be aborted on shutdown.
    pub fn spawn_probe_loop<R: ModelRuntime + 'static>(
        self: &Arc<Self>,
        runtime: Arc<R>,
        interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let gate = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                gate.probe_once(runtime.as_ref()).await;
            }
        })
    }

    pub async fn probe_once<R: ModelRuntime>(&self, runtime: &R) {
        let previous = self.snapshot();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        match runtime.list_models().await {
            Ok(models) => {
                let failures = self.consecutive_failures.swap(0, Ordering::SeqCst);
                if failures >= self.failure_threshold && !previous.reachable {
                    info!("model runtime health recovered");
                }
                self.snapshot.store(Arc::new(HealthSnapshot {
                    reachable: true,
                    models,
                    last_error: None,
                    last_checked_at: Utc::now(),
                    generation,
                }));
            }
            Err(e) => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                let reachable = failures < self.failure_threshold && previous.reachable;
                if failures == self.failure_threshold {
                    warn!(error = %e, "model runtime marked down after consecutive failures");
                }
                self.snapshot.store(Arc::new(HealthSnapshot {
                    reachable,
                    models: previous.models.clone(),
                    last_error: Some(e.to_string()),
                    last_checked_at: Utc::now(),
                    generation,
                }));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModelError;
    use crate::model_client::{GenerateOptions, RawGeneration};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;

    struct ToggleRuntime {
        up: Arc<AtomicBool>,
    }

    #[async_trait]
    impl ModelRuntime for ToggleRuntime {
        async fn generate(
            &self,
            _model: &str,
            _prompt: &str,
            _options: &GenerateOptions,
        ) -> Result<RawGeneration, ModelError> {
            unimplemented!()
        }

        async fn list_models(&self) -> Result<Vec<ModelInfo>, ModelError> {
            if self.up.load(Ordering::SeqCst) {
                Ok(vec![ModelInfo {
                    name: "balanced".to_string(),
                    loaded: true,
                }])
            } else {
                Err(ModelError::Unreachable("down".to_string()))
            }
        }
    }

    #[tokio::test]
    async fn goes_down_after_threshold_failures_and_recovers_on_success() {
        let up = Arc::new(AtomicBool::new(false));
        let runtime = ToggleRuntime { up: up.clone() };
        let gate = HealthGate::new(2);

        gate.probe_once(&runtime).await;
        assert!(!gate.snapshot().reachable, "first failure does not count as down yet");

        gate.probe_once(&runtime).await;
        assert!(!gate.snapshot().reachable);

        up.store(true, Ordering::SeqCst);
        gate.probe_once(&runtime).await;
        assert!(gate.snapshot().reachable);
        assert!(gate.is_ready("balanced"));
    }

    #[tokio::test]
    async fn generation_counter_strictly_increases() {
        let runtime = ToggleRuntime {
            up: Arc::new(AtomicBool::new(true)),
        };
        let gate = HealthGate::new(3);
        gate.probe_once(&runtime).await;
        let g1 = gate.snapshot().generation;
        gate.probe_once(&runtime).await;
        let g2 = gate.snapshot().generation;
        assert!(g2 > g1);
    }
}
