//! Pipeline Scheduler (C8): a worker pool that dequeues jobs and drives them
//! through the task-kind-specific pipeline in `pipeline.rs`.
//!
//! Grounded on `crates/foia/src/work_queue/runner.rs`'s `PipelineRunner::run`
//! worker-pool shape, generalized from "N workers claiming rows from a
//! database-backed queue" to "N workers dequeuing jobs from an in-memory
//! priority heap". Per-job panic isolation follows the same runner's
//! join-and-continue pattern: each job body runs in its own spawned task so
//! a panic there surfaces as a `JoinError` the worker loop logs and moves
//! past, rather than one that unwinds the loop itself.

mod pipeline;
pub mod rate_limit;
pub mod registry;

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::error;

use crate::cache::ResultCache;
use crate::config::PipelineConfig;
use crate::health::HealthGate;
use crate::metrics::MetricsRecorder;
use crate::model_client::{ModelClient, ModelRuntime};
use crate::optimizer::OptimizerPolicy;
use crate::queue::JobQueue;

pub use rate_limit::ModelRateLimiter;
pub use registry::JobRegistry;

/// Everything a worker needs to run a job, bundled so it can be cloned
/// cheaply (as an `Arc`) into each spawned job task.
pub struct Components<R: ModelRuntime> {
    pub config: Arc<PipelineConfig>,
    pub queue: Arc<JobQueue>,
    pub cache: Arc<ResultCache>,
    pub health: Arc<HealthGate>,
    pub metrics: Arc<MetricsRecorder>,
    pub model_client: Arc<ModelClient<R>>,
    pub extractor: Arc<crate::extract::TextExtractor>,
    pub rate_limiter: Arc<ModelRateLimiter>,
    pub registry: Arc<JobRegistry>,
    pub optimizer_policy: OptimizerPolicy,
}

pub struct Scheduler<R: ModelRuntime> {
    components: Arc<Components<R>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl<R: ModelRuntime + 'static> Scheduler<R> {
    pub fn new(components: Arc<Components<R>>) -> Arc<Self> {
        Arc::new(Self {
            components,
            handles: Mutex::new(Vec::new()),
        })
    }

    /// Spawns `workers` worker-loop tasks. Call once at startup.
    pub async fn start(self: &Arc<Self>) {
        let worker_count = self.components.config.workers;
        let mut handles = self.handles.lock().await;
        for id in 0..worker_count {
            let components = self.components.clone();
            handles.push(tokio::spawn(worker_loop(id, components)));
        }
    }

    /// Stops accepting new jobs, lets queued jobs drain, and waits for all
    /// worker loops to exit.
    pub async fn shutdown(&self) {
        self.components.queue.shutdown().await;
        let mut handles = self.handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
    }

    pub fn components(&self) -> &Arc<Components<R>> {
        &self.components
    }
}

async fn worker_loop<R: ModelRuntime + 'static>(worker_id: usize, components: Arc<Components<R>>) {
    loop {
        let job = match components.queue.dequeue().await {
            Some(job) => job,
            None => break,
        };

        let job_id = job.id;
        components.registry.mark_running(job_id).await;

        let run_components = components.clone();
        let handle = tokio::spawn(pipeline::run_job(run_components, job));
        if let Err(join_err) = handle.await {
            error!(worker_id, job_id = %job_id, error = %join_err, "worker task panicked, job marked failed");
            components
                .registry
                .mark_terminal(
                    job_id,
                    crate::model::TerminalReason::Failed,
                    Some("internal-error"),
                    Some(format!("worker panicked: {join_err}")),
                    None,
                )
                .await;
        }
    }
}
