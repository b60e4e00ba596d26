//! Public facade (C9): the single entry point embedders call. Wires the
//! queue, scheduler, cache, health gate and metrics recorder into one owning
//! handle and exposes the five operations from §4.9/§6: submit, await
//! result, cancel, health, metrics.
//!
//! Grounded on the teacher's `main.rs`/`cli::run` composition root — one
//! function builds every collaborator and hands back a single struct the
//! rest of the program drives.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::info;
use uuid::Uuid;

use crate::cache::ResultCache;
use crate::config::PipelineConfig;
use crate::error::{ErrorCode, PipelineError};
use crate::extract::TextExtractor;
use crate::health::HealthGate;
use crate::metrics::{Aggregate, MetricsRecorder};
use crate::model::{Job, JobSpec, JobStatus, TaskKind};
use crate::model_client::{ModelClient, ModelClientConfig, ModelRuntime};
use crate::optimizer::OptimizerPolicy;
use crate::queue::JobQueue;
use crate::scheduler::{Components, JobRegistry, ModelRateLimiter, Scheduler};

/// The running pipeline. Cloning is cheap (everything behind this handle is
/// `Arc`-shared); drop the last clone (or call `shutdown`) to stop workers.
pub struct Pipeline<R: ModelRuntime> {
    config: Arc<PipelineConfig>,
    queue: Arc<JobQueue>,
    registry: Arc<JobRegistry>,
    health: Arc<HealthGate>,
    metrics: Arc<MetricsRecorder>,
    scheduler: Arc<Scheduler<R>>,
    probe_handle: JoinHandle<()>,
}

impl<R: ModelRuntime + 'static> Pipeline<R> {
    /// Builds every collaborator from `config` and starts the worker pool
    /// and the health-probe background task.
    pub async fn start(config: PipelineConfig, runtime: R) -> Result<Self, PipelineError> {
        config.validate()?;
        let config = Arc::new(config);

        let enqueue_timeout = config.enqueue_timeout_ms.map(Duration::from_millis);
        let queue = Arc::new(JobQueue::new(
            config.queue_capacity,
            config.enqueue_policy,
            enqueue_timeout,
        ));
        let cache = Arc::new(ResultCache::new(config.cache_max_entries, config.cache_max_bytes));
        let health = HealthGate::new(config.health_failure_threshold);
        let metrics = Arc::new(MetricsRecorder::new(config.metrics_window_samples));
        let registry = Arc::new(JobRegistry::new());
        let extractor = Arc::new(TextExtractor::new(
            config.ocr_fallback_threshold_chars_per_page,
            config.max_document_bytes,
        ));
        let rate_limiter = Arc::new(ModelRateLimiter::new(config.rate_limit_per_minute));

        let runtime = Arc::new(runtime);
        let model_client = Arc::new(ModelClient::from_arc(
            runtime.clone(),
            ModelClientConfig {
                request_timeout: Duration::from_millis(config.request_timeout_ms),
                max_retries: config.max_retries,
                retry_base_delay: Duration::from_millis(config.retry_base_delay_ms),
                retry_max_delay: Duration::from_millis(config.retry_max_delay_ms),
            },
        ));

        let probe_handle = health.spawn_probe_loop(
            runtime.clone(),
            Duration::from_millis(config.health_probe_interval_ms),
        );

        let components = Arc::new(Components {
            config: config.clone(),
            queue: queue.clone(),
            cache,
            health: health.clone(),
            metrics: metrics.clone(),
            model_client,
            extractor,
            rate_limiter,
            registry: registry.clone(),
            optimizer_policy: OptimizerPolicy::default(),
        });

        let scheduler = Scheduler::new(components);
        scheduler.start().await;

        info!(workers = config.workers, "pipeline started");

        Ok(Self {
            config,
            queue,
            registry,
            health,
            metrics,
            scheduler,
            probe_handle,
        })
    }

    /// Enqueues a job and returns its handle immediately; call
    /// `await_result` to block on completion. A deadline already in the past
    /// at submission time fails the job straight to `Terminal { TimedOut }`
    /// without ever touching the queue.
    pub async fn submit(&self, spec: JobSpec) -> Result<Uuid, PipelineError> {
        let cancel = tokio_util::sync::CancellationToken::new();
        let job = Job {
            id: Uuid::new_v4(),
            task_kind: spec.task_kind,
            input: spec.input,
            content_type: spec.content_type,
            correlation_id: spec.correlation_id,
            priority: spec.priority,
            submitted_at: chrono::Utc::now(),
            deadline: spec.deadline,
            params: spec.params,
            cancel: cancel.clone(),
        };
        let id = job.id;
        self.registry.insert_pending(id, cancel).await;

        if let Some(deadline) = job.deadline {
            if chrono::Utc::now() > deadline {
                self.registry
                    .mark_terminal(
                        id,
                        crate::model::TerminalReason::TimedOut,
                        None,
                        Some("deadline already elapsed at submission".to_string()),
                        None,
                    )
                    .await;
                return Ok(id);
            }
        }

        if let Err(e) = self.queue.enqueue(job).await {
            self.registry
                .mark_terminal(id, crate::model::TerminalReason::Failed, Some(e.code()), Some(e.to_string()), None)
                .await;
            return Err(PipelineError::Scheduler(e.into()));
        }
        Ok(id)
    }

    /// Submits a job and blocks until it reaches a terminal state or
    /// `timeout` elapses (in which case the job keeps running and the
    /// caller should poll `status`/`await_result` again).
    pub async fn submit_and_await(
        &self,
        spec: JobSpec,
        timeout: Duration,
    ) -> Result<(JobStatus, Option<serde_json::Value>), PipelineError> {
        let id = self.submit(spec).await?;
        self.await_result(id, timeout).await
    }

    pub async fn await_result(
        &self,
        id: Uuid,
        timeout: Duration,
    ) -> Result<(JobStatus, Option<serde_json::Value>), PipelineError> {
        let status = self
            .registry
            .await_terminal(id, timeout)
            .await
            .ok_or(PipelineError::UnknownHandle)?;
        let result = self.registry.result(id).await;
        Ok((status, result))
    }

    pub async fn status(&self, id: Uuid) -> Result<JobStatus, PipelineError> {
        self.registry.status(id).await.ok_or(PipelineError::UnknownHandle)
    }

    /// Requests cancellation. Cooperative: the job observes it at its next
    /// cancellation checkpoint (queued, mid-extraction, or mid-model-call)
    /// and the registry transitions to `Terminal { reason: Cancelled, .. }`.
    /// Returns `false` if `id` is not a known job handle.
    pub async fn cancel(&self, id: Uuid) -> bool {
        self.registry.cancel(id).await
    }

    pub fn health(&self) -> Arc<crate::health::HealthSnapshot> {
        self.health.snapshot()
    }

    pub fn metrics(&self, task_kind: Option<TaskKind>) -> Aggregate {
        self.metrics.aggregate("model_call", task_kind)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Number of jobs currently waiting in the queue (not yet dequeued by a
    /// worker). Useful for embedders that want to watch backpressure.
    pub async fn queue_depth(&self) -> usize {
        self.queue.len().await
    }

    /// Stops accepting new submissions, drains the queue, and waits for
    /// in-flight jobs and the health probe to stop.
    pub async fn shutdown(self) {
        self.probe_handle.abort();
        self.scheduler.shutdown().await;
    }
}
