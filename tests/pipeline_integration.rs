//! End-to-end tests driving the public facade against a fake in-process
//! model runtime — no network access, no external OCR/PDF tools required.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use tenderflow::config::PipelineConfig;
use tenderflow::error::ModelError;
use tenderflow::model::{ContentType, InputRef, JobStatus, Priority, TaskKind};
use tenderflow::model_client::{GenerateOptions, ModelInfo, ModelRuntime, RawGeneration};
use tenderflow::{JobSpec, Pipeline};

/// A fake runtime standing in for Ollama: always returns schema-valid JSON
/// for the risk-analysis task, optionally failing the first `fail_first_n`
/// calls and/or reporting itself unavailable via `list_models`.
struct FakeRuntime {
    calls: Arc<AtomicU32>,
    fail_first_n: u32,
    available: Arc<AtomicBool>,
}

impl FakeRuntime {
    fn new() -> Self {
        Self {
            calls: Arc::new(AtomicU32::new(0)),
            fail_first_n: 0,
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    fn failing(fail_first_n: u32) -> Self {
        Self {
            fail_first_n,
            ..Self::new()
        }
    }

    fn unavailable() -> Self {
        Self {
            available: Arc::new(AtomicBool::new(false)),
            ..Self::new()
        }
    }
}

#[async_trait]
impl ModelRuntime for FakeRuntime {
    async fn generate(
        &self,
        _model: &str,
        _prompt: &str,
        _options: &GenerateOptions,
    ) -> Result<RawGeneration, ModelError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.fail_first_n {
            return Err(ModelError::Unreachable("simulated transient failure".to_string()));
        }
        Ok(RawGeneration {
            text: json!({
                "risk_score": 0.42,
                "complexity": "medium",
                "factors": ["late submission penalty"]
            })
            .to_string(),
            tokens_in: 120,
            tokens_out: 30,
        })
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, ModelError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(vec![
                ModelInfo { name: "llama3.2:1b".to_string(), loaded: true },
                ModelInfo { name: "llama3.1:8b".to_string(), loaded: true },
                ModelInfo { name: "llama3.1:70b".to_string(), loaded: true },
            ])
        } else {
            Err(ModelError::Unreachable("runtime down".to_string()))
        }
    }
}

fn test_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.workers = 2;
    config.health_probe_interval_ms = 50;
    config.health_failure_threshold = 2;
    config.request_timeout_ms = 1_000;
    config.retry_base_delay_ms = 5;
    config.retry_max_delay_ms = 20;
    config
}

fn risk_job(text: &str) -> JobSpec {
    JobSpec {
        task_kind: TaskKind::AnalyzeRisk,
        input: InputRef::Blob(text.as_bytes().to_vec()),
        content_type: ContentType::PlainText,
        correlation_id: None,
        priority: Priority::Normal,
        deadline: None,
        params: serde_json::Map::new(),
    }
}

async fn wait_until_healthy<R: ModelRuntime + 'static>(pipeline: &Pipeline<R>) {
    for _ in 0..50 {
        if pipeline.health().reachable {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("health gate never became ready");
}

#[tokio::test]
async fn extracts_plain_text_without_touching_the_model() {
    let pipeline = Pipeline::start(test_config(), FakeRuntime::new()).await.unwrap();

    let spec = JobSpec {
        task_kind: TaskKind::ExtractText,
        input: InputRef::Blob(b"hello tender world".to_vec()),
        content_type: ContentType::PlainText,
        correlation_id: None,
        priority: Priority::Normal,
        deadline: None,
        params: serde_json::Map::new(),
    };

    let (status, result) = pipeline
        .submit_and_await(spec, Duration::from_secs(5))
        .await
        .unwrap();

    assert!(matches!(status, JobStatus::Terminal { reason: tenderflow::model::TerminalReason::Succeeded, .. }));
    let value = result.unwrap();
    assert_eq!(value["text"], json!("hello tender world"));

    pipeline.shutdown().await;
}

#[tokio::test]
async fn identical_jobs_hit_the_cache_on_the_second_call() {
    let runtime = FakeRuntime::new();
    let calls = runtime.calls.clone();
    let pipeline = Pipeline::start(test_config(), runtime).await.unwrap();
    wait_until_healthy(&pipeline).await;

    let (status1, result1) = pipeline
        .submit_and_await(risk_job("identical tender body"), Duration::from_secs(5))
        .await
        .unwrap();
    assert!(status1.is_terminal());
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let (_, result2) = pipeline
        .submit_and_await(risk_job("identical tender body"), Duration::from_secs(5))
        .await
        .unwrap();

    // Second call is served from the cache: no additional model call.
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(result1, result2);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn concurrent_identical_jobs_single_flight_into_one_model_call() {
    let runtime = FakeRuntime::new();
    let calls = runtime.calls.clone();
    let pipeline = Arc::new(Pipeline::start(test_config(), runtime).await.unwrap());
    wait_until_healthy(&pipeline).await;

    let p1 = pipeline.clone();
    let p2 = pipeline.clone();
    let (r1, r2) = tokio::join!(
        p1.submit_and_await(risk_job("concurrent tender body"), Duration::from_secs(5)),
        p2.submit_and_await(risk_job("concurrent tender body"), Duration::from_secs(5)),
    );

    assert!(r1.unwrap().0.is_terminal());
    assert!(r2.unwrap().0.is_terminal());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn transient_model_failures_are_retried_until_success() {
    let runtime = FakeRuntime::failing(2);
    let calls = runtime.calls.clone();
    let pipeline = Pipeline::start(test_config(), runtime).await.unwrap();
    wait_until_healthy(&pipeline).await;

    let (status, result) = pipeline
        .submit_and_await(risk_job("a document that needs three attempts"), Duration::from_secs(5))
        .await
        .unwrap();

    assert!(matches!(status, JobStatus::Terminal { reason: tenderflow::model::TerminalReason::Succeeded, .. }));
    assert!(result.is_some());
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn model_bound_job_fails_fast_when_health_gate_is_down() {
    let pipeline = Pipeline::start(test_config(), FakeRuntime::unavailable()).await.unwrap();

    // Give the probe loop a couple of ticks to mark the runtime down.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(!pipeline.health().reachable);

    let (status, result) = pipeline
        .submit_and_await(risk_job("document submitted while runtime is down"), Duration::from_secs(5))
        .await
        .unwrap();

    match status {
        JobStatus::Terminal { reason, code, .. } => {
            assert_eq!(reason, tenderflow::model::TerminalReason::Failed);
            assert_eq!(code, Some("model-unavailable"));
        }
        other => panic!("expected a terminal failure, got {other:?}"),
    }
    assert!(result.is_none());

    pipeline.shutdown().await;
}

#[tokio::test]
async fn cancelling_a_job_transitions_it_to_cancelled() {
    // Single worker, so the second submission sits in the queue behind the
    // first and is guaranteed to still be queued (not yet dequeued) when we
    // cancel it.
    let mut config = test_config();
    config.workers = 1;
    let pipeline = Pipeline::start(config, FakeRuntime::new()).await.unwrap();
    wait_until_healthy(&pipeline).await;

    let _occupying = pipeline
        .submit(risk_job("occupies the sole worker"))
        .await
        .unwrap();
    let id = pipeline
        .submit(risk_job("a document that gets cancelled"))
        .await
        .unwrap();
    pipeline.cancel(id).await;

    let (status, _) = pipeline.await_result(id, Duration::from_secs(5)).await.unwrap();
    assert!(matches!(
        status,
        JobStatus::Terminal { reason: tenderflow::model::TerminalReason::Cancelled, .. }
    ));

    pipeline.shutdown().await;
}

#[tokio::test]
async fn a_deadline_already_past_at_submission_times_out_without_dispatch() {
    let pipeline = Pipeline::start(test_config(), FakeRuntime::new()).await.unwrap();

    let mut spec = risk_job("submitted after its own deadline");
    spec.deadline = Some(chrono::Utc::now() - chrono::Duration::seconds(1));

    let id = pipeline.submit(spec).await.unwrap();
    let status = pipeline.status(id).await.unwrap();

    match status {
        JobStatus::Terminal { reason, .. } => {
            assert_eq!(reason, tenderflow::model::TerminalReason::TimedOut);
        }
        other => panic!("expected an immediate timeout, job was never dispatched, got {other:?}"),
    }
    assert_eq!(pipeline.queue_depth().await, 0);

    pipeline.shutdown().await;
}
