//! Per-task-kind orchestration run by each worker: text extraction alone for
//! `extract_text`, or extract → fingerprint → cache → (render → rate-limit →
//! model call) for the three model-bound task kinds, or fan-out/aggregate
//! for `batch`.
//!
//! Generalized from the teacher's `PipelineStage` chain (`pipeline.rs`):
//! each task kind here is one linear chain of stages, the cache's
//! single-flight lookup standing in for the teacher's `ExecutionStrategy`
//! dedup step.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cache::Lookup;
use crate::error::{ErrorCode, SchedulerError};
use crate::fingerprint;
use crate::model::{
    AIResult, ContentType, InputRef, Job, JobSpec, Priority, TaskKind, TerminalReason,
};
use crate::model_client::ResponseSchema;
use crate::optimizer::PerformanceOptimizer;
use crate::prompt;

use super::Components;

/// Runs one job end to end and publishes its outcome to the job registry and
/// metrics recorder. Never panics on a component error — only a genuine bug
/// in a component would panic, and the worker loop isolates that per job.
pub(super) async fn run_job<R: crate::model_client::ModelRuntime>(
    components: Arc<Components<R>>,
    job: Job,
) {
    let job_id = job.id;
    let task_kind = job.task_kind;
    let started = std::time::Instant::now();

    let outcome = tokio::select! {
        result = execute(&components, &job) => result,
        _ = job.cancel.cancelled() => Err(SchedulerError::Cancelled),
    };

    let latency_ms = started.elapsed().as_millis() as u64;

    match outcome {
        Ok(value) => {
            components
                .registry
                .mark_terminal(job_id, TerminalReason::Succeeded, None, None, Some(value))
                .await;
            components.metrics.record(crate::metrics::MetricSample {
                operation: "job".to_string(),
                task_kind: Some(task_kind),
                tier: None,
                outcome: "succeeded",
                latency_ms,
                tokens_in: 0,
                tokens_out: 0,
                timestamp: Utc::now(),
            });
        }
        Err(e) => {
            let reason = match &e {
                SchedulerError::Cancelled => TerminalReason::Cancelled,
                SchedulerError::TimedOut => TerminalReason::TimedOut,
                _ => TerminalReason::Failed,
            };
            warn!(job_id = %job_id, error = %e, code = e.code(), "job failed");
            components
                .registry
                .mark_terminal(job_id, reason, Some(e.code()), Some(e.to_string()), None)
                .await;
            components.metrics.record(crate::metrics::MetricSample {
                operation: "job".to_string(),
                task_kind: Some(task_kind),
                tier: None,
                outcome: "failed",
                latency_ms,
                tokens_in: 0,
                tokens_out: 0,
                timestamp: Utc::now(),
            });
        }
    }
}

async fn execute<R: crate::model_client::ModelRuntime>(
    components: &Arc<Components<R>>,
    job: &Job,
) -> Result<serde_json::Value, SchedulerError> {
    if job.cancel.is_cancelled() {
        return Err(SchedulerError::Cancelled);
    }
    check_deadline(job)?;

    match job.task_kind {
        TaskKind::ExtractText => extract_only(components, job).await,
        TaskKind::Batch => run_batch(components, job).await,
        TaskKind::ExtractTender | TaskKind::GenerateQuotation | TaskKind::AnalyzeRisk => {
            model_bound(components, job).await
        }
    }
}

fn check_deadline(job: &Job) -> Result<(), SchedulerError> {
    if let Some(deadline) = job.deadline {
        if Utc::now() > deadline {
            return Err(SchedulerError::TimedOut);
        }
    }
    Ok(())
}

async fn extract_only<R: crate::model_client::ModelRuntime>(
    components: &Arc<Components<R>>,
    job: &Job,
) -> Result<serde_json::Value, SchedulerError> {
    let extracted = components
        .extractor
        .extract(&job.input, job.content_type)
        .await?;
    Ok(serde_json::to_value(extracted).unwrap_or(serde_json::Value::Null))
}

async fn model_bound<R: crate::model_client::ModelRuntime>(
    components: &Arc<Components<R>>,
    job: &Job,
) -> Result<serde_json::Value, SchedulerError> {
    let extracted = components
        .extractor
        .extract(&job.input, job.content_type)
        .await?;

    let mut inputs = job.params.clone();
    inputs.insert(
        "text".to_string(),
        serde_json::Value::String(extracted.text.clone()),
    );

    check_deadline(job)?;

    let deadline_budget = job
        .deadline
        .map(|d| (d - Utc::now()).to_std().unwrap_or(Duration::ZERO));

    let optimizer = PerformanceOptimizer::new(&components.metrics, components.optimizer_policy);
    let decision = optimizer.decide(job.task_kind, components.config.default_model_tier, deadline_budget);
    let tier = decision.tier;
    let timeout = decision.timeout;
    let model_name = components.config.model_for_tier(tier).to_string();

    if !components.health.is_ready(&model_name) {
        return Err(SchedulerError::Model(crate::error::ModelError::Unavailable(
            format!("model {model_name} is not ready"),
        )));
    }

    let fingerprint = fingerprint::compute(
        job.task_kind,
        &components.config.prompt_template_version,
        tier,
        &extracted.text,
        &inputs,
    );

    match components.cache.get_or_lead(fingerprint).await {
        Lookup::Hit(result) => {
            components.metrics.record(crate::metrics::MetricSample {
                operation: "model_call".to_string(),
                task_kind: Some(job.task_kind),
                tier: Some(tier),
                outcome: "cache-hit",
                latency_ms: 0,
                tokens_in: 0,
                tokens_out: 0,
                timestamp: Utc::now(),
            });
            Ok(result.parsed.clone())
        }
        Lookup::Followed(result) => Ok(result.parsed.clone()),
        Lookup::Lead(guard) => {
            let rendered = match prompt::render(
                job.task_kind,
                &inputs,
                &components.config.prompt_template_version,
                24_000,
            ) {
                Ok(r) => r,
                Err(e) => {
                    guard.fail().await;
                    return Err(SchedulerError::Prompt(e));
                }
            };

            components.rate_limiter.until_ready().await;

            let call_started = std::time::Instant::now();
            let response = components
                .model_client
                .generate(
                    &model_name,
                    tier,
                    &rendered.text,
                    &ResponseSchema::Structured(rendered.response_schema),
                    timeout,
                    &job.cancel,
                )
                .await;
            let call_latency = call_started.elapsed();

            match response {
                Ok(response) => {
                    components.metrics.record(crate::metrics::MetricSample {
                        operation: "model_call".to_string(),
                        task_kind: Some(job.task_kind),
                        tier: Some(tier),
                        outcome: "succeeded",
                        latency_ms: call_latency.as_millis() as u64,
                        tokens_in: response.tokens_in,
                        tokens_out: response.tokens_out,
                        timestamp: Utc::now(),
                    });

                    let ai_result = Arc::new(AIResult {
                        task_kind: job.task_kind,
                        tier,
                        raw_text: response.raw_text,
                        parsed: response.parsed.clone(),
                        confidence: 1.0,
                        tokens_in: response.tokens_in,
                        tokens_out: response.tokens_out,
                        latency_ms: call_latency.as_millis() as u64,
                        fingerprint,
                        completed_at: Utc::now(),
                    });
                    let byte_size = ai_result.raw_text.len() + ai_result.parsed.to_string().len();
                    let ttl = Duration::from_secs(components.config.cache_default_ttl_seconds);
                    let parsed = ai_result.parsed.clone();
                    guard.complete(ai_result, ttl, byte_size).await;
                    Ok(parsed)
                }
                Err(e) => {
                    components.metrics.record(crate::metrics::MetricSample {
                        operation: "model_call".to_string(),
                        task_kind: Some(job.task_kind),
                        tier: Some(tier),
                        outcome: "failed",
                        latency_ms: call_latency.as_millis() as u64,
                        tokens_in: 0,
                        tokens_out: 0,
                        timestamp: Utc::now(),
                    });
                    guard.fail().await;
                    Err(SchedulerError::Model(e))
                }
            }
        }
    }
}

/// `batch` fans its child specs out as directly-spawned tasks sharing the
/// parent's cancellation token, rather than re-enqueuing them through the
/// bounded queue: re-enqueuing risks deadlock if the queue is already at
/// capacity with other batches' children, and the parent is the natural
/// owner of cancellation cascade here.
async fn run_batch<R: crate::model_client::ModelRuntime>(
    components: &Arc<Components<R>>,
    job: &Job,
) -> Result<serde_json::Value, SchedulerError> {
    let child_specs = job
        .params
        .get("jobs")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();

    if child_specs.is_empty() {
        return Err(SchedulerError::Internal(
            "batch job carries no child jobs under params.jobs".to_string(),
        ));
    }

    info!(job_id = %job.id, count = child_specs.len(), "running batch");

    let mut handles = Vec::with_capacity(child_specs.len());
    for spec_value in child_specs {
        let child_spec = match parse_child_spec(&spec_value) {
            Ok(spec) => spec,
            Err(e) => {
                job.cancel.cancel();
                return Err(e);
            }
        };
        let child_job = Job {
            id: Uuid::new_v4(),
            task_kind: child_spec.task_kind,
            input: child_spec.input,
            content_type: child_spec.content_type,
            correlation_id: child_spec.correlation_id,
            priority: child_spec.priority,
            submitted_at: Utc::now(),
            deadline: child_spec.deadline.or(job.deadline),
            params: child_spec.params,
            cancel: job.cancel.child_token(),
        };
        components
            .registry
            .insert_pending(child_job.id, child_job.cancel.clone())
            .await;
        components.registry.mark_running(child_job.id).await;

        let components = components.clone();
        let child_id = child_job.id;
        handles.push((child_id, tokio::spawn(run_child(components, child_job))));
    }

    let mut results = Vec::with_capacity(handles.len());
    let mut first_failure = None;
    for (child_id, handle) in handles {
        match handle.await {
            Ok(Ok(value)) => results.push(value),
            Ok(Err(e)) => {
                if first_failure.is_none() {
                    first_failure = Some(e);
                    job.cancel.cancel();
                }
                results.push(serde_json::json!({"child_id": child_id, "error": true}));
            }
            Err(join_err) => {
                if first_failure.is_none() {
                    first_failure = Some(SchedulerError::Internal(format!(
                        "batch child panicked: {join_err}"
                    )));
                    job.cancel.cancel();
                }
            }
        }
    }

    if let Some(e) = first_failure {
        return Err(e);
    }
    Ok(serde_json::Value::Array(results))
}

/// Runs a batch child to completion and returns its outcome directly,
/// bypassing the registry's terminal-state bookkeeping for the parent
/// (children still get their own registry entries so they're individually
/// inspectable, but the batch aggregate is what the caller of `batch` awaits).
async fn run_child<R: crate::model_client::ModelRuntime>(
    components: Arc<Components<R>>,
    job: Job,
) -> Result<serde_json::Value, SchedulerError> {
    let job_id = job.id;
    let result = tokio::select! {
        result = execute(&components, &job) => result,
        _ = job.cancel.cancelled() => Err(SchedulerError::Cancelled),
    };
    match &result {
        Ok(value) => {
            components
                .registry
                .mark_terminal(job_id, TerminalReason::Succeeded, None, None, Some(value.clone()))
                .await;
        }
        Err(e) => {
            let reason = match e {
                SchedulerError::Cancelled => TerminalReason::Cancelled,
                SchedulerError::TimedOut => TerminalReason::TimedOut,
                _ => TerminalReason::Failed,
            };
            components
                .registry
                .mark_terminal(job_id, reason, Some(e.code()), Some(e.to_string()), None)
                .await;
        }
    }
    result
}

fn parse_child_spec(value: &serde_json::Value) -> Result<JobSpec, SchedulerError> {
    let obj = value.as_object().ok_or_else(|| {
        SchedulerError::Internal("batch child spec must be a JSON object".to_string())
    })?;

    let task_kind_str = obj
        .get("task_kind")
        .and_then(|v| v.as_str())
        .ok_or_else(|| SchedulerError::Internal("batch child missing task_kind".to_string()))?;
    let task_kind = match task_kind_str {
        "extract_text" => TaskKind::ExtractText,
        "extract_tender" => TaskKind::ExtractTender,
        "generate_quotation" => TaskKind::GenerateQuotation,
        "analyze_risk" => TaskKind::AnalyzeRisk,
        other => {
            return Err(SchedulerError::Internal(format!(
                "unknown batch child task_kind: {other}"
            )))
        }
    };

    let input = if let Some(path) = obj.get("path").and_then(|v| v.as_str()) {
        InputRef::Path(path.into())
    } else if let Some(text) = obj.get("text").and_then(|v| v.as_str()) {
        InputRef::Blob(text.as_bytes().to_vec())
    } else {
        return Err(SchedulerError::Internal(
            "batch child missing path or text input".to_string(),
        ));
    };

    let content_type = match obj.get("content_type").and_then(|v| v.as_str()) {
        Some("pdf") => ContentType::Pdf,
        Some("docx") => ContentType::Docx,
        Some("plain_text") => ContentType::PlainText,
        _ => ContentType::Unknown,
    };

    let params = obj
        .get("params")
        .and_then(|v| v.as_object())
        .cloned()
        .unwrap_or_default();

    Ok(JobSpec {
        task_kind,
        input,
        content_type,
        correlation_id: obj
            .get("correlation_id")
            .and_then(|v| v.as_str())
            .map(String::from),
        priority: Priority::Normal,
        deadline: None,
        params,
    })
}
