//! Core data types shared across the pipeline (§3 of the design docs).

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Which pipeline a job runs through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    ExtractText,
    ExtractTender,
    GenerateQuotation,
    AnalyzeRisk,
    Batch,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::ExtractText => "extract_text",
            TaskKind::ExtractTender => "extract_tender",
            TaskKind::GenerateQuotation => "generate_quotation",
            TaskKind::AnalyzeRisk => "analyze_risk",
            TaskKind::Batch => "batch",
        }
    }

    /// Whether this task kind calls the model client at all.
    pub fn is_model_bound(&self) -> bool {
        !matches!(self, TaskKind::ExtractText)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    Small,
    Balanced,
    Large,
}

impl ModelTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelTier::Small => "small",
            ModelTier::Balanced => "balanced",
            ModelTier::Large => "large",
        }
    }

    pub fn larger(self) -> ModelTier {
        match self {
            ModelTier::Small => ModelTier::Balanced,
            ModelTier::Balanced => ModelTier::Large,
            ModelTier::Large => ModelTier::Large,
        }
    }

    pub fn smaller(self) -> ModelTier {
        match self {
            ModelTier::Small => ModelTier::Small,
            ModelTier::Balanced => ModelTier::Small,
            ModelTier::Large => ModelTier::Balanced,
        }
    }
}

/// Where a job's input bytes come from.
#[derive(Debug, Clone)]
pub enum InputRef {
    Path(PathBuf),
    Blob(Vec<u8>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    Pdf,
    Docx,
    PlainText,
    Unknown,
}

/// A unit of work submitted through the facade.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub task_kind: TaskKind,
    pub input: InputRef,
    pub content_type: ContentType,
    pub correlation_id: Option<String>,
    pub priority: Priority,
    pub deadline: Option<DateTime<Utc>>,
    pub params: serde_json::Map<String, serde_json::Value>,
}

/// A job as owned by the scheduler once accepted.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub task_kind: TaskKind,
    pub input: InputRef,
    pub content_type: ContentType,
    pub correlation_id: Option<String>,
    pub priority: Priority,
    pub submitted_at: DateTime<Utc>,
    pub deadline: Option<DateTime<Utc>>,
    pub params: serde_json::Map<String, serde_json::Value>,
    pub cancel: CancellationToken,
}

impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for Job {}

/// Ordered by (priority desc, submitted_at asc) so the queue's max-heap
/// pops the highest-priority, oldest job first.
impl PartialOrd for Job {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Job {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.submitted_at.cmp(&self.submitted_at))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalReason {
    Succeeded,
    Failed,
    Cancelled,
    TimedOut,
}

#[derive(Debug, Clone)]
pub enum JobStatus {
    Pending,
    Running {
        started_at: DateTime<Utc>,
    },
    Terminal {
        reason: TerminalReason,
        code: Option<&'static str>,
        message: Option<String>,
        ended_at: DateTime<Utc>,
    },
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Terminal { .. })
    }
}

/// Per-document extraction artifact (§3 `ExtractedText`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedText {
    pub text: String,
    pub page_offsets: Option<Vec<usize>>,
    pub language: Option<String>,
    pub method: ExtractionMethod,
    pub quality: f32,
    pub byte_len: usize,
    pub token_estimate: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    Native,
    Ocr,
}

/// Stable content-addressed key over (task, template version, tier, inputs).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PromptFingerprint(pub [u8; 32]);

impl PromptFingerprint {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Display for PromptFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Outcome of one model invocation (§3 `AIResult`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AIResult {
    pub task_kind: TaskKind,
    pub tier: ModelTier,
    pub raw_text: String,
    pub parsed: serde_json::Value,
    pub confidence: f32,
    pub tokens_in: u32,
    pub tokens_out: u32,
    pub latency_ms: u64,
    pub fingerprint: PromptFingerprint,
    pub completed_at: DateTime<Utc>,
}
