//! Error taxonomy. Each component owns a `thiserror` enum and reports a
//! stable string code; the scheduler composes them into `PipelineError`.

use thiserror::Error;

/// Returns the stable code a component error maps to on the job record.
pub trait ErrorCode {
    fn code(&self) -> &'static str;
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("document exceeds max_document_bytes")]
    TooLarge,
    #[error("document could not be read: {0}")]
    Corrupt(String),
    #[error("unsupported content type: {0}")]
    Unsupported(String),
    #[error("extraction produced zero printable characters")]
    Empty,
    #[error("external tool not found: {0}")]
    ToolNotFound(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ErrorCode for ExtractError {
    fn code(&self) -> &'static str {
        match self {
            ExtractError::TooLarge => "document-too-large",
            ExtractError::Corrupt(_) => "document-corrupt",
            ExtractError::Unsupported(_) => "document-unsupported",
            ExtractError::Empty => "document-empty",
            ExtractError::ToolNotFound(_) => "document-corrupt",
            ExtractError::Io(_) => "document-corrupt",
        }
    }
}

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("missing required prompt input: {0}")]
    MissingInput(String),
}

impl ErrorCode for PromptError {
    fn code(&self) -> &'static str {
        "prompt-input-missing"
    }
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model runtime unreachable: {0}")]
    Unreachable(String),
    #[error("model not loaded: {0}")]
    Unavailable(String),
    #[error("model call timed out")]
    Timeout,
    #[error("model output invalid: {0}")]
    OutputInvalid(String),
}

impl ErrorCode for ModelError {
    fn code(&self) -> &'static str {
        match self {
            ModelError::Unreachable(_) => "model-unreachable",
            ModelError::Unavailable(_) => "model-unavailable",
            ModelError::Timeout => "model-timeout",
            ModelError::OutputInvalid(_) => "model-output-invalid",
        }
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("single-flight leader was cancelled and no follower could be promoted")]
    LeaderCancelled,
}

impl ErrorCode for CacheError {
    fn code(&self) -> &'static str {
        "internal-error"
    }
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue is full")]
    Full,
    #[error("queue is shut down")]
    ShuttingDown,
}

impl ErrorCode for QueueError {
    fn code(&self) -> &'static str {
        match self {
            QueueError::Full => "queue-full",
            QueueError::ShuttingDown => "queue-full",
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error(transparent)]
    Prompt(#[from] PromptError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error("job cancelled")]
    Cancelled,
    #[error("job deadline exceeded")]
    TimedOut,
    #[error("internal error: {0}")]
    Internal(String),
}

impl ErrorCode for SchedulerError {
    fn code(&self) -> &'static str {
        match self {
            SchedulerError::Extract(e) => e.code(),
            SchedulerError::Prompt(e) => e.code(),
            SchedulerError::Model(e) => e.code(),
            SchedulerError::Cache(e) => e.code(),
            SchedulerError::Queue(e) => e.code(),
            SchedulerError::Cancelled => "cancelled",
            SchedulerError::TimedOut => "timed_out",
            SchedulerError::Internal(_) => "internal-error",
        }
    }
}

/// Top-level error returned by the facade.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("validation failed: {0}")]
    ValidationFailed(String),
    #[error("unknown job handle")]
    UnknownHandle,
}

impl ErrorCode for PipelineError {
    fn code(&self) -> &'static str {
        match self {
            PipelineError::Scheduler(e) => e.code(),
            PipelineError::Config(_) => "validation-failed",
            PipelineError::ValidationFailed(_) => "validation-failed",
            PipelineError::UnknownHandle => "unknown-handle",
        }
    }
}
