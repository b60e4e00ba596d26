//! tenderflow - local-first AI processing pipeline for tender documents.
//!
//! Accepts PDFs, DOCX files and plain text, extracts normalized text
//! (falling back to OCR when native extraction is sparse), and runs the
//! result through a locally hosted LLM to extract structured tender
//! metadata, draft quotations, or assess procurement risk. Caches model
//! output by content fingerprint, single-flights duplicate work, and
//! gates model-bound jobs behind a background health probe.

pub mod cache;
pub mod config;
pub mod error;
pub mod extract;
pub mod facade;
pub mod fingerprint;
pub mod health;
pub mod metrics;
pub mod model;
pub mod model_client;
pub mod optimizer;
pub mod prompt;
pub mod queue;
pub mod scheduler;

pub use config::PipelineConfig;
pub use error::PipelineError;
pub use facade::Pipeline;
pub use model::{ContentType, InputRef, Job, JobSpec, JobStatus, Priority, TaskKind};
