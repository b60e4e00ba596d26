//! Stable content-addressed fingerprint over (task, template version, tier,
//! canonicalized inputs). Two inputs differing only in whitespace or key
//! order collide by construction (§3).

use std::collections::BTreeMap;

use serde_json::Value;

use crate::model::{ModelTier, PromptFingerprint, TaskKind};

pub fn compute(
    task: TaskKind,
    template_version: &str,
    tier: ModelTier,
    text: &str,
    params: &serde_json::Map<String, Value>,
) -> PromptFingerprint {
    let mut hasher = blake3::Hasher::new();
    hasher.update(task.as_str().as_bytes());
    hasher.update(b"\0");
    hasher.update(template_version.as_bytes());
    hasher.update(b"\0");
    hasher.update(tier.as_str().as_bytes());
    hasher.update(b"\0");
    hasher.update(canonical_text(text).as_bytes());
    hasher.update(b"\0");
    hasher.update(canonical_params(params).as_bytes());

    let hash = hasher.finalize();
    PromptFingerprint(*hash.as_bytes())
}

/// Collapses leading/trailing whitespace and normalizes internal run-of-whitespace
/// so two inputs differing only in whitespace collide.
fn canonical_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Serializes params with keys in sorted order so key-order differences collide.
fn canonical_params(params: &serde_json::Map<String, Value>) -> String {
    let sorted: BTreeMap<&String, &Value> = params.iter().collect();
    serde_json::to_string(&sorted).unwrap_or_default()
}
