//! Shared result types describing what a pipeline run produced.
//!
//! The core never prints; per-stage narration is returned to the caller as a
//! sequence of structured [`StageEvent`]s so any frontend (CLI, web gateway)
//! can render them uniformly.

use serde::{Deserialize, Serialize};

use crate::artifacts::ArtifactRecord;
use crate::chain::Transform;
use crate::classify::BehaviorReport;

/// Outcome of one pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageEvent {
    /// Stable stage name (e.g., `extract`, `chain-resolve`).
    pub stage: String,
    /// Whether the stage completed successfully.
    pub ok: bool,
    /// Size of the stage's primary output in bytes, if it produced one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Human-readable diagnostic message.
    pub message: String,
}

impl StageEvent {
    pub fn ok(stage: impl Into<String>, size: Option<u64>, message: impl Into<String>) -> Self {
        Self { stage: stage.into(), ok: true, size, message: message.into() }
    }

    pub fn failed(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self { stage: stage.into(), ok: false, size: None, message: message.into() }
    }
}

/// Full report for one pipeline run.
///
/// `success` is the single boolean callers branch on; everything else is
/// diagnostic detail. A failed run still lists the stages that completed and
/// the artifacts persisted before the failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Overall run outcome.
    pub success: bool,
    /// Per-stage outcomes, in execution order.
    pub stages: Vec<StageEvent>,
    /// Name of the stage that halted the run, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<String>,
    /// The decode chain the resolver selected, if resolution got that far.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain: Option<Vec<Transform>>,
    /// Whether the Fernet layer actually decrypted (false means the raw-byte
    /// fallback was used).
    pub decrypted: bool,
    /// Behavioral triage of the recovered code, if the run got that far.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub behavior: Option<BehaviorReport>,
    /// Artifacts persisted during the run, in write order.
    pub artifacts: Vec<ArtifactRecord>,
}

impl RunReport {
    /// Look up a stage event by name.
    pub fn stage(&self, name: &str) -> Option<&StageEvent> {
        self.stages.iter().find(|e| e.stage == name)
    }
}
