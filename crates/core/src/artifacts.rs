//! Stage Persistence: write-once, stage-indexed artifact store.
//!
//! Every pipeline stage that produces output persists it here before the run
//! moves on, so a caller aborting between stages still has everything the
//! completed stages recovered. Artifacts are named
//! `stage_<NN>_<label>.<ext>` with a monotonically increasing index assigned
//! in call order; because the pipeline always calls in the same order for
//! the same input, numbering is stable across runs.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Persistence failure.
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// A stage name was persisted twice within one run. This signals a logic
    /// or configuration error in the caller, not a data problem.
    #[error("stage `{0}` was already persisted in this run")]
    DuplicateStage(String),

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to create output directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Content kind of an artifact, reflected in its file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Text,
    Binary,
}

/// Manifest entry for one persisted artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    /// Monotonic stage index within the run.
    pub index: u32,
    /// Stable stage label (unique within the run).
    pub stage: String,
    /// File name relative to the output directory.
    pub file: String,
    /// Payload size in bytes.
    pub size: u64,
    pub kind: ArtifactKind,
}

/// Append-only artifact store for a single pipeline run.
///
/// Concurrent runs must use distinct output directories; the store takes no
/// locks.
pub struct ArtifactStore {
    out_dir: PathBuf,
    records: Vec<ArtifactRecord>,
    seen: BTreeSet<String>,
    next_index: u32,
}

impl ArtifactStore {
    /// Create a store rooted at `out_dir`, creating the directory if needed.
    pub fn create(out_dir: impl AsRef<Path>) -> Result<Self, ArtifactError> {
        let out_dir = out_dir.as_ref().to_path_buf();
        fs::create_dir_all(&out_dir)
            .map_err(|source| ArtifactError::CreateDir { path: out_dir.clone(), source })?;
        Ok(Self { out_dir, records: Vec::new(), seen: BTreeSet::new(), next_index: 0 })
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    /// Persist raw bytes under the next stage index.
    pub fn persist_bytes(&mut self, stage: &str, payload: &[u8]) -> Result<(), ArtifactError> {
        self.persist(stage, payload, "bin", ArtifactKind::Binary)
    }

    /// Persist text under the next stage index. JSON payloads keep their own
    /// extension so downstream tooling can find them.
    pub fn persist_text(&mut self, stage: &str, payload: &str) -> Result<(), ArtifactError> {
        self.persist(stage, payload.as_bytes(), "txt", ArtifactKind::Text)
    }

    pub fn persist_json(&mut self, stage: &str, payload: &str) -> Result<(), ArtifactError> {
        self.persist(stage, payload.as_bytes(), "json", ArtifactKind::Text)
    }

    fn persist(
        &mut self,
        stage: &str,
        payload: &[u8],
        ext: &str,
        kind: ArtifactKind,
    ) -> Result<(), ArtifactError> {
        if !self.seen.insert(stage.to_string()) {
            return Err(ArtifactError::DuplicateStage(stage.to_string()));
        }
        let index = self.next_index;
        let file = format!("stage_{index:02}_{stage}.{ext}");
        let path = self.out_dir.join(&file);
        fs::write(&path, payload)
            .map_err(|source| ArtifactError::Write { path: path.clone(), source })?;
        debug!("persisted {} ({} bytes)", path.display(), payload.len());

        self.next_index += 1;
        self.records.push(ArtifactRecord {
            index,
            stage: stage.to_string(),
            file,
            size: payload.len() as u64,
            kind,
        });
        Ok(())
    }

    /// Records persisted so far, in write order.
    pub fn records(&self) -> &[ArtifactRecord] {
        &self.records
    }

    /// Write the run manifest (`manifest.json`) listing every artifact.
    /// The manifest itself is not a stage artifact.
    pub fn write_manifest(&self) -> Result<(), ArtifactError> {
        let path = self.out_dir.join("manifest.json");
        let json = serde_json::to_string_pretty(&self.records)
            .unwrap_or_else(|_| "[]".to_string());
        fs::write(&path, json)
            .map_err(|source| ArtifactError::Write { path: path.clone(), source })
    }
}
