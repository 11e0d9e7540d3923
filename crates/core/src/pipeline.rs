//! Pipeline orchestrator.
//!
//! Wires the stages together in strict sequence, persisting every stage's
//! output before moving on and accumulating structured [`StageEvent`]s for
//! the caller to render. The pipeline is single-threaded and fully
//! synchronous; each stage depends on the previous stage's output.
//!
//! Propagation policy: decryption failure is always recovered locally (the
//! raw payload is passed downstream), so it has no error variant here. Every
//! other failure halts the run at its stage boundary and is reported in the
//! returned [`RunReport`]; `run_pipeline` itself never panics or returns an
//! error to the caller.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use log::{info, warn};
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::artifacts::{ArtifactError, ArtifactStore};
use crate::chain::{self, chain_label, ChainError, ResolvedChain, Transform};
use crate::classify::{self, BehaviorReport};
use crate::db::{RunDb, RunRecord};
use crate::disasm;
use crate::extract::{self, ExtractedSecrets};
use crate::fernet;
use crate::marshal::{self, MarshalError};
use crate::model::{RunReport, StageEvent};

/// Non-recoverable pipeline failure, tagged with the stage it halted.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// No payload could be extracted from the source text. A missing key
    /// alone is not fatal; the no-key decrypt fallback covers it.
    #[error("no payload pattern matched and no qualifying hex/base64 run was found")]
    Extraction,

    #[error(transparent)]
    ChainResolution(#[from] ChainError),

    #[error(transparent)]
    Deserialization(#[from] MarshalError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PipelineError {
    /// The stage this failure halts.
    pub fn stage(&self) -> &'static str {
        match self {
            PipelineError::Extraction => "extract",
            PipelineError::ChainResolution(_) => "chain-resolve",
            PipelineError::Deserialization(_) => "load",
            PipelineError::Artifact(_) => "persist",
            PipelineError::Io { .. } => "read-input",
        }
    }
}

/// Serializable provenance summary persisted as the secrets artifact.
/// Raw key bytes are deliberately not written out.
#[derive(Debug, Serialize)]
struct SecretsSummary<'a> {
    key_pattern: Option<&'a str>,
    key_len: Option<usize>,
    payload_pattern: Option<&'a str>,
    payload_encoding: Option<String>,
    payload_len: Option<usize>,
}

impl<'a> SecretsSummary<'a> {
    fn from_secrets(secrets: &'a ExtractedSecrets) -> Self {
        Self {
            key_pattern: secrets.key.as_ref().map(|k| k.pattern),
            key_len: secrets.key.as_ref().map(|k| k.bytes.len()),
            payload_pattern: secrets.payload.as_ref().map(|p| p.pattern),
            payload_encoding: secrets.payload.as_ref().map(|p| p.encoding.to_string()),
            payload_len: secrets.payload.as_ref().map(|p| p.bytes.len()),
        }
    }
}

/// Mutable state accumulated across stages, reported whether or not the run
/// completes.
#[derive(Default)]
struct Progress {
    chain: Option<Vec<Transform>>,
    decrypted: bool,
    behavior: Option<BehaviorReport>,
}

/// Run the full recovery pipeline on `input_path`, persisting artifacts
/// under `out_dir`.
///
/// Never panics and never returns an error; all outcomes, including IO
/// failures, are reported through the [`RunReport`].
pub fn run_pipeline(input_path: &Path, out_dir: &Path) -> RunReport {
    let started_at = Utc::now().to_rfc3339();
    let mut stages: Vec<StageEvent> = Vec::new();
    let mut progress = Progress::default();

    // Source must be readable and the output location writable before any
    // stage runs.
    let source = match fs::read_to_string(input_path) {
        Ok(text) => text,
        Err(source) => {
            let err = PipelineError::Io { path: input_path.to_path_buf(), source };
            stages.push(StageEvent::failed(err.stage(), err.to_string()));
            return RunReport {
                success: false,
                failed_stage: Some(err.stage().to_string()),
                stages,
                chain: None,
                decrypted: false,
                behavior: None,
                artifacts: Vec::new(),
            };
        }
    };
    stages.push(StageEvent::ok(
        "read-input",
        Some(source.len() as u64),
        format!("loaded obfuscated source ({} chars)", source.len()),
    ));

    let mut store = match ArtifactStore::create(out_dir) {
        Ok(store) => store,
        Err(err) => {
            let err = PipelineError::from(err);
            stages.push(StageEvent::failed(err.stage(), err.to_string()));
            return RunReport {
                success: false,
                failed_stage: Some(err.stage().to_string()),
                stages,
                chain: None,
                decrypted: false,
                behavior: None,
                artifacts: Vec::new(),
            };
        }
    };

    let outcome = execute(&source, &mut store, &mut stages, &mut progress);
    let failed_stage = match &outcome {
        Ok(()) => None,
        Err(err) => {
            stages.push(StageEvent::failed(err.stage(), err.to_string()));
            Some(err.stage().to_string())
        }
    };
    let success = failed_stage.is_none();

    // Bookkeeping is best-effort: a manifest or DB hiccup must not change
    // the run's outcome.
    if let Err(err) = store.write_manifest() {
        warn!("failed to write manifest: {err}");
    }
    let finished_at = Utc::now().to_rfc3339();
    let record = RunRecord {
        input_path: input_path.display().to_string(),
        input_hash: sha256_hex(source.as_bytes()),
        status: match &failed_stage {
            None => "succeeded".to_string(),
            Some(stage) => format!("failed:{stage}"),
        },
        chain: progress.chain.as_deref().map(chain_label),
        decrypted: progress.decrypted,
        started_at,
        finished_at,
    };
    match RunDb::open(&store.out_dir().join("runs.db")) {
        Ok(db) => {
            if let Err(err) = db.insert_run(&record) {
                warn!("failed to record run: {err}");
            }
        }
        Err(err) => warn!("failed to open run database: {err}"),
    }

    RunReport {
        success,
        failed_stage,
        stages,
        chain: progress.chain,
        decrypted: progress.decrypted,
        behavior: progress.behavior,
        artifacts: store.records().to_vec(),
    }
}

/// The stage sequence proper. Any `Err` is a halt at that stage boundary;
/// everything persisted before the failure stays on disk.
fn execute(
    source: &str,
    store: &mut ArtifactStore,
    stages: &mut Vec<StageEvent>,
    progress: &mut Progress,
) -> Result<(), PipelineError> {
    store.persist_text("original", source)?;

    // Stage 1: locate key material and payload.
    let secrets = extract::extract(source);
    let Some(payload) = secrets.payload.as_ref() else {
        return Err(PipelineError::Extraction);
    };
    let summary = SecretsSummary::from_secrets(&secrets);
    store.persist_json(
        "secrets",
        &serde_json::to_string_pretty(&summary).unwrap_or_else(|_| "{}".to_string()),
    )?;
    stages.push(StageEvent::ok(
        "extract",
        Some(payload.bytes.len() as u64),
        match (&secrets.key, payload.pattern) {
            (Some(key), pattern) => format!(
                "key via '{}', payload via '{pattern}' ({}, {} bytes)",
                key.pattern, payload.encoding, payload.bytes.len()
            ),
            (None, pattern) => format!(
                "no key found; payload via '{pattern}' ({}, {} bytes)",
                payload.encoding, payload.bytes.len()
            ),
        },
    ));

    // Stage 2: best-effort token decryption. Failure degrades, never halts.
    let key_bytes = secrets.key.as_ref().map(|k| k.bytes.as_slice());
    let (decrypted, did_decrypt) = fernet::decrypt(&payload.bytes, key_bytes);
    progress.decrypted = did_decrypt;
    store.persist_bytes("decrypted", &decrypted)?;
    stages.push(StageEvent::ok(
        "decrypt",
        Some(decrypted.len() as u64),
        match (did_decrypt, key_bytes.is_some()) {
            (true, _) => format!("fernet token decrypted ({} bytes)", decrypted.len()),
            (false, true) => "decryption failed; continuing with raw payload".to_string(),
            (false, false) => "no key; continuing with raw payload".to_string(),
        },
    ));

    // Stage 3: search candidate decode chains, with the blind two-step
    // fallback as a last resort when no candidate validates.
    let resolved = match chain::resolve(&decrypted) {
        Ok(resolved) => {
            stages.push(StageEvent::ok(
                "chain-resolve",
                Some(resolved.bytes.len() as u64),
                format!("chain [{}] validated", chain_label(&resolved.chain)),
            ));
            resolved
        }
        Err(_) => match chain::blind_fallback(&decrypted) {
            Ok(bytes) if marshal::loads_code(&bytes).is_ok() => {
                stages.push(StageEvent::ok(
                    "chain-resolve",
                    Some(bytes.len() as u64),
                    format!("blind fallback [{}] applied", chain_label(chain::FALLBACK_CHAIN)),
                ));
                ResolvedChain { bytes, chain: chain::FALLBACK_CHAIN.to_vec() }
            }
            _ => return Err(ChainError::NoValidChain.into()),
        },
    };
    progress.chain = Some(resolved.chain.clone());
    store.persist_bytes("resolved", &resolved.bytes)?;

    // Stage 4: deserialize the canonical bytes. The resolver already
    // validated them, so this is re-parsing for the value, not a re-check.
    let code = marshal::loads_code(&resolved.bytes)?;
    stages.push(StageEvent::ok(
        "load",
        Some(resolved.bytes.len() as u64),
        format!(
            "code object '{}' ({} consts, {} names)",
            code.name,
            code.consts.len(),
            code.names.len()
        ),
    ));
    info!("recovered code object '{}' from {}", code.name, code.filename);

    // Stage 5: render instruction trace and structural summary.
    let listing = disasm::disassemble(&code);
    store.persist_text("disassembly", &listing)?;
    stages.push(StageEvent::ok(
        "disassemble",
        Some(listing.len() as u64),
        format!("disassembled ({} chars)", listing.len()),
    ));

    let summary_text = disasm::structural_summary(&code);
    store.persist_text("code_summary", &summary_text)?;
    stages.push(StageEvent::ok(
        "summarize",
        Some(summary_text.len() as u64),
        format!("structural summary ({} chars)", summary_text.len()),
    ));

    // Stage 6: behavioral triage over the summary text (no decompiler is
    // bundled, so the summary is the text representation we classify).
    let behavior = classify::classify(&summary_text);
    let hits =
        behavior.categories.values().filter(|tokens| !tokens.is_empty()).count();
    store.persist_json(
        "behavior",
        &serde_json::to_string_pretty(&behavior).unwrap_or_else(|_| "{}".to_string()),
    )?;
    stages.push(StageEvent::ok(
        "classify",
        None,
        format!("{hits} of {} indicator categories matched", behavior.categories.len()),
    ));
    progress.behavior = Some(behavior);

    Ok(())
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
