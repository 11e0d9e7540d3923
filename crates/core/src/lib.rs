//! peelback-core
//!
//! Core library for recovering multi-layer obfuscated script payloads.
//!
//! An obfuscated sample typically embeds a symmetric key and an
//! encoded/encrypted/compressed blob, but never declares the transform chain
//! used to produce it. This crate recovers the original serialized code object
//! by heuristically locating key material, attempting authenticated
//! decryption, and searching a small space of candidate decode chains until
//! one yields a structurally valid deserialization.
//!
//! The stages, in dependency order:
//! - [`extract`]: locate key and payload candidates in raw source text.
//! - [`fernet`]: best-effort authenticated decryption of the payload.
//! - [`chain`]: search candidate decode/decompress chains.
//! - [`marshal`]: deserialize the recovered bytes into a code-object tree.
//! - [`disasm`]: render instruction traces and structural summaries.
//! - [`classify`]: scan recovered text for behavioral indicators.
//! - [`artifacts`]: persist every intermediate stage to disk.
//! - [`pipeline`]: orchestrate all of the above into one run.
//!
//! Nothing recovered is ever executed; the loader is read-only structural
//! parsing and must fail cleanly on adversarial input.
//!
//! All substantive logic lives here so it is fully testable and reusable from
//! multiple frontends (CLI, web gateway, etc.).

pub mod artifacts;
pub mod chain;
pub mod classify;
pub mod db;
pub mod disasm;
pub mod extract;
pub mod fernet;
pub mod marshal;
pub mod model;
pub mod pipeline;

pub use pipeline::run_pipeline;

/// Returns the library version as encoded at compile time.
///
/// Useful for tests and for frontends to report consistent version info.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
