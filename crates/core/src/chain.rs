//! Chain Resolver: search candidate decode/decompress chains.
//!
//! The obfuscation family never declares which encoding layers it applied,
//! but only a handful of combinations occur in practice. The resolver walks
//! a fixed priority-ordered candidate list; a candidate is abandoned as soon
//! as any step fails, and a fully-applied candidate is accepted only when
//! its output deserializes as a code object (the validation oracle). The
//! first validating candidate wins; ties are broken by priority order alone,
//! a deliberate, simple rule.
//!
//! The oracle can in principle accept a false positive (random bytes that
//! coincidentally parse as a minimal code object); requiring the top-level
//! value to type-check as a code object, rather than merely parse, is the
//! threshold this implementation chose.

use std::io::{Read, Write};

use data_encoding::{BASE32, BASE64};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::marshal;

/// One reversible decode/decompress transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transform {
    Base64,
    Base32,
    Zlib,
}

impl std::fmt::Display for Transform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transform::Base64 => write!(f, "base64"),
            Transform::Base32 => write!(f, "base32"),
            Transform::Zlib => write!(f, "zlib"),
        }
    }
}

/// Decompression bomb guard for the zlib step.
const MAX_INFLATED_LEN: u64 = 64 * 1024 * 1024;

/// Candidate chains in priority order. Non-exhaustive by design: only the
/// combinations empirically used by this obfuscation family.
pub const CANDIDATE_CHAINS: [&[Transform]; 6] = [
    &[Transform::Base64, Transform::Base32, Transform::Zlib],
    &[Transform::Base64, Transform::Zlib],
    &[Transform::Base32, Transform::Zlib],
    &[Transform::Zlib],
    &[Transform::Base64],
    &[Transform::Base32],
];

/// The manual last-resort chain, applied blind (without the oracle) when no
/// candidate validates.
pub const FALLBACK_CHAIN: &[Transform] = &[Transform::Base64, Transform::Base32, Transform::Zlib];

/// Render a chain as `base64 -> base32 -> zlib`.
pub fn chain_label(chain: &[Transform]) -> String {
    chain.iter().map(ToString::to_string).collect::<Vec<_>>().join(" -> ")
}

/// Resolution failure.
#[derive(Debug, Error)]
pub enum ChainError {
    /// No candidate chain fully applied and validated.
    #[error("no candidate decode chain produced a structurally valid code object")]
    NoValidChain,

    /// A single transform step failed (returned by [`apply_transform`] and
    /// the blind fallback).
    #[error("{transform} step failed: {reason}")]
    StepFailed { transform: Transform, reason: String },
}

/// A successful resolution: the canonical serialized bytes plus the chain
/// that produced them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedChain {
    pub bytes: Vec<u8>,
    pub chain: Vec<Transform>,
}

/// Apply one transform to `input`.
pub fn apply_transform(transform: Transform, input: &[u8]) -> Result<Vec<u8>, ChainError> {
    let step = |reason: String| ChainError::StepFailed { transform, reason };
    match transform {
        // Encoded layers are frequently line-wrapped; strip ASCII whitespace
        // before decoding, as the alphabets themselves never contain it.
        Transform::Base64 => {
            let text = strip_ascii_whitespace(input);
            BASE64.decode(&text).map_err(|e| step(e.to_string()))
        }
        Transform::Base32 => {
            let text = strip_ascii_whitespace(input);
            BASE32.decode(&text).map_err(|e| step(e.to_string()))
        }
        Transform::Zlib => {
            let mut decoder = ZlibDecoder::new(input).take(MAX_INFLATED_LEN + 1);
            let mut out = Vec::new();
            decoder.read_to_end(&mut out).map_err(|e| step(e.to_string()))?;
            if out.len() as u64 > MAX_INFLATED_LEN {
                return Err(step("inflated output exceeds size limit".to_string()));
            }
            Ok(out)
        }
    }
}

/// Apply every transform of `chain` in sequence.
pub fn apply_chain(chain: &[Transform], input: &[u8]) -> Result<Vec<u8>, ChainError> {
    let mut current = input.to_vec();
    for &transform in chain {
        current = apply_transform(transform, &current)?;
    }
    Ok(current)
}

/// Search `CANDIDATE_CHAINS` for the first chain whose output deserializes
/// as a code object.
pub fn resolve(input: &[u8]) -> Result<ResolvedChain, ChainError> {
    for candidate in CANDIDATE_CHAINS {
        let Ok(bytes) = apply_chain(candidate, input) else {
            debug!("chain [{}] abandoned mid-application", chain_label(candidate));
            continue;
        };
        if marshal::loads_code(&bytes).is_ok() {
            debug!("chain [{}] validated", chain_label(candidate));
            return Ok(ResolvedChain { bytes, chain: candidate.to_vec() });
        }
        debug!("chain [{}] applied but did not validate", chain_label(candidate));
    }
    Err(ChainError::NoValidChain)
}

/// Blind last-resort decode: apply `FALLBACK_CHAIN` unconditionally, with no
/// validation oracle. The caller decides whether the output is usable.
pub fn blind_fallback(input: &[u8]) -> Result<Vec<u8>, ChainError> {
    apply_chain(FALLBACK_CHAIN, input)
}

/// Apply the inverse of one transform (the encode/compress direction).
///
/// Used to build fixtures and to state the round-trip property: for any
/// bytes `b` and chain `c`, `apply_chain(c, apply_inverse_chain(c, b)) == b`.
pub fn apply_inverse_transform(transform: Transform, input: &[u8]) -> Vec<u8> {
    match transform {
        Transform::Base64 => BASE64.encode(input).into_bytes(),
        Transform::Base32 => BASE32.encode(input).into_bytes(),
        Transform::Zlib => {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            // Writing to a Vec cannot fail.
            let _ = encoder.write_all(input);
            encoder.finish().unwrap_or_default()
        }
    }
}

/// Apply the inverses of `chain` in reverse order, producing a blob that
/// `apply_chain(chain, ..)` decodes back to `input`.
pub fn apply_inverse_chain(chain: &[Transform], input: &[u8]) -> Vec<u8> {
    let mut current = input.to_vec();
    for &transform in chain.iter().rev() {
        current = apply_inverse_transform(transform, &current);
    }
    current
}

fn strip_ascii_whitespace(bytes: &[u8]) -> Vec<u8> {
    bytes.iter().copied().filter(|b| !b.is_ascii_whitespace()).collect()
}
