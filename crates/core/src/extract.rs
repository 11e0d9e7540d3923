//! Secret/Payload Extractor.
//!
//! Scans raw source text for an embedded symmetric key and an encoded
//! payload. The obfuscation family this targets assigns both to variables
//! with a handful of conventional names, so extraction is an ordered list of
//! patterns evaluated by a uniform validation predicate rather than
//! exception-driven fallthrough: the first key pattern whose captured value
//! base64-decodes to the expected key size wins, and the first payload
//! pattern whose captured run passes the length/alphabet checks wins.
//!
//! Extraction never errors. Absence is represented: either field of
//! [`ExtractedSecrets`] may be `None` and callers must handle partial
//! extraction.

use std::sync::LazyLock;

use data_encoding::{BASE64, BASE64URL, HEXLOWER_PERMISSIVE};
use log::debug;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Decoded size of a Fernet key: 16 signing bytes + 16 encryption bytes.
pub const KEY_LEN: usize = 32;

/// Minimum captured length (after whitespace stripping) for a named payload
/// pattern. Rejects accidental short matches on common variable names.
const MIN_NAMED_PAYLOAD_LEN: usize = 100;

/// Minimum run length for the whole-text fallback scan.
const MIN_SCAN_PAYLOAD_LEN: usize = 200;

/// Source encoding of an extracted payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadEncoding {
    Hex,
    Base64,
}

impl std::fmt::Display for PayloadEncoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PayloadEncoding::Hex => write!(f, "hex"),
            PayloadEncoding::Base64 => write!(f, "base64"),
        }
    }
}

/// A key recovered from source text, with the pattern that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedKey {
    /// Decoded key bytes (always `KEY_LEN` long).
    pub bytes: Vec<u8>,
    /// Identifier of the key pattern that matched.
    pub pattern: &'static str,
}

/// A payload recovered from source text, already decoded to raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedPayload {
    /// Raw payload bytes after hex/base64 decoding.
    pub bytes: Vec<u8>,
    /// Encoding the payload was stored in.
    pub encoding: PayloadEncoding,
    /// Identifier of the payload pattern that matched.
    pub pattern: &'static str,
}

/// Result of scanning one source text. Either side may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedSecrets {
    pub key: Option<ExtractedKey>,
    pub payload: Option<ExtractedPayload>,
}

impl ExtractedSecrets {
    /// True when neither a key nor a payload was found.
    pub fn is_empty(&self) -> bool {
        self.key.is_none() && self.payload.is_none()
    }
}

/// Ordered key patterns: conventional variable names for an embedded key.
/// Quoted RHS, optional bytes-literal prefix, case-insensitive.
static KEY_PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    vec![
        ("__mikey__", Regex::new(r#"(?i)__mikey__\s*=\s*b?["']([^"']+)["']"#).unwrap()),
        ("key", Regex::new(r#"(?i)\bkey\s*=\s*b?["']([^"']+)["']"#).unwrap()),
        ("fernet_key", Regex::new(r#"(?i)\bfernet_key\s*=\s*b?["']([^"']+)["']"#).unwrap()),
    ]
});

/// Ordered payload patterns, hex variants first. Whitespace inside the quoted
/// run is tolerated (blobs are frequently line-wrapped) and stripped before
/// validation.
static PAYLOAD_HEX_PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    ["mydata", "data", "payload", "encrypted"]
        .into_iter()
        .map(|name| {
            let pattern = format!(r#"(?is)\b{name}\s*=\s*b?["']([0-9a-f\s]+)["']"#);
            (name, Regex::new(&pattern).unwrap())
        })
        .collect()
});

static PAYLOAD_B64_PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    ["mydata", "data", "payload", "encrypted"]
        .into_iter()
        .map(|name| {
            let pattern = format!(r#"(?is)\b{name}\s*=\s*b?["']([A-Za-z0-9+/=\s]+)["']"#);
            (name, Regex::new(&pattern).unwrap())
        })
        .collect()
});

/// Fallback scans over the whole text: any quoted run long enough to be a
/// plausible payload, hex first.
static SCAN_HEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?s)["']([0-9a-fA-F]{200,})["']"#).unwrap());
static SCAN_B64: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?s)["']([A-Za-z0-9+/=]{200,})["']"#).unwrap());

/// Scan `source` for key material and an encoded payload.
///
/// Deterministic and idempotent: identical text always yields identical
/// `ExtractedSecrets`.
pub fn extract(source: &str) -> ExtractedSecrets {
    ExtractedSecrets { key: extract_key(source), payload: extract_payload(source) }
}

fn extract_key(source: &str) -> Option<ExtractedKey> {
    for (pattern, regex) in KEY_PATTERNS.iter() {
        let Some(caps) = regex.captures(source) else { continue };
        let candidate = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        if let Some(bytes) = decode_key(candidate) {
            debug!("key pattern '{pattern}' matched ({} chars)", candidate.len());
            return Some(ExtractedKey { bytes, pattern });
        }
    }
    None
}

/// Decode a key candidate. Keys in the wild appear in both the standard and
/// URL-safe base64 alphabets; accept either, but require exactly `KEY_LEN`
/// decoded bytes.
fn decode_key(candidate: &str) -> Option<Vec<u8>> {
    let bytes = BASE64
        .decode(candidate.as_bytes())
        .or_else(|_| BASE64URL.decode(candidate.as_bytes()))
        .ok()?;
    (bytes.len() == KEY_LEN).then_some(bytes)
}

fn extract_payload(source: &str) -> Option<ExtractedPayload> {
    // Named assignments, hex variants first.
    for (pattern, regex) in PAYLOAD_HEX_PATTERNS.iter() {
        let Some(caps) = regex.captures(source) else { continue };
        let run = strip_whitespace(caps.get(1).map(|m| m.as_str()).unwrap_or_default());
        if run.len() < MIN_NAMED_PAYLOAD_LEN {
            continue;
        }
        if let Ok(bytes) = HEXLOWER_PERMISSIVE.decode(run.as_bytes()) {
            debug!("payload pattern '{pattern}' matched as hex ({} chars)", run.len());
            return Some(ExtractedPayload { bytes, encoding: PayloadEncoding::Hex, pattern });
        }
    }
    for (pattern, regex) in PAYLOAD_B64_PATTERNS.iter() {
        let Some(caps) = regex.captures(source) else { continue };
        let run = strip_whitespace(caps.get(1).map(|m| m.as_str()).unwrap_or_default());
        if run.len() < MIN_NAMED_PAYLOAD_LEN {
            continue;
        }
        if let Ok(bytes) = BASE64.decode(run.as_bytes()) {
            debug!("payload pattern '{pattern}' matched as base64 ({} chars)", run.len());
            return Some(ExtractedPayload { bytes, encoding: PayloadEncoding::Base64, pattern });
        }
    }

    // Named patterns failed; fall back to scanning the whole text for the
    // longest qualifying quoted run.
    if let Some(run) = longest_capture(&SCAN_HEX, source) {
        if run.len() >= MIN_SCAN_PAYLOAD_LEN {
            if let Ok(bytes) = HEXLOWER_PERMISSIVE.decode(run.as_bytes()) {
                debug!("fallback hex scan matched ({} chars)", run.len());
                return Some(ExtractedPayload {
                    bytes,
                    encoding: PayloadEncoding::Hex,
                    pattern: "scan-hex",
                });
            }
        }
    }
    if let Some(run) = longest_capture(&SCAN_B64, source) {
        if run.len() >= MIN_SCAN_PAYLOAD_LEN {
            if let Ok(bytes) = BASE64.decode(run.as_bytes()) {
                debug!("fallback base64 scan matched ({} chars)", run.len());
                return Some(ExtractedPayload {
                    bytes,
                    encoding: PayloadEncoding::Base64,
                    pattern: "scan-base64",
                });
            }
        }
    }

    None
}

/// Longest group-1 capture across all matches of `regex` in `text`.
fn longest_capture<'t>(regex: &Regex, text: &'t str) -> Option<&'t str> {
    regex
        .captures_iter(text)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .max_by_key(|run| run.len())
}

fn strip_whitespace(run: &str) -> String {
    run.chars().filter(|c| !c.is_whitespace()).collect()
}
