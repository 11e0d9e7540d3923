//! Behavior Classifier: indicator-category triage of recovered text.
//!
//! Scans a text representation of the recovered program against six fixed
//! keyword/regex sets. The output is categorical presence plus the distinct
//! matched tokens per category; this is advisory triage for an analyst, not
//! a verdict.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Indicator categories, in report order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorCategory {
    Imports,
    Network,
    FileOperations,
    ProcessExecution,
    Encryption,
    Persistence,
}

impl IndicatorCategory {
    pub const ALL: [IndicatorCategory; 6] = [
        IndicatorCategory::Imports,
        IndicatorCategory::Network,
        IndicatorCategory::FileOperations,
        IndicatorCategory::ProcessExecution,
        IndicatorCategory::Encryption,
        IndicatorCategory::Persistence,
    ];
}

impl std::fmt::Display for IndicatorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            IndicatorCategory::Imports => "imports",
            IndicatorCategory::Network => "network",
            IndicatorCategory::FileOperations => "file_operations",
            IndicatorCategory::ProcessExecution => "process_execution",
            IndicatorCategory::Encryption => "encryption",
            IndicatorCategory::Persistence => "persistence",
        };
        write!(f, "{label}")
    }
}

/// Distinct matched tokens per category. Categories with no matches are
/// present with an empty set, so consumers can iterate uniformly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BehaviorReport {
    pub categories: BTreeMap<IndicatorCategory, BTreeSet<String>>,
}

impl BehaviorReport {
    /// Tokens matched for one category.
    pub fn matched(&self, category: IndicatorCategory) -> &BTreeSet<String> {
        static EMPTY: BTreeSet<String> = BTreeSet::new();
        self.categories.get(&category).unwrap_or(&EMPTY)
    }

    /// True when no category matched anything.
    pub fn is_empty(&self) -> bool {
        self.categories.values().all(BTreeSet::is_empty)
    }
}

static PATTERNS: LazyLock<Vec<(IndicatorCategory, Regex)>> = LazyLock::new(|| {
    vec![
        (IndicatorCategory::Imports, Regex::new(r"import\s+(\w+)").unwrap()),
        (
            IndicatorCategory::Network,
            Regex::new(r"(requests|urllib|socket|http\.client)\.\w+").unwrap(),
        ),
        (
            IndicatorCategory::FileOperations,
            Regex::new(r"\b(open|read|write|remove|unlink)\s*\(").unwrap(),
        ),
        (
            IndicatorCategory::ProcessExecution,
            Regex::new(r"(subprocess|os\.system|os\.popen|eval|exec)\s*\(").unwrap(),
        ),
        (
            IndicatorCategory::Encryption,
            Regex::new(r"(base64|crypto|fernet|aes|rsa)\.\w+").unwrap(),
        ),
        (
            IndicatorCategory::Persistence,
            Regex::new(r"(startup|registry|cron|systemd)\.\w+").unwrap(),
        ),
    ]
});

/// Classify `text` against all indicator categories.
///
/// Tokens are collected into sets, so detection is independent of match
/// order within the input.
pub fn classify(text: &str) -> BehaviorReport {
    let mut report = BehaviorReport::default();
    for category in IndicatorCategory::ALL {
        report.categories.insert(category, BTreeSet::new());
    }
    for (category, regex) in PATTERNS.iter() {
        let tokens = report.categories.entry(*category).or_default();
        for caps in regex.captures_iter(text) {
            if let Some(token) = caps.get(1) {
                tokens.insert(token.as_str().to_string());
            }
        }
    }
    report
}
