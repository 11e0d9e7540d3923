use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use peelback_core::classify::{BehaviorReport, IndicatorCategory};
use peelback_core::model::StageEvent;

/// Canonicalize a path if possible, falling back to joining it onto the
/// current working directory (e.g., when it does not exist yet).
pub fn canonicalize_or_current(path: &str) -> Result<PathBuf> {
    let path = Path::new(path);
    if path == Path::new(".") {
        Ok(env::current_dir().context("Failed to get current directory")?)
    } else {
        match path.canonicalize() {
            Ok(p) => Ok(p),
            Err(_) => {
                let cwd = env::current_dir().context("Failed to get current directory")?;
                Ok(cwd.join(path))
            }
        }
    }
}

/// Render one stage event the way the console narration expects:
/// `[+]` for success, `[-]` for failure, size when known.
pub fn format_stage_event(event: &StageEvent) -> String {
    let marker = if event.ok { "[+]" } else { "[-]" };
    match event.size {
        Some(size) => format!("{marker} {:<14} {} ({size} bytes)", event.stage, event.message),
        None => format!("{marker} {:<14} {}", event.stage, event.message),
    }
}

/// Render the behavior report as indented category lines, skipping empty
/// categories. Returns `None` when nothing matched at all.
pub fn format_behavior(report: &BehaviorReport) -> Option<String> {
    if report.is_empty() {
        return None;
    }
    let mut lines = Vec::new();
    for category in IndicatorCategory::ALL {
        let tokens = report.matched(category);
        if tokens.is_empty() {
            continue;
        }
        let joined = tokens.iter().cloned().collect::<Vec<_>>().join(", ");
        lines.push(format!("  - {}: {joined}", category.to_string().to_uppercase()));
    }
    Some(lines.join("\n"))
}
