use std::fs;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use peelback::{canonicalize_or_current, format_behavior, format_stage_event};

/// Layered-obfuscation recovery CLI.
///
/// This CLI is a thin wrapper around `peelback-core` (exposed in code as
/// `peelback_core`). All substantive logic lives in the library so it can be
/// tested thoroughly and reused from other frontends.
#[derive(Parser, Debug)]
#[command(
    name = "peelback",
    version,
    about = "Recover multi-layer obfuscated script payloads",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the full recovery pipeline on an obfuscated source file.
    ///
    /// Every intermediate artifact (decrypted bytes, resolved bytes,
    /// disassembly, summary, behavior report) is persisted under the output
    /// directory, along with a manifest and a run-history database.
    Deobfuscate {
        /// Path to the obfuscated source file.
        #[arg(long)]
        input: String,

        /// Output directory for stage artifacts.
        #[arg(long, default_value = "deobfuscated_output")]
        output: String,
    },

    /// Disassemble and summarize an already-recovered serialized code object.
    Inspect {
        /// Path to a file holding raw marshal bytes (e.g., a persisted
        /// `stage_03_resolved.bin`).
        #[arg(long)]
        input: String,
    },

    /// Classify a text file against the behavioral indicator categories.
    Classify {
        /// Path to the text to scan.
        #[arg(long)]
        input: String,
    },

    /// List recorded pipeline runs for an output directory.
    Runs {
        /// Output directory previously used by `deobfuscate`.
        #[arg(long, default_value = "deobfuscated_output")]
        output: String,

        /// Emit JSON instead of human-readable text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Deobfuscate { input, output } => deobfuscate_command(&input, &output),
        Command::Inspect { input } => inspect_command(&input),
        Command::Classify { input } => classify_command(&input),
        Command::Runs { output, json } => runs_command(&output, json),
    }
}

/// Run the pipeline and narrate its stage events.
fn deobfuscate_command(input: &str, output: &str) -> Result<()> {
    let input_path = canonicalize_or_current(input)?;
    let out_dir = canonicalize_or_current(output)?;

    println!("peelback v{}", peelback_core::version());
    println!("[*] Input file: {}", input_path.display());
    println!("[*] Output directory: {}\n", out_dir.display());

    let report = peelback_core::run_pipeline(&input_path, &out_dir);

    for event in &report.stages {
        println!("{}", format_stage_event(event));
    }

    if let Some(behavior) = report.behavior.as_ref().and_then(format_behavior) {
        println!("\n[*] Behavioral Analysis:");
        println!("{behavior}");
    }

    println!();
    if report.success {
        println!("[+] Deobfuscation complete!");
        println!("[+] Results saved to: {}", out_dir.display());
        Ok(())
    } else {
        let stage = report.failed_stage.as_deref().unwrap_or("unknown");
        bail!("pipeline failed at stage `{stage}`; {} artifacts persisted", report.artifacts.len())
    }
}

/// Load, disassemble, and summarize a raw marshal buffer.
fn inspect_command(input: &str) -> Result<()> {
    let path = canonicalize_or_current(input)?;
    let bytes =
        fs::read(&path).with_context(|| format!("Failed to read {}", path.display()))?;

    let code = peelback_core::marshal::loads_code(&bytes)
        .with_context(|| format!("{} does not deserialize as a code object", path.display()))?;

    println!("{}", peelback_core::disasm::disassemble(&code));
    println!("{}", peelback_core::disasm::structural_summary(&code));
    Ok(())
}

/// Classify a text file against the indicator categories.
fn classify_command(input: &str) -> Result<()> {
    let path = canonicalize_or_current(input)?;
    let text = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let report = peelback_core::classify::classify(&text);
    match format_behavior(&report) {
        Some(lines) => {
            println!("[*] Behavioral Analysis:");
            println!("{lines}");
        }
        None => println!("[*] No indicator categories matched."),
    }
    Ok(())
}

/// List recorded runs from the output directory's run database.
fn runs_command(output: &str, json: bool) -> Result<()> {
    let out_dir = canonicalize_or_current(output)?;
    let db_path = out_dir.join("runs.db");
    if !db_path.is_file() {
        bail!("No run database at {}", db_path.display());
    }

    let db = peelback_core::db::RunDb::open(&db_path)
        .with_context(|| format!("Failed to open {}", db_path.display()))?;
    let runs = db.list_runs(None).context("Failed to list runs")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&runs)?);
        return Ok(());
    }

    if runs.is_empty() {
        println!("No runs recorded.");
        return Ok(());
    }
    for run in runs {
        let chain = run.chain.as_deref().unwrap_or("-");
        println!(
            "{}  {}  chain: {}  decrypted: {}  ({} .. {})",
            run.status, run.input_path, chain, run.decrypted, run.started_at, run.finished_at
        );
    }
    Ok(())
}
