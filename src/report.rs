//! Report sink: JSON file, human summary, exit code.

use anyhow::{Context, Result};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use pillar_audit_core::models::{AnalysisReport, OverallStatus, Pillar};

/// Exit code for a PASS.
pub const EXIT_PASS: i32 = 0;
/// Exit code when at least one HIGH finding exists.
pub const EXIT_FAIL: i32 = 1;
/// Exit code for configuration errors, index build failure, or cancellation.
pub const EXIT_FATAL: i32 = 2;
/// Exit code for a PASS with nothing analyzed under `--require-coverage`.
pub const EXIT_NO_COVERAGE: i32 = 3;

/// `results_YYYYmmdd_HHMMSS.json` in local time.
pub fn default_output_name() -> PathBuf {
    PathBuf::from(
        chrono::Local::now()
            .format("results_%Y%m%d_%H%M%S.json")
            .to_string(),
    )
}

pub fn to_json(report: &AnalysisReport) -> Result<String> {
    serde_json::to_string_pretty(report).context("Failed to serialize report")
}

pub fn write_report(report: &AnalysisReport, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
    }
    let json = to_json(report)?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write report: {}", path.display()))?;
    Ok(())
}

pub fn exit_code(report: &AnalysisReport, require_coverage: bool) -> i32 {
    match report.overall_status {
        OverallStatus::Fail => EXIT_FAIL,
        OverallStatus::Pass if require_coverage && report.analyzed_nothing() => EXIT_NO_COVERAGE,
        OverallStatus::Pass => EXIT_PASS,
    }
}

/// Plain-text summary for stdout.
pub fn render_summary(report: &AnalysisReport) -> String {
    let mut out = String::new();
    let status = match report.overall_status {
        OverallStatus::Pass => "PASS",
        OverallStatus::Fail => "FAIL",
    };

    let _ = writeln!(out, "audit {}", status);
    let _ = writeln!(
        out,
        "  files: {}  chunks: {} analyzed / {} total  skipped: {}",
        report.files_scanned,
        report.chunks_analyzed,
        report.chunks_total,
        report.skipped.len()
    );
    let _ = writeln!(
        out,
        "  guidance: {} ({})  embedding: {}  reasoning: {}",
        report.corpus_version,
        report.corpus_hash.get(..12).unwrap_or(&report.corpus_hash),
        report.embedding_model,
        report.reasoning_model
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "  {:<24} {:>5} {:>7} {:>5}", "PILLAR", "HIGH", "MEDIUM", "LOW");
    for pillar in Pillar::ALL {
        let counts = report.pillar_summary.get(&pillar).copied().unwrap_or_default();
        let _ = writeln!(
            out,
            "  {:<24} {:>5} {:>7} {:>5}",
            pillar.display_name(),
            counts.high,
            counts.medium,
            counts.low
        );
    }

    if !report.findings.is_empty() {
        let _ = writeln!(out);
        for f in &report.findings {
            let refs: Vec<&str> = f.guidance_refs.iter().map(|s| s.as_str()).collect();
            let _ = writeln!(
                out,
                "  [{}] {}: {}",
                f.severity,
                f.pillar.display_name(),
                f.description
            );
            let _ = writeln!(out, "      fix: {}", f.recommendation);
            if !refs.is_empty() {
                let _ = writeln!(out, "      refs: {}", refs.join(", "));
            }
        }
    }

    if !report.warnings.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "  warnings: {}", report.warnings.len());
        for w in &report.warnings {
            let _ = writeln!(out, "    {:?} {}: {}", w.kind, w.subject, w.message);
        }
    }
    out
}
