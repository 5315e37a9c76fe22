//! Merge per-chunk results into the final [`AnalysisReport`].
//!
//! Runs single-threaded after every worker has finished. The steps are:
//!
//! 1. Enforce report invariants: a finding must belong to an analyzed chunk
//!    and cite only clauses present in the guidance index. A finding for an
//!    unanalyzed chunk is dropped; a citation missing from the index is
//!    removed from the finding. Both raise a
//!    [`WarningKind::InvariantViolation`] warning.
//! 2. Deduplicate findings on `(resource, pillar, normalized description)`.
//!    Split parts of one block share a resource, so the same issue reported
//!    for two parts collapses into one finding.
//! 3. Order findings by pillar, descending severity, then chunk id.
//! 4. Count severities per pillar and derive the verdict: FAIL iff any
//!    finding is HIGH.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};

use crate::guidance::GuidanceIndex;
use crate::models::{
    AnalysisReport, Chunk, Finding, OverallStatus, Pillar, PillarSummary, Severity,
    SeverityCounts, SkippedChunk, Warning, WarningKind,
};

/// What happened to one chunk.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkOutcome {
    /// The chunk reached the reasoning model and its reply was parsed
    /// (possibly into zero findings).
    Analyzed {
        findings: Vec<Finding>,
        warnings: Vec<Warning>,
    },
    /// The chunk was excluded from analysis.
    Skipped { reason: WarningKind, message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChunkResult {
    pub chunk: Chunk,
    pub outcome: ChunkOutcome,
}

/// Run-level facts carried into the report.
#[derive(Debug, Clone)]
pub struct RunInfo {
    pub files_scanned: usize,
    pub corpus_version: String,
    pub corpus_hash: String,
    pub embedding_model: String,
    pub reasoning_model: String,
    pub generated_at: DateTime<Utc>,
    /// Warnings raised before chunk processing (parse errors, unreadable files).
    pub warnings: Vec<Warning>,
}

/// Lowercase, turn non-alphanumerics into spaces, collapse whitespace.
pub fn normalize_description(text: &str) -> String {
    let mapped: String = text
        .chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_lowercase().next().unwrap_or(c)
            } else {
                ' '
            }
        })
        .collect();
    mapped.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn aggregate(results: Vec<ChunkResult>, index: &GuidanceIndex, info: RunInfo) -> AnalysisReport {
    let chunks_total = results.len();
    let mut warnings = info.warnings;
    let mut skipped = Vec::new();
    let mut candidates = Vec::new();
    let mut resource_of: HashMap<String, String> = HashMap::new();
    let mut chunks_analyzed = 0;

    for result in results {
        match result.outcome {
            ChunkOutcome::Analyzed {
                findings,
                warnings: chunk_warnings,
            } => {
                chunks_analyzed += 1;
                resource_of.insert(result.chunk.id.clone(), result.chunk.resource_key());
                warnings.extend(chunk_warnings);
                candidates.extend(findings);
            }
            ChunkOutcome::Skipped { reason, message } => {
                warnings.push(Warning::new(reason, &result.chunk.id, message.clone()));
                skipped.push(SkippedChunk {
                    chunk_id: result.chunk.id.clone(),
                    file_path: result.chunk.file_path.clone(),
                    resource: result.chunk.address(),
                    reason,
                    message,
                });
            }
        }
    }

    // Invariants, then dedup.
    let mut merged: BTreeMap<(String, Pillar, String), Finding> = BTreeMap::new();
    for mut finding in candidates {
        let Some(resource) = resource_of.get(&finding.chunk_id) else {
            warnings.push(Warning::new(
                WarningKind::InvariantViolation,
                &finding.chunk_id,
                "finding references a chunk that was not analyzed; dropped",
            ));
            continue;
        };
        let (kept, missing): (BTreeSet<String>, BTreeSet<String>) = finding
            .guidance_refs
            .into_iter()
            .partition(|id| index.contains(id));
        finding.guidance_refs = kept;
        if !missing.is_empty() {
            let missing: Vec<&str> = missing.iter().map(|s| s.as_str()).collect();
            warnings.push(Warning::new(
                WarningKind::InvariantViolation,
                &finding.chunk_id,
                format!(
                    "finding cites guidance missing from the index ({}); citation removed",
                    missing.join(", ")
                ),
            ));
        }

        let key = (
            resource.clone(),
            finding.pillar,
            normalize_description(&finding.description),
        );
        match merged.remove(&key) {
            Some(existing) => {
                merged.insert(key, merge(existing, finding));
            }
            None => {
                merged.insert(key, finding);
            }
        }
    }

    let mut findings: Vec<Finding> = merged.into_values().collect();
    findings.sort_by(|a, b| {
        a.pillar
            .cmp(&b.pillar)
            .then_with(|| b.severity.cmp(&a.severity))
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
            .then_with(|| a.description.cmp(&b.description))
    });

    let mut pillar_summary: PillarSummary = Pillar::ALL
        .iter()
        .map(|p| (*p, SeverityCounts::default()))
        .collect();
    for f in &findings {
        pillar_summary.entry(f.pillar).or_default().record(f.severity);
    }

    let overall_status = if findings.iter().any(|f| f.severity == Severity::High) {
        OverallStatus::Fail
    } else {
        OverallStatus::Pass
    };

    skipped.sort_by(|a, b| {
        a.file_path
            .cmp(&b.file_path)
            .then_with(|| a.resource.cmp(&b.resource))
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    let warnings: Vec<Warning> = warnings
        .into_iter()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    AnalysisReport {
        findings,
        pillar_summary,
        overall_status,
        generated_at: info.generated_at,
        files_scanned: info.files_scanned,
        chunks_total,
        chunks_analyzed,
        skipped,
        warnings,
        corpus_version: info.corpus_version,
        corpus_hash: info.corpus_hash,
        embedding_model: info.embedding_model,
        reasoning_model: info.reasoning_model,
    }
}

/// Combine two findings for the same issue into a new one.
fn merge(a: Finding, b: Finding) -> Finding {
    let severity = a.severity.max(b.severity);
    let (mut keep, other) = if a.chunk_id <= b.chunk_id { (a, b) } else { (b, a) };
    keep.severity = severity;
    keep.guidance_refs.extend(other.guidance_refs);
    keep
}
