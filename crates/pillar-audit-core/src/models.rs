//! Core data models used throughout Pillar Audit.
//!
//! These types represent the chunks, embeddings, guidance clauses, findings,
//! and reports that flow through the analysis pipeline. Everything here is
//! immutable once built; stages produce new values instead of editing old
//! ones.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::embedding::cosine_similarity;
use crate::error::{AuditError, Result};

/// One of the six architectural best-practice pillars.
///
/// The declaration order is the fixed report order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Pillar {
    OperationalExcellence,
    Security,
    Reliability,
    PerformanceEfficiency,
    CostOptimization,
    Sustainability,
}

impl Pillar {
    pub const ALL: [Pillar; 6] = [
        Pillar::OperationalExcellence,
        Pillar::Security,
        Pillar::Reliability,
        Pillar::PerformanceEfficiency,
        Pillar::CostOptimization,
        Pillar::Sustainability,
    ];

    /// Human-readable name, e.g. `"Operational Excellence"`.
    pub fn display_name(&self) -> &'static str {
        match self {
            Pillar::OperationalExcellence => "Operational Excellence",
            Pillar::Security => "Security",
            Pillar::Reliability => "Reliability",
            Pillar::PerformanceEfficiency => "Performance Efficiency",
            Pillar::CostOptimization => "Cost Optimization",
            Pillar::Sustainability => "Sustainability",
        }
    }

    /// Parse a pillar name leniently: case, spaces, `_` and `-` are ignored,
    /// so `"Cost Optimization"`, `"cost_optimization"` and
    /// `"CostOptimization"` all resolve.
    pub fn parse(raw: &str) -> Option<Pillar> {
        let key: String = raw
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match key.as_str() {
            "operationalexcellence" => Some(Pillar::OperationalExcellence),
            "security" => Some(Pillar::Security),
            "reliability" => Some(Pillar::Reliability),
            "performanceefficiency" => Some(Pillar::PerformanceEfficiency),
            "costoptimization" => Some(Pillar::CostOptimization),
            "sustainability" => Some(Pillar::Sustainability),
            _ => None,
        }
    }
}

impl fmt::Display for Pillar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Finding severity. Ordered `Low < Medium < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    /// Map a model's categorical token to a severity.
    ///
    /// Case-insensitive. Returns `None` for tokens outside the fixed table;
    /// callers decide the fallback.
    pub fn from_token(token: &str) -> Option<Severity> {
        match token.trim().to_ascii_lowercase().as_str() {
            "high" | "critical" => Some(Severity::High),
            "medium" | "moderate" => Some(Severity::Medium),
            "low" | "info" | "informational" => Some(Severity::Low),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inclusive 1-based line span within a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRange {
    pub start: usize,
    pub end: usize,
}

/// One analyzable unit of infrastructure definition: a declared block, or
/// one part of an oversized block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// SHA-256 of `(file_path, resource_name, source_text)`.
    pub id: String,
    /// Path relative to the scanned root, `/`-separated.
    pub file_path: String,
    /// `aws_s3_bucket`, `data.aws_iam_policy_document`, `module`, `provider`.
    pub resource_type: String,
    pub resource_name: String,
    pub source_text: String,
    /// Referenced variables, locals, and outputs; not part of the identity.
    pub context_text: String,
    pub line_range: LineRange,
    /// `(index, total)` when an oversized block was split, 1-based index.
    pub part: Option<(usize, usize)>,
}

impl Chunk {
    /// Terraform-style address, e.g. `aws_s3_bucket.logs` or `module.vpc`.
    pub fn address(&self) -> String {
        match self.resource_type.as_str() {
            "module" => format!("module.{}", self.resource_name),
            "provider" => format!("provider.{}", self.resource_name),
            other => format!("{}.{}", other, self.resource_name),
        }
    }

    /// Key identifying the declared resource across split parts: the
    /// containing directory plus the address.
    pub fn resource_key(&self) -> String {
        let dir = match self.file_path.rfind('/') {
            Some(pos) => &self.file_path[..pos],
            None => "",
        };
        format!("{}::{}", dir, self.address())
    }

    /// Text submitted to the embedding model.
    pub fn embedding_text(&self) -> String {
        if self.context_text.is_empty() {
            self.source_text.clone()
        } else {
            format!("{}\n\n{}", self.source_text, self.context_text)
        }
    }
}

/// A vector produced by one embedding model for one owner (chunk or clause).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub owner_id: String,
    pub vector: Vec<f32>,
    pub model_version: String,
}

impl Embedding {
    /// Cosine similarity against another embedding from the same model.
    ///
    /// Comparing embeddings from different models is an error.
    pub fn similarity(&self, other: &Embedding) -> Result<f32> {
        if self.model_version != other.model_version {
            return Err(AuditError::ModelVersionMismatch {
                expected: self.model_version.clone(),
                actual: other.model_version.clone(),
            });
        }
        Ok(cosine_similarity(&self.vector, &other.vector))
    }
}

/// One atomic best-practice statement belonging to a pillar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuidanceClause {
    pub id: String,
    pub pillar: Pillar,
    pub text: String,
    pub source_reference: String,
}

/// One detected compliance issue tied to a chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub chunk_id: String,
    pub pillar: Pillar,
    pub severity: Severity,
    pub description: String,
    pub recommendation: String,
    pub guidance_refs: BTreeSet<String>,
}

/// Finding counts per severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub low: usize,
    pub medium: usize,
    pub high: usize,
}

impl SeverityCounts {
    pub fn record(&mut self, severity: Severity) {
        match severity {
            Severity::Low => self.low += 1,
            Severity::Medium => self.medium += 1,
            Severity::High => self.high += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.low + self.medium + self.high
    }
}

pub type PillarSummary = BTreeMap<Pillar, SeverityCounts>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OverallStatus {
    Pass,
    Fail,
}

/// Category of a recorded, non-fatal problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    /// A file failed to tokenize and was skipped.
    ParseError,
    /// A file could not be read as UTF-8 text.
    SourceUnreadable,
    /// A chunk could not be embedded and was skipped.
    EmbeddingUnavailable,
    /// The reasoning call failed for a chunk.
    AnalysisFailed,
    /// The reasoning model's output broke the response contract.
    SchemaInvalid,
    /// A severity token outside the fixed table was seen.
    UnknownSeverity,
    /// The model cited guidance that was not retrieved for the chunk.
    UnknownGuidanceRef,
    /// A finding broke a report invariant and was dropped.
    InvariantViolation,
}

/// A recorded non-fatal problem. `subject` is a file path or chunk id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Warning {
    pub subject: String,
    pub kind: WarningKind,
    pub message: String,
}

impl Warning {
    pub fn new(kind: WarningKind, subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            kind,
            message: message.into(),
        }
    }
}

/// A chunk excluded from analysis, listed so a verdict stays explainable.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SkippedChunk {
    pub chunk_id: String,
    pub file_path: String,
    pub resource: String,
    pub reason: WarningKind,
    pub message: String,
}

/// The terminal artifact of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub findings: Vec<Finding>,
    pub pillar_summary: PillarSummary,
    pub overall_status: OverallStatus,
    pub generated_at: DateTime<Utc>,
    pub files_scanned: usize,
    pub chunks_total: usize,
    pub chunks_analyzed: usize,
    pub skipped: Vec<SkippedChunk>,
    pub warnings: Vec<Warning>,
    pub corpus_version: String,
    pub corpus_hash: String,
    pub embedding_model: String,
    pub reasoning_model: String,
}

impl AnalysisReport {
    /// True when nothing was analyzed, so a PASS carries no information.
    pub fn analyzed_nothing(&self) -> bool {
        self.chunks_analyzed == 0
    }

    pub fn high_count(&self) -> usize {
        self.pillar_summary.values().map(|c| c.high).sum()
    }
}
