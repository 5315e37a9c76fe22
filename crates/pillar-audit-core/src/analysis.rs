//! Grounded prompt construction and strict response parsing.
//!
//! The reasoning model is an untrusted producer. [`build_prompt`] asks it for
//! one JSON object; [`parse_response`] accepts exactly that shape and nothing
//! else. A response that breaks the contract yields zero findings and one
//! [`WarningKind::SchemaInvalid`] warning. Nothing is guessed.
//!
//! # Response contract
//!
//! ```json
//! {"findings": [
//!   {"pillar": "Security", "severity": "HIGH",
//!    "description": "...", "recommendation": "...",
//!    "guidance_refs": ["SEC-03"]}
//! ]}
//! ```
//!
//! A surrounding Markdown code fence is tolerated.
//!
//! # Templates
//!
//! [`PromptTemplates`] lets an operator replace the opening instruction and
//! add a review focus per pillar. `{code}` in a template expands to the
//! block source. The block, guidance, and response contract sections are
//! always generated.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProviderError;
use crate::models::{Chunk, Finding, Pillar, Severity, Warning, WarningKind};
use crate::retrieve::RetrievedClause;

/// An external generative model.
///
/// Like [`EmbeddingBackend`](crate::embedding::EmbeddingBackend),
/// implementations must keep throttling distinguishable from hard failures.
#[async_trait]
pub trait ReasoningBackend: Send + Sync {
    /// Model identifier recorded in the report.
    fn model_name(&self) -> &str;

    /// Complete `prompt`, returning the raw text of the reply.
    async fn generate(&self, prompt: &str) -> Result<String, ProviderError>;
}

/// What to do with a severity token outside the fixed table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownSeverityPolicy {
    Low,
    #[default]
    Medium,
    High,
    /// Drop the record.
    Reject,
}

impl UnknownSeverityPolicy {
    fn fallback(self) -> Option<Severity> {
        match self {
            UnknownSeverityPolicy::Low => Some(Severity::Low),
            UnknownSeverityPolicy::Medium => Some(Severity::Medium),
            UnknownSeverityPolicy::High => Some(Severity::High),
            UnknownSeverityPolicy::Reject => None,
        }
    }
}

/// Findings and warnings produced from one model reply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedResponse {
    pub findings: Vec<Finding>,
    pub warnings: Vec<Warning>,
}

const DEFAULT_PREAMBLE: &str = "You are a cloud architecture reviewer. Evaluate the Terraform \
                                block below against the AWS Well-Architected Framework pillars:";

/// Operator-supplied prompt text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptTemplates {
    /// Replaces the opening reviewer instruction.
    pub preamble: Option<String>,
    /// Review focus shown above each pillar's guidance.
    pub pillars: BTreeMap<Pillar, String>,
}

impl PromptTemplates {
    pub fn is_empty(&self) -> bool {
        self.preamble.is_none() && self.pillars.is_empty()
    }

    /// File stem for a pillar's template, e.g. `cost_optimization`.
    pub fn file_stem(pillar: Pillar) -> String {
        pillar.display_name().to_ascii_lowercase().replace(' ', "_")
    }
}

fn expand(template: &str, chunk: &Chunk) -> String {
    template.trim().replace("{code}", &chunk.source_text)
}

/// Build the grounded prompt for one chunk.
///
/// Retrieved clauses are grouped under their pillar in fixed pillar order;
/// pillars with nothing retrieved are listed as such so the model does not
/// invent guidance for them.
pub fn build_prompt(chunk: &Chunk, retrieved: &[RetrievedClause], templates: &PromptTemplates) -> String {
    let mut p = String::with_capacity(chunk.source_text.len() + 4096);

    match &templates.preamble {
        Some(preamble) => p.push_str(&expand(preamble, chunk)),
        None => p.push_str(DEFAULT_PREAMBLE),
    }
    p.push('\n');
    for pillar in Pillar::ALL {
        let _ = writeln!(p, "- {}", pillar.display_name());
    }

    p.push_str("\n## Block\n\n");
    let _ = writeln!(p, "File: {}", chunk.file_path);
    let _ = writeln!(p, "Type: {}", chunk.resource_type);
    let _ = writeln!(p, "Name: {}", chunk.resource_name);
    let _ = writeln!(
        p,
        "Lines: {}-{}",
        chunk.line_range.start, chunk.line_range.end
    );
    if let Some((index, total)) = chunk.part {
        let _ = writeln!(
            p,
            "Part: {} of {} (the block was split; judge only what is shown)",
            index, total
        );
    }
    p.push_str("\n```hcl\n");
    p.push_str(&chunk.source_text);
    p.push_str("\n```\n");

    if !chunk.context_text.is_empty() {
        p.push_str("\n## Referenced declarations\n\n```hcl\n");
        p.push_str(&chunk.context_text);
        p.push_str("\n```\n");
    }

    p.push_str("\n## Guidance\n\n");
    for pillar in Pillar::ALL {
        let _ = writeln!(p, "### {}", pillar.display_name());
        if let Some(focus) = templates.pillars.get(&pillar) {
            let _ = writeln!(p, "Focus: {}", expand(focus, chunk));
        }
        let mut any = false;
        for r in retrieved.iter().filter(|r| r.clause.pillar == pillar) {
            any = true;
            let _ = write!(p, "[{}] {}", r.clause.id, r.clause.text);
            if !r.clause.source_reference.is_empty() {
                let _ = write!(p, " ({})", r.clause.source_reference);
            }
            p.push('\n');
        }
        if !any {
            p.push_str("(no guidance retrieved)\n");
        }
        p.push('\n');
    }

    p.push_str(
        "## Instructions\n\n\
         Report only issues visible in the block or its referenced declarations. \
         Cite the guidance ids that support each finding. \
         Respond with a single JSON object and nothing else:\n\n\
         {\"findings\": [{\"pillar\": \"<one of the pillar names above>\", \
         \"severity\": \"HIGH|MEDIUM|LOW\", \
         \"description\": \"<what is wrong>\", \
         \"recommendation\": \"<how to fix it>\", \
         \"guidance_refs\": [\"<guidance id>\"]}]}\n\n\
         If there are no issues, respond with {\"findings\": []}.\n",
    );

    p
}

/// Parse a model reply for `chunk` against the response contract.
pub fn parse_response(
    chunk: &Chunk,
    retrieved: &[RetrievedClause],
    raw: &str,
    policy: UnknownSeverityPolicy,
) -> ParsedResponse {
    let records = match parse_records(raw) {
        Ok(records) => records,
        Err(reason) => {
            return ParsedResponse {
                findings: Vec::new(),
                warnings: vec![Warning::new(
                    WarningKind::SchemaInvalid,
                    &chunk.id,
                    reason,
                )],
            }
        }
    };

    let retrieved_ids: BTreeSet<&str> = retrieved.iter().map(|r| r.clause.id.as_str()).collect();
    let mut findings = Vec::new();
    let mut warnings = Vec::new();
    let mut unknown_refs: BTreeSet<String> = BTreeSet::new();

    for record in records {
        let severity = match Severity::from_token(&record.severity) {
            Some(s) => s,
            None => match policy.fallback() {
                Some(s) => {
                    warnings.push(Warning::new(
                        WarningKind::UnknownSeverity,
                        &chunk.id,
                        format!("severity '{}' mapped to {}", record.severity, s),
                    ));
                    s
                }
                None => {
                    warnings.push(Warning::new(
                        WarningKind::UnknownSeverity,
                        &chunk.id,
                        format!("severity '{}' rejected; finding dropped", record.severity),
                    ));
                    continue;
                }
            },
        };

        let mut refs = BTreeSet::new();
        for r in record.guidance_refs {
            if retrieved_ids.contains(r.as_str()) {
                refs.insert(r);
            } else {
                unknown_refs.insert(r);
            }
        }
        if refs.is_empty() {
            refs = retrieved
                .iter()
                .filter(|r| r.clause.pillar == record.pillar)
                .map(|r| r.clause.id.clone())
                .collect();
        }

        findings.push(Finding {
            chunk_id: chunk.id.clone(),
            pillar: record.pillar,
            severity,
            description: record.description,
            recommendation: record.recommendation,
            guidance_refs: refs,
        });
    }

    if !unknown_refs.is_empty() {
        let list: Vec<&str> = unknown_refs.iter().map(|s| s.as_str()).collect();
        warnings.push(Warning::new(
            WarningKind::UnknownGuidanceRef,
            &chunk.id,
            format!("dropped citations not retrieved for this block: {}", list.join(", ")),
        ));
    }

    ParsedResponse { findings, warnings }
}

/// One validated record, before severity and reference resolution.
#[derive(Debug)]
struct Record {
    pillar: Pillar,
    severity: String,
    description: String,
    recommendation: String,
    guidance_refs: Vec<String>,
}

fn strip_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (e.g. `json`) on the opening line.
    let rest = match rest.find('\n') {
        Some(pos) => &rest[pos + 1..],
        None => return trimmed,
    };
    match rest.trim_end().strip_suffix("```") {
        Some(body) => body.trim(),
        None => trimmed,
    }
}

fn parse_records(raw: &str) -> Result<Vec<Record>, String> {
    let body = strip_fence(raw);
    if body.is_empty() {
        return Err("empty response".into());
    }
    let value: Value =
        serde_json::from_str(body).map_err(|e| format!("response is not valid JSON: {}", e))?;

    let object = value
        .as_object()
        .ok_or_else(|| "response is not a JSON object".to_string())?;
    let findings = object
        .get("findings")
        .and_then(Value::as_array)
        .ok_or_else(|| "missing 'findings' array".to_string())?;

    findings
        .iter()
        .enumerate()
        .map(|(i, item)| parse_record(i, item))
        .collect()
}

fn parse_record(index: usize, item: &Value) -> Result<Record, String> {
    let obj = item
        .as_object()
        .ok_or_else(|| format!("findings[{}] is not an object", index))?;

    let field = |name: &str| -> Result<String, String> {
        match obj.get(name).and_then(Value::as_str) {
            Some(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
            _ => Err(format!(
                "findings[{}].{} must be a non-empty string",
                index, name
            )),
        }
    };

    let pillar_name = field("pillar")?;
    let pillar = Pillar::parse(&pillar_name)
        .ok_or_else(|| format!("findings[{}].pillar '{}' is not a pillar", index, pillar_name))?;

    let guidance_refs = match obj.get("guidance_refs") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_str().map(|s| s.trim().to_string()).ok_or_else(|| {
                    format!("findings[{}].guidance_refs must contain strings", index)
                })
            })
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => {
            return Err(format!(
                "findings[{}].guidance_refs must be an array",
                index
            ))
        }
    };

    Ok(Record {
        pillar,
        severity: field("severity")?,
        description: field("description")?,
        recommendation: field("recommendation")?,
        guidance_refs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GuidanceClause, LineRange};

    fn chunk() -> Chunk {
        Chunk {
            id: "chunk-1".into(),
            file_path: "infra/s3.tf".into(),
            resource_type: "aws_s3_bucket".into(),
            resource_name: "logs".into(),
            source_text: "resource \"aws_s3_bucket\" \"logs\" {\n  bucket = \"logs\"\n}".into(),
            context_text: String::new(),
            line_range: LineRange { start: 3, end: 5 },
            part: None,
        }
    }

    fn retrieved(id: &str, pillar: Pillar) -> RetrievedClause {
        RetrievedClause {
            clause: GuidanceClause {
                id: id.into(),
                pillar,
                text: format!("{} text", id),
                source_reference: "https://docs.aws.amazon.com/wellarchitected/".into(),
            },
            score: 0.9,
        }
    }

    fn guidance() -> Vec<RetrievedClause> {
        vec![
            retrieved("SEC-01", Pillar::Security),
            retrieved("SEC-02", Pillar::Security),
            retrieved("REL-01", Pillar::Reliability),
        ]
    }

    fn parse(raw: &str) -> ParsedResponse {
        parse_response(&chunk(), &guidance(), raw, UnknownSeverityPolicy::Medium)
    }

    #[test]
    fn test_prompt_contains_block_and_grouped_guidance() {
        let prompt = build_prompt(&chunk(), &guidance(), &PromptTemplates::default());
        assert!(prompt.starts_with("You are a cloud architecture reviewer."));
        assert!(prompt.contains("File: infra/s3.tf"));
        assert!(prompt.contains("Lines: 3-5"));
        assert!(prompt.contains("bucket = \"logs\""));
        let sec = prompt.find("### Security").unwrap();
        let rel = prompt.find("### Reliability").unwrap();
        let sec1 = prompt.find("[SEC-01]").unwrap();
        assert!(sec < sec1 && sec1 < rel);
        assert!(prompt.contains("### Sustainability\n(no guidance retrieved)"));
        assert!(prompt.contains("{\"findings\": []}"));
    }

    #[test]
    fn test_templates_replace_preamble_and_add_pillar_focus() {
        let mut templates = PromptTemplates {
            preamble: Some("You audit storage for a bank.\n".into()),
            ..Default::default()
        };
        templates.pillars.insert(
            Pillar::Security,
            "Check encryption and public access in:\n{code}".into(),
        );
        let prompt = build_prompt(&chunk(), &guidance(), &templates);

        assert!(prompt.starts_with("You audit storage for a bank.\n- Operational Excellence"));
        assert!(!prompt.contains("cloud architecture reviewer"));
        let focus = prompt.find("Focus: Check encryption").unwrap();
        let sec = prompt.find("### Security").unwrap();
        let sec1 = prompt.find("[SEC-01]").unwrap();
        assert!(sec < focus && focus < sec1);
        assert!(prompt[focus..sec1].contains("bucket = \"logs\""));
        assert!(!prompt.contains("{code}"));
        // the response contract is always present
        assert!(prompt.contains("{\"findings\": []}"));
        assert_eq!(PromptTemplates::file_stem(Pillar::CostOptimization), "cost_optimization");
    }

    #[test]
    fn test_valid_response() {
        let raw = r#"{"findings": [
            {"pillar": "Security", "severity": "high",
             "description": "Bucket is not encrypted",
             "recommendation": "Enable SSE-KMS",
             "guidance_refs": ["SEC-02"]}
        ]}"#;
        let parsed = parse(raw);
        assert!(parsed.warnings.is_empty());
        assert_eq!(parsed.findings.len(), 1);
        let f = &parsed.findings[0];
        assert_eq!(f.chunk_id, "chunk-1");
        assert_eq!(f.pillar, Pillar::Security);
        assert_eq!(f.severity, Severity::High);
        assert_eq!(f.guidance_refs.iter().collect::<Vec<_>>(), vec!["SEC-02"]);
    }

    #[test]
    fn test_empty_findings() {
        let parsed = parse("{\"findings\": []}");
        assert!(parsed.findings.is_empty());
        assert!(parsed.warnings.is_empty());
    }

    #[test]
    fn test_fenced_response() {
        let raw = "```json\n{\"findings\": [{\"pillar\": \"reliability\", \"severity\": \"Low\", \
                   \"description\": \"d\", \"recommendation\": \"r\"}]}\n```";
        let parsed = parse(raw);
        assert_eq!(parsed.findings.len(), 1);
        assert_eq!(parsed.findings[0].pillar, Pillar::Reliability);
    }

    #[test]
    fn test_schema_invalid_inputs_yield_one_warning() {
        let cases = [
            "",
            "The bucket looks fine to me.",
            "[]",
            "{\"issues\": []}",
            "{\"findings\": [\"x\"]}",
            "{\"findings\": [{\"pillar\": \"Security\", \"severity\": \"HIGH\", \"description\": \"\", \"recommendation\": \"r\"}]}",
            "{\"findings\": [{\"pillar\": \"Usability\", \"severity\": \"HIGH\", \"description\": \"d\", \"recommendation\": \"r\"}]}",
            "{\"findings\": [{\"pillar\": \"cost\", \"severity\": \"LOW\", \"description\": \"d\", \"recommendation\": \"r\"}]}",
            "{\"findings\": [{\"pillar\": \"Security\", \"severity\": \"HIGH\", \"description\": \"d\", \"recommendation\": \"r\", \"guidance_refs\": \"SEC-01\"}]}",
        ];
        for raw in cases {
            let parsed = parse(raw);
            assert!(parsed.findings.is_empty(), "{raw}");
            assert_eq!(parsed.warnings.len(), 1, "{raw}");
            assert_eq!(parsed.warnings[0].kind, WarningKind::SchemaInvalid);
            assert_eq!(parsed.warnings[0].subject, "chunk-1");
        }
    }

    #[test]
    fn test_one_bad_record_invalidates_response() {
        let raw = r#"{"findings": [
            {"pillar": "Security", "severity": "HIGH", "description": "d", "recommendation": "r"},
            {"pillar": "Security", "severity": "HIGH", "description": "d"}
        ]}"#;
        let parsed = parse(raw);
        assert!(parsed.findings.is_empty());
        assert_eq!(parsed.warnings[0].kind, WarningKind::SchemaInvalid);
    }

    #[test]
    fn test_unknown_severity_follows_policy() {
        let raw = r#"{"findings": [{"pillar": "Security", "severity": "severe",
            "description": "d", "recommendation": "r"}]}"#;

        let parsed = parse(raw);
        assert_eq!(parsed.findings[0].severity, Severity::Medium);
        assert_eq!(parsed.warnings.len(), 1);
        assert_eq!(parsed.warnings[0].kind, WarningKind::UnknownSeverity);

        let high = parse_response(&chunk(), &guidance(), raw, UnknownSeverityPolicy::High);
        assert_eq!(high.findings[0].severity, Severity::High);

        let rejected = parse_response(&chunk(), &guidance(), raw, UnknownSeverityPolicy::Reject);
        assert!(rejected.findings.is_empty());
        assert_eq!(rejected.warnings[0].kind, WarningKind::UnknownSeverity);
    }

    #[test]
    fn test_unretrieved_refs_dropped_with_single_warning() {
        let raw = r#"{"findings": [
            {"pillar": "Security", "severity": "HIGH", "description": "a", "recommendation": "r",
             "guidance_refs": ["SEC-01", "SEC-99"]},
            {"pillar": "Security", "severity": "LOW", "description": "b", "recommendation": "r",
             "guidance_refs": ["COST-07"]}
        ]}"#;
        let parsed = parse(raw);
        assert_eq!(parsed.findings.len(), 2);
        assert_eq!(
            parsed.findings[0].guidance_refs.iter().collect::<Vec<_>>(),
            vec!["SEC-01"]
        );
        // nothing valid left: falls back to the pillar's retrieved clauses
        assert_eq!(
            parsed.findings[1].guidance_refs.iter().collect::<Vec<_>>(),
            vec!["SEC-01", "SEC-02"]
        );
        assert_eq!(parsed.warnings.len(), 1);
        assert_eq!(parsed.warnings[0].kind, WarningKind::UnknownGuidanceRef);
        assert!(parsed.warnings[0].message.contains("COST-07"));
        assert!(parsed.warnings[0].message.contains("SEC-99"));
    }

    #[test]
    fn test_missing_refs_fall_back_to_pillar() {
        let raw = r#"{"findings": [{"pillar": "Sustainability", "severity": "LOW",
            "description": "d", "recommendation": "r"}]}"#;
        let parsed = parse(raw);
        assert!(parsed.warnings.is_empty());
        assert!(parsed.findings[0].guidance_refs.is_empty());
    }
}
