//! Analyzer: one grounded reasoning call per chunk.
//!
//! Builds the prompt with [`build_prompt`], sends it through
//! [`with_retry`], and parses the reply with [`parse_response`]. A reply
//! that breaks the response contract still counts as analyzed (zero
//! findings plus a warning); only a failed call is an
//! [`AuditError::AnalysisFailed`].
//!
//! Templates from `[analysis].prompt_dir` are loaded once here and applied
//! to every prompt.

use std::sync::Arc;
use std::time::Duration;

use pillar_audit_core::analysis::{
    build_prompt, parse_response, ParsedResponse, PromptTemplates, ReasoningBackend,
    UnknownSeverityPolicy,
};
use pillar_audit_core::error::AuditError;
use pillar_audit_core::models::Chunk;
use pillar_audit_core::retrieve::RetrievedClause;

use crate::config::Config;
use crate::prompts::load_prompt_templates;
use crate::reasoning::create_reasoner;
use crate::retry::{with_retry, RetryPolicy};

pub struct Analyzer {
    reasoner: Arc<dyn ReasoningBackend>,
    policy: RetryPolicy,
    timeout: Duration,
    unknown_severity: UnknownSeverityPolicy,
    templates: PromptTemplates,
}

impl Analyzer {
    pub fn new(
        reasoner: Arc<dyn ReasoningBackend>,
        policy: RetryPolicy,
        timeout: Duration,
        unknown_severity: UnknownSeverityPolicy,
    ) -> Self {
        Self {
            reasoner,
            policy,
            timeout,
            unknown_severity,
            templates: PromptTemplates::default(),
        }
    }

    pub fn with_templates(mut self, templates: PromptTemplates) -> Self {
        self.templates = templates;
        self
    }

    /// Build the analyzer described by `[reasoning]`, `[retry]` and `[analysis]`.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let reasoning = config.reasoning()?;
        let templates = match &config.analysis.prompt_dir {
            Some(dir) => load_prompt_templates(dir)?,
            None => PromptTemplates::default(),
        };
        Ok(Self::new(
            Arc::from(create_reasoner(reasoning)?),
            RetryPolicy::from_config(&config.retry),
            Duration::from_secs(reasoning.timeout_secs),
            config.analysis.unknown_severity,
        )
        .with_templates(templates))
    }

    pub fn model_name(&self) -> &str {
        self.reasoner.model_name()
    }

    pub async fn analyze(
        &self,
        chunk: &Chunk,
        retrieved: &[RetrievedClause],
    ) -> Result<ParsedResponse, AuditError> {
        let prompt = build_prompt(chunk, retrieved, &self.templates);
        let reasoner = &self.reasoner;
        let prompt = prompt.as_str();

        let raw = with_retry(&self.policy, self.timeout, "analyze", || async move {
            reasoner.generate(prompt).await
        })
        .await
        .map_err(|e| {
            AuditError::AnalysisFailed(format!("{} ({})", e, chunk.address()))
        })?;

        let parsed = parse_response(chunk, retrieved, &raw, self.unknown_severity);
        for w in &parsed.warnings {
            tracing::warn!(
                chunk = %chunk.address(),
                file = %chunk.file_path,
                kind = ?w.kind,
                "{}",
                w.message
            );
        }
        tracing::debug!(
            chunk = %chunk.address(),
            findings = parsed.findings.len(),
            "chunk analyzed"
        );
        Ok(parsed)
    }
}
