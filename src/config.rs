//! TOML configuration.
//!
//! Every table is optional. `[embedding]` and `[reasoning]` are only
//! required by commands that contact a provider; [`Config::embedding`] and
//! [`Config::reasoning`] raise a configuration error when they are absent.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use pillar_audit_core::analysis::UnknownSeverityPolicy;
use pillar_audit_core::error::AuditError;
use pillar_audit_core::retrieve::RetrievalScope;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub guidance: GuidanceConfig,
    #[serde(default, rename = "embedding")]
    pub embedding_section: Option<EmbeddingConfig>,
    #[serde(default, rename = "reasoning")]
    pub reasoning_section: Option<ReasoningConfig>,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct GuidanceConfig {
    /// Corpus file; the built-in corpus is used when unset.
    #[serde(default)]
    pub corpus: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct EmbeddingConfig {
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

fn default_batch_size() -> usize {
    64
}
fn default_embedding_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct ReasoningConfig {
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_reasoning_timeout")]
    pub timeout_secs: u64,
    /// AWS region for `bedrock`.
    #[serde(default)]
    pub region: Option<String>,
    /// AWS shared-config profile for `bedrock`; `--profile` overrides it.
    #[serde(default)]
    pub profile: Option<String>,
}

fn default_max_tokens() -> u32 {
    4000
}
fn default_reasoning_timeout() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: true,
        }
    }
}

fn default_max_attempts() -> u32 {
    5
}
fn default_base_delay_ms() -> u64 {
    1000
}
fn default_max_delay_ms() -> u64 {
    32_000
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default = "default_scope")]
    pub scope: RetrievalScope,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            scope: default_scope(),
        }
    }
}

fn default_k() -> usize {
    3
}
fn default_scope() -> RetrievalScope {
    RetrievalScope::PerPillar
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_chunk_tokens(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
        }
    }
}

fn default_chunk_tokens() -> usize {
    1500
}
fn default_include_globs() -> Vec<String> {
    vec!["**/*.tf".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

fn default_concurrency() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct AnalysisConfig {
    #[serde(default)]
    pub unknown_severity: UnknownSeverityPolicy,
    /// Directory of prompt templates: `preamble.txt` and `<pillar>.txt`,
    /// e.g. `cost_optimization.txt`.
    #[serde(default)]
    pub prompt_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    #[serde(default = "default_cache_path")]
    pub path: PathBuf,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: default_cache_path(),
            enabled: true,
        }
    }
}

fn default_cache_path() -> PathBuf {
    PathBuf::from(".pillar/cache.sqlite")
}

impl Config {
    /// The `[embedding]` table, or a configuration error.
    pub fn embedding(&self) -> Result<&EmbeddingConfig> {
        self.embedding_section
            .as_ref()
            .ok_or_else(|| configuration("missing [embedding] table").into())
    }

    /// The `[reasoning]` table, or a configuration error.
    pub fn reasoning(&self) -> Result<&ReasoningConfig> {
        self.reasoning_section
            .as_ref()
            .ok_or_else(|| configuration("missing [reasoning] table").into())
    }

    /// Check ranges and provider names. Called by [`load_config`].
    pub fn validate(&self) -> Result<(), AuditError> {
        if self.chunking.max_tokens == 0 {
            return Err(configuration("chunking.max_tokens must be > 0"));
        }
        if self.chunking.include_globs.is_empty() {
            return Err(configuration("chunking.include_globs must not be empty"));
        }
        if !(1..=20).contains(&self.retrieval.k) {
            return Err(configuration("retrieval.k must be in 1..=20"));
        }
        if !(1..=64).contains(&self.pipeline.concurrency) {
            return Err(configuration("pipeline.concurrency must be in 1..=64"));
        }
        if self.retry.max_attempts == 0 {
            return Err(configuration("retry.max_attempts must be >= 1"));
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(configuration(
                "retry.max_delay_ms must be >= retry.base_delay_ms",
            ));
        }

        if let Some(e) = &self.embedding_section {
            match e.provider.as_str() {
                "openai" | "ollama" | "local" => {}
                other => {
                    return Err(configuration(format!(
                        "unknown embedding provider: '{}'. Must be openai, ollama, or local.",
                        other
                    )))
                }
            }
            if e.model.trim().is_empty() {
                return Err(configuration("embedding.model must not be empty"));
            }
            if e.dims == Some(0) {
                return Err(configuration("embedding.dims must be > 0"));
            }
            if e.batch_size == 0 {
                return Err(configuration("embedding.batch_size must be > 0"));
            }
            if e.timeout_secs == 0 {
                return Err(configuration("embedding.timeout_secs must be > 0"));
            }
        }

        if let Some(r) = &self.reasoning_section {
            match r.provider.as_str() {
                "anthropic" | "openai" | "ollama" | "bedrock" => {}
                other => {
                    return Err(configuration(format!(
                        "unknown reasoning provider: '{}'. Must be anthropic, openai, ollama, or bedrock.",
                        other
                    )))
                }
            }
            if r.model.trim().is_empty() {
                return Err(configuration("reasoning.model must not be empty"));
            }
            if r.max_tokens == 0 {
                return Err(configuration("reasoning.max_tokens must be > 0"));
            }
            if !(0.0..=2.0).contains(&r.temperature) {
                return Err(configuration("reasoning.temperature must be in [0.0, 2.0]"));
            }
            if r.timeout_secs == 0 {
                return Err(configuration("reasoning.timeout_secs must be > 0"));
            }
        }

        Ok(())
    }
}

fn configuration(message: impl Into<String>) -> AuditError {
    AuditError::Configuration(message.into())
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
        .with_context(|| format!("Invalid config file: {}", path.display()))
}

/// Load `path` when it exists; otherwise defaults. Used by commands that
/// work offline.
pub fn load_config_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        Ok(Config::default())
    }
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content)
        .map_err(|e| configuration(format!("failed to parse config: {}", e)))?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
[embedding]
provider = "openai"
model = "text-embedding-3-small"
dims = 1536

[reasoning]
provider = "anthropic"
model = "claude-3-7-sonnet-latest"

[retrieval]
k = 5
scope = "global"

[analysis]
unknown_severity = "reject"
prompt_dir = "prompts"
"#;

    #[test]
    fn test_defaults_without_tables() {
        let cfg = parse_config("").unwrap();
        assert_eq!(cfg.chunking.max_tokens, 1500);
        assert_eq!(cfg.chunking.include_globs, vec!["**/*.tf"]);
        assert_eq!(cfg.retrieval.k, 3);
        assert_eq!(cfg.retrieval.scope, RetrievalScope::PerPillar);
        assert_eq!(cfg.pipeline.concurrency, 4);
        assert_eq!(cfg.retry.max_attempts, 5);
        assert_eq!(cfg.analysis.unknown_severity, UnknownSeverityPolicy::Medium);
        assert!(cfg.cache.enabled);
        assert!(cfg.embedding().is_err());
        assert!(cfg.reasoning().is_err());
    }

    #[test]
    fn test_full_config() {
        let cfg = parse_config(FULL).unwrap();
        let e = cfg.embedding().unwrap();
        assert_eq!(e.provider, "openai");
        assert_eq!(e.batch_size, 64);
        assert_eq!(e.timeout_secs, 30);
        let r = cfg.reasoning().unwrap();
        assert_eq!(r.max_tokens, 4000);
        assert_eq!(r.temperature, 0.0);
        assert_eq!(cfg.retrieval.scope, RetrievalScope::Global);
        assert_eq!(cfg.analysis.unknown_severity, UnknownSeverityPolicy::Reject);
        assert_eq!(cfg.analysis.prompt_dir, Some(PathBuf::from("prompts")));
    }

    fn config_error(content: &str) -> String {
        let err = parse_config(content).unwrap_err();
        match err.downcast_ref::<AuditError>() {
            Some(AuditError::Configuration(msg)) => msg.clone(),
            other => panic!("expected configuration error, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_out_of_range_values() {
        assert!(config_error("[retrieval]\nk = 0").contains("retrieval.k"));
        assert!(config_error("[retrieval]\nk = 21").contains("retrieval.k"));
        assert!(config_error("[pipeline]\nconcurrency = 0").contains("concurrency"));
        assert!(config_error("[chunking]\nmax_tokens = 0").contains("max_tokens"));
        assert!(config_error("[retry]\nmax_attempts = 0").contains("max_attempts"));
    }

    #[test]
    fn test_rejects_unknown_provider() {
        let msg = config_error("[embedding]\nprovider = \"bedrock\"\nmodel = \"x\"");
        assert!(msg.contains("bedrock"));
        let msg = config_error("[reasoning]\nprovider = \"vertex\"\nmodel = \"x\"");
        assert!(msg.contains("vertex"));
    }

    #[test]
    fn test_bedrock_reasoning() {
        let cfg = parse_config(
            "[reasoning]\nprovider = \"bedrock\"\nmodel = \"anthropic.claude-3-5-sonnet-20240620-v1:0\"\n\
             region = \"eu-west-1\"\nprofile = \"audit\"",
        )
        .unwrap();
        let r = cfg.reasoning().unwrap();
        assert_eq!(r.provider, "bedrock");
        assert_eq!(r.region.as_deref(), Some("eu-west-1"));
        assert_eq!(r.profile.as_deref(), Some("audit"));
    }

    #[test]
    fn test_rejects_misspelled_keys_in_tables() {
        assert!(config_error("[retry]\nmax_attemps = 3").contains("max_attemps"));
        assert!(config_error("[pipeline]\nconcurency = 8").contains("concurency"));
        assert!(config_error(
            "[reasoning]\nprovider = \"anthropic\"\nmodel = \"m\"\ntemprature = 0.2"
        )
        .contains("temprature"));
    }

    #[test]
    fn test_rejects_missing_model() {
        assert!(config_error("[embedding]\nprovider = \"openai\"").contains("parse"));
    }

    #[test]
    fn test_rejects_unknown_table() {
        assert!(config_error("[server]\nbind = \"x\"").contains("parse"));
    }
}
