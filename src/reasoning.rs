//! Concrete reasoning-model providers.
//!
//! Implements [`ReasoningBackend`] for:
//! - **[`AnthropicReasoner`]**: Messages API (`POST /v1/messages`).
//! - **[`OpenAIReasoner`]**: Chat Completions (`POST /v1/chat/completions`).
//! - **[`OllamaReasoner`]**: local chat (`POST /api/chat`, non-streaming).
//! - **`BedrockReasoner`**: Anthropic models on AWS Bedrock (`InvokeModel`),
//!   behind the `bedrock` feature.
//!
//! Each call is a single attempt; the analyzer wraps it in
//! [`with_retry`](crate::retry::with_retry).

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use pillar_audit_core::analysis::ReasoningBackend;
use pillar_audit_core::error::{AuditError, ProviderError};

use crate::config::ReasoningConfig;
use crate::http::{api_key, send_json};

const ANTHROPIC_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const OPENAI_URL: &str = "https://api.openai.com";
const OLLAMA_URL: &str = "http://localhost:11434";

// ============ Anthropic ============

/// Requires `ANTHROPIC_API_KEY` in the environment.
pub struct AnthropicReasoner {
    client: reqwest::Client,
    api_key: String,
    config: ReasoningConfig,
}

impl AnthropicReasoner {
    pub fn new(config: &ReasoningConfig) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::new(),
            api_key: api_key("ANTHROPIC_API_KEY")?,
            config: config.clone(),
        })
    }
}

#[async_trait]
impl ReasoningBackend for AnthropicReasoner {
    fn model_name(&self) -> &str {
        &self.config.model
    }

    async fn generate(&self, prompt: &str) -> Result<String, ProviderError> {
        let body = serde_json::json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
            "messages": [
                {"role": "user", "content": [{"type": "text", "text": prompt}]}
            ]
        });
        let base = self.config.url.as_deref().unwrap_or(ANTHROPIC_URL);
        let request = self
            .client
            .post(format!("{}/v1/messages", base.trim_end_matches('/')))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body);
        let json = send_json(request, "Anthropic").await?;
        parse_anthropic_response(&json)
    }
}

/// Concatenate the `text` content blocks.
fn parse_anthropic_response(json: &Value) -> Result<String, ProviderError> {
    let content = json
        .get("content")
        .and_then(|c| c.as_array())
        .ok_or_else(|| invalid("Anthropic", "missing content array"))?;
    let text: String = content
        .iter()
        .filter(|block| block.get("type").and_then(|t| t.as_str()) == Some("text"))
        .filter_map(|block| block.get("text").and_then(|t| t.as_str()))
        .collect();
    Ok(text)
}

// ============ OpenAI ============

/// Requires `OPENAI_API_KEY` in the environment.
pub struct OpenAIReasoner {
    client: reqwest::Client,
    api_key: String,
    config: ReasoningConfig,
}

impl OpenAIReasoner {
    pub fn new(config: &ReasoningConfig) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::new(),
            api_key: api_key("OPENAI_API_KEY")?,
            config: config.clone(),
        })
    }
}

#[async_trait]
impl ReasoningBackend for OpenAIReasoner {
    fn model_name(&self) -> &str {
        &self.config.model
    }

    async fn generate(&self, prompt: &str) -> Result<String, ProviderError> {
        let body = serde_json::json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
            "messages": [{"role": "user", "content": prompt}]
        });
        let base = self.config.url.as_deref().unwrap_or(OPENAI_URL);
        let request = self
            .client
            .post(format!("{}/v1/chat/completions", base.trim_end_matches('/')))
            .bearer_auth(&self.api_key)
            .json(&body);
        let json = send_json(request, "OpenAI").await?;
        json.pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| invalid("OpenAI", "missing choices[0].message.content"))
    }
}

// ============ Ollama ============

pub struct OllamaReasoner {
    client: reqwest::Client,
    config: ReasoningConfig,
}

impl OllamaReasoner {
    pub fn new(config: &ReasoningConfig) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::new(),
            config: config.clone(),
        })
    }
}

#[async_trait]
impl ReasoningBackend for OllamaReasoner {
    fn model_name(&self) -> &str {
        &self.config.model
    }

    async fn generate(&self, prompt: &str) -> Result<String, ProviderError> {
        let body = serde_json::json!({
            "model": self.config.model,
            "stream": false,
            "format": "json",
            "options": {
                "temperature": self.config.temperature,
                "num_predict": self.config.max_tokens
            },
            "messages": [{"role": "user", "content": prompt}]
        });
        let base = self.config.url.as_deref().unwrap_or(OLLAMA_URL);
        let request = self
            .client
            .post(format!("{}/api/chat", base.trim_end_matches('/')))
            .json(&body);
        let json = send_json(request, "Ollama").await?;
        json.pointer("/message/content")
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| invalid("Ollama", "missing message.content"))
    }
}

// ============ Bedrock ============

#[cfg(feature = "bedrock")]
const BEDROCK_DEFAULT_REGION: &str = "us-west-2";
#[cfg(feature = "bedrock")]
const BEDROCK_ANTHROPIC_VERSION: &str = "bedrock-2023-05-31";
/// Inference profile ARN; takes precedence over `reasoning.model`.
#[cfg(feature = "bedrock")]
const BEDROCK_PROFILE_ARN_ENV: &str = "BEDROCK_INFERENCE_PROFILE_ARN";

/// Anthropic models through Bedrock `InvokeModel`.
///
/// Credentials come from the AWS default chain; `reasoning.profile` (or
/// `--profile`) selects a shared-config profile. The SDK client is built on
/// first use.
#[cfg(feature = "bedrock")]
pub struct BedrockReasoner {
    client: tokio::sync::OnceCell<aws_sdk_bedrockruntime::Client>,
    model_id: String,
    config: ReasoningConfig,
}

#[cfg(feature = "bedrock")]
impl BedrockReasoner {
    pub fn new(config: &ReasoningConfig) -> Result<Self> {
        Ok(Self {
            client: tokio::sync::OnceCell::new(),
            model_id: bedrock_model_id(&config.model, std::env::var(BEDROCK_PROFILE_ARN_ENV).ok()),
            config: config.clone(),
        })
    }

    async fn client(&self) -> &aws_sdk_bedrockruntime::Client {
        self.client
            .get_or_init(|| async {
                let region = self
                    .config
                    .region
                    .clone()
                    .unwrap_or_else(|| BEDROCK_DEFAULT_REGION.to_string());
                let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
                    .region(aws_config::Region::new(region));
                if let Some(profile) = &self.config.profile {
                    loader = loader.profile_name(profile);
                }
                aws_sdk_bedrockruntime::Client::new(&loader.load().await)
            })
            .await
    }
}

#[cfg(feature = "bedrock")]
#[async_trait]
impl ReasoningBackend for BedrockReasoner {
    fn model_name(&self) -> &str {
        &self.model_id
    }

    async fn generate(&self, prompt: &str) -> Result<String, ProviderError> {
        use aws_sdk_bedrockruntime::primitives::Blob;

        let body = serde_json::to_vec(&bedrock_body(&self.config, prompt))
            .map_err(|e| ProviderError::Fatal(format!("Bedrock request encoding failed: {}", e)))?;
        let output = self
            .client()
            .await
            .invoke_model()
            .model_id(&self.model_id)
            .content_type("application/json")
            .accept("application/json")
            .body(Blob::new(body))
            .send()
            .await
            .map_err(classify_bedrock_error)?;
        let json: Value = serde_json::from_slice(output.body().as_ref())
            .map_err(|e| ProviderError::Fatal(format!("Bedrock returned invalid JSON: {}", e)))?;
        parse_anthropic_response(&json)
    }
}

#[cfg(feature = "bedrock")]
fn bedrock_model_id(model: &str, profile_arn: Option<String>) -> String {
    profile_arn
        .map(|arn| arn.trim().to_string())
        .filter(|arn| !arn.is_empty())
        .unwrap_or_else(|| model.to_string())
}

#[cfg(feature = "bedrock")]
fn bedrock_body(config: &ReasoningConfig, prompt: &str) -> Value {
    serde_json::json!({
        "anthropic_version": BEDROCK_ANTHROPIC_VERSION,
        "max_tokens": config.max_tokens,
        "temperature": config.temperature,
        "messages": [
            {"role": "user", "content": [{"type": "text", "text": prompt}]}
        ]
    })
}

#[cfg(feature = "bedrock")]
fn classify_bedrock_error(
    err: aws_sdk_bedrockruntime::error::SdkError<
        aws_sdk_bedrockruntime::operation::invoke_model::InvokeModelError,
    >,
) -> ProviderError {
    use aws_sdk_bedrockruntime::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};

    let message = format!("Bedrock: {}", DisplayErrorContext(&err));
    match &err {
        SdkError::ServiceError(service) => classify_bedrock_code(service.err().code(), message),
        SdkError::ConstructionFailure(_) => ProviderError::Fatal(message),
        _ => ProviderError::Transient(message),
    }
}

/// Map a Bedrock service error code onto the retry taxonomy.
#[cfg(feature = "bedrock")]
fn classify_bedrock_code(code: Option<&str>, message: String) -> ProviderError {
    match code {
        Some("ThrottlingException") => ProviderError::Throttled(message),
        Some(
            "ServiceUnavailableException"
            | "ModelTimeoutException"
            | "ModelNotReadyException"
            | "InternalServerException",
        ) => ProviderError::Transient(message),
        _ => ProviderError::Fatal(message),
    }
}

fn invalid(provider: &str, what: &str) -> ProviderError {
    ProviderError::Fatal(format!("invalid {} response: {}", provider, what))
}

/// Create the [`ReasoningBackend`] named by `config.provider`.
pub fn create_reasoner(config: &ReasoningConfig) -> Result<Box<dyn ReasoningBackend>> {
    match config.provider.as_str() {
        "anthropic" => Ok(Box::new(AnthropicReasoner::new(config)?)),
        "openai" => Ok(Box::new(OpenAIReasoner::new(config)?)),
        "ollama" => Ok(Box::new(OllamaReasoner::new(config)?)),
        #[cfg(feature = "bedrock")]
        "bedrock" => Ok(Box::new(BedrockReasoner::new(config)?)),
        #[cfg(not(feature = "bedrock"))]
        "bedrock" => Err(AuditError::Configuration(
            "reasoning provider 'bedrock' requires the 'bedrock' feature".into(),
        )
        .into()),
        other => Err(AuditError::Configuration(format!(
            "unknown reasoning provider: {}",
            other
        ))
        .into()),
    }
}
