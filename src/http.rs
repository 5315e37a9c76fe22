//! JSON-over-HTTP plumbing shared by the embedding and reasoning providers.
//!
//! Maps transport and status failures onto [`ProviderError`]: network
//! errors and 5xx are transient, 429 throttles, other 4xx and malformed
//! success bodies are fatal.

use pillar_audit_core::error::ProviderError;
use serde_json::Value;

/// Send `request` and decode a JSON success body.
pub async fn send_json(request: reqwest::RequestBuilder, provider: &str) -> Result<Value, ProviderError> {
    let response = request
        .send()
        .await
        .map_err(|e| ProviderError::Transient(format!("{} request failed: {}", provider, e)))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ProviderError::from_status(
            status.as_u16(),
            &format!("{}: {}", provider, truncate(&body, 500)),
        ));
    }

    response
        .json::<Value>()
        .await
        .map_err(|e| ProviderError::Fatal(format!("{} returned invalid JSON: {}", provider, e)))
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Read a required environment variable holding an API key.
pub fn api_key(var: &str) -> anyhow::Result<String> {
    match std::env::var(var) {
        Ok(key) if !key.trim().is_empty() => Ok(key),
        _ => Err(pillar_audit_core::error::AuditError::Configuration(format!(
            "{} environment variable not set",
            var
        ))
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_on_char_boundary() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("abc", 10), "abc");
    }
}
