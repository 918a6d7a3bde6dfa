//! Model Invoker Abstraction
//!
//! Defines the `ModelInvoker` trait: one prompt in, one text completion out.
//! Every completion carries token usage and cost so runs can be accounted in
//! the repository cache.
//!
//! ## Providers
//!
//! - `openai`: any OpenAI-compatible Chat Completions endpoint
//! - `ollama`: locally running Ollama server

mod ollama;
mod openai;

pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};

use crate::constants::network as net_constants;
use crate::types::{ErrorClassifier, Result, TutorError};

// =============================================================================
// Completion with Usage Metrics
// =============================================================================

/// Text completion plus usage metrics
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub usage: TokenUsage,
    /// Cost in USD when the provider reports one
    pub cost_usd: f64,
    pub timing: ResponseTiming,
}

impl Completion {
    /// Completion with unknown usage (tests and scripted invokers)
    pub fn text_only(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            usage: TokenUsage::default(),
            cost_usd: 0.0,
            timing: ResponseTiming::default(),
        }
    }
}

/// Token usage metrics for cost tracking
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }

    /// Create from OpenAI-style usage response
    pub fn from_openai(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            input_tokens: prompt_tokens,
            output_tokens: completion_tokens,
        }
    }

    /// Create from Ollama-style usage response
    pub fn from_ollama(prompt_eval_count: u32, eval_count: u32) -> Self {
        Self {
            input_tokens: prompt_eval_count,
            output_tokens: eval_count,
        }
    }
}

/// Response timing metrics
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseTiming {
    /// Wall clock time in milliseconds
    pub total_ms: u64,
}

impl ResponseTiming {
    pub fn from_duration(duration: Duration) -> Self {
        Self {
            total_ms: duration.as_millis() as u64,
        }
    }
}

/// Shared invoker type for use across pipeline stages.
pub type SharedInvoker = Arc<dyn ModelInvoker>;

// =============================================================================
// Provider Configuration
// =============================================================================

/// Configuration for model providers
///
/// API keys are never serialized and are redacted in debug output. Providers
/// move the key into a `SecretString` on construction.
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider type: "openai", "ollama"
    pub provider: String,
    /// Model name (provider-specific)
    pub model: Option<String>,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Sampling temperature
    pub temperature: f32,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    /// API base URL (for custom endpoints)
    #[serde(default)]
    pub api_base: Option<String>,
    /// Maximum tokens to generate
    pub max_tokens: usize,
    /// Context window to request from local servers
    #[serde(default)]
    pub context_window: Option<usize>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("timeout_secs", &self.timeout_secs)
            .field("temperature", &self.temperature)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("api_base", &self.api_base)
            .field("max_tokens", &self.max_tokens)
            .field("context_window", &self.context_window)
            .finish()
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: None,
            timeout_secs: net_constants::DEFAULT_TIMEOUT_SECS,
            temperature: 0.2,
            api_key: None,
            api_base: None,
            max_tokens: 8192,
            context_window: None,
        }
    }
}

// =============================================================================
// Model Invoker Trait
// =============================================================================

#[async_trait]
pub trait ModelInvoker: Send + Sync {
    /// Send one prompt and return the text completion
    async fn complete(&self, prompt: &str) -> Result<Completion>;

    /// Provider name for logging
    fn name(&self) -> &str;

    /// Model name currently in use
    fn model(&self) -> &str;
}

/// Create a shared invoker from configuration
pub fn create_invoker(config: &ProviderConfig) -> Result<SharedInvoker> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiProvider::new(config.clone())?)),
        "ollama" => {
            let mut provider = OllamaProvider::new(config.clone())?;
            if let Some(tokens) = config.context_window {
                provider = provider.with_context_window(tokens);
            }
            Ok(Arc::new(provider))
        }
        other => Err(TutorError::config(format!(
            "Unknown provider: {}. Supported: openai, ollama",
            other
        ))),
    }
}

/// Build a classified error from a non-success HTTP response.
///
/// Reads `retry-after` and the common `x-ratelimit-*` headers into the error
/// extensions.
pub(crate) fn classify_response_error(
    provider: &str,
    status: u16,
    headers: &HeaderMap,
    body: &str,
) -> TutorError {
    let mut err = ErrorClassifier::classify_http_status(
        status,
        &format!("{} API error ({}): {}", provider, status, body),
    )
    .with_provider(provider);

    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    if let Some(secs) = header("retry-after").and_then(|v| v.trim().parse::<u64>().ok()) {
        err = err.with_retry_after(Duration::from_secs(secs));
    }

    let remaining = header("x-ratelimit-remaining-requests")
        .or_else(|| header("x-ratelimit-remaining"))
        .and_then(|v| v.trim().parse::<u32>().ok());
    let reset = header("x-ratelimit-reset")
        .and_then(|v| v.trim().parse::<i64>().ok())
        .and_then(|epoch| DateTime::<Utc>::from_timestamp(epoch, 0));
    if remaining.is_some() || reset.is_some() {
        err = err.with_rate_limit(remaining, reset);
    }

    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ErrorKind;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_provider_config_debug_redacts_key() {
        let config = ProviderConfig {
            api_key: Some("sk-secret".into()),
            ..Default::default()
        };
        let debug = format!("{:?}", config);
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("sk-secret"));
    }

    #[test]
    fn test_api_key_not_serialized() {
        let config = ProviderConfig {
            api_key: Some("sk-secret".into()),
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("sk-secret"));
    }

    #[test]
    fn test_unknown_provider() {
        let config = ProviderConfig {
            provider: "carrier-pigeon".into(),
            ..Default::default()
        };
        let err = create_invoker(&config).err().unwrap();
        assert_eq!(err.kind, ErrorKind::Config);
    }

    #[test]
    fn test_classify_rate_limited_response() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("12"));
        headers.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));

        let err = classify_response_error("openai", 429, &headers, "slow down");
        assert_eq!(err.kind, ErrorKind::RateLimit);
        assert_eq!(err.recommended_delay(), Some(Duration::from_secs(12)));
        assert_eq!(err.extensions.rate_limit_remaining, Some(0));
        assert_eq!(err.extensions.provider.as_deref(), Some("openai"));
    }

    #[test]
    fn test_classify_auth_response() {
        let err = classify_response_error("openai", 401, &HeaderMap::new(), "bad key");
        assert_eq!(err.kind, ErrorKind::Auth);
        assert!(!err.is_retryable());
    }
}
