//! Ollama Local Provider
//!
//! Model invoker for a locally running Ollama server. Local models report
//! token counts but no cost.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{
    Completion, ModelInvoker, ProviderConfig, ResponseTiming, TokenUsage, classify_response_error,
};
use crate::types::{ErrorClassifier, Result, TutorError};

const DEFAULT_API_BASE: &str = "http://localhost:11434";
const DEFAULT_MODEL: &str = "llama3:latest";

pub struct OllamaProvider {
    api_base: String,
    model: String,
    temperature: f32,
    context_window: Option<usize>,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let api_base = config
            .api_base
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());

        // SSRF guard: scheme check plus a warning for remote hosts
        let api_base = Self::validate_endpoint(&api_base)?;

        let model = config.model.unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| TutorError::config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            api_base,
            model,
            temperature: config.temperature,
            context_window: None,
            client,
        })
    }

    /// Ask the server for a larger context window than its default
    pub fn with_context_window(mut self, tokens: usize) -> Self {
        self.context_window = Some(tokens);
        self
    }

    /// Only http/https, warn for non-localhost endpoints.
    fn validate_endpoint(endpoint: &str) -> Result<String> {
        let url = url::Url::parse(endpoint).map_err(|e| {
            TutorError::config(format!("Invalid Ollama endpoint URL '{}': {}", endpoint, e))
        })?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(TutorError::config(format!(
                "Ollama endpoint must use http or https scheme, got: {}",
                url.scheme()
            )));
        }

        if let Some(host) = url.host_str()
            && !matches!(host, "localhost" | "127.0.0.1" | "[::1]")
        {
            warn!(
                "Ollama endpoint is not localhost: {}. Ensure this is intentional.",
                host
            );
        }

        let mut result = url.to_string();
        if result.ends_with('/') {
            result.pop();
        }
        Ok(result)
    }

    fn build_request(&self, prompt: &str) -> OllamaRequest {
        OllamaRequest {
            model: self.model.clone(),
            prompt: prompt.to_string(),
            stream: false,
            options: OllamaOptions {
                temperature: self.temperature,
                num_ctx: self.context_window,
            },
        }
    }
}

#[async_trait]
impl ModelInvoker for OllamaProvider {
    async fn complete(&self, prompt: &str) -> Result<Completion> {
        info!("Completing with Ollama (model: {})", self.model);

        let start_time = Instant::now();
        let request = self.build_request(prompt);
        let url = format!("{}/api/generate", self.api_base);

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                let connect = e.is_connect();
                let err = TutorError::from(e).with_provider("ollama");
                if connect {
                    err.with_remediation("Is Ollama running? Start with: ollama serve")
                } else {
                    err
                }
            })?;

        let elapsed = start_time.elapsed();

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let headers = response.headers().clone();
            let body = response.text().await.unwrap_or_default();
            let err = classify_response_error("ollama", status, &headers, &body);
            return Err(if status == 404 {
                err.with_remediation(format!("Pull the model with: ollama pull {}", self.model))
            } else {
                err
            });
        }

        let response_body: OllamaResponse = response.json().await.map_err(|e| {
            TutorError::api(502, format!("Failed to parse Ollama response: {}", e))
                .with_provider("ollama")
        })?;
        debug!(
            "Ollama completion: {} chars in {:?}",
            response_body.response.len(),
            elapsed
        );

        response_body.into_completion(elapsed)
    }

    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// Request/Response types

#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    prompt: String,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_ctx: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
    /// Set instead of `response` when the server failed after accepting the request
    #[serde(default)]
    error: Option<String>,
}

impl OllamaResponse {
    fn into_completion(self, elapsed: Duration) -> Result<Completion> {
        if let Some(message) = self.error {
            return Err(ErrorClassifier::classify(&message).with_provider("ollama"));
        }

        Ok(Completion {
            usage: TokenUsage::from_ollama(
                self.prompt_eval_count.unwrap_or(0),
                self.eval_count.unwrap_or(0),
            ),
            text: self.response,
            cost_usd: 0.0,
            timing: ResponseTiming::from_duration(elapsed),
        })
    }
}
