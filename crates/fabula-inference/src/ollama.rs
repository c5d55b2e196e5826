//! Ollama generation backend with schema-constrained output.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use fabula_core::{
    GenerationBackend, GenerationError, GenerationErrorKind, StructuredResponse, TokenUsage,
};

/// Default Ollama endpoint.
pub const DEFAULT_OLLAMA_URL: &str = fabula_core::defaults::OLLAMA_URL;

/// Default generation model.
pub const DEFAULT_GEN_MODEL: &str = fabula_core::defaults::GEN_MODEL;

/// Timeout for generation requests (seconds).
pub const GEN_TIMEOUT_SECS: u64 = fabula_core::defaults::GEN_TIMEOUT_SECS;

/// Ollama generation backend.
///
/// One stateless HTTP call per [`GenerationBackend::generate_structured`]
/// invocation. No internal retry: retry policy belongs to the
/// orchestrator, which keeps this adapter pure and substitutable.
pub struct OllamaBackend {
    client: Client,
    base_url: String,
    gen_model: String,
    temperature: f32,
    gen_timeout_secs: u64,
}

impl OllamaBackend {
    /// Create a new Ollama backend with default settings.
    pub fn new() -> Self {
        Self::with_config(DEFAULT_OLLAMA_URL.to_string(), DEFAULT_GEN_MODEL.to_string())
    }

    /// Create a new Ollama backend with custom configuration.
    pub fn with_config(base_url: String, gen_model: String) -> Self {
        let gen_timeout = std::env::var("FABULA_GEN_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(GEN_TIMEOUT_SECS);

        let client = Client::builder()
            .timeout(Duration::from_secs(gen_timeout))
            .build()
            .expect("Failed to create HTTP client");

        info!(
            subsystem = "inference",
            component = "ollama",
            model = %gen_model,
            "Initializing Ollama backend: url={}",
            base_url
        );

        Self {
            client,
            base_url,
            gen_model,
            temperature: 0.2,
            gen_timeout_secs: gen_timeout,
        }
    }

    /// Create from environment variables.
    pub fn from_env() -> Self {
        let base_url =
            std::env::var("OLLAMA_BASE").unwrap_or_else(|_| DEFAULT_OLLAMA_URL.to_string());
        let gen_model =
            std::env::var("OLLAMA_GEN_MODEL").unwrap_or_else(|_| DEFAULT_GEN_MODEL.to_string());

        Self::with_config(base_url, gen_model)
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the generation model to use.
    pub fn set_gen_model(&mut self, model_name: String) {
        self.gen_model = model_name;
    }

    fn classify_status(status: u16) -> GenerationErrorKind {
        match status {
            429 => GenerationErrorKind::RateLimited,
            408 => GenerationErrorKind::Timeout,
            400..=499 => GenerationErrorKind::InvalidRequest,
            _ => GenerationErrorKind::ServiceError,
        }
    }
}

impl Default for OllamaBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Chat API message for `/api/chat`.
#[derive(Serialize, Deserialize, Clone)]
struct ChatMessage {
    role: String,
    content: String,
}

/// Sampling options forwarded to the model.
#[derive(Serialize)]
struct ChatOptions {
    temperature: f32,
}

/// Request payload for the Ollama `/api/chat` endpoint.
#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    /// Ollama format enforcement. Carries the contract's JSON Schema so
    /// the model's output is constrained to the declared structure.
    format: serde_json::Value,
    options: ChatOptions,
}

/// Response from the Ollama `/api/chat` endpoint.
#[derive(Deserialize)]
struct ChatResponse {
    message: ChatMessage,
    #[serde(default)]
    prompt_eval_count: u64,
    #[serde(default)]
    eval_count: u64,
}

#[async_trait]
impl GenerationBackend for OllamaBackend {
    #[instrument(skip(self, system, prompt, schema), fields(subsystem = "inference", component = "ollama", op = "generate", model = %self.gen_model, prompt_len = prompt.len()))]
    async fn generate_structured(
        &self,
        system: &str,
        prompt: &str,
        schema: &serde_json::Value,
    ) -> std::result::Result<StructuredResponse, GenerationError> {
        let start = Instant::now();

        let mut messages = Vec::with_capacity(2);
        if !system.is_empty() {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: system.to_string(),
            });
        }
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: prompt.to_string(),
        });

        let request = ChatRequest {
            model: self.gen_model.clone(),
            messages,
            stream: false,
            format: schema.clone(),
            options: ChatOptions {
                temperature: self.temperature,
            },
        };

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .timeout(Duration::from_secs(self.gen_timeout_secs))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                let kind = if e.is_timeout() {
                    GenerationErrorKind::Timeout
                } else {
                    GenerationErrorKind::ServiceError
                };
                GenerationError::new(kind, format!("Request failed: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::new(
                Self::classify_status(status),
                format!("Ollama returned {}: {}", status, body),
            ));
        }

        let envelope: ChatResponse = response.json().await.map_err(|e| {
            GenerationError::new(
                GenerationErrorKind::MalformedOutput,
                format!("Failed to parse response envelope: {}", e),
            )
        })?;

        let usage = TokenUsage::new(envelope.prompt_eval_count, envelope.eval_count);

        // Usage is billed even when the payload is unusable, so the
        // malformed-output failure carries it.
        let raw: serde_json::Value =
            serde_json::from_str(&envelope.message.content).map_err(|e| {
                GenerationError::new(
                    GenerationErrorKind::MalformedOutput,
                    format!("Response is not valid JSON: {}", e),
                )
                .with_usage(usage)
            })?;

        let elapsed = start.elapsed().as_millis() as u64;
        debug!(
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            duration_ms = elapsed,
            "Generation complete"
        );
        if elapsed > 30_000 {
            warn!(duration_ms = elapsed, slow = true, "Slow generation call");
        }

        Ok(StructuredResponse { raw, usage })
    }

    fn model_name(&self) -> &str {
        &self.gen_model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_schema() -> serde_json::Value {
        json!({"type": "object", "properties": {"themes": {"type": "array"}}})
    }

    #[test]
    fn test_default_constants() {
        assert_eq!(DEFAULT_OLLAMA_URL, "http://127.0.0.1:11434");
        assert_eq!(GEN_TIMEOUT_SECS, 120);
    }

    #[test]
    fn test_classify_status() {
        assert_eq!(
            OllamaBackend::classify_status(429),
            GenerationErrorKind::RateLimited
        );
        assert_eq!(
            OllamaBackend::classify_status(408),
            GenerationErrorKind::Timeout
        );
        assert_eq!(
            OllamaBackend::classify_status(400),
            GenerationErrorKind::InvalidRequest
        );
        assert_eq!(
            OllamaBackend::classify_status(503),
            GenerationErrorKind::ServiceError
        );
    }

    #[tokio::test]
    async fn test_generate_structured_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "message": {"role": "assistant", "content": "{\"themes\": [\"loss\"]}"},
                "prompt_eval_count": 850,
                "eval_count": 120,
            })))
            .mount(&server)
            .await;

        let backend = OllamaBackend::with_config(server.uri(), "test-model".to_string());
        let result = backend
            .generate_structured("system", "prompt", &test_schema())
            .await
            .unwrap();

        assert_eq!(result.raw["themes"][0], "loss");
        assert_eq!(result.usage.input_tokens, 850);
        assert_eq!(result.usage.output_tokens, 120);
    }

    #[tokio::test]
    async fn test_generate_structured_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let backend = OllamaBackend::with_config(server.uri(), "test-model".to_string());
        let err = backend
            .generate_structured("", "prompt", &test_schema())
            .await
            .unwrap_err();

        assert_eq!(err.kind, GenerationErrorKind::RateLimited);
        assert!(err.kind.is_retryable());
    }

    #[tokio::test]
    async fn test_generate_structured_malformed_content_keeps_usage() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "message": {"role": "assistant", "content": "this is not json"},
                "prompt_eval_count": 640,
                "eval_count": 35,
            })))
            .mount(&server)
            .await;

        let backend = OllamaBackend::with_config(server.uri(), "test-model".to_string());
        let err = backend
            .generate_structured("", "prompt", &test_schema())
            .await
            .unwrap_err();

        assert_eq!(err.kind, GenerationErrorKind::MalformedOutput);
        assert_eq!(err.usage.input_tokens, 640);
        assert_eq!(err.usage.output_tokens, 35);
    }

    #[tokio::test]
    async fn test_generate_structured_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let backend = OllamaBackend::with_config(server.uri(), "test-model".to_string());
        let err = backend
            .generate_structured("", "prompt", &test_schema())
            .await
            .unwrap_err();

        assert_eq!(err.kind, GenerationErrorKind::ServiceError);
        assert!(!err.kind.is_retryable());
    }

    #[test]
    fn test_model_name() {
        let backend = OllamaBackend::with_config(
            "http://localhost:11434".to_string(),
            "qwen3:8b".to_string(),
        );
        assert_eq!(backend.model_name(), "qwen3:8b");
    }
}
