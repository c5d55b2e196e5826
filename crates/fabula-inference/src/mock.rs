//! Mock generation backend for deterministic testing.
//!
//! Scripted outcomes, no network, no randomness. The orchestrator tests
//! drive retry and failure paths by queuing the exact sequence of results
//! the backend should return.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use fabula_core::{
    GenerationBackend, GenerationError, GenerationErrorKind, StructuredResponse, TokenUsage,
};

/// One scripted call outcome.
#[derive(Debug, Clone)]
pub enum MockOutcome {
    /// Return this JSON payload as the model output.
    Respond(serde_json::Value),
    /// Fail with this kind. Usage still accrues.
    Fail(GenerationErrorKind),
}

/// Record of a single call made against the mock.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub system: String,
    pub prompt: String,
    pub schema: serde_json::Value,
}

/// Mock generation backend with a scripted outcome queue.
///
/// Outcomes are consumed front-to-back. Once the queue drains, every
/// further call returns the default response. Clones share the queue and
/// call log, so a test can keep a handle while the orchestrator owns
/// another.
#[derive(Clone)]
pub struct MockGenerationBackend {
    outcomes: Arc<Mutex<VecDeque<MockOutcome>>>,
    default_response: Arc<serde_json::Value>,
    usage_per_call: TokenUsage,
    call_log: Arc<Mutex<Vec<MockCall>>>,
}

impl MockGenerationBackend {
    /// Create a mock that always returns `default_response`.
    pub fn new(default_response: serde_json::Value) -> Self {
        Self {
            outcomes: Arc::new(Mutex::new(VecDeque::new())),
            default_response: Arc::new(default_response),
            usage_per_call: TokenUsage::new(1000, 200),
            call_log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Set the token usage reported on every call.
    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage_per_call = usage;
        self
    }

    /// Queue a scripted outcome for the next un-scripted call.
    pub fn push_outcome(&self, outcome: MockOutcome) {
        self.outcomes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(outcome);
    }

    /// Queue a failure of the given kind.
    pub fn push_failure(&self, kind: GenerationErrorKind) {
        self.push_outcome(MockOutcome::Fail(kind));
    }

    /// Queue a successful response with the given payload.
    pub fn push_response(&self, value: serde_json::Value) {
        self.push_outcome(MockOutcome::Respond(value));
    }

    /// Number of calls made so far.
    pub fn call_count(&self) -> usize {
        self.call_log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Snapshot of every recorded call.
    pub fn calls(&self) -> Vec<MockCall> {
        self.call_log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl GenerationBackend for MockGenerationBackend {
    async fn generate_structured(
        &self,
        system: &str,
        prompt: &str,
        schema: &serde_json::Value,
    ) -> std::result::Result<StructuredResponse, GenerationError> {
        self.call_log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(MockCall {
                system: system.to_string(),
                prompt: prompt.to_string(),
                schema: schema.clone(),
            });

        let scripted = self
            .outcomes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();

        match scripted {
            Some(MockOutcome::Fail(kind)) => Err(GenerationError::new(
                kind,
                format!("scripted {} failure", kind),
            )
            .with_usage(self.usage_per_call)),
            Some(MockOutcome::Respond(value)) => Ok(StructuredResponse {
                raw: value,
                usage: self.usage_per_call,
            }),
            None => Ok(StructuredResponse {
                raw: (*self.default_response).clone(),
                usage: self.usage_per_call,
            }),
        }
    }

    fn model_name(&self) -> &str {
        "mock-model"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> serde_json::Value {
        json!({"type": "object"})
    }

    #[tokio::test]
    async fn test_default_response_when_queue_empty() {
        let mock = MockGenerationBackend::new(json!({"themes": ["memory"]}));

        let result = mock
            .generate_structured("sys", "prompt", &schema())
            .await
            .unwrap();

        assert_eq!(result.raw["themes"][0], "memory");
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn test_scripted_outcomes_consumed_in_order() {
        let mock = MockGenerationBackend::new(json!({"ok": true}));
        mock.push_failure(GenerationErrorKind::RateLimited);
        mock.push_response(json!({"ok": false}));

        let err = mock
            .generate_structured("", "p", &schema())
            .await
            .unwrap_err();
        assert_eq!(err.kind, GenerationErrorKind::RateLimited);

        let ok = mock.generate_structured("", "p", &schema()).await.unwrap();
        assert_eq!(ok.raw["ok"], false);

        // Queue drained, back to the default.
        let ok = mock.generate_structured("", "p", &schema()).await.unwrap();
        assert_eq!(ok.raw["ok"], true);
    }

    #[tokio::test]
    async fn test_failure_carries_usage() {
        let mock = MockGenerationBackend::new(json!({}))
            .with_usage(TokenUsage::new(555, 0));
        mock.push_failure(GenerationErrorKind::Timeout);

        let err = mock
            .generate_structured("", "p", &schema())
            .await
            .unwrap_err();
        assert_eq!(err.usage.input_tokens, 555);
    }

    #[tokio::test]
    async fn test_call_log_records_inputs() {
        let mock = MockGenerationBackend::new(json!({}));
        mock.generate_structured("the system", "the prompt", &schema())
            .await
            .unwrap();

        let calls = mock.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].system, "the system");
        assert_eq!(calls[0].prompt, "the prompt");
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let mock = MockGenerationBackend::new(json!({}));
        let handle = mock.clone();
        handle.push_failure(GenerationErrorKind::ServiceError);

        let err = mock
            .generate_structured("", "p", &schema())
            .await
            .unwrap_err();
        assert_eq!(err.kind, GenerationErrorKind::ServiceError);
        assert_eq!(handle.call_count(), 1);
    }
}
