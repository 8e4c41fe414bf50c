//! Reasoning service implementations and retry policy.
//!
//! Defines concrete [`ReasoningService`] backends:
//! - **[`DisabledReasoning`]**: always fails; used when no provider is configured.
//! - **[`AnthropicReasoning`]**: Messages API with extended thinking.
//! - **[`OpenAIReasoning`]**: Chat Completions API with `reasoning_effort`.
//!
//! # Thinking effort
//!
//! | Effort | Anthropic `budget_tokens` | OpenAI `reasoning_effort` |
//! |--------|---------------------------|---------------------------|
//! | low    | 1024                      | `"low"`                   |
//! | medium | 4096                      | `"medium"`                |
//! | high   | 16000                     | `"high"`                  |
//!
//! # Retry Strategy
//!
//! Only overload signals are retried (HTTP 429, 503, 529), via
//! [`generate_with_retry`]:
//! - attempts are bounded by [`RetryPolicy::max_attempts`] (default 3)
//! - the delay before retry `n` is `base × 2^(n-1)`: 1s, 2s, 4s, ...
//! - any other error fails immediately

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::ReasoningConfig;
use crate::error::{InvestigationError, ReasoningError};
use crate::traits::{ReasoningRequest, ReasoningResponse, ReasoningService};

// ============ Retry ============

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &ReasoningConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.backoff_base_ms),
        }
    }

    /// Backoff after the failed attempt with 0-based index `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.min(16)))
    }

    /// Every delay this policy can produce, in order.
    pub fn schedule(&self) -> Vec<Duration> {
        (0..self.max_attempts).map(|a| self.delay_for(a)).collect()
    }
}

/// Call the reasoning service, retrying overload signals with exponential
/// backoff. Any other error, or exhausting the attempt budget, yields
/// [`InvestigationError::SynthesisFailed`].
pub async fn generate_with_retry(
    service: &dyn ReasoningService,
    request: &ReasoningRequest,
    policy: &RetryPolicy,
) -> Result<ReasoningResponse, InvestigationError> {
    let mut attempt = 0;
    loop {
        match service.generate(request).await {
            Ok(response) => return Ok(response),
            Err(err) if err.is_retryable() && attempt + 1 < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    attempt = attempt + 1,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "reasoning service overloaded, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                return Err(InvestigationError::SynthesisFailed {
                    attempts: attempt + 1,
                    source: err,
                })
            }
        }
    }
}

fn classify_status(status: u16, message: String) -> ReasoningError {
    match status {
        429 | 503 | 529 => ReasoningError::Overloaded { status, message },
        _ => ReasoningError::Rejected { status, message },
    }
}

fn api_key(env_name: &str) -> Result<String> {
    match std::env::var(env_name) {
        Ok(key) if !key.is_empty() => Ok(key),
        _ => bail!("{} environment variable not set", env_name),
    }
}

// ============ Disabled ============

/// A reasoning service that always fails.
pub struct DisabledReasoning;

#[async_trait]
impl ReasoningService for DisabledReasoning {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn generate(
        &self,
        _request: &ReasoningRequest,
    ) -> Result<ReasoningResponse, ReasoningError> {
        Err(ReasoningError::Disabled)
    }
}

// ============ Anthropic ============

/// Anthropic Messages API with extended thinking.
///
/// Extended thinking requires the default sampling temperature, so the
/// request temperature is not forwarded.
pub struct AnthropicReasoning {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl AnthropicReasoning {
    pub fn new(config: &ReasoningConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_base: config
                .api_base
                .clone()
                .unwrap_or_else(|| "https://api.anthropic.com".to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key: api_key(&config.api_key_env)?,
            model: config
                .model
                .clone()
                .unwrap_or_else(|| "claude-sonnet-4-5".to_string()),
            max_tokens: config.max_tokens,
        })
    }
}

#[async_trait]
impl ReasoningService for AnthropicReasoning {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        request: &ReasoningRequest,
    ) -> Result<ReasoningResponse, ReasoningError> {
        let budget = request.effort.budget_tokens();
        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_tokens.max(budget + 1024),
            "thinking": { "type": "enabled", "budget_tokens": budget },
            "messages": [{ "role": "user", "content": request.prompt }],
        });

        let response = self
            .client
            .post(format!("{}/v1/messages", self.api_base))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await
            .map_err(|e| ReasoningError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), body_text));
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| ReasoningError::Malformed(e.to_string()))?;
        debug!(model = %self.model, "anthropic response received");
        parse_anthropic_response(&json)
    }
}

fn parse_anthropic_response(json: &Value) -> Result<ReasoningResponse, ReasoningError> {
    let blocks = json
        .get("content")
        .and_then(|c| c.as_array())
        .ok_or_else(|| ReasoningError::Malformed("missing content array".into()))?;

    let text = blocks
        .iter()
        .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
        .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
        .collect::<Vec<_>>()
        .join("\n");

    if text.trim().is_empty() {
        return Err(ReasoningError::Malformed("response has no text blocks".into()));
    }

    Ok(ReasoningResponse {
        text,
        continuation_token: json
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
    })
}

// ============ OpenAI ============

/// OpenAI Chat Completions API.
///
/// Reasoning models (`o*`, `gpt-5*`) receive `reasoning_effort` and no
/// temperature; other models receive the temperature only.
pub struct OpenAIReasoning {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl OpenAIReasoning {
    pub fn new(config: &ReasoningConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_base: config
                .api_base
                .clone()
                .unwrap_or_else(|| "https://api.openai.com".to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key: api_key(&config.api_key_env)?,
            model: config.model.clone().unwrap_or_else(|| "gpt-5".to_string()),
            max_tokens: config.max_tokens,
        })
    }

    fn is_reasoning_model(&self) -> bool {
        let m = self.model.to_ascii_lowercase();
        m.starts_with('o') || m.starts_with("gpt-5")
    }
}

#[async_trait]
impl ReasoningService for OpenAIReasoning {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        request: &ReasoningRequest,
    ) -> Result<ReasoningResponse, ReasoningError> {
        let mut body = serde_json::json!({
            "model": self.model,
            "max_completion_tokens": self.max_tokens,
            "messages": [{ "role": "user", "content": request.prompt }],
        });
        if self.is_reasoning_model() {
            body["reasoning_effort"] = Value::from(request.effort.as_str());
        } else {
            body["temperature"] = Value::from(request.temperature);
        }

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.api_base))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ReasoningError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), body_text));
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| ReasoningError::Malformed(e.to_string()))?;
        parse_openai_response(&json)
    }
}

fn parse_openai_response(json: &Value) -> Result<ReasoningResponse, ReasoningError> {
    let text = json
        .pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| ReasoningError::Malformed("missing choices[0].message.content".into()))?;

    Ok(ReasoningResponse {
        text: text.to_string(),
        continuation_token: json
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
    })
}

/// Create the configured [`ReasoningService`].
///
/// | Config Value | Service |
/// |-------------|---------|
/// | `"disabled"` | [`DisabledReasoning`] |
/// | `"anthropic"` | [`AnthropicReasoning`] |
/// | `"openai"` | [`OpenAIReasoning`] |
pub fn create_reasoning_service(config: &ReasoningConfig) -> Result<Arc<dyn ReasoningService>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledReasoning)),
        "anthropic" => Ok(Arc::new(AnthropicReasoning::new(config)?)),
        "openai" => Ok(Arc::new(OpenAIReasoning::new(config)?)),
        other => bail!("Unknown reasoning provider: {}", other),
    }
}
