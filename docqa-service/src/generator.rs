//! Answer generation from retrieved context.
//!
//! [`GeminiAnswerGenerator`] calls the Gemini `generateContent` REST endpoint
//! directly with `reqwest`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::GeneratorConfig;
use crate::error::{Result, ServiceError};
use crate::retry::RetryPolicy;

/// Returned in place of an answer when generation fails for good.
pub const APOLOGY: &str = "Sorry, I could not generate an answer at this time.";

/// Produces a natural-language answer to a question from retrieved context.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    /// Answer `question` using only `context`.
    async fn generate(&self, question: &str, context: &str) -> Result<String>;
}

/// Truncate `text` to at most `max_chars` characters on a char boundary.
pub fn truncate_context(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

/// Build the grounded prompt sent to the model.
pub fn build_prompt(question: &str, context: &str, max_context_chars: usize) -> String {
    let context = truncate_context(context, max_context_chars);
    format!(
        "Answer the following question based only on the provided context. \
         If the context does not contain enough information to answer, say that \
         you cannot answer from the given context.\n\
         Context:\n{context}\n\
         Question: {question}\n\
         Answer:"
    )
}

/// An [`AnswerGenerator`] that answers with the retrieved context itself.
///
/// Used to inspect retrieval without calling a model.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextEchoGenerator;

#[async_trait]
impl AnswerGenerator for ContextEchoGenerator {
    async fn generate(&self, _question: &str, context: &str) -> Result<String> {
        Ok(context.to_string())
    }
}

// ── Gemini API request/response types ──────────────────────────────

#[derive(Serialize)]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'a str,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

/// Why one Gemini request failed.
#[derive(Debug, Error)]
enum RequestError {
    #[error("request failed: {0}")]
    Network(String),
    #[error("API returned {status}: {detail}")]
    Status { status: StatusCode, detail: String },
    #[error("failed to parse response: {0}")]
    Parse(String),
    #[error("response contained no text")]
    NoText,
}

impl RequestError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Status { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
            Self::Parse(_) | Self::NoText => false,
        }
    }
}

/// An [`AnswerGenerator`] backed by the Gemini API.
///
/// Transient failures (network errors, 429, 5xx) are retried with the
/// configured [`RetryPolicy`]. When every attempt fails the generator
/// returns [`APOLOGY`] rather than an error.
///
/// # Example
///
/// ```rust,ignore
/// use docqa_service::{GeminiAnswerGenerator, GeneratorConfig};
///
/// let generator = GeminiAnswerGenerator::new(GeneratorConfig {
///     api_key: Some(std::env::var("GEMINI_API_KEY")?),
///     ..GeneratorConfig::default()
/// })?;
/// let answer = generator.generate("What is the grace period?", &context).await?;
/// ```
pub struct GeminiAnswerGenerator {
    client: reqwest::Client,
    api_key: String,
    url: String,
    config: GeneratorConfig,
    retry: RetryPolicy,
}

impl GeminiAnswerGenerator {
    /// Create a generator from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Config`] if no API key is configured or the
    /// HTTP client cannot be built.
    pub fn new(config: GeneratorConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| ServiceError::Config("GEMINI_API_KEY is not set".to_string()))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ServiceError::Config(format!("failed to build HTTP client: {e}")))?;

        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            config.endpoint.trim_end_matches('/'),
            config.model
        );
        let retry = RetryPolicy::from_config(&config);
        Ok(Self { client, api_key, url, config, retry })
    }

    /// Replace the retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The model name in use.
    pub fn model(&self) -> &str {
        &self.config.model
    }

    async fn request(&self, prompt: &str) -> std::result::Result<String, RequestError> {
        let body = GenerateContentRequest {
            contents: vec![Content { role: "user", parts: vec![Part { text: prompt }] }],
        };

        let response = self
            .client
            .post(&self.url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| RequestError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail =
                serde_json::from_str::<ErrorResponse>(&body).map(|e| e.error.message).unwrap_or(body);
            return Err(RequestError::Status { status, detail });
        }

        let parsed: GenerateContentResponse =
            response.json().await.map_err(|e| RequestError::Parse(e.to_string()))?;
        let text: String = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        let text = text.trim();
        if text.is_empty() {
            return Err(RequestError::NoText);
        }
        Ok(text.to_string())
    }
}

#[async_trait]
impl AnswerGenerator for GeminiAnswerGenerator {
    async fn generate(&self, question: &str, context: &str) -> Result<String> {
        let prompt = build_prompt(question, context, self.config.max_context_chars);
        debug!(model = %self.config.model, prompt_chars = prompt.len(), "generating answer");

        match self.retry.run(|| self.request(&prompt), RequestError::is_transient).await {
            Ok(answer) => {
                info!(model = %self.config.model, answer_chars = answer.len(), "generated answer");
                Ok(answer)
            }
            Err(e) => {
                warn!(
                    model = %self.config.model,
                    error = %e,
                    "answer generation failed, returning apology"
                );
                Ok(APOLOGY.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_embeds_context_and_question() {
        let prompt = build_prompt("What is the grace period?", "Thirty days.", 100);
        assert!(prompt.starts_with("Answer the following question based only on the provided context."));
        assert!(prompt.contains("Context:\nThirty days.\n"));
        assert!(prompt.ends_with("Question: What is the grace period?\nAnswer:"));
    }

    #[test]
    fn context_is_truncated_on_char_boundaries() {
        assert_eq!(truncate_context("ééééé", 3), "ééé");
        let prompt = build_prompt("q", &"x".repeat(50), 10);
        assert!(prompt.contains(&format!("Context:\n{}\n", "x".repeat(10))));
    }

    #[test]
    fn missing_api_key_is_a_config_error() {
        assert!(matches!(
            GeminiAnswerGenerator::new(GeneratorConfig::default()),
            Err(ServiceError::Config(_))
        ));
    }

    #[test]
    fn builds_generate_content_url() {
        let generator = GeminiAnswerGenerator::new(GeneratorConfig {
            api_key: Some("key".into()),
            endpoint: "http://localhost:9/".into(),
            ..GeneratorConfig::default()
        })
        .unwrap();
        assert_eq!(
            generator.url,
            "http://localhost:9/v1beta/models/gemini-1.5-flash-latest:generateContent"
        );
        assert_eq!(generator.model(), "gemini-1.5-flash-latest");
    }

    #[test]
    fn only_network_rate_limit_and_server_errors_are_transient() {
        assert!(RequestError::Network("reset".into()).is_transient());
        let status = |code| RequestError::Status {
            status: StatusCode::from_u16(code).unwrap(),
            detail: String::new(),
        };
        assert!(status(429).is_transient());
        assert!(status(503).is_transient());
        assert!(!status(400).is_transient());
        assert!(!status(403).is_transient());
        assert!(!RequestError::NoText.is_transient());
    }

    #[tokio::test]
    async fn unreachable_endpoint_yields_apology() {
        let generator = GeminiAnswerGenerator::new(GeneratorConfig {
            api_key: Some("key".into()),
            endpoint: "http://127.0.0.1:9".into(),
            request_timeout_secs: 2,
            ..GeneratorConfig::default()
        })
        .unwrap()
        .with_retry_policy(RetryPolicy::new(1, Duration::from_millis(1), Duration::from_millis(1)));

        let answer = generator.generate("q", "context").await.unwrap();
        assert_eq!(answer, APOLOGY);
    }
}
