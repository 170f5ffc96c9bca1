//! Service configuration.
//!
//! A [`ServiceConfig`] is read from an optional TOML file and then patched
//! from the environment:
//!
//! | Variable              | Field                |
//! |-----------------------|----------------------|
//! | `GEMINI_API_KEY`      | `generator.api_key`  |
//! | `DOCQA_MODEL`         | `generator.model`    |
//! | `DOCQA_EMBEDDER`      | `retrieval.embedder` |
//! | `DOCQA_TOP_K`         | `retrieval.top_k`    |
//! | `DOCQA_MAX_QUESTIONS` | `max_questions`      |
//!
//! ```toml
//! max_questions = 10
//!
//! [retrieval]
//! chunk_size = 300
//! embedder = "tf_idf"
//!
//! [generator]
//! model = "gemini-1.5-flash-latest"
//! ```

use std::fmt;
use std::path::Path;

use docqa_retrieval::{EmbedderKind, RetrievalConfig};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Result, ServiceError};

/// Default Gemini model.
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash-latest";

/// Default Gemini API base URL.
pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com";

/// Top-level configuration for the question-answering service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServiceConfig {
    /// Chunking, embedding and ranking parameters.
    pub retrieval: RetrievalConfig,
    /// Downloads larger than this many bytes are rejected.
    pub max_document_bytes: u64,
    /// Maximum number of questions per request.
    pub max_questions: usize,
    /// Download timeout in seconds.
    pub download_timeout_secs: u64,
    /// Answer generator settings.
    pub generator: GeneratorConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            retrieval: RetrievalConfig::default(),
            max_document_bytes: 50 * 1024 * 1024,
            max_questions: 20,
            download_timeout_secs: 30,
            generator: GeneratorConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Read a TOML file, apply environment overrides and validate.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Config`] if the file cannot be read or parsed,
    /// or if the resulting configuration is invalid.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ServiceError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        let mut config = Self::from_toml(&contents)?;
        config.apply_env_overrides();
        config.validate()?;
        debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Defaults patched from the environment, validated.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Config`] if an override produces an invalid
    /// configuration.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse TOML without applying overrides or validating.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Config`] if the text is not valid TOML for
    /// this schema.
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| ServiceError::Config(format!("failed to parse configuration: {e}")))
    }

    /// Patch fields from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Patch fields from `lookup`, which maps a variable name to its value.
    ///
    /// Unparseable values are ignored with a warning.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("GEMINI_API_KEY").filter(|k| !k.is_empty()) {
            self.generator.api_key = Some(key);
        }
        if let Some(model) = lookup("DOCQA_MODEL").filter(|m| !m.is_empty()) {
            self.generator.model = model;
        }
        if let Some(value) = lookup("DOCQA_EMBEDDER") {
            match parse_embedder(&value) {
                Some(kind) => self.retrieval.embedder = kind,
                None => warn!(%value, "ignoring unknown DOCQA_EMBEDDER"),
            }
        }
        if let Some(value) = lookup("DOCQA_TOP_K") {
            match value.parse() {
                Ok(k) => self.retrieval.top_k = k,
                Err(_) => warn!(%value, "ignoring invalid DOCQA_TOP_K"),
            }
        }
        if let Some(value) = lookup("DOCQA_MAX_QUESTIONS") {
            match value.parse() {
                Ok(max) => self.max_questions = max,
                Err(_) => warn!(%value, "ignoring invalid DOCQA_MAX_QUESTIONS"),
            }
        }
    }

    /// Check that the parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        self.retrieval.validate().map_err(|e| ServiceError::Config(e.to_string()))?;
        if self.max_questions == 0 {
            return Err(ServiceError::Config("max_questions must be greater than zero".into()));
        }
        if self.max_document_bytes == 0 {
            return Err(ServiceError::Config(
                "max_document_bytes must be greater than zero".into(),
            ));
        }
        self.generator.validate()
    }
}

/// Parse an embedder name as written on the command line or in the
/// environment (`token-frequency`, `tf-idf`, `dense`; `_` also accepted).
pub fn parse_embedder(value: &str) -> Option<EmbedderKind> {
    match value.trim().to_ascii_lowercase().replace('_', "-").as_str() {
        "token-frequency" | "frequency" => Some(EmbedderKind::TokenFrequency),
        "tf-idf" | "tfidf" => Some(EmbedderKind::TfIdf),
        "dense" => Some(EmbedderKind::Dense),
        _ => None,
    }
}

/// Settings for the Gemini answer generator.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Model name.
    pub model: String,
    /// API base URL.
    pub endpoint: String,
    /// Context passed to the model is truncated to this many characters.
    pub max_context_chars: usize,
    /// Retries after the first attempt for transient failures.
    pub max_retries: u32,
    /// First retry delay in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound on any retry delay in milliseconds.
    pub max_delay_ms: u64,
    /// Request timeout in seconds.
    pub request_timeout_secs: u64,
    /// API key. Never serialized.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            max_context_chars: 30_000,
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
            request_timeout_secs: 60,
            api_key: None,
        }
    }
}

impl GeneratorConfig {
    fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(ServiceError::Config("generator.model must not be empty".into()));
        }
        if self.max_context_chars == 0 {
            return Err(ServiceError::Config(
                "generator.max_context_chars must be greater than zero".into(),
            ));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(ServiceError::Config(format!(
                "generator.base_delay_ms ({}) must not exceed max_delay_ms ({})",
                self.base_delay_ms, self.max_delay_ms
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for GeneratorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratorConfig")
            .field("model", &self.model)
            .field("endpoint", &self.endpoint)
            .field("max_context_chars", &self.max_context_chars)
            .field("max_retries", &self.max_retries)
            .field("base_delay_ms", &self.base_delay_ms)
            .field("max_delay_ms", &self.max_delay_ms)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
