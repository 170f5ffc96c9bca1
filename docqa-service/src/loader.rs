//! Document loaders.
//!
//! A [`DocumentLoader`] turns a source string into the document's plain
//! text. [`HttpDocumentLoader`] downloads over HTTP(S), [`FileDocumentLoader`]
//! reads local files, and [`SourceLoader`] picks between the two.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, error, info};
use url::Url;

use crate::config::ServiceConfig;
use crate::error::LoadError;
use crate::extract::{DocumentFormat, extract_text};

/// User agent sent with every download.
pub const USER_AGENT: &str = concat!("docqa-document-loader/", env!("CARGO_PKG_VERSION"));

/// Fetches a document and extracts its text.
#[async_trait]
pub trait DocumentLoader: Send + Sync {
    /// Load `source` and return its trimmed, non-empty text.
    async fn load(&self, source: &str) -> Result<String, LoadError>;
}

/// Downloads documents over HTTP or HTTPS.
#[derive(Debug, Clone)]
pub struct HttpDocumentLoader {
    client: reqwest::Client,
    max_bytes: u64,
}

impl HttpDocumentLoader {
    /// Create a loader rejecting bodies over `max_bytes` and requests slower
    /// than `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::Http`] if the HTTP client cannot be built.
    pub fn new(max_bytes: u64, timeout: Duration) -> Result<Self, LoadError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| LoadError::Http(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, max_bytes })
    }

    /// Create a loader from the service limits.
    ///
    /// # Errors
    ///
    /// See [`HttpDocumentLoader::new`].
    pub fn from_config(config: &ServiceConfig) -> Result<Self, LoadError> {
        Self::new(config.max_document_bytes, Duration::from_secs(config.download_timeout_secs))
    }

    fn parse_url(source: &str) -> Result<Url, LoadError> {
        let url = Url::parse(source).map_err(|e| LoadError::InvalidUrl(format!("{source}: {e}")))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            scheme => Err(LoadError::InvalidUrl(format!(
                "unsupported scheme '{scheme}', expected http or https"
            ))),
        }
    }
}

#[async_trait]
impl DocumentLoader for HttpDocumentLoader {
    async fn load(&self, source: &str) -> Result<String, LoadError> {
        let url = Self::parse_url(source)?;
        info!(%url, "downloading document");

        let mut response = self.client.get(url.clone()).send().await.map_err(|e| {
            error!(%url, error = %e, "download failed");
            LoadError::Http(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            error!(%url, %status, "download returned error status");
            return Err(LoadError::Http(format!("server returned {status}")));
        }

        if let Some(size) = response.content_length() {
            if size > self.max_bytes {
                return Err(LoadError::TooLarge { size, max: self.max_bytes });
            }
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| LoadError::Http(e.to_string()))? {
            let size = (body.len() + chunk.len()) as u64;
            if size > self.max_bytes {
                return Err(LoadError::TooLarge { size, max: self.max_bytes });
            }
            body.extend_from_slice(&chunk);
        }

        let format = DocumentFormat::detect(content_type.as_deref(), url.path(), &body);
        debug!(%format, content_type = ?content_type, bytes = body.len(), "detected document format");
        extract_text(format, &body)
    }
}

/// Reads documents from the local filesystem.
#[derive(Debug, Clone, Copy)]
pub struct FileDocumentLoader {
    max_bytes: u64,
}

impl FileDocumentLoader {
    /// Create a loader rejecting files over `max_bytes`.
    pub fn new(max_bytes: u64) -> Self {
        Self { max_bytes }
    }
}

#[async_trait]
impl DocumentLoader for FileDocumentLoader {
    async fn load(&self, source: &str) -> Result<String, LoadError> {
        let path = Path::new(source);
        let size = tokio::fs::metadata(path).await?.len();
        if size > self.max_bytes {
            return Err(LoadError::TooLarge { size, max: self.max_bytes });
        }

        let bytes = tokio::fs::read(path).await?;
        let format = DocumentFormat::detect(None, source, &bytes);
        info!(path = %path.display(), %format, bytes = bytes.len(), "read document");
        extract_text(format, &bytes)
    }
}

/// Routes `http://` and `https://` sources to [`HttpDocumentLoader`] and
/// everything else to [`FileDocumentLoader`].
#[derive(Debug, Clone)]
pub struct SourceLoader {
    http: HttpDocumentLoader,
    file: FileDocumentLoader,
}

impl SourceLoader {
    /// Create both loaders from the service limits.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::Http`] if the HTTP client cannot be built.
    pub fn from_config(config: &ServiceConfig) -> Result<Self, LoadError> {
        Ok(Self {
            http: HttpDocumentLoader::from_config(config)?,
            file: FileDocumentLoader::new(config.max_document_bytes),
        })
    }
}

#[async_trait]
impl DocumentLoader for SourceLoader {
    async fn load(&self, source: &str) -> Result<String, LoadError> {
        let lower = source.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            self.http.load(source).await
        } else {
            self.file.load(source).await
        }
    }
}
