//! Dense sentence-encoder embeddings.
//!
//! The encoder itself is an external, expensive resource. It is reached
//! through a [`ModelHandle`] that the host process owns and injects: the
//! handle loads the encoder on first use, at most once, and shares the result
//! read-only with every request afterwards.

use std::fmt;
use std::sync::{Arc, OnceLock};

use tracing::{debug, error, info, warn};

use crate::error::{Result, RetrievalError};

/// A pretrained model that maps text to a fixed-dimension vector.
///
/// Implementations must be safe to call concurrently through a shared
/// reference. The default [`encode_batch`](SentenceEncoder::encode_batch)
/// calls [`encode`](SentenceEncoder::encode) for each input; encoders with
/// native batching should override it.
pub trait SentenceEncoder: Send + Sync {
    /// Encode a single text.
    fn encode(&self, text: &str) -> Result<Vec<f32>>;

    /// Encode a batch of texts, one vector per input.
    fn encode_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|text| self.encode(text)).collect()
    }

    /// Dimensionality of every vector this encoder produces.
    fn dimensions(&self) -> usize;
}

type EncoderLoader = Box<dyn Fn() -> Result<Arc<dyn SentenceEncoder>> + Send + Sync>;

/// A lazily initialized, process-wide handle to a [`SentenceEncoder`].
///
/// The loader runs at most once, even when several requests race for the
/// first access. A failed load is remembered: the handle then reports the
/// encoder as unavailable for the rest of its life instead of retrying.
///
/// # Example
///
/// ```rust,ignore
/// use std::sync::Arc;
/// use docqa_retrieval::ModelHandle;
///
/// let handle = Arc::new(ModelHandle::new(|| load_my_encoder()));
/// // ...inject `handle` into every Retriever built by this process.
/// ```
pub struct ModelHandle {
    loader: EncoderLoader,
    encoder: OnceLock<Option<Arc<dyn SentenceEncoder>>>,
}

impl ModelHandle {
    /// Create a handle that runs `loader` on first access.
    pub fn new<F>(loader: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn SentenceEncoder>> + Send + Sync + 'static,
    {
        Self { loader: Box::new(loader), encoder: OnceLock::new() }
    }

    /// Create a handle around an encoder that is already loaded.
    pub fn ready(encoder: Arc<dyn SentenceEncoder>) -> Self {
        let handle = Self::unavailable();
        let _ = handle.encoder.set(Some(encoder));
        handle
    }

    /// Create a handle for a process with no dense encoder at all.
    pub fn unavailable() -> Self {
        Self {
            loader: Box::new(|| {
                Err(RetrievalError::ModelLoad("no encoder configured".to_string()))
            }),
            encoder: OnceLock::new(),
        }
    }

    /// The encoder, loading it on first call. `None` if loading failed.
    pub fn get(&self) -> Option<Arc<dyn SentenceEncoder>> {
        self.encoder
            .get_or_init(|| match (self.loader)() {
                Ok(encoder) => {
                    info!(dimensions = encoder.dimensions(), "loaded sentence encoder");
                    Some(encoder)
                }
                Err(e) => {
                    error!(error = %e, "failed to load sentence encoder");
                    None
                }
            })
            .clone()
    }

    /// Whether a load has been attempted.
    pub fn is_initialized(&self) -> bool {
        self.encoder.get().is_some()
    }
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.encoder.get() {
            None => "uninitialized",
            Some(None) => "unavailable",
            Some(Some(_)) => "loaded",
        };
        f.debug_struct("ModelHandle").field("state", &state).finish()
    }
}

/// Truncate `text` to at most `max_chars` characters.
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

/// Dense embedding settings: the injected model handle plus input truncation.
#[derive(Debug, Clone)]
pub struct DenseEmbedder {
    handle: Arc<ModelHandle>,
    max_chars: usize,
}

impl DenseEmbedder {
    /// Create a dense embedder over `handle`, truncating inputs to `max_chars`.
    pub fn new(handle: Arc<ModelHandle>, max_chars: usize) -> Self {
        Self { handle, max_chars }
    }

    /// The injected model handle.
    pub fn handle(&self) -> &Arc<ModelHandle> {
        &self.handle
    }

    /// Resolve the encoder, loading it if this is the first use.
    pub fn encoder(&self) -> Option<Arc<dyn SentenceEncoder>> {
        self.handle.get()
    }

    /// Input truncation length in characters.
    pub fn max_chars(&self) -> usize {
        self.max_chars
    }
}

/// Encode every chunk, substituting a zero vector for any chunk that fails.
///
/// Returns the vectors and the positions that were substituted.
pub(crate) fn encode_chunks(
    encoder: &dyn SentenceEncoder,
    chunks: &[String],
    max_chars: usize,
) -> (Vec<Vec<f32>>, Vec<usize>) {
    let dimensions = encoder.dimensions();
    let inputs: Vec<&str> = chunks.iter().map(|c| truncate_chars(c, max_chars)).collect();

    match encoder.encode_batch(&inputs) {
        Ok(vectors)
            if vectors.len() == inputs.len() && vectors.iter().all(|v| v.len() == dimensions) =>
        {
            debug!(batch_size = inputs.len(), "encoded chunk batch");
            return (vectors, Vec::new());
        }
        Ok(vectors) => {
            warn!(
                expected = inputs.len(),
                returned = vectors.len(),
                "batch encoding returned malformed output, encoding chunks one by one"
            );
        }
        Err(e) => {
            warn!(error = %e, "batch encoding failed, encoding chunks one by one");
        }
    }

    let mut failed = Vec::new();
    let vectors = inputs
        .iter()
        .enumerate()
        .map(|(position, input)| match encoder.encode(input) {
            Ok(vector) if vector.len() == dimensions => vector,
            Ok(vector) => {
                warn!(position, returned = vector.len(), dimensions, "wrong embedding size");
                failed.push(position);
                vec![0.0; dimensions]
            }
            Err(e) => {
                warn!(position, error = %e, "chunk embedding failed, using zero vector");
                failed.push(position);
                vec![0.0; dimensions]
            }
        })
        .collect();
    (vectors, failed)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct LengthEncoder;

    impl SentenceEncoder for LengthEncoder {
        fn encode(&self, text: &str) -> Result<Vec<f32>> {
            if text.contains("poison") {
                return Err(RetrievalError::Embedding {
                    variant: "test".into(),
                    message: "poisoned input".into(),
                });
            }
            Ok(vec![text.chars().count() as f32, 1.0])
        }

        fn dimensions(&self) -> usize {
            2
        }
    }

    #[test]
    fn truncates_on_char_boundaries() {
        assert_eq!(truncate_chars("héllo wörld", 4), "héll");
        assert_eq!(truncate_chars("short", 50), "short");
    }

    #[test]
    fn handle_loads_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handle = ModelHandle::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(LengthEncoder) as Arc<dyn SentenceEncoder>)
        });

        assert!(!handle.is_initialized());
        assert!(handle.get().is_some());
        assert!(handle.get().is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_load_is_remembered() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handle = ModelHandle::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(RetrievalError::ModelLoad("weights missing".into()))
        });

        assert!(handle.get().is_none());
        assert!(handle.get().is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(handle.is_initialized());
    }

    #[test]
    fn concurrent_first_access_loads_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handle = Arc::new(ModelHandle::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(LengthEncoder) as Arc<dyn SentenceEncoder>)
        }));

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let handle = handle.clone();
                std::thread::spawn(move || handle.get().is_some())
            })
            .collect();
        for thread in threads {
            assert!(thread.join().unwrap());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failing_chunk_gets_zero_vector_only() {
        let chunks: Vec<String> =
            vec!["fine".into(), "poison pill".into(), "also fine".into()];
        let (vectors, failed) = encode_chunks(&LengthEncoder, &chunks, 100);
        assert_eq!(failed, vec![1]);
        assert_eq!(vectors[0], vec![4.0, 1.0]);
        assert_eq!(vectors[1], vec![0.0, 0.0]);
        assert_eq!(vectors[2], vec![9.0, 1.0]);
    }

    #[test]
    fn inputs_are_truncated_before_encoding() {
        let chunks: Vec<String> = vec!["abcdefghij".into()];
        let (vectors, _) = encode_chunks(&LengthEncoder, &chunks, 3);
        assert_eq!(vectors[0], vec![3.0, 1.0]);
    }
}
