//! BERT sentence encoder running locally through Candle.
//!
//! This module is only available when the `candle` feature is enabled.

use std::sync::Arc;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config};
use hf_hub::{Repo, RepoType, api::sync::Api};
use tokenizers::{PaddingParams, Tokenizer};
use tracing::{debug, info};

use super::dense::{ModelHandle, SentenceEncoder};
use crate::error::{Result, RetrievalError};

/// The default sentence-transformers model.
pub const DEFAULT_MODEL_ID: &str = "sentence-transformers/all-MiniLM-L6-v2";

fn load_error(context: &str, e: impl std::fmt::Display) -> RetrievalError {
    RetrievalError::ModelLoad(format!("{context}: {e}"))
}

fn inference_error(e: impl std::fmt::Display) -> RetrievalError {
    RetrievalError::Embedding { variant: "dense".to_string(), message: e.to_string() }
}

/// A [`SentenceEncoder`] backed by a BERT model from the Hugging Face Hub.
///
/// Outputs are mean-pooled over the attention mask and L2-normalized, so
/// cosine similarity and squared-L2 distance rank identically.
pub struct BertSentenceEncoder {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    dimensions: usize,
}

impl BertSentenceEncoder {
    /// Download (or reuse the cached copy of) `model_id` and load it on CPU.
    ///
    /// # Errors
    ///
    /// Returns [`RetrievalError::ModelLoad`] if any model file cannot be
    /// fetched or parsed.
    pub fn load(model_id: &str) -> Result<Self> {
        let device = Device::Cpu;

        let api = Api::new().map_err(|e| load_error("failed to create hub client", e))?;
        let repo = api.repo(Repo::new(model_id.to_string(), RepoType::Model));
        let config_path =
            repo.get("config.json").map_err(|e| load_error("failed to fetch config", e))?;
        let tokenizer_path =
            repo.get("tokenizer.json").map_err(|e| load_error("failed to fetch tokenizer", e))?;
        let weights_path = repo
            .get("model.safetensors")
            .map_err(|e| load_error("failed to fetch weights", e))?;

        let config_contents = std::fs::read_to_string(config_path)
            .map_err(|e| load_error("failed to read config", e))?;
        let config: Config = serde_json::from_str(&config_contents)
            .map_err(|e| load_error("failed to parse config", e))?;

        let mut tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| load_error("failed to load tokenizer", e))?;
        tokenizer.with_padding(Some(PaddingParams::default()));

        // SAFETY: the weights file is owned by the hub cache and is not
        // modified while the process holds the mapping.
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_path], DType::F32, &device)
                .map_err(|e| load_error("failed to map weights", e))?
        };
        let model = BertModel::load(vb, &config).map_err(|e| load_error("failed to build model", e))?;

        let mut encoder = Self { model, tokenizer, device, dimensions: 0 };
        let (_, dimensions) = encoder
            .forward(&["dimension probe"])
            .and_then(|t| t.dims2())
            .map_err(|e| load_error("failed to run probe inference", e))?;
        encoder.dimensions = dimensions;

        info!(model_id, dimensions, "loaded BERT sentence encoder");
        Ok(encoder)
    }

    fn forward(&self, texts: &[&str]) -> candle_core::Result<Tensor> {
        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| candle_core::Error::Msg(format!("tokenization failed: {e}")))?;

        let ids = encodings
            .iter()
            .map(|e| Tensor::new(e.get_ids(), &self.device))
            .collect::<candle_core::Result<Vec<_>>>()?;
        let masks = encodings
            .iter()
            .map(|e| Tensor::new(e.get_attention_mask(), &self.device))
            .collect::<candle_core::Result<Vec<_>>>()?;

        let token_ids = Tensor::stack(&ids, 0)?;
        let attention_mask = Tensor::stack(&masks, 0)?;
        let token_type_ids = token_ids.zeros_like()?;

        let hidden = self.model.forward(&token_ids, &token_type_ids, Some(&attention_mask))?;

        // Mean pooling over real tokens only.
        let mask = attention_mask.unsqueeze(2)?.to_dtype(hidden.dtype())?;
        let summed = hidden.broadcast_mul(&mask)?.sum(1)?;
        let counts = mask.sum(1)?.clamp(1e-9, f64::MAX)?;
        let pooled = summed.broadcast_div(&counts)?;

        let norms = pooled.sqr()?.sum_keepdim(1)?.sqrt()?.clamp(1e-12, f64::MAX)?;
        pooled.broadcast_div(&norms)
    }
}

impl SentenceEncoder for BertSentenceEncoder {
    fn encode(&self, text: &str) -> Result<Vec<f32>> {
        self.encode_batch(&[text])?
            .pop()
            .ok_or_else(|| inference_error("encoder returned no vector"))
    }

    fn encode_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!(batch_size = texts.len(), "encoding with BERT");
        self.forward(texts).and_then(|t| t.to_vec2::<f32>()).map_err(inference_error)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// A [`ModelHandle`] that loads `model_id` on first use.
pub fn bert_model_handle(model_id: impl Into<String>) -> ModelHandle {
    let model_id = model_id.into();
    ModelHandle::new(move || {
        BertSentenceEncoder::load(&model_id).map(|e| Arc::new(e) as Arc<dyn SentenceEncoder>)
    })
}
