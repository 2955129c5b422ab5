//! Sentence embedding with Candle and multilingual-e5-small.
//!
//! E5 is a retrieval-optimized model: queries and passages are embedded
//! asymmetrically via instruction prefixes, pooled by masked mean over
//! token states (not CLS), then L2-normalized so inner product equals
//! cosine similarity.

use super::{EmbedRole, TextEncoder};
use crate::config::DEFAULT_MODEL_REPO;
use crate::error::{MapperError, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config, DTYPE};
use hf_hub::{api::sync::Api, Repo, RepoType};
use std::path::{Path, PathBuf};
use tokenizers::Tokenizer;
use tracing::{debug, info};

/// Embedding dimension of multilingual-e5-small.
pub const EMBEDDING_DIM: usize = 384;

/// Batch size for internal chunking; a reasonable balance for CPU
/// inference on short substance names.
const BATCH_SIZE: usize = 64;

/// Candle-backed sentence encoder.
///
/// Construction loads the model eagerly and fails fast: callers build
/// the nearest-neighbor index from this encoder at startup, so a lazy
/// failure would surface at the worst possible moment.
pub struct CandleEncoder {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    dim: usize,
    model_id: String,
}

impl CandleEncoder {
    /// Load the default checkpoint from the HuggingFace hub cache.
    pub fn new() -> Result<Self> {
        Self::from_repo(DEFAULT_MODEL_REPO)
    }

    /// Load from a hub repo id, or from a local directory when the given
    /// string names one (the fine-tuned checkpoints written by the
    /// offline pipeline are plain directories).
    pub fn from_repo(model_repo: &str) -> Result<Self> {
        let local = Path::new(model_repo);
        if local.is_dir() {
            return Self::from_dir(local);
        }

        info!("Loading embedding model from hub: {}", model_repo);
        let api = Api::new()
            .map_err(|e| MapperError::Configuration(format!("hub client init failed: {e}")))?;
        let repo = api.repo(Repo::new(model_repo.to_string(), RepoType::Model));

        let config_path = hub_get(&repo, "config.json")?;
        let tokenizer_path = hub_get(&repo, "tokenizer.json")?;
        let weights_path = hub_get(&repo, "model.safetensors")?;
        debug!("Model files resolved in hub cache");

        Self::load(&config_path, &tokenizer_path, &weights_path, model_repo)
    }

    /// Load from a local directory containing `config.json`,
    /// `tokenizer.json` and `model.safetensors`.
    pub fn from_dir(dir: &Path) -> Result<Self> {
        info!("Loading embedding model from directory: {}", dir.display());
        let id = dir.display().to_string();
        Self::load(
            &dir.join("config.json"),
            &dir.join("tokenizer.json"),
            &dir.join("model.safetensors"),
            &id,
        )
    }

    fn load(
        config_path: &Path,
        tokenizer_path: &Path,
        weights_path: &Path,
        model_id: &str,
    ) -> Result<Self> {
        let device = Device::Cpu;

        let config_raw = std::fs::read_to_string(config_path).map_err(|e| {
            MapperError::Configuration(format!("cannot read {}: {e}", config_path.display()))
        })?;
        let config: Config = serde_json::from_str(&config_raw)
            .map_err(|e| MapperError::Configuration(format!("invalid model config: {e}")))?;
        let dim = config.hidden_size;
        debug!("Model config loaded: hidden_size={}", dim);

        let tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| MapperError::Configuration(format!("tokenizer load failed: {e}")))?;

        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_path.to_path_buf()], DTYPE, &device)
                .map_err(|e| MapperError::Configuration(format!("weights load failed: {e}")))?
        };
        let model = BertModel::load(vb, &config)
            .map_err(|e| MapperError::Configuration(format!("model build failed: {e}")))?;

        info!("Embedding model loaded: {} ({}-dim)", model_id, dim);
        Ok(Self {
            model,
            tokenizer,
            device,
            dim,
            model_id: model_id.to_string(),
        })
    }

    fn forward_chunk(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| MapperError::Encoding(format!("tokenization failed: {e}")))?;

        let max_len = encodings
            .iter()
            .map(|e| e.get_ids().len())
            .max()
            .unwrap_or(0);

        let mut all_ids = Vec::new();
        let mut all_mask = Vec::new();
        let mut all_type_ids = Vec::new();
        for encoding in &encodings {
            let mut ids = encoding.get_ids().to_vec();
            let mut mask = encoding.get_attention_mask().to_vec();
            let mut type_ids = encoding.get_type_ids().to_vec();
            ids.resize(max_len, 0);
            mask.resize(max_len, 0);
            type_ids.resize(max_len, 0);
            all_ids.extend(ids);
            all_mask.extend(mask);
            all_type_ids.extend(type_ids);
        }

        let batch = texts.len();
        let input_ids =
            tensor_2d(all_ids, batch, max_len, &self.device)?.to_dtype(DType::U32)
                .map_err(candle_encoding)?;
        let attention_mask = tensor_2d(all_mask, batch, max_len, &self.device)?;
        let token_type_ids =
            tensor_2d(all_type_ids, batch, max_len, &self.device)?.to_dtype(DType::U32)
                .map_err(candle_encoding)?;

        let hidden = self
            .model
            .forward(&input_ids, &token_type_ids, Some(&attention_mask))
            .map_err(candle_encoding)?;

        // Masked mean pooling: sum token states where the mask is 1,
        // divide by the token count per row.
        let mask_f = attention_mask
            .to_dtype(DTYPE)
            .map_err(candle_encoding)?
            .unsqueeze(2)
            .map_err(candle_encoding)?;
        let summed = hidden
            .broadcast_mul(&mask_f)
            .map_err(candle_encoding)?
            .sum(1)
            .map_err(candle_encoding)?;
        let counts = mask_f
            .sum(1)
            .map_err(candle_encoding)?
            .clamp(1e-9, f64::MAX)
            .map_err(candle_encoding)?;
        let pooled = summed.broadcast_div(&counts).map_err(candle_encoding)?;

        let normalized = l2_normalize(&pooled).map_err(candle_encoding)?;
        normalized.to_vec2::<f32>().map_err(candle_encoding)
    }
}

fn tensor_2d(data: Vec<u32>, rows: usize, cols: usize, device: &Device) -> Result<Tensor> {
    Tensor::from_vec(data, (rows, cols), device).map_err(candle_encoding)
}

fn candle_encoding(e: candle_core::Error) -> MapperError {
    MapperError::Encoding(e.to_string())
}

/// Row-wise L2 normalization.
pub(crate) fn l2_normalize(t: &Tensor) -> candle_core::Result<Tensor> {
    let norm = t.sqr()?.sum_keepdim(1)?.sqrt()?.clamp(1e-12, f64::MAX)?;
    t.broadcast_div(&norm)
}

impl TextEncoder for CandleEncoder {
    fn encode(&self, texts: &[&str], role: EmbedRole) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let prefixed: Vec<String> = texts
            .iter()
            .map(|t| format!("{}{}", role.prefix(), t))
            .collect();

        let mut out = Vec::with_capacity(texts.len());
        for chunk in prefixed.chunks(BATCH_SIZE) {
            out.extend(self.forward_chunk(chunk)?);
        }
        Ok(out)
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn id(&self) -> &str {
        &self.model_id
    }
}

/// Resolve a file within a hub repo, mapping failures to a startup error.
fn hub_get(repo: &hf_hub::api::sync::ApiRepo, file: &str) -> Result<PathBuf> {
    repo.get(file)
        .map_err(|e| MapperError::Configuration(format!("failed to download {file}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{dot, l2_norm};

    #[test]
    #[ignore] // Requires model download
    fn encoded_rows_are_unit_length() {
        let encoder = CandleEncoder::new().expect("model load");
        let rows = encoder
            .encode(&["carbon dioxide", "sodium chloride"], EmbedRole::Passage)
            .expect("encode");
        assert_eq!(rows.len(), 2);
        for row in &rows {
            assert_eq!(row.len(), encoder.dim());
            assert!((l2_norm(row) - 1.0).abs() < 0.01);
        }
    }

    #[test]
    #[ignore] // Requires model download
    fn query_and_passage_embeddings_differ() {
        let encoder = CandleEncoder::new().expect("model load");
        let q = encoder.encode_one("methane", EmbedRole::Query).unwrap();
        let p = encoder.encode_one("methane", EmbedRole::Passage).unwrap();
        let diff: f32 = q.iter().zip(&p).map(|(a, b)| (a - b).abs()).sum();
        assert!(diff > 0.01, "prefixes should change the embedding");
    }

    #[test]
    #[ignore] // Requires model download
    fn retrieval_prefers_the_related_passage() {
        let encoder = CandleEncoder::new().expect("model load");
        let q = encoder.encode_one("CO2", EmbedRole::Query).unwrap();
        let good = encoder
            .encode_one("carbon dioxide", EmbedRole::Passage)
            .unwrap();
        let bad = encoder
            .encode_one("sulfur hexafluoride", EmbedRole::Passage)
            .unwrap();
        assert!(dot(&q, &good) > dot(&q, &bad));
    }
}
