//! Contrastive fine-tuning of the embedding model.
//!
//! Loads the base BERT checkpoint into a `VarMap` so every weight is
//! trainable, then optimizes a mixed objective over triplets:
//!
//! - triplet margin loss, `relu(margin - sim(a,p) + sim(a,n))`
//! - in-batch InfoNCE, cross-entropy over `a · pᵀ / τ` with the
//!   diagonal as target
//!
//! Mined hard negatives are folded in as extra triplets, with
//! head-token confusions duplicated so they see more gradient steps.
//! Each epoch writes a safetensors checkpoint; the final directory is
//! loadable by the serving encoder as-is.

use crate::mining::HardNegative;
use crate::triplets::Triplet;
use anyhow::{bail, Context};
use candle_core::{DType, Device, Tensor};
use candle_nn::{loss, AdamW, Optimizer, ParamsAdamW, VarBuilder, VarMap};
use candle_transformers::models::bert::{BertModel, Config, DTYPE};
use hf_hub::{api::sync::Api, Repo, RepoType};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokenizers::Tokenizer;
use tracing::{info, warn};

const QUERY_PREFIX: &str = substance_mapper::encoder::QUERY_PREFIX;
const PASSAGE_PREFIX: &str = substance_mapper::encoder::PASSAGE_PREFIX;

#[derive(Debug, Clone)]
pub struct FinetuneConfig {
    /// Hub repo id or local checkpoint directory.
    pub model: String,
    pub output_dir: PathBuf,
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    /// Triplet margin in similarity units.
    pub margin: f64,
    /// InfoNCE temperature.
    pub temperature: f64,
    /// Weight of the InfoNCE term relative to the triplet term.
    pub infonce_weight: f64,
    pub seed: u64,
}

impl Default for FinetuneConfig {
    fn default() -> Self {
        Self {
            model: substance_mapper::config::DEFAULT_MODEL_REPO.to_string(),
            output_dir: PathBuf::from("artifacts/checkpoints"),
            epochs: 3,
            batch_size: 16,
            learning_rate: 2e-5,
            margin: 0.2,
            temperature: 0.05,
            infonce_weight: 0.5,
            seed: 42,
        }
    }
}

/// Paths to the three files a checkpoint consists of.
struct ModelFiles {
    config: PathBuf,
    tokenizer: PathBuf,
    weights: PathBuf,
}

fn resolve_model_files(model: &str) -> anyhow::Result<ModelFiles> {
    let dir = Path::new(model);
    if dir.is_dir() {
        return Ok(ModelFiles {
            config: dir.join("config.json"),
            tokenizer: dir.join("tokenizer.json"),
            weights: dir.join("model.safetensors"),
        });
    }
    let api = Api::new().context("hub client init failed")?;
    let repo = api.repo(Repo::new(model.to_string(), RepoType::Model));
    Ok(ModelFiles {
        config: repo.get("config.json").context("download config.json")?,
        tokenizer: repo.get("tokenizer.json").context("download tokenizer.json")?,
        weights: repo
            .get("model.safetensors")
            .context("download model.safetensors")?,
    })
}

/// Trainable model state: all weights live in the varmap.
struct Trainable {
    model: BertModel,
    tokenizer: Tokenizer,
    varmap: VarMap,
    device: Device,
    files: ModelFiles,
}

fn load_trainable(model_id: &str, device: &Device) -> anyhow::Result<Trainable> {
    let files = resolve_model_files(model_id)?;

    let config_raw = std::fs::read_to_string(&files.config)
        .with_context(|| format!("cannot read {}", files.config.display()))?;
    let config: Config = serde_json::from_str(&config_raw).context("invalid model config")?;

    let tokenizer = Tokenizer::from_file(&files.tokenizer)
        .map_err(|e| anyhow::anyhow!("tokenizer load failed: {e}"))?;

    // Build the graph over fresh variables, then overwrite them with the
    // checkpoint weights by name.
    let mut varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DTYPE, device);
    let model = BertModel::load(vb, &config).context("model build failed")?;
    varmap
        .load(&files.weights)
        .with_context(|| format!("cannot load weights from {}", files.weights.display()))?;

    Ok(Trainable {
        model,
        tokenizer,
        varmap,
        device: device.clone(),
        files,
    })
}

/// Tokenize, forward, masked-mean-pool and L2-normalize a batch.
/// Identical pooling to the serving encoder, but kept on the graph so
/// gradients flow.
fn embed_batch(
    model: &BertModel,
    tokenizer: &Tokenizer,
    texts: &[String],
    prefix: &str,
    device: &Device,
) -> anyhow::Result<Tensor> {
    let prefixed: Vec<String> = texts.iter().map(|t| format!("{prefix}{t}")).collect();
    let encodings = tokenizer
        .encode_batch(prefixed, true)
        .map_err(|e| anyhow::anyhow!("tokenization failed: {e}"))?;

    let max_len = encodings
        .iter()
        .map(|e| e.get_ids().len())
        .max()
        .unwrap_or(0);
    let batch = encodings.len();

    let mut all_ids = Vec::with_capacity(batch * max_len);
    let mut all_mask = Vec::with_capacity(batch * max_len);
    let mut all_type_ids = Vec::with_capacity(batch * max_len);
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

    let input_ids = Tensor::from_vec(all_ids, (batch, max_len), device)?;
    let attention_mask = Tensor::from_vec(all_mask, (batch, max_len), device)?;
    let token_type_ids = Tensor::from_vec(all_type_ids, (batch, max_len), device)?;

    let hidden = model.forward(&input_ids, &token_type_ids, Some(&attention_mask))?;

    let mask_f = attention_mask.to_dtype(DTYPE)?.unsqueeze(2)?;
    let summed = hidden.broadcast_mul(&mask_f)?.sum(1)?;
    let counts = mask_f.sum(1)?.clamp(1e-9, f64::MAX)?;
    let pooled = summed.broadcast_div(&counts)?;

    let norm = pooled.sqr()?.sum_keepdim(1)?.sqrt()?.clamp(1e-12, f64::MAX)?;
    Ok(pooled.broadcast_div(&norm)?)
}

/// Row-wise dot product of two `(B, H)` tensors, shape `(B,)`.
fn rowwise_dot(a: &Tensor, b: &Tensor) -> candle_core::Result<Tensor> {
    (a * b)?.sum(1)
}

fn batch_loss(
    model: &BertModel,
    tokenizer: &Tokenizer,
    batch: &[Triplet],
    config: &FinetuneConfig,
    device: &Device,
) -> anyhow::Result<Tensor> {
    let anchors: Vec<String> = batch.iter().map(|t| t.anchor.clone()).collect();
    let positives: Vec<String> = batch.iter().map(|t| t.positive.clone()).collect();
    let negatives: Vec<String> = batch.iter().map(|t| t.negative.clone()).collect();

    let a = embed_batch(model, tokenizer, &anchors, QUERY_PREFIX, device)?;
    let p = embed_batch(model, tokenizer, &positives, PASSAGE_PREFIX, device)?;
    let n = embed_batch(model, tokenizer, &negatives, PASSAGE_PREFIX, device)?;

    // Triplet margin over unit vectors.
    let sim_ap = rowwise_dot(&a, &p)?;
    let sim_an = rowwise_dot(&a, &n)?;
    let violation = ((sim_an - &sim_ap)? + config.margin)?.relu()?;
    let triplet_loss = violation.mean_all()?;

    // In-batch InfoNCE: every other positive in the batch acts as a
    // negative; the matching index is the target class.
    let logits = (a.matmul(&p.t()?)? / config.temperature)?;
    let targets = Tensor::arange(0u32, batch.len() as u32, device)?;
    let infonce = loss::cross_entropy(&logits, &targets)?;

    let total = (triplet_loss + (infonce * config.infonce_weight)?)?;
    Ok(total)
}

/// Turn mined hard negatives into triplets, duplicating head-token
/// confusions so they are oversampled during training.
pub fn hard_negative_triplets(
    mined: &[HardNegative],
    reference_names: &HashMap<String, String>,
) -> Vec<Triplet> {
    let mut out = Vec::new();
    for neg in mined {
        let Some(positive) = reference_names.get(&neg.anchor_sid) else {
            continue;
        };
        if positive.eq_ignore_ascii_case(&neg.anchor) {
            continue;
        }
        let triplet = Triplet {
            anchor: neg.anchor.clone(),
            positive: positive.clone(),
            negative: neg.negative_name.clone(),
            anchor_sid: neg.anchor_sid.clone(),
            positive_sid: neg.anchor_sid.clone(),
            negative_sid: neg.negative_sid.clone(),
            category: String::new(),
        };
        let copies = if neg.shared_head_token { 2 } else { 1 };
        for _ in 0..copies {
            out.push(triplet.clone());
        }
    }
    out
}

/// Run fine-tuning and return the final checkpoint directory.
pub fn finetune(
    triplets: Vec<Triplet>,
    mined: Vec<Triplet>,
    config: &FinetuneConfig,
) -> anyhow::Result<PathBuf> {
    if triplets.is_empty() && mined.is_empty() {
        bail!("nothing to train on");
    }
    let device = Device::Cpu;
    let trainable = load_trainable(&config.model, &device)?;

    let mut examples = triplets;
    examples.extend(mined);
    info!(
        "Fine-tuning on {} triplets for {} epochs (lr={}, batch={})",
        examples.len(),
        config.epochs,
        config.learning_rate,
        config.batch_size
    );

    let params = ParamsAdamW {
        lr: config.learning_rate,
        ..Default::default()
    };
    let mut optimizer = AdamW::new(trainable.varmap.all_vars(), params)?;

    std::fs::create_dir_all(&config.output_dir)
        .with_context(|| format!("cannot create {}", config.output_dir.display()))?;

    let mut rng = rand::rngs::StdRng::seed_from_u64(config.seed);
    for epoch in 0..config.epochs {
        examples.shuffle(&mut rng);

        let mut epoch_loss = 0f32;
        let mut batches = 0usize;
        for batch in examples.chunks(config.batch_size) {
            // A single-row batch has no in-batch negatives to rank.
            if batch.len() < 2 {
                continue;
            }
            let loss = batch_loss(
                &trainable.model,
                &trainable.tokenizer,
                batch,
                config,
                &device,
            )?;
            optimizer.backward_step(&loss)?;
            epoch_loss += loss.to_scalar::<f32>()?;
            batches += 1;
        }
        if batches == 0 {
            warn!("Epoch {epoch}: no trainable batch (batch_size too large?)");
            continue;
        }

        let checkpoint = config
            .output_dir
            .join(format!("checkpoint-epoch-{epoch}.safetensors"));
        trainable.varmap.save(&checkpoint)?;
        info!(
            "Epoch {}: mean loss {:.4}, checkpoint {}",
            epoch,
            epoch_loss / batches as f32,
            checkpoint.display()
        );
    }

    // Final layout mirrors a hub checkpoint so the serving encoder can
    // point straight at the directory.
    trainable
        .varmap
        .save(config.output_dir.join("model.safetensors"))?;
    std::fs::copy(
        &trainable.files.config,
        config.output_dir.join("config.json"),
    )?;
    std::fs::copy(
        &trainable.files.tokenizer,
        config.output_dir.join("tokenizer.json"),
    )?;
    info!("Final checkpoint written to {}", config.output_dir.display());
    Ok(config.output_dir.clone())
}
