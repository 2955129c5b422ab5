//! Model-based hard-negative mining.
//!
//! Runs the current encoder over the training anchors against the full
//! reference corpus and keeps the wrong candidates the model finds most
//! convincing: anything above an absolute similarity floor, or within a
//! margin window of the true positive's similarity. These are the
//! confusions fine-tuning should spend its gradient on.
//!
//! Head-token overlap is recorded because many near-misses in this
//! domain share a leading word ("sodium chloride" vs "sodium nitrate");
//! the fine-tuning stage oversamples those.

use crate::dataset::LabeledPair;
use anyhow::bail;
use serde::{Deserialize, Serialize};
use substance_mapper::{EmbedRole, StandardSubstance, SubstanceIndex, TextEncoder};
use tracing::info;

/// One mined confusion: the model scored `negative_name` high for an
/// anchor that truly belongs to `anchor_sid`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HardNegative {
    pub anchor: String,
    pub anchor_sid: String,
    pub negative_sid: String,
    pub negative_name: String,
    pub similarity: f32,
    /// Similarity of the true sid for the same anchor; 0 when the true
    /// sid fell outside the retrieved window.
    pub positive_similarity: f32,
    pub shared_head_token: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct MiningConfig {
    /// Candidates retrieved per anchor before filtering.
    pub top_k: usize,
    /// Keep negatives at or above this similarity regardless of margin.
    pub similarity_floor: f32,
    /// Also keep negatives within this distance of the positive's score.
    pub margin_window: f32,
}

impl Default for MiningConfig {
    fn default() -> Self {
        Self {
            top_k: 20,
            similarity_floor: 0.55,
            margin_window: 0.15,
        }
    }
}

/// Mine hard negatives for every training anchor.
pub fn mine_hard_negatives(
    encoder: &dyn TextEncoder,
    reference: &[StandardSubstance],
    train: &[LabeledPair],
    config: MiningConfig,
) -> anyhow::Result<Vec<HardNegative>> {
    if train.is_empty() {
        bail!("no training anchors to mine against");
    }
    let index = SubstanceIndex::from_corpus(encoder, reference.to_vec())?;

    let anchors: Vec<&str> = train.iter().map(|p| p.raw_name.as_str()).collect();
    let queries = encoder.encode(&anchors, EmbedRole::Query)?;

    let mut mined = Vec::new();
    for (pair, query) in train.iter().zip(&queries) {
        let candidates = index.search(query, config.top_k)?;
        let positive_similarity = candidates
            .iter()
            .find(|c| c.sid == pair.sid)
            .map(|c| c.similarity)
            .unwrap_or(0.0);

        for candidate in &candidates {
            if candidate.sid == pair.sid {
                continue;
            }
            let in_window = positive_similarity > 0.0
                && candidate.similarity >= positive_similarity - config.margin_window;
            if candidate.similarity < config.similarity_floor && !in_window {
                continue;
            }
            mined.push(HardNegative {
                anchor: pair.raw_name.clone(),
                anchor_sid: pair.sid.clone(),
                negative_sid: candidate.sid.clone(),
                negative_name: candidate.name.clone(),
                similarity: candidate.similarity,
                positive_similarity,
                shared_head_token: shares_head_token(&pair.raw_name, &candidate.name),
            });
        }
    }

    // Most confusing first, so a capped consumer keeps the worst cases.
    mined.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    info!(
        "Mined {} hard negatives from {} anchors",
        mined.len(),
        train.len()
    );
    Ok(mined)
}

/// True when both names start with the same token, case-insensitively.
pub fn shares_head_token(a: &str, b: &str) -> bool {
    match (head_token(a), head_token(b)) {
        (Some(x), Some(y)) => x.eq_ignore_ascii_case(y),
        _ => false,
    }
}

fn head_token(s: &str) -> Option<&str> {
    s.split_whitespace().next()
}
