//! Runtime configuration for the mapping core.
//!
//! Fusion weights and band thresholds are calibration artifacts produced
//! by the offline pipeline, so they are injected configuration rather
//! than constants. Every knob can be overridden through the environment
//! without a code change.

use crate::error::MapperError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default encoder checkpoint on the HuggingFace hub.
pub const DEFAULT_MODEL_REPO: &str = "intfloat/multilingual-e5-small";

/// Weights combining top-1 similarity and runner-up margin into a single
/// confidence score. Must sum to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusionWeights {
    pub top1_weight: f32,
    pub margin_weight: f32,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            top1_weight: 0.85,
            margin_weight: 0.15,
        }
    }
}

impl FusionWeights {
    pub fn new(top1_weight: f32, margin_weight: f32) -> Result<Self, MapperError> {
        let w = Self {
            top1_weight,
            margin_weight,
        };
        w.validate()?;
        Ok(w)
    }

    pub fn validate(&self) -> Result<(), MapperError> {
        if (self.top1_weight + self.margin_weight - 1.0).abs() > 1e-4 {
            return Err(MapperError::Configuration(format!(
                "fusion weights must sum to 1 (got {} + {})",
                self.top1_weight, self.margin_weight
            )));
        }
        if self.top1_weight < 0.0 || self.margin_weight < 0.0 {
            return Err(MapperError::Configuration(
                "fusion weights must be non-negative".into(),
            ));
        }
        Ok(())
    }
}

/// Confidence cutoffs for band assignment.
///
/// `confidence >= mapped` → Mapped; `>= needs_review` → NeedsReview;
/// otherwise NotMapped. `mapped` must be strictly greater than
/// `needs_review`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandThresholds {
    pub mapped: f32,
    pub needs_review: f32,
}

impl Default for BandThresholds {
    fn default() -> Self {
        Self {
            mapped: 0.80,
            needs_review: 0.60,
        }
    }
}

impl BandThresholds {
    pub fn new(mapped: f32, needs_review: f32) -> Result<Self, MapperError> {
        let t = Self {
            mapped,
            needs_review,
        };
        t.validate()?;
        Ok(t)
    }

    pub fn validate(&self) -> Result<(), MapperError> {
        if self.mapped <= self.needs_review {
            return Err(MapperError::Configuration(format!(
                "mapped threshold ({}) must exceed needs_review threshold ({})",
                self.mapped, self.needs_review
            )));
        }
        Ok(())
    }
}

/// Full configuration of the online mapping path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapperConfig {
    /// HF hub repo id, or a local directory containing `config.json`,
    /// `tokenizer.json` and `model.safetensors` (e.g. a fine-tuned
    /// checkpoint from the offline pipeline).
    pub model_repo: String,
    /// Directory holding the standard-substance reference table.
    pub data_dir: PathBuf,
    pub fusion: FusionWeights,
    pub thresholds: BandThresholds,
    /// Candidates retrieved per query.
    pub top_k: usize,
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self {
            model_repo: DEFAULT_MODEL_REPO.to_string(),
            data_dir: PathBuf::from("data"),
            fusion: FusionWeights::default(),
            thresholds: BandThresholds::default(),
            top_k: 5,
        }
    }
}

impl MapperConfig {
    /// Build configuration from the environment, falling back to defaults.
    ///
    /// Recognized variables: `SUBSTANCE_MODEL_REPO`, `SUBSTANCE_DATA_DIR`,
    /// `SUBSTANCE_MAPPED_THRESHOLD`, `SUBSTANCE_REVIEW_THRESHOLD`,
    /// `SUBSTANCE_TOP1_WEIGHT`, `SUBSTANCE_MARGIN_WEIGHT`,
    /// `SUBSTANCE_TOP_K`.
    pub fn from_env() -> Result<Self, MapperError> {
        let mut config = Self::default();

        if let Ok(repo) = std::env::var("SUBSTANCE_MODEL_REPO") {
            config.model_repo = repo;
        }
        if let Ok(dir) = std::env::var("SUBSTANCE_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(v) = env_f32("SUBSTANCE_MAPPED_THRESHOLD")? {
            config.thresholds.mapped = v;
        }
        if let Some(v) = env_f32("SUBSTANCE_REVIEW_THRESHOLD")? {
            config.thresholds.needs_review = v;
        }
        if let Some(v) = env_f32("SUBSTANCE_TOP1_WEIGHT")? {
            config.fusion.top1_weight = v;
            config.fusion.margin_weight = 1.0 - v;
        }
        if let Some(v) = env_f32("SUBSTANCE_MARGIN_WEIGHT")? {
            config.fusion.margin_weight = v;
        }
        if let Ok(k) = std::env::var("SUBSTANCE_TOP_K") {
            config.top_k = k.parse().map_err(|_| {
                MapperError::Configuration(format!("SUBSTANCE_TOP_K is not an integer: {k}"))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), MapperError> {
        self.fusion.validate()?;
        self.thresholds.validate()?;
        if self.top_k == 0 {
            return Err(MapperError::Configuration("top_k must be at least 1".into()));
        }
        Ok(())
    }
}

fn env_f32(key: &str) -> Result<Option<f32>, MapperError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<f32>()
            .map(Some)
            .map_err(|_| MapperError::Configuration(format!("{key} is not a number: {raw}"))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(MapperConfig::default().validate().is_ok());
    }

    #[test]
    fn weights_must_sum_to_one() {
        assert!(FusionWeights::new(0.75, 0.25).is_ok());
        assert!(FusionWeights::new(0.9, 0.3).is_err());
        assert!(FusionWeights::new(1.2, -0.2).is_err());
    }

    #[test]
    fn thresholds_must_be_monotonic() {
        assert!(BandThresholds::new(0.8, 0.6).is_ok());
        assert!(BandThresholds::new(0.6, 0.8).is_err());
        assert!(BandThresholds::new(0.7, 0.7).is_err());
    }
}
