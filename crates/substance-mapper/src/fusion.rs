//! Score fusion and confidence banding.
//!
//! This module is the only place that turns raw similarities into a
//! confidence value and a band. Similarities arriving here are inner
//! products over unit vectors (see `index`); no distance-to-similarity
//! conversion happens anywhere else.

use crate::config::{BandThresholds, FusionWeights};
use crate::types::{Candidate, ConfidenceBand};
use serde::{Deserialize, Serialize};

/// Fused retrieval scores for one query.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusedScore {
    pub top1: f32,
    /// `max(top1 - top2, 0)`; 0 when fewer than two candidates exist.
    pub margin: f32,
    pub confidence: f32,
}

/// Combine top-1 similarity and the runner-up margin into a confidence
/// score. Candidates must be sorted descending by similarity.
pub fn fuse(candidates: &[Candidate], weights: FusionWeights) -> FusedScore {
    let top1 = candidates.first().map(|c| c.similarity).unwrap_or(0.0);
    let top2 = candidates.get(1).map(|c| c.similarity).unwrap_or(0.0);
    let margin = if candidates.len() >= 2 {
        (top1 - top2).max(0.0)
    } else {
        0.0
    };
    let confidence = weights.top1_weight * top1 + weights.margin_weight * margin;
    FusedScore {
        top1,
        margin,
        confidence,
    }
}

/// Assign a confidence band. Monotonic in `confidence` by construction:
/// the two cutoffs partition the score axis.
pub fn classify(confidence: f32, thresholds: BandThresholds) -> ConfidenceBand {
    if confidence >= thresholds.mapped {
        ConfidenceBand::Mapped
    } else if confidence >= thresholds.needs_review {
        ConfidenceBand::NeedsReview
    } else {
        ConfidenceBand::NotMapped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn cand(sid: &str, similarity: f32) -> Candidate {
        Candidate {
            sid: sid.into(),
            name: sid.to_lowercase(),
            similarity,
        }
    }

    #[test]
    fn margin_is_zero_with_a_single_candidate() {
        let score = fuse(&[cand("A", 0.9)], FusionWeights::default());
        assert_eq!(score.margin, 0.0);
        assert!((score.confidence - 0.85 * 0.9).abs() < 1e-6);
    }

    #[test]
    fn margin_is_difference_of_top_two() {
        let score = fuse(
            &[cand("A", 0.9), cand("B", 0.7), cand("C", 0.1)],
            FusionWeights::default(),
        );
        assert!((score.margin - 0.2).abs() < 1e-6);
    }

    #[test]
    fn empty_candidates_fuse_to_zero() {
        let score = fuse(&[], FusionWeights::default());
        assert_eq!(score.top1, 0.0);
        assert_eq!(score.margin, 0.0);
        assert_eq!(score.confidence, 0.0);
    }

    #[test]
    fn weighted_formula_reduces_to_top1_as_margin_vanishes() {
        // Near-equidistant top two: confidence is driven by top1 alone.
        let w = FusionWeights {
            top1_weight: 0.75,
            margin_weight: 0.25,
        };
        let score = fuse(&[cand("A", 0.82), cand("B", 0.8199)], w);
        assert!(score.margin < 1e-3);
        assert!((score.confidence - 0.75 * 0.82).abs() < 1e-3);
    }

    #[test]
    fn margin_bounds_hold_across_random_corpora() {
        let mut rng = StdRng::seed_from_u64(42);
        for &n in &[1usize, 2, 5] {
            for _ in 0..200 {
                let mut sims: Vec<f32> = (0..n).map(|_| rng.gen_range(0.0..=1.0)).collect();
                sims.sort_by(|a, b| b.partial_cmp(a).unwrap());
                let candidates: Vec<Candidate> = sims
                    .iter()
                    .enumerate()
                    .map(|(i, &s)| cand(&format!("S{i}"), s))
                    .collect();
                let score = fuse(&candidates, FusionWeights::default());
                assert!(score.margin >= 0.0 && score.margin <= 1.0);
                if n >= 2 {
                    assert!((score.margin - (sims[0] - sims[1])).abs() < 1e-6);
                } else {
                    assert_eq!(score.margin, 0.0);
                }
            }
        }
    }

    #[test]
    fn band_assignment_is_monotonic() {
        let thresholds = BandThresholds::default();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let c1: f32 = rng.gen_range(0.0..=1.0);
            let c2: f32 = rng.gen_range(0.0..=1.0);
            let (hi, lo) = if c1 >= c2 { (c1, c2) } else { (c2, c1) };
            assert!(classify(hi, thresholds) >= classify(lo, thresholds));
        }
    }

    #[test]
    fn bands_honor_the_configured_cutoffs() {
        let t = BandThresholds {
            mapped: 0.8,
            needs_review: 0.6,
        };
        assert_eq!(classify(0.95, t), ConfidenceBand::Mapped);
        assert_eq!(classify(0.80, t), ConfidenceBand::Mapped);
        assert_eq!(classify(0.79, t), ConfidenceBand::NeedsReview);
        assert_eq!(classify(0.60, t), ConfidenceBand::NeedsReview);
        assert_eq!(classify(0.59, t), ConfidenceBand::NotMapped);
    }
}
