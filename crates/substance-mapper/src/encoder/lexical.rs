//! Character n-gram hashing encoder.
//!
//! A deterministic, dependency-free encoder used by the test suite and
//! as an explicit degraded fallback when no neural checkpoint is
//! available. Near-identical strings land on near-identical vectors,
//! which is exactly the behavior the fusion and banding layers are
//! exercised against.

use super::{normalize, EmbedRole, TextEncoder};
use crate::error::Result;

/// Fixed dimension of the lexical embedding.
pub const LEXICAL_DIM: usize = 128;

/// Character-level hashing encoder: unigram frequencies, bigram hashes
/// and position-weighted characters, L2-normalized.
#[derive(Debug, Default, Clone)]
pub struct LexicalEncoder;

impl LexicalEncoder {
    pub fn new() -> Self {
        Self
    }

    fn embed(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; LEXICAL_DIM];
        let lower = text.to_lowercase();

        // Character frequencies (first 64 dims).
        for ch in lower.chars() {
            v[(ch as usize) % 64] += 1.0;
        }

        // Bigram hashes (next 32 dims).
        let chars: Vec<char> = lower.chars().collect();
        for w in chars.windows(2) {
            let h = (w[0] as usize) * 31 + (w[1] as usize);
            v[64 + h % 32] += 1.0;
        }

        // Position-weighted characters (last 32 dims); earlier characters
        // weigh more so head tokens dominate, mirroring how substance
        // names are usually distinguished.
        for (i, ch) in lower.chars().enumerate() {
            v[96 + (ch as usize) % 32] += 1.0 / (i + 1) as f32;
        }

        normalize(v)
    }
}

impl TextEncoder for LexicalEncoder {
    fn encode(&self, texts: &[&str], role: EmbedRole) -> Result<Vec<Vec<f32>>> {
        // The prefix is stripped of the role marker before hashing: a
        // lexical representation is symmetric, but the trait contract
        // (prefix applied internally) is still honored for callers that
        // inspect `role`.
        let _ = role;
        Ok(texts.iter().map(|t| Self::embed(t)).collect())
    }

    fn dim(&self) -> usize {
        LEXICAL_DIM
    }

    fn id(&self) -> &str {
        "lexical-char-ngram-v1"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{dot, l2_norm};

    #[test]
    fn identical_text_is_identical_vector() {
        let enc = LexicalEncoder::new();
        let a = enc.encode_one("Sodium Chloride", EmbedRole::Query).unwrap();
        let b = enc.encode_one("Sodium Chloride", EmbedRole::Query).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn case_differences_do_not_matter() {
        let enc = LexicalEncoder::new();
        let a = enc.encode_one("sodium chloride", EmbedRole::Query).unwrap();
        let b = enc
            .encode_one("Sodium Chloride", EmbedRole::Passage)
            .unwrap();
        assert!((dot(&a, &b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn vectors_are_normalized() {
        let enc = LexicalEncoder::new();
        let v = enc.encode_one("methane", EmbedRole::Passage).unwrap();
        assert_eq!(v.len(), LEXICAL_DIM);
        assert!((l2_norm(&v) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn related_names_score_higher_than_unrelated() {
        let enc = LexicalEncoder::new();
        let q = enc.encode_one("sodium chlorid", EmbedRole::Query).unwrap();
        let close = enc
            .encode_one("sodium chloride", EmbedRole::Passage)
            .unwrap();
        let far = enc.encode_one("xylene", EmbedRole::Passage).unwrap();
        assert!(dot(&q, &close) > dot(&q, &far));
    }
}
