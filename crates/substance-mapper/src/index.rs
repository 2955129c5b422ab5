//! Exact nearest-neighbor index over the standard-substance corpus.
//!
//! The single distance metric of the whole system is inner product over
//! L2-normalized vectors (= cosine similarity); similarity is the raw
//! score with no conversion. Score fusion relies on this, so no other
//! metric may be introduced elsewhere.
//!
//! The corpus is append-only between redeployments: the index is built
//! once at startup, never mutated, and shared across requests behind an
//! `Arc` without locking.

use crate::encoder::{EmbedRole, TextEncoder};
use crate::error::{MapperError, Result};
use crate::types::{Candidate, StandardSubstance};
use tracing::{info, warn};

/// Immutable inner-product index over reference substance vectors.
pub struct SubstanceIndex {
    entries: Vec<StandardSubstance>,
    /// Row-major `entries.len() x dim` matrix.
    vectors: Vec<f32>,
    dim: usize,
}

impl SubstanceIndex {
    /// Build the index from reference entries and their passage vectors.
    /// Vector count and dimensions must line up; the build is O(n).
    pub fn build(entries: Vec<StandardSubstance>, vectors: Vec<Vec<f32>>) -> Result<Self> {
        if entries.len() != vectors.len() {
            return Err(MapperError::Configuration(format!(
                "index build mismatch: {} entries but {} vectors",
                entries.len(),
                vectors.len()
            )));
        }
        let dim = vectors.first().map(|v| v.len()).unwrap_or(0);
        let mut flat = Vec::with_capacity(entries.len() * dim);
        for (i, v) in vectors.iter().enumerate() {
            if v.len() != dim {
                return Err(MapperError::Configuration(format!(
                    "vector {} has dimension {} (expected {})",
                    i,
                    v.len(),
                    dim
                )));
            }
            flat.extend_from_slice(v);
        }
        info!(
            "Substance index built: {} entries, {}-dim",
            entries.len(),
            dim
        );
        Ok(Self {
            entries,
            vectors: flat,
            dim,
        })
    }

    /// Encode every reference name as a passage and build the index.
    pub fn from_corpus(
        encoder: &dyn TextEncoder,
        entries: Vec<StandardSubstance>,
    ) -> Result<Self> {
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        let vectors = encoder.encode(&names, EmbedRole::Passage)?;
        Self::build(entries, vectors)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn entries(&self) -> &[StandardSubstance] {
        &self.entries
    }

    /// Exact top-k search by inner product. Returns candidates in
    /// descending similarity order. A `k` larger than the corpus is
    /// clamped with a warning rather than failing.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Candidate>> {
        if self.entries.is_empty() {
            return Ok(Vec::new());
        }
        if query.len() != self.dim {
            return Err(MapperError::Encoding(format!(
                "query dimension {} does not match index dimension {}",
                query.len(),
                self.dim
            )));
        }
        let k = if k > self.entries.len() {
            warn!(
                "search k={} exceeds corpus size {}; returning all candidates",
                k,
                self.entries.len()
            );
            self.entries.len()
        } else {
            k
        };

        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .chunks_exact(self.dim)
            .enumerate()
            .map(|(i, row)| (i, query.iter().zip(row).map(|(a, b)| a * b).sum()))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(i, similarity)| Candidate {
                sid: self.entries[i].sid.clone(),
                name: self.entries[i].name.clone(),
                similarity,
            })
            .collect())
    }
}
