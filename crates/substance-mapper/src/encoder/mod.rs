//! Text encoders turning substance names into L2-normalized vectors.
//!
//! The E5 family expects asymmetric prefixes: `"query: "` on search
//! input, `"passage: "` on corpus entries. The encoder applies them
//! internally so callers and the index can never disagree on the
//! convention.

mod candle;
mod lexical;

pub use candle::CandleEncoder;
pub use lexical::LexicalEncoder;

use crate::error::Result;

/// Prefix applied to user queries before encoding.
pub const QUERY_PREFIX: &str = "query: ";
/// Prefix applied to reference (corpus) names before encoding.
pub const PASSAGE_PREFIX: &str = "passage: ";

/// Which side of the retrieval pair a text belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedRole {
    Query,
    Passage,
}

impl EmbedRole {
    pub fn prefix(&self) -> &'static str {
        match self {
            EmbedRole::Query => QUERY_PREFIX,
            EmbedRole::Passage => PASSAGE_PREFIX,
        }
    }
}

/// A batch text encoder producing fixed-dimension unit vectors.
///
/// Implementations must be deterministic in inference mode: repeated
/// calls on identical input return identical vectors (within floating
/// point). Batching is internal; callers must not assume any batch size.
pub trait TextEncoder: Send + Sync {
    /// Encode a batch of texts. Each returned row is L2-normalized and
    /// has length `dim()`.
    fn encode(&self, texts: &[&str], role: EmbedRole) -> Result<Vec<Vec<f32>>>;

    /// Embedding dimension.
    fn dim(&self) -> usize;

    /// Identifier of the underlying model/checkpoint, for logging and
    /// artifact provenance.
    fn id(&self) -> &str;

    /// Convenience wrapper for a single text.
    fn encode_one(&self, text: &str, role: EmbedRole) -> Result<Vec<f32>> {
        let mut rows = self.encode(&[text], role)?;
        Ok(rows.remove(0))
    }
}

/// L2 norm of a vector.
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Normalize a vector to unit length. Zero vectors are returned unchanged.
pub fn normalize(v: Vec<f32>) -> Vec<f32> {
    let n = l2_norm(&v);
    if n > 0.0 {
        v.into_iter().map(|x| x / n).collect()
    } else {
        v
    }
}

/// Inner product of two equal-length vectors. Over unit vectors this is
/// cosine similarity.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
