//! Embeddings
//!
//! `Embedder` is the seam between the pipeline and whatever produces dense
//! vectors. Two implementations:
//!
//! - `HashEmbedder` - deterministic feature-hash vectors. Always available,
//!   no model download, used when the `embeddings` feature is off and in
//!   tests.
//! - `FastembedEmbedder` (feature `embeddings`) - local ONNX inference via
//!   fastembed, batched.
//!
//! Vectors are L2-normalised on the way out so cosine similarity reduces to
//! a dot product downstream.

mod hash;
#[cfg(feature = "embeddings")]
mod model;

pub use hash::HashEmbedder;
#[cfg(feature = "embeddings")]
pub use model::FastembedEmbedder;

use std::sync::Arc;

use crate::error::Result;

/// Batch size used by batching embedders.
pub const BATCH_SIZE: usize = 32;

/// Maximum text length submitted for embedding; longer inputs truncate on a
/// char boundary.
pub const MAX_TEXT_LENGTH: usize = 8192;

/// Produces fixed-dimension dense vectors for strings.
pub trait Embedder: Send + Sync {
    /// Vector dimension, fixed per process.
    fn dimensions(&self) -> usize;

    /// Embed a single string.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch. The default just loops; model-backed implementations
    /// override with a real batched pass.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    /// Implementation identifier for logs and metrics.
    fn model_name(&self) -> &str;
}

/// Shared embedder handle passed into services.
pub type SharedEmbedder = Arc<dyn Embedder>;

/// Truncate text to the embedding ceiling on a char boundary.
pub(crate) fn truncate_for_embedding(text: &str) -> &str {
    if text.len() <= MAX_TEXT_LENGTH {
        return text;
    }
    let mut end = MAX_TEXT_LENGTH;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

// ============================================================================
// VECTOR MATH
// ============================================================================

/// Cosine similarity between two vectors. Mismatched lengths score 0.
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0_f32;
    let mut norm_a = 0.0_f32;
    let mut norm_b = 0.0_f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = (norm_a * norm_b).sqrt();
    if denom > 0.0 { dot / denom } else { 0.0 }
}

/// L2-normalise in place.
#[inline]
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

/// Serialise a vector to little-endian bytes for BLOB storage.
pub fn vector_to_bytes(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Restore a vector from little-endian bytes.
pub fn vector_from_bytes(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_identical_is_one() {
        let a = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn cosine_orthogonal_is_zero() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    }

    #[test]
    fn cosine_mismatched_lengths_is_zero() {
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn bytes_round_trip() {
        let original = vec![1.5_f32, -2.25, 0.0, 42.0];
        let restored = vector_from_bytes(&vector_to_bytes(&original)).unwrap();
        assert_eq!(original, restored);
    }

    #[test]
    fn bad_byte_length_rejected() {
        assert!(vector_from_bytes(&[1, 2, 3]).is_none());
    }

    #[test]
    fn normalize_produces_unit_vector() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let text = "é".repeat(MAX_TEXT_LENGTH);
        let truncated = truncate_for_embedding(&text);
        assert!(truncated.len() <= MAX_TEXT_LENGTH);
        assert!(std::str::from_utf8(truncated.as_bytes()).is_ok());
    }
}
