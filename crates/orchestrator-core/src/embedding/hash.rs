//! Deterministic feature-hash embedder.
//!
//! Maps unicode words (plus bigrams, for a little word-order sensitivity)
//! onto a fixed-dimension vector with an FNV-1a hash, then L2-normalises.
//! Not semantically smart, but stable, fast, dependency-free, and similar
//! texts genuinely land near each other - which is what the fallback path
//! and the test suite need.

use unicode_segmentation::UnicodeSegmentation;

use super::{l2_normalize, truncate_for_embedding, Embedder};
use crate::error::Result;

const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

fn fnv1a(data: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for byte in data {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Feature-hash embedder.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(8),
        }
    }
}

impl Embedder for HashEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let text = truncate_for_embedding(text);
        let mut vector = vec![0.0_f32; self.dimensions];
        let words: Vec<String> = text
            .unicode_words()
            .map(|w| w.to_lowercase())
            .collect();

        for word in &words {
            bump(&mut vector, word.as_bytes(), 1.0);
        }
        for pair in words.windows(2) {
            let joined = format!("{} {}", pair[0], pair[1]);
            bump(&mut vector, joined.as_bytes(), 0.5);
        }

        l2_normalize(&mut vector);
        Ok(vector)
    }

    fn model_name(&self) -> &str {
        "feature-hash"
    }
}

fn bump(vector: &mut [f32], feature: &[u8], weight: f32) {
    let hash = fnv1a(feature);
    let index = (hash % vector.len() as u64) as usize;
    // Sign bit from a higher hash bit keeps the expectation at zero
    let sign = if hash & (1 << 63) == 0 { 1.0 } else { -1.0 };
    vector[index] += sign * weight;
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::cosine_similarity;

    #[test]
    fn deterministic() {
        let embedder = HashEmbedder::new(64);
        let a = embedder.embed("database migration rollback").unwrap();
        let b = embedder.embed("database migration rollback").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn output_is_normalised() {
        let embedder = HashEmbedder::new(64);
        let v = embedder.embed("some text to embed").unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn similar_texts_are_closer_than_unrelated() {
        let embedder = HashEmbedder::new(128);
        let a = embedder.embed("ECS task fails outbound HTTPS egress").unwrap();
        let b = embedder.embed("ECS egress HTTPS failure on task").unwrap();
        let c = embedder.embed("marinara sauce simmering instructions").unwrap();
        assert!(cosine_similarity(&a, &b) > cosine_similarity(&a, &c));
    }

    #[test]
    fn empty_text_embeds_to_zero_vector() {
        let embedder = HashEmbedder::new(32);
        let v = embedder.embed("").unwrap();
        assert_eq!(v.len(), 32);
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn batch_matches_single() {
        let embedder = HashEmbedder::new(64);
        let batch = embedder.embed_batch(&["one two", "three four"]).unwrap();
        assert_eq!(batch[0], embedder.embed("one two").unwrap());
        assert_eq!(batch[1], embedder.embed("three four").unwrap());
    }
}
