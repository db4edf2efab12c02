//! Model-backed embeddings via fastembed (local ONNX inference).
//!
//! The model loads lazily on first use and is shared behind a mutex -
//! fastembed's embed call takes `&mut self`. Output is truncated to the
//! configured dimension (Matryoshka-style: the leading N dims of the model
//! output are a valid N-dim representation) and re-normalised.

use std::sync::Mutex;

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

use super::{l2_normalize, truncate_for_embedding, Embedder, BATCH_SIZE};
use crate::error::{CoreError, Result};

/// fastembed-backed embedder.
pub struct FastembedEmbedder {
    model: Mutex<TextEmbedding>,
    model_name: String,
    dimensions: usize,
}

impl FastembedEmbedder {
    /// Load the model, downloading it on first run. Call during startup,
    /// not in hot paths.
    pub fn new(model_name: &str, dimensions: usize, cache_dir: &std::path::Path) -> Result<Self> {
        std::fs::create_dir_all(cache_dir)?;
        let options = InitOptions::new(EmbeddingModel::NomicEmbedTextV15)
            .with_show_download_progress(false)
            .with_cache_dir(cache_dir.to_path_buf());
        let model = TextEmbedding::try_new(options).map_err(|e| {
            CoreError::Init(format!(
                "failed to initialize embedding model {}: {}",
                model_name, e
            ))
        })?;
        Ok(Self {
            model: Mutex::new(model),
            model_name: model_name.to_string(),
            dimensions,
        })
    }

    fn truncate_dims(&self, mut vector: Vec<f32>) -> Vec<f32> {
        if vector.len() > self.dimensions {
            vector.truncate(self.dimensions);
        }
        l2_normalize(&mut vector);
        vector
    }
}

impl Embedder for FastembedEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut batch = self.embed_batch(&[text])?;
        batch.pop().ok_or_else(|| {
            CoreError::Init("embedding model returned no output".to_string())
        })
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let mut model = self
            .model
            .lock()
            .map_err(|_| CoreError::Init("embedding model lock poisoned".to_string()))?;

        let mut out = Vec::with_capacity(texts.len());
        for window in texts.chunks(BATCH_SIZE) {
            let truncated: Vec<&str> = window.iter().map(|t| truncate_for_embedding(t)).collect();
            let embeddings = model.embed(truncated, None).map_err(|e| {
                CoreError::Init(format!("embedding generation failed: {}", e))
            })?;
            for embedding in embeddings {
                out.push(self.truncate_dims(embedding));
            }
        }
        Ok(out)
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}
