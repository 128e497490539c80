/// Embedder trait and shared types for text embedding.
///
/// The embedding model is an external collaborator of the index: anything
/// that turns a batch of strings into fixed-size vectors, deterministically
/// for a given model version.
pub mod mock;
pub mod onnx;
pub mod tokenizer;

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::config::EmbeddingConfig;

/// Errors that can occur during embedding operations.
#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("inference failed: {0}")]
    InferenceFailed(String),

    #[error("model load failed: {0}")]
    ModelLoadFailed(String),

    #[error("tokenizer error: {0}")]
    TokenizerError(String),
}

/// Trait for text embedding implementations.
///
/// All implementations must be `Send + Sync` to allow concurrent use
/// behind `Arc`.
pub trait Embedder: Send + Sync {
    /// Embed a single text string into a vector.
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        self.embed_batch(&[text])?
            .pop()
            .ok_or_else(|| EmbedderError::InferenceFailed("empty batch output".to_string()))
    }

    /// Embed multiple text strings into vectors, one per input, in order.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError>;

    /// Return the dimensionality of the embedding vectors.
    fn dimensions(&self) -> usize;

    /// Identifier of the model producing the vectors.
    fn model_name(&self) -> &str;
}

/// Build the embedder selected by `embedding.backend`.
pub fn from_config(cfg: &EmbeddingConfig) -> Result<Arc<dyn Embedder>, EmbedderError> {
    match cfg.backend.to_ascii_lowercase().as_str() {
        "mock" => {
            info!("Using hash-based mock embedder ({} dims)", cfg.dimensions);
            Ok(Arc::new(mock::MockEmbedder::new(cfg.dimensions)))
        }
        "onnx" => {
            let embedder = onnx::OnnxEmbedder::new(
                Path::new(&cfg.model_dir),
                &cfg.model_name,
                cfg.dimensions,
            )?;
            Ok(Arc::new(embedder))
        }
        other => Err(EmbedderError::ModelLoadFailed(format!(
            "unknown embedding backend '{other}' (expected 'onnx' or 'mock')"
        ))),
    }
}

/// L2-normalize a vector in place. Zero vectors are left untouched.
pub(crate) fn l2_normalize(vec: &mut [f32]) {
    let norm_sq: f32 = vec.iter().map(|v| v * v).sum();
    if norm_sq > 0.0 {
        let inv = 1.0 / norm_sq.sqrt();
        for v in vec.iter_mut() {
            *v *= inv;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_l2_normalize() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalize_zero() {
        let mut v = vec![0.0, 0.0, 0.0];
        l2_normalize(&mut v);
        assert_eq!(v, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_from_config_mock() {
        let cfg = EmbeddingConfig {
            backend: "Mock".to_string(),
            dimensions: 64,
            ..EmbeddingConfig::default()
        };
        let embedder = from_config(&cfg).unwrap();
        assert_eq!(embedder.dimensions(), 64);
        assert_eq!(embedder.embed("hi").unwrap().len(), 64);
    }

    #[test]
    fn test_from_config_unknown_backend() {
        let cfg = EmbeddingConfig {
            backend: "word2vec".to_string(),
            ..EmbeddingConfig::default()
        };
        assert!(matches!(
            from_config(&cfg),
            Err(EmbedderError::ModelLoadFailed(_))
        ));
    }

    #[test]
    fn test_from_config_onnx_missing_model() {
        let cfg = EmbeddingConfig {
            backend: "onnx".to_string(),
            model_dir: "/nonexistent/model".to_string(),
            ..EmbeddingConfig::default()
        };
        assert!(from_config(&cfg).is_err());
    }
}
