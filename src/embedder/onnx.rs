/// ONNX Runtime sentence encoder using the `ort` crate.
///
/// Runs a BERT-style encoder over a padded batch, mean-pools the last hidden
/// state with the attention mask and L2-normalizes each row.
use std::path::Path;
use std::sync::Mutex;

use ort::session::Session;
use ort::value::Tensor;
use tracing::info;

use super::tokenizer::BertTokenizer;
use super::{Embedder, EmbedderError, l2_normalize};

/// Inputs are embedded in slices of this many texts per inference call.
const MAX_BATCH: usize = 32;

/// ONNX-backed embedder implementing the `Embedder` trait.
pub struct OnnxEmbedder {
    session: Mutex<Session>,
    tokenizer: BertTokenizer,
    model_name: String,
    dimensions: usize,
}

impl OnnxEmbedder {
    /// Load `model.onnx` and `tokenizer.json` from `model_dir`.
    ///
    /// `dimensions` is the hidden size the model is expected to produce; a
    /// model that disagrees is rejected on first use.
    pub fn new(
        model_dir: &Path,
        model_name: &str,
        dimensions: usize,
    ) -> Result<Self, EmbedderError> {
        let model_path = model_dir.join("model.onnx");

        if !model_path.exists() {
            return Err(EmbedderError::ModelLoadFailed(format!(
                "model.onnx not found in {}",
                model_dir.display()
            )));
        }

        info!("Loading embedding model {model_name} from {}", model_dir.display());

        let session = Session::builder()
            .map_err(|e| EmbedderError::ModelLoadFailed(format!("session builder error: {e}")))?
            .with_intra_threads(4)
            .map_err(|e| EmbedderError::ModelLoadFailed(format!("thread config error: {e}")))?
            .commit_from_file(&model_path)
            .map_err(|e| EmbedderError::ModelLoadFailed(format!("model load error: {e}")))?;

        let tokenizer = BertTokenizer::from_model_dir(model_dir)
            .map_err(|e| EmbedderError::TokenizerError(e.to_string()))?;

        info!("Tokenizer loaded (vocab size: {})", tokenizer.vocab_size());

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
            model_name: model_name.to_string(),
            dimensions,
        })
    }

    fn run_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        let encoded = self
            .tokenizer
            .tokenize_batch(texts)
            .map_err(|e| EmbedderError::TokenizerError(e.to_string()))?;

        let batch = encoded.len();
        let seq_len = encoded.first().map_or(0, |e| e.input_ids.len());

        let mut input_ids = Vec::with_capacity(batch * seq_len);
        let mut attention_mask = Vec::with_capacity(batch * seq_len);
        for enc in &encoded {
            if enc.input_ids.len() != seq_len {
                return Err(EmbedderError::TokenizerError(
                    "batch was not padded to a common length".to_string(),
                ));
            }
            input_ids.extend_from_slice(&enc.input_ids);
            attention_mask.extend_from_slice(&enc.attention_mask);
        }

        let shape = [batch, seq_len];
        let input_ids_val = Tensor::from_array((shape, input_ids))
            .map_err(|e| EmbedderError::InferenceFailed(format!("input_ids error: {e}")))?;
        let attention_mask_val = Tensor::from_array((shape, attention_mask.clone()))
            .map_err(|e| EmbedderError::InferenceFailed(format!("attention_mask error: {e}")))?;
        let token_type_ids_val = Tensor::from_array((shape, vec![0i64; batch * seq_len]))
            .map_err(|e| EmbedderError::InferenceFailed(format!("token_type_ids error: {e}")))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| EmbedderError::InferenceFailed(format!("lock poisoned: {e}")))?;
        let outputs = session
            .run(ort::inputs![
                "input_ids" => input_ids_val,
                "attention_mask" => attention_mask_val,
                "token_type_ids" => token_type_ids_val,
            ])
            .map_err(|e| EmbedderError::InferenceFailed(format!("inference failed: {e}")))?;

        // Last hidden state: [batch, seq_len, hidden]
        let (out_shape, hidden) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedderError::InferenceFailed(format!("output extraction: {e}")))?;

        pool_batch(out_shape, hidden, &attention_mask, batch, seq_len, self.dimensions)
            .map_err(|e| match e {
                EmbedderError::InferenceFailed(msg) => {
                    EmbedderError::InferenceFailed(format!("model {}: {msg}", self.model_name))
                }
                other => other,
            })
    }
}

/// Split a `[batch, seq_len, hidden]` output into one pooled, normalized
/// vector per row. Any other layout is an inference error.
fn pool_batch(
    shape: &[i64],
    hidden: &[f32],
    attention_mask: &[i64],
    batch: usize,
    seq_len: usize,
    dimensions: usize,
) -> Result<Vec<Vec<f32>>, EmbedderError> {
    if shape.len() != 3 {
        return Err(EmbedderError::InferenceFailed(format!(
            "expected a [batch, seq, hidden] output, got shape {shape:?}"
        )));
    }
    let hidden_size = usize::try_from(shape[2]).unwrap_or_default();
    if hidden_size != dimensions {
        return Err(EmbedderError::InferenceFailed(format!(
            "produced {hidden_size}-dim vectors, configured for {dimensions}"
        )));
    }
    let row_len = seq_len * hidden_size;
    if hidden.len() != batch * row_len || attention_mask.len() != batch * seq_len {
        return Err(EmbedderError::InferenceFailed(format!(
            "output of {} values does not match batch {batch} x seq {seq_len} x hidden {hidden_size}",
            hidden.len()
        )));
    }

    Ok((0..batch)
        .map(|b| {
            let mut pooled = mean_pooling(
                &hidden[b * row_len..(b + 1) * row_len],
                &attention_mask[b * seq_len..(b + 1) * seq_len],
                seq_len,
                hidden_size,
            );
            l2_normalize(&mut pooled);
            pooled
        })
        .collect())
}

impl Embedder for OnnxEmbedder {
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for slice in texts.chunks(MAX_BATCH) {
            vectors.extend(self.run_batch(slice)?);
        }
        Ok(vectors)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

/// Mean pooling over hidden states weighted by attention mask.
///
/// `hidden_data` is one sequence laid out as `[seq_len, hidden_size]`.
fn mean_pooling(
    hidden_data: &[f32],
    attention_mask: &[i64],
    seq_len: usize,
    hidden_size: usize,
) -> Vec<f32> {
    let mut result = vec![0.0f32; hidden_size];
    let mut mask_sum: f32 = 0.0;

    for t in 0..seq_len {
        let mask = attention_mask[t] as f32;
        if mask == 0.0 {
            continue;
        }
        mask_sum += mask;
        let row = &hidden_data[t * hidden_size..(t + 1) * hidden_size];
        for (acc, v) in result.iter_mut().zip(row) {
            *acc += v * mask;
        }
    }

    if mask_sum > 0.0 {
        for v in &mut result {
            *v /= mask_sum;
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_pooling_simple() {
        let hidden = vec![1.0, 2.0, 3.0];
        let mask = vec![1i64];
        assert_eq!(mean_pooling(&hidden, &mask, 1, 3), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_mean_pooling_with_padding() {
        // 2 tokens, hidden_size=2, second token is padding (mask=0)
        let hidden = vec![1.0, 2.0, 10.0, 20.0];
        let mask = vec![1i64, 0i64];
        assert_eq!(mean_pooling(&hidden, &mask, 2, 2), vec![1.0, 2.0]);
    }

    #[test]
    fn test_mean_pooling_averages() {
        let hidden = vec![1.0, 0.0, 3.0, 4.0];
        let mask = vec![1i64, 1i64];
        assert_eq!(mean_pooling(&hidden, &mask, 2, 2), vec![2.0, 2.0]);
    }

    #[test]
    fn test_pool_batch_rows() {
        // 2 rows, seq_len=2, hidden=2; second token of row 1 is padding
        let hidden = vec![3.0, 4.0, 9.0, 9.0, 0.0, 2.0, 0.0, 2.0];
        let mask = vec![1i64, 0, 1, 1];
        let rows = pool_batch(&[2, 2, 2], &hidden, &mask, 2, 2, 2).unwrap();
        assert_eq!(rows, vec![vec![0.6, 0.8], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_pool_batch_rejects_pooled_output() {
        // A model that already returns [batch, hidden]
        let hidden = vec![0.5; 2 * 4];
        let mask = vec![1i64; 2 * 3];
        let err = pool_batch(&[2, 4], &hidden, &mask, 2, 3, 4).unwrap_err();
        assert!(matches!(err, EmbedderError::InferenceFailed(_)));
    }

    #[test]
    fn test_pool_batch_rejects_short_output() {
        let hidden = vec![0.5; 5];
        let mask = vec![1i64; 4];
        let err = pool_batch(&[2, 2, 2], &hidden, &mask, 2, 2, 2).unwrap_err();
        assert!(matches!(err, EmbedderError::InferenceFailed(_)));
    }

    #[test]
    fn test_pool_batch_wrong_hidden_size() {
        let hidden = vec![0.5; 8];
        let mask = vec![1i64; 4];
        let err = pool_batch(&[2, 2, 2], &hidden, &mask, 2, 2, 384).unwrap_err();
        assert!(matches!(err, EmbedderError::InferenceFailed(_)));
    }

    #[test]
    fn test_missing_model_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = OnnxEmbedder::new(dir.path(), "e5", 384).err().unwrap();
        assert!(matches!(err, EmbedderError::ModelLoadFailed(_)));
    }

    /// Integration test requiring actual model files.
    #[test]
    #[ignore]
    fn test_onnx_embed_batch() {
        let model_dir = Path::new("models/multilingual-e5-small");
        if !model_dir.join("model.onnx").exists() {
            eprintln!("Skipping: model files not downloaded");
            return;
        }

        let embedder = OnnxEmbedder::new(model_dir, "multilingual-e5-small", 384).unwrap();
        let results = embedder
            .embed_batch(&["hello", "a somewhat longer sentence to force padding"])
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].len(), 384);
        assert_eq!(results[0], embedder.embed("hello").unwrap());
    }
}
