// SPDX-FileCopyrightText: 2026 Lorebook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! ONNX sentence-transformer embedder for local inference.
//!
//! Inference runs on the blocking thread pool so the async runtime never
//! stalls on CPU work. No network access happens at embed time.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ndarray::Array2;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::TensorRef;

use lorebook_core::error::LorebookError;
use lorebook_core::traits::{EmbeddingAdapter, PluginAdapter};
use lorebook_core::types::{AdapterType, EmbeddingInput, EmbeddingOutput, HealthStatus};

/// ONNX-based embedding adapter (mean pooled, L2 normalized).
#[derive(Clone)]
pub struct OnnxEmbedder {
    inner: Arc<OnnxModel>,
}

struct OnnxModel {
    /// ONNX Runtime session (not Send, wrapped in Mutex for safety).
    session: Mutex<Session>,
    tokenizer: tokenizers::Tokenizer,
}

// Safety: Session is only reached through the Mutex. The tokenizer is
// thread-safe for encoding.
unsafe impl Send for OnnxModel {}
unsafe impl Sync for OnnxModel {}

impl OnnxEmbedder {
    /// Load `model.onnx` and the sibling `tokenizer.json`.
    pub fn new(model_path: &Path) -> Result<Self, LorebookError> {
        let model_dir = model_path
            .parent()
            .ok_or_else(|| index_err(format!("invalid model path {}", model_path.display())))?;

        let tokenizer_path = model_dir.join("tokenizer.json");
        let tokenizer = tokenizers::Tokenizer::from_file(&tokenizer_path).map_err(|e| {
            index_err(format!(
                "failed to load tokenizer from {}: {e}",
                tokenizer_path.display()
            ))
        })?;

        let session = Session::builder()
            .map_err(|e| index_err(format!("failed to create ONNX session builder: {e}")))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| index_err(format!("failed to set optimization level: {e}")))?
            .with_intra_threads(1)
            .map_err(|e| index_err(format!("failed to set thread count: {e}")))?
            .commit_from_file(model_path)
            .map_err(|e| {
                index_err(format!(
                    "failed to load ONNX model from {}: {e}",
                    model_path.display()
                ))
            })?;

        Ok(Self {
            inner: Arc::new(OnnxModel {
                session: Mutex::new(session),
                tokenizer,
            }),
        })
    }
}

impl OnnxModel {
    fn embed_text(&self, text: &str) -> Result<Vec<f32>, LorebookError> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| index_err(format!("tokenization failed: {e}")))?;

        let input_ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
        let attention_mask: Vec<i64> = encoding
            .get_attention_mask()
            .iter()
            .map(|&m| m as i64)
            .collect();
        let token_type_ids: Vec<i64> = encoding.get_type_ids().iter().map(|&t| t as i64).collect();
        let seq_len = input_ids.len();

        let input_ids = Array2::from_shape_vec((1, seq_len), input_ids)
            .map_err(|e| index_err(format!("bad input_ids shape: {e}")))?;
        let mask = Array2::from_shape_vec((1, seq_len), attention_mask.clone())
            .map_err(|e| index_err(format!("bad attention_mask shape: {e}")))?;
        let type_ids = Array2::from_shape_vec((1, seq_len), token_type_ids)
            .map_err(|e| index_err(format!("bad token_type_ids shape: {e}")))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| index_err(format!("ONNX session lock poisoned: {e}")))?;

        let outputs = session
            .run(ort::inputs![
                "input_ids" => TensorRef::from_array_view(&input_ids)
                    .map_err(|e| index_err(format!("input_ids tensor: {e}")))?,
                "attention_mask" => TensorRef::from_array_view(&mask)
                    .map_err(|e| index_err(format!("attention_mask tensor: {e}")))?,
                "token_type_ids" => TensorRef::from_array_view(&type_ids)
                    .map_err(|e| index_err(format!("token_type_ids tensor: {e}")))?
            ])
            .map_err(|e| index_err(format!("ONNX inference failed: {e}")))?;

        // Shape [1, seq_len, hidden]
        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| index_err(format!("failed to extract output tensor: {e}")))?;
        let hidden_size = shape[shape.len() - 1] as usize;

        let pooled = mean_pool_with_attention(data, &attention_mask, seq_len, hidden_size);
        Ok(l2_normalize(&pooled))
    }
}

fn index_err(message: String) -> LorebookError {
    LorebookError::IndexUnavailable { message }
}

/// Attention-masked mean pooling over token embeddings.
fn mean_pool_with_attention(
    embeddings: &[f32],
    attention_mask: &[i64],
    seq_len: usize,
    hidden_size: usize,
) -> Vec<f32> {
    let mut sum = vec![0.0f32; hidden_size];
    let mut count = 0.0f32;

    for (i, _) in attention_mask.iter().enumerate().take(seq_len).filter(|(_, m)| **m > 0) {
        let row = &embeddings[i * hidden_size..(i + 1) * hidden_size];
        for (acc, v) in sum.iter_mut().zip(row) {
            *acc += v;
        }
        count += 1.0;
    }

    if count > 0.0 {
        sum.iter_mut().for_each(|v| *v /= count);
    }
    sum
}

fn l2_normalize(vec: &[f32]) -> Vec<f32> {
    let norm: f32 = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        vec.iter().map(|v| v / norm).collect()
    } else {
        vec.to_vec()
    }
}

#[async_trait]
impl PluginAdapter for OnnxEmbedder {
    fn name(&self) -> &str {
        "onnx-embedder"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Embedding
    }

    async fn health_check(&self) -> Result<HealthStatus, LorebookError> {
        match self.inner.session.lock() {
            Ok(_) => Ok(HealthStatus::Healthy),
            Err(e) => Ok(HealthStatus::Unhealthy(format!("session lock poisoned: {e}"))),
        }
    }

    async fn shutdown(&self) -> Result<(), LorebookError> {
        Ok(())
    }
}

#[async_trait]
impl EmbeddingAdapter for OnnxEmbedder {
    async fn embed(&self, input: EmbeddingInput) -> Result<EmbeddingOutput, LorebookError> {
        let model = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let embeddings = input
                .texts
                .iter()
                .map(|text| model.embed_text(text))
                .collect::<Result<Vec<_>, _>>()?;
            let dimensions = embeddings.first().map(Vec::len).unwrap_or(0);
            Ok(EmbeddingOutput {
                embeddings,
                dimensions,
            })
        })
        .await
        .map_err(|e| LorebookError::Internal(format!("embedding task failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn l2_normalize_general_vector() {
        let n = l2_normalize(&[3.0, 4.0]);
        assert!((n[0] - 0.6).abs() < 0.001);
        assert!((n[1] - 0.8).abs() < 0.001);
    }

    #[test]
    fn l2_normalize_zero_vector() {
        assert_eq!(l2_normalize(&[0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[test]
    fn mean_pool_skips_padding() {
        let embeddings = vec![
            9.0, 9.0, 9.0, // padding
            1.0, 2.0, 3.0,
            3.0, 4.0, 5.0,
        ];
        let result = mean_pool_with_attention(&embeddings, &[0, 1, 1], 3, 3);
        assert_eq!(result, vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn missing_model_files_are_index_unavailable() {
        let err = OnnxEmbedder::new(Path::new("/nonexistent/model/model.onnx"))
            .err()
            .unwrap();
        assert!(matches!(err, LorebookError::IndexUnavailable { .. }));
    }
}
