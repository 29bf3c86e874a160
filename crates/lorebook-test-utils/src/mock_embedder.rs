// SPDX-FileCopyrightText: 2026 Lorebook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Deterministic embedding adapter for tests.
//!
//! Each text becomes an L2-normalized bag of hashed lowercase words, so texts
//! sharing vocabulary have high cosine similarity and unrelated texts score
//! near zero.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use lorebook_core::traits::{EmbeddingAdapter, PluginAdapter};
use lorebook_core::types::{AdapterType, EmbeddingInput, EmbeddingOutput, HealthStatus};
use lorebook_core::LorebookError;

/// Dimension of mock embeddings.
pub const MOCK_DIMENSIONS: usize = 64;

/// Bag-of-words embedder with call counting and failure injection.
#[derive(Clone, Default)]
pub struct MockEmbedder {
    calls: Arc<AtomicUsize>,
    texts_embedded: Arc<AtomicUsize>,
    failing: Arc<AtomicBool>,
    delay: Option<Duration>,
}

impl MockEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every `embed` call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Make subsequent `embed` calls fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of `embed` calls, including failed ones.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Total number of texts successfully embedded.
    pub fn texts_embedded(&self) -> usize {
        self.texts_embedded.load(Ordering::SeqCst)
    }

    /// Embed one text synchronously.
    pub fn vector_for(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; MOCK_DIMENSIONS];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.len() > 2)
        {
            let mut hasher = DefaultHasher::new();
            word.to_lowercase().hash(&mut hasher);
            let slot = (hasher.finish() % MOCK_DIMENSIONS as u64) as usize;
            v[slot] += 1.0;
        }
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }
}

#[async_trait]
impl PluginAdapter for MockEmbedder {
    fn name(&self) -> &str {
        "mock-embedder"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Embedding
    }

    async fn health_check(&self) -> Result<HealthStatus, LorebookError> {
        if self.failing.load(Ordering::SeqCst) {
            Ok(HealthStatus::Unhealthy("failure injected".to_string()))
        } else {
            Ok(HealthStatus::Healthy)
        }
    }

    async fn shutdown(&self) -> Result<(), LorebookError> {
        Ok(())
    }
}

#[async_trait]
impl EmbeddingAdapter for MockEmbedder {
    async fn embed(&self, input: EmbeddingInput) -> Result<EmbeddingOutput, LorebookError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(LorebookError::IndexUnavailable {
                message: "mock embedder failure".to_string(),
            });
        }
        let embeddings: Vec<Vec<f32>> = input.texts.iter().map(|t| Self::vector_for(t)).collect();
        self.texts_embedded
            .fetch_add(embeddings.len(), Ordering::SeqCst);
        Ok(EmbeddingOutput {
            embeddings,
            dimensions: MOCK_DIMENSIONS,
        })
    }
}
