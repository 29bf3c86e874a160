// SPDX-FileCopyrightText: 2026 Lorebook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! First-run download of the sentence-transformer model.
//!
//! Fetches the quantized ONNX export and tokenizer from HuggingFace once and
//! caches them under `<data_dir>/models/<model_name>/`.

use std::path::{Path, PathBuf};

use lorebook_core::error::LorebookError;
use tokio::sync::Mutex;
use tracing::info;

const HF_BASE: &str = "https://huggingface.co";

/// Manages ONNX model download and path resolution.
pub struct ModelManager {
    data_dir: PathBuf,
    model_name: String,
    /// Serializes downloads so concurrent callers don't race on the same files.
    download_lock: Mutex<()>,
}

impl ModelManager {
    pub fn new(data_dir: PathBuf, model_name: impl Into<String>) -> Self {
        Self {
            data_dir,
            model_name: model_name.into(),
            download_lock: Mutex::new(()),
        }
    }

    pub fn model_dir(&self) -> PathBuf {
        self.data_dir.join("models").join(&self.model_name)
    }

    pub fn model_path(&self) -> PathBuf {
        self.model_dir().join("model.onnx")
    }

    pub fn tokenizer_path(&self) -> PathBuf {
        self.model_dir().join("tokenizer.json")
    }

    pub fn is_model_available(&self) -> bool {
        self.model_path().exists() && self.tokenizer_path().exists()
    }

    fn model_url(&self) -> String {
        format!(
            "{HF_BASE}/onnx-community/{}-ONNX/resolve/main/onnx/model_quantized.onnx",
            self.model_name
        )
    }

    fn tokenizer_url(&self) -> String {
        format!(
            "{HF_BASE}/sentence-transformers/{}/resolve/main/tokenizer.json",
            self.model_name
        )
    }

    /// Download the model if needed and return the path to `model.onnx`.
    pub async fn ensure_model(&self) -> Result<PathBuf, LorebookError> {
        if self.is_model_available() {
            return Ok(self.model_path());
        }

        let _guard = self.download_lock.lock().await;
        if self.is_model_available() {
            return Ok(self.model_path());
        }

        info!(model = %self.model_name, "embedding model not found, downloading");

        let model_dir = self.model_dir();
        tokio::fs::create_dir_all(&model_dir)
            .await
            .map_err(LorebookError::storage)?;

        let files = [
            ("model.onnx", self.model_url()),
            ("tokenizer.json", self.tokenizer_url()),
        ];
        for (filename, url) in &files {
            let dest = model_dir.join(filename);
            if dest.exists() {
                continue;
            }
            let size = download_file(url, &dest).await?;
            info!(file = filename, bytes = size, "model file downloaded");
        }

        info!(dir = %model_dir.display(), "embedding model ready");
        Ok(self.model_path())
    }
}

/// Download to `<dest>.part`, then rename so a partial file never looks complete.
async fn download_file(url: &str, dest: &Path) -> Result<usize, LorebookError> {
    let unavailable = |message: String| LorebookError::IndexUnavailable { message };

    let response = reqwest::get(url)
        .await
        .map_err(|e| unavailable(format!("failed to download {url}: {e}")))?;
    if !response.status().is_success() {
        return Err(unavailable(format!(
            "download of {url} failed with status {}",
            response.status()
        )));
    }
    let bytes = response
        .bytes()
        .await
        .map_err(|e| unavailable(format!("failed to read body from {url}: {e}")))?;

    let mut partial = dest.as_os_str().to_owned();
    partial.push(".part");
    let partial = PathBuf::from(partial);

    if let Err(e) = tokio::fs::write(&partial, &bytes).await {
        let _ = tokio::fs::remove_file(&partial).await;
        return Err(LorebookError::storage(e));
    }
    tokio::fs::rename(&partial, dest)
        .await
        .map_err(LorebookError::storage)?;
    Ok(bytes.len())
}
