// SPDX-FileCopyrightText: 2026 Lorebook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for Lorebook integration tests.
//!
//! Provides mock adapters for fast, deterministic, CI-runnable tests
//! without a model server or ONNX runtime.
//!
//! # Components
//!
//! - [`MockProvider`] - Mock completion endpoint with queued replies
//! - [`MockEmbedder`] - Deterministic bag-of-words embedder

pub mod mock_embedder;
pub mod mock_provider;

pub use mock_embedder::MockEmbedder;
pub use mock_provider::{MockProvider, MockReply};
