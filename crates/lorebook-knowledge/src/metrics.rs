// SPDX-FileCopyrightText: 2026 Lorebook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Metric registration and recording helpers.
//!
//! Uses the metrics-rs facade so any installed recorder can collect these.
//! Without a recorder every call is a no-op.

use metrics::describe_counter;

/// Register all Lorebook metric descriptions.
///
/// Called when a knowledge base is opened. Descriptions only reach a
/// recorder installed before that point.
pub fn register_metrics() {
    describe_counter!("lorebook_facts_stored_total", "Facts committed to the fact store");
    describe_counter!(
        "lorebook_facts_dropped_total",
        "Candidate facts discarded before storage, by reason"
    );
    describe_counter!(
        "lorebook_extraction_failures_total",
        "Chunking or extraction calls that produced no usable output, by stage"
    );
    describe_counter!(
        "lorebook_migrations_total",
        "Vector index migration passes, by outcome"
    );
    describe_counter!(
        "lorebook_retrievals_total",
        "Retrieval queries, by scoring strategy"
    );
}

pub fn record_facts_stored(count: usize) {
    metrics::counter!("lorebook_facts_stored_total").increment(count as u64);
}

/// `reason` is `low_confidence` or `duplicate`.
pub fn record_facts_dropped(reason: &'static str, count: usize) {
    if count > 0 {
        metrics::counter!("lorebook_facts_dropped_total", "reason" => reason).increment(count as u64);
    }
}

/// `stage` is `chunk`, `extract` or `parse`.
pub fn record_extraction_failure(stage: &'static str) {
    metrics::counter!("lorebook_extraction_failures_total", "stage" => stage).increment(1);
}

/// `outcome` is `success` or `failure`.
pub fn record_migration(outcome: &'static str) {
    metrics::counter!("lorebook_migrations_total", "outcome" => outcome).increment(1);
}

/// `strategy` is `keyword` or `vector`.
pub fn record_retrieval(strategy: &'static str) {
    metrics::counter!("lorebook_retrievals_total", "strategy" => strategy).increment(1);
}
