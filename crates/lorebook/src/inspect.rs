// SPDX-FileCopyrightText: 2026 Lorebook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `lorebook inspect` command implementation.
//!
//! Reads guild documents and the vector index file directly. Nothing is
//! written and no model is contacted.

use std::collections::BTreeMap;
use std::io::IsTerminal;
use std::path::Path;

use chrono::{DateTime, Utc};
use lorebook_config::LorebookConfig;
use lorebook_core::{GuildId, LorebookError};
use lorebook_knowledge::store::{list_guild_files, read_guild_file};
use lorebook_knowledge::vector::read_vector_counts;
use lorebook_knowledge::GuildDocument;
use serde::Serialize;
use tracing::warn;

/// Structured output for `--json` mode.
#[derive(Debug, Serialize)]
pub struct InspectReport {
    pub data_dir: String,
    pub guilds: Vec<GuildReport>,
}

#[derive(Debug, Serialize)]
pub struct GuildReport {
    pub guild_id: GuildId,
    pub total_facts: usize,
    pub verified: usize,
    pub unverified: usize,
    pub messages_processed: u64,
    pub categories: BTreeMap<String, usize>,
    pub last_updated: DateTime<Utc>,
    /// `None` when no vector index file exists.
    pub indexed_vectors: Option<usize>,
    pub facts: Vec<FactLine>,
}

#[derive(Debug, Serialize)]
pub struct FactLine {
    pub id: String,
    pub content: String,
    pub category: String,
    pub confidence: f64,
    pub verified: bool,
    pub channel: String,
    pub author: String,
}

impl GuildReport {
    fn from_document(doc: GuildDocument, indexed_vectors: Option<usize>) -> Self {
        let verified = doc.facts.iter().filter(|f| f.verified).count();
        let facts = doc
            .facts
            .iter()
            .map(|f| FactLine {
                id: f.id.clone(),
                content: f.content.clone(),
                category: f.category.as_str().to_string(),
                confidence: f.confidence,
                verified: f.verified,
                channel: f.source.channel_name.clone(),
                author: f.source.author_name.clone(),
            })
            .collect();
        Self {
            guild_id: doc.guild_id,
            total_facts: doc.facts.len(),
            verified,
            unverified: doc.facts.len() - verified,
            messages_processed: doc.metadata.total_messages_processed,
            categories: doc.metadata.categories,
            last_updated: doc.last_updated,
            indexed_vectors,
            facts,
        }
    }
}

/// Collect the report for every guild, or just `only`.
pub async fn build_report(
    data_dir: &Path,
    vector_db: &Path,
    only: Option<&str>,
) -> Result<InspectReport, LorebookError> {
    let guilds = match only {
        Some(id) => vec![GuildId::from(id)],
        None => list_guild_files(data_dir).await?,
    };

    let vector_counts = if vector_db.exists() {
        match read_vector_counts(vector_db).await {
            Ok(counts) => Some(counts),
            Err(e) => {
                warn!(error = %e, path = %vector_db.display(), "could not read vector index");
                None
            }
        }
    } else {
        None
    };

    let mut reports = Vec::with_capacity(guilds.len());
    for guild_id in guilds {
        let doc = read_guild_file(data_dir, &guild_id).await?;
        let indexed = vector_counts
            .as_ref()
            .map(|counts| counts.get(guild_id.as_str()).copied().unwrap_or(0));
        reports.push(GuildReport::from_document(doc, indexed));
    }

    Ok(InspectReport {
        data_dir: data_dir.display().to_string(),
        guilds: reports,
    })
}

/// Run the `lorebook inspect` command.
///
/// If `--json` is passed, outputs structured JSON for scripting.
/// If `--plain` is passed or stdout is not a TTY, disables colors.
pub async fn run_inspect(
    config: &LorebookConfig,
    guild: Option<&str>,
    json: bool,
    plain: bool,
) -> Result<(), LorebookError> {
    let data_dir = Path::new(&config.knowledge.data_dir);
    let vector_db = data_dir.join(&config.vector.database_file);
    let report = build_report(data_dir, &vector_db, guild).await?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).unwrap_or_else(|_| "{}".to_string())
        );
    } else {
        let use_color = !plain && std::io::stdout().is_terminal();
        print!("{}", render_text(&report, use_color));
    }
    Ok(())
}

fn render_text(report: &InspectReport, use_color: bool) -> String {
    use colored::Colorize;

    let mut out = String::new();
    out.push_str(&format!("\n  lorebook inspect ({})\n", report.data_dir));
    out.push_str(&format!("  {}\n", "-".repeat(35)));

    if report.guilds.is_empty() {
        out.push_str("    No guild knowledge found.\n\n");
        return out;
    }

    for guild in &report.guilds {
        let title = format!("Guild {}", guild.guild_id);
        if use_color {
            out.push_str(&format!("\n  {}\n", title.bold()));
        } else {
            out.push_str(&format!("\n  {title}\n"));
        }
        out.push_str(&format!(
            "    Facts:    {} ({} verified, {} unverified)\n",
            guild.total_facts, guild.verified, guild.unverified
        ));
        out.push_str(&format!("    Messages: {}\n", guild.messages_processed));
        if let Some(n) = guild.indexed_vectors {
            out.push_str(&format!("    Vectors:  {n}\n"));
        }
        if !guild.categories.is_empty() {
            let cats: Vec<String> = guild
                .categories
                .iter()
                .map(|(name, n)| format!("{name}={n}"))
                .collect();
            out.push_str(&format!("    Categories: {}\n", cats.join(", ")));
        }
        out.push_str(&format!(
            "    Updated:  {}\n",
            guild.last_updated.format("%Y-%m-%d %H:%M:%S UTC")
        ));

        for fact in &guild.facts {
            let marker = match (fact.verified, use_color) {
                (true, true) => "✓".green().to_string(),
                (false, true) => "·".dimmed().to_string(),
                (true, false) => "[V]".to_string(),
                (false, false) => "[ ]".to_string(),
            };
            let origin = if fact.verified {
                format!("#{}", fact.channel)
            } else {
                fact.author.clone()
            };
            out.push_str(&format!(
                "      {marker} {} ({}, {:.2}, {origin})\n",
                fact.content, fact.category, fact.confidence
            ));
        }
    }
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use lorebook_knowledge::{new_fact_id, Category, Fact, FactStore, GuildRegistry, SourceRef};
    use std::sync::Arc;

    fn fact(guild: &str, content: &str, verified: bool) -> Fact {
        Fact {
            id: new_fact_id(),
            guild_id: GuildId::from(guild),
            content: content.to_string(),
            category: Category::Birthday,
            keywords: vec![],
            entities: serde_json::Map::new(),
            confidence: 0.8,
            verified,
            source: SourceRef {
                channel_name: "info".into(),
                author_name: "Ana".into(),
                ..SourceRef::default()
            },
            created_at: Utc::now(),
            embedding: None,
        }
    }

    async fn seeded_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let store = FactStore::open(dir.path(), 4, Arc::new(GuildRegistry::new()))
            .await
            .unwrap();
        store.append(fact("10", "Ana's birthday is March 3", true)).await.unwrap();
        store.append(fact("10", "Bo's birthday is June 9", false)).await.unwrap();
        store.append(fact("20", "Cy's birthday is July 1", false)).await.unwrap();
        dir
    }

    #[tokio::test]
    async fn report_lists_every_guild() {
        let dir = seeded_dir().await;
        let report = build_report(dir.path(), &dir.path().join("vectors.db"), None)
            .await
            .unwrap();
        assert_eq!(report.guilds.len(), 2);
        let first = &report.guilds[0];
        assert_eq!(first.guild_id, GuildId::from("10"));
        assert_eq!((first.verified, first.unverified), (1, 1));
        assert_eq!(first.categories.get("birthday"), Some(&2));
        assert!(first.indexed_vectors.is_none());
    }

    #[tokio::test]
    async fn report_filters_single_guild() {
        let dir = seeded_dir().await;
        let report = build_report(dir.path(), &dir.path().join("vectors.db"), Some("20"))
            .await
            .unwrap();
        assert_eq!(report.guilds.len(), 1);
        assert_eq!(report.guilds[0].total_facts, 1);
    }

    #[tokio::test]
    async fn unknown_guild_is_an_error() {
        let dir = seeded_dir().await;
        assert!(build_report(dir.path(), &dir.path().join("vectors.db"), Some("99"))
            .await
            .is_err());
        assert!(build_report(dir.path(), &dir.path().join("vectors.db"), Some("../x"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn plain_text_marks_verification() {
        let dir = seeded_dir().await;
        let report = build_report(dir.path(), &dir.path().join("vectors.db"), Some("10"))
            .await
            .unwrap();
        let text = render_text(&report, false);
        assert!(text.contains("[V] Ana's birthday is March 3 (birthday, 0.80, #info)"));
        assert!(text.contains("[ ] Bo's birthday is June 9 (birthday, 0.80, Ana)"));
        assert!(text.contains("Facts:    2 (1 verified, 1 unverified)"));
    }

    #[test]
    fn json_report_serializes() {
        let report = InspectReport {
            data_dir: "/tmp/x".into(),
            guilds: vec![],
        };
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"guilds\":[]"));
    }
}
