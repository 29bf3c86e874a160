// SPDX-FileCopyrightText: 2026 Lorebook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Prompt context block built from retrieved facts.

use crate::types::ScoredFact;

const HEADER: &str = "Relevant context from this server:";

/// Render facts as a prompt block with source attribution.
///
/// Returns `None` when there is nothing to inject.
pub fn format_context(facts: &[ScoredFact]) -> Option<String> {
    if facts.is_empty() {
        return None;
    }
    let mut out = String::from(HEADER);
    for scored in facts {
        let fact = &scored.fact;
        let source = if fact.verified {
            format!("(from #{})", or_unknown(&fact.source.channel_name))
        } else {
            format!("(mentioned by {})", or_unknown(&fact.source.author_name))
        };
        out.push_str(&format!("\n- {} {source}", fact.content));
    }
    Some(out)
}

fn or_unknown(s: &str) -> &str {
    if s.is_empty() { "unknown" } else { s }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Category, Fact, SourceRef};
    use chrono::Utc;
    use lorebook_core::GuildId;

    fn scored(content: &str, verified: bool, channel: &str, author: &str) -> ScoredFact {
        ScoredFact {
            fact: Fact {
                id: "fact_00000000".into(),
                guild_id: GuildId::from("1"),
                content: content.into(),
                category: Category::General,
                keywords: vec![],
                entities: serde_json::Map::new(),
                confidence: 1.0,
                verified,
                source: SourceRef {
                    channel_name: channel.into(),
                    author_name: author.into(),
                    ..SourceRef::default()
                },
                created_at: Utc::now(),
                embedding: None,
            },
            score: 1.0,
        }
    }

    #[test]
    fn attributes_by_verification() {
        let text = format_context(&[
            scored("Raids are on Thursday.", true, "info", "Ana"),
            scored("Bo likes tea.", false, "general", "Bo"),
        ])
        .unwrap();
        assert_eq!(
            text,
            "Relevant context from this server:\n\
             - Raids are on Thursday. (from #info)\n\
             - Bo likes tea. (mentioned by Bo)"
        );
    }

    #[test]
    fn empty_input_yields_none() {
        assert!(format_context(&[]).is_none());
    }

    #[test]
    fn missing_names_fall_back() {
        let text = format_context(&[scored("x", false, "", "")]).unwrap();
        assert!(text.ends_with("(mentioned by unknown)"));
    }
}
