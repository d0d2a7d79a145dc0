//! Long-term memory file format (§4.1):
//!
//! ```text
//! # <scope> 的长期记忆
//!
//! > 最后更新: <ISO>
//!
//! ### <key>
//!
//! <value (may be multi-line)>
//!
//! <!-- created: <ISO>, updated: <ISO> -->
//! ```

use chrono::{DateTime, Utc};
use flashclaw_core::types::MemoryEntry;

use crate::types::Scope;

/// Renders the full file for `scope`, with entries in insertion order.
pub fn format_file(scope: &Scope, entries: &[MemoryEntry]) -> String {
    let mut out = String::new();
    out.push_str(&format!("# {} 的长期记忆\n\n", scope.label()));
    out.push_str(&format!("> 最后更新: {}\n", Utc::now().to_rfc3339()));

    for entry in entries {
        out.push('\n');
        out.push_str(&format!("### {}\n\n", entry.key));
        out.push_str(&entry.value);
        if !entry.value.ends_with('\n') {
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&format!(
            "<!-- created: {}, updated: {} -->\n",
            entry.created_at.to_rfc3339(),
            entry.updated_at.to_rfc3339()
        ));
    }

    out
}

/// Parses a previously-written file back into entries, preserving insertion
/// order. Tolerates missing or malformed metadata comments — falls back to
/// the current time, per §4.1 "Parser tolerates missing metadata."
pub fn parse_file(content: &str) -> Vec<MemoryEntry> {
    let mut entries = Vec::new();
    let lines: Vec<&str> = content.lines().collect();

    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        if let Some(key) = line.strip_prefix("### ") {
            let key = key.trim().to_string();
            i += 1;

            let mut value_lines = Vec::new();
            let mut created = None;
            let mut updated = None;

            while i < lines.len() && !lines[i].starts_with("### ") {
                if let Some((c, u)) = parse_metadata_comment(lines[i]) {
                    created = Some(c);
                    updated = Some(u);
                } else {
                    value_lines.push(lines[i]);
                }
                i += 1;
            }

            while value_lines.last().is_some_and(|l| l.trim().is_empty()) {
                value_lines.pop();
            }
            while value_lines.first().is_some_and(|l| l.trim().is_empty()) {
                value_lines.remove(0);
            }

            let value = value_lines.join("\n");
            let now = Utc::now();
            entries.push(MemoryEntry {
                key,
                value,
                created_at: created.unwrap_or(now),
                updated_at: updated.unwrap_or(now),
            });
        } else {
            i += 1;
        }
    }

    entries
}

fn parse_metadata_comment(line: &str) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let line = line.trim();
    let inner = line.strip_prefix("<!--")?.strip_suffix("-->")?.trim();
    let mut created = None;
    let mut updated = None;
    for part in inner.split(',') {
        let part = part.trim();
        if let Some(v) = part.strip_prefix("created:") {
            created = DateTime::parse_from_rfc3339(v.trim())
                .ok()
                .map(|d| d.with_timezone(&Utc));
        } else if let Some(v) = part.strip_prefix("updated:") {
            updated = DateTime::parse_from_rfc3339(v.trim())
                .ok()
                .map(|d| d.with_timezone(&Utc));
        }
    }
    match (created, updated) {
        (Some(c), Some(u)) => Some((c, u)),
        _ => None,
    }
}

/// `recall()` without a key: `"- k: v\n- ..."` sorted by insertion order.
pub fn format_recall_all(entries: &[MemoryEntry]) -> String {
    entries
        .iter()
        .map(|e| format!("- {}: {}", e.key, e.value))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: &str, value: &str) -> MemoryEntry {
        let now = Utc::now();
        MemoryEntry {
            key: key.to_string(),
            value: value.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn round_trips_entries_through_format_and_parse() {
        let scope = Scope::Group("main".to_string());
        let entries = vec![entry("name", "FlashClaw"), entry("note", "multi\nline\nvalue")];
        let rendered = format_file(&scope, &entries);
        let parsed = parse_file(&rendered);

        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].key, "name");
        assert_eq!(parsed[0].value, "FlashClaw");
        assert_eq!(parsed[1].key, "note");
        assert_eq!(parsed[1].value, "multi\nline\nvalue");
    }

    #[test]
    fn tolerates_missing_metadata_comment() {
        let content = "# 群组 的长期记忆\n\n> 最后更新: 2024-01-01T00:00:00Z\n\n### foo\n\nbar\n";
        let parsed = parse_file(content);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].key, "foo");
        assert_eq!(parsed[0].value, "bar");
    }

    #[test]
    fn recall_all_formats_as_bullet_list_in_order() {
        let entries = vec![entry("b", "2"), entry("a", "1")];
        assert_eq!(format_recall_all(&entries), "- b: 2\n- a: 1");
    }
}
