use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::memory::MemoryEntry;

/// Formats recalled memories as a `<memories>` block, one `[key]: value`
/// line per entry. Empty when nothing was recalled.
pub fn format_memories(entries: &[MemoryEntry]) -> String {
    if entries.is_empty() {
        return String::new();
    }

    let lines = entries
        .iter()
        .map(|entry| {
            let value = match &entry.value {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            format!("[{}]: {value}", entry.key)
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!("\n<memories>\n{lines}\n</memories>")
}

/// Fills `{user_info}` and `{time}` in the system prompt template.
pub fn render_system_prompt(template: &str, user_info: &str, now: DateTime<Utc>) -> String {
    template.replace("{user_info}", user_info).replace("{time}", &now.to_rfc3339())
}
