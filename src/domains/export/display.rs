//! Human-readable renderings of task state for listings.

use serde_json::{Map, Value as JsonValue};

use super::types::{ExportColumn, ExportTask};

const PREVIEW_COLUMNS: usize = 3;
const BYTE_UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// `Waiting` until the total is known, `Preparing` until the first row is
/// written, then a percentage with counts, and `Completed` once every row is
/// written. Invalid tasks render as `Invalid` regardless of counts.
pub fn status_label(task: &ExportTask) -> String {
    if task.valid != Some(true) && task.exception.as_deref().map_or(false, |e| !e.is_empty()) {
        return "Invalid".to_string();
    }
    let total = match task.total_count {
        Some(total) if total > 0 => total,
        _ => return "Waiting".to_string(),
    };
    let processed = match task.process_count {
        Some(processed) if processed > 0 => processed,
        _ => return "Preparing".to_string(),
    };
    if processed >= total {
        return "Completed".to_string();
    }
    let percent = (processed as f64 / total as f64 * 1000.0).round() / 10.0;
    format!("{}% ({}/{})", percent, processed, total)
}

/// `"N fields: a, b, c..."`, listing at most three column paths.
pub fn columns_preview(columns: &[ExportColumn]) -> String {
    if columns.is_empty() {
        return "No columns configured".to_string();
    }
    let names: Vec<&str> = columns
        .iter()
        .take(PREVIEW_COLUMNS)
        .map(|c| if c.path.is_empty() { "Unknown" } else { c.path.as_str() })
        .collect();
    let ellipsis = if columns.len() > PREVIEW_COLUMNS { "..." } else { "" };
    format!("{} fields: {}{}", columns.len(), names.join(", "), ellipsis)
}

/// Binary-prefixed size with up to two decimals, e.g. `1.5 KB`.
pub fn format_bytes(bytes: u64) -> String {
    if bytes == 0 {
        return "0 B".to_string();
    }
    let mut power = 0;
    let mut scaled = bytes as f64;
    while scaled >= 1024.0 && power < BYTE_UNITS.len() - 1 {
        scaled /= 1024.0;
        power += 1;
    }
    format!("{} {}", (scaled * 100.0).round() / 100.0, BYTE_UNITS[power])
}

pub fn memory_usage_label(task: &ExportTask) -> String {
    format_bytes(task.memory_usage.unwrap_or(0).max(0) as u64)
}

/// Pretty JSON for the task's parameters, `{}` when there are none.
pub fn params_label(params: &Map<String, JsonValue>) -> String {
    if params.is_empty() {
        return "{}".to_string();
    }
    serde_json::to_string_pretty(params).unwrap_or_else(|_| "{}".to_string())
}
