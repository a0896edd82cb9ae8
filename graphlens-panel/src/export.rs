//! Copy-out helpers for a captured exchange.

use graphlens_core::CapturedExchange;
use serde_json::Value;

fn body_of(exchange: &CapturedExchange) -> &Value {
    exchange.request_body.as_ref().unwrap_or(&Value::Null)
}

/// A `curl` command replaying the request.
pub fn generate_curl(exchange: &CapturedExchange) -> String {
    let body = body_of(exchange).to_string().replace('\'', r"'\''");
    format!(
        "curl '{}' \\\n  -H 'Content-Type: application/json' \\\n  --data-raw '{}'",
        exchange.url, body
    )
}

/// A JavaScript `fetch` call replaying the request.
pub fn generate_fetch(exchange: &CapturedExchange) -> String {
    let body = serde_json::to_string_pretty(body_of(exchange)).unwrap_or_else(|_| "null".to_string());
    format!(
        "fetch('{}', {{\n  method: 'POST',\n  headers: {{\n    'Content-Type': 'application/json',\n  }},\n  body: JSON.stringify({})\n}})",
        exchange.url, body
    )
}

/// Brace nesting depth, counted per line: a line opening a brace deepens by
/// one, a line closing one shallows by one.
pub fn query_depth(query: &str) -> usize {
    let mut max_depth: i64 = 0;
    let mut depth: i64 = 0;
    for line in query.lines() {
        if line.contains('{') {
            depth += 1;
        }
        if line.contains('}') {
            depth -= 1;
        }
        max_depth = max_depth.max(depth);
    }
    max_depth as usize
}

/// Human-readable size with up to two decimals, e.g. `1.5 KB`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    if bytes == 0 {
        return "0 B".to_string();
    }
    let mut unit = 0;
    let mut value = bytes as f64;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let rounded = format!("{value:.2}");
    let trimmed = rounded.trim_end_matches('0').trim_end_matches('.');
    format!("{} {}", trimmed, UNITS[unit])
}
