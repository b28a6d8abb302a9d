//! Pure `{{ dotted.path }}` template substitution over stringified JSON
//! configs.
//!
//! The engine is invoked per-field on a stringified JSON document; it does
//! not reinterpret the surrounding JSON. Unknown or invalid paths resolve to
//! the empty string rather than erroring — user-authored workflows may
//! reference fields that a given input happens not to carry, and that's not
//! a fatal condition.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

static TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([^{}]*?)\s*\}\}").unwrap());

/// Substitute every `{{ path }}` token in `template` against `root`.
///
/// Braces without a closing `}}` pass through literally. Values substituted
/// into a string context are escaped (backslash and double-quote) so the
/// surrounding JSON stays valid.
pub fn substitute(template: &str, root: &Value) -> String {
    TOKEN
        .replace_all(template, |caps: &regex::Captures| {
            let path = caps[1].trim();
            resolve(root, path)
                .map(render)
                .unwrap_or_default()
        })
        .into_owned()
}

/// Resolve a dotted path (identifiers and non-negative integer array
/// indices) against a JSON document.
fn resolve<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return None;
    }
    let mut current = root;
    for segment in path.split('.') {
        if segment.is_empty() {
            return None;
        }
        current = if let Ok(index) = segment.parse::<usize>() {
            current.as_array()?.get(index)?
        } else {
            current.as_object()?.get(segment)?
        };
    }
    Some(current)
}

/// Render a resolved JSON value as it should appear embedded in a string
/// context, escaping backslashes and double-quotes so the containing JSON
/// remains valid.
fn render(value: &Value) -> String {
    let raw = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    };
    escape(&raw)
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            other => out.push(other),
        }
    }
    out
}
