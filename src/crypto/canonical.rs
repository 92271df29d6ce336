//! Canonical JSON encoding.
//!
//! Every hash and signature in the agent is computed over the output of
//! [`canonical_json`]: UTF-8 JSON with object keys sorted lexicographically
//! at every nesting level, no whitespace outside string literals, `,` and
//! `:` as the only separators. Values that are not natively JSON (such as
//! timestamps) must be rendered to their ISO-8601 string form before they
//! reach this module.
//!
//! The encoding is pure and deterministic: `canonical → parse → canonical`
//! is bit-identical.

use std::collections::BTreeMap;

use serde_json::Value;

/// Canonical UTF-8 JSON bytes of `value`.
pub fn canonical_json(value: &Value) -> Vec<u8> {
    canonical_string(value).into_bytes()
}

/// Canonical JSON as a `String`.
pub fn canonical_string(value: &Value) -> String {
    let mut out = String::new();
    write_value(value, &mut out);
    out
}

fn write_value(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => write_string(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            // Re-key through a BTreeMap so the byte order never depends on
            // how the map was built or which serde_json features are active.
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            out.push('{');
            for (i, (key, val)) in sorted.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(key, out);
                out.push(':');
                write_value(val, out);
            }
            out.push('}');
        }
    }
}

/// JSON string literal with the same escaping rules serde_json applies:
/// `"`, `\` and control characters are escaped, everything else is emitted
/// verbatim UTF-8.
fn write_string(s: &str, out: &mut String) {
    out.push('"');
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
}
