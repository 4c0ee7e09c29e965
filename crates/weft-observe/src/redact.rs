// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde_json::{Map, Value};

/// Keys whose values are replaced with `"[REDACTED]"` wherever they appear,
/// compared case-insensitively.
pub const SENSITIVE_KEYS: [&str; 6] = [
    "openai_api_key",
    "api_key",
    "token",
    "authorization",
    "password",
    "secret",
];

fn is_sensitive(key: &str) -> bool {
    SENSITIVE_KEYS.iter().any(|k| key.eq_ignore_ascii_case(k))
}

/// Return a copy of `value` with sensitive keys redacted at every depth.
pub fn redact_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(redact_map(map)),
        Value::Array(items) => Value::Array(items.iter().map(redact_value).collect()),
        other => other.clone(),
    }
}

/// Map form of [`redact_value`].
pub fn redact_map(map: &Map<String, Value>) -> Map<String, Value> {
    map.iter()
        .map(|(k, v)| {
            if is_sensitive(k) {
                (k.clone(), Value::String("[REDACTED]".into()))
            } else {
                (k.clone(), redact_value(v))
            }
        })
        .collect()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sensitive_keys_are_replaced() {
        let v = json!({ "token": "abc", "n": 1 });
        let out = redact_value(&v);
        assert_eq!(out, json!({ "token": "[REDACTED]", "n": 1 }));
    }

    #[test]
    fn comparison_is_case_insensitive() {
        let v = json!({ "API_KEY": "sk-x", "Token": "t" });
        let out = redact_value(&v);
        assert_eq!(out["API_KEY"], "[REDACTED]");
        assert_eq!(out["Token"], "[REDACTED]");
    }

    #[test]
    fn nested_maps_and_arrays_are_walked() {
        let v = json!({ "outer": { "password": "p" }, "list": [{ "secret": "s" }] });
        let out = redact_value(&v);
        assert_eq!(out["outer"]["password"], "[REDACTED]");
        assert_eq!(out["list"][0]["secret"], "[REDACTED]");
    }

    #[test]
    fn non_sensitive_values_are_untouched() {
        let v = json!({ "text": "token appears in prose", "count": [1, 2, 3] });
        assert_eq!(redact_value(&v), v);
    }
}
