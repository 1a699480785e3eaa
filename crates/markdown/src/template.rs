use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde_json::Value;

use crate::convert::scalar_text;

fn placeholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"\{\{\s*\$json(?:\.([\w.]+)|\['([^']+)'\]|\["([^"]+)"\])\s*\}\}"#)
            .expect("placeholder pattern is valid")
    })
}

/// Substitute `{{ $json.path }}`, `{{ $json['key'] }}` and `{{ $json["key"] }}`.
///
/// Dotted paths walk nested objects (and arrays by index). A placeholder
/// whose path does not resolve is left as written.
pub fn apply_template(template: &str, data: &Value) -> String {
    placeholder()
        .replace_all(template, |caps: &Captures<'_>| {
            let resolved = match (caps.get(1), caps.get(2).or_else(|| caps.get(3))) {
                (Some(path), _) => lookup_path(data, path.as_str()),
                (None, Some(key)) => data.get(key.as_str()),
                (None, None) => None,
            };
            match resolved {
                Some(value) => scalar_text(value),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Nested lookup by dot-separated path.
pub fn lookup_path<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(data, |value, key| match value {
        Value::Object(map) => map.get(key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}
