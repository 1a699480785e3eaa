use serde_json::{Map, Value};

use common::format_decimal;

use crate::options::{ConversionOptions, Format};

/// Text form of a value inside prose: strings bare, numbers in natural
/// decimal form, containers as compact JSON.
pub fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) if n.is_f64() => n.as_f64().map(format_decimal).unwrap_or_default(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Automatic JSON → Markdown.
pub fn auto_convert(data: &Value, options: &ConversionOptions) -> String {
    if options.format == Format::Codeblock {
        return codeblock(data);
    }

    match data {
        Value::Array(items) if items.is_empty() => "*No data*".to_string(),
        Value::Array(items) => match options.format {
            Format::Table if all_objects(items) => table(items, options.include_headers),
            Format::Auto if is_tabular(items) => table(items, options.include_headers),
            _ => list(items),
        },
        Value::Object(map) => sections(map),
        other => scalar_text(other),
    }
}

fn codeblock(data: &Value) -> String {
    format!("```json\n{}\n```", pretty(data))
}

fn pretty(data: &Value) -> String {
    serde_json::to_string_pretty(data).unwrap_or_else(|_| data.to_string())
}

fn all_objects(items: &[Value]) -> bool {
    items.iter().all(Value::is_object)
}

/// Non-empty objects that all have as many keys as the first.
fn is_tabular(items: &[Value]) -> bool {
    let Some(Value::Object(first)) = items.first() else {
        return false;
    };
    !first.is_empty()
        && items
            .iter()
            .all(|item| item.as_object().is_some_and(|m| m.len() == first.len()))
}

/// Columns come from the first row.
fn table(items: &[Value], include_headers: bool) -> String {
    let Some(Value::Object(first)) = items.first() else {
        return String::new();
    };
    let keys: Vec<&String> = first.keys().collect();
    let mut out = String::new();

    if include_headers {
        let header: Vec<&str> = keys.iter().map(|k| k.as_str()).collect();
        out.push_str(&format!("| {} |\n", header.join(" | ")));
        out.push_str(&format!("|{}|\n", vec![" --- "; keys.len()].join("|")));
    }

    for item in items {
        let cells: Vec<String> = keys
            .iter()
            .map(|key| match item.get(key.as_str()) {
                None | Some(Value::Null) => String::new(),
                Some(v @ (Value::Object(_) | Value::Array(_))) => v.to_string(),
                Some(v) => scalar_text(v).replace('|', "\\|").replace('\n', " "),
            })
            .collect();
        out.push_str(&format!("| {} |\n", cells.join(" | ")));
    }
    out
}

fn list(items: &[Value]) -> String {
    items
        .iter()
        .map(|item| match item {
            Value::Object(map) => format!("- {}\n", list_item(map)),
            other => format!("- {}\n", scalar_text(other)),
        })
        .collect()
}

fn list_item(map: &Map<String, Value>) -> String {
    map.iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| format!("{k}: {}", scalar_text(v)))
        .collect::<Vec<_>>()
        .join(", ")
}

/// One `## key` section per non-null field.
fn sections(map: &Map<String, Value>) -> String {
    let mut out = String::new();
    for (key, value) in map {
        match value {
            Value::Null => continue,
            Value::Array(items) => {
                out.push_str(&format!("## {key}\n\n"));
                out.push_str(&list(items));
                out.push('\n');
            }
            Value::Object(_) => {
                out.push_str(&format!("## {key}\n\n"));
                out.push_str(&format!("```json\n{}\n```\n\n", pretty(value)));
            }
            scalar => {
                out.push_str(&format!("## {key}\n\n"));
                out.push_str(&scalar_text(scalar));
                out.push_str("\n\n");
            }
        }
    }
    out
}
