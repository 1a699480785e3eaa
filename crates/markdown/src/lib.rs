//! JSON → Markdown serializer.
//!
//! Either a `{{ $json.path }}` template or automatic conversion (table, list,
//! sections, codeblock), followed by optional character filtering.

pub mod convert;
pub mod filter;
pub mod options;
pub mod template;

use serde_json::{Map, Value};
use tracing::debug;

pub use convert::auto_convert;
pub use filter::{apply_filtering, escape_markdown};
pub use options::{
    CharacterFiltering, ConversionOptions, Format, MarkdownOptions, OutputMode, OutputOptions,
    Replacement,
};
pub use template::apply_template;

/// Render one item.
///
/// A string input holding JSON is parsed first; any other string is
/// rendered as text.
pub fn render(input: &Value, options: &MarkdownOptions) -> String {
    let parsed;
    let data = match input {
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(value) => {
                parsed = value;
                &parsed
            }
            Err(_) => input,
        },
        other => other,
    };

    let markdown = match options.active_template() {
        Some(template) => {
            debug!("Rendering markdown from template");
            apply_template(template, data)
        }
        None => {
            debug!(format = ?options.conversion.format, "Rendering markdown automatically");
            auto_convert(data, &options.conversion)
        }
    };

    apply_filtering(&markdown, &options.filtering)
}

/// Where a rendered document ends up.
#[derive(Debug, Clone, PartialEq)]
pub enum Rendered {
    /// The input item with the markdown added as a property.
    Item(Value),
    /// The input item unchanged, plus a file to write.
    File {
        item: Value,
        file_name: String,
        contents: String,
    },
}

/// Place `markdown` according to the output options.
///
/// In JSON mode a non-object item is wrapped as `{ "data": item }` before the
/// property is added.
pub fn attach(item: Value, markdown: String, output: &OutputOptions) -> Rendered {
    match output.mode {
        OutputMode::Json => {
            let mut map = match item {
                Value::Object(map) => map,
                other => {
                    let mut map = Map::new();
                    map.insert("data".into(), other);
                    map
                }
            };
            map.insert(output.property_name.clone(), Value::String(markdown));
            Rendered::Item(Value::Object(map))
        }
        OutputMode::Binary => Rendered::File {
            item,
            file_name: output.file_name.clone(),
            contents: markdown,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_strings_are_parsed_before_conversion() {
        let input = json!(r#"[{"symbol":"BTCUSDT","price":"1"}]"#);
        assert_eq!(
            render(&input, &MarkdownOptions::default()),
            "| symbol | price |\n| --- | --- |\n| BTCUSDT | 1 |\n"
        );
    }

    #[test]
    fn plain_strings_render_as_text() {
        assert_eq!(render(&json!("hello *world*"), &MarkdownOptions::default()), "hello *world*");
    }

    #[test]
    fn template_wins_over_format_and_is_filtered() {
        let mut opts = MarkdownOptions {
            template: Some("# {{ $json.title }}".into()),
            ..Default::default()
        };
        opts.conversion.format = Format::Codeblock;
        opts.filtering.escape_markdown = true;
        assert_eq!(render(&json!({ "title": "v1.2" }), &opts), r"\# v1\.2");
    }

    #[test]
    fn json_mode_adds_property() {
        let out = OutputOptions {
            property_name: "md".into(),
            ..Default::default()
        };
        assert_eq!(
            attach(json!({ "a": 1 }), "x".into(), &out),
            Rendered::Item(json!({ "a": 1, "md": "x" }))
        );
        assert_eq!(
            attach(json!([1]), "x".into(), &out),
            Rendered::Item(json!({ "data": [1], "md": "x" }))
        );
    }

    #[test]
    fn binary_mode_produces_file() {
        let out = OutputOptions {
            mode: OutputMode::Binary,
            ..Default::default()
        };
        assert_eq!(
            attach(json!({ "a": 1 }), "# doc".into(), &out),
            Rendered::File {
                item: json!({ "a": 1 }),
                file_name: "output.md".into(),
                contents: "# doc".into(),
            }
        );
    }
}
