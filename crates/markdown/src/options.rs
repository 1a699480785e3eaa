use std::path::Path;

use serde::{Deserialize, Serialize};

use common::{Error, Result};

/// Everything that controls one conversion.
///
/// Example `markdown.toml`:
/// ```toml
/// template = "# {{ $json.title }}\n\n{{ $json.content }}"
///
/// [conversion]
/// format = "table"
/// include_headers = false
///
/// [filtering]
/// escape_markdown = true
///
/// [[filtering.replacements]]
/// find = "\\t"
/// replace = "  "
///
/// [output]
/// mode = "binary"
/// file_name = "report.md"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkdownOptions {
    /// When non-blank, replaces automatic conversion.
    pub template: Option<String>,
    pub conversion: ConversionOptions,
    pub filtering: CharacterFiltering,
    pub output: OutputOptions,
}

impl MarkdownOptions {
    /// Load from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read markdown options at '{}': {e}", path.display()))
        })?;
        Self::from_toml_str(&content).map_err(|e| match e {
            Error::Config(msg) => Error::Config(format!("{} ({msg})", path.display())),
            other => other,
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse markdown options: {e}")))
    }

    /// The template, if one is set and not blank.
    pub fn active_template(&self) -> Option<&str> {
        self.template.as_deref().filter(|t| !t.trim().is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// Table for uniform arrays of objects, list otherwise.
    #[default]
    Auto,
    Table,
    List,
    /// Pretty-printed JSON in a fenced block.
    Codeblock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionOptions {
    pub format: Format,
    pub include_headers: bool,
}

impl Default for ConversionOptions {
    fn default() -> Self {
        Self {
            format: Format::Auto,
            include_headers: true,
        }
    }
}

/// Post-conversion passes. All off by default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CharacterFiltering {
    pub unescape_single_quotes: bool,
    pub unescape_quotes: bool,
    pub remove_carriage_returns: bool,
    pub remove_newlines: bool,
    pub escape_markdown: bool,
    pub replacements: Vec<Replacement>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Replacement {
    /// `\n`, `\r`, `\t`, `\"`, `\'` and `\\` are decoded before matching.
    pub find: String,
    pub replace: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// Add the markdown to the item under `property_name`.
    #[default]
    Json,
    /// Produce a file named `file_name`.
    Binary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputOptions {
    pub mode: OutputMode,
    pub property_name: String,
    pub file_name: String,
}

impl Default for OutputOptions {
    fn default() -> Self {
        Self {
            mode: OutputMode::Json,
            property_name: "markdown".into(),
            file_name: "output.md".into(),
        }
    }
}
