use crate::options::{CharacterFiltering, Replacement};

/// Characters escaped by `escape_markdown`, backslash first.
const MARKDOWN_SPECIALS: [char; 15] = [
    '\\', '`', '*', '_', '{', '}', '[', ']', '(', ')', '#', '+', '-', '.', '!',
];

/// Run the enabled passes in fixed order: unescape `\'`, unescape `\"`,
/// drop literal `\r`, turn literal `\n` into a space, escape Markdown, then
/// custom replacements.
///
/// The quote and newline passes act on backslash sequences left in the text
/// by upstream JSON encoding, not on control characters.
pub fn apply_filtering(content: &str, filtering: &CharacterFiltering) -> String {
    let mut out = content.to_string();

    if filtering.unescape_single_quotes {
        out = out.replace("\\'", "'");
    }
    if filtering.unescape_quotes {
        out = out.replace("\\\"", "\"");
    }
    if filtering.remove_carriage_returns {
        out = out.replace("\\r", "");
    }
    if filtering.remove_newlines {
        out = out.replace("\\n", " ");
    }
    if filtering.escape_markdown {
        out = escape_markdown(&out);
    }
    for replacement in &filtering.replacements {
        out = apply_replacement(&out, replacement);
    }
    out
}

pub fn escape_markdown(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    for c in content.chars() {
        if MARKDOWN_SPECIALS.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn apply_replacement(content: &str, replacement: &Replacement) -> String {
    if replacement.find.is_empty() {
        return content.to_string();
    }
    let find = decode_find(&replacement.find);
    if find.is_empty() {
        return content.to_string();
    }
    content.replace(&find, &replacement.replace)
}

/// Decode the escapes an operator can type into a find string.
fn decode_find(find: &str) -> String {
    find.replace("\\n", "\n")
        .replace("\\r", "\r")
        .replace("\\t", "\t")
        .replace("\\\"", "\"")
        .replace("\\'", "'")
        .replace("\\\\", "\\")
}
