//! `{{name}}` placeholder substitution used by the harness templates.
//!
//! Substitution is single pass: inserted values are copied verbatim and never
//! scanned again, so user source containing `{{...}}` survives untouched.
//! Braces that do not enclose an identifier are copied literally.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("no value supplied for placeholder {{{{{0}}}}}")]
    MissingValue(String),
}

pub fn render(template: &str, values: &[(&str, &str)]) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some((before, name, after)) = next_placeholder(rest) {
        out.push_str(before);
        match name {
            Some(name) => {
                let value = values
                    .iter()
                    .find(|(key, _)| *key == name)
                    .map(|(_, value)| *value)
                    .ok_or_else(|| TemplateError::MissingValue(name.to_string()))?;
                out.push_str(value);
            }
            None => out.push_str("{{"),
        }
        rest = after;
    }

    out.push_str(rest);
    Ok(out)
}

/// Placeholder names in order of appearance, duplicates included.
pub fn placeholders(template: &str) -> Vec<&str> {
    let mut names = Vec::new();
    let mut rest = template;
    while let Some((_, name, after)) = next_placeholder(rest) {
        if let Some(name) = name {
            names.push(name);
        }
        rest = after;
    }
    names
}

/// Splits at the next `{{`. Yields the text before it, the placeholder name
/// when the braces enclose an identifier, and the remaining input.
fn next_placeholder(input: &str) -> Option<(&str, Option<&str>, &str)> {
    let start = input.find("{{")?;
    let before = &input[..start];
    let after_open = &input[start + 2..];

    if let Some(end) = after_open.find("}}") {
        let name = &after_open[..end];
        if is_identifier(name) {
            return Some((before, Some(name), &after_open[end + 2..]));
        }
    }

    Some((before, None, after_open))
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
