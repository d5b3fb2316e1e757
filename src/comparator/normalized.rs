use async_trait::async_trait;

use crate::{
    comparator::{
        Comparator,
        ComparisonOutcome,
        ComparisonRequest,
    },
    error::GradeResult,
};

/// Local comparator that forgives formatting differences between languages.
///
/// Both sides are reduced to a token stream before comparing: commas and
/// whitespace only separate, `()` reads as `[]`, quotes are dropped,
/// `True`/`None`/`nil` become `true`/`null` and `2.0` reads as `2`.
/// Ordering still matters.
pub struct NormalizedComparator;

#[async_trait]
impl Comparator for NormalizedComparator {
    fn name(&self) -> &'static str {
        "normalized"
    }

    async fn compare(&self, request: &ComparisonRequest) -> GradeResult<ComparisonOutcome> {
        let expected = &request.expected_outputs_by_label;
        let actual = &request.actual_outputs_by_label;

        if !expected.labels().eq(actual.labels()) {
            tracing::warn!(
                expected = expected.len(),
                actual = actual.len(),
                "label sets differ; cannot grade"
            );
            return Ok(ComparisonOutcome {
                graded: false,
                hint: None,
                is_correct: vec![false; expected.len()],
            });
        }

        let is_correct = expected
            .values()
            .zip(actual.values())
            .map(|(want, got)| canonical_tokens(want) == canonical_tokens(got))
            .collect();

        Ok(ComparisonOutcome {
            graded: true,
            hint: None,
            is_correct,
        })
    }
}

pub fn canonical_tokens(output: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut atom = String::new();
    let mut chars = output.trim().chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() || c == ',' => flush(&mut atom, &mut tokens),
            '[' | '(' => {
                flush(&mut atom, &mut tokens);
                tokens.push("[".to_string());
            }
            ']' | ')' => {
                flush(&mut atom, &mut tokens);
                tokens.push("]".to_string());
            }
            '{' | '}' | ':' => {
                flush(&mut atom, &mut tokens);
                tokens.push(c.to_string());
            }
            '"' | '\'' if atom.is_empty() => {
                let mut quoted = String::new();
                while let Some(inner) = chars.next() {
                    match inner {
                        '\\' => {
                            if let Some(escaped) = chars.next() {
                                quoted.push(escaped);
                            }
                        }
                        q if q == c => break,
                        other => quoted.push(other),
                    }
                }
                tokens.push(quoted);
            }
            other => atom.push(other),
        }
    }
    flush(&mut atom, &mut tokens);

    // An empty string prints as a blank line in most languages.
    if tokens.len() == 1 && tokens[0].is_empty() {
        tokens.clear();
    }
    tokens
}

fn flush(atom: &mut String, tokens: &mut Vec<String>) {
    if !atom.is_empty() {
        tokens.push(normalize_atom(atom));
        atom.clear();
    }
}

fn normalize_atom(atom: &str) -> String {
    for (spellings, canonical) in [
        (&["true"][..], "true"),
        (&["false"][..], "false"),
        (&["null", "none", "nil", "undefined"][..], "null"),
    ] {
        if spellings.iter().any(|s| atom.eq_ignore_ascii_case(s)) {
            return canonical.to_string();
        }
    }

    let is_number_like = atom
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'))
        && atom.chars().any(|c| c.is_ascii_digit());
    if is_number_like {
        if atom.contains(['.', 'e', 'E']) {
            if let Ok(value) = atom.parse::<f64>() {
                return format!("{value}");
            }
        }
        return atom.trim_start_matches('+').to_string();
    }

    atom.to_string()
}
