//! Boundary-aware rewriting of issue-id references inside text fields.
//!
//! Rename propagation is modeled as a flat byte-level rewrite pass: a
//! token matches only when delimited on both sides by ASCII whitespace,
//! the string edge, or one of `, . ! ? : ; ( ) [ ] { }`. Longer ids are
//! rewritten before shorter ones so `old-1` never fires inside `old-10`.

use std::collections::HashMap;

fn is_boundary(c: char) -> bool {
    c.is_ascii_whitespace()
        || matches!(
            c,
            ',' | '.' | '!' | '?' | ':' | ';' | '(' | ')' | '[' | ']' | '{' | '}'
        )
}

/// Replace bounded occurrences of `token` with `replacement`.
///
/// Returns the rewritten string and the number of replacements made.
#[must_use]
pub fn rewrite_token(text: &str, token: &str, replacement: &str) -> (String, usize) {
    if token.is_empty() || !text.contains(token) {
        return (text.to_string(), 0);
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    let mut count = 0;

    while let Some(pos) = rest.find(token) {
        let prev_char = if pos > 0 {
            rest[..pos].chars().next_back()
        } else {
            out.chars().next_back()
        };
        let before_ok = prev_char.is_none_or(is_boundary);
        let after = &rest[pos + token.len()..];
        let after_ok = after.chars().next().is_none_or(is_boundary);

        out.push_str(&rest[..pos]);
        if before_ok && after_ok {
            out.push_str(replacement);
            count += 1;
        } else {
            out.push_str(token);
        }
        rest = after;
    }
    out.push_str(rest);
    (out, count)
}

/// Apply a rename map to a string, longest ids first.
///
/// Returns `Some(rewritten)` only when at least one replacement happened.
#[must_use]
pub fn rewrite_references(text: &str, renames: &HashMap<String, String>) -> Option<String> {
    let mut ordered: Vec<(&String, &String)> = renames.iter().collect();
    ordered.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(b.0)));

    let mut current = text.to_string();
    let mut total = 0;
    for (old_id, new_id) in ordered {
        let (next, count) = rewrite_token(&current, old_id, new_id);
        current = next;
        total += count;
    }
    (total > 0).then_some(current)
}

/// Apply a rename map to an optional text field in place; true if changed.
pub fn rewrite_optional_field(
    field: &mut Option<String>,
    renames: &HashMap<String, String>,
) -> bool {
    if let Some(text) = field {
        if let Some(rewritten) = rewrite_references(text, renames) {
            *field = Some(rewritten);
            return true;
        }
    }
    false
}
