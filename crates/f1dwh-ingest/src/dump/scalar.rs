//! Per-token type inference

use f1dwh_common::FieldValue;

/// Only a leading minus counts as a sign; `+3` stays text
fn split_sign(token: &str) -> &str {
    token.strip_prefix('-').unwrap_or(token)
}

fn all_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Signed integer: `-12`, `7`
pub(crate) fn is_integer_token(token: &str) -> bool {
    all_digits(split_sign(token))
}

/// Signed decimal with a fractional part: `3.500`, `-0.25`
pub(crate) fn is_decimal_token(token: &str) -> bool {
    match split_sign(token).split_once('.') {
        Some((whole, fraction)) => all_digits(whole) && all_digits(fraction),
        None => false,
    }
}

/// Undo SQL quote escaping inside a single-quoted literal
fn unescape_quoted(inner: &str) -> String {
    inner.replace("\\'", "'").replace("''", "'")
}

/// Infer a bare (unquoted) token: decimal, integer, or verbatim text.
///
/// Integers that overflow `i64` are kept as text.
pub fn infer_bare(token: &str) -> FieldValue {
    if token.is_empty() {
        return FieldValue::Null;
    }
    if is_decimal_token(token) {
        if let Ok(v) = token.parse::<f64>() {
            return FieldValue::Float(v);
        }
    }
    if is_integer_token(token) {
        if let Ok(i) = token.parse::<i64>() {
            return FieldValue::Integer(i);
        }
    }
    FieldValue::Text(token.to_string())
}

/// Infer the value of one field token from an `INSERT` tuple.
///
/// Priority: `NULL` (any case) or empty → null; single-quoted → text with
/// escapes undone; then [`infer_bare`].
pub fn infer_sql_token(raw: &str) -> FieldValue {
    let token = raw.trim();

    if token.is_empty() || token.eq_ignore_ascii_case("NULL") {
        return FieldValue::Null;
    }

    if token.len() >= 2 && token.starts_with('\'') && token.ends_with('\'') {
        return FieldValue::Text(unescape_quoted(&token[1..token.len() - 1]));
    }

    infer_bare(token)
}
