//! Quoting of labels, relationship types and property keys in query text.

use std::fmt::Write;

/// Appends `name` to `out`, wrapping it in backticks unless it is a plain
/// identifier (`[A-Za-z_][A-Za-z0-9_]*`). Embedded backticks are doubled.
pub(crate) fn write_identifier(out: &mut String, name: &str) {
    if is_plain_identifier(name) {
        out.push_str(name);
        return;
    }
    out.push('`');
    for ch in name.chars() {
        if ch == '`' {
            out.push('`');
        }
        out.push(ch);
    }
    out.push('`');
}

/// Appends `:Label` tokens for every label.
pub(crate) fn write_labels<'a, I>(out: &mut String, labels: I)
where
    I: IntoIterator<Item = &'a str>,
{
    for label in labels {
        out.push(':');
        write_identifier(out, label);
    }
}

/// Derives a parameter name from a relationship type, e.g. `rowsKNOWS`.
///
/// Characters that cannot appear in a parameter name are replaced with `_`;
/// `taken` decides whether a numeric suffix is needed to stay unique.
pub(crate) fn type_param_name(prefix: &str, rel_type: &str, taken: impl Fn(&str) -> bool) -> String {
    let mut base = String::with_capacity(prefix.len() + rel_type.len());
    base.push_str(prefix);
    for ch in rel_type.chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' {
            base.push(ch);
        } else {
            base.push('_');
        }
    }
    if !taken(&base) {
        return base;
    }
    let mut n = 1usize;
    loop {
        let mut candidate = base.clone();
        let _ = write!(candidate, "_{n}");
        if !taken(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
