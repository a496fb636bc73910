//! String escaping for interpolating values into SQL literals.

use crate::error::{DbiError, Result};

/// Escapes for a standard SQL string literal: single quotes are doubled.
/// With `backslashes` set, backslashes are doubled as well, for servers that
/// still treat them as escape characters.
pub fn escape_standard(value: &str, backslashes: bool) -> Result<String> {
    if value.contains('\0') {
        return Err(DbiError::InvalidInput(
            "string literal cannot contain NUL".to_string(),
        ));
    }
    let mut out = String::with_capacity(value.len() + 2);
    for c in value.chars() {
        match c {
            '\'' => out.push_str("''"),
            '\\' if backslashes => out.push_str("\\\\"),
            _ => out.push(c),
        }
    }
    Ok(out)
}

/// Backslash escaping in the MySQL style.
pub fn escape_backslash(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    for c in value.chars() {
        match c {
            '\0' => out.push_str("\\0"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '"' => out.push_str("\\\""),
            '\u{1a}' => out.push_str("\\Z"),
            _ => out.push(c),
        }
    }
    out
}
