//! The placeholder mini-language used by SQL templates.
//!
//! Templates use `{name}` for a substitution slot and `{{`/`}}` for a literal
//! brace. Each formatting pass consumes exactly one level of escaping, so
//! `{{name}}` survives one pass as `{name}` and is substituted by the next.
//! Raw SQL text must have its literal braces doubled before entering this
//! pipeline; the expression compiler doubles them once more so they survive
//! both model-level passes.

use sqlgraph_error::{Result, SqlGraphError};

/// Escape a string for one formatting pass by doubling every brace.
pub fn escape_format_string(value: &str) -> String {
    value.replace('{', "{{").replace('}', "}}")
}

/// Run one formatting pass over `template`.
///
/// `resolve` maps a placeholder name to its replacement text; returning None
/// fails the pass. Unbalanced or stray braces fail as well: silently emitting
/// a half-substituted template would corrupt the generated SQL.
pub fn format_template<F>(template: &str, resolve: F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    let bytes = template.as_bytes();
    let mut out = String::with_capacity(template.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'{' if bytes.get(i + 1) == Some(&b'{') => {
                out.push('{');
                i += 2;
            }
            b'}' if bytes.get(i + 1) == Some(&b'}') => {
                out.push('}');
                i += 2;
            }
            b'{' => {
                let start = i + 1;
                let end = match bytes[start..].iter().position(|&b| b == b'}' || b == b'{') {
                    Some(offset) if bytes[start + offset] == b'}' => start + offset,
                    _ => {
                        return Err(SqlGraphError::new(format!(
                            "unterminated placeholder in template: {template}"
                        )));
                    }
                };
                let name = &template[start..end];
                match resolve(name) {
                    Some(value) => out.push_str(&value),
                    None => {
                        return Err(SqlGraphError::new(format!(
                            "no value for placeholder '{name}' in template: {template}"
                        )));
                    }
                }
                i = end + 1;
            }
            b'}' => {
                return Err(SqlGraphError::new(format!(
                    "stray '}}' in template: {template}"
                )));
            }
            _ => {
                // Multi-byte UTF-8 never contains ASCII braces, safe to copy
                // bytewise up to the next brace.
                let next = bytes[i..]
                    .iter()
                    .position(|&b| b == b'{' || b == b'}')
                    .map(|p| i + p)
                    .unwrap_or(bytes.len());
                out.push_str(&template[i..next]);
                i = next;
            }
        }
    }
    Ok(out)
}
